pub mod webdriver;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

pub use webdriver::WebDriverBrowser;

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("timed out after {ms}ms waiting for {condition}")]
    Timeout { ms: u64, condition: String },

    #[error("no element matches {0}")]
    NotFound(String),

    #[error("webdriver protocol error: {0}")]
    Protocol(String),

    #[error("webdriver transport error: {0}")]
    Transport(String),
}

impl BrowserError {
    /// Timeouts and missing elements mean "the affordance is not there",
    /// which callers treat as a branch, not a fault.
    pub fn is_absence(&self) -> bool {
        matches!(self, BrowserError::Timeout { .. } | BrowserError::NotFound(_))
    }
}

impl From<reqwest::Error> for BrowserError {
    fn from(e: reqwest::Error) -> Self {
        BrowserError::Transport(e.to_string())
    }
}

pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Css,
    XPath,
}

/// Element locator. Text-matching selectors compile down to XPath so any
/// W3C driver can evaluate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub strategy: Strategy,
    pub value: String,
}

impl Selector {
    pub fn css(value: &str) -> Self {
        Self {
            strategy: Strategy::Css,
            value: value.to_string(),
        }
    }

    pub fn xpath(value: &str) -> Self {
        Self {
            strategy: Strategy::XPath,
            value: value.to_string(),
        }
    }

    /// `<tag>` whose normalized text contains `text`.
    pub fn has_text(tag: &str, text: &str) -> Self {
        Self::xpath(&has_text_xpath(tag, text))
    }

    /// `<tag>` whose normalized text equals `text`.
    pub fn text_is(tag: &str, text: &str) -> Self {
        Self::xpath(&text_is_xpath(tag, text))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.strategy {
            Strategy::Css => write!(f, "css={}", self.value),
            Strategy::XPath => write!(f, "xpath={}", self.value),
        }
    }
}

pub fn has_text_xpath(tag: &str, text: &str) -> String {
    format!("//{}[contains(normalize-space(.), {})]", tag, xpath_literal(text))
}

pub fn text_is_xpath(tag: &str, text: &str) -> String {
    format!("//{}[normalize-space(.) = {}]", tag, xpath_literal(text))
}

pub fn class_contains_xpath(fragment: &str) -> String {
    format!("//*[contains(@class, {})]", xpath_literal(fragment))
}

/// Quotes `text` as an XPath string literal, falling back to `concat()` when
/// it contains both quote kinds.
pub fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Attached,
    Visible,
    Hidden,
}

/// One controllable page inside a persistent browser profile.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> BrowserResult<()>;
    async fn reload(&self) -> BrowserResult<()>;
    async fn current_url(&self) -> BrowserResult<String>;
    async fn wait_for(&self, selector: &Selector, state: WaitState, timeout: Duration)
    -> BrowserResult<()>;
    async fn is_visible(&self, selector: &Selector) -> BrowserResult<bool>;
    async fn click(&self, selector: &Selector) -> BrowserResult<()>;
    async fn fill(&self, selector: &Selector, text: &str) -> BrowserResult<()>;
    async fn attribute(&self, selector: &Selector, name: &str) -> BrowserResult<Option<String>>;
    async fn inner_text(&self, selector: &Selector) -> BrowserResult<String>;
    async fn scroll_by(&self, dy: i64) -> BrowserResult<()>;
    /// PNG bytes of the matched element.
    async fn screenshot(&self, selector: &Selector) -> BrowserResult<Vec<u8>>;
    async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> BrowserResult<()>;
    async fn close(&self) -> BrowserResult<()>;

    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Opens pages bound to a per-account profile directory.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&self, profile_dir: &Path) -> BrowserResult<Box<dyn BrowserPage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_selectors_compile_to_xpath() {
        let login = Selector::has_text("button", "Log in");
        assert_eq!(login.strategy, Strategy::XPath);
        assert_eq!(login.value, "//button[contains(normalize-space(.), 'Log in')]");

        let free = Selector::text_is("div", "Free");
        assert_eq!(free.value, "//div[normalize-space(.) = 'Free']");
        assert_eq!(free.to_string(), "xpath=//div[normalize-space(.) = 'Free']");
    }

    #[test]
    fn xpath_literal_handles_quotes() {
        assert_eq!(xpath_literal("plain"), "'plain'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal("a'b\"c"),
            "concat('a', \"'\", 'b\"c')"
        );
    }

    #[test]
    fn absence_errors_are_distinguished_from_faults() {
        assert!(BrowserError::NotFound("x".into()).is_absence());
        assert!(
            BrowserError::Timeout {
                ms: 5,
                condition: "x".into()
            }
            .is_absence()
        );
        assert!(!BrowserError::Transport("reset".into()).is_absence());
    }
}
