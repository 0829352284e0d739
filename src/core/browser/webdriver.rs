use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde_json::{Value, json};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    BrowserDriver, BrowserError, BrowserPage, BrowserResult, Selector, Strategy, WaitState,
};
use crate::platform::{NativePlatform, Platform};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Talks W3C WebDriver (chromedriver) over HTTP. Each `open` starts a fresh
/// browser session pointed at the given profile directory.
pub struct WebDriverBrowser {
    client: reqwest::Client,
    endpoint: String,
    headless: bool,
    page_load_timeout: Duration,
    poll_interval: Duration,
}

impl WebDriverBrowser {
    pub fn new(endpoint: &str, headless: bool, page_load_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            headless,
            page_load_timeout,
            poll_interval: Duration::from_millis(200),
        }
    }

    fn capabilities(&self, profile_dir: &Path) -> Value {
        let mut args = vec![
            format!("--user-data-dir={}", profile_dir.display()),
            "--window-size=1280,800".to_string(),
            format!("--user-agent={}", USER_AGENT),
            "--disable-blink-features=AutomationControlled".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn open(&self, profile_dir: &Path) -> BrowserResult<Box<dyn BrowserPage>> {
        tokio::fs::create_dir_all(profile_dir)
            .await
            .map_err(|e| BrowserError::Protocol(format!("profile dir: {}", e)))?;
        NativePlatform::restrict_dir_permissions(profile_dir);

        let body = self.capabilities(profile_dir);
        let value = send(
            &self.client,
            Method::POST,
            &format!("{}/session", self.endpoint),
            Some(body),
        )
        .await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol("new session without sessionId".into()))?;
        info!("WebDriver session {} opened ({})", session_id, profile_dir.display());

        let page = WebDriverPage {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
            poll_interval: self.poll_interval,
        };
        page.command(
            Method::POST,
            "/timeouts",
            Some(json!({ "pageLoad": self.page_load_timeout.as_millis() as u64 })),
        )
        .await?;
        Ok(Box::new(page))
    }
}

async fn send(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> BrowserResult<Value> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.send().await?;
    let payload: Value = response.json().await?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(match error {
            "no such element" | "stale element reference" => BrowserError::NotFound(message),
            "timeout" | "script timeout" => BrowserError::Timeout {
                ms: 0,
                condition: message,
            },
            _ => BrowserError::Protocol(format!("{}: {}", error, message)),
        });
    }
    Ok(value)
}

pub struct WebDriverPage {
    client: reqwest::Client,
    base: String,
    poll_interval: Duration,
}

impl WebDriverPage {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> BrowserResult<Value> {
        send(&self.client, method, &format!("{}{}", self.base, path), body).await
    }

    async fn find_all(&self, selector: &Selector) -> BrowserResult<Vec<String>> {
        let using = match selector.strategy {
            Strategy::Css => "css selector",
            Strategy::XPath => "xpath",
        };
        let value = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": using, "value": selector.value })),
            )
            .await?;
        Ok(value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(ELEMENT_KEY).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find(&self, selector: &Selector) -> BrowserResult<Option<String>> {
        Ok(self.find_all(selector).await?.into_iter().next())
    }

    async fn require(&self, selector: &Selector) -> BrowserResult<String> {
        self.find(selector)
            .await?
            .ok_or_else(|| BrowserError::NotFound(selector.to_string()))
    }

    async fn state_reached(&self, selector: &Selector, state: WaitState) -> BrowserResult<bool> {
        match state {
            WaitState::Attached => Ok(self.find(selector).await?.is_some()),
            WaitState::Visible => self.is_visible(selector).await,
            WaitState::Hidden => Ok(!self.is_visible(selector).await?),
        }
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        debug!("goto {}", url);
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn reload(&self) -> BrowserResult<()> {
        self.command(Method::POST, "/refresh", Some(json!({}))).await?;
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        let value = self.command(Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn wait_for(
        &self,
        selector: &Selector,
        state: WaitState,
        timeout: Duration,
    ) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.state_reached(selector, state).await {
                Ok(true) => return Ok(()),
                Ok(false) | Err(BrowserError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    ms: timeout.as_millis() as u64,
                    condition: format!("{} to be {:?}", selector, state),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn is_visible(&self, selector: &Selector) -> BrowserResult<bool> {
        let Some(id) = self.find(selector).await? else {
            return Ok(false);
        };
        match self
            .command(Method::GET, &format!("/element/{}/displayed", id), None)
            .await
        {
            Ok(value) => Ok(value.as_bool().unwrap_or(false)),
            Err(BrowserError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn click(&self, selector: &Selector) -> BrowserResult<()> {
        let id = self.require(selector).await?;
        self.command(Method::POST, &format!("/element/{}/click", id), Some(json!({})))
            .await?;
        Ok(())
    }

    async fn fill(&self, selector: &Selector, text: &str) -> BrowserResult<()> {
        let id = self.require(selector).await?;
        self.command(Method::POST, &format!("/element/{}/clear", id), Some(json!({})))
            .await?;
        self.command(
            Method::POST,
            &format!("/element/{}/value", id),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn attribute(&self, selector: &Selector, name: &str) -> BrowserResult<Option<String>> {
        let Some(id) = self.find(selector).await? else {
            return Ok(None);
        };
        let value = self
            .command(Method::GET, &format!("/element/{}/attribute/{}", id, name), None)
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn inner_text(&self, selector: &Selector) -> BrowserResult<String> {
        let id = self.require(selector).await?;
        let value = self
            .command(Method::GET, &format!("/element/{}/text", id), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn scroll_by(&self, dy: i64) -> BrowserResult<()> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": "window.scrollBy(0, arguments[0]);", "args": [dy] })),
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&self, selector: &Selector) -> BrowserResult<Vec<u8>> {
        let id = self.require(selector).await?;
        let value = self
            .command(Method::GET, &format!("/element/{}/screenshot", id), None)
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("screenshot without data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| BrowserError::Protocol(format!("screenshot decode: {}", e)))
    }

    async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> BrowserResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.current_url().await?.contains(fragment) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    ms: timeout.as_millis() as u64,
                    condition: format!("url containing '{}'", fragment),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn close(&self) -> BrowserResult<()> {
        if let Err(e) = send(&self.client, Method::DELETE, &self.base, None).await {
            warn!("WebDriver session close failed: {}", e);
            return Err(e);
        }
        debug!("WebDriver session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_carry_profile_and_headless_flag() {
        let browser = WebDriverBrowser::new("http://127.0.0.1:9515/", true, Duration::from_secs(60));
        assert_eq!(browser.endpoint, "http://127.0.0.1:9515");

        let caps = browser.capabilities(Path::new("/tmp/profiles/7/a_x_io"));
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(args.iter().any(|a| a == "--user-data-dir=/tmp/profiles/7/a_x_io"));
        assert!(args.iter().any(|a| a == "--headless=new"));

        let headed = WebDriverBrowser::new("http://x", false, Duration::from_secs(1));
        let caps = headed.capabilities(Path::new("/p"));
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(!args.iter().any(|a| a == "--headless=new"));
    }
}
