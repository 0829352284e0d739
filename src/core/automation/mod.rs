pub mod types;

use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::browser::{
    BrowserDriver, BrowserPage, BrowserResult, Selector, WaitState,
    class_contains_xpath, has_text_xpath, text_is_xpath,
};
use crate::core::store::AccountId;

pub use types::*;

const PURCHASE_SUCCESS_FRAGMENT: &str = "purchase-success";

fn login_button() -> Selector {
    Selector::has_text("button", "Log in")
}

fn provider_sign_in() -> Selector {
    Selector::has_text("button", "Sign in with Gameloft account")
}

fn email_input() -> Selector {
    Selector::css("#email")
}

fn remember_me() -> Selector {
    Selector::css("input[type=\"checkbox\"], .remember-me")
}

fn continue_button() -> Selector {
    Selector::has_text("button", "Continue")
}

fn otp_input() -> Selector {
    Selector::css("#auth-code")
}

fn otp_submit() -> Selector {
    Selector::has_text("button", "Submit")
}

fn free_item() -> Selector {
    Selector::text_is("div", "Free")
}

fn reward_card_xpath() -> String {
    format!(
        "({})[1]/parent::div/parent::div/parent::div",
        text_is_xpath("div", "Free")
    )
}

fn reward_card() -> Selector {
    Selector::xpath(&reward_card_xpath())
}

fn reward_card_image() -> Selector {
    Selector::xpath(&format!(
        "{}//img[contains(@src, 'webstore_')]",
        reward_card_xpath()
    ))
}

fn claim_button() -> Selector {
    Selector::xpath(&format!(
        "{} | {} | {}",
        has_text_xpath("button", "Claim"),
        class_contains_xpath("claim"),
        text_is_xpath("div", "Claim")
    ))
}

/// Per-account, per-email persistent browser profile.
pub fn profile_dir(base: &Path, account_id: AccountId, email: &str) -> PathBuf {
    base.join(account_id.to_string()).join(email_slug(email))
}

pub fn email_slug(email: &str) -> String {
    email
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub store_url: String,
    pub timings: AutomationTimings,
    pub loss_policy: SessionLossPolicy,
    /// Where element screenshots land when a reward has no image URL.
    pub capture_dir: PathBuf,
}

impl SessionSettings {
    /// Path segment identifying the storefront page in the current URL.
    fn store_marker(&self) -> String {
        url::Url::parse(&self.store_url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.rfind(|s| !s.is_empty()).map(str::to_string))
            })
            .unwrap_or_else(|| self.store_url.clone())
    }
}

/// Drives one account email through login, OTP and reward collection.
///
/// Every public operation returns a typed outcome; browser faults are logged
/// and folded into the safe result for that operation.
pub struct StorefrontSession {
    account_id: AccountId,
    email: String,
    page: Box<dyn BrowserPage>,
    settings: SessionSettings,
    state: SessionState,
}

impl StorefrontSession {
    pub async fn open(
        driver: &dyn BrowserDriver,
        profiles_root: &Path,
        account_id: AccountId,
        email: &str,
        settings: SessionSettings,
    ) -> BrowserResult<Self> {
        let dir = profile_dir(profiles_root, account_id, email);
        let page = driver.open(&dir).await?;
        info!("[{}] Browser session opened for {}", account_id, email);
        Ok(Self {
            account_id,
            email: email.to_string(),
            page,
            settings,
            state: SessionState::Idle,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, to: SessionState) {
        if self.state.can_transition(to) {
            debug!("[{}] {:?} -> {:?}", self.account_id, self.state, to);
            self.state = to;
        } else {
            warn!(
                "[{}] Ignoring invalid transition {:?} -> {:?}",
                self.account_id, self.state, to
            );
        }
    }

    async fn human_delay(&self, min_ms: u64, max_ms: u64) {
        let ms = if max_ms > min_ms {
            rand::thread_rng().gen_range(min_ms..=max_ms)
        } else {
            min_ms
        };
        self.page.pause(Duration::from_millis(ms)).await;
    }

    async fn human_scroll(&self) -> BrowserResult<()> {
        let t = &self.settings.timings;
        for _ in 0..t.scroll_steps {
            self.page.scroll_by(t.scroll_step_px).await?;
            self.page.pause(AutomationTimings::ms(t.scroll_step_ms)).await;
        }
        self.human_delay(t.human_delay_min_ms, t.human_delay_max_ms)
            .await;
        Ok(())
    }

    async fn login_affordance_visible(&self) -> BrowserResult<bool> {
        self.page.is_visible(&login_button()).await
    }

    pub async fn start_login(&mut self) -> LoginStart {
        if self.state != SessionState::Idle {
            warn!("[{}] start_login called in state {:?}", self.account_id, self.state);
            return LoginStart::Failed(format!("session is {:?}", self.state));
        }
        self.transition(SessionState::AuthPending);

        let result = match self.try_start_login().await {
            Ok(result) => result,
            Err(e) => {
                error!("[{}] Login start failed: {}", self.account_id, e);
                LoginStart::Failed(e.to_string())
            }
        };
        match &result {
            LoginStart::AlreadyLogged => {
                info!("[{}] Session already active for {}", self.account_id, self.email);
                self.transition(SessionState::Authenticated);
            }
            LoginStart::NeedOtp => {
                info!("[{}] Code requested for {}", self.account_id, self.email);
                self.transition(SessionState::OtpPending);
            }
            LoginStart::Failed(reason) => {
                warn!("[{}] Login failed: {}", self.account_id, reason);
                self.transition(SessionState::Failed);
            }
        }
        result
    }

    async fn try_start_login(&self) -> BrowserResult<LoginStart> {
        let t = &self.settings.timings;
        info!("[{}] Loading storefront", self.account_id);
        self.page.goto(&self.settings.store_url).await?;

        let login = login_button();
        match self
            .page
            .wait_for(&login, WaitState::Visible, AutomationTimings::ms(t.element_timeout_ms))
            .await
        {
            Ok(()) => self.page.click(&login).await?,
            Err(e) if e.is_absence() => return Ok(LoginStart::AlreadyLogged),
            Err(e) => return Err(e),
        }

        let provider = provider_sign_in();
        if self
            .page
            .wait_for(&provider, WaitState::Visible, AutomationTimings::ms(t.element_timeout_ms))
            .await
            .is_ok()
        {
            self.human_delay(t.human_delay_min_ms / 2, t.human_delay_max_ms / 2)
                .await;
            self.page.click(&provider).await?;
        }

        let email = email_input();
        match self
            .page
            .wait_for(&email, WaitState::Visible, AutomationTimings::ms(t.email_input_timeout_ms))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_absence() => return Ok(LoginStart::Failed("UI_NOT_READY".into())),
            Err(e) => return Err(e),
        }
        self.page.fill(&email, &self.email).await?;

        let remember = remember_me();
        if self.page.is_visible(&remember).await.unwrap_or(false)
            && let Err(e) = self.page.click(&remember).await
        {
            debug!("[{}] Remember-me toggle skipped: {}", self.account_id, e);
        }

        match self.page.click(&continue_button()).await {
            Ok(()) => Ok(LoginStart::NeedOtp),
            Err(e) if e.is_absence() => Ok(LoginStart::Failed("CONTINUE_MISSING".into())),
            Err(e) => Err(e),
        }
    }

    /// Success is the disappearance of the code input after the settle
    /// window. Nothing server-side confirms it.
    pub async fn submit_otp(&mut self, code: &str) -> bool {
        if self.state != SessionState::OtpPending {
            warn!("[{}] submit_otp called in state {:?}", self.account_id, self.state);
            return false;
        }
        let accepted = match self.try_submit_otp(code).await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("[{}] Code submission failed: {}", self.account_id, e);
                false
            }
        };
        if accepted {
            info!("[{}] Code accepted for {}", self.account_id, self.email);
            self.transition(SessionState::Authenticated);
        } else {
            warn!("[{}] Code rejected for {}", self.account_id, self.email);
            self.transition(SessionState::Failed);
        }
        accepted
    }

    async fn try_submit_otp(&self, code: &str) -> BrowserResult<bool> {
        let t = &self.settings.timings;
        let input = otp_input();
        self.page
            .wait_for(&input, WaitState::Visible, AutomationTimings::ms(t.otp_input_timeout_ms))
            .await?;
        self.page.fill(&input, code).await?;
        self.page.click(&otp_submit()).await?;

        self.page.pause(t.settle()).await;
        if self.page.is_visible(&input).await? {
            return Ok(false);
        }

        if let Err(e) = self
            .page
            .wait_for_url(
                &self.settings.store_marker(),
                AutomationTimings::ms(t.post_login_timeout_ms),
            )
            .await
        {
            debug!("[{}] Post-login redirect not observed: {}", self.account_id, e);
        }
        Ok(true)
    }

    /// Heuristic session probe: authenticated means the logged-out affordance
    /// is absent after the settle window. A slow page or a changed button
    /// label can make this report a live session as lost.
    pub async fn probe_authenticated(&mut self) -> bool {
        let alive = match self.try_probe().await {
            Ok(alive) => alive,
            Err(e) => {
                error!("[{}] Session probe failed: {}", self.account_id, e);
                false
            }
        };
        if self.state == SessionState::Idle {
            self.transition(if alive {
                SessionState::Authenticated
            } else {
                SessionState::SessionLost
            });
        }
        alive
    }

    async fn try_probe(&self) -> BrowserResult<bool> {
        self.page.goto(&self.settings.store_url).await?;
        self.page.pause(self.settings.timings.settle()).await;
        Ok(!self.login_affordance_visible().await?)
    }

    /// Logged-out affordance check with one reload-and-recheck.
    async fn session_alive(&self) -> BrowserResult<bool> {
        if !self.login_affordance_visible().await? {
            return Ok(true);
        }
        info!("[{}] Login button visible, reloading once", self.account_id);
        self.page.reload().await?;
        self.page.pause(self.settings.timings.settle()).await;
        Ok(!self.login_affordance_visible().await?)
    }

    /// Claims up to two free items. Never fails: faults before the first slot
    /// yield an empty report, faults inside a slot stop the loop and keep
    /// what was already claimed.
    pub async fn collect_rewards(&mut self) -> CollectOutcome {
        if self.state.is_terminal() || self.state == SessionState::OtpPending {
            warn!("[{}] collect_rewards called in state {:?}", self.account_id, self.state);
            return CollectOutcome::Collected(CollectReport::default());
        }
        info!("[{}] Collecting rewards for {}", self.account_id, self.email);

        match self.try_collect().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[{}] Reward collection aborted: {}", self.account_id, e);
                if self.state == SessionState::Collecting {
                    self.transition(SessionState::Done);
                }
                CollectOutcome::Collected(CollectReport::default())
            }
        }
    }

    /// Returns to the storefront after a purchase and reports whether the
    /// session still holds.
    async fn ready_for_slot(&self, slot: u32) -> BrowserResult<bool> {
        if slot > 1 && self.page.current_url().await?.contains(PURCHASE_SUCCESS_FRAGMENT) {
            self.page.goto(&self.settings.store_url).await?;
            let t = &self.settings.timings;
            self.human_delay(t.human_delay_min_ms, t.human_delay_max_ms)
                .await;
        }
        self.session_alive().await
    }

    async fn try_collect(&mut self) -> BrowserResult<CollectOutcome> {
        let marker = self.settings.store_marker();
        if !self.page.current_url().await?.contains(&marker) {
            self.page.goto(&self.settings.store_url).await?;
        }
        self.page.pause(self.settings.timings.settle()).await;

        let mut report = CollectReport::default();
        for slot in 1..=MAX_REWARD_SLOTS {
            let alive = match self.ready_for_slot(slot).await {
                Ok(alive) => alive,
                Err(e) if slot > 1 => {
                    info!("[{}] Slot {} unreachable: {}", self.account_id, slot, e);
                    break;
                }
                Err(e) => return Err(e),
            };
            if !alive {
                warn!("[{}] Session invalid at slot {}", self.account_id, slot);
                self.transition(SessionState::SessionLost);
                return Ok(self.session_lost_outcome(report));
            }
            if self.state != SessionState::Collecting {
                self.transition(SessionState::Authenticated);
                self.transition(SessionState::Collecting);
            }

            match self.claim_slot(slot).await {
                Ok(Some(image)) => {
                    report.count += 1;
                    report.reward_images.extend(image);
                    info!("[{}] Reward #{} claimed", self.account_id, slot);
                }
                Ok(None) => {
                    info!("[{}] No free item at slot {}", self.account_id, slot);
                    break;
                }
                Err(e) => {
                    info!("[{}] Slot {} stopped: {}", self.account_id, slot, e);
                    break;
                }
            }
        }

        self.transition(SessionState::Done);
        Ok(CollectOutcome::Collected(report))
    }

    fn session_lost_outcome(&self, report: CollectReport) -> CollectOutcome {
        if report.count == 0 {
            return CollectOutcome::SessionLost;
        }
        match self.settings.loss_policy {
            SessionLossPolicy::Preserve => CollectOutcome::Collected(CollectReport {
                session_lost: true,
                ..report
            }),
            SessionLossPolicy::Discard => CollectOutcome::SessionLost,
        }
    }

    /// `Ok(None)` when no free item shows up. `Ok(Some(image))` after a
    /// claim, where the image may be missing if capture failed.
    async fn claim_slot(&self, slot: u32) -> BrowserResult<Option<Option<RewardImage>>> {
        let t = &self.settings.timings;
        self.human_scroll().await?;

        let free = free_item();
        match self
            .page
            .wait_for(&free, WaitState::Visible, AutomationTimings::ms(t.free_item_timeout_ms))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_absence() => return Ok(None),
            Err(e) => return Err(e),
        }
        if self.page.inner_text(&free).await?.trim() != "Free" {
            return Ok(None);
        }

        let image = self.capture_reward(slot).await;
        self.page.click(&free).await?;

        let claim = claim_button();
        self.page
            .wait_for(&claim, WaitState::Visible, AutomationTimings::ms(t.claim_timeout_ms))
            .await?;
        self.page.click(&claim).await?;

        if let Err(e) = self
            .page
            .wait_for_url(
                PURCHASE_SUCCESS_FRAGMENT,
                AutomationTimings::ms(t.purchase_success_timeout_ms),
            )
            .await
        {
            debug!("[{}] No purchase confirmation page: {}", self.account_id, e);
        }
        self.human_delay(t.claim_delay_min_ms, t.claim_delay_max_ms)
            .await;
        Ok(Some(image))
    }

    async fn capture_reward(&self, slot: u32) -> Option<RewardImage> {
        match self.page.attribute(&reward_card_image(), "src").await {
            Ok(Some(src)) if !src.is_empty() => return Some(RewardImage::Url(src)),
            Ok(_) => {}
            Err(e) => debug!("[{}] Reward image lookup failed: {}", self.account_id, e),
        }

        let bytes = match self.page.screenshot(&reward_card()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("[{}] Reward card screenshot failed: {}", self.account_id, e);
                return None;
            }
        };
        let path = self.settings.capture_dir.join(format!(
            "reward_{}_{}_{}.png",
            self.account_id,
            chrono::Utc::now().timestamp_millis(),
            slot
        ));
        if let Err(e) = write_capture(&path, &bytes).await {
            warn!("[{}] Could not store reward capture: {}", self.account_id, e);
            return None;
        }
        Some(RewardImage::File(path))
    }

    /// Releases the browser. Consumes the session so it cannot be reused.
    pub async fn close(self) {
        if let Err(e) = self.page.close().await {
            warn!("[{}] Browser close failed: {}", self.account_id, e);
        } else {
            debug!("[{}] Browser session closed", self.account_id);
        }
    }
}

async fn write_capture(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_dirs_split_by_account_and_email() {
        let dir = profile_dir(Path::new("/data/profiles"), 77, "Racer.One@Mail.com");
        assert_eq!(dir, PathBuf::from("/data/profiles/77/racer_one_mail_com"));
    }

    #[test]
    fn store_marker_is_last_path_segment() {
        let settings = SessionSettings {
            store_url: "https://shop.gameloft.com/games/Asphalt_Legends".into(),
            timings: AutomationTimings::instant(),
            loss_policy: SessionLossPolicy::Preserve,
            capture_dir: PathBuf::from("/tmp"),
        };
        assert_eq!(settings.store_marker(), "Asphalt_Legends");
    }

    #[test]
    fn claim_selector_unions_all_variants() {
        let claim = claim_button();
        assert_eq!(claim.value.matches(" | ").count(), 2);
        assert!(reward_card_image().value.contains("webstore_"));
    }
}
