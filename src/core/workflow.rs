use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::core::automation::{
    CollectOutcome, LoginStart, RewardImage, SessionSettings, StorefrontSession,
};
use crate::core::browser::BrowserDriver;
use crate::core::config::AppConfig;
use crate::core::coordinator::SlotGuard;
use crate::core::notify::Outbox;
use crate::core::store::{
    AccountId, AccountRecord, AccountStatus, AttemptOutcome, MessageCategory, Store, now_ts,
};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email.trim())
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub profiles_dir: PathBuf,
    pub session: SessionSettings,
    pub trial_days: i64,
    pub max_elevated_emails: usize,
    pub login_timeout: Duration,
}

impl WorkflowSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            profiles_dir: cfg.profiles_dir(),
            session: SessionSettings {
                store_url: cfg.store_url.clone(),
                timings: cfg.automation.clone(),
                loss_policy: cfg.session_loss_policy,
                capture_dir: cfg.data_dir.join("captures"),
            },
            trial_days: cfg.trial_days,
            max_elevated_emails: cfg.max_elevated_emails,
            login_timeout: cfg.login_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailResult {
    pub email: String,
    pub outcome: AttemptOutcome,
    pub count: u32,
    pub session_lost: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    pub total: u32,
    pub emails: Vec<EmailResult>,
}

impl CollectionSummary {
    pub fn session_lost(&self) -> bool {
        self.emails.iter().any(|e| e.session_lost)
    }

    pub fn render(&self) -> String {
        if self.emails.is_empty() {
            return "ℹ️ No authenticated email to collect with. Use /login first.".to_string();
        }
        let mut lines = vec![if self.total > 0 {
            format!("🎁 Collected {} reward(s)!", self.total)
        } else {
            "🎁 Collection finished.".to_string()
        }];
        for result in &self.emails {
            let line = match result.outcome {
                AttemptOutcome::Success if result.session_lost => format!(
                    "⚠️ {}: {} claimed, then the session expired. Log in again.",
                    result.email, result.count
                ),
                AttemptOutcome::Success => format!("✅ {}: {} claimed", result.email, result.count),
                AttemptOutcome::Empty => format!("ℹ️ {}: no free rewards right now", result.email),
                AttemptOutcome::SessionLost => {
                    format!("⚠️ {}: session expired. Log in again.", result.email)
                }
                AttemptOutcome::Error => format!("❌ {}: technical error", result.email),
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginProgress {
    AwaitingOtp,
    Completed(CollectionSummary),
    Failed(String),
    InvalidEmail,
    EmailLimitReached(usize),
    NoPendingLogin,
    Expired,
}

/// What the scheduler and the relay need from the account workflows.
#[async_trait]
pub trait AccountActions: Send + Sync {
    async fn collect(&self, slot: &SlotGuard) -> Result<CollectionSummary>;
    async fn check(&self, slot: &SlotGuard, notify: bool) -> Result<bool>;
    async fn dashboard(&self, account_id: AccountId) -> Result<()>;
}

struct PendingLogin {
    session: StorefrontSession,
    email: String,
    started: Instant,
    _slot: SlotGuard,
}

/// Account-level flows shared by the chat commands, the scheduler and the
/// relay. Callers hand in a [`SlotGuard`] as proof they own the account.
pub struct AccountWorkflows {
    store: Store,
    outbox: Outbox,
    driver: Arc<dyn BrowserDriver>,
    settings: WorkflowSettings,
    pending: Mutex<HashMap<AccountId, PendingLogin>>,
}

impl AccountWorkflows {
    pub fn new(
        store: Store,
        outbox: Outbox,
        driver: Arc<dyn BrowserDriver>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            outbox,
            driver,
            settings,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub async fn ensure_account(&self, account_id: AccountId) -> Result<AccountRecord> {
        self.store
            .ensure_account(account_id, self.settings.trial_days)
            .await
    }

    async fn open_session(
        &self,
        account_id: AccountId,
        email: &str,
    ) -> Result<StorefrontSession> {
        StorefrontSession::open(
            self.driver.as_ref(),
            &self.settings.profiles_dir,
            account_id,
            email,
            self.settings.session.clone(),
        )
        .await
        .map_err(|e| anyhow!("browser unavailable for {}: {}", email, e))
    }

    /// Emails to drive, in registration order. Standard accounts use one.
    async fn working_emails(&self, account: &AccountRecord) -> Result<Vec<String>> {
        let mut emails: Vec<String> = self
            .store
            .account_emails(account.id)
            .await?
            .into_iter()
            .filter(|e| e.status == AccountStatus::Active)
            .map(|e| e.email)
            .collect();
        if emails.is_empty()
            && account.is_active()
            && let Some(primary) = &account.email
        {
            emails.push(primary.clone());
        }
        if !account.is_elevated {
            emails.truncate(1);
        }
        Ok(emails)
    }

    /// Demotes after a session loss: standard accounts always, elevated
    /// accounts once no authenticated email remains.
    async fn demote_after_loss(&self, account: &AccountRecord) -> Result<()> {
        let remaining = self
            .store
            .account_emails(account.id)
            .await?
            .iter()
            .filter(|e| e.status == AccountStatus::Active)
            .count();
        if !account.is_elevated || remaining == 0 {
            self.store
                .set_account_status(account.id, AccountStatus::NeedAuth)
                .await?;
            warn!("[{}] Account demoted to NEED_AUTH", account.id);
        }
        Ok(())
    }

    /// Writes the attempt row for one email and returns its result.
    async fn record_outcome(
        &self,
        account_id: AccountId,
        email: &str,
        outcome: CollectOutcome,
    ) -> Result<(EmailResult, Vec<RewardImage>)> {
        match outcome {
            CollectOutcome::SessionLost => {
                self.store
                    .record_attempt(account_id, AttemptOutcome::SessionLost, 0, Some(email))
                    .await?;
                self.store
                    .set_email_status(account_id, email, AccountStatus::NeedAuth)
                    .await?;
                Ok((
                    EmailResult {
                        email: email.to_string(),
                        outcome: AttemptOutcome::SessionLost,
                        count: 0,
                        session_lost: true,
                    },
                    Vec::new(),
                ))
            }
            CollectOutcome::Collected(report) => {
                let outcome = if report.count > 0 {
                    AttemptOutcome::Success
                } else {
                    AttemptOutcome::Empty
                };
                self.store
                    .record_attempt(account_id, outcome, report.count, Some(email))
                    .await?;
                if report.count > 0 {
                    self.store.touch_email_collected(account_id, email).await?;
                }
                if report.session_lost {
                    self.store
                        .set_email_status(account_id, email, AccountStatus::NeedAuth)
                        .await?;
                }
                Ok((
                    EmailResult {
                        email: email.to_string(),
                        outcome,
                        count: report.count,
                        session_lost: report.session_lost,
                    },
                    report.reward_images,
                ))
            }
        }
    }

    async fn collect_email(
        &self,
        account_id: AccountId,
        email: &str,
    ) -> Result<(EmailResult, Vec<RewardImage>)> {
        let mut session = match self.open_session(account_id, email).await {
            Ok(session) => session,
            Err(e) => {
                error!("[{}] {}", account_id, e);
                self.store
                    .record_attempt(account_id, AttemptOutcome::Error, 0, Some(email))
                    .await?;
                return Ok((
                    EmailResult {
                        email: email.to_string(),
                        outcome: AttemptOutcome::Error,
                        count: 0,
                        session_lost: false,
                    },
                    Vec::new(),
                ));
            }
        };
        let outcome = session.collect_rewards().await;
        session.close().await;
        self.record_outcome(account_id, email, outcome).await
    }

    async fn deliver_summary(
        &self,
        account_id: AccountId,
        headline: Option<&str>,
        summary: &CollectionSummary,
        images: &[RewardImage],
    ) {
        let text = match headline {
            Some(headline) => format!("{}\n\n{}", headline, summary.render()),
            None => summary.render(),
        };
        if let Err(e) = self
            .outbox
            .text(account_id, &text, MessageCategory::Persistent, None)
            .await
        {
            warn!("[{}] Could not deliver collection result: {}", account_id, e);
        }
        for image in images {
            if let Err(e) = self
                .outbox
                .photo(account_id, image, None, MessageCategory::Persistent)
                .await
            {
                warn!("[{}] Could not deliver reward image: {}", account_id, e);
            }
        }
        if !images.is_empty() {
            let refs: Vec<String> = images.iter().map(RewardImage::reference).collect();
            if let Err(e) = self.store.set_reward_images(&refs).await {
                warn!("Could not update reward images: {}", e);
            }
        }
    }

    /// Collects for every working email of the slot's account, one at a time.
    pub async fn run_collection(&self, slot: &SlotGuard) -> Result<CollectionSummary> {
        let account_id = slot.account_id();
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| anyhow!("unknown account {}", account_id))?;
        if account.is_blocked {
            bail!("account {} is blocked", account_id);
        }
        let emails = self.working_emails(&account).await?;
        info!("[{}] Collection run over {} email(s)", account_id, emails.len());

        let mut summary = CollectionSummary::default();
        let mut images = Vec::new();
        for email in &emails {
            let (result, captured) = self.collect_email(account_id, email).await?;
            summary.total += result.count;
            summary.emails.push(result);
            images.extend(captured);
        }

        if summary.session_lost() {
            self.demote_after_loss(&account).await?;
        }
        self.deliver_summary(account_id, None, &summary, &images)
            .await;
        self.store
            .log_activity(
                account_id,
                "collect",
                Some(&format!("{} reward(s)", summary.total)),
            )
            .await?;
        Ok(summary)
    }

    /// Probes every working email; returns true when all are authenticated.
    pub async fn check_session(&self, slot: &SlotGuard, notify: bool) -> Result<bool> {
        let account_id = slot.account_id();
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| anyhow!("unknown account {}", account_id))?;
        let emails = self.working_emails(&account).await?;

        let mut all_alive = !emails.is_empty();
        for email in &emails {
            let mut session = self.open_session(account_id, email).await?;
            let alive = session.probe_authenticated().await;
            session.close().await;
            if !alive {
                all_alive = false;
                self.store
                    .set_email_status(account_id, email, AccountStatus::NeedAuth)
                    .await?;
            }
        }

        let label = if all_alive { "ACTIVE" } else { "EXPIRED" };
        self.store.record_session_check(account_id, label).await?;
        if !all_alive {
            self.demote_after_loss(&account).await?;
        }
        self.store
            .log_activity(account_id, "check_session", Some(label))
            .await?;
        info!("[{}] Session check: {}", account_id, label);

        if notify {
            let text = if all_alive {
                "✅ Session is active."
            } else {
                "❌ Session lost. Use /login to sign in again."
            };
            if let Err(e) = self
                .outbox
                .text(account_id, text, MessageCategory::Persistent, None)
                .await
            {
                warn!("[{}] Could not deliver check result: {}", account_id, e);
            }
        }
        Ok(all_alive)
    }

    /// First half of the interactive login. On `AwaitingOtp` the slot stays
    /// held by the pending login until the code arrives, it is cancelled,
    /// or it times out.
    pub async fn begin_login(&self, slot: SlotGuard, email: &str) -> Result<LoginProgress> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Ok(LoginProgress::InvalidEmail);
        }
        let account_id = slot.account_id();
        let account = self.ensure_account(account_id).await?;

        if account.is_elevated {
            let registered = self.store.account_emails(account_id).await?;
            let known = registered.iter().any(|e| e.email.eq_ignore_ascii_case(email));
            let active = registered
                .iter()
                .filter(|e| e.status == AccountStatus::Active)
                .count();
            if !known && active >= self.settings.max_elevated_emails {
                return Ok(LoginProgress::EmailLimitReached(
                    self.settings.max_elevated_emails,
                ));
            }
        }

        let mut session = match self.open_session(account_id, email).await {
            Ok(session) => session,
            Err(e) => {
                error!("[{}] {}", account_id, e);
                return Ok(LoginProgress::Failed("browser unavailable".into()));
            }
        };

        match session.start_login().await {
            LoginStart::AlreadyLogged => {
                let summary = self.finish_login(session, &account, email).await?;
                Ok(LoginProgress::Completed(summary))
            }
            LoginStart::NeedOtp => {
                self.pending.lock().await.insert(
                    account_id,
                    PendingLogin {
                        session,
                        email: email.to_string(),
                        started: Instant::now(),
                        _slot: slot,
                    },
                );
                Ok(LoginProgress::AwaitingOtp)
            }
            LoginStart::Failed(reason) => {
                session.close().await;
                self.store
                    .log_activity(account_id, "login_failed", Some(&reason))
                    .await?;
                Ok(LoginProgress::Failed(reason))
            }
        }
    }

    pub async fn has_pending_login(&self, account_id: AccountId) -> bool {
        self.pending.lock().await.contains_key(&account_id)
    }

    /// Second half of the interactive login.
    pub async fn complete_login(&self, account_id: AccountId, code: &str) -> Result<LoginProgress> {
        let Some(pending) = self.pending.lock().await.remove(&account_id) else {
            return Ok(LoginProgress::NoPendingLogin);
        };
        let PendingLogin {
            mut session,
            email,
            started,
            _slot,
        } = pending;

        if started.elapsed() > self.settings.login_timeout {
            session.close().await;
            return Ok(LoginProgress::Expired);
        }

        if !session.submit_otp(code.trim()).await {
            session.close().await;
            self.store
                .log_activity(account_id, "login_failed", Some("code rejected"))
                .await?;
            return Ok(LoginProgress::Failed("code rejected".into()));
        }

        let account = self.ensure_account(account_id).await?;
        let summary = self.finish_login(session, &account, &email).await?;
        Ok(LoginProgress::Completed(summary))
    }

    async fn finish_login(
        &self,
        mut session: StorefrontSession,
        account: &AccountRecord,
        email: &str,
    ) -> Result<CollectionSummary> {
        let outcome = session.collect_rewards().await;
        session.close().await;

        if !account.is_elevated {
            self.store.clear_account_emails(account.id).await?;
        }
        self.store.upsert_account_email(account.id, email).await?;
        self.store.activate_account(account.id, email).await?;
        self.store.log_activity(account.id, "login", Some(email)).await?;
        info!("[{}] Logged in as {}", account.id, email);

        let (result, images) = self.record_outcome(account.id, email, outcome).await?;
        let summary = CollectionSummary {
            total: result.count,
            emails: vec![result],
        };
        if summary.session_lost() {
            let refreshed = self
                .store
                .get_account(account.id)
                .await?
                .unwrap_or_else(|| account.clone());
            self.demote_after_loss(&refreshed).await?;
        }
        self.deliver_summary(account.id, Some("✅ Login successful."), &summary, &images)
            .await;
        Ok(summary)
    }

    pub async fn cancel_login(&self, account_id: AccountId) -> bool {
        let pending = self.pending.lock().await.remove(&account_id);
        match pending {
            Some(pending) => {
                pending.session.close().await;
                info!("[{}] Pending login cancelled", account_id);
                true
            }
            None => false,
        }
    }

    /// Closes pending logins older than the login timeout, freeing their slots.
    pub async fn expire_stale_logins(&self) -> usize {
        let stale: Vec<(AccountId, PendingLogin)> = {
            let mut pending = self.pending.lock().await;
            let ids: Vec<AccountId> = pending
                .iter()
                .filter(|(_, p)| p.started.elapsed() > self.settings.login_timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        let count = stale.len();
        for (account_id, pending) in stale {
            pending.session.close().await;
            warn!("[{}] Pending login timed out", account_id);
            if let Err(e) = self
                .outbox
                .text(
                    account_id,
                    "⌛ Login timed out. Send /login again.",
                    MessageCategory::Reaction,
                    None,
                )
                .await
            {
                warn!("[{}] Could not deliver timeout notice: {}", account_id, e);
            }
        }
        count
    }

    /// Forgets the account's storefront identity and wipes its profiles.
    pub async fn logout(&self, slot: &SlotGuard) -> Result<()> {
        let account_id = slot.account_id();
        self.store
            .set_account_status(account_id, AccountStatus::NeedAuth)
            .await?;
        self.store.clear_account_emails(account_id).await?;

        let dir = self.settings.profiles_dir.join(account_id.to_string());
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("[{}] Could not remove profile dir: {}", account_id, e),
        }
        self.store.log_activity(account_id, "logout", None).await?;
        info!("[{}] Logged out", account_id);
        Ok(())
    }

    /// Clears the chat and posts a fresh dashboard.
    pub async fn show_dashboard(&self, account_id: AccountId) -> Result<()> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| anyhow!("unknown account {}", account_id))?;
        self.outbox.purge_history(account.id).await?;

        let status = if account.is_active() {
            "Active ✅"
        } else {
            "Login required ⚠️"
        };
        let tier = if account.is_elevated {
            "Premium".to_string()
        } else if account.trial_expired(now_ts()) {
            "Trial ended".to_string()
        } else {
            let left = (account.trial_expires_at.unwrap_or(0) - now_ts()).max(0);
            format!("Trial ({} day(s) left)", (left + 86_399) / 86_400)
        };
        let last = match self.store.attempts_for_account(account.id, 20).await?.iter().find(|a| {
            a.rewards_collected > 0
        }) {
            Some(attempt) => chrono::DateTime::from_timestamp(attempt.created_at, 0)
                .map(|ts| format!("{} ({}/2)", ts.format("%Y-%m-%d %H:%M UTC"), attempt.rewards_collected))
                .unwrap_or_else(|| "n/a".to_string()),
            None => "n/a".to_string(),
        };
        let text = format!(
            "🏎️ Daily Rewards Dashboard\n\n👤 Status: {}\n⭐ Tier: {}\n📧 Email: {}\n🎁 Last collection: {}\n\nSee /help for commands.",
            status,
            tier,
            account.email.as_deref().unwrap_or("n/a"),
            last
        );
        self.outbox
            .text(account.id, &text, MessageCategory::Dashboard, None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AccountActions for AccountWorkflows {
    async fn collect(&self, slot: &SlotGuard) -> Result<CollectionSummary> {
        self.run_collection(slot).await
    }

    async fn check(&self, slot: &SlotGuard, notify: bool) -> Result<bool> {
        self.check_session(slot, notify).await
    }

    async fn dashboard(&self, account_id: AccountId) -> Result<()> {
        self.show_dashboard(account_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation_matches_simple_shape() {
        assert!(is_valid_email("racer@mail.com"));
        assert!(is_valid_email("  racer@mail.com "));
        assert!(!is_valid_email("racer@mail"));
        assert!(!is_valid_email("racer mail@x.com"));
        assert!(!is_valid_email("@x.com"));
    }

    #[test]
    fn summary_renders_each_email() {
        let summary = CollectionSummary {
            total: 2,
            emails: vec![
                EmailResult {
                    email: "a@x.io".into(),
                    outcome: AttemptOutcome::Success,
                    count: 2,
                    session_lost: false,
                },
                EmailResult {
                    email: "b@x.io".into(),
                    outcome: AttemptOutcome::SessionLost,
                    count: 0,
                    session_lost: true,
                },
            ],
        };
        let text = summary.render();
        assert!(text.starts_with("🎁 Collected 2 reward(s)!"));
        assert!(text.contains("a@x.io: 2 claimed"));
        assert!(text.contains("b@x.io: session expired"));
        assert!(summary.session_lost());
    }
}
