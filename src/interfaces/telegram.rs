use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, InputFile, MessageId};
use tracing::{debug, error, info, warn};

use crate::core::automation::RewardImage;
use crate::core::config::AppConfig;
use crate::core::coordinator::{ActionKind, SlotGuard, TaskCoordinator};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::notify::{Notifier, Outbox};
use crate::core::store::{AccountId, AccountRecord, MessageCategory, Store, now_ts};
use crate::core::workflow::{AccountWorkflows, LoginProgress};

static OTP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}$").expect("valid code pattern"));

const NOTICE_TTL: Duration = Duration::from_secs(10);
const LOGIN_COOLDOWN: Duration = Duration::from_secs(15);

const HELP_TEXT: &str = "\
🏎️ freeclaim

/login <email> - sign in to the storefront (a 5-digit code follows by email)
/cancel - abort a pending login
/check - verify the storefront session
/collect - claim today's free items now
/rewards - show the latest reward artwork
/logout - forget the storefront session
/start - refresh the dashboard
/help - this message

Send the 5-digit code as a plain message when asked.";

/// Delivers outbound messages through the Telegram Bot API. The account id
/// is the chat id.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_text(&self, account_id: AccountId, text: &str) -> Result<i64> {
        let msg = self.bot.send_message(ChatId(account_id), text).await?;
        Ok(i64::from(msg.id.0))
    }

    async fn send_photo(
        &self,
        account_id: AccountId,
        image: &RewardImage,
        caption: Option<&str>,
    ) -> Result<i64> {
        let file = match image {
            RewardImage::Url(url) => InputFile::url(url::Url::parse(url)?),
            RewardImage::File(path) => InputFile::file(path.clone()),
        };
        let mut request = self.bot.send_photo(ChatId(account_id), file);
        if let Some(caption) = caption {
            request = request.caption(caption);
        }
        let msg = request.await?;
        Ok(i64::from(msg.id.0))
    }

    async fn delete_message(&self, account_id: AccountId, message_id: i64) -> Result<()> {
        self.bot
            .delete_message(ChatId(account_id), MessageId(i32::try_from(message_id)?))
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Start,
    Help,
    Login(String),
    Code(String),
    Cancel,
    Check,
    Collect,
    Rewards,
    Logout,
    Unknown,
}

impl ChatCommand {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if OTP_RE.is_match(text) {
            return ChatCommand::Code(text.to_string());
        }
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };
        // Group chats address commands as /cmd@botname.
        let head = head.split('@').next().unwrap_or(head);
        match head {
            "/start" => ChatCommand::Start,
            "/help" => ChatCommand::Help,
            "/login" => ChatCommand::Login(rest.to_string()),
            "/cancel" => ChatCommand::Cancel,
            "/check" => ChatCommand::Check,
            "/collect" => ChatCommand::Collect,
            "/rewards" => ChatCommand::Rewards,
            "/logout" => ChatCommand::Logout,
            _ => ChatCommand::Unknown,
        }
    }
}

/// Chat command semantics, independent of the Telegram transport.
pub struct ChatHandler {
    store: Store,
    outbox: Outbox,
    coordinator: Arc<dyn TaskCoordinator>,
    workflows: Arc<AccountWorkflows>,
    check_cooldown: Duration,
    collect_cooldown: Duration,
}

impl ChatHandler {
    pub fn new(
        store: Store,
        outbox: Outbox,
        coordinator: Arc<dyn TaskCoordinator>,
        workflows: Arc<AccountWorkflows>,
        cfg: &AppConfig,
    ) -> Self {
        Self {
            store,
            outbox,
            coordinator,
            workflows,
            check_cooldown: Duration::from_secs(cfg.check_cooldown_secs),
            collect_cooldown: Duration::from_secs(cfg.collect_cooldown_secs),
        }
    }

    async fn reply(&self, account_id: AccountId, text: &str) {
        if let Err(e) = self
            .outbox
            .text(account_id, text, MessageCategory::Persistent, None)
            .await
        {
            warn!("[{}] Reply failed: {}", account_id, e);
        }
    }

    /// Short-lived notice the reaper removes after a few seconds.
    async fn notice(&self, account_id: AccountId, text: &str) {
        if let Err(e) = self
            .outbox
            .text(account_id, text, MessageCategory::Reaction, Some(NOTICE_TTL))
            .await
        {
            warn!("[{}] Notice failed: {}", account_id, e);
        }
    }

    async fn acquire_or_notify(&self, account_id: AccountId) -> Option<SlotGuard> {
        let slot = SlotGuard::acquire(&self.coordinator, account_id);
        if slot.is_none() {
            let text = if self.workflows.has_pending_login(account_id).await {
                "📩 Waiting for your 5-digit code. Send /cancel to abort."
            } else {
                "⚠️ Another task is running for your account. Please wait."
            };
            self.notice(account_id, text).await;
        }
        slot
    }

    async fn cooled_down(&self, account_id: AccountId, kind: ActionKind, window: Duration) -> bool {
        let wait = self.coordinator.check_cooldown(account_id, kind, window);
        if wait > 0 {
            self.notice(account_id, &format!("⏳ Try again in {}s.", wait))
                .await;
            return false;
        }
        true
    }

    async fn require_active(&self, account: &AccountRecord) -> bool {
        if !account.is_active() {
            self.notice(account.id, "🔒 Log in first with /login <email>.")
                .await;
            return false;
        }
        true
    }

    pub async fn handle(&self, account_id: AccountId, text: &str) -> Result<()> {
        let account = self.workflows.ensure_account(account_id).await?;
        if account.is_blocked {
            self.notice(account_id, "⛔ Access to this bot has been restricted.")
                .await;
            return Ok(());
        }

        let command = ChatCommand::parse(text);
        debug!("[{}] Chat command {:?}", account_id, command);
        match command {
            ChatCommand::Start => self.dashboard(&account).await?,
            ChatCommand::Help => self.reply(account_id, HELP_TEXT).await,
            ChatCommand::Login(email) => self.login(&account, &email).await?,
            ChatCommand::Code(code) => self.code(account_id, &code).await?,
            ChatCommand::Cancel => {
                if self.workflows.cancel_login(account_id).await {
                    self.notice(account_id, "✖️ Login cancelled.").await;
                } else {
                    self.notice(account_id, "ℹ️ No login in progress.").await;
                }
            }
            ChatCommand::Check => self.check(&account).await,
            ChatCommand::Collect => self.collect(&account).await,
            ChatCommand::Rewards => self.rewards(account_id).await?,
            ChatCommand::Logout => self.logout(&account).await?,
            ChatCommand::Unknown => self.notice(account_id, "🤔 Unknown command. See /help.").await,
        }
        Ok(())
    }

    async fn dashboard(&self, account: &AccountRecord) -> Result<()> {
        self.workflows.show_dashboard(account.id).await
    }

    async fn login(&self, account: &AccountRecord, email: &str) -> Result<()> {
        if email.is_empty() {
            self.notice(account.id, "Usage: /login <email>").await;
            return Ok(());
        }
        if account.is_active() && !account.is_elevated {
            self.notice(account.id, "🔒 Already logged in. Use /logout to switch email.")
                .await;
            return Ok(());
        }
        let Some(slot) = self.acquire_or_notify(account.id).await else {
            return Ok(());
        };
        if !self
            .cooled_down(account.id, ActionKind::Login, LOGIN_COOLDOWN)
            .await
        {
            return Ok(());
        }

        self.notice(account.id, "🔑 Opening the storefront...").await;
        match self.workflows.begin_login(slot, email).await? {
            LoginProgress::AwaitingOtp => {
                self.reply(
                    account.id,
                    &format!("📩 A code was sent to {}. Reply with the 5 digits.", email.trim()),
                )
                .await
            }
            LoginProgress::InvalidEmail => {
                self.notice(account.id, "❌ That does not look like an email address.")
                    .await
            }
            LoginProgress::EmailLimitReached(limit) => {
                self.reply(
                    account.id,
                    &format!("⚠️ Premium accounts can register up to {} emails.", limit),
                )
                .await
            }
            LoginProgress::Failed(reason) => {
                self.reply(account.id, &format!("❌ Login failed ({}). Try again later.", reason))
                    .await
            }
            // The workflow delivers the collection summary itself.
            LoginProgress::Completed(_) => {}
            LoginProgress::NoPendingLogin | LoginProgress::Expired => {}
        }
        Ok(())
    }

    async fn code(&self, account_id: AccountId, code: &str) -> Result<()> {
        match self.workflows.complete_login(account_id, code).await? {
            LoginProgress::NoPendingLogin => {
                self.notice(account_id, "ℹ️ No login in progress. Send /login <email>.")
                    .await
            }
            LoginProgress::Expired => {
                self.reply(account_id, "⌛ Login timed out. Send /login again.")
                    .await
            }
            LoginProgress::Failed(_) => {
                self.reply(account_id, "❌ Code rejected. Send /login <email> to try again.")
                    .await
            }
            _ => {
                self.outbox.cleanup_reactions(account_id).await?;
            }
        }
        Ok(())
    }

    async fn check(&self, account: &AccountRecord) {
        if !self.require_active(account).await {
            return;
        }
        let Some(slot) = self.acquire_or_notify(account.id).await else {
            return;
        };
        if !self
            .cooled_down(account.id, ActionKind::Check, self.check_cooldown)
            .await
        {
            return;
        }
        self.notice(account.id, "🛡️ Checking session...").await;
        if let Err(e) = self.workflows.check_session(&slot, true).await {
            error!("[{}] Session check failed: {}", account.id, e);
            self.reply(account.id, "❌ Technical error during the check.")
                .await;
        }
    }

    async fn collect(&self, account: &AccountRecord) {
        if !self.require_active(account).await {
            return;
        }
        if !account.is_elevated && account.trial_expired(now_ts()) {
            self.reply(
                account.id,
                "⌛ Your trial has ended. Contact the administrator for premium access.",
            )
            .await;
            return;
        }
        let Some(slot) = self.acquire_or_notify(account.id).await else {
            return;
        };
        if !self
            .cooled_down(account.id, ActionKind::Collect, self.collect_cooldown)
            .await
        {
            return;
        }
        self.notice(account.id, "🚀 Collecting...").await;
        if let Err(e) = self.workflows.run_collection(&slot).await {
            error!("[{}] Manual collection failed: {}", account.id, e);
            self.reply(account.id, "❌ Technical error during collection.")
                .await;
        }
    }

    async fn rewards(&self, account_id: AccountId) -> Result<()> {
        let images = self.store.reward_images().await?;
        if images.is_empty() {
            self.notice(account_id, "ℹ️ No reward artwork captured yet.")
                .await;
            return Ok(());
        }
        for reference in images {
            let image = RewardImage::from_reference(&reference);
            if let Err(e) = self
                .outbox
                .photo(account_id, &image, Some("🎁 Today's free item"), MessageCategory::Reaction)
                .await
            {
                warn!("[{}] Could not send reward artwork: {}", account_id, e);
            }
        }
        Ok(())
    }

    async fn logout(&self, account: &AccountRecord) -> Result<()> {
        if !self.require_active(account).await {
            return Ok(());
        }
        let Some(slot) = self.acquire_or_notify(account.id).await else {
            return Ok(());
        };
        self.workflows.logout(&slot).await?;
        self.outbox.cleanup_reactions(account.id).await?;
        self.reply(account.id, "✅ Logged out.").await;
        Ok(())
    }
}

pub struct TelegramInterface {
    bot: Bot,
    handler: Arc<ChatHandler>,
    outbox: Outbox,
}

impl TelegramInterface {
    pub fn new(bot: Bot, handler: Arc<ChatHandler>, outbox: Outbox) -> Self {
        Self {
            bot,
            handler,
            outbox,
        }
    }

    async fn start_bot(&self) -> Result<()> {
        let commands = vec![
            BotCommand::new("start", "Show the dashboard"),
            BotCommand::new("login", "Sign in with your storefront email"),
            BotCommand::new("cancel", "Abort a pending login"),
            BotCommand::new("check", "Verify the storefront session"),
            BotCommand::new("collect", "Claim the free items now"),
            BotCommand::new("rewards", "Show the latest reward artwork"),
            BotCommand::new("logout", "Forget the storefront session"),
            BotCommand::new("help", "Show all commands"),
        ];
        if let Err(e) = self.bot.set_my_commands(commands).await {
            error!("Failed to set telegram bot commands: {}", e);
        }

        let bot = self.bot.clone();
        let handler = self.handler.clone();
        let outbox = self.outbox.clone();
        tokio::spawn(async move {
            teloxide::repl(bot, move |msg: Message| {
                let handler = handler.clone();
                let outbox = outbox.clone();
                async move {
                    let account_id = msg.chat.id.0;
                    if let Err(e) = outbox.track_inbound(account_id, i64::from(msg.id.0)).await {
                        debug!("[{}] Could not track inbound message: {}", account_id, e);
                    }
                    let Some(text) = msg.text().map(str::to_string) else {
                        return respond(());
                    };
                    info!("[{}] Received chat message", account_id);
                    // Long browser work must not stall the update loop.
                    tokio::spawn(async move {
                        if let Err(e) = handler.handle(account_id, &text).await {
                            error!("[{}] Chat command failed: {}", account_id, e);
                        }
                    });
                    respond(())
                }
            })
            .await;
        });
        Ok(())
    }
}

#[async_trait]
impl LifecycleComponent for TelegramInterface {
    async fn on_init(&mut self) -> Result<()> {
        info!("Telegram interface initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        info!("Telegram interface starting...");
        if let Err(e) = self.start_bot().await {
            error!("Telegram bot crashed: {}", e);
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Telegram interface shutting down...");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::automation::SessionLossPolicy;
    use crate::core::coordinator::InMemoryCoordinator;
    use crate::core::store::AccountStatus;
    use crate::core::tests::fakes::{FakeBrowser, FakeSite, RecordingNotifier, test_settings};
    use crate::core::workflow::WorkflowSettings;

    #[test]
    fn parses_commands_and_codes() {
        assert_eq!(ChatCommand::parse("12345"), ChatCommand::Code("12345".into()));
        assert_eq!(ChatCommand::parse("1234"), ChatCommand::Unknown);
        assert_eq!(
            ChatCommand::parse("/login  racer@mail.com "),
            ChatCommand::Login("racer@mail.com".into())
        );
        assert_eq!(ChatCommand::parse("/login"), ChatCommand::Login(String::new()));
        assert_eq!(ChatCommand::parse("/collect@FreeClaimBot"), ChatCommand::Collect);
        assert_eq!(ChatCommand::parse("hello"), ChatCommand::Unknown);
    }

    struct Harness {
        store: Store,
        notifier: Arc<RecordingNotifier>,
        coordinator: Arc<dyn TaskCoordinator>,
        handler: ChatHandler,
        _dir: tempfile::TempDir,
    }

    fn harness(site: FakeSite) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::in_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let outbox = Outbox::new(notifier.clone(), store.clone());
        let coordinator: Arc<dyn TaskCoordinator> = Arc::new(InMemoryCoordinator::new());
        let workflows = Arc::new(AccountWorkflows::new(
            store.clone(),
            outbox.clone(),
            Arc::new(FakeBrowser::new(site)),
            WorkflowSettings {
                profiles_dir: dir.path().join("profiles"),
                session: test_settings(SessionLossPolicy::Preserve, &dir.path().join("captures")),
                trial_days: 3,
                max_elevated_emails: 3,
                login_timeout: Duration::from_secs(300),
            },
        ));
        let handler = ChatHandler::new(
            store.clone(),
            outbox,
            coordinator.clone(),
            workflows,
            &AppConfig::default(),
        );
        Harness {
            store,
            notifier,
            coordinator,
            handler,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn blocked_accounts_are_refused() {
        let h = harness(FakeSite::default());
        h.store.ensure_account(5, 3).await.unwrap();
        h.store.update_account_flags(5, Some(true), None).await.unwrap();

        h.handler.handle(5, "/collect").await.unwrap();
        let texts = h.notifier.texts_for(5);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("restricted"));
    }

    #[tokio::test]
    async fn login_then_code_activates_account() {
        let h = harness(FakeSite {
            logged_in: false,
            ..FakeSite::default()
        });
        h.handler.handle(5, "/login racer@mail.com").await.unwrap();
        assert!(h.notifier.texts_for(5).iter().any(|t| t.contains("5 digits")));

        h.handler.handle(5, "12345").await.unwrap();
        let account = h.store.get_account(5).await.unwrap().unwrap();
        assert_eq!(account.status, AccountStatus::Active);
        assert!(!h.coordinator.is_busy(5));
    }

    #[tokio::test]
    async fn collect_requires_login_and_respects_cooldown() {
        let h = harness(FakeSite::default());
        h.handler.handle(5, "/collect").await.unwrap();
        assert!(h.notifier.texts_for(5)[0].contains("Log in first"));

        h.store.activate_account(5, "racer@mail.com").await.unwrap();
        h.handler.handle(5, "/collect").await.unwrap();
        assert_eq!(h.store.attempts_for_account(5, 10).await.unwrap().len(), 1);

        h.handler.handle(5, "/collect").await.unwrap();
        assert!(h.notifier.texts_for(5).last().unwrap().contains("Try again in"));
        assert_eq!(h.store.attempts_for_account(5, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn busy_refusal_does_not_start_the_cooldown() {
        let h = harness(FakeSite::default());
        h.store.ensure_account(5, 3).await.unwrap();
        h.store.activate_account(5, "racer@mail.com").await.unwrap();

        let held = SlotGuard::acquire(&h.coordinator, 5).unwrap();
        h.handler.handle(5, "/collect").await.unwrap();
        assert!(h.notifier.texts_for(5).last().unwrap().contains("Another task"));
        drop(held);

        h.handler.handle(5, "/collect").await.unwrap();
        assert_eq!(h.store.attempts_for_account(5, 10).await.unwrap().len(), 1);
        assert!(!h.notifier.texts_for(5).iter().any(|t| t.contains("Try again in")));
    }

    #[tokio::test]
    async fn busy_account_gets_a_transient_notice() {
        let h = harness(FakeSite::default());
        h.store.ensure_account(5, 3).await.unwrap();
        h.store.activate_account(5, "racer@mail.com").await.unwrap();
        let _held = SlotGuard::acquire(&h.coordinator, 5).unwrap();

        h.handler.handle(5, "/check").await.unwrap();
        let tracked = h.store.messages_for_account(5, None, 10).await.unwrap();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].category, MessageCategory::Reaction);
        assert!(tracked[0].delete_at.is_some());
        assert!(tracked[0].text.as_deref().unwrap().contains("Another task"));
    }

    #[tokio::test]
    async fn start_replaces_history_with_dashboard() {
        let h = harness(FakeSite::default());
        h.handler.handle(5, "/help").await.unwrap();
        h.handler.handle(5, "/start").await.unwrap();

        let tracked = h.store.messages_for_account(5, None, 10).await.unwrap();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].category, MessageCategory::Dashboard);
        assert!(tracked[0].text.as_deref().unwrap().contains("Trial (3 day(s) left)"));
    }
}
