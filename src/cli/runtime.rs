use anyhow::{Result, bail};
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::core::browser::WebDriverBrowser;
use crate::core::config::AppConfig;
use crate::core::coordinator::{InMemoryCoordinator, TaskCoordinator};
use crate::core::lifecycle::{LifecycleManager, TickFuture};
use crate::core::notify::Outbox;
use crate::core::reaper::MessageReaper;
use crate::core::relay::CommandRelay;
use crate::core::scheduler::CollectionScheduler;
use crate::core::store::Store;
use crate::core::workflow::{AccountWorkflows, WorkflowSettings};
use crate::interfaces::telegram::{ChatHandler, TelegramInterface, TelegramNotifier};
use crate::interfaces::web::AdminServer;

/// Primary process: chat bot plus the three timed loops.
pub async fn run_bot(cfg: AppConfig) -> Result<()> {
    if cfg.telegram_token.trim().is_empty() {
        bail!(
            "telegram_token is not set. Add it to {} or export TELEGRAM_BOT_TOKEN.",
            cfg.data_dir.join(crate::core::config::CONFIG_FILE).display()
        );
    }

    let store = Store::open(cfg.db_file()).await?;
    let bot = Bot::new(cfg.telegram_token.trim());
    let outbox = Outbox::new(Arc::new(TelegramNotifier::new(bot.clone())), store.clone());
    let coordinator: Arc<dyn TaskCoordinator> = Arc::new(InMemoryCoordinator::new());
    let browser = Arc::new(WebDriverBrowser::new(
        &cfg.webdriver_url,
        cfg.headless,
        Duration::from_millis(cfg.automation.navigation_timeout_ms),
    ));
    let workflows = Arc::new(AccountWorkflows::new(
        store.clone(),
        outbox.clone(),
        browser,
        WorkflowSettings::from_config(&cfg),
    ));

    let scheduler = Arc::new(CollectionScheduler::new(
        store.clone(),
        coordinator.clone(),
        workflows.clone(),
        cfg.collection_interval(),
        cfg.schedule_scope(),
    ));
    let relay = Arc::new(CommandRelay::new(
        store.clone(),
        outbox.clone(),
        coordinator.clone(),
        workflows.clone(),
    ));
    let reaper = Arc::new(MessageReaper::new(store.clone(), outbox.clone()));

    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle
        .every(
            "collection-scheduler",
            Duration::from_secs(cfg.scheduler_period_secs),
            move || -> TickFuture {
                let scheduler = scheduler.clone();
                Box::pin(async move {
                    match scheduler.tick().await {
                        Ok(run) if !run.launched.is_empty() => {
                            info!("Scheduled collection for {} account(s)", run.launched.len())
                        }
                        Ok(_) => {}
                        Err(e) => error!("Scheduler tick failed: {}", e),
                    }
                })
            },
        )
        .await?;
    lifecycle
        .every(
            "command-relay",
            Duration::from_secs(cfg.relay_period_secs),
            move || -> TickFuture {
                let relay = relay.clone();
                Box::pin(async move {
                    if let Err(e) = relay.tick().await {
                        error!("Relay tick failed: {}", e);
                    }
                })
            },
        )
        .await?;
    let login_sweeper = workflows.clone();
    lifecycle
        .every(
            "message-reaper",
            Duration::from_secs(cfg.reaper_period_secs),
            move || -> TickFuture {
                let reaper = reaper.clone();
                let workflows = login_sweeper.clone();
                Box::pin(async move {
                    if let Err(e) = reaper.tick().await {
                        error!("Reaper tick failed: {}", e);
                    }
                    workflows.expire_stale_logins().await;
                })
            },
        )
        .await?;

    let handler = Arc::new(ChatHandler::new(
        store.clone(),
        outbox.clone(),
        coordinator,
        workflows,
        &cfg,
    ));
    lifecycle.attach(Arc::new(Mutex::new(TelegramInterface::new(
        bot, handler, outbox,
    ))));

    lifecycle.start().await?;
    info!("freeclaim bot is running");

    tokio::signal::ctrl_c().await?;
    if let Err(e) = lifecycle.shutdown().await {
        warn!("Shutdown error: {}", e);
    }
    Ok(())
}

/// Admin process: serves the HTTP API against the shared store.
pub async fn run_admin(cfg: AppConfig) -> Result<()> {
    let store = Store::open(cfg.db_file()).await?;
    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle.attach(Arc::new(Mutex::new(AdminServer::new(
        store,
        cfg.admin_host.clone(),
        cfg.admin_port,
        cfg.admin_token.clone(),
    ))));
    lifecycle.start().await?;

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await
}
