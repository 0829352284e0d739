use anyhow::Result;
use console::style;

use crate::core::config::{AppConfig, CONFIG_FILE};
use crate::core::store::Store;
use crate::core::terminal::{self, print_info, print_success};
use crate::platform::{NativePlatform, Platform};

/// Non-interactive first-run setup: directory scaffold, default config and
/// database schema. Re-running it keeps an existing config.
pub async fn run_install(cfg: &AppConfig) -> Result<()> {
    terminal::print_banner();
    println!(
        "  {}\n",
        style("Setting up the freeclaim data directory...").bold()
    );

    tokio::fs::create_dir_all(&cfg.data_dir).await?;
    tokio::fs::create_dir_all(cfg.run_dir()).await?;
    tokio::fs::create_dir_all(cfg.profiles_dir()).await?;
    NativePlatform::restrict_dir_permissions(&cfg.data_dir);
    NativePlatform::restrict_dir_permissions(&cfg.profiles_dir());

    let config_path = cfg.data_dir.join(CONFIG_FILE);
    if config_path.exists() {
        print_info(&format!("Keeping existing {}", config_path.display()));
    } else {
        tokio::fs::write(&config_path, AppConfig::default().to_toml()?).await?;
        NativePlatform::restrict_file_permissions(&config_path);
        print_success(&format!("Wrote {}", config_path.display()));
    }

    Store::open(cfg.db_file()).await?;
    print_success("Installation complete!");
    println!(
        "\n  Set {} in {} (or export TELEGRAM_BOT_TOKEN), then run {}.\n",
        style("telegram_token").bold(),
        style(config_path.display()).dim(),
        style("freeclaim start").cyan().bold()
    );
    Ok(())
}
