use anyhow::Result;
use console::style;

use crate::core::config::AppConfig;
use crate::core::terminal::{GuideSection, print_error, print_info, print_warn};
use crate::platform::{NativePlatform, Platform};

pub async fn daemon_start(cfg: &AppConfig) -> Result<()> {
    let run_dir = cfg.run_dir();
    let pid_file = cfg.pid_file();
    std::fs::create_dir_all(&run_dir)?;
    NativePlatform::restrict_dir_permissions(&run_dir);
    if pid_file.exists() && std::fs::read_to_string(&pid_file).is_ok() {
        print_warn("Bot is already running. Use 'freeclaim stop' first.");
        return Ok(());
    }

    // The bot tees its own log lines into the file; stderr catches panics.
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(cfg.log_file())?;

    let exe = std::env::current_exe()?;
    let child = std::process::Command::new(exe)
        .arg("bot")
        .arg("--daemon")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(log_file)
        .spawn()?;

    std::fs::write(&pid_file, child.id().to_string())?;

    GuideSection::new("Bot Started")
        .status(
            "Status",
            &format!(
                "{} (PID {})",
                style("RUNNING").green().bold(),
                style(child.id()).dim()
            ),
        )
        .status("Log", &cfg.log_file().display().to_string())
        .blank()
        .text(&format!(
            "Run {} to follow it.",
            style("freeclaim logs").cyan().bold()
        ))
        .print();

    Ok(())
}

pub async fn daemon_stop(cfg: &AppConfig) -> Result<()> {
    let pid_file = cfg.pid_file();
    let mut stopped = false;
    if pid_file.exists() {
        if let Ok(pid_str) = std::fs::read_to_string(&pid_file) {
            let pid = pid_str.trim();
            if !pid.is_empty() {
                let _ = NativePlatform::kill_process(pid);
                GuideSection::new("Bot Stopped")
                    .status(
                        "Status",
                        &format!(
                            "{} (was PID {})",
                            style("STOPPED").red().bold(),
                            style(pid).dim()
                        ),
                    )
                    .print();
                stopped = true;
            }
        }
        std::fs::remove_file(&pid_file).ok();
    }

    if !stopped {
        print_info("Bot is not currently running.");
    }
    Ok(())
}

pub async fn daemon_status(cfg: &AppConfig) -> Result<()> {
    let pid_file = cfg.pid_file();
    if pid_file.exists() {
        let pid_str = std::fs::read_to_string(&pid_file)?;
        GuideSection::new("Bot Status")
            .status(
                "Bot",
                &format!(
                    "{} (PID {})",
                    style("RUNNING").green().bold(),
                    style(pid_str.trim()).dim()
                ),
            )
            .status("Data dir", &cfg.data_dir.display().to_string())
            .print();
    } else {
        GuideSection::new("Bot Status")
            .status("Bot", &style("STOPPED").red().bold().to_string())
            .blank()
            .text(&format!(
                "Run {} to start it.",
                style("freeclaim start").cyan().bold()
            ))
            .print();
    }
    Ok(())
}

pub async fn follow_logs(cfg: &AppConfig) -> Result<()> {
    let log_file = cfg.log_file();
    if !log_file.exists() {
        print_error(&format!(
            "Log file not found at {}",
            style(log_file.display()).dim()
        ));
        return Ok(());
    }
    if !cfg.pid_file().exists() {
        print_warn("Bot is not running; showing the last lines only.");
    }
    GuideSection::new("Live Logs")
        .text(&format!(
            "Following {} - press {} to stop.",
            style("freeclaim.log").cyan(),
            style("Ctrl+C").bold().yellow()
        ))
        .print();
    let mut child = NativePlatform::tail_file(&log_file)?;
    let _ = child.wait()?;
    Ok(())
}
