mod daemon;
mod enqueue;
mod install;
mod runtime;

use anyhow::Result;
use console::style;

use crate::core::config::AppConfig;
use crate::core::terminal::{self, GuideSection, print_error};
use crate::logging;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Processes")
        .command("bot", "Run the Telegram bot and timed loops in the foreground")
        .command("admin", "Run the admin HTTP API")
        .print();

    GuideSection::new("Daemon")
        .command("start", "Start the bot in the background")
        .command("stop", "Stop the background bot")
        .command("status", "Show whether the bot is running")
        .command("logs", "Follow the bot log")
        .print();

    GuideSection::new("Setup & Operations")
        .command("install", "Create the data dir, config and database")
        .command("enqueue", "Queue an admin command for the bot")
        .text("")
        .text("enqueue <KIND> [--target ID] [--group G] [--ttl S] [--payload P]")
        .text("KIND: BROADCAST, NOTIFY, CHECK_SESSION, CLEAR_HISTORY,")
        .text("      TRIGGER_COLLECT, PAUSE_SYSTEM, RESUME_SYSTEM")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("freeclaim").green()
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Bot { daemon: bool },
    Admin,
    Start,
    Stop,
    Status,
    Logs,
    Install,
    Enqueue,
    Help,
    Unknown(String),
}

pub(crate) fn parse_command(args: &[String]) -> Command {
    let Some(cmd) = args.get(1) else {
        return Command::Help;
    };
    match cmd.as_str() {
        "bot" | "run" => Command::Bot {
            daemon: args.iter().skip(2).any(|a| a == "--daemon"),
        },
        "admin" | "dashboard" => Command::Admin,
        "start" => Command::Start,
        "stop" => Command::Stop,
        "status" => Command::Status,
        "logs" => Command::Logs,
        "install" => Command::Install,
        "enqueue" => Command::Enqueue,
        "help" | "--help" | "-h" => Command::Help,
        other => Command::Unknown(other.to_string()),
    }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = parse_command(&args);
    let cfg = AppConfig::load()?;

    match command {
        Command::Bot { daemon } => {
            logging::init(&cfg.log_level, Some(cfg.log_file().as_path()), daemon)?;
            runtime::run_bot(cfg).await
        }
        Command::Admin => {
            logging::init(&cfg.log_level, None, false)?;
            GuideSection::new("Admin API")
                .status(
                    "Endpoint",
                    &format!(
                        "{}",
                        style(format!("http://{}:{}/api", cfg.admin_host, cfg.admin_port))
                            .underlined()
                            .cyan()
                    ),
                )
                .blank()
                .status(
                    "Press Ctrl+C to stop the API.",
                    &format!("{}", style("Ctrl+C").bold().yellow()),
                )
                .print();
            runtime::run_admin(cfg).await
        }
        Command::Start => daemon::daemon_start(&cfg).await,
        Command::Stop => daemon::daemon_stop(&cfg).await,
        Command::Status => daemon::daemon_status(&cfg).await,
        Command::Logs => daemon::follow_logs(&cfg).await,
        Command::Install => install::run_install(&cfg).await,
        Command::Enqueue => enqueue::run_enqueue(&cfg, &args).await,
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Unknown(cmd) => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &str) -> Vec<String> {
        std::iter::once("freeclaim")
            .chain(raw.split_whitespace())
            .map(String::from)
            .collect()
    }

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(parse_command(&args("")), Command::Help);
        assert_eq!(parse_command(&args("--help")), Command::Help);
    }

    #[test]
    fn bot_daemon_flag_is_detected() {
        assert_eq!(parse_command(&args("bot")), Command::Bot { daemon: false });
        assert_eq!(
            parse_command(&args("bot --daemon")),
            Command::Bot { daemon: true }
        );
    }

    #[test]
    fn process_and_daemon_commands_parse() {
        assert_eq!(parse_command(&args("admin")), Command::Admin);
        assert_eq!(parse_command(&args("start")), Command::Start);
        assert_eq!(parse_command(&args("stop")), Command::Stop);
        assert_eq!(parse_command(&args("enqueue pause")), Command::Enqueue);
        assert_eq!(
            parse_command(&args("frobnicate")),
            Command::Unknown("frobnicate".into())
        );
    }
}
