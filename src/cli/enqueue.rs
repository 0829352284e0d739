use anyhow::{Context, Result, anyhow, bail};
use console::style;

use crate::core::config::AppConfig;
use crate::core::store::{CommandKind, NewCommand, Store};
use crate::core::terminal::print_success;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EnqueueArgs {
    pub kind: CommandKind,
    pub command: NewCommand,
}

fn parse_kind(raw: &str) -> Result<CommandKind> {
    let normalized = raw.trim().to_ascii_uppercase().replace('-', "_");
    let normalized = match normalized.as_str() {
        "PAUSE" => "PAUSE_SYSTEM",
        "RESUME" => "RESUME_SYSTEM",
        "COLLECT" => "TRIGGER_COLLECT",
        "CHECK" => "CHECK_SESSION",
        other => other,
    };
    CommandKind::from_str_opt(normalized).ok_or_else(|| anyhow!("unknown command kind '{}'", raw))
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} needs a value", flag))
}

/// `enqueue <KIND> [--target ID] [--group G] [--ttl S] [--payload P]`
pub(crate) fn parse_enqueue_args(args: &[String], start: usize) -> Result<EnqueueArgs> {
    let raw_kind = args
        .get(start)
        .ok_or_else(|| anyhow!("missing command kind"))?;
    let kind = parse_kind(raw_kind)?;

    let mut command = NewCommand::default();
    let mut i = start + 1;
    while i < args.len() {
        match args[i].as_str() {
            "--target" | "-t" => {
                let value = flag_value(args, i, "--target")?;
                command.target_id = Some(value.parse().context("--target must be a number")?);
                i += 2;
            }
            "--group" | "-g" => {
                command.target_group = Some(flag_value(args, i, "--group")?.to_string());
                i += 2;
            }
            "--ttl" => {
                let value = flag_value(args, i, "--ttl")?;
                command.ttl_seconds = Some(value.parse().context("--ttl must be seconds")?);
                i += 2;
            }
            "--payload" | "-p" => {
                command.payload = flag_value(args, i, "--payload")?.to_string();
                i += 2;
            }
            other => bail!("unexpected argument '{}'", other),
        }
    }

    let needs_target = matches!(
        kind,
        CommandKind::CheckSession | CommandKind::ClearHistory | CommandKind::TriggerCollect
    );
    if needs_target && command.target_id.is_none() && command.payload.trim().is_empty() {
        bail!("{} needs --target <account id>", kind);
    }
    if kind == CommandKind::Broadcast && command.payload.trim().is_empty() {
        bail!("BROADCAST needs --payload <text>");
    }
    Ok(EnqueueArgs { kind, command })
}

pub async fn run_enqueue(cfg: &AppConfig, args: &[String]) -> Result<()> {
    let parsed = parse_enqueue_args(args, 2)?;
    let store = Store::open(cfg.db_file()).await?;
    let id = store.enqueue_command(parsed.kind, &parsed.command).await?;
    print_success(&format!(
        "Queued {} as command #{}",
        style(parsed.kind).bold(),
        id
    ));
    Ok(())
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
    fn parses_targeted_command_with_aliases() {
        let parsed = parse_enqueue_args(&args("enqueue collect --target 42"), 2).unwrap();
        assert_eq!(parsed.kind, CommandKind::TriggerCollect);
        assert_eq!(parsed.command.target_id, Some(42));
    }

    #[test]
    fn parses_broadcast_options() {
        let parsed = parse_enqueue_args(
            &args("enqueue BROADCAST --group premium --ttl 600 --payload hello"),
            2,
        )
        .unwrap();
        assert_eq!(parsed.kind, CommandKind::Broadcast);
        assert_eq!(parsed.command.target_group.as_deref(), Some("premium"));
        assert_eq!(parsed.command.ttl_seconds, Some(600));
        assert_eq!(parsed.command.payload, "hello");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_enqueue_args(&args("enqueue"), 2).is_err());
        assert!(parse_enqueue_args(&args("enqueue REBOOT"), 2).is_err());
        assert!(parse_enqueue_args(&args("enqueue check-session"), 2).is_err());
        assert!(parse_enqueue_args(&args("enqueue check --target abc"), 2).is_err());
        assert!(parse_enqueue_args(&args("enqueue broadcast"), 2).is_err());
        assert!(parse_enqueue_args(&args("enqueue pause --bogus"), 2).is_err());
    }

    #[test]
    fn pause_needs_no_arguments() {
        let parsed = parse_enqueue_args(&args("enqueue pause"), 2).unwrap();
        assert_eq!(parsed.kind, CommandKind::PauseSystem);
        assert_eq!(parsed.command, NewCommand::default());
    }
}
