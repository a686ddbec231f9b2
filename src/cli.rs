use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Cron,
    Systemd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Version,
    Run { repos: Vec<String>, dry_run: bool },
    Installations,
    Schedule {
        kind: ScheduleKind,
        binary: Option<PathBuf>,
        workdir: Option<PathBuf>,
        log_file: Option<PathBuf>,
    },
}

#[derive(Debug, Clone)]
pub struct CliOptions {
    pub log_level: Option<String>,
    pub env_file: Option<PathBuf>,
    pub invocation: Invocation,
}

pub fn build_cli() -> Command {
    Command::new("issue-triage-bot")
        .about("Hand open GitHub issues to an AI coding assistant and open fix pull requests")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .num_args(1)
                .global(true)
                .help("Override RUST_LOG / LOG_LEVEL (e.g., info, debug)"),
        )
        .arg(
            Arg::new("env-file")
                .long("env-file")
                .num_args(1)
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Load variables from this file instead of ./.env"),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .help("Print version and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("run")
                .about("Process unprocessed issues once (default)")
                .arg(
                    Arg::new("repo")
                        .long("repo")
                        .action(ArgAction::Append)
                        .help("owner/name to process instead of GITHUB_REPOS (repeatable)"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("List qualifying issues without changing anything"),
                ),
        )
        .subcommand(
            Command::new("installations")
                .about("List GitHub App installations to find GITHUB_APP_INSTALLATION_ID"),
        )
        .subcommand(
            Command::new("schedule")
                .about("Print a cron line or systemd units that run the bot hourly")
                .arg(
                    Arg::new("kind")
                        .required(true)
                        .value_parser(["cron", "systemd"]),
                )
                .arg(
                    Arg::new("binary")
                        .long("binary")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("Path of the bot executable (default: this executable)"),
                )
                .arg(
                    Arg::new("workdir")
                        .long("workdir")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("Directory holding .env (default: current directory)"),
                )
                .arg(
                    Arg::new("log-file")
                        .long("log-file")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("Cron output file (default: <workdir>/cron.log)"),
                ),
        )
}

pub fn parse_matches(matches: &ArgMatches) -> CliOptions {
    let log_level = matches.get_one::<String>("log-level").cloned();
    let env_file = matches.get_one::<PathBuf>("env-file").cloned();
    let invocation = if matches.get_flag("version") {
        Invocation::Version
    } else {
        match matches.subcommand() {
            Some(("installations", _)) => Invocation::Installations,
            Some(("schedule", sub)) => Invocation::Schedule {
                kind: match sub.get_one::<String>("kind").map(String::as_str) {
                    Some("systemd") => ScheduleKind::Systemd,
                    _ => ScheduleKind::Cron,
                },
                binary: sub.get_one::<PathBuf>("binary").cloned(),
                workdir: sub.get_one::<PathBuf>("workdir").cloned(),
                log_file: sub.get_one::<PathBuf>("log-file").cloned(),
            },
            Some(("run", sub)) => Invocation::Run {
                repos: sub
                    .get_many::<String>("repo")
                    .map(|v| v.cloned().collect())
                    .unwrap_or_default(),
                dry_run: sub.get_flag("dry-run"),
            },
            _ => Invocation::Run {
                repos: Vec::new(),
                dry_run: false,
            },
        }
    };
    CliOptions {
        log_level,
        env_file,
        invocation,
    }
}

pub fn init_logging(level: Option<&str>) {
    // Explicit flag wins, then RUST_LOG, then LOG_LEVEL, else info.
    let fallback = std::env::var("LOG_LEVEL")
        .map(|l| l.to_ascii_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(fallback));
    if let Some(lvl) = level {
        builder.parse_filters(lvl);
    }
    let _ = builder.try_init();
}
