use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "issue-triage-bot";

/// Where the scheduled job lives and what it runs.
#[derive(Debug, Clone)]
pub struct ScheduleTarget {
    pub binary: PathBuf,
    pub workdir: PathBuf,
    pub log_file: PathBuf,
}

impl ScheduleTarget {
    pub fn new(binary: PathBuf, workdir: PathBuf, log_file: Option<PathBuf>) -> Self {
        let log_file = log_file.unwrap_or_else(|| workdir.join("cron.log"));
        Self {
            binary,
            workdir,
            log_file,
        }
    }
}

fn quoted(p: &Path) -> String {
    let s = p.display().to_string();
    if s.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", s.replace('\'', r"'\''"))
    } else {
        s
    }
}

/// Crontab entry running the bot at the top of every hour.
pub fn cron_line(t: &ScheduleTarget) -> String {
    format!(
        "0 * * * * cd {} && {} run >> {} 2>&1",
        quoted(&t.workdir),
        quoted(&t.binary),
        quoted(&t.log_file)
    )
}

/// A systemd unit file, named by `file_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFile {
    pub file_name: String,
    pub contents: String,
}

/// Oneshot service plus an hourly timer. `.env` in the workdir supplies configuration.
pub fn systemd_units(t: &ScheduleTarget) -> [UnitFile; 2] {
    let service = format!(
        "[Unit]\n\
         Description=Process new GitHub issues with issue-triage-bot\n\
         After=network-online.target\n\
         Wants=network-online.target\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         WorkingDirectory={workdir}\n\
         EnvironmentFile=-{workdir}/.env\n\
         ExecStart={binary} run\n",
        workdir = t.workdir.display(),
        binary = t.binary.display(),
    );
    let timer = format!(
        "[Unit]\n\
         Description=Run {name} hourly\n\
         \n\
         [Timer]\n\
         OnCalendar=hourly\n\
         Persistent=true\n\
         Unit={name}.service\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n",
        name = SERVICE_NAME,
    );
    [
        UnitFile {
            file_name: format!("{SERVICE_NAME}.service"),
            contents: service,
        },
        UnitFile {
            file_name: format!("{SERVICE_NAME}.timer"),
            contents: timer,
        },
    ]
}
