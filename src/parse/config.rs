use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use super::args::ProgramArgs;
use super::size::parse_size;
use crate::error::{Error, Result};

const DEFAULT_MAXBYTES: &str = "50MB";
const DEFAULT_BACKUPS: usize = 10;
const DEFAULT_STARTRETRIES: u32 = 3;
const DEFAULT_STARTSECS: u64 = 1;
const DEFAULT_SMTP_PORT: u16 = 25;
pub const DEFAULT_SUBJECT: &str = "$program_name unexpected exit";

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::One(one) => vec![one],
            OneOrMany::Many(many) => many,
        }
    }
}

/// A size in the YAML file may be written as a plain integer or as "50MB".
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRestart {
    Flag(bool),
    Named(String),
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "RawRestart")]
pub enum RestartPolicy {
    Always,
    Never,
    Unexpected,
}

impl FromStr for RestartPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "true" | "always" => Ok(RestartPolicy::Always),
            "false" | "never" => Ok(RestartPolicy::Never),
            "unexpected" => Ok(RestartPolicy::Unexpected),
            other => Err(Error::BadConfig(format!(
                "autorestart must be one of true, false or unexpected, got {other:?}"
            ))),
        }
    }
}

impl TryFrom<RawRestart> for RestartPolicy {
    type Error = Error;

    fn try_from(raw: RawRestart) -> Result<Self> {
        match raw {
            RawRestart::Flag(true) => Ok(RestartPolicy::Always),
            RawRestart::Flag(false) => Ok(RestartPolicy::Never),
            RawRestart::Named(name) => name.parse(),
        }
    }
}

/// Keys mirror the command line flags.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub command: Option<OneOrMany<String>>,
    pub process_name: Option<String>,
    pub stdout_logfile: Option<PathBuf>,
    pub stdout_logfile_maxbytes: Option<SizeValue>,
    pub stdout_logfile_backups: Option<usize>,
    pub stderr_logfile: Option<PathBuf>,
    pub stderr_logfile_maxbytes: Option<SizeValue>,
    pub stderr_logfile_backups: Option<usize>,
    pub autorestart: Option<RestartPolicy>,
    pub exitcodes: Option<OneOrMany<i32>>,
    pub startretries: Option<u32>,
    pub startsecs: Option<u64>,
    pub mail_alert: Option<bool>,
    pub mail_server: Option<String>,
    pub mail_username: Option<String>,
    pub mail_password: Option<String>,
    pub mail_sender: Option<String>,
    pub mail_receivers: Option<OneOrMany<String>>,
    pub mail_subject: Option<String>,
}

/// One output stream's log destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub backups: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartSettings {
    pub autorestart: RestartPolicy,
    pub exitcodes: Vec<i32>,
    pub startsecs: Duration,
    pub startretries: u32,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            autorestart: RestartPolicy::Unexpected,
            exitcodes: vec![0],
            startsecs: Duration::from_secs(DEFAULT_STARTSECS),
            startretries: DEFAULT_STARTRETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sender: String,
    pub receivers: Vec<String>,
    pub subject: String,
}

/// The fully resolved description of the supervised program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramConfig {
    pub process_name: String,
    pub cmd: String,
    pub args: Vec<String>,
    pub stdout: Option<LogConfig>,
    pub stderr: Option<LogConfig>,
    pub restart: RestartSettings,
    /// Present only when alerting is switched on.
    pub mail: Option<MailConfig>,
}

/*
    @@@
    @parser();
    . Reads the YAML file into a String; any I/O error is reported as a configuration error naming the file.
    . Hands the raw text to serde_yaml which maps it into FileConfig, unknown keys are rejected.
*/
pub fn parser(path: &Path) -> Result<FileConfig> {
    let yaml_file = fs::read_to_string(path)
        .map_err(|e| Error::BadConfig(format!("{}: {e}", path.display())))?;
    serde_yaml::from_str(&yaml_file)
        .map_err(|e| Error::BadConfig(format!("{}: {e}", path.display())))
}

impl ProgramConfig {
    /*
        @@@
        @resolve();
        . Merges the command line over the file layer over the built-in defaults.
        . Validates the result: a command must exist, sizes must parse, the two log paths must differ,
          and alerting needs a server and at least one receiver.
    */
    pub fn resolve(cli: ProgramArgs, file: FileConfig) -> Result<Self> {
        let mut command = if cli.command.is_empty() {
            file.command.map(Vec::from).unwrap_or_default()
        } else {
            cli.command
        };
        if command.is_empty() || command[0].is_empty() {
            return Err(Error::BadConfig("no program command specified".into()));
        }
        let cmd = command.remove(0);

        let process_name = cli
            .process_name
            .or(file.process_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| basename(&cmd));

        let stdout = log_config(
            "stdout",
            cli.stdout_logfile.or(file.stdout_logfile),
            cli.stdout_logfile_maxbytes
                .map(SizeValue::Text)
                .or(file.stdout_logfile_maxbytes),
            cli.stdout_logfile_backups.or(file.stdout_logfile_backups),
        )?;
        let stderr = log_config(
            "stderr",
            cli.stderr_logfile.or(file.stderr_logfile),
            cli.stderr_logfile_maxbytes
                .map(SizeValue::Text)
                .or(file.stderr_logfile_maxbytes),
            cli.stderr_logfile_backups.or(file.stderr_logfile_backups),
        )?;
        if let (Some(out), Some(err)) = (&stdout, &stderr) {
            if out.path == err.path {
                return Err(Error::BadConfig(format!(
                    "stdout_logfile and stderr_logfile are both {}",
                    out.path.display()
                )));
            }
        }

        let defaults = RestartSettings::default();
        let autorestart = match cli.autorestart {
            Some(mode) => mode.parse()?,
            None => file.autorestart.unwrap_or(defaults.autorestart),
        };
        let restart = RestartSettings {
            autorestart,
            exitcodes: cli
                .exitcodes
                .or_else(|| file.exitcodes.map(Vec::from))
                .unwrap_or(defaults.exitcodes),
            startsecs: cli
                .startsecs
                .or(file.startsecs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.startsecs),
            startretries: cli
                .startretries
                .or(file.startretries)
                .unwrap_or(defaults.startretries),
        };

        let mail = if cli.mail_alert || file.mail_alert.unwrap_or(false) {
            let server = cli
                .mail_server
                .or(file.mail_server)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| Error::BadConfig("mail_alert requires mail_server".into()))?;
            let (host, port) = split_server(&server)?;
            let receivers: Vec<String> = cli
                .mail_receivers
                .or_else(|| file.mail_receivers.map(Vec::from))
                .unwrap_or_default()
                .into_iter()
                .filter(|r| !r.is_empty())
                .collect();
            if receivers.is_empty() {
                return Err(Error::BadConfig(
                    "mail_alert requires at least one mail_receivers address".into(),
                ));
            }
            let username = cli.mail_username.or(file.mail_username).filter(|s| !s.is_empty());
            let sender = cli
                .mail_sender
                .or(file.mail_sender)
                .filter(|s| !s.is_empty())
                .or_else(|| username.clone())
                .ok_or_else(|| {
                    Error::BadConfig("mail_alert requires mail_sender or mail_username".into())
                })?;
            Some(MailConfig {
                host,
                port,
                username,
                password: cli.mail_password.or(file.mail_password),
                sender,
                receivers,
                subject: cli
                    .mail_subject
                    .or(file.mail_subject)
                    .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            })
        } else {
            None
        };

        Ok(ProgramConfig {
            process_name,
            cmd,
            args: command,
            stdout,
            stderr,
            restart,
            mail,
        })
    }
}

fn log_config(
    stream: &str,
    path: Option<PathBuf>,
    maxbytes: Option<SizeValue>,
    backups: Option<usize>,
) -> Result<Option<LogConfig>> {
    let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(None);
    };
    let max_bytes = match maxbytes {
        Some(SizeValue::Bytes(n)) if n <= i64::MAX as u64 => Ok(n),
        Some(SizeValue::Bytes(n)) => Err(Error::BadSize(n.to_string())),
        Some(SizeValue::Text(text)) => parse_size(&text),
        None => parse_size(DEFAULT_MAXBYTES),
    }
    .map_err(|e| Error::BadConfig(format!("{stream}_logfile_maxbytes: {e}")))?;
    Ok(Some(LogConfig {
        path,
        max_bytes,
        backups: backups.unwrap_or(DEFAULT_BACKUPS),
    }))
}

fn split_server(server: &str) -> Result<(String, u16)> {
    match server.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| Error::BadConfig(format!("mail_server has an invalid port: {server}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((server.to_string(), DEFAULT_SMTP_PORT)),
    }
}

fn basename(cmd: &str) -> String {
    Path::new(cmd)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| cmd.to_string())
}
