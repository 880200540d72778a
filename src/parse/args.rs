use std::path::PathBuf;

use clap::{ArgAction, Args, Parser};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "mini-supervisor",
    version,
    about = "Run one program, capture its output into rotated log files, restart it when it exits",
    override_usage = "mini-supervisor [OPTIONS] [--] <COMMAND>..."
)]
pub struct Cli {
    /// Read settings from a YAML file; options given on the command line take precedence
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub program: ProgramArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

/// Everything that describes the supervised program. Every field is optional
/// here so the YAML layer can fill what the command line leaves out.
#[derive(Debug, Clone, Default, Args)]
pub struct ProgramArgs {
    /// Name used in alerts; defaults to the basename of the command
    #[arg(long = "process_name", value_name = "NAME")]
    pub process_name: Option<String>,

    /// Put the program's stdout in this file; unset or empty discards it
    #[arg(long = "stdout_logfile", value_name = "PATH")]
    pub stdout_logfile: Option<PathBuf>,

    /// Rotate stdout_logfile once it reaches this size (KB, MB, GB suffixes; 0 = unlimited) [default: 50MB]
    #[arg(long = "stdout_logfile_maxbytes", value_name = "SIZE")]
    pub stdout_logfile_maxbytes: Option<String>,

    /// Number of rotated stdout_logfile backups to keep [default: 10]
    #[arg(long = "stdout_logfile_backups", value_name = "N")]
    pub stdout_logfile_backups: Option<usize>,

    /// Put the program's stderr in this file; unset or empty discards it
    #[arg(long = "stderr_logfile", value_name = "PATH")]
    pub stderr_logfile: Option<PathBuf>,

    /// Rotate stderr_logfile once it reaches this size (KB, MB, GB suffixes; 0 = unlimited) [default: 50MB]
    #[arg(long = "stderr_logfile_maxbytes", value_name = "SIZE")]
    pub stderr_logfile_maxbytes: Option<String>,

    /// Number of rotated stderr_logfile backups to keep [default: 10]
    #[arg(long = "stderr_logfile_backups", value_name = "N")]
    pub stderr_logfile_backups: Option<usize>,

    /// Restart the program after it exits: true, false or unexpected [default: unexpected]
    #[arg(long, value_name = "MODE")]
    pub autorestart: Option<String>,

    /// Expected exit codes, comma separated or repeated [default: 0]
    #[arg(long, value_name = "CODE", value_delimiter = ',', allow_negative_numbers = true)]
    pub exitcodes: Option<Vec<i32>>,

    /// Give up after this many consecutive exits within startsecs [default: 3]
    #[arg(long, value_name = "N")]
    pub startretries: Option<u32>,

    /// Seconds the program must stay up for a start to count as successful [default: 1]
    #[arg(long, value_name = "SECS")]
    pub startsecs: Option<u64>,

    /// Send an e-mail when the program exits unexpectedly
    #[arg(long = "mail_alert")]
    pub mail_alert: bool,

    /// SMTP server as host[:port]
    #[arg(long = "mail_server", value_name = "HOST:PORT")]
    pub mail_server: Option<String>,

    #[arg(long = "mail_username", value_name = "USER")]
    pub mail_username: Option<String>,

    #[arg(long = "mail_password", value_name = "PASSWORD")]
    pub mail_password: Option<String>,

    /// Sender address; defaults to mail_username
    #[arg(long = "mail_sender", value_name = "ADDRESS")]
    pub mail_sender: Option<String>,

    /// Receiver addresses, comma separated or repeated
    #[arg(long = "mail_receivers", value_name = "ADDRESS", value_delimiter = ',')]
    pub mail_receivers: Option<Vec<String>>,

    /// Subject line; "$program_name" is replaced by the process name [default: "$program_name unexpected exit"]
    #[arg(long = "mail_subject", value_name = "SUBJECT")]
    pub mail_subject: Option<String>,

    /// The program to run, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 1.., value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct LoggingArgs {
    /// More supervisor diagnostics; repeat for more
    #[arg(long, short, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only report warnings and errors
    #[arg(long, short, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write supervisor diagnostics to a daily-rotated file in this directory instead of stderr
    #[arg(long = "log_dir", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_trailing() {
        let cli = Cli::try_parse_from([
            "mini-supervisor",
            "--stdout_logfile",
            "out.log",
            "--exitcodes",
            "0,2",
            "--exitcodes",
            "3",
            "my-server",
            "--port",
            "8080",
        ])
        .unwrap();

        assert_eq!(cli.program.stdout_logfile, Some(PathBuf::from("out.log")));
        assert_eq!(cli.program.exitcodes, Some(vec![0, 2, 3]));
        assert_eq!(cli.program.command, vec!["my-server", "--port", "8080"]);
    }

    #[test]
    fn flags_default_to_unset() {
        let cli = Cli::try_parse_from(["mini-supervisor", "--", "sleep", "1"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.program.autorestart.is_none());
        assert!(!cli.program.mail_alert);
        assert_eq!(cli.logging.verbose, 0);
        assert_eq!(cli.program.command, vec!["sleep", "1"]);
    }

    #[test]
    fn receivers_split_on_commas() {
        let cli = Cli::try_parse_from([
            "mini-supervisor",
            "--mail_alert",
            "--mail_receivers",
            "a@example.com,b@example.com",
            "true",
        ])
        .unwrap();
        assert!(cli.program.mail_alert);
        assert_eq!(
            cli.program.mail_receivers,
            Some(vec!["a@example.com".to_string(), "b@example.com".to_string()])
        );
    }
}
