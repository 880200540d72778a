pub mod args;
pub mod config;
pub mod size;

pub use args::{Cli, LoggingArgs, ProgramArgs};
pub use config::{
    parser, FileConfig, LogConfig, MailConfig, OneOrMany, ProgramConfig, RestartPolicy,
    RestartSettings,
};
pub use size::{format_size, parse_size, UNLIMITED};
