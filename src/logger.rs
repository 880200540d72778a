use anyhow::Context;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::SubscriberBuilder;

use crate::parse::LoggingArgs;

/*
    @@@
    @logs_tracing();
    . Sends supervisor diagnostics to stderr, or to a daily-rotating mini-supervisor.<date>.log in --log_dir.
    . Either way the writer is non-blocking; the returned guard must live until exit so the tail is flushed.
    . The level is INFO by default, raised by -v and lowered to WARN by -q.
*/
pub fn logs_tracing(args: &LoggingArgs) -> anyhow::Result<WorkerGuard> {
    let (non_blocking, guard) = match &args.log_dir {
        Some(dir) => {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("mini-supervisor")
                .filename_suffix("log")
                .build(dir)
                .with_context(|| format!("cannot write logs to {}", dir.display()))?;
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = SubscriberBuilder::default()
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_writer(non_blocking)
        .with_max_level(level(args))
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set global subscriber")?;
    Ok(guard)
}

pub fn level(args: &LoggingArgs) -> Level {
    if args.quiet {
        return Level::WARN;
    }
    match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
