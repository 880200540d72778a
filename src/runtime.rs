use crate::alert::AlertDispatcher;
use crate::error::{Error, Result};
use crate::parse::{ProgramConfig, RestartPolicy};
use crate::pump::spawn_stoppable_pump;
use crate::sink::RotatingSink;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::future::{join_all, BoxFuture};
use std::future::Future;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long to wait for the log pumps to hit end of stream once the child is gone.
pub const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a terminating supervisor waits for in-flight alerts.
const ALERT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub type ChildStream = Box<dyn AsyncRead + Send + Unpin>;

/// What a spawner hands back: the child's output streams and a future that
/// resolves to its exit code.
pub struct ChildHandle {
    pub pid: Option<u32>,
    pub stdout: Option<ChildStream>,
    pub stderr: Option<ChildStream>,
    exit: BoxFuture<'static, io::Result<i32>>,
}

impl ChildHandle {
    pub fn new<F>(pid: Option<u32>, exit: F) -> Self
    where
        F: Future<Output = io::Result<i32>> + Send + 'static,
    {
        Self {
            pid,
            stdout: None,
            stderr: None,
            exit: Box::pin(exit),
        }
    }

    pub fn with_stdout(mut self, stream: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stdout = Some(Box::new(stream));
        self
    }

    pub fn with_stderr(mut self, stream: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.stderr = Some(Box::new(stream));
        self
    }

    pub async fn wait(self) -> io::Result<i32> {
        self.exit.await
    }
}

#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, cfg: &ProgramConfig) -> io::Result<ChildHandle>;
}

/// Launches the configured command as an OS process.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSpawner;

#[async_trait]
impl ProcessSpawner for CommandSpawner {
    async fn spawn(&self, cfg: &ProgramConfig) -> io::Result<ChildHandle> {
        let piped = |enabled: bool| if enabled { Stdio::piped() } else { Stdio::null() };
        let mut child = Command::new(&cfg.cmd)
            .args(&cfg.args)
            .stdin(Stdio::null())
            .stdout(piped(cfg.stdout.is_some()))
            .stderr(piped(cfg.stderr.is_some()))
            .spawn()?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut handle = ChildHandle::new(pid, async move { child.wait().await.map(exit_code) });
        if let Some(out) = stdout {
            handle = handle.with_stdout(out);
        }
        if let Some(err) = stderr {
            handle = handle.with_stderr(err);
        }
        Ok(handle)
    }
}

/// Exit status as a single integer; death by signal N becomes 128 + N.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

/// An exit is unexpected when its code is not in `exitcodes`; an empty set means `{0}`.
pub fn is_unexpected(code: i32, exitcodes: &[i32]) -> bool {
    if exitcodes.is_empty() {
        code != 0
    } else {
        !exitcodes.contains(&code)
    }
}

/// Whether the policy wants another start, before the retry budget is considered.
pub fn should_restart(code: i32, policy: RestartPolicy, exitcodes: &[i32]) -> bool {
    match policy {
        RestartPolicy::Always => true,
        RestartPolicy::Never => false,
        RestartPolicy::Unexpected => is_unexpected(code, exitcodes),
    }
}

/// One child termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRecord {
    pub exit_code: i32,
    pub unexpected: bool,
    pub start_time: DateTime<Local>,
    pub exit_time: DateTime<Local>,
    /// Monotonic lifetime, used for the grace-period decision.
    pub lifetime: Duration,
    /// Consecutive short-lived exits counted before this one.
    pub retry: u32,
    pub restart: bool,
}

/// State shared with the signal forwarder.
#[derive(Debug, Default)]
pub struct SupervisorState {
    pid: AtomicU32,
    stopping: AtomicBool,
}

pub type SharedState = Arc<SupervisorState>;

impl SupervisorState {
    pub fn shared() -> SharedState {
        Arc::new(Self::default())
    }

    pub fn current_pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub(crate) fn set_pid(&self, pid: Option<u32>) {
        self.pid.store(pid.unwrap_or(0), Ordering::SeqCst);
    }

    /// The running child may finish, but it will not be started again.
    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

pub struct Supervisor {
    config: ProgramConfig,
    spawner: Arc<dyn ProcessSpawner>,
    state: SharedState,
    alerts: Option<AlertDispatcher>,
    pending_alerts: Vec<JoinHandle<()>>,
    last_exit: Option<ExitRecord>,
    pump_drain: Duration,
    retry: u32,
}

impl Supervisor {
    pub fn new(config: ProgramConfig, spawner: Arc<dyn ProcessSpawner>, state: SharedState) -> Self {
        Self {
            config,
            spawner,
            state,
            alerts: None,
            pending_alerts: Vec::new(),
            last_exit: None,
            pump_drain: PUMP_DRAIN_TIMEOUT,
            retry: 0,
        }
    }

    /// How long a finished child's pipes may stay open before their pumps are told to let go.
    pub fn with_pump_drain_timeout(mut self, drain: Duration) -> Self {
        self.pump_drain = drain;
        self
    }

    pub fn with_alerts(mut self, alerts: AlertDispatcher) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    /// Consecutive short-lived exits so far.
    pub fn retry(&self) -> u32 {
        self.retry
    }

    /*
        @@@
        @run();
        . Repeats supervision cycles until one decides not to restart.
        . Spawn and sink-open failures end the loop with an error, they are never retried.
        . Before returning, gives in-flight alerts a bounded chance to be delivered.
    */
    pub async fn run(&mut self) -> Result<ExitRecord> {
        loop {
            let record = match self.cycle().await {
                Ok(record) => record,
                Err(err) => {
                    self.settle_alerts().await;
                    return Err(err);
                }
            };
            if !record.restart {
                info!(
                    program = %self.config.process_name,
                    exit_code = record.exit_code,
                    retry = self.retry,
                    "Not restarting (policy: {:?}, startretries: {})",
                    self.config.restart.autorestart,
                    self.config.restart.startretries
                );
                self.settle_alerts().await;
                return Ok(record);
            }
            info!(
                program = %self.config.process_name,
                retry = self.retry,
                "Restarting child"
            );
        }
    }

    /*
        @@@
        @cycle();
        . Opens the log sinks, spawns the child and hands its stdout/stderr to one pump each.
        . Waits for the exit, noting whether the child outlived the grace period.
        . Classifies the exit, updates the retry counter and fires an alert when the exit was unexpected.
        . Joins the pumps so the next child never shares a log file with a live pump. Pumps whose
          pipe outlives the drain timeout are stopped, never left behind.
        . Once a stop was requested no further child is spawned; the previous exit is returned instead.
    */
    pub async fn cycle(&mut self) -> Result<ExitRecord> {
        let name = self.config.process_name.clone();
        let stdout_sink = match &self.config.stdout {
            Some(cfg) => Some(RotatingSink::from_config(cfg).await?),
            None => None,
        };
        let stderr_sink = match &self.config.stderr {
            Some(cfg) => Some(RotatingSink::from_config(cfg).await?),
            None => None,
        };

        if self.state.is_stopping() {
            if let Some(mut last) = self.last_exit.take() {
                info!(program = %name, "Stop requested, not spawning again");
                last.restart = false;
                return Ok(last);
            }
        }

        let start_time = Local::now();
        let started = Instant::now();
        let mut child = self
            .spawner
            .spawn(&self.config)
            .await
            .map_err(|source| Error::Spawn {
                program: self.config.cmd.clone(),
                source,
            })?;
        info!(program = %name, pid = ?child.pid, "Spawned new instance");
        self.state.set_pid(child.pid);

        let (stop_pumps, stop) = watch::channel(false);
        let mut pumps = Vec::with_capacity(2);
        if let (Some(stream), Some(sink)) = (child.stdout.take(), stdout_sink) {
            pumps.push(spawn_stoppable_pump(stream, sink, stop.clone()));
        }
        if let (Some(stream), Some(sink)) = (child.stderr.take(), stderr_sink) {
            pumps.push(spawn_stoppable_pump(stream, sink, stop));
        }

        let grace = self.config.restart.startsecs;
        let exit = child.wait();
        tokio::pin!(exit);
        let waited = tokio::select! {
            biased;
            res = &mut exit => res,
            _ = sleep(grace) => {
                debug!(program = %name, startsecs = grace.as_secs(), "Marked healthy after grace period");
                exit.await
            }
        };
        let lifetime = started.elapsed();
        let exit_time = Local::now();
        self.state.set_pid(None);

        let exit_code = waited.unwrap_or_else(|e| {
            error!(program = %name, error = %e, "failed to wait for child");
            -1
        });
        let mut record = self.classify(exit_code, start_time, exit_time, lifetime);
        if record.unexpected {
            warn!(program = %name, exit_code, lifetime = ?lifetime, "Child exited unexpectedly");
        } else {
            info!(program = %name, exit_code, lifetime = ?lifetime, "Child exited");
        }

        if record.unexpected && !self.state.is_stopping() {
            if let Some(alerts) = &self.alerts {
                self.pending_alerts.retain(|h| !h.is_finished());
                self.pending_alerts.push(alerts.dispatch(record.clone()));
            }
        }

        join_pumps(&name, pumps, self.pump_drain, &stop_pumps).await;
        if self.state.is_stopping() {
            record.restart = false;
        }
        self.last_exit = Some(record.clone());
        Ok(record)
    }

    fn classify(
        &mut self,
        exit_code: i32,
        start_time: DateTime<Local>,
        exit_time: DateTime<Local>,
        lifetime: Duration,
    ) -> ExitRecord {
        let policy = &self.config.restart;
        let unexpected = is_unexpected(exit_code, &policy.exitcodes);
        let observed = self.retry;

        let mut restart = false;
        if should_restart(exit_code, policy.autorestart, &policy.exitcodes) {
            if lifetime < policy.startsecs {
                self.retry += 1;
            } else {
                self.retry = 0;
            }
            restart = self.retry < policy.startretries;
        }
        if self.state.is_stopping() {
            restart = false;
        }

        ExitRecord {
            exit_code,
            unexpected,
            start_time,
            exit_time,
            lifetime,
            retry: observed,
            restart,
        }
    }

    /// Waits, bounded, for alerts that are still being delivered.
    pub async fn settle_alerts(&mut self) {
        let pending = std::mem::take(&mut self.pending_alerts);
        if pending.is_empty() {
            return;
        }
        if timeout(ALERT_DRAIN_TIMEOUT, join_all(pending)).await.is_err() {
            warn!(program = %self.config.process_name, "gave up waiting for alert delivery");
        }
    }
}

async fn join_pumps(
    name: &str,
    pumps: Vec<JoinHandle<RotatingSink>>,
    drain: Duration,
    stop: &watch::Sender<bool>,
) {
    if pumps.is_empty() {
        return;
    }
    let pending = join_all(pumps);
    tokio::pin!(pending);
    let results = match timeout(drain, &mut pending).await {
        Ok(results) => results,
        Err(_) => {
            warn!(
                program = %name,
                drain = ?drain,
                "output pipes still open after child exit, closing the log files"
            );
            // send only fails once every pump has already returned
            let _ = stop.send(true);
            pending.await
        }
    };
    for res in results {
        if let Err(e) = res {
            error!(program = %name, error = %e, "log pump task failed");
        }
    }
}
