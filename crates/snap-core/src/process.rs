//! # process
//!
//! why: run an external program to completion or stop it, never blocking without a bound
//! relations: used by invoker.rs for both the production and simulated snapshot paths
//! what: ProcessRunner, WaitPolicy, ProcessOutcome

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Exit code reported when the runner had to kill the program or lost track of it
pub const FORCED_TERMINATION: i32 = -1;

/// Result of one program invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
}

impl ProcessOutcome {
    pub fn new(exit_code: i32) -> Self {
        Self { exit_code }
    }

    pub fn forced() -> Self {
        Self::new(FORCED_TERMINATION)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn is_forced_termination(&self) -> bool {
        self.exit_code == FORCED_TERMINATION
    }
}

/// How long and in what way the runner waits for the program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Poll for exit every poll interval until `max_wait` has elapsed
    BoundedAsync { max_wait: Duration },
    /// Block on the child for the runner's fixed sync timeout
    BoundedSync,
}

/// Launches programs and enforces a wait policy on them
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub poll_interval: Duration,
    pub sync_timeout: Duration,
    pub reap_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            sync_timeout: Duration::from_secs(3),
            reap_grace: Duration::from_secs(1),
        }
    }
}

impl ProcessRunner {
    /// Run `binary` with `args` under `policy`
    ///
    /// OS errors never escape: a program that cannot be spawned, waited on,
    /// or that outlives its bound is reported as `FORCED_TERMINATION`.
    pub async fn run(&self, binary: &str, args: &[String], policy: WaitPolicy) -> ProcessOutcome {
        let args_string = args.join(",");
        info!(cmd = %binary, args = %args_string, ?policy, "SpawnProcess");

        let spawned = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let outcome = match spawned {
            Ok(mut child) => match policy {
                WaitPolicy::BoundedAsync { max_wait } => {
                    self.wait_polling(&mut child, max_wait, binary, &args_string).await
                }
                WaitPolicy::BoundedSync => self.wait_blocking(&mut child, binary, &args_string).await,
            },
            Err(e) => {
                warn!(cmd = %binary, args = %args_string, error = %e, "SpawnProcessFailedToStart");
                ProcessOutcome::forced()
            }
        };

        info!(cmd = %binary, error = outcome.exit_code, "SpawnProcess");
        outcome
    }

    async fn wait_polling(
        &self,
        child: &mut Child,
        max_wait: Duration,
        binary: &str,
        args_string: &str,
    ) -> ProcessOutcome {
        let mut run_time = Duration::ZERO;
        let outcome = loop {
            match child.try_wait() {
                Ok(Some(status)) => break ProcessOutcome::new(exit_code(status)),
                Ok(None) if run_time > max_wait => {
                    debug!(cmd = %binary, waited_ms = run_time.as_millis() as u64, "process timed out");
                    terminate(child);
                    break ProcessOutcome::forced();
                }
                Ok(None) => {
                    tokio::time::sleep(self.poll_interval).await;
                    run_time += self.poll_interval;
                }
                Err(e) => {
                    warn!(cmd = %binary, error = %e, "process status check failed");
                    terminate(child);
                    break ProcessOutcome::forced();
                }
            }
        };
        self.reap(child, binary, args_string).await;
        outcome
    }

    async fn wait_blocking(&self, child: &mut Child, binary: &str, args_string: &str) -> ProcessOutcome {
        match tokio::time::timeout(self.sync_timeout, child.wait()).await {
            Ok(Ok(status)) => ProcessOutcome::new(exit_code(status)),
            Ok(Err(e)) => {
                warn!(cmd = %binary, error = %e, "process wait failed");
                terminate(child);
                self.reap(child, binary, args_string).await;
                ProcessOutcome::forced()
            }
            Err(_) => {
                terminate(child);
                self.reap(child, binary, args_string).await;
                ProcessOutcome::forced()
            }
        }
    }

    /// Give the child one grace period to be collected
    async fn reap(&self, child: &mut Child, binary: &str, args_string: &str) {
        let reaped = matches!(
            tokio::time::timeout(self.reap_grace, child.wait()).await,
            Ok(Ok(_))
        );
        if !reaped {
            warn!(cmd = %binary, args = %args_string, "SpawnProcessFailedToExit");
        }
    }
}

fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "kill after exit");
    }
}

// a program killed by a signal has no code of its own
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(FORCED_TERMINATION)
}
