// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process execution seam for the `midclt` transport.
//!
//! In production the only implementor is [`HostExecutor`]; tests use
//! [`FakeExecutor`] to script command outcomes without spawning anything.

use async_trait::async_trait;
use slog::debug;
use slog::Logger;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to start {command:?}")]
    Start {
        command: String,
        #[source]
        err: std::io::Error,
    },
    #[error("{command:?} failed ({status}): {stderr}")]
    CommandFailure {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("{command:?} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

impl ExecutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }
}

pub fn command_to_string(command: &std::process::Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs commands and returns their output.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `command` to completion, failing on non-zero exit.
    async fn execute(
        &self,
        command: &mut Command,
    ) -> Result<Output, ExecutionError>;
}

pub type BoxedExecutor = Arc<dyn Executor>;

/// Executor backed by real host processes, with a bounded per-command
/// timeout.
pub struct HostExecutor {
    log: Logger,
    timeout: Duration,
}

impl HostExecutor {
    pub fn new(log: Logger, timeout: Duration) -> Arc<Self> {
        Arc::new(Self { log, timeout })
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn execute(
        &self,
        command: &mut Command,
    ) -> Result<Output, ExecutionError> {
        command.kill_on_drop(true);
        let rendered = command_to_string(command.as_std());
        debug!(self.log, "running command"; "command" => &rendered);

        let output =
            match tokio::time::timeout(self.timeout, command.output()).await {
                Err(_) => {
                    return Err(ExecutionError::Timeout {
                        command: rendered,
                        timeout: self.timeout,
                    });
                }
                Ok(Err(err)) => {
                    return Err(ExecutionError::Start {
                        command: rendered,
                        err,
                    });
                }
                Ok(Ok(output)) => output,
            };

        if !output.status.success() {
            return Err(ExecutionError::CommandFailure {
                command: rendered,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr)
                    .trim()
                    .to_string(),
            });
        }
        Ok(output)
    }
}

#[cfg(any(test, feature = "testing"))]
pub use fake::FakeExecutor;
#[cfg(any(test, feature = "testing"))]
pub use fake::FakeOutcome;

#[cfg(any(test, feature = "testing"))]
mod fake {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    /// Scripted outcome for one expected command.
    #[derive(Clone, Debug)]
    pub enum FakeOutcome {
        Success { stdout: String },
        Failure { stderr: String },
        Timeout,
    }

    /// An executor that asserts the exact commands it receives and replies
    /// with pre-registered outcomes, in order.
    pub struct FakeExecutor {
        expected: Mutex<Vec<(String, FakeOutcome)>>,
        index: Mutex<usize>,
    }

    impl FakeExecutor {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                expected: Mutex::new(Vec::new()),
                index: Mutex::new(0),
            })
        }

        /// Expects `command` (program and arguments, space-joined) as the
        /// next execution, producing `outcome`.
        pub fn expect(&self, command: &str, outcome: FakeOutcome) {
            self.expected
                .lock()
                .unwrap()
                .push((command.to_string(), outcome));
        }

        pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
            self
        }
    }

    #[async_trait]
    impl Executor for FakeExecutor {
        async fn execute(
            &self,
            command: &mut Command,
        ) -> Result<Output, ExecutionError> {
            let rendered = command_to_string(command.as_std());
            let mut index = self.index.lock().unwrap();
            let expected = self.expected.lock().unwrap();
            let (want, outcome) = expected
                .get(*index)
                .unwrap_or_else(|| panic!("unexpected command: {rendered}"));
            assert_eq!(&rendered, want, "unexpected command");
            *index += 1;

            match outcome.clone() {
                FakeOutcome::Success { stdout } => Ok(Output {
                    status: ExitStatus::from_raw(0),
                    stdout: stdout.into_bytes(),
                    stderr: Vec::new(),
                }),
                FakeOutcome::Failure { stderr } => {
                    Err(ExecutionError::CommandFailure {
                        command: rendered,
                        status: ExitStatus::from_raw(1 << 8),
                        stderr,
                    })
                }
                FakeOutcome::Timeout => Err(ExecutionError::Timeout {
                    command: rendered,
                    timeout: Duration::from_secs(0),
                }),
            }
        }
    }

    impl Drop for FakeExecutor {
        fn drop(&mut self) {
            let expected = self.expected.lock().unwrap().len();
            let actual = *self.index.lock().unwrap();
            if actual < expected && !std::thread::panicking() {
                panic!("only saw {actual} of {expected} expected commands");
            }
        }
    }
}
