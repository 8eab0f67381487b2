use crate::control::{ControlConnector, ControlError, ControlSession};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_COMMAND_DELAY: Duration = Duration::from_millis(30);

/// Ordered command groups sent over one control-plane session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    pub groups: Vec<Vec<String>>,
    /// Overrides the sequencer's inter-command delay for this batch.
    pub delay: Option<Duration>,
}

impl CommandBatch {
    pub fn new(groups: Vec<Vec<String>>) -> Self {
        Self {
            groups,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn flatten(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(|group| group.iter().map(String::as_str))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(Vec::is_empty)
    }
}

#[derive(Debug)]
pub enum BatchOutcome {
    Empty,
    ConnectFailed(ControlError),
    Completed {
        sent: usize,
    },
    /// `failed_command` was attempted; nothing after it was sent.
    Aborted {
        sent: usize,
        failed_command: String,
        error: ControlError,
    },
}

impl BatchOutcome {
    #[cfg(test)]
    pub fn sent(&self) -> usize {
        match self {
            BatchOutcome::Completed { sent } | BatchOutcome::Aborted { sent, .. } => *sent,
            BatchOutcome::Empty | BatchOutcome::ConnectFailed(_) => 0,
        }
    }
}

pub struct CommandSequencer<C> {
    connector: C,
    default_delay: Duration,
}

impl<C: ControlConnector> CommandSequencer<C> {
    pub fn new(connector: C, default_delay: Duration) -> Self {
        Self {
            connector,
            default_delay,
        }
    }

    /// Sends every command of `batch` in order on a fresh session.
    ///
    /// The first failure ends the batch. The session is closed on every path
    /// that opened one.
    pub async fn run(&self, batch: &CommandBatch) -> BatchOutcome {
        let commands = batch.flatten();
        if commands.is_empty() {
            return BatchOutcome::Empty;
        }
        let delay = batch.delay.unwrap_or(self.default_delay);
        let mut session = match self.connector.connect().await {
            Ok(session) => session,
            Err(err) => {
                warn!(event = "rcon_connect_error", commands = commands.len(), error = %err);
                return BatchOutcome::ConnectFailed(err);
            }
        };

        let mut sent = 0;
        let mut failure = None;
        for command in commands {
            match session.command(command).await {
                Ok(response) => {
                    info!(event = "rcon_command", command, response = %response.trim_end());
                    sent += 1;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    warn!(event = "rcon_command_error", command, error = %err);
                    failure = Some((command.to_string(), err));
                    break;
                }
            }
        }
        session.close().await;

        match failure {
            Some((failed_command, error)) => BatchOutcome::Aborted {
                sent,
                failed_command,
                error,
            },
            None => BatchOutcome::Completed { sent },
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    /// Connector double that records every attempted command.
    #[derive(Clone, Default)]
    pub struct RecordingConnector {
        pub attempted: Arc<Mutex<Vec<String>>>,
        pub connects: Arc<AtomicUsize>,
        pub closes: Arc<AtomicUsize>,
        pub fail_on: Option<String>,
        pub refuse: bool,
    }

    impl RecordingConnector {
        pub fn attempted(&self) -> Vec<String> {
            self.attempted.lock().unwrap().clone()
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    pub struct RecordingSession {
        owner: RecordingConnector,
    }

    impl ControlConnector for RecordingConnector {
        type Session = RecordingSession;

        async fn connect(&self) -> Result<RecordingSession, ControlError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(ControlError::Connect("refused".to_string()));
            }
            Ok(RecordingSession {
                owner: self.clone(),
            })
        }
    }

    impl ControlSession for RecordingSession {
        async fn command(&mut self, command: &str) -> Result<String, ControlError> {
            self.owner.attempted.lock().unwrap().push(command.to_string());
            if self.owner.fail_on.as_deref() == Some(command) {
                return Err(ControlError::Protocol("send failed".to_string()));
            }
            Ok(format!("ok {command}"))
        }

        async fn close(self) {
            self.owner.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}
