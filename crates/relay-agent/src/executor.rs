use crate::chat::ChatHandle;
use crate::control::ControlConnector;
use crate::reactions::Reaction;
use crate::sequencer::{BatchOutcome, CommandSequencer};
use crate::shutdown::shutdown_requested;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Runs reactions one at a time, in the order dispatch produced them.
pub struct ReactionExecutor<C> {
    sequencer: CommandSequencer<C>,
    chat: ChatHandle,
}

impl<C: ControlConnector> ReactionExecutor<C> {
    pub fn new(sequencer: CommandSequencer<C>, chat: ChatHandle) -> Self {
        Self { sequencer, chat }
    }

    pub async fn execute(&self, reaction: &Reaction) -> Option<BatchOutcome> {
        debug!(event = "reaction_start", label = %reaction.label);
        if !reaction.pacing.is_zero() {
            tokio::time::sleep(reaction.pacing).await;
        }
        for line in &reaction.chat {
            self.chat.say(line);
        }
        let outcome = match &reaction.batch {
            Some(batch) => {
                let outcome = self.sequencer.run(batch).await;
                log_outcome(&reaction.label, &outcome);
                Some(outcome)
            }
            None => None,
        };
        if !reaction.settle.is_zero() {
            tokio::time::sleep(reaction.settle).await;
        }
        outcome
    }

    /// Drains `reactions` until shutdown or until every sender is gone. A
    /// reaction already started always finishes.
    pub async fn run(
        self,
        mut reactions: mpsc::UnboundedReceiver<Reaction>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let next = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                next = reactions.recv() => next,
            };
            let Some(reaction) = next else {
                break;
            };
            self.execute(&reaction).await;
        }
        info!(event = "executor_stop");
    }
}

fn log_outcome(label: &str, outcome: &BatchOutcome) {
    match outcome {
        BatchOutcome::Empty => debug!(event = "reaction_batch_empty", label),
        BatchOutcome::Completed { sent } => info!(event = "reaction_batch", label, sent),
        BatchOutcome::ConnectFailed(error) => {
            warn!(event = "reaction_batch_unsent", label, error = %error)
        }
        BatchOutcome::Aborted {
            sent,
            failed_command,
            error,
        } => warn!(
            event = "reaction_batch_aborted",
            label,
            sent,
            command = %failed_command,
            error = %error
        ),
    }
}
