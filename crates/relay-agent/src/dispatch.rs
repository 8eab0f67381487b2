use crate::reactions::{Reaction, Reactor};
use relay_core::events::{
    decode_payload, BitsEvent, FollowEvent, PayloadError, PointsEvent, PollEvent,
    SubscriptionEvent,
};
use relay_core::hype_train::{aggregate, HypeTrainEvent, MeterError, ProgressMeter};
use relay_core::pubsub_ipc::MessageData;
use relay_core::topics::{is_proper_prefix, TopicKind};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Meter(#[from] MeterError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub prefix: &'static str,
    pub kind: TopicKind,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Handled {
        kind: TopicKind,
        reaction: Option<Reaction>,
    },
    Unhandled,
    Failed {
        kind: TopicKind,
        error: HandlerError,
    },
}

/// Routes inbound messages by topic prefix and owns the hype-train meter.
pub struct Dispatcher {
    routes: Vec<Route>,
    meter: ProgressMeter,
    reactor: Reactor,
}

impl Dispatcher {
    pub fn new(reactor: Reactor) -> Self {
        let routes = TopicKind::DISPATCH_ORDER
            .iter()
            .map(|kind| Route {
                prefix: kind.prefix(),
                kind: *kind,
            })
            .collect();
        Self {
            routes,
            meter: ProgressMeter::default(),
            reactor,
        }
    }

    #[cfg(test)]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    #[cfg(test)]
    pub fn meter(&self) -> &ProgressMeter {
        &self.meter
    }

    /// First route whose prefix is a proper prefix of `topic`.
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        self.routes
            .iter()
            .find(|route| is_proper_prefix(route.prefix, topic))
            .map(|route| route.kind)
    }

    /// Handles one message. Handler failures come back as
    /// [`DispatchOutcome::Failed`] for the caller to log; they never end the
    /// session.
    pub fn dispatch(&mut self, message: &MessageData) -> DispatchOutcome {
        let Some(kind) = self.classify(&message.topic) else {
            info!(
                event = "pubsub_unhandled",
                topic = %message.topic,
                message = %message.message
            );
            return DispatchOutcome::Unhandled;
        };
        debug!(event = "pubsub_payload", kind = %kind, payload = %message.message);
        match self.handle(kind, &message.message) {
            Ok(reaction) => DispatchOutcome::Handled { kind, reaction },
            Err(error) => DispatchOutcome::Failed { kind, error },
        }
    }

    fn handle(&mut self, kind: TopicKind, raw: &str) -> Result<Option<Reaction>, HandlerError> {
        match kind {
            TopicKind::Bits => {
                let event: BitsEvent = decode_payload(raw)?;
                Ok(self.reactor.on_cheer(&event))
            }
            TopicKind::Subscription => {
                let event: SubscriptionEvent = decode_payload(raw)?;
                Ok(self.reactor.on_subscription(&event)?)
            }
            TopicKind::ChannelPoints => {
                let event: PointsEvent = decode_payload(raw)?;
                Ok(self.reactor.on_redemption(&event))
            }
            TopicKind::Follow => {
                let event: FollowEvent = decode_payload(raw)?;
                self.reactor.on_follow(&event);
                Ok(None)
            }
            TopicKind::HypeTrain => {
                let event = HypeTrainEvent::from_json(raw)?;
                let outcome = aggregate(&mut self.meter, &event)?;
                Ok(self.reactor.on_hype_train(&outcome))
            }
            TopicKind::Raid | TopicKind::CommunityPoints => {
                let payload: Value = decode_payload(raw)?;
                info!(event = "pubsub_raw", kind = %kind, payload = %payload);
                Ok(None)
            }
            TopicKind::Poll => {
                let event: PollEvent = decode_payload(raw)?;
                Ok(self.reactor.on_poll(&event)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactions::{PacingPolicy, ReactionTable};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Reactor::new(
            ReactionTable::default(),
            PacingPolicy::default(),
            "Steve",
            Vec::new(),
        ))
    }

    fn message(topic: &str, inner: &str) -> MessageData {
        MessageData {
            topic: topic.to_string(),
            message: inner.to_string(),
        }
    }

    fn hype(kind: &str, data: &str) -> MessageData {
        message(
            "hype-train-events-v1.1234",
            &format!(r#"{{"type":"{kind}","data":{data}}}"#),
        )
    }

    fn progress(level: u32, value: u64, goal: u64) -> String {
        format!(
            r#"{{"progress":{{"level":{{"value":{level},"goal":{goal}}},"value":{value},"goal":{goal},"total":{value}}}}}"#
        )
    }

    #[test]
    fn routes_follow_declared_order() {
        let dispatcher = dispatcher();
        let kinds: Vec<TopicKind> = dispatcher.routes().iter().map(|route| route.kind).collect();
        assert_eq!(kinds, TopicKind::DISPATCH_ORDER.to_vec());
    }

    #[test]
    fn classify_requires_proper_prefix() {
        let dispatcher = dispatcher();
        assert_eq!(
            dispatcher.classify("channel-bits-events-v2.42"),
            Some(TopicKind::Bits)
        );
        assert_eq!(dispatcher.classify("polls.42"), Some(TopicKind::Poll));
        assert_eq!(dispatcher.classify("polls."), None);
        assert_eq!(dispatcher.classify("whispers.42"), None);
        assert_eq!(dispatcher.classify(""), None);
    }

    #[test]
    fn unknown_topic_is_unhandled() {
        let mut dispatcher = dispatcher();
        assert!(matches!(
            dispatcher.dispatch(&message("video-playback.1", "{}")),
            DispatchOutcome::Unhandled
        ));
    }

    #[test]
    fn malformed_payload_fails_only_that_message() {
        let mut dispatcher = dispatcher();
        let broken = message("following.1234", r#"{"user_id":"1"}"#);
        assert!(matches!(
            dispatcher.dispatch(&broken),
            DispatchOutcome::Failed {
                kind: TopicKind::Follow,
                error: HandlerError::Payload(_)
            }
        ));
        let ok = message("following.1234", r#"{"username":"viewer","user_id":"1"}"#);
        assert!(matches!(
            dispatcher.dispatch(&ok),
            DispatchOutcome::Handled {
                kind: TopicKind::Follow,
                reaction: None
            }
        ));
    }

    #[test]
    fn zero_goal_is_a_handler_error() {
        let mut dispatcher = dispatcher();
        let outcome = dispatcher.dispatch(&hype("hype-train-progression", &progress(2, 10, 0)));
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed {
                error: HandlerError::Meter(MeterError::ZeroGoal),
                ..
            }
        ));
        assert_eq!(*dispatcher.meter(), ProgressMeter::default());
    }

    #[test]
    fn hype_train_end_below_final_level_is_generic() {
        let mut dispatcher = dispatcher();
        let sequence = [
            hype("hype-train-start", &progress(1, 100, 2000)),
            hype("hype-train-progression", &progress(1, 500, 2000)),
            hype("hype-train-level-up", &progress(2, 0, 2500)),
        ];
        for frame in &sequence {
            assert!(matches!(
                dispatcher.dispatch(frame),
                DispatchOutcome::Handled { .. }
            ));
        }
        assert_eq!(dispatcher.meter().level, 2);
        assert_eq!(dispatcher.meter().percent, 0);

        let end = dispatcher.dispatch(&hype(
            "hype-train-end",
            r#"{"ending_reason":"COMPLETED"}"#,
        ));
        let DispatchOutcome::Handled {
            reaction: Some(reaction),
            ..
        } = end
        else {
            panic!("expected end reaction");
        };
        assert_eq!(
            reaction.chat[0],
            "/me CurseLit Hype train has ended on level 2 CurseLit"
        );
        assert!(!reaction.chat.iter().any(|line| line.contains("COMPLETED")));
        assert_eq!(*dispatcher.meter(), ProgressMeter::default());
    }

    #[test]
    fn progression_percent_is_floored() {
        let mut dispatcher = dispatcher();
        dispatcher.dispatch(&hype("hype-train-progression", &progress(1, 1000, 2000)));
        assert_eq!(dispatcher.meter().percent, 50);
    }
}
