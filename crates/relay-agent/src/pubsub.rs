use crate::backoff::Backoff;
use crate::config::PubSubConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::keepalive::{KeepaliveAction, KeepaliveTimer};
use crate::reactions::Reaction;
use crate::shutdown::shutdown_requested;
use futures_util::{SinkExt, StreamExt};
use relay_core::pubsub_ipc::{
    decode_frame, encode_frame, new_nonce, InboundFrame, MessageData, OutboundFrame,
    SubscriptionRequest,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingSubscriptionAck,
    Listening,
    Terminating,
    Reconnecting,
}

/// Why one push-stream session ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionEnd {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("subscription ack timed out")]
    AckTimeout,
    #[error("subscription rejected: {0}")]
    SubscribeRejected(String),
    #[error("server requested reconnect")]
    ReconnectRequested,
    #[error("keepalive probe unanswered")]
    KeepaliveExpired,
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("shutdown")]
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
    /// Ack receive attempts on one connection before giving up on it.
    pub ack_retries: u32,
    pub ping_interval: Duration,
    pub pong_grace: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &PubSubConfig) -> Self {
        Self {
            url: config.url.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            ack_timeout: Duration::from_secs(config.ack_timeout_secs),
            ack_retries: config.ack_retries.max(1),
            ping_interval: Duration::from_secs(config.ping_interval_secs),
            pong_grace: Duration::from_secs(config.pong_grace_secs),
        }
    }
}

/// Owns the push-stream connection and reconnects it forever, until shutdown.
pub struct PubSubClient {
    settings: SessionSettings,
    request: SubscriptionRequest,
    dispatcher: Dispatcher,
    reactions: mpsc::UnboundedSender<Reaction>,
    backoff: Backoff,
    state: SessionState,
}

impl PubSubClient {
    pub fn new(
        settings: SessionSettings,
        request: SubscriptionRequest,
        dispatcher: Dispatcher,
        reactions: mpsc::UnboundedSender<Reaction>,
        backoff: Backoff,
    ) -> Self {
        Self {
            settings,
            request,
            dispatcher,
            reactions,
            backoff,
            state: SessionState::Disconnected,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(event = "pubsub_state", from = ?self.state, to = ?next);
            self.state = next;
        }
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            event = "pubsub_start",
            url = %self.settings.url,
            topics = self.request.topics().len()
        );
        loop {
            let end = self.run_session(&mut shutdown).await;
            if end == SessionEnd::Shutdown {
                break;
            }
            self.set_state(SessionState::Reconnecting);
            let delay = self.backoff.next_delay();
            warn!(
                event = "pubsub_session_end",
                reason = %end,
                retry_ms = delay.as_millis() as u64
            );
            let stop = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if stop {
                break;
            }
        }
        self.set_state(SessionState::Disconnected);
        info!(event = "pubsub_stop");
    }

    /// Connect, subscribe and listen once. The transport is closed before
    /// returning, whatever the reason.
    pub async fn run_session(&mut self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        self.set_state(SessionState::Connecting);
        debug!(event = "pubsub_connecting", url = %self.settings.url);
        let connect_timeout = self.settings.connect_timeout;
        let connect = tokio::select! {
            _ = shutdown_requested(shutdown) => None,
            connect = tokio::time::timeout(
                connect_timeout,
                connect_async(self.settings.url.as_str()),
            ) => Some(connect),
        };
        let mut ws = match connect {
            None => {
                self.set_state(SessionState::Disconnected);
                return SessionEnd::Shutdown;
            }
            Some(Ok(Ok((ws, _)))) => ws,
            Some(Ok(Err(err))) => {
                self.set_state(SessionState::Disconnected);
                return SessionEnd::ConnectFailed(err.to_string());
            }
            Some(Err(_)) => {
                self.set_state(SessionState::Disconnected);
                return SessionEnd::ConnectFailed("timed out".to_string());
            }
        };

        let end = match self.subscribe(&mut ws, shutdown).await {
            Ok(()) => self.listen(&mut ws, shutdown).await,
            Err(end) => end,
        };
        self.set_state(SessionState::Terminating);
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
        self.set_state(SessionState::Disconnected);
        end
    }

    async fn subscribe(
        &mut self,
        ws: &mut PushStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), SessionEnd> {
        self.set_state(SessionState::AwaitingSubscriptionAck);
        let nonce = new_nonce();
        let frame = encode_frame(&self.request.to_frame(Some(nonce.clone())))
            .map_err(|err| SessionEnd::Protocol(err.to_string()))?;
        ws.send(Message::Text(frame))
            .await
            .map_err(|err| SessionEnd::Transport(err.to_string()))?;

        let ack_timeout = self.settings.ack_timeout;
        let mut attempts = 0;
        loop {
            let received = tokio::select! {
                _ = shutdown_requested(shutdown) => return Err(SessionEnd::Shutdown),
                received = tokio::time::timeout(ack_timeout, ws.next()) => received,
            };
            let text = match received {
                Err(_) => {
                    attempts += 1;
                    warn!(
                        event = "pubsub_ack_timeout",
                        attempt = attempts,
                        max = self.settings.ack_retries
                    );
                    if attempts >= self.settings.ack_retries {
                        return Err(SessionEnd::AckTimeout);
                    }
                    continue;
                }
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Err(SessionEnd::Closed),
                Ok(Some(Err(err))) => return Err(SessionEnd::Transport(err.to_string())),
                Ok(Some(Ok(Message::Text(text)))) => text,
                Ok(Some(Ok(_))) => continue,
            };
            match decode_frame(&text) {
                Ok(InboundFrame::Response {
                    nonce: reply_nonce,
                    error,
                }) => {
                    if reply_nonce.as_deref().is_some_and(|reply| reply != nonce) {
                        debug!(event = "pubsub_ack_foreign_nonce", nonce = ?reply_nonce);
                        continue;
                    }
                    if !error.is_empty() {
                        warn!(event = "pubsub_subscribe_rejected", error = %error);
                        return Err(SessionEnd::SubscribeRejected(error));
                    }
                    return Ok(());
                }
                Ok(InboundFrame::Reconnect) => return Err(SessionEnd::ReconnectRequested),
                Ok(InboundFrame::Message { data }) => self.handle_message(&data),
                Ok(other) => debug!(event = "pubsub_ack_skip", frame = ?other),
                Err(err) => return Err(SessionEnd::Protocol(err.to_string())),
            }
        }
    }

    async fn listen(
        &mut self,
        ws: &mut PushStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        self.set_state(SessionState::Listening);
        self.backoff.reset();
        info!(event = "pubsub_listening", topics = self.request.topics().len());
        let mut keepalive = KeepaliveTimer::new(
            self.settings.ping_interval,
            self.settings.pong_grace,
            Instant::now(),
        );
        loop {
            let wait = match keepalive.poll(Instant::now()) {
                KeepaliveAction::Wait(wait) => wait,
                KeepaliveAction::SendProbe => {
                    let ping = match encode_frame(&OutboundFrame::Ping) {
                        Ok(ping) => ping,
                        Err(err) => return SessionEnd::Protocol(err.to_string()),
                    };
                    if let Err(err) = ws.send(Message::Text(ping)).await {
                        return SessionEnd::Transport(err.to_string());
                    }
                    keepalive.probe_sent(Instant::now());
                    debug!(event = "pubsub_ping");
                    continue;
                }
                KeepaliveAction::Expired => {
                    warn!(event = "pubsub_keepalive_expired");
                    return SessionEnd::KeepaliveExpired;
                }
            };

            let received = tokio::select! {
                _ = shutdown_requested(shutdown) => return SessionEnd::Shutdown,
                received = tokio::time::timeout(wait, ws.next()) => received,
            };
            let text = match received {
                Err(_) => continue,
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return SessionEnd::Closed,
                Ok(Some(Err(err))) => return SessionEnd::Transport(err.to_string()),
                Ok(Some(Ok(Message::Text(text)))) => text,
                Ok(Some(Ok(_))) => continue,
            };
            match decode_frame(&text) {
                Ok(InboundFrame::Message { data }) => self.handle_message(&data),
                Ok(InboundFrame::Pong) => {
                    if !keepalive.acknowledge(Instant::now()) {
                        debug!(event = "pubsub_pong_unsolicited");
                    }
                }
                Ok(InboundFrame::Reconnect) => {
                    info!(event = "pubsub_reconnect_requested");
                    return SessionEnd::ReconnectRequested;
                }
                Ok(other) => debug!(event = "pubsub_frame_skip", frame = ?other),
                Err(err) => {
                    warn!(event = "pubsub_frame_error", error = %err, raw = %text);
                    return SessionEnd::Protocol(err.to_string());
                }
            }
        }
    }

    /// Dispatches inline and queues any reaction without waiting on the
    /// executor.
    fn handle_message(&mut self, data: &MessageData) {
        let reaction = match self.dispatcher.dispatch(data) {
            DispatchOutcome::Handled { kind, reaction } => {
                debug!(
                    event = "pubsub_dispatched",
                    kind = %kind,
                    reaction = reaction.is_some()
                );
                reaction
            }
            DispatchOutcome::Failed { kind, error } => {
                warn!(
                    event = "dispatch_handler_error",
                    kind = %kind,
                    topic = %data.topic,
                    error = %error
                );
                None
            }
            DispatchOutcome::Unhandled => None,
        };
        let Some(reaction) = reaction else {
            return;
        };
        if self.reactions.send(reaction).is_err() {
            warn!(event = "reaction_queue_closed", topic = %data.topic);
        }
    }
}
