use crate::backoff::Backoff;
use crate::config::ChatConfig;
use crate::shutdown::shutdown_requested;
use futures_util::{SinkExt, StreamExt};
use regex::Regex;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

pub const DEFAULT_TIP_PATTERN: &str = r"^(.*) just tipped (.*)$";
const CAPABILITIES: &str = "CAP REQ :twitch.tv/membership twitch.tv/tags";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Fire-and-forget chat output. Every line is logged; when chat is enabled it
/// is also queued for the chat session.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    channel: String,
    outbound: Option<mpsc::Sender<String>>,
}

impl ChatHandle {
    pub fn new(channel: impl Into<String>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            channel: channel.into(),
            outbound: Some(outbound),
        }
    }

    pub fn disabled(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            outbound: None,
        }
    }

    #[cfg(test)]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn say(&self, text: &str) {
        info!(target: "chat", "Sending #{}: {}", self.channel, text);
        let Some(outbound) = &self.outbound else {
            return;
        };
        if let Err(err) = outbound.try_send(text.to_string()) {
            warn!(event = "chat_queue_error", channel = %self.channel, error = %err);
        }
    }
}

/// One line of IRC: `[@tags] [:prefix] COMMAND params [:trailing]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: Option<String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let mut tags = None;
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw, after) = stripped.split_once(' ')?;
            tags = Some(raw.to_string());
            rest = after.trim_start();
        }
        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (raw, after) = stripped.split_once(' ')?;
            prefix = Some(raw.to_string());
            rest = after.trim_start();
        }
        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut parts = head.split_whitespace();
        let command = parts.next()?.to_string();
        let mut params: Vec<String> = parts.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }
        Some(Self {
            tags,
            prefix,
            command,
            params,
        })
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_deref()?.split(';').find_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            (name == key && !value.is_empty()).then_some(value)
        })
    }

    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
    }

    /// Display name when tagged, otherwise the prefix nick.
    pub fn author(&self) -> &str {
        self.tag("display-name")
            .or_else(|| self.nick())
            .unwrap_or_default()
    }

    fn param(&self, index: usize) -> &str {
        self.params.get(index).map(String::as_str).unwrap_or_default()
    }

    fn channel(&self) -> &str {
        self.param(0).trim_start_matches('#')
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorLine {
    Chat {
        channel: String,
        author: String,
        text: String,
    },
    Bot {
        channel: String,
        author: String,
        text: String,
    },
    Tip {
        channel: String,
        tipper: String,
        amount: String,
    },
    Joined {
        channel: String,
    },
    UserJoin {
        channel: String,
        user: String,
    },
    UserPart {
        channel: String,
        user: String,
    },
    Whisper {
        author: String,
        text: String,
    },
}

impl fmt::Display for MirrorLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorLine::Chat {
                channel,
                author,
                text,
            } => write!(f, "[Chat] #{channel} ({author}) {text}"),
            MirrorLine::Bot {
                channel,
                author,
                text,
            } => write!(f, "[Bot] #{channel} ({author}) {text}"),
            MirrorLine::Tip {
                channel,
                tipper,
                amount,
            } => write!(f, "[Tip] #{channel} Tipper:{tipper} Amount:{amount}"),
            MirrorLine::Joined { channel } => write!(f, "Joined #{channel}"),
            MirrorLine::UserJoin { channel, user } => write!(f, "UserJoin #{channel}: {user}"),
            MirrorLine::UserPart { channel, user } => write!(f, "UserPart #{channel}: {user}"),
            MirrorLine::Whisper { author, text } => write!(f, "WhisperRecv {author}: {text}"),
        }
    }
}

/// Classifies chat traffic into log lines.
#[derive(Debug, Clone)]
pub struct ChatMirror {
    nick: String,
    bot_authors: Vec<String>,
    tip: Regex,
}

impl ChatMirror {
    pub fn new(
        nick: impl Into<String>,
        bot_authors: Vec<String>,
        tip_pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            nick: nick.into(),
            bot_authors: bot_authors
                .into_iter()
                .map(|author| author.to_ascii_lowercase())
                .collect(),
            tip: Regex::new(tip_pattern)?,
        })
    }

    fn is_bot(&self, author: &str) -> bool {
        let author = author.to_ascii_lowercase();
        self.bot_authors
            .iter()
            .any(|bot| !bot.is_empty() && author.contains(bot.as_str()))
    }

    pub fn classify(&self, message: &IrcMessage) -> Option<MirrorLine> {
        let channel = message.channel().to_string();
        match message.command.as_str() {
            "PRIVMSG" => {
                let author = message.author().to_string();
                let text = message.param(1).to_string();
                if !self.is_bot(&author) {
                    return Some(MirrorLine::Chat {
                        channel,
                        author,
                        text,
                    });
                }
                match self.tip.captures(&text) {
                    Some(captures) => Some(MirrorLine::Tip {
                        channel,
                        tipper: captures.get(1).map_or("", |m| m.as_str()).to_string(),
                        amount: captures.get(2).map_or("", |m| m.as_str()).to_string(),
                    }),
                    None => Some(MirrorLine::Bot {
                        channel,
                        author,
                        text,
                    }),
                }
            }
            "JOIN" => {
                let user = message.nick().unwrap_or_default().to_string();
                if user.eq_ignore_ascii_case(&self.nick) {
                    Some(MirrorLine::Joined { channel })
                } else {
                    Some(MirrorLine::UserJoin { channel, user })
                }
            }
            "PART" => Some(MirrorLine::UserPart {
                channel,
                user: message.nick().unwrap_or_default().to_string(),
            }),
            "WHISPER" => Some(MirrorLine::Whisper {
                author: message.author().to_string(),
                text: message.param(1).to_string(),
            }),
            _ => None,
        }
    }
}

/// Long-lived chat connection: mirrors inbound traffic and drains the
/// outbound queue fed by [`ChatHandle`].
pub struct ChatSession {
    url: String,
    nick: String,
    token: String,
    channel: String,
    mirror: ChatMirror,
    backoff: Backoff,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl ChatSession {
    pub fn new(config: &ChatConfig, backoff: Backoff) -> Result<Self, regex::Error> {
        let mirror = ChatMirror::new(
            config.nick.clone(),
            config.bot_authors.clone(),
            &config.tip_pattern,
        )?;
        Ok(Self {
            url: config.url.clone(),
            nick: config.nick.to_ascii_lowercase(),
            token: config.token.clone(),
            channel: config.channel.trim_start_matches('#').to_ascii_lowercase(),
            mirror,
            backoff,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
        })
    }

    fn handshake(&self) -> Vec<String> {
        let token = if self.token.starts_with("oauth:") {
            self.token.clone()
        } else {
            format!("oauth:{}", self.token)
        };
        vec![
            CAPABILITIES.to_string(),
            format!("PASS {token}"),
            format!("NICK {}", self.nick),
            format!("JOIN #{}", self.channel),
        ]
    }

    pub async fn run(
        mut self,
        mut outbound: mpsc::Receiver<String>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(event = "chat_start", channel = %self.channel, url = %self.url);
        loop {
            let connect = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                connect = tokio::time::timeout(
                    self.connect_timeout,
                    connect_async(self.url.as_str()),
                ) => connect,
            };
            let dialed = match connect {
                Ok(Ok((ws, _))) => Ok(ws),
                Ok(Err(err)) => Err(err.to_string()),
                Err(_) => Err("timed out".to_string()),
            };
            let mut ws = match dialed {
                Ok(ws) => ws,
                Err(error) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        event = "chat_connect_error",
                        error = %error,
                        retry_ms = delay.as_millis() as u64
                    );
                    tokio::select! {
                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };
            self.backoff.reset();

            let mut healthy = true;
            for line in self.handshake() {
                if ws.send(Message::Text(line)).await.is_err() {
                    healthy = false;
                    break;
                }
            }

            let mut read_deadline = Instant::now() + self.read_timeout;
            while healthy {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => {
                        let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;
                        info!(event = "chat_stop", channel = %self.channel);
                        return;
                    }
                    _ = tokio::time::sleep_until(read_deadline) => {
                        warn!(event = "chat_read_timeout", channel = %self.channel);
                        healthy = false;
                    }
                    Some(frame) = ws.next() => {
                        read_deadline = Instant::now() + self.read_timeout;
                        match frame {
                            Ok(Message::Text(text)) => {
                                for line in text.lines().filter(|line| !line.trim().is_empty()) {
                                    if let Some(reply) = self.handle_line(line) {
                                        if ws.send(Message::Text(reply)).await.is_err() {
                                            healthy = false;
                                            break;
                                        }
                                    }
                                }
                            }
                            Ok(Message::Close(_)) => healthy = false,
                            Ok(_) => {}
                            Err(err) => {
                                warn!(event = "chat_read_error", error = %err);
                                healthy = false;
                            }
                        }
                    }
                    Some(text) = outbound.recv() => {
                        let line = format!("PRIVMSG #{} :{}", self.channel, text);
                        if ws.send(Message::Text(line)).await.is_err() {
                            healthy = false;
                        }
                    }
                    else => healthy = false,
                }
            }
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await;

            let delay = self.backoff.next_delay();
            warn!(event = "chat_disconnected", retry_ms = delay.as_millis() as u64);
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!(event = "chat_stop", channel = %self.channel);
    }

    /// Mirrors one inbound line; returns a reply when the server expects one.
    fn handle_line(&self, line: &str) -> Option<String> {
        let message = IrcMessage::parse(line)?;
        if message.command == "PING" {
            return Some(format!("PONG :{}", message.param(0)));
        }
        match self.mirror.classify(&message) {
            Some(mirrored) => info!(target: "chat", "{mirrored}"),
            None => debug!(target: "chat", "Raw: '{}'", line.trim_end()),
        }
        None
    }
}
