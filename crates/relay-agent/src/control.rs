use relay_core::rcon::{
    decode_length, decode_packet, encode_packet, RconError, RconPacket, AUTH_FAILED_ID,
    PACKET_LOGIN_RESPONSE,
};
use std::{future::Future, io, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] RconError),
    #[error("login rejected")]
    AuthRejected,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Opens short-lived control-plane sessions.
pub trait ControlConnector: Send + Sync {
    type Session: ControlSession + Send;

    fn connect(&self) -> impl Future<Output = Result<Self::Session, ControlError>> + Send;
}

pub trait ControlSession {
    /// Sends one command and waits for its response.
    fn command(
        &mut self,
        command: &str,
    ) -> impl Future<Output = Result<String, ControlError>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone)]
pub struct RconConnector {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl ControlConnector for RconConnector {
    type Session = RconSession;

    async fn connect(&self) -> Result<RconSession, ControlError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ControlError::Timeout("connect"))?
            .map_err(|err| ControlError::Connect(format!("{addr}: {err}")))?;
        let _ = stream.set_nodelay(true);
        let mut session = RconSession {
            stream,
            next_id: 0,
            io_timeout: self.io_timeout,
        };
        if let Err(err) = session.login(&self.password).await {
            session.close().await;
            return Err(err);
        }
        Ok(session)
    }
}

pub struct RconSession {
    stream: TcpStream,
    next_id: i32,
    io_timeout: Duration,
}

impl RconSession {
    fn allocate_id(&mut self) -> i32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.next_id
    }

    async fn login(&mut self, password: &str) -> Result<(), ControlError> {
        let id = self.allocate_id();
        self.write_packet(&RconPacket::login(id, password), "login").await?;
        loop {
            let packet = self.read_packet("login").await?;
            if packet.request_id == AUTH_FAILED_ID {
                return Err(ControlError::AuthRejected);
            }
            // Some servers send an empty value packet ahead of the login reply.
            if packet.kind != PACKET_LOGIN_RESPONSE {
                debug!(event = "rcon_login_skip", kind = packet.kind);
                continue;
            }
            if packet.request_id != id {
                return Err(ControlError::Protocol(format!(
                    "login reply id {} != {id}",
                    packet.request_id
                )));
            }
            return Ok(());
        }
    }

    async fn write_packet(
        &mut self,
        packet: &RconPacket,
        stage: &'static str,
    ) -> Result<(), ControlError> {
        let frame = encode_packet(packet)?;
        let io_timeout = self.io_timeout;
        let stream = &mut self.stream;
        let send = async {
            stream.write_all(&frame).await?;
            stream.flush().await
        };
        tokio::time::timeout(io_timeout, send)
            .await
            .map_err(|_| ControlError::Timeout(stage))??;
        Ok(())
    }

    async fn read_packet(&mut self, stage: &'static str) -> Result<RconPacket, ControlError> {
        let io_timeout = self.io_timeout;
        let stream = &mut self.stream;
        let read = async {
            let mut prefix = [0u8; 4];
            stream.read_exact(&mut prefix).await?;
            let length = decode_length(prefix)?;
            let mut payload = vec![0u8; length];
            stream.read_exact(&mut payload).await?;
            Ok::<_, ControlError>(decode_packet(&payload)?)
        };
        tokio::time::timeout(io_timeout, read)
            .await
            .map_err(|_| ControlError::Timeout(stage))?
    }
}

impl ControlSession for RconSession {
    async fn command(&mut self, command: &str) -> Result<String, ControlError> {
        let id = self.allocate_id();
        self.write_packet(&RconPacket::command(id, command), "command")
            .await?;
        let packet = self.read_packet("command").await?;
        if packet.request_id != id {
            return Err(ControlError::Protocol(format!(
                "response id {} != {id}",
                packet.request_id
            )));
        }
        Ok(packet.body)
    }

    async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}
