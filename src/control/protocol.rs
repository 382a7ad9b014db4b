//! Source RCON framing over TCP.
//!
//! Every packet is `size | id | type | body | 0 | 0` with little-endian 32-bit integers, where
//! `size` counts everything after itself.

use std::{io, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

use super::{ControlConnection, ControlConnector, ControlError};
use crate::config::ControlConfig;

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

const HEADER_LEN: i32 = 10;
const MAX_PACKET_LEN: i32 = 1 << 20;
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Packet {
    id: i32,
    kind: i32,
    body: String,
}

impl Packet {
    fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let size = HEADER_LEN + body.len() as i32;
        let mut frame = Vec::with_capacity(size as usize + 4);
        frame.extend_from_slice(&size.to_le_bytes());
        frame.extend_from_slice(&self.id.to_le_bytes());
        frame.extend_from_slice(&self.kind.to_le_bytes());
        frame.extend_from_slice(body);
        frame.extend_from_slice(&[0, 0]);
        frame
    }
}

/// Opens TCP connections and authenticates them with the configured password.
#[derive(Debug, Clone)]
pub struct RconConnector {
    addr: String,
    password: String,
}

impl RconConnector {
    /// Connector for the configured endpoint.
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            addr: format!("{}:{}", config.host, config.port),
            password: config.password.clone(),
        }
    }
}

impl ControlConnector for RconConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Box<dyn ControlConnection>, ControlError>> {
        let addr = self.addr.clone();
        let password = self.password.clone();
        Box::pin(async move {
            let stream = match timeout(EXCHANGE_TIMEOUT, TcpStream::connect(&addr)).await {
                Err(_) => return Err(ControlError::Timeout),
                Ok(Err(err)) if err.kind() == io::ErrorKind::ConnectionRefused => {
                    return Err(ControlError::Refused { addr });
                }
                Ok(Err(source)) => return Err(ControlError::Connect { addr, source }),
                Ok(Ok(stream)) => stream,
            };
            let _ = stream.set_nodelay(true);
            let connection = RconConnection::authenticate(stream, &password).await?;
            debug!(%addr, "remote console authenticated");
            Ok(Box::new(connection) as Box<dyn ControlConnection>)
        })
    }
}

/// An authenticated remote-console session over any byte stream.
pub struct RconConnection<S> {
    stream: S,
    next_id: i32,
    /// Bytes that arrived while idle, consumed before the stream on the next read.
    pending: Vec<u8>,
}

impl<S> RconConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Log in with `password`. The server answers with the request id on success and `-1` on
    /// a wrong password.
    pub async fn authenticate(stream: S, password: &str) -> Result<Self, ControlError> {
        let mut connection = Self {
            stream,
            next_id: 0,
            pending: Vec::new(),
        };
        let id = connection.allocate_id();
        timeout(EXCHANGE_TIMEOUT, connection.login(id, password))
            .await
            .map_err(|_| ControlError::Timeout)??;
        Ok(connection)
    }

    /// Run one command and return the body of its first response packet.
    pub async fn execute(&mut self, line: &str) -> Result<String, ControlError> {
        let id = self.allocate_id();
        timeout(EXCHANGE_TIMEOUT, self.exchange(id, line))
            .await
            .map_err(|_| ControlError::Timeout)?
    }

    fn allocate_id(&mut self) -> i32 {
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        self.next_id
    }

    async fn login(&mut self, id: i32, password: &str) -> Result<(), ControlError> {
        self.write_packet(id, SERVERDATA_AUTH, password).await?;
        loop {
            // Servers send an empty RESPONSE_VALUE ahead of the auth response.
            let packet = self.read_packet().await?;
            if packet.kind != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if packet.id == -1 {
                return Err(ControlError::AuthRejected);
            }
            if packet.id == id {
                return Ok(());
            }
            return Err(ControlError::Protocol(format!(
                "auth response for unknown request {}",
                packet.id
            )));
        }
    }

    async fn exchange(&mut self, id: i32, line: &str) -> Result<String, ControlError> {
        self.write_packet(id, SERVERDATA_EXECCOMMAND, line).await?;
        loop {
            let packet = self.read_packet().await?;
            if packet.kind == SERVERDATA_RESPONSE_VALUE && packet.id == id {
                return Ok(packet.body);
            }
            debug!(id = packet.id, kind = packet.kind, "skipping unrelated packet");
        }
    }

    async fn write_packet(&mut self, id: i32, kind: i32, body: &str) -> Result<(), ControlError> {
        let frame = Packet {
            id,
            kind,
            body: body.to_string(),
        }
        .encode();
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait for the peer to end the stream, buffering anything it sends meanwhile.
    pub async fn wait_closed(&mut self) -> Result<(), ControlError> {
        let mut chunk = [0u8; 512];
        loop {
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Ok(());
            }
            if self.pending.len() + read > MAX_PACKET_LEN as usize {
                return Err(ControlError::Protocol(
                    "too much unsolicited console output".into(),
                ));
            }
            debug!(bytes = read, "buffering unsolicited console output");
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ControlError> {
        let buffered = self.pending.len().min(buf.len());
        buf[..buffered].copy_from_slice(&self.pending[..buffered]);
        self.pending.drain(..buffered);
        if buffered < buf.len() {
            self.stream.read_exact(&mut buf[buffered..]).await?;
        }
        Ok(())
    }

    async fn read_i32(&mut self) -> Result<i32, ControlError> {
        let mut raw = [0u8; 4];
        self.read_exact(&mut raw).await?;
        Ok(i32::from_le_bytes(raw))
    }

    async fn read_packet(&mut self) -> Result<Packet, ControlError> {
        let size = self.read_i32().await?;
        if !(HEADER_LEN..=MAX_PACKET_LEN).contains(&size) {
            return Err(ControlError::Protocol(format!("invalid packet size {size}")));
        }
        let id = self.read_i32().await?;
        let kind = self.read_i32().await?;

        let mut rest = vec![0u8; (size - 8) as usize];
        self.read_exact(&mut rest).await?;
        let body_end = rest.iter().position(|byte| *byte == 0).unwrap_or(rest.len());
        let body = String::from_utf8_lossy(&rest[..body_end]).into_owned();

        Ok(Packet { id, kind, body })
    }
}

impl<S> ControlConnection for RconConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn exec<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, Result<String, ControlError>> {
        Box::pin(self.execute(line))
    }

    fn closed(&mut self) -> BoxFuture<'_, Result<(), ControlError>> {
        Box::pin(self.wait_closed())
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.stream.shutdown().await;
        })
    }
}
