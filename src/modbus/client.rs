use crate::prelude::*;
use crate::modbus::codec::Value;
use crate::modbus::packet::{FrameDecoder, ReadHoldingRequest, Response};
use crate::retry::{Exhausted, RetryPolicy};

use {
    async_trait::async_trait,
    bytes::BytesMut,
    std::sync::atomic::{AtomicU16, Ordering},
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::TcpStream,
    tokio_util::codec::Decoder,
};

// Connection {{{
/// One open link to the device, good for a single read.
#[async_trait]
pub trait Connection: Send {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, DeviceError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Connection>, DeviceError>;
}
// }}}

// TcpConnector {{{
pub struct TcpConnector {
    host: String,
    port: u16,
    unit_id: u8,
    connect_timeout: Duration,
    read_timeout: Duration,
    transaction_id: AtomicU16,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, unit_id: u8) -> Self {
        Self {
            host: host.to_string(),
            port,
            unit_id,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            transaction_id: AtomicU16::new(1),
        }
    }

    pub fn from_config(inverter: &config::Inverter) -> Self {
        Self::new(inverter.host(), inverter.port(), inverter.unit_id())
            .with_timeouts(inverter.connect_timeout(), inverter.read_timeout())
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self) -> Result<Box<dyn Connection>, DeviceError> {
        let target = (self.host.as_str(), self.port);

        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                return Err(DeviceError::Connection(format!(
                    "connect to {}:{} timed out after {:?}",
                    self.host, self.port, self.connect_timeout
                )))
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY: {}", err);
        }
        trace!("connected to {}:{}", self.host, self.port);

        Ok(Box::new(TcpConnection {
            stream: Some(stream),
            unit_id: self.unit_id,
            read_timeout: self.read_timeout,
            transaction_id: self.transaction_id.fetch_add(1, Ordering::Relaxed),
        }))
    }
}

struct TcpConnection {
    stream: Option<TcpStream>,
    unit_id: u8,
    read_timeout: Duration,
    transaction_id: u16,
}

impl TcpConnection {
    async fn receive(stream: &mut TcpStream) -> Result<Response, DeviceError> {
        let mut buf = BytesMut::with_capacity(512);
        let mut decoder = FrameDecoder::new();

        loop {
            if let Some(response) = decoder
                .decode(&mut buf)
                .map_err(|err| DeviceError::Connection(format!("malformed frame: {}", err)))?
            {
                return Ok(response);
            }

            if stream.read_buf(&mut buf).await? == 0 {
                return Err(DeviceError::Connection("connection closed by peer".to_string()));
            }
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>, DeviceError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DeviceError::Connection("connection already closed".to_string()))?;

        let request = ReadHoldingRequest {
            transaction_id: self.transaction_id,
            unit_id: self.unit_id,
            address,
            count,
        };
        stream.write_all(&request.bytes()).await?;

        let response = match tokio::time::timeout(self.read_timeout, Self::receive(stream)).await {
            Ok(response) => response?,
            Err(_) => {
                return Err(DeviceError::Connection(format!(
                    "no response within {:?}",
                    self.read_timeout
                )))
            }
        };

        if response.transaction_id() != self.transaction_id {
            return Err(DeviceError::Connection(format!(
                "transaction id mismatch: sent {}, got {}",
                self.transaction_id,
                response.transaction_id()
            )));
        }

        match response {
            Response::Registers { words, .. } => Ok(words),
            Response::Exception { function, code, .. } => Err(DeviceError::Protocol { function, code }),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!("error closing device connection: {}", err);
            }
        }
    }
}
// }}}

// DeviceClient {{{
/// Reads registers with a fresh connection per attempt.
pub struct DeviceClient<C> {
    connector: C,
    policy: RetryPolicy,
    channels: Channels,
}

impl<C: Connector> DeviceClient<C> {
    pub fn new(connector: C, policy: RetryPolicy, channels: Channels) -> Self {
        Self {
            connector,
            policy,
            channels,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn read(&self, address: u16, count: u16) -> Result<Vec<u16>, Exhausted<DeviceError>> {
        let attempts = self.policy.attempts();

        let result = self
            .policy
            .run(
                |_| self.attempt(address, count),
                |attempt, err| {
                    warn!(
                        "read {}x{} attempt {}/{} failed: {}",
                        address, count, attempt, attempts, err
                    );
                    self.channels.emit(Event::ReadAttemptFailed {
                        address,
                        attempt,
                        attempts,
                        reason: err.to_string(),
                    });
                },
            )
            .await;

        if let Err(exhausted) = &result {
            error!("read {}x{} gave up: {}", address, count, exhausted);
            self.channels.emit(Event::ReadExhausted {
                address,
                attempts: exhausted.attempts,
            });
        }

        result
    }

    pub async fn read_value(&self, register: &RegisterDescriptor) -> Result<Value, ReadFailure> {
        let words = self
            .read(register.address, register.count)
            .await
            .map_err(|e| ReadFailure::Exhausted {
                attempts: e.attempts,
                last: e.last,
            })?;

        register.decode(&words).map_err(ReadFailure::Decode)
    }

    async fn attempt(&self, address: u16, count: u16) -> Result<Vec<u16>, DeviceError> {
        let mut connection = self.connector.open().await?;
        let result = connection.read_holding_registers(address, count).await;
        connection.close().await;

        let mut words = result?;
        if words.len() < count as usize {
            return Err(DeviceError::InsufficientData {
                expected: count as usize,
                got: words.len(),
            });
        }
        words.truncate(count as usize);

        Ok(words)
    }
}
// }}}
