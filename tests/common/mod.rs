#![allow(dead_code)]

pub use solar_matrix::prelude::*;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use solar_matrix::display::Frame;
use solar_matrix::modbus::codec;
use solar_matrix::modbus::packet::{ExceptionCode, ReadHoldingRequest, Response, HEADER_LEN};
use solar_matrix::modbus::{Connection, Connector, TcpConnector};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

// FakeDevice {{{
#[derive(Clone, Debug)]
pub enum Reply {
    Registers(Vec<u16>),
    Exception(ExceptionCode),
    Hangup,
}

/// Modbus TCP server on localhost answering holding-register reads from a table.
/// Unknown addresses get an illegal-data-address exception.
pub struct FakeDevice {
    port: u16,
    replies: Arc<Mutex<HashMap<u16, Reply>>>,
    requests: Arc<Mutex<Vec<ReadHoldingRequest>>>,
    handle: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let replies = Arc::new(Mutex::new(HashMap::new()));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let replies = replies.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let replies = replies.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, replies, requests).await;
                    });
                }
            })
        };

        Self {
            port,
            replies,
            requests,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn reply(&self, address: u16, reply: Reply) {
        self.replies.lock().unwrap().insert(address, reply);
    }

    pub fn set(&self, register: &RegisterDescriptor, raw: i64) {
        self.reply(register.address, Reply::Registers(codec::encode(raw, register.kind)));
    }

    pub fn requests_for(&self, address: u16) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.address == address)
            .count()
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new("127.0.0.1", self.port, 1).with_timeouts(Duration::from_secs(1), Duration::from_secs(1))
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut socket: TcpStream,
    replies: Arc<Mutex<HashMap<u16, Reply>>>,
    requests: Arc<Mutex<Vec<ReadHoldingRequest>>>,
) -> Result<()> {
    loop {
        let mut frame = vec![0u8; HEADER_LEN];
        if socket.read_exact(&mut frame).await.is_err() {
            return Ok(());
        }
        let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
        let mut pdu = vec![0u8; length.saturating_sub(1)];
        socket.read_exact(&mut pdu).await?;
        frame.extend(pdu);

        let request = ReadHoldingRequest::decode(&frame)?;
        requests.lock().unwrap().push(request);

        let reply = replies.lock().unwrap().get(&request.address).cloned();
        let response = match reply {
            Some(Reply::Registers(words)) => Response::registers(request.transaction_id, request.unit_id, words),
            Some(Reply::Exception(code)) => Response::exception(request.transaction_id, request.unit_id, code),
            Some(Reply::Hangup) => return Ok(()),
            None => Response::exception(
                request.transaction_id,
                request.unit_id,
                ExceptionCode::IllegalDataAddress,
            ),
        };
        socket.write_all(&response.bytes()).await?;
    }
}
// }}}

// MemoryDevice {{{
/// In-process register table for tests on paused time, where a socket would
/// keep the clock from advancing. Every read costs `latency` of tokio time.
#[derive(Clone, Default)]
pub struct MemoryDevice {
    registers: Arc<Mutex<HashMap<u16, Vec<u16>>>>,
    reads: Arc<Mutex<Vec<(u16, Instant)>>>,
    latency: Duration,
}

impl MemoryDevice {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub fn set(&self, register: &RegisterDescriptor, raw: i64) {
        self.registers
            .lock()
            .unwrap()
            .insert(register.address, codec::encode(raw, register.kind));
    }

    /// Address and start time of every read, oldest first.
    pub fn reads(&self) -> Vec<(u16, Instant)> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MemoryDevice {
    async fn open(&self) -> Result<Box<dyn Connection>, DeviceError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl Connection for MemoryDevice {
    async fn read_holding_registers(&mut self, address: u16, _count: u16) -> Result<Vec<u16>, DeviceError> {
        self.reads.lock().unwrap().push((address, Instant::now()));
        tokio::time::sleep(self.latency).await;

        let words = self.registers.lock().unwrap().get(&address).cloned();
        words.ok_or(DeviceError::Protocol {
            function: 0x83,
            code: 0x02,
        })
    }

    async fn close(&mut self) {}
}
// }}}

#[derive(Clone)]
pub struct FixedClock(Arc<Mutex<NaiveDateTime>>);

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

/// Keeps every frame it is given.
#[derive(Clone, Default)]
pub struct RecordingMatrix(Arc<Mutex<Vec<Frame>>>);

impl RecordingMatrix {
    pub fn frames(&self) -> Vec<Frame> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Frame> {
        self.0.lock().unwrap().last().copied()
    }

    pub fn reset(&self) {
        self.0.lock().unwrap().clear();
    }
}

impl LedMatrix for RecordingMatrix {
    fn set_pixels(&mut self, frame: &Frame) -> Result<()> {
        self.0.lock().unwrap().push(*frame);
        Ok(())
    }
}

/// Instant animations, fast retries, files under `dir`.
pub fn test_config(dir: &Path, port: u16) -> ConfigWrapper {
    let yaml = format!(
        "inverter:
  host: 127.0.0.1
  port: {port}
  connect_timeout: 1
  read_timeout: 1
  retry_delay_ms: 10
storage:
  solar_file: {dir}/solar.csv
  grid_file: {dir}/grid.csv
  daily_yield_file: {dir}/daily.json
display:
  device: log
  scroll_speed_ms: 0
  wave_speed_ms: 0
  max_animation: 0
watchdog:
  enabled: false
",
        port = port,
        dir = dir.display()
    );

    ConfigWrapper::from_config(Config::from_yaml(&yaml).unwrap())
}
