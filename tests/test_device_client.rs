mod common;
use common::*;

use solar_matrix::modbus::packet::ExceptionCode;
use solar_matrix::modbus::{DeviceClient, TcpConnector, Value};
use solar_matrix::retry::RetryPolicy;
use std::time::{Duration, Instant};

fn client(device: &FakeDevice, channels: Channels) -> DeviceClient<TcpConnector> {
    DeviceClient::new(
        device.connector(),
        RetryPolicy::new(3, Duration::from_millis(10)),
        channels,
    )
}

#[tokio::test]
async fn happy_path() -> Result<()> {
    common_setup();
    let device = FakeDevice::start().await;
    let grid = RegisterDescriptor::new("grid_power", 37113, 2, RegisterKind::I32).with_gain(1000.0);
    device.set(&grid, -1500);

    let value = client(&device, Channels::new()).read_value(&grid).await?;

    assert_eq!(value, Value::Real(-1.5));
    assert_eq!(device.requests_for(37113), 1);
    Ok(())
}

#[tokio::test]
async fn exception_is_retried_then_given_up() {
    common_setup();
    let device = FakeDevice::start().await;
    device.reply(32080, Reply::Exception(ExceptionCode::ServerDeviceBusy));
    let channels = Channels::new();
    let mut events = channels.events.subscribe();
    let solar = RegisterDescriptor::new("solar_power", 32080, 2, RegisterKind::I32);

    let err = client(&device, channels).read_value(&solar).await.unwrap_err();

    assert!(matches!(
        err,
        ReadFailure::Exhausted {
            attempts: 3,
            last: DeviceError::Protocol { function: 0x83, code: 0x06 }
        }
    ));
    assert_eq!(device.requests_for(32080), 3);

    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::ReadAttemptFailed { address, .. } => {
                assert_eq!(address, 32080);
                failed += 1;
            }
            Event::ReadExhausted { address, attempts } => {
                assert_eq!((address, attempts), (32080, 3));
                assert_eq!(failed, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(failed, 3);
}

#[tokio::test]
async fn short_response_is_insufficient_data() {
    common_setup();
    let device = FakeDevice::start().await;
    device.reply(32114, Reply::Registers(vec![7]));
    let daily = RegisterDescriptor::new("daily_yield", 32114, 2, RegisterKind::U32).with_gain(100.0);

    let err = client(&device, Channels::new()).read_value(&daily).await.unwrap_err();

    assert!(matches!(
        err,
        ReadFailure::Exhausted {
            attempts: 3,
            last: DeviceError::InsufficientData { expected: 2, got: 1 }
        }
    ));
}

#[tokio::test]
async fn hangup_is_a_connection_error() {
    common_setup();
    let device = FakeDevice::start().await;
    device.reply(30000, Reply::Hangup);

    let err = client(&device, Channels::new()).read(30000, 15).await.unwrap_err();

    assert_eq!(err.attempts, 3);
    assert!(matches!(err.last, DeviceError::Connection(_)));
}

#[tokio::test]
async fn decode_failure_is_not_retried() {
    common_setup();
    let device = FakeDevice::start().await;
    device.reply(32080, Reply::Registers(vec![0, 100]));
    let broken = RegisterDescriptor::new("solar_power", 32080, 2, RegisterKind::I32).with_gain(0.0);

    let err = client(&device, Channels::new()).read_value(&broken).await.unwrap_err();

    assert!(matches!(err, ReadFailure::Decode(DeviceError::Decode(_))));
    assert_eq!(device.requests_for(32080), 1);
}

#[tokio::test]
async fn refused_connection_waits_between_attempts() {
    common_setup();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let delay = Duration::from_millis(50);
    let client = DeviceClient::new(
        TcpConnector::new("127.0.0.1", port, 1),
        RetryPolicy::new(3, delay),
        Channels::new(),
    );

    let started = Instant::now();
    let err = client.read(32080, 2).await.unwrap_err();

    assert_eq!(err.attempts, 3);
    assert!(matches!(err.last, DeviceError::Connection(_)));
    assert!(started.elapsed() >= delay * 2);
}
