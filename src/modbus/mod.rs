pub mod client;
pub mod codec;
pub mod packet;

pub use client::{Connection, Connector, DeviceClient, TcpConnector};
pub use codec::Value;
