pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::{
    channels::{Channels, Event},
    config::{self, Config, ConfigWrapper},
    display::{LedMatrix, Rgb},
    error::{DeviceError, ReadFailure, StoreError},
    modbus,
    register::{RegisterDescriptor, RegisterKind},
    scheduler::{Clock, SystemClock},
    store::{Sample, TimeSeriesStore},
};
