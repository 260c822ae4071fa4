//! Colmi BLE Controller
//!
//! Talks to Colmi smart rings over BLE: scanning, the connection lifecycle,
//! command/response correlation and the ring operations built on top.
//!
//! # Example
//!
//! ```ignore
//! use colmi_ble_controller::{BtleplugConnector, Ring, RingConfig, ble, colmi_home};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RingConfig::load_or_create(&colmi_home()?)?;
//!     let adapter = ble::get_adapter().await?;
//!
//!     let ring = Ring::new(BtleplugConnector::new(adapter, &config), config);
//!     let battery = ring.battery().await?;
//!     println!("{}% (charging: {})", battery.level, battery.charging);
//!
//!     ring.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod ble;
mod config;
pub mod correlator;
mod error;
#[cfg(test)]
mod mock;
mod ring;
pub mod session;
pub mod transport;

pub use ble::{BtleplugConnector, BtleplugTransport, RingDevice};
pub use config::{RingConfig, colmi_home};
pub use error::{Error, Result};
pub use ring::{RealtimeMonitor, Ring};
pub use session::{Session, SessionState};
pub use transport::{Connector, DeviceInfoField, Endpoint, Notification, Transport};
