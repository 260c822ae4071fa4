//! Transport seam between the protocol engine and a BLE stack

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use colmi_proto::ble::{self, device_info};

use crate::{Error, Result};

/// Standard Device Information characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceInfoField {
    Manufacturer,
    Model,
    HardwareRevision,
    FirmwareRevision,
    SerialNumber,
}

impl DeviceInfoField {
    pub const ALL: [DeviceInfoField; 5] = [
        Self::Manufacturer,
        Self::Model,
        Self::HardwareRevision,
        Self::FirmwareRevision,
        Self::SerialNumber,
    ];
}

/// A characteristic the engine talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    UartWrite,
    UartNotify,
    BigDataWrite,
    BigDataNotify,
    DeviceInfo(DeviceInfoField),
}

impl Endpoint {
    pub const ALL: [Endpoint; 9] = [
        Self::UartWrite,
        Self::UartNotify,
        Self::BigDataWrite,
        Self::BigDataNotify,
        Self::DeviceInfo(DeviceInfoField::Manufacturer),
        Self::DeviceInfo(DeviceInfoField::Model),
        Self::DeviceInfo(DeviceInfoField::HardwareRevision),
        Self::DeviceInfo(DeviceInfoField::FirmwareRevision),
        Self::DeviceInfo(DeviceInfoField::SerialNumber),
    ];

    pub fn uuid_str(self) -> &'static str {
        match self {
            Self::UartWrite => ble::UART_RX_UUID,
            Self::UartNotify => ble::UART_TX_UUID,
            Self::BigDataWrite => ble::BIG_DATA_WRITE_UUID,
            Self::BigDataNotify => ble::BIG_DATA_NOTIFY_UUID,
            Self::DeviceInfo(field) => match field {
                DeviceInfoField::Manufacturer => device_info::MANUFACTURER_UUID,
                DeviceInfoField::Model => device_info::MODEL_UUID,
                DeviceInfoField::HardwareRevision => device_info::HARDWARE_REVISION_UUID,
                DeviceInfoField::FirmwareRevision => device_info::FIRMWARE_REVISION_UUID,
                DeviceInfoField::SerialNumber => device_info::SERIAL_NUMBER_UUID,
            },
        }
    }

    pub fn uuid(self) -> Result<Uuid> {
        Uuid::parse_str(self.uuid_str()).map_err(|_| Error::InvalidUuid(self.uuid_str()))
    }

    /// The UART pair is mandatory, everything else is optional
    pub fn required(self) -> bool {
        matches!(self, Self::UartWrite | Self::UartNotify)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UartWrite => write!(f, "UART write"),
            Self::UartNotify => write!(f, "UART notify"),
            Self::BigDataWrite => write!(f, "big-data write"),
            Self::BigDataNotify => write!(f, "big-data notify"),
            Self::DeviceInfo(field) => write!(f, "device info {field:?}"),
        }
    }
}

/// A value notified by the ring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub endpoint: Endpoint,
    pub data: Vec<u8>,
}

impl Notification {
    pub fn uart(data: impl Into<Vec<u8>>) -> Self {
        Self { endpoint: Endpoint::UartNotify, data: data.into() }
    }

    pub fn big_data(data: impl Into<Vec<u8>>) -> Self {
        Self { endpoint: Endpoint::BigDataNotify, data: data.into() }
    }
}

/// One connected ring
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve the ring's characteristics; fails when a required one is missing
    async fn discover(&self) -> Result<Vec<Endpoint>>;

    /// Start notifications. The channel closes when the link drops.
    async fn subscribe(&self) -> Result<mpsc::Receiver<Notification>>;

    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<()>;

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<()>;
}

/// Produces a fresh transport, used for the first connection and for reconnects
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_uuids_parse() {
        for endpoint in Endpoint::ALL {
            assert!(endpoint.uuid().is_ok(), "{endpoint}");
        }
        assert_eq!(
            Endpoint::UartWrite.uuid().unwrap(),
            Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e)
        );
        assert_eq!(
            Endpoint::DeviceInfo(DeviceInfoField::FirmwareRevision).uuid().unwrap(),
            Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb)
        );
    }

    #[test]
    fn only_uart_is_required() {
        let required: Vec<_> = Endpoint::ALL.into_iter().filter(|e| e.required()).collect();
        assert_eq!(required, vec![Endpoint::UartWrite, Endpoint::UartNotify]);
    }
}
