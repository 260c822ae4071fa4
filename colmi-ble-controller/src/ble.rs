//! btleplug transport: scanning, connecting and talking GATT to a ring

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};

use colmi_proto::ble::is_compatible_name;

use crate::config::RingConfig;
use crate::transport::{Connector, Endpoint, Notification, Transport};
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const NOTIFICATION_BUFFER: usize = 256;

/// A device seen while scanning
#[derive(Debug, Clone, Serialize)]
pub struct RingDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    pub is_compatible: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(Error::NoAdapter)
}

/// Scan for BLE devices
///
/// Only compatible rings are returned unless `all` is set.
pub async fn scan<S: AsRef<str>>(
    adapter: &Adapter,
    duration: Duration,
    prefixes: &[S],
    all: bool,
) -> Result<Vec<RingDevice>> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut seen: HashMap<String, RingDevice> = HashMap::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            let is_compatible = is_compatible_name(&name, prefixes);

            seen.insert(
                address.clone(),
                RingDevice { name, address, rssi: props.rssi, is_compatible },
            );
        }
    }

    adapter.stop_scan().await?;

    let mut devices: Vec<RingDevice> = seen
        .into_values()
        .filter(|d| all || d.is_compatible)
        .collect();
    devices.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.address.cmp(&b.address)));
    Ok(devices)
}

fn matches_target(name: &str, address: &str, target: &str) -> bool {
    name.contains(target) || address.eq_ignore_ascii_case(target)
}

/// Find a ring by name/address pattern, or the first compatible ring
pub async fn find_device<S: AsRef<str>>(
    adapter: &Adapter,
    target: Option<&str>,
    duration: Duration,
    prefixes: &[S],
) -> Result<Peripheral> {
    adapter.start_scan(ScanFilter::default()).await?;
    let deadline = tokio::time::Instant::now() + duration;

    loop {
        for peripheral in adapter.peripherals().await? {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            let name = props.local_name.unwrap_or_default();
            let address = peripheral.address().to_string();

            let found = match target {
                Some(t) => matches_target(&name, &address, t),
                None => is_compatible_name(&name, prefixes),
            };
            if found {
                adapter.stop_scan().await?;
                info!("found {name} ({address})");
                return Ok(peripheral);
            }
        }

        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    adapter.stop_scan().await?;
    Err(Error::DeviceNotFound)
}

/// A connected ring over btleplug
pub struct BtleplugTransport {
    adapter: Adapter,
    peripheral: Peripheral,
    characteristics: RwLock<HashMap<Endpoint, Characteristic>>,
}

impl BtleplugTransport {
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self { adapter, peripheral, characteristics: RwLock::new(HashMap::new()) }
    }

    async fn characteristic(&self, endpoint: Endpoint) -> Result<Characteristic> {
        self.characteristics
            .read()
            .await
            .get(&endpoint)
            .cloned()
            .ok_or(Error::MissingCharacteristic(endpoint))
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn discover(&self) -> Result<Vec<Endpoint>> {
        self.peripheral.discover_services().await?;
        let available = self.peripheral.characteristics();

        let mut found = HashMap::new();
        let mut negotiated = Vec::new();
        for endpoint in Endpoint::ALL {
            let uuid = endpoint.uuid()?;
            match available.iter().find(|c| c.uuid == uuid) {
                Some(c) => {
                    found.insert(endpoint, c.clone());
                    negotiated.push(endpoint);
                }
                None if endpoint.required() => return Err(Error::MissingCharacteristic(endpoint)),
                None => debug!("ring does not offer {endpoint}"),
            }
        }

        *self.characteristics.write().await = found;
        Ok(negotiated)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Notification>> {
        let uart = self.characteristic(Endpoint::UartNotify).await?;
        self.peripheral.subscribe(&uart).await?;

        let big_data = self.characteristic(Endpoint::BigDataNotify).await.ok();
        if let Some(c) = &big_data {
            self.peripheral.subscribe(c).await?;
        }
        let big_data_uuid = big_data.map(|c| c.uuid);

        let mut notifications = self.peripheral.notifications().await?;
        let mut events = self.adapter.events().await?;
        let id = self.peripheral.id();
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.next() => {
                        let Some(notification) = notification else {
                            debug!("notification stream ended");
                            break;
                        };
                        let endpoint = if notification.uuid == uart.uuid {
                            Some(Endpoint::UartNotify)
                        } else if Some(notification.uuid) == big_data_uuid {
                            Some(Endpoint::BigDataNotify)
                        } else {
                            None
                        };
                        if let Some(endpoint) = endpoint {
                            let forwarded = Notification { endpoint, data: notification.value };
                            if tx.send(forwarded).await.is_err() {
                                break;
                            }
                        }
                    }
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                            info!("ring disconnected");
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<()> {
        let c = self.characteristic(endpoint).await?;
        let write_type = if c.properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        self.peripheral.write(&c, data, write_type).await?;
        Ok(())
    }

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>> {
        let c = self.characteristic(endpoint).await?;
        Ok(self.peripheral.read(&c).await?)
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        if let Err(e) = self.peripheral.disconnect().await {
            warn!("disconnect failed: {e}");
        }
        Ok(())
    }
}

/// Scans for the configured ring and connects to it
pub struct BtleplugConnector {
    adapter: Adapter,
    target: Option<String>,
    scan_duration: Duration,
    prefixes: Vec<String>,
}

impl BtleplugConnector {
    pub fn new(adapter: Adapter, config: &RingConfig) -> Self {
        Self {
            adapter,
            target: config.device.clone(),
            scan_duration: config.scan_duration(),
            prefixes: config.name_prefixes.clone(),
        }
    }
}

#[async_trait]
impl Connector for BtleplugConnector {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        let peripheral = find_device(
            &self.adapter,
            self.target.as_deref(),
            self.scan_duration,
            &self.prefixes,
        )
        .await?;

        if !peripheral.is_connected().await? {
            tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect())
                .await
                .map_err(|_| Error::ConnectTimeout(CONNECT_TIMEOUT))??;
        }

        Ok(Arc::new(BtleplugTransport::new(self.adapter.clone(), peripheral)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_matching() {
        assert!(matches_target("R02_AC04", "AA:BB:CC:DD:EE:FF", "AC04"));
        assert!(matches_target("R02_AC04", "AA:BB:CC:DD:EE:FF", "aa:bb:cc:dd:ee:ff"));
        assert!(!matches_target("R02_AC04", "AA:BB:CC:DD:EE:FF", "AA:BB"));
        assert!(!matches_target("R06_1234", "11:22:33:44:55:66", "AC04"));
    }
}
