//! In-memory ring for tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use colmi_proto::{
    BIG_DATA_MAGIC, CMD_BATTERY, CMD_REALTIME_CONTINUE, CMD_START_REALTIME, Packet, Sensor,
};

use crate::transport::{Connector, DeviceInfoField, Endpoint, Notification, Transport};
use crate::{Error, Result};

type Responder = dyn Fn(Endpoint, &[u8]) -> Vec<Notification> + Send + Sync;

/// One night: 23:00 to 01:10, 60 min light then 70 min deep
pub const SLEEP_PAYLOAD: [u8; 11] = [1, 0, 8, 0x64, 0x05, 70, 0, 2, 60, 3, 70];

fn frame(command: u8, sub_data: &[u8]) -> Notification {
    let packet = Packet::new(command, sub_data).unwrap();
    Notification::uart(packet.as_bytes().to_vec())
}

/// Answers the way a ring with default settings does
pub fn ring_responder(endpoint: Endpoint, data: &[u8]) -> Vec<Notification> {
    match endpoint {
        Endpoint::UartWrite => {
            let Ok(packet) = Packet::from_bytes(data) else {
                return Vec::new();
            };
            match packet.id() {
                CMD_BATTERY => vec![frame(CMD_BATTERY, &[85, 0])],
                CMD_START_REALTIME => {
                    let value = if packet.byte(1) == 1 { 70 } else { 98 };
                    vec![frame(CMD_START_REALTIME, &[packet.byte(1), 0, value])]
                }
                // every keepalive yields a fresh heart-rate sample
                CMD_REALTIME_CONTINUE => vec![frame(CMD_START_REALTIME, &[1, 0, 72])],
                id => match Sensor::from_command(id) {
                    // read: report enabled, 60 minutes
                    Some(_) if packet.byte(1) == 1 => vec![frame(id, &[1, 1, 60])],
                    // write: echo the new setting
                    Some(_) => vec![frame(id, &[2, packet.byte(2), packet.byte(3)])],
                    None => Vec::new(),
                },
            }
        }
        Endpoint::BigDataWrite if data.first() == Some(&BIG_DATA_MAGIC) => {
            let mut transfer = vec![BIG_DATA_MAGIC, data[1], SLEEP_PAYLOAD.len() as u8, 0, 0, 0];
            transfer.extend_from_slice(&SLEEP_PAYLOAD);
            transfer.chunks(8).map(Notification::big_data).collect()
        }
        _ => Vec::new(),
    }
}

pub struct MockRing {
    endpoints: Vec<Endpoint>,
    values: HashMap<Endpoint, Vec<u8>>,
    responder: Box<Responder>,
}

impl MockRing {
    pub fn new() -> Self {
        let values = HashMap::from([
            (Endpoint::DeviceInfo(DeviceInfoField::Manufacturer), b"Colmi".to_vec()),
            (Endpoint::DeviceInfo(DeviceInfoField::FirmwareRevision), b"RY02_3.00.17_240102".to_vec()),
        ]);
        Self {
            endpoints: Endpoint::ALL.to_vec(),
            values,
            responder: Box::new(ring_responder),
        }
    }

    pub fn without_uart(mut self) -> Self {
        self.endpoints.retain(|e| !e.required());
        self
    }

    pub fn without_big_data(mut self) -> Self {
        self.endpoints
            .retain(|e| !matches!(e, Endpoint::BigDataWrite | Endpoint::BigDataNotify));
        self
    }

    pub fn respond_with(
        mut self,
        responder: impl Fn(Endpoint, &[u8]) -> Vec<Notification> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Box::new(responder);
        self
    }

    pub fn build(self) -> Arc<MockTransport> {
        Arc::new(MockTransport {
            ring: self,
            writes: Mutex::new(Vec::new()),
            notify: Mutex::new(None),
            connected: AtomicBool::new(true),
        })
    }
}

pub struct MockTransport {
    ring: MockRing,
    writes: Mutex<Vec<(Endpoint, Vec<u8>)>>,
    notify: Mutex<Option<mpsc::Sender<Notification>>>,
    connected: AtomicBool,
}

impl MockTransport {
    pub fn ring() -> Arc<Self> {
        MockRing::new().build()
    }

    pub fn writes(&self, endpoint: Endpoint) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Command ids written to the UART, in order
    pub fn commands(&self) -> Vec<u8> {
        self.writes(Endpoint::UartWrite).iter().map(|w| w[0]).collect()
    }

    pub fn push(&self, notification: Notification) {
        if let Some(tx) = self.notify.lock().unwrap().as_ref() {
            tx.try_send(notification).unwrap();
        }
    }

    /// Simulate the ring going out of range
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.notify.lock().unwrap().take();
    }

    /// Link reported down while notifications keep flowing
    pub fn lose_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn discover(&self) -> Result<Vec<Endpoint>> {
        for endpoint in [Endpoint::UartWrite, Endpoint::UartNotify] {
            if !self.ring.endpoints.contains(&endpoint) {
                return Err(Error::MissingCharacteristic(endpoint));
            }
        }
        Ok(self.ring.endpoints.clone())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Notification>> {
        let (tx, rx) = mpsc::channel(64);
        *self.notify.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<()> {
        if !self.connected() {
            return Err(Error::Disconnected);
        }
        self.writes.lock().unwrap().push((endpoint, data.to_vec()));
        for notification in (self.ring.responder)(endpoint, data) {
            self.push(notification);
        }
        Ok(())
    }

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>> {
        Ok(self.ring.values.get(&endpoint).cloned().unwrap_or_default())
    }

    async fn is_connected(&self) -> bool {
        self.connected()
    }

    async fn disconnect(&self) -> Result<()> {
        self.drop_link();
        Ok(())
    }
}

/// Hands out prepared transports, one per connect
pub struct MockConnector {
    transports: Mutex<VecDeque<Arc<MockTransport>>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new(transports: impl IntoIterator<Item = Arc<MockTransport>>) -> Self {
        Self {
            transports: Mutex::new(transports.into_iter().collect()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for Arc<MockConnector> {
    async fn connect(&self) -> Result<Arc<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.transports.lock().unwrap().pop_front() {
            Some(transport) => Ok(transport),
            None => Err(Error::DeviceNotFound),
        }
    }
}
