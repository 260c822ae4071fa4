//! Ring client: the operations a user runs against a ring, with reconnect on drop

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use tokio::sync::{Mutex, broadcast, watch};

use colmi_proto::{
    BIG_DATA_SLEEP, Battery, DeviceInfo, Reading, RealtimeKind, Sensor, SensorSettings,
    SleepDay, continue_realtime, decode_sleep, encode_time, format_value, start_realtime,
    stop_realtime,
};

use crate::config::RingConfig;
use crate::session::{Session, SessionState};
use crate::transport::{Connector, DeviceInfoField, Endpoint};
use crate::{Error, Result};

pub struct Ring {
    connector: Box<dyn Connector>,
    config: RingConfig,
    session: Mutex<Option<Arc<Session>>>,
}

impl Ring {
    pub fn new(connector: impl Connector + 'static, config: RingConfig) -> Self {
        Self {
            connector: Box::new(connector),
            config,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// State of the current session, if one was ever opened
    pub async fn state(&self) -> Option<SessionState> {
        self.session.lock().await.as_ref().map(|s| s.state())
    }

    /// A Ready session, reconnecting when the last one dropped
    pub async fn session(&self) -> Result<Arc<Session>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref()
            && session.is_alive().await
        {
            return Ok(session.clone());
        }

        if let Some(stale) = slot.take() {
            info!("session lost, reconnecting");
            if let Err(e) = stale.close().await {
                debug!("closing stale session: {e}");
            }
        }
        let session = self.connect_with_retry().await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    async fn connect_with_retry(&self) -> Result<Arc<Session>> {
        let attempts = self.config.reconnect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.connect_once().await {
                Ok(session) => return Ok(session),
                Err(e) if attempt >= attempts => {
                    return Err(Error::ReconnectFailed { attempts, source: Box::new(e) });
                }
                Err(e) => {
                    warn!("connect attempt {attempt}/{attempts} failed: {e}");
                    attempt += 1;
                    tokio::time::sleep(self.config.reconnect_backoff()).await;
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<Arc<Session>> {
        let transport = self.connector.connect().await?;
        match Session::establish(transport.clone(), &self.config).await {
            Ok(session) => Ok(Arc::new(session)),
            Err(e) => {
                let _ = transport.disconnect().await;
                Err(e)
            }
        }
    }

    pub async fn battery(&self) -> Result<Battery> {
        let response = self.session().await?.request(Battery::request()).await?;
        Ok(Battery::decode(&response)?)
    }

    /// Set the ring's clock; the ring does not acknowledge this
    pub async fn set_time(&self, at: NaiveDateTime) -> Result<()> {
        let packet = encode_time(at)?;
        self.session().await?.send(packet).await
    }

    pub async fn sensor_settings(&self, sensor: Sensor) -> Result<SensorSettings> {
        let response = self.session().await?.request(sensor.read_request()).await?;
        Ok(SensorSettings::decode(&response)?)
    }

    /// Settings of every sensor that answered in time
    pub async fn all_sensor_settings(&self) -> Result<Vec<SensorSettings>> {
        let mut all = Vec::with_capacity(Sensor::ALL.len());
        for sensor in Sensor::ALL {
            match self.sensor_settings(sensor).await {
                Ok(settings) => all.push(settings),
                Err(Error::Timeout { .. }) => warn!("{} settings did not answer", sensor.name()),
                Err(e) => return Err(e),
            }
        }
        Ok(all)
    }

    /// Write a sensor setting, returning what the ring reports back
    pub async fn set_sensor_settings(&self, settings: SensorSettings) -> Result<SensorSettings> {
        let packet = settings.write_request()?;
        let response = self.session().await?.request(packet).await?;
        Ok(SensorSettings::decode(&response)?)
    }

    pub async fn set_heart_rate_log(&self, enabled: bool, interval_minutes: u8) -> Result<SensorSettings> {
        self.set_sensor_settings(SensorSettings::heart_rate(enabled, interval_minutes)?)
            .await
    }

    pub async fn set_sensor(&self, sensor: Sensor, enabled: bool) -> Result<SensorSettings> {
        self.set_sensor_settings(SensorSettings::toggle(sensor, enabled)).await
    }

    /// Start a real-time measurement; samples are pulled from the returned monitor
    pub async fn start_realtime(&self, kind: RealtimeKind) -> Result<RealtimeMonitor> {
        let session = self.session().await?;
        // subscribe first so the first sample is not missed
        let readings = session.readings();
        session.send(start_realtime(kind)).await?;
        info!("started {kind:?} measurement");

        Ok(RealtimeMonitor {
            state: session.watch_state(),
            session,
            kind,
            readings,
            keepalive: self.config.keepalive(kind),
        })
    }

    /// Sleep history; `today` anchors the ring's "days ago" counter
    pub async fn sleep(&self, today: NaiveDate) -> Result<Vec<SleepDay>> {
        let frame = self.session().await?.request_big_data(BIG_DATA_SLEEP).await?;
        debug!("sleep payload {} bytes, crc 0x{:04x}", frame.payload.len(), frame.crc);
        Ok(decode_sleep(&frame.payload, today)?)
    }

    /// Device Information values; characteristics the ring lacks are left empty
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let session = self.session().await?;
        let mut info = DeviceInfo::default();

        for field in DeviceInfoField::ALL {
            let endpoint = Endpoint::DeviceInfo(field);
            if !session.supports(endpoint) {
                continue;
            }
            let value = match session.read(endpoint).await {
                Ok(raw) => format_value(&raw),
                Err(e) => {
                    warn!("could not read {endpoint}: {e}");
                    None
                }
            };
            let slot = match field {
                DeviceInfoField::Manufacturer => &mut info.manufacturer,
                DeviceInfoField::Model => &mut info.model,
                DeviceInfoField::HardwareRevision => &mut info.hardware_revision,
                DeviceInfoField::FirmwareRevision => &mut info.firmware_revision,
                DeviceInfoField::SerialNumber => &mut info.serial_number,
            };
            *slot = value;
        }

        Ok(info)
    }

    /// Unsolicited readings from the current session
    pub async fn readings(&self) -> Result<broadcast::Receiver<Reading>> {
        Ok(self.session().await?.readings())
    }

    pub async fn disconnect(&self) -> Result<()> {
        match self.session.lock().await.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }
}

/// A running real-time measurement
///
/// The ring stops measuring unless it keeps hearing keepalives, so one is sent
/// after every sample and whenever `keepalive` passes without one.
pub struct RealtimeMonitor {
    session: Arc<Session>,
    kind: RealtimeKind,
    readings: broadcast::Receiver<Reading>,
    state: watch::Receiver<SessionState>,
    keepalive: Duration,
}

impl RealtimeMonitor {
    pub fn kind(&self) -> RealtimeKind {
        self.kind
    }

    /// Wait for the next valid sample of this measurement
    ///
    /// Fails with [`Error::Disconnected`] as soon as the session drops.
    pub async fn next(&mut self) -> Result<Reading> {
        loop {
            let received = tokio::select! {
                _ = self.state.wait_for(|s| *s == SessionState::Disconnected) => {
                    return Err(Error::Disconnected);
                }
                received = tokio::time::timeout(self.keepalive, self.readings.recv()) => received,
            };
            match received {
                Ok(Ok(reading)) if reading.kind() == Some(self.kind) => {
                    self.session.send(continue_realtime()).await?;
                    return Ok(reading);
                }
                Ok(Ok(_)) => {}
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!("skipped {skipped} readings");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return Err(Error::Disconnected),
                Err(_) => {
                    debug!("no {:?} sample within {:?}", self.kind, self.keepalive);
                    self.session.send(continue_realtime()).await?;
                }
            }
        }
    }

    pub async fn stop(self) -> Result<()> {
        self.session.send(stop_realtime(self.kind)).await?;
        info!("stopped {:?} measurement", self.kind);
        Ok(())
    }
}
