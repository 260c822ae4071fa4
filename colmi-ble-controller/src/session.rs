//! Session: one connection to a ring and the state it is in

use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use colmi_proto::{
    BigDataFrame, CMD_START_REALTIME, Packet, Reading, RealtimeSample, big_data_request,
};

use crate::config::RingConfig;
use crate::correlator::Correlator;
use crate::transport::{Endpoint, Notification, Transport};
use crate::{Error, Result};

/// Readings buffered for slow subscribers
const READINGS_CAPACITY: usize = 64;

/// Connection lifecycle
///
/// The ring has no pairing handshake; a session counts as authenticated once
/// the UART notification subscription is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Discovering,
    Connected,
    Authenticated,
    Ready,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Discovering)
                | (Discovering, Connected)
                | (Connected, Authenticated)
                | (Authenticated, Ready)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Discovering => "discovering",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Move to `next`, rejecting transitions the lifecycle does not allow
fn transition(state: &watch::Sender<SessionState>, next: SessionState) -> Result<()> {
    let mut result = Ok(());
    state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            result = Err(Error::InvalidTransition { from: *current, to: next });
            return false;
        }
        info!("session {current} -> {next}");
        *current = next;
        true
    });
    result
}

pub struct Session {
    transport: Arc<dyn Transport>,
    state: Arc<watch::Sender<SessionState>>,
    correlator: Arc<Correlator>,
    readings: broadcast::Sender<Reading>,
    negotiated: Vec<Endpoint>,
    listener: JoinHandle<()>,
}

impl Session {
    /// Bring a fresh transport up to Ready
    pub async fn establish(transport: Arc<dyn Transport>, config: &RingConfig) -> Result<Self> {
        let state = Arc::new(watch::Sender::new(SessionState::Disconnected));

        match Self::handshake(&transport, &state).await {
            Ok((negotiated, notifications)) => {
                let correlator = Arc::new(Correlator::new(
                    config.command_timeout(),
                    config.big_data_timeout(),
                ));
                let (readings, _) = broadcast::channel(READINGS_CAPACITY);

                let listener = tokio::spawn(listen(
                    notifications,
                    state.clone(),
                    correlator.clone(),
                    readings.clone(),
                ));
                transition(&state, SessionState::Ready)?;

                Ok(Self { transport, state, correlator, readings, negotiated, listener })
            }
            Err(e) => {
                let _ = transition(&state, SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn handshake(
        transport: &Arc<dyn Transport>,
        state: &watch::Sender<SessionState>,
    ) -> Result<(Vec<Endpoint>, mpsc::Receiver<Notification>)> {
        transition(state, SessionState::Discovering)?;
        let negotiated = transport.discover().await?;
        debug!("negotiated {negotiated:?}");

        transition(state, SessionState::Connected)?;
        let notifications = transport.subscribe().await?;

        transition(state, SessionState::Authenticated)?;
        Ok((negotiated, notifications))
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            other => Err(Error::NotReady(other)),
        }
    }

    /// Ready, and the transport still reports the link up
    pub async fn is_alive(&self) -> bool {
        self.state() == SessionState::Ready && self.transport.is_connected().await
    }

    pub fn supports(&self, endpoint: Endpoint) -> bool {
        self.negotiated.contains(&endpoint)
    }

    fn require(&self, endpoint: Endpoint) -> Result<()> {
        if self.supports(endpoint) {
            Ok(())
        } else {
            Err(Error::MissingCharacteristic(endpoint))
        }
    }

    /// Send a UART command and wait for the frame answering it
    pub async fn request(&self, packet: Packet) -> Result<Packet> {
        self.ensure_ready()?;
        self.correlator
            .request(packet, self.transport.write(Endpoint::UartWrite, packet.as_bytes()))
            .await
    }

    /// Send a UART command the ring does not answer
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.ensure_ready()?;
        self.correlator
            .send(packet, self.transport.write(Endpoint::UartWrite, packet.as_bytes()))
            .await
    }

    pub async fn request_big_data(&self, data_id: u8) -> Result<BigDataFrame> {
        self.ensure_ready()?;
        self.require(Endpoint::BigDataWrite)?;
        self.require(Endpoint::BigDataNotify)?;

        let request = big_data_request(data_id);
        self.correlator
            .request_big_data(data_id, self.transport.write(Endpoint::BigDataWrite, &request))
            .await
    }

    /// Read a characteristic directly, e.g. Device Information values
    pub async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>> {
        self.ensure_ready()?;
        self.require(endpoint)?;
        self.transport.read(endpoint).await
    }

    /// Unsolicited readings (real-time samples, battery pushes)
    pub fn readings(&self) -> broadcast::Receiver<Reading> {
        self.readings.subscribe()
    }

    pub async fn close(&self) -> Result<()> {
        transition(&self.state, SessionState::Disconnected)?;
        self.correlator.fail_all().await;
        self.listener.abort();
        self.transport.disconnect().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Notification loop; runs until the transport closes the channel
async fn listen(
    mut notifications: mpsc::Receiver<Notification>,
    state: Arc<watch::Sender<SessionState>>,
    correlator: Arc<Correlator>,
    readings: broadcast::Sender<Reading>,
) {
    while let Some(notification) = notifications.recv().await {
        match notification.endpoint {
            Endpoint::UartNotify => on_uart(&notification.data, &correlator, &readings).await,
            Endpoint::BigDataNotify => correlator.feed_big_data(&notification.data).await,
            other => debug!("ignoring notification from {other}"),
        }
    }

    warn!("notification stream closed");
    let _ = transition(&state, SessionState::Disconnected);
    correlator.fail_all().await;
}

async fn on_uart(data: &[u8], correlator: &Correlator, readings: &broadcast::Sender<Reading>) {
    let packet = match Packet::from_bytes(data) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("dropping frame {}: {e}", data_encoding::HEXLOWER.encode(data));
            return;
        }
    };

    let Some(packet) = correlator.resolve(packet).await else {
        return;
    };

    if packet.id() == CMD_START_REALTIME
        && let Ok(sample) = RealtimeSample::decode(&packet)
        && sample.error_code != 0
    {
        warn!("{:?} measurement error code {}", sample.kind, sample.error_code);
    }

    match Reading::decode(&packet) {
        // no subscribers is fine
        Some(reading) => {
            let _ = readings.send(reading);
        }
        None => debug!("unsolicited {packet:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRing, MockTransport};
    use colmi_proto::{Battery, CMD_BATTERY, Metric};
    use std::time::Duration;

    #[test]
    fn allowed_transitions() {
        use SessionState::*;
        assert!(Disconnected.can_transition_to(Discovering));
        assert!(Discovering.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Ready));
        for state in [Discovering, Connected, Authenticated, Ready] {
            assert!(state.can_transition_to(Disconnected));
        }

        assert!(!Disconnected.can_transition_to(Ready));
        assert!(!Discovering.can_transition_to(Authenticated));
        assert!(!Ready.can_transition_to(Connected));
    }

    #[test]
    fn transition_rejects_skips() {
        let state = watch::Sender::new(SessionState::Disconnected);
        assert!(matches!(
            transition(&state, SessionState::Ready),
            Err(Error::InvalidTransition {
                from: SessionState::Disconnected,
                to: SessionState::Ready
            })
        ));
        assert!(transition(&state, SessionState::Discovering).is_ok());
        assert_eq!(*state.borrow(), SessionState::Discovering);
    }

    #[tokio::test]
    async fn establish_reaches_ready() {
        let mock = MockTransport::ring();
        let session = Session::establish(mock.clone(), &RingConfig::default()).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.supports(Endpoint::BigDataWrite));

        let response = session.request(Battery::request()).await.unwrap();
        assert_eq!(response.id(), CMD_BATTERY);
        assert_eq!(mock.writes(Endpoint::UartWrite), vec![Battery::request().as_bytes().to_vec()]);
    }

    #[tokio::test]
    async fn discovery_failure_leaves_no_session() {
        let mock = MockRing::new().without_uart().build();
        let result = Session::establish(mock, &RingConfig::default()).await;
        assert!(matches!(result, Err(Error::MissingCharacteristic(Endpoint::UartWrite))));
    }

    #[tokio::test]
    async fn bad_frames_are_dropped_and_readings_broadcast() {
        let mock = MockTransport::ring();
        let session = Session::establish(mock.clone(), &RingConfig::default()).await.unwrap();
        let mut readings = session.readings();

        mock.push(Notification::uart(vec![0x69, 1, 0]));
        let mut corrupt = *Packet::new(CMD_START_REALTIME, &[1, 0, 70]).unwrap().as_bytes();
        corrupt[15] ^= 0xff;
        mock.push(Notification::uart(corrupt.to_vec()));
        mock.push(Notification::uart(
            Packet::new(CMD_START_REALTIME, &[1, 0, 71]).unwrap().as_bytes().to_vec(),
        ));

        let reading = tokio::time::timeout(Duration::from_secs(1), readings.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reading.metric, Metric::HeartRate { bpm: 71 });
    }

    #[tokio::test]
    async fn link_drop_disconnects_and_gates_commands() {
        let mock = MockTransport::ring();
        let session = Session::establish(mock.clone(), &RingConfig::default()).await.unwrap();
        let mut state = session.watch_state();

        mock.drop_link();
        state.wait_for(|s| *s == SessionState::Disconnected).await.unwrap();

        assert!(matches!(
            session.request(Battery::request()).await,
            Err(Error::NotReady(SessionState::Disconnected))
        ));
    }

    #[tokio::test]
    async fn silent_link_loss_is_not_alive() {
        let mock = MockTransport::ring();
        let session = Session::establish(mock.clone(), &RingConfig::default()).await.unwrap();
        assert!(session.is_alive().await);

        mock.lose_connection();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(!session.is_alive().await);
    }

    #[tokio::test]
    async fn missing_big_data_service() {
        let mock = MockRing::new().without_big_data().build();
        let session = Session::establish(mock, &RingConfig::default()).await.unwrap();
        assert!(matches!(
            session.request_big_data(colmi_proto::BIG_DATA_SLEEP).await,
            Err(Error::MissingCharacteristic(Endpoint::BigDataWrite))
        ));
    }

    #[tokio::test]
    async fn close_disconnects_transport() {
        let mock = MockTransport::ring();
        let session = Session::establish(mock.clone(), &RingConfig::default()).await.unwrap();
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!mock.connected());
    }
}
