//! Correlator: matches ring notifications to the command waiting for them
//!
//! The ring answers on a notify characteristic with no request ids, so a reply
//! is matched by its command byte. Only one command is ever in flight.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::sync::{Mutex, RwLock, oneshot};

use colmi_proto::{BigDataAssembler, BigDataFrame, Packet};

use crate::{Error, Result};

/// A command that has been written and is waiting for its reply
pub struct PendingRequest {
    pub command: u8,
    pub issued_at: Instant,
    completion: oneshot::Sender<Packet>,
}

/// Big-data transfer in progress
struct Transfer {
    assembler: BigDataAssembler,
    issued_at: Instant,
    completion: oneshot::Sender<colmi_proto::Result<BigDataFrame>>,
}

pub struct Correlator {
    /// Held for the whole write-and-wait of one command
    issue: Mutex<()>,
    /// Keyed by command id; never more than one entry
    pending: RwLock<HashMap<u8, PendingRequest>>,
    transfer: Mutex<Option<Transfer>>,
    command_timeout: Duration,
    big_data_timeout: Duration,
}

impl Correlator {
    pub fn new(command_timeout: Duration, big_data_timeout: Duration) -> Self {
        Self {
            issue: Mutex::new(()),
            pending: RwLock::new(HashMap::new()),
            transfer: Mutex::new(None),
            command_timeout,
            big_data_timeout,
        }
    }

    /// Write `packet` and wait for the first frame carrying the same command id
    ///
    /// The pending entry is registered before `write` runs, so a reply that
    /// arrives while the write is still completing is not lost.
    pub async fn request<F>(&self, packet: Packet, write: F) -> Result<Packet>
    where
        F: Future<Output = Result<()>>,
    {
        let _issue = self.issue.lock().await;
        let command = packet.id();

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(
            command,
            PendingRequest { command, issued_at: Instant::now(), completion: tx },
        );

        debug!("-> {packet:?}");
        if let Err(e) = write.await {
            self.pending.write().await.remove(&command);
            return Err(e);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // sender dropped by fail_all
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.pending.write().await.remove(&command);
                warn!("command 0x{command:02x} timed out after {:?}", self.command_timeout);
                Err(Error::Timeout { command, timeout: self.command_timeout })
            }
        }
    }

    /// Write a command that gets no reply, still serialized with other commands
    pub async fn send<F>(&self, packet: Packet, write: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let _issue = self.issue.lock().await;
        debug!("-> {packet:?}");
        write.await
    }

    /// Run a big-data transfer for `data_id` and wait for the whole payload
    pub async fn request_big_data<F>(&self, data_id: u8, write: F) -> Result<BigDataFrame>
    where
        F: Future<Output = Result<()>>,
    {
        let _issue = self.issue.lock().await;

        let (tx, rx) = oneshot::channel();
        *self.transfer.lock().await = Some(Transfer {
            assembler: BigDataAssembler::new(data_id),
            issued_at: Instant::now(),
            completion: tx,
        });

        debug!("-> big-data request 0x{data_id:02x}");
        if let Err(e) = write.await {
            self.transfer.lock().await.take();
            return Err(e);
        }

        match tokio::time::timeout(self.big_data_timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame?),
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.transfer.lock().await.take();
                warn!("big-data 0x{data_id:02x} timed out after {:?}", self.big_data_timeout);
                Err(Error::BigDataTimeout { data_id, timeout: self.big_data_timeout })
            }
        }
    }

    /// Complete the request waiting for this frame's command
    ///
    /// Returns the frame back when nothing was waiting for it.
    pub async fn resolve(&self, packet: Packet) -> Option<Packet> {
        let entry = self.pending.write().await.remove(&packet.id());

        match entry {
            Some(request) => {
                debug!(
                    "<- {packet:?} (0x{:02x} answered in {:?})",
                    request.command,
                    request.issued_at.elapsed()
                );
                // requester may have timed out in between
                let _ = request.completion.send(packet);
                None
            }
            None => Some(packet),
        }
    }

    /// Feed one big-data notification to the open transfer, if any
    pub async fn feed_big_data(&self, chunk: &[u8]) {
        let mut slot = self.transfer.lock().await;
        let Some(transfer) = slot.as_mut() else {
            debug!("big-data notification with no transfer open ({} bytes)", chunk.len());
            return;
        };

        let outcome = match transfer.assembler.push(chunk) {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => return,
            Err(e) => Err(e),
        };

        if let Some(transfer) = slot.take() {
            debug!(
                "big-data 0x{:02x} finished in {:?}",
                transfer.assembler.data_id(),
                transfer.issued_at.elapsed()
            );
            let _ = transfer.completion.send(outcome);
        }
    }

    /// Fail everything outstanding, used when the link drops
    pub async fn fail_all(&self) {
        let dropped = self.pending.write().await.drain().count();
        let transfer = self.transfer.lock().await.take();
        if dropped > 0 || transfer.is_some() {
            warn!("link lost with {dropped} command(s) outstanding");
        }
    }

    /// Command currently waiting for a reply
    pub async fn in_flight(&self) -> Option<u8> {
        self.pending.read().await.keys().next().copied()
    }
}
