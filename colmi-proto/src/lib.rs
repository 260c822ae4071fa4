//! Colmi ring wire protocol - command frames, big-data transfers and decoders
//!
//! Every command and most notifications on the ring's UART service are a
//! fixed 16-byte frame: `[command][14 bytes of payload][checksum]`, where the
//! checksum is the sum of the first 15 bytes modulo 256.

pub mod ble;
mod bigdata;
mod device_info;
mod readings;

pub use bigdata::{
    BigDataAssembler, BigDataFrame, SleepDay, SleepPeriod, SleepStage, big_data_request,
    decode_sleep,
};
pub use device_info::{DeviceInfo, FirmwareVersion, format_value};
pub use readings::{
    Battery, Metric, Reading, RealtimeKind, RealtimeSample, Sensor, SensorSettings,
    continue_realtime, encode_time, start_realtime, stop_realtime,
};

// Commands (UART service)
pub const CMD_SET_TIME: u8 = 0x01;
pub const CMD_BATTERY: u8 = 0x03;
pub const CMD_HEART_RATE_LOG_SETTINGS: u8 = 0x16;
pub const CMD_REALTIME_CONTINUE: u8 = 0x1E;
pub const CMD_SPO2_SETTINGS: u8 = 0x2C;
pub const CMD_PRESSURE_SETTINGS: u8 = 0x36;
pub const CMD_HRV_SETTINGS: u8 = 0x38;
pub const CMD_START_REALTIME: u8 = 0x69;
pub const CMD_STOP_REALTIME: u8 = 0x6A;

// Big-data transfers (big-data service)
pub const BIG_DATA_MAGIC: u8 = 0xBC;
pub const BIG_DATA_SLEEP: u8 = 0x27;

/// Size of every UART frame
pub const PACKET_LEN: usize = 16;

/// Bytes available between the command id and the checksum
pub const PAYLOAD_LEN: usize = PACKET_LEN - 2;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("payload of {0} bytes does not fit in a frame (max {PAYLOAD_LEN})")]
    PayloadTooLong(usize),
    #[error("frame must be {PACKET_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("checksum mismatch: expected 0x{expected:02x}, found 0x{found:02x}")]
    ChecksumMismatch { expected: u8, found: u8 },
    #[error("expected command 0x{expected:02x}, got 0x{found:02x}")]
    UnexpectedCommand { expected: u8, found: u8 },
    #[error("unknown real-time measurement kind {0}")]
    UnknownRealtimeKind(u8),
    #[error("logging interval must be 5..=255 minutes, got {0}")]
    InvalidInterval(u8),
    #[error("year {0} cannot be set on the ring (2000..=2099)")]
    YearOutOfRange(i32),
    #[error("big-data frame truncated: {0}")]
    Truncated(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Sum of `bytes` modulo 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// A single 16-byte UART frame
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    bytes: [u8; PACKET_LEN],
}

impl Packet {
    /// Build a frame for `command`, zero-padding `sub_data` and sealing the checksum
    pub fn new(command: u8, sub_data: &[u8]) -> Result<Self> {
        if sub_data.len() > PAYLOAD_LEN {
            return Err(Error::PayloadTooLong(sub_data.len()));
        }

        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = command;
        bytes[1..1 + sub_data.len()].copy_from_slice(sub_data);
        bytes[PACKET_LEN - 1] = checksum(&bytes[..PACKET_LEN - 1]);
        Ok(Self { bytes })
    }

    /// Build a frame with no sub-data
    pub fn command(command: u8) -> Self {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = command;
        bytes[PACKET_LEN - 1] = command;
        Self { bytes }
    }

    /// Build a frame from sub-data whose size is known to fit
    pub(crate) fn fixed<const N: usize>(command: u8, sub_data: [u8; N]) -> Self {
        const { assert!(N <= PAYLOAD_LEN) };

        let mut bytes = [0u8; PACKET_LEN];
        bytes[0] = command;
        bytes[1..1 + N].copy_from_slice(&sub_data);
        bytes[PACKET_LEN - 1] = checksum(&bytes[..PACKET_LEN - 1]);
        Self { bytes }
    }

    /// Parse a notification, checking length and checksum
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let bytes: [u8; PACKET_LEN] = data
            .try_into()
            .map_err(|_| Error::InvalidLength(data.len()))?;

        let expected = checksum(&bytes[..PACKET_LEN - 1]);
        let found = bytes[PACKET_LEN - 1];
        if expected != found {
            return Err(Error::ChecksumMismatch { expected, found });
        }

        Ok(Self { bytes })
    }

    pub fn id(&self) -> u8 {
        self.bytes[0]
    }

    /// The 14 bytes between the command id and the checksum
    pub fn payload(&self) -> &[u8] {
        &self.bytes[1..PACKET_LEN - 1]
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[PACKET_LEN - 1]
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_LEN] {
        &self.bytes
    }

    /// Byte at frame offset `index` (0 is the command id)
    pub fn byte(&self, index: usize) -> u8 {
        self.bytes[index]
    }

    pub(crate) fn expect_command(&self, expected: u8) -> Result<()> {
        if self.id() != expected {
            return Err(Error::UnexpectedCommand { expected, found: self.id() });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Packet({})", data_encoding::HEXLOWER.encode(&self.bytes))
    }
}
