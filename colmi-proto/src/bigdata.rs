//! Big-data transfers - multi-notification payloads such as sleep history
//!
//! A transfer starts with a 6-byte header `[0xBC, data id, len u16 LE, crc16 u16 LE]`
//! followed by `len` payload bytes spread over however many notifications
//! the link needs.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::{BIG_DATA_MAGIC, Error, Metric, Reading, Result};

const HEADER_LEN: usize = 6;

/// Request for a big-data transfer; the ring ignores the zero length and 0xFFFF crc
pub fn big_data_request(data_id: u8) -> [u8; HEADER_LEN] {
    [BIG_DATA_MAGIC, data_id, 0x00, 0x00, 0xFF, 0xFF]
}

/// A reassembled big-data transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigDataFrame {
    pub data_id: u8,
    pub crc: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct Partial {
    declared: usize,
    crc: u16,
    payload: Vec<u8>,
}

/// Collects notifications until the declared payload length is held
#[derive(Debug)]
pub struct BigDataAssembler {
    data_id: u8,
    partial: Option<Partial>,
}

impl BigDataAssembler {
    pub fn new(data_id: u8) -> Self {
        Self { data_id, partial: None }
    }

    pub fn data_id(&self) -> u8 {
        self.data_id
    }

    /// Whether a transfer header has been seen and more bytes are expected
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    /// Feed one notification
    ///
    /// Returns the frame once complete. Notifications that arrive before a
    /// matching header are ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<BigDataFrame>> {
        match self.partial.as_mut() {
            Some(partial) => partial.payload.extend_from_slice(chunk),
            None => {
                if chunk.len() < 2 || chunk[0] != BIG_DATA_MAGIC || chunk[1] != self.data_id {
                    return Ok(None);
                }
                if chunk.len() < HEADER_LEN {
                    return Err(Error::Truncated("header"));
                }
                self.partial = Some(Partial {
                    declared: u16::from_le_bytes([chunk[2], chunk[3]]) as usize,
                    crc: u16::from_le_bytes([chunk[4], chunk[5]]),
                    payload: chunk[HEADER_LEN..].to_vec(),
                });
            }
        }

        let complete = self
            .partial
            .as_ref()
            .is_some_and(|p| p.payload.len() >= p.declared);
        if !complete {
            return Ok(None);
        }

        Ok(self.partial.take().map(|mut p| {
            p.payload.truncate(p.declared);
            BigDataFrame {
                data_id: self.data_id,
                crc: p.crc,
                payload: p.payload,
            }
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    NoData,
    Light,
    Deep,
    Rem,
    Awake,
    Unknown(u8),
}

impl From<u8> for SleepStage {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::NoData,
            0x02 => Self::Light,
            0x03 => Self::Deep,
            0x04 => Self::Rem,
            0x05 => Self::Awake,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for SleepStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoData => write!(f, "No Data"),
            Self::Light => write!(f, "Light Sleep"),
            Self::Deep => write!(f, "Deep Sleep"),
            Self::Rem => write!(f, "REM Sleep"),
            Self::Awake => write!(f, "Awake"),
            Self::Unknown(code) => write!(f, "Unknown (0x{code:02x})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SleepPeriod {
    pub stage: SleepStage,
    pub start: NaiveDateTime,
    pub minutes: u16,
}

/// One night of sleep as recorded by the ring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SleepDay {
    /// Day the sleep ended on
    pub date: NaiveDate,
    pub sleep_start: NaiveDateTime,
    pub sleep_end: NaiveDateTime,
    pub periods: Vec<SleepPeriod>,
}

impl SleepDay {
    fn minutes_in(&self, wanted: impl Fn(SleepStage) -> bool) -> u32 {
        self.periods
            .iter()
            .filter(|p| wanted(p.stage))
            .map(|p| p.minutes as u32)
            .sum()
    }

    /// Light + deep + REM
    pub fn total_sleep_minutes(&self) -> u32 {
        self.minutes_in(|s| matches!(s, SleepStage::Light | SleepStage::Deep | SleepStage::Rem))
    }

    pub fn deep_minutes(&self) -> u32 {
        self.minutes_in(|s| s == SleepStage::Deep)
    }

    pub fn light_minutes(&self) -> u32 {
        self.minutes_in(|s| s == SleepStage::Light)
    }

    pub fn rem_minutes(&self) -> u32 {
        self.minutes_in(|s| s == SleepStage::Rem)
    }

    pub fn awake_minutes(&self) -> u32 {
        self.minutes_in(|s| s == SleepStage::Awake)
    }

    pub fn unknown_minutes(&self) -> u32 {
        self.minutes_in(|s| matches!(s, SleepStage::Unknown(_)))
    }

    /// Wall-clock span from falling asleep to waking up
    pub fn time_in_bed_minutes(&self) -> i64 {
        (self.sleep_end - self.sleep_start).num_minutes()
    }

    /// Every period as a sleep-segment reading
    pub fn readings(&self) -> Vec<Reading> {
        self.periods
            .iter()
            .cloned()
            .map(|p| Reading::new(Metric::SleepSegment(p)))
            .collect()
    }
}

/// Decode a sleep-history payload (data id 0x27)
///
/// `today` anchors the per-day "days ago" counter.
pub fn decode_sleep(payload: &[u8], today: NaiveDate) -> Result<Vec<SleepDay>> {
    let Some((&day_count, mut rest)) = payload.split_first() else {
        return Ok(Vec::new());
    };

    let mut days = Vec::with_capacity(day_count as usize);
    for _ in 0..day_count {
        if rest.len() < 2 {
            return Err(Error::Truncated("sleep day header"));
        }
        let days_ago = rest[0] as i64;
        let day_len = rest[1] as usize;
        rest = &rest[2..];

        if day_len < 4 || rest.len() < day_len {
            return Err(Error::Truncated("sleep day record"));
        }
        let (record, tail) = rest.split_at(day_len);
        rest = tail;

        let start = u16::from_le_bytes([record[0], record[1]]) as i64;
        let end = u16::from_le_bytes([record[2], record[3]]) as i64;

        let date = today - Duration::days(days_ago);
        let midnight = date.and_time(NaiveTime::MIN);
        let sleep_end = midnight + Duration::minutes(end);
        let sleep_start = if start > end {
            // fell asleep the evening before
            midnight - Duration::days(1) + Duration::minutes(start)
        } else {
            midnight + Duration::minutes(start)
        };

        let mut cursor = sleep_start;
        let mut periods = Vec::new();
        for pair in record[4..].chunks_exact(2) {
            let minutes = pair[1] as u16;
            if minutes == 0 {
                continue;
            }
            periods.push(SleepPeriod {
                stage: SleepStage::from(pair[0]),
                start: cursor,
                minutes,
            });
            cursor += Duration::minutes(minutes as i64);
        }

        days.push(SleepDay { date, sleep_start, sleep_end, periods });
    }

    Ok(days)
}
