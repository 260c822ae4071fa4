//! Decoders for UART notifications and encoders for the matching requests

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use serde::Serialize;

use crate::{
    CMD_BATTERY, CMD_HEART_RATE_LOG_SETTINGS, CMD_HRV_SETTINGS, CMD_PRESSURE_SETTINGS,
    CMD_REALTIME_CONTINUE, CMD_SET_TIME, CMD_SPO2_SETTINGS, CMD_START_REALTIME,
    CMD_STOP_REALTIME, Error, Packet, Result, SleepPeriod,
};

// Settings sub-commands
const SETTINGS_READ: u8 = 0x01;
const SETTINGS_WRITE: u8 = 0x02;
const SETTING_ENABLED: u8 = 0x01;
const SETTING_DISABLED: u8 = 0x02;

/// Language byte sent along with the time; 1 is English
const LANGUAGE_ENGLISH: u8 = 0x01;

/// Default heart-rate logging interval when logging is switched off
const DEFAULT_INTERVAL_MINUTES: u8 = 60;

/// Battery response (command 0x03)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Battery {
    pub level: u8,
    pub charging: bool,
}

impl Battery {
    pub fn request() -> Packet {
        Packet::command(CMD_BATTERY)
    }

    pub fn decode(packet: &Packet) -> Result<Self> {
        packet.expect_command(CMD_BATTERY)?;
        Ok(Self {
            level: packet.byte(1),
            charging: packet.byte(2) != 0,
        })
    }
}

/// What a real-time measurement session measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RealtimeKind {
    #[serde(rename = "heart_rate")]
    HeartRate = 1,
    #[serde(rename = "spo2")]
    SpO2 = 3,
}

impl RealtimeKind {
    /// Second byte of the start request
    fn start_param(self) -> u8 {
        match self {
            Self::HeartRate => 0x00,
            Self::SpO2 => 0x25,
        }
    }
}

impl TryFrom<u8> for RealtimeKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::HeartRate),
            3 => Ok(Self::SpO2),
            other => Err(Error::UnknownRealtimeKind(other)),
        }
    }
}

pub fn start_realtime(kind: RealtimeKind) -> Packet {
    Packet::fixed(CMD_START_REALTIME, [kind as u8, kind.start_param()])
}

pub fn stop_realtime(kind: RealtimeKind) -> Packet {
    Packet::fixed(CMD_STOP_REALTIME, [kind as u8, 0, 0])
}

/// Keepalive the ring expects while a real-time measurement runs
pub fn continue_realtime() -> Packet {
    Packet::fixed(CMD_REALTIME_CONTINUE, *b"3")
}

/// One real-time notification (command 0x69)
///
/// A zero `value` means the sensor has not settled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeSample {
    pub kind: RealtimeKind,
    pub error_code: u8,
    pub value: u8,
}

impl RealtimeSample {
    pub fn decode(packet: &Packet) -> Result<Self> {
        packet.expect_command(CMD_START_REALTIME)?;
        Ok(Self {
            kind: RealtimeKind::try_from(packet.byte(1))?,
            error_code: packet.byte(2),
            value: packet.byte(3),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.error_code == 0 && self.value != 0
    }
}

/// Sensors whose background logging can be switched on and off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sensor {
    HeartRate,
    BloodOxygen,
    Pressure,
    Hrv,
}

impl Sensor {
    pub const ALL: [Sensor; 4] = [Self::HeartRate, Self::BloodOxygen, Self::Pressure, Self::Hrv];

    pub fn command(self) -> u8 {
        match self {
            Self::HeartRate => CMD_HEART_RATE_LOG_SETTINGS,
            Self::BloodOxygen => CMD_SPO2_SETTINGS,
            Self::Pressure => CMD_PRESSURE_SETTINGS,
            Self::Hrv => CMD_HRV_SETTINGS,
        }
    }

    pub fn from_command(command: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.command() == command)
    }

    pub fn read_request(self) -> Packet {
        Packet::fixed(self.command(), [SETTINGS_READ])
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HeartRate => "Heart Rate",
            Self::BloodOxygen => "Blood Oxygen",
            Self::Pressure => "Pressure",
            Self::Hrv => "HRV",
        }
    }
}

/// Logging configuration of one sensor
///
/// Only the heart-rate sensor carries an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorSettings {
    pub sensor: Sensor,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u8>,
}

impl SensorSettings {
    pub fn heart_rate(enabled: bool, interval_minutes: u8) -> Result<Self> {
        if enabled && interval_minutes < 5 {
            return Err(Error::InvalidInterval(interval_minutes));
        }
        Ok(Self {
            sensor: Sensor::HeartRate,
            enabled,
            interval_minutes: Some(interval_minutes),
        })
    }

    pub fn toggle(sensor: Sensor, enabled: bool) -> Self {
        Self {
            sensor,
            enabled,
            interval_minutes: None,
        }
    }

    pub fn decode(packet: &Packet) -> Result<Self> {
        let sensor = Sensor::from_command(packet.id()).ok_or(Error::UnexpectedCommand {
            expected: CMD_HEART_RATE_LOG_SETTINGS,
            found: packet.id(),
        })?;
        let enabled = packet.byte(2) == SETTING_ENABLED;
        let interval_minutes = match sensor {
            Sensor::HeartRate => Some(packet.byte(3)),
            _ => None,
        };
        Ok(Self { sensor, enabled, interval_minutes })
    }

    pub fn write_request(&self) -> Result<Packet> {
        let flag = if self.enabled { SETTING_ENABLED } else { SETTING_DISABLED };
        match self.sensor {
            Sensor::HeartRate => {
                let interval = self.interval_minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES);
                if self.enabled && interval < 5 {
                    return Err(Error::InvalidInterval(interval));
                }
                Packet::new(self.sensor.command(), &[SETTINGS_WRITE, flag, interval])
            }
            _ => Packet::new(self.sensor.command(), &[SETTINGS_WRITE, flag]),
        }
    }
}

fn bcd(value: u32) -> u8 {
    (((value / 10) << 4) | (value % 10)) as u8
}

/// Set-time request (command 0x01), every field BCD encoded
pub fn encode_time(at: NaiveDateTime) -> Result<Packet> {
    let year = at.year();
    if !(2000..=2099).contains(&year) {
        return Err(Error::YearOutOfRange(year));
    }

    let data = [
        bcd((year - 2000) as u32),
        bcd(at.month()),
        bcd(at.day()),
        bcd(at.hour()),
        bcd(at.minute()),
        bcd(at.second()),
        LANGUAGE_ENGLISH,
    ];
    Packet::new(CMD_SET_TIME, &data)
}

/// A decoded value from the ring, stamped when it was received
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub received_at: DateTime<Utc>,
    pub metric: Metric,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Metric {
    HeartRate { bpm: u8 },
    #[serde(rename = "spo2")]
    SpO2 { percent: u8 },
    Battery(Battery),
    SleepSegment(SleepPeriod),
}

impl Reading {
    pub fn new(metric: Metric) -> Self {
        Self { received_at: Utc::now(), metric }
    }

    /// Turn an unsolicited frame into a reading, if it carries one
    pub fn decode(packet: &Packet) -> Option<Self> {
        match packet.id() {
            CMD_START_REALTIME => {
                let sample = RealtimeSample::decode(packet).ok()?;
                if !sample.is_valid() {
                    return None;
                }
                let metric = match sample.kind {
                    RealtimeKind::HeartRate => Metric::HeartRate { bpm: sample.value },
                    RealtimeKind::SpO2 => Metric::SpO2 { percent: sample.value },
                };
                Some(Self::new(metric))
            }
            CMD_BATTERY => Battery::decode(packet).ok().map(|b| Self::new(Metric::Battery(b))),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<RealtimeKind> {
        match self.metric {
            Metric::HeartRate { .. } => Some(RealtimeKind::HeartRate),
            Metric::SpO2 { .. } => Some(RealtimeKind::SpO2),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn battery_decode() {
        let packet = Packet::new(CMD_BATTERY, &[87, 1]).unwrap();
        assert_eq!(
            Battery::decode(&packet).unwrap(),
            Battery { level: 87, charging: true }
        );

        let wrong = Packet::command(CMD_SET_TIME);
        assert_eq!(
            Battery::decode(&wrong),
            Err(Error::UnexpectedCommand { expected: CMD_BATTERY, found: CMD_SET_TIME })
        );
    }

    #[test]
    fn realtime_requests() {
        assert_eq!(&start_realtime(RealtimeKind::HeartRate).as_bytes()[..3], &[0x69, 1, 0]);
        assert_eq!(&start_realtime(RealtimeKind::SpO2).as_bytes()[..3], &[0x69, 3, 0x25]);
        assert_eq!(&stop_realtime(RealtimeKind::SpO2).as_bytes()[..4], &[0x6a, 3, 0, 0]);
        let keepalive = continue_realtime();
        assert_eq!(&keepalive.as_bytes()[..2], &[0x1e, 0x33]);
        assert_eq!(keepalive.checksum(), 0x51);
    }

    #[test]
    fn realtime_sample_to_reading() {
        let hr = Packet::new(CMD_START_REALTIME, &[1, 0, 64]).unwrap();
        let reading = Reading::decode(&hr).unwrap();
        assert_eq!(reading.metric, Metric::HeartRate { bpm: 64 });
        assert_eq!(reading.kind(), Some(RealtimeKind::HeartRate));

        let spo2 = Packet::new(CMD_START_REALTIME, &[3, 0, 97]).unwrap();
        assert_eq!(Reading::decode(&spo2).unwrap().metric, Metric::SpO2 { percent: 97 });

        // not settled yet
        let warming = Packet::new(CMD_START_REALTIME, &[1, 0, 0]).unwrap();
        assert!(Reading::decode(&warming).is_none());

        // sensor error
        let failed = Packet::new(CMD_START_REALTIME, &[3, 2, 95]).unwrap();
        assert!(Reading::decode(&failed).is_none());
        assert_eq!(RealtimeSample::decode(&failed).unwrap().error_code, 2);

        let unknown_kind = Packet::new(CMD_START_REALTIME, &[9, 0, 1]).unwrap();
        assert_eq!(
            RealtimeSample::decode(&unknown_kind),
            Err(Error::UnknownRealtimeKind(9))
        );
    }

    #[test]
    fn settings_roundtrip_bytes() {
        assert_eq!(
            &Sensor::HeartRate.read_request().as_bytes()[..2],
            &[CMD_HEART_RATE_LOG_SETTINGS, 0x01]
        );

        let hr = SensorSettings::heart_rate(true, 30).unwrap();
        assert_eq!(&hr.write_request().unwrap().as_bytes()[..4], &[0x16, 2, 1, 30]);

        let off = SensorSettings::toggle(Sensor::Hrv, false);
        assert_eq!(&off.write_request().unwrap().as_bytes()[..3], &[0x38, 2, 2]);

        let response = Packet::new(CMD_HEART_RATE_LOG_SETTINGS, &[1, 1, 10]).unwrap();
        assert_eq!(
            SensorSettings::decode(&response).unwrap(),
            SensorSettings { sensor: Sensor::HeartRate, enabled: true, interval_minutes: Some(10) }
        );

        let spo2 = Packet::new(CMD_SPO2_SETTINGS, &[1, 2]).unwrap();
        assert_eq!(
            SensorSettings::decode(&spo2).unwrap(),
            SensorSettings { sensor: Sensor::BloodOxygen, enabled: false, interval_minutes: None }
        );
    }

    #[test]
    fn heart_rate_interval_bounds() {
        assert_eq!(SensorSettings::heart_rate(true, 4), Err(Error::InvalidInterval(4)));
        assert!(SensorSettings::heart_rate(true, 5).is_ok());
        assert!(SensorSettings::heart_rate(true, 255).is_ok());
        // interval ignored by the ring when logging is off
        assert!(SensorSettings::heart_rate(false, 0).is_ok());
    }

    #[test]
    fn time_is_bcd() {
        let at = NaiveDate::from_ymd_opt(2024, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 7)
            .unwrap();
        let packet = encode_time(at).unwrap();
        assert_eq!(
            &packet.as_bytes()[..8],
            &[CMD_SET_TIME, 0x24, 0x12, 0x31, 0x23, 0x59, 0x07, 0x01]
        );

        let past = NaiveDate::from_ymd_opt(1999, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(encode_time(past), Err(Error::YearOutOfRange(1999)));
    }

    #[test]
    fn reading_serializes_with_type_tag() {
        let reading = Reading::new(Metric::HeartRate { bpm: 70 });
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["metric"]["type"], "heart_rate");
        assert_eq!(json["metric"]["bpm"], 70);
    }
}
