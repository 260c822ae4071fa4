//! Standard Device Information service values

use chrono::NaiveDate;
use serde::Serialize;

/// Render a characteristic value: trimmed UTF-8, or hex when it is not text
pub fn format_value(value: &[u8]) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    match std::str::from_utf8(value) {
        Ok(text) => {
            let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
            (!text.is_empty()).then(|| text.to_string())
        }
        Err(_) => Some(data_encoding::HEXLOWER.encode(value)),
    }
}

/// Firmware revision strings look like `RY02_3.00.17_240102`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirmwareVersion {
    pub hardware: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_date: Option<NaiveDate>,
}

impl FirmwareVersion {
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('_');
        let hardware = parts.next().filter(|h| h.starts_with("RY"))?;
        let version = parts.next().filter(|v| !v.is_empty())?;
        let build_date = parts.next().and_then(parse_build_date);

        Some(Self {
            hardware: hardware.to_string(),
            version: version.to_string(),
            build_date,
        })
    }
}

/// `yymmdd` -> 20yy-mm-dd
fn parse_build_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = s[0..2].parse().ok()?;
    let month: u32 = s[2..4].parse().ok()?;
    let day: u32 = s[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.firmware_revision.as_deref().and_then(FirmwareVersion::parse)
    }

    /// Label/value rows in display order, missing values shown as "Not available"
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "Not available".to_string());
        let mut rows = vec![
            ("Manufacturer", show(&self.manufacturer)),
            ("Model", show(&self.model)),
            ("Hardware Version", show(&self.hardware_revision)),
            ("Firmware Version", show(&self.firmware_revision)),
            ("Serial Number", show(&self.serial_number)),
        ];
        if let Some(date) = self.firmware().and_then(|f| f.build_date) {
            rows.push(("Build Date", date.format("%Y-%m-%d").to_string()));
        }
        rows
    }
}
