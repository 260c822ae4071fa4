//! BLE GATT constants for Colmi rings
//!
//! The ring exposes a Nordic-style UART service for 16-byte command frames,
//! a "big data" service for multi-notification transfers, and the standard
//! Device Information service.

/// UART Service UUID
pub const UART_SERVICE_UUID: &str = "6e40fff0-b5a3-f393-e0a9-e50e24dcca9e";

/// UART RX Characteristic UUID (write, commands to the ring)
pub const UART_RX_UUID: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e";

/// UART TX Characteristic UUID (notify, frames from the ring)
pub const UART_TX_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// Big Data Service UUID
pub const BIG_DATA_SERVICE_UUID: &str = "de5bf728-d711-4e47-af26-65e3012a5dc7";

/// Big Data write Characteristic UUID
pub const BIG_DATA_WRITE_UUID: &str = "de5bf72a-d711-4e47-af26-65e3012a5dc7";

/// Big Data notify Characteristic UUID
pub const BIG_DATA_NOTIFY_UUID: &str = "de5bf729-d711-4e47-af26-65e3012a5dc7";

/// Device Information Service UUID (0x180A)
pub const DEVICE_INFO_SERVICE_UUID: &str = "0000180a-0000-1000-8000-00805f9b34fb";

/// Device Information characteristics
pub mod device_info {
    pub const MANUFACTURER_UUID: &str = "00002a29-0000-1000-8000-00805f9b34fb";
    pub const MODEL_UUID: &str = "00002a24-0000-1000-8000-00805f9b34fb";
    pub const HARDWARE_REVISION_UUID: &str = "00002a27-0000-1000-8000-00805f9b34fb";
    pub const FIRMWARE_REVISION_UUID: &str = "00002a26-0000-1000-8000-00805f9b34fb";
    pub const SERIAL_NUMBER_UUID: &str = "00002a25-0000-1000-8000-00805f9b34fb";
}

/// Advertised name prefixes of the R-series and rebadged rings that speak this protocol
pub const DEVICE_NAME_PREFIXES: &[&str] = &[
    "R01", "R02", "R03", "R04", "R05", "R06", "R07", "R10",
    "VK-5098", "MERLIN", "Hello Ring", "RING1", "boAtring", "TR-R02", "SE",
    "EVOLVEO", "GL-SR2", "Blaupunkt", "KSIX RING",
];

/// Whether an advertised name starts with one of `prefixes`
pub fn is_compatible_name<S: AsRef<str>>(name: &str, prefixes: &[S]) -> bool {
    !name.is_empty() && prefixes.iter().any(|p| name.starts_with(p.as_ref()))
}
