//! Command-line tool for Colmi smart rings
//!
//! Reads battery, live heart rate and SpO2, sleep history and logging settings
//! from a ring, and sets its clock and logging options.

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use btleplug::platform::Adapter;

use colmi_ble_controller::{BtleplugConnector, Ring, RingConfig, ble, colmi_home};
use colmi_proto::{Metric, Reading, RealtimeKind, Sensor, SensorSettings, SleepDay};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "colmi-ble")]
#[command(about = "Talk to Colmi smart rings over BLE")]
struct Cli {
    /// Ring name or address to connect to (overrides config)
    #[arg(short, long, global = true)]
    device: Option<String>,
    /// Scan duration in seconds (overrides config)
    #[arg(long, global = true)]
    scan_secs: Option<u64>,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for rings
    Scan {
        /// List every BLE device, not only compatible rings
        #[arg(long)]
        all: bool,
    },
    /// Show manufacturer, model and firmware
    Info,
    /// Show battery level
    Battery,
    /// Set the ring's clock to now
    SetTime {
        /// Send UTC instead of local time
        #[arg(long)]
        utc: bool,
    },
    /// Measure heart rate in real time
    HeartRate {
        /// Stop after this many readings
        #[arg(short = 'n', long)]
        samples: Option<usize>,
        /// Stop after this many seconds
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },
    /// Measure blood oxygen in real time
    Spo2 {
        /// Stop after this many readings
        #[arg(short = 'n', long)]
        samples: Option<usize>,
        /// Stop after this many seconds
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },
    /// Show recorded sleep
    Sleep,
    /// Show logging settings of every sensor
    Settings,
    /// Configure background heart-rate logging
    SetHeartRateLog {
        /// Turn logging off instead of on
        #[arg(long)]
        disable: bool,
        /// Minutes between measurements (5-255)
        #[arg(short, long, default_value = "60")]
        interval: u8,
    },
    /// Turn background logging of a sensor on or off
    SetSensor {
        sensor: SensorArg,
        state: Toggle,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SensorArg {
    HeartRate,
    Spo2,
    Pressure,
    Hrv,
}

impl From<SensorArg> for Sensor {
    fn from(arg: SensorArg) -> Self {
        match arg {
            SensorArg::HeartRate => Sensor::HeartRate,
            SensorArg::Spo2 => Sensor::BloodOxygen,
            SensorArg::Pressure => Sensor::Pressure,
            SensorArg::Hrv => Sensor::Hrv,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = RingConfig::load_or_create(&colmi_home()?)?;
    if let Some(device) = cli.device {
        config.device = Some(device);
    }
    if let Some(secs) = cli.scan_secs {
        config.scan_secs = secs;
    }

    let adapter = ble::get_adapter().await?;

    // the ring connects on its first operation, so scanning never opens a session
    let ring = Ring::new(BtleplugConnector::new(adapter.clone(), &config), config);
    let result = run(&adapter, &ring, cli.command, cli.json).await;
    ring.disconnect().await?;
    result
}

async fn run(adapter: &Adapter, ring: &Ring, command: Commands, json: bool) -> CliResult<()> {
    match command {
        Commands::Scan { all } => scan_rings(adapter, ring.config(), all, json).await?,
        Commands::Info => {
            let info = ring.device_info().await?;
            print(json, &info, |info| {
                println!("Device Information:");
                for (label, value) in info.rows() {
                    println!("  {label}: {value}");
                }
            })?;
        }
        Commands::Battery => {
            let battery = ring.battery().await?;
            print(json, &battery, |b| {
                let charging = if b.charging { " (charging)" } else { "" };
                println!("Battery: {}%{charging}", b.level);
            })?;
        }
        Commands::SetTime { utc } => {
            let now = if utc {
                chrono::Utc::now().naive_utc()
            } else {
                chrono::Local::now().naive_local()
            };
            ring.set_time(now).await?;
            println!("Time set to {}", now.format("%Y-%m-%d %H:%M:%S"));
        }
        Commands::HeartRate { samples, seconds } => {
            measure(ring, RealtimeKind::HeartRate, samples, seconds, json).await?;
        }
        Commands::Spo2 { samples, seconds } => {
            measure(ring, RealtimeKind::SpO2, samples, seconds, json).await?;
        }
        Commands::Sleep => {
            let days = ring.sleep(chrono::Local::now().date_naive()).await?;
            print(json, &days, |days| print_sleep(days))?;
        }
        Commands::Settings => {
            let settings = ring.all_sensor_settings().await?;
            print(json, &settings, |all| {
                for settings in all {
                    print_settings(settings);
                }
            })?;
        }
        Commands::SetHeartRateLog { disable, interval } => {
            let settings = ring.set_heart_rate_log(!disable, interval).await?;
            print(json, &settings, print_settings)?;
        }
        Commands::SetSensor { sensor, state } => {
            let settings = ring
                .set_sensor(sensor.into(), matches!(state, Toggle::On))
                .await?;
            print(json, &settings, print_settings)?;
        }
    }
    Ok(())
}

/// Print `value` as JSON, or through `text`
fn print<T: Serialize + ?Sized>(json: bool, value: &T, text: impl FnOnce(&T)) -> CliResult<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

async fn scan_rings(
    adapter: &Adapter,
    config: &RingConfig,
    all: bool,
    json: bool,
) -> CliResult<()> {
    if !json {
        println!("Scanning for rings ({} seconds)...", config.scan_secs);
    }
    let devices = ble::scan(adapter, config.scan_duration(), &config.name_prefixes, all).await?;

    print(json, &devices, |devices| {
        println!("\nFound {} devices:", devices.len());
        for device in devices {
            let rssi = device
                .rssi
                .map(|r| format!("{r} dBm"))
                .unwrap_or_else(|| "N/A".to_string());
            let marker = if device.is_compatible { " [RING]" } else { "" };
            println!("  {} ({}) RSSI: {rssi}{marker}", device.name, device.address);
        }
    })
}

async fn measure(
    ring: &Ring,
    kind: RealtimeKind,
    samples: Option<usize>,
    seconds: u64,
    json: bool,
) -> CliResult<()> {
    let (label, unit) = match kind {
        RealtimeKind::HeartRate => ("Heart rate", "BPM"),
        RealtimeKind::SpO2 => ("SpO2", "%"),
    };

    let mut monitor = ring.start_realtime(kind).await?;
    if !json {
        println!("Measuring {label} for up to {seconds}s, press Ctrl+C to stop...");
    }

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    let mut values = Vec::new();
    let mut failure = None;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            reading = monitor.next() => match reading {
                Ok(reading) => {
                    let Some(value) = value_of(&reading) else {
                        continue;
                    };
                    print(json, &reading, |r| {
                        println!("{} {label}: {value} {unit}", r.received_at.format("%H:%M:%S"));
                    })?;
                    values.push(value);
                    if samples.is_some_and(|n| values.len() >= n) {
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
    }

    if let Err(e) = monitor.stop().await {
        log::warn!("could not stop measurement: {e}");
    }
    if let Some(e) = failure {
        return Err(e.into());
    }

    if !json && !values.is_empty() {
        let min = values.iter().min().copied().unwrap_or_default();
        let max = values.iter().max().copied().unwrap_or_default();
        let avg = values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64;
        println!("\n{} readings: avg {avg:.1}, min {min}, max {max} {unit}", values.len());
    }
    Ok(())
}

fn value_of(reading: &Reading) -> Option<u8> {
    match reading.metric {
        Metric::HeartRate { bpm } => Some(bpm),
        Metric::SpO2 { percent } => Some(percent),
        _ => None,
    }
}

fn print_settings(settings: &SensorSettings) {
    let state = if settings.enabled { "enabled" } else { "disabled" };
    match settings.interval_minutes {
        Some(interval) if settings.enabled => {
            println!("{}: {state} (every {interval} minutes)", settings.sensor.name());
        }
        _ => println!("{}: {state}", settings.sensor.name()),
    }
}

fn hours(minutes: impl Into<i64>) -> String {
    let minutes = minutes.into();
    format!("{}h {:02}m", minutes / 60, minutes % 60)
}

fn sleep_summary(day: &SleepDay) -> [(&'static str, String); 7] {
    [
        ("Time in bed", hours(day.time_in_bed_minutes())),
        ("Total sleep", hours(day.total_sleep_minutes())),
        ("Deep", hours(day.deep_minutes())),
        ("Light", hours(day.light_minutes())),
        ("REM", hours(day.rem_minutes())),
        ("Awake", hours(day.awake_minutes())),
        ("Unknown", hours(day.unknown_minutes())),
    ]
}

fn print_sleep(days: &[SleepDay]) {
    if days.is_empty() {
        println!("No sleep data recorded");
        return;
    }

    for day in days {
        println!(
            "\n{}: {} - {}",
            day.date,
            day.sleep_start.format("%H:%M"),
            day.sleep_end.format("%H:%M")
        );
        for (label, value) in sleep_summary(day) {
            println!("  {label}: {value}");
        }
        for period in &day.periods {
            println!(
                "    {} {:<14} {} min",
                period.start.format("%H:%M"),
                period.stage.to_string(),
                period.minutes
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use colmi_proto::decode_sleep;

    #[test]
    fn sleep_summary_lists_unknown_stages() {
        // 23:00 to 01:10: 60 min light, 70 min of stage code 7
        let payload = [1, 0, 8, 0x64, 0x05, 70, 0, 2, 60, 7, 70];
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let days = decode_sleep(&payload, today).unwrap();

        let summary = sleep_summary(&days[0]);
        assert_eq!(summary[0], ("Time in bed", "2h 10m".to_string()));
        assert_eq!(summary[3], ("Light", "1h 00m".to_string()));
        assert_eq!(summary[6], ("Unknown", "1h 10m".to_string()));
    }

    #[test]
    fn hours_pads_minutes() {
        assert_eq!(hours(65u32), "1h 05m");
        assert_eq!(hours(0i64), "0h 00m");
    }
}
