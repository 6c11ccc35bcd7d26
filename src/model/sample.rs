use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// --- Per-device telemetry ---

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub temperature_c: f64,
    pub power_w: f64,
    /// Bytes-derived when `rocm-smi --showmeminfo vram` answered, otherwise
    /// the VRAM percentage token.
    pub vram_used_gb: f64,
    pub vram_total_gb: f64,
    #[serde(default)]
    pub vram_used_pct: f64,
    pub gpu_usage_pct: f64,
    pub fan_speed_pct: f64,
    pub sclk_mhz: f64,
    pub mclk_mhz: f64,
}

// --- One collection round ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub devices: Vec<DeviceRecord>,
    pub host_cpu_usage: f64,
    /// Set when the parser had to guess: the output had no device lines, or
    /// a device line lacked temperature, power or the usage pair.
    #[serde(default)]
    pub partial: bool,
}

const TEMPERATURE_MAX_C: f64 = 150.0;
const POWER_MAX_W: f64 = 1000.0;
const PERCENT_MAX: f64 = 100.0;

impl Sample {
    /// Range-check every device and the host CPU figure.
    ///
    /// Fields the parser left at zero pass trivially.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.devices.is_empty() {
            return Err(ValidationError::NoDevices);
        }

        for device in &self.devices {
            check(device.id, "temperature", device.temperature_c, TEMPERATURE_MAX_C)?;
            check(device.id, "power", device.power_w, POWER_MAX_W)?;
            check(device.id, "GPU usage", device.gpu_usage_pct, PERCENT_MAX)?;
        }

        if !(0.0..=PERCENT_MAX).contains(&self.host_cpu_usage) {
            return Err(ValidationError::HostCpuOutOfRange(self.host_cpu_usage));
        }
        Ok(())
    }
}

fn check(device: u32, field: &'static str, value: f64, max: f64) -> Result<(), ValidationError> {
    // `contains` is false for NaN as well.
    if (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::DeviceOutOfRange {
            device,
            field,
            value,
            min: 0.0,
            max,
        })
    }
}
