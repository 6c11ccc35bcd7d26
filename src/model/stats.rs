use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aggregate view over the whole history timeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub history_size: usize,
    pub max_history: usize,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub newest_timestamp: Option<DateTime<Utc>>,
    /// `None` until at least one device record is stored.
    pub averages: Option<DeviceAverages>,
}

/// Means across every stored device record (all devices, all samples).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeviceAverages {
    pub device_samples: usize,
    pub avg_temperature: f64,
    pub avg_power: f64,
    pub avg_gpu_usage: f64,
    /// Mean of `DeviceRecord::vram_used_gb`. Records without detailed byte
    /// counts contribute their VRAM percentage instead, so a history mixing
    /// both averages GB and percent values together.
    pub avg_vram_usage: f64,
}

impl HistoryStats {
    /// Flatten into named numeric statistics. Timestamps become Unix seconds.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        let mut map = BTreeMap::new();
        map.insert("history_size", self.history_size as f64);
        map.insert("max_history", self.max_history as f64);
        if let Some(ts) = self.oldest_timestamp {
            map.insert("oldest_timestamp", ts.timestamp() as f64);
        }
        if let Some(ts) = self.newest_timestamp {
            map.insert("newest_timestamp", ts.timestamp() as f64);
        }
        if let Some(avg) = &self.averages {
            map.insert("avg_temperature", avg.avg_temperature);
            map.insert("avg_power", avg.avg_power);
            map.insert("avg_gpu_usage", avg.avg_gpu_usage);
            map.insert("avg_vram_usage", avg.avg_vram_usage);
        }
        map
    }
}
