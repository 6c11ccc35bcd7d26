//! Bounded, timestamp-ordered history of validated samples.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::HistoryError;
use crate::model::{DeviceAverages, HistoryStats, Sample};

pub const DEFAULT_CAPACITY: usize = 1000;

/// Rolling timeline shared between the collection loop (the only writer) and
/// any number of readers. Readers always get copies.
pub struct History {
    capacity: usize,
    samples: RwLock<VecDeque<Sample>>,
}

impl History {
    /// A capacity of 0 falls back to [`DEFAULT_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Self {
            capacity,
            samples: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Add at the tail, evicting the oldest samples beyond capacity.
    pub fn append(&self, sample: Sample) {
        let mut samples = self.write();
        samples.push_back(sample);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
    }

    /// Independent copy of the whole timeline, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.read().iter().cloned().collect()
    }

    pub fn latest(&self) -> Result<Sample, HistoryError> {
        self.read().back().cloned().ok_or(HistoryError::NoData)
    }

    /// Samples captured within `span` of now.
    pub fn window(&self, span: TimeDelta) -> Vec<Sample> {
        self.window_at(span, Utc::now())
    }

    /// Suffix of the timeline whose timestamps are at or after `now - span`.
    /// A span reaching past the representable range yields everything.
    pub fn window_at(&self, span: TimeDelta, now: DateTime<Utc>) -> Vec<Sample> {
        let Some(cutoff) = now.checked_sub_signed(span) else {
            return self.snapshot();
        };
        let samples = self.read();
        let newer = samples
            .iter()
            .rev()
            .take_while(|s| s.timestamp >= cutoff)
            .count();
        samples.iter().skip(samples.len() - newer).cloned().collect()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Size, bounds and per-device means, recomputed over the full timeline.
    pub fn stats(&self) -> HistoryStats {
        let samples = self.read();

        let mut stats = HistoryStats {
            history_size: samples.len(),
            max_history: self.capacity,
            oldest_timestamp: samples.front().map(|s| s.timestamp),
            newest_timestamp: samples.back().map(|s| s.timestamp),
            averages: None,
        };

        let mut totals = DeviceAverages::default();
        for device in samples.iter().flat_map(|s| s.devices.iter()) {
            totals.device_samples += 1;
            totals.avg_temperature += device.temperature_c;
            totals.avg_power += device.power_w;
            totals.avg_gpu_usage += device.gpu_usage_pct;
            totals.avg_vram_usage += device.vram_used_gb;
        }

        if totals.device_samples > 0 {
            let n = totals.device_samples as f64;
            stats.averages = Some(DeviceAverages {
                device_samples: totals.device_samples,
                avg_temperature: totals.avg_temperature / n,
                avg_power: totals.avg_power / n,
                avg_gpu_usage: totals.avg_gpu_usage / n,
                avg_vram_usage: totals.avg_vram_usage / n,
            });
        }
        stats
    }

    // Poisoned locks are recovered: no mutation here can leave the deque
    // half-updated.
    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Sample>> {
        self.samples.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Sample>> {
        self.samples.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::model::DeviceRecord;

    fn sample_at(timestamp: DateTime<Utc>, temperature_c: f64) -> Sample {
        Sample {
            timestamp,
            devices: vec![DeviceRecord {
                id: 0,
                temperature_c,
                power_w: temperature_c * 2.0,
                gpu_usage_pct: 10.0,
                vram_used_gb: 4.0,
                ..Default::default()
            }],
            host_cpu_usage: 0.0,
            partial: false,
        }
    }

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn append_preserves_insertion_order() {
        let history = History::new(10);
        // Deliberately out of timestamp order: the store never reorders.
        for offset in [5, 1, 3] {
            history.append(sample_at(base() + TimeDelta::seconds(offset), offset as f64));
        }
        let temps: Vec<f64> = history
            .snapshot()
            .iter()
            .map(|s| s.devices[0].temperature_c)
            .collect();
        assert_eq!(temps, vec![5.0, 1.0, 3.0]);
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let history = History::new(3);
        for i in 0..10 {
            history.append(sample_at(base() + TimeDelta::seconds(i), i as f64));
        }
        assert_eq!(history.len(), 3);
        let temps: Vec<f64> = history
            .snapshot()
            .iter()
            .map(|s| s.devices[0].temperature_c)
            .collect();
        assert_eq!(temps, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn zero_capacity_uses_default() {
        assert_eq!(History::new(0).capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn latest_returns_last_appended() {
        let history = History::new(5);
        assert_eq!(history.latest(), Err(HistoryError::NoData));

        history.append(sample_at(base(), 40.0));
        history.append(sample_at(base() + TimeDelta::seconds(1), 41.0));
        assert_eq!(history.latest().unwrap().devices[0].temperature_c, 41.0);
    }

    #[test]
    fn snapshot_is_independent_copy() {
        let history = History::new(5);
        history.append(sample_at(base(), 40.0));

        let mut copy = history.snapshot();
        copy[0].devices[0].temperature_c = 99.0;
        copy.clear();

        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().devices[0].temperature_c, 40.0);
    }

    #[test]
    fn window_returns_recent_suffix() {
        let now = base();
        let history = History::new(10);
        history.append(sample_at(now - TimeDelta::minutes(10), 1.0));
        history.append(sample_at(now - TimeDelta::minutes(3), 2.0));
        history.append(sample_at(now - TimeDelta::minutes(1), 3.0));

        let recent = history.window_at(TimeDelta::minutes(5), now);
        let temps: Vec<f64> = recent.iter().map(|s| s.devices[0].temperature_c).collect();
        assert_eq!(temps, vec![2.0, 3.0]);

        assert_eq!(history.window_at(TimeDelta::minutes(30), now).len(), 3);
        assert!(history.window_at(TimeDelta::seconds(10), now).is_empty());
    }

    #[test]
    fn unbounded_window_returns_everything() {
        let history = History::new(10);
        history.append(sample_at(base() - TimeDelta::days(365), 1.0));
        history.append(sample_at(base(), 2.0));

        assert_eq!(history.window_at(TimeDelta::MAX, base()).len(), 2);
        assert_eq!(history.window(TimeDelta::MAX).len(), 2);
    }

    #[test]
    fn window_against_wall_clock() {
        let history = History::new(10);
        history.append(sample_at(Utc::now() - TimeDelta::hours(2), 1.0));
        history.append(sample_at(Utc::now(), 2.0));
        assert_eq!(history.window(TimeDelta::minutes(5)).len(), 1);
    }

    #[test]
    fn clear_empties_timeline() {
        let history = History::new(5);
        history.append(sample_at(base(), 40.0));
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.latest(), Err(HistoryError::NoData));
    }

    #[test]
    fn stats_average_over_all_device_records() {
        let history = History::new(5);
        assert_eq!(history.stats().averages, None);

        let mut two_devices = sample_at(base(), 40.0);
        two_devices.devices.push(DeviceRecord {
            id: 1,
            temperature_c: 60.0,
            power_w: 200.0,
            gpu_usage_pct: 50.0,
            vram_used_gb: 8.0,
            ..Default::default()
        });
        history.append(two_devices);
        history.append(sample_at(base() + TimeDelta::seconds(5), 50.0));

        let stats = history.stats();
        assert_eq!(stats.history_size, 2);
        assert_eq!(stats.max_history, 5);
        assert_eq!(stats.oldest_timestamp, Some(base()));
        assert_eq!(stats.newest_timestamp, Some(base() + TimeDelta::seconds(5)));

        let avg = stats.averages.unwrap();
        assert_eq!(avg.device_samples, 3);
        assert!((avg.avg_temperature - 50.0).abs() < 1e-9);
        assert!((avg.avg_power - (80.0 + 200.0 + 100.0) / 3.0).abs() < 1e-9);
        assert!((avg.avg_gpu_usage - 70.0 / 3.0).abs() < 1e-9);
        assert!((avg.avg_vram_usage - 16.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn vram_average_mixes_bytes_and_percentage_records() {
        let history = History::new(5);
        // 4 GB from byte counts, then a record holding the 50% token.
        history.append(sample_at(base(), 40.0));
        let mut pct_only = sample_at(base() + TimeDelta::seconds(1), 40.0);
        pct_only.devices[0].vram_used_gb = 50.0;
        pct_only.devices[0].vram_used_pct = 50.0;
        history.append(pct_only);

        let avg = history.stats().averages.unwrap();
        assert!((avg.avg_vram_usage - 27.0).abs() < 1e-9);
    }

    #[test]
    fn concurrent_readers_and_writer() {
        let history = Arc::new(History::new(50));

        let writer = {
            let history = Arc::clone(&history);
            thread::spawn(move || {
                for i in 0..500 {
                    history.append(sample_at(base() + TimeDelta::seconds(i), 40.0));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let history = Arc::clone(&history);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let snap = history.snapshot();
                        assert!(snap.len() <= 50);
                        assert!(snap.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
                        let _ = history.stats();
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(history.len(), 50);
        assert_eq!(
            history.latest().unwrap().timestamp,
            base() + TimeDelta::seconds(499)
        );
    }
}
