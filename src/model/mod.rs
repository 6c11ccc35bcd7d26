// Re-export all model types from submodules.

pub use device_info::{NOT_AVAILABLE, StaticDeviceInfo, UNKNOWN};
pub use sample::{DeviceRecord, Sample};
pub use stats::{DeviceAverages, HistoryStats};

mod device_info;
mod sample;
mod stats;
