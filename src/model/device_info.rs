use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const UNKNOWN: &str = "Unknown";
pub const NOT_AVAILABLE: &str = "Not Available";

/// Identity and firmware data for one device. Queried on demand, never
/// stored in the history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaticDeviceInfo {
    pub id: u32,
    pub product_name: String,
    pub vendor_name: String,
    pub serial_number: String,
    pub unique_id: String,
    pub vram_vendor: String,
    pub bus_info: String,
    pub firmware: BTreeMap<String, String>,
}
