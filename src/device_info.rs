//! On-demand static device information (product, serial, firmware, ...).
//!
//! Every sub-query is best-effort: a failing invocation degrades the matching
//! field to "Not Available" instead of failing the whole lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::debug;

use crate::collectors::ToolRunner;
use crate::error::CollectError;
use crate::model::{NOT_AVAILABLE, StaticDeviceInfo, UNKNOWN};

const DEFAULT_VENDOR: &str = "AMD";

/// `GPU[n] : Key: value` entries grouped by device index, in output order.
pub type Entries = BTreeMap<u32, Vec<(String, String)>>;

/// Query static information for every device `rocm-smi` reports.
pub async fn query_static_info<R: ToolRunner>(runner: &R, timeout: Duration) -> Vec<StaticDeviceInfo> {
    let (product, serial, unique_id, mem_vendor, bus, firmware) = tokio::join!(
        query(runner, "--showproductname", timeout),
        query(runner, "--showserial", timeout),
        query(runner, "--showuniqueid", timeout),
        query(runner, "--showmemvendor", timeout),
        query(runner, "--showbus", timeout),
        query(runner, "--showfwinfo", timeout),
    );

    let mut ids = BTreeSet::new();
    for entries in [&product, &serial, &unique_id, &mem_vendor, &bus, &firmware]
        .into_iter()
        .flatten()
    {
        ids.extend(entries.keys().copied());
    }
    if ids.is_empty() {
        ids.insert(0);
    }

    ids.into_iter()
        .map(|id| StaticDeviceInfo {
            id,
            product_name: field(&product, id, pick_product_name),
            vendor_name: match &product {
                Some(entries) => find_value(entries, id, "vendor")
                    .map(clean_value)
                    .unwrap_or_else(|| DEFAULT_VENDOR.to_string()),
                None => DEFAULT_VENDOR.to_string(),
            },
            serial_number: field(&serial, id, first_value),
            unique_id: field(&unique_id, id, first_value),
            vram_vendor: field(&mem_vendor, id, first_value),
            bus_info: field(&bus, id, first_value),
            firmware: firmware
                .as_ref()
                .and_then(|entries| entries.get(&id))
                .map(|list| firmware_versions(list))
                .unwrap_or_default(),
        })
        .collect()
}

async fn query<R: ToolRunner>(runner: &R, flag: &str, timeout: Duration) -> Option<Entries> {
    match runner.run(&[flag], timeout).await {
        Ok(output) => Some(parse_entries(&output)),
        Err(e) => {
            log_failure(flag, &e);
            None
        }
    }
}

fn log_failure(flag: &str, err: &CollectError) {
    debug!(flag, error = %err, "static info query failed");
}

/// Group `GPU[n] : Key: value` lines by device. A line without a second
/// colon yields an empty key.
pub fn parse_entries(output: &str) -> Entries {
    let mut entries = Entries::new();
    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("GPU[") else {
            continue;
        };
        let Some((index, rest)) = rest.split_once(']') else {
            continue;
        };
        let Ok(id) = index.parse::<u32>() else {
            continue;
        };
        let Some(rest) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        let (key, value) = match rest.split_once(':') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => ("", rest.trim()),
        };
        entries
            .entry(id)
            .or_default()
            .push((key.to_string(), value.to_string()));
    }
    entries
}

/// Resolve one field for one device: "Not Available" when the query failed,
/// "Unknown" when the device has no usable entry.
fn field(
    entries: &Option<Entries>,
    id: u32,
    pick: fn(&[(String, String)]) -> Option<&str>,
) -> String {
    let Some(entries) = entries else {
        return NOT_AVAILABLE.to_string();
    };
    entries
        .get(&id)
        .and_then(|list| pick(list))
        .map(clean_value)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn first_value(list: &[(String, String)]) -> Option<&str> {
    list.iter()
        .map(|(_, v)| v.as_str())
        .find(|v| !v.is_empty())
}

/// Prefer the marketing series name, then the model, then anything.
fn pick_product_name(list: &[(String, String)]) -> Option<&str> {
    ["series", "model"]
        .iter()
        .find_map(|wanted| {
            list.iter()
                .find(|(k, v)| k.to_lowercase().contains(*wanted) && !v.is_empty())
                .map(|(_, v)| v.as_str())
        })
        .or_else(|| first_value(list))
}

fn find_value<'a>(entries: &'a Entries, id: u32, key_part: &str) -> Option<&'a str> {
    entries.get(&id)?.iter().find_map(|(k, v)| {
        (k.to_lowercase().contains(key_part) && !v.is_empty()).then_some(v.as_str())
    })
}

fn firmware_versions(list: &[(String, String)]) -> BTreeMap<String, String> {
    list.iter()
        .filter(|(k, _)| k.to_lowercase().contains("firmware version"))
        .map(|(k, v)| (k.clone(), clean_value(v)))
        .collect()
}

/// Map driver "not supported" chatter to the placeholder.
fn clean_value(value: &str) -> String {
    if value.contains("Not supported") || value.contains("get_") {
        NOT_AVAILABLE.to_string()
    } else {
        value.to_string()
    }
}
