//! Text parser for `rocm-smi` output.
//!
//! The default `rocm-smi` table prints one summary line per device, starting
//! with the device index:
//!
//! ```text
//! 0       1     0x744c,   8390   45.0°C  120.0W  N/A, N/A, 0   2000Mhz  1000Mhz  20.0%  auto  300.0W  50%   80%
//! ```
//!
//! Supplementary invocations (`--showmeminfo vram`, `-c`) print
//! `GPU[n] : ...` lines instead. The sampler concatenates every output into a
//! single buffer, so those lines are scanned across the whole input and
//! matched back to devices by index.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::ParseError;
use crate::model::{DeviceRecord, Sample};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Stateless `rocm-smi` parser holding its compiled patterns.
pub struct Parser {
    device_line: Regex,
    temperature: Regex,
    power: Regex,
    usage_pair: Regex,
    fan: Regex,
    vram_total: Regex,
    vram_used: Regex,
    sclk: Regex,
    mclk: Regex,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            device_line: pattern(r"^(\d+)\s"),
            // A number not glued to a hex literal or identifier, then `°C`
            // (spacing allowed) or a bare `c` directly after the digits.
            temperature: pattern(r"(?:^|[^\w.])(\d+(?:\.\d+)?)(?:\s*°C|[Cc]\b)"),
            power: pattern(r"(?:^|[^\w.])(\d+(?:\.\d+)?)\s*W\b"),
            // VRAM% then GPU% at the very end of the line.
            usage_pair: pattern(r"(?m)(\d+(?:\.\d+)?)%\s+(\d+(?:\.\d+)?)%\s*$"),
            fan: pattern(r"(\d+(?:\.\d+)?)%\s+auto"),
            vram_total: pattern(r"GPU\[(\d+)\]\s*:\s*VRAM Total Memory \(B\):\s*(\d+)"),
            vram_used: pattern(r"GPU\[(\d+)\]\s*:\s*VRAM Total Used Memory \(B\):\s*(\d+)"),
            sclk: pattern(r"GPU\[(\d+)\]\s*:\s*sclk clock level:\s*\d+:\s*\((\d+)(?i:mhz)\)"),
            mclk: pattern(r"GPU\[(\d+)\]\s*:\s*mclk clock level:\s*\d+:\s*\((\d+)(?i:mhz)\)"),
        }
    }

    /// Parse `raw`, stamping the sample with the current time.
    pub fn parse(&self, raw: &str) -> Result<Sample, ParseError> {
        self.parse_at(raw, Utc::now())
    }

    /// Parse `raw` into a sample captured at `timestamp`.
    ///
    /// Host CPU usage is left at zero; the sampler fills it in.
    pub fn parse_at(&self, raw: &str, timestamp: DateTime<Utc>) -> Result<Sample, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let vram_total = scan_by_index(&self.vram_total, raw, |bytes| bytes / BYTES_PER_GB);
        let vram_used = scan_by_index(&self.vram_used, raw, |bytes| bytes / BYTES_PER_GB);
        let sclk = scan_by_index(&self.sclk, raw, |mhz| mhz);
        let mclk = scan_by_index(&self.mclk, raw, |mhz| mhz);

        let (sections, implicit) = self.split_by_device(raw);
        let mut partial = implicit;
        let mut devices = Vec::with_capacity(sections.len());

        for (id, section) in sections {
            let mut device = DeviceRecord {
                id,
                ..Default::default()
            };

            match first_number(&self.temperature, section) {
                Some(v) => device.temperature_c = v,
                None => partial = true,
            }
            match first_number(&self.power, section) {
                Some(v) => device.power_w = v,
                None => partial = true,
            }
            match self.usage_pair.captures(section) {
                Some(caps) => {
                    let vram_pct = number(caps.get(1).map(|m| m.as_str()));
                    device.vram_used_pct = vram_pct;
                    device.vram_used_gb = vram_pct;
                    device.gpu_usage_pct = number(caps.get(2).map(|m| m.as_str()));
                }
                None => partial = true,
            }
            if let Some(v) = first_number(&self.fan, section) {
                device.fan_speed_pct = v;
            }

            if let Some(&mhz) = sclk.get(&id) {
                device.sclk_mhz = mhz;
            }
            if let Some(&mhz) = mclk.get(&id) {
                device.mclk_mhz = mhz;
            }
            if let Some(&total) = vram_total.get(&id) {
                device.vram_total_gb = total;
            }
            // Detailed byte counts win over the percentage token.
            if let Some(&used) = vram_used.get(&id) {
                device.vram_used_gb = used;
            }

            devices.push(device);
        }

        if devices.is_empty() {
            return Err(ParseError::NoDeviceData);
        }

        Ok(Sample {
            timestamp,
            devices,
            host_cpu_usage: 0.0,
            partial,
        })
    }

    /// Group the output into one summary line per device index, in the order
    /// devices were discovered. A repeated index replaces the earlier line.
    ///
    /// Returns `true` as the second element when no device line was found and
    /// the whole output stands in for an implicit device 0.
    fn split_by_device<'a>(&self, raw: &'a str) -> (Vec<(u32, &'a str)>, bool) {
        let mut sections: Vec<(u32, &'a str)> = Vec::new();

        for line in raw.lines() {
            let Some(caps) = self.device_line.captures(line) else {
                continue;
            };
            let Ok(id) = caps[1].parse::<u32>() else {
                continue;
            };
            match sections.iter_mut().find(|(existing, _)| *existing == id) {
                Some(slot) => slot.1 = line,
                None => sections.push((id, line)),
            }
        }

        if sections.is_empty() {
            return (vec![(0, raw)], true);
        }
        (sections, false)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

// --- Free helper functions ---

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("built-in pattern compiles")
}

fn number(text: Option<&str>) -> f64 {
    text.and_then(|t| t.parse().ok()).unwrap_or(0.0)
}

fn first_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text).map(|caps| number(caps.get(1).map(|m| m.as_str())))
}

/// Collect `GPU[n] ... value` matches into index → converted value. The
/// first match for an index wins.
fn scan_by_index(re: &Regex, raw: &str, convert: impl Fn(f64) -> f64) -> HashMap<u32, f64> {
    let mut result = HashMap::new();
    for caps in re.captures_iter(raw) {
        let Ok(id) = caps[1].parse::<u32>() else {
            continue;
        };
        let value = number(caps.get(2).map(|m| m.as_str()));
        result.entry(id).or_insert_with(|| convert(value));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_DEVICES: &str = "\
========================================= ROCm System Management Interface =========================================
=================================================== Concise Info ===================================================
Device  Node  IDs              Temp    Power   Partitions          SCLK     MCLK     Fan    Perf  PwrCap  VRAM%  GPU%
              (DID,     GUID)  (Edge)  (Avg)   (Mem, Compute, ID)
====================================================================================================================
0       1     0x744c,   8390   45.0°C  120.0W  N/A, N/A, 0         2000Mhz  1000Mhz  20.0%  auto  300.0W  50%    80%
1       2     0x744c,   21907  51.0°C  210.5W  N/A, N/A, 0         2300Mhz  1249Mhz  35.0%  auto  300.0W  12%    99%
2       3     0x73bf,   4437   38.0°C  15.0W   N/A, N/A, 0         500Mhz   96Mhz    0.0%   auto  255.0W  3%     0%
====================================================================================================================
=============================================== End of ROCm SMI Log ================================================
";

    const VRAM_INFO: &str = "\
============================ ROCm System Management Interface ============================
================================== Memory Usage (Bytes) ==================================
GPU[0]          : VRAM Total Memory (B): 25753026560
GPU[0]          : VRAM Total Used Memory (B): 4294967296
GPU[1]          : VRAM Total Memory (B): 17163091968
GPU[1]          : VRAM Total Used Memory (B): 1073741824
==========================================================================================
";

    const CLOCKS: &str = "\
============================ ROCm System Management Interface ============================
================================ Current clock frequencies ================================
GPU[0]          : fclk clock level: 0: (1940Mhz)
GPU[0]          : mclk clock level: 3: (1249Mhz)
GPU[0]          : sclk clock level: 1: (2021Mhz)
GPU[1]          : mclk clock level: 0: (96Mhz)
GPU[1]          : sclk clock level: 0: (500Mhz)
==========================================================================================
";

    #[test]
    fn parse_three_device_lines() {
        let sample = Parser::new().parse(THREE_DEVICES).unwrap();
        assert_eq!(sample.devices.len(), 3);
        assert!(!sample.partial);

        let ids: Vec<u32> = sample.devices.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);

        let gpu1 = &sample.devices[1];
        assert_eq!(gpu1.temperature_c, 51.0);
        assert_eq!(gpu1.power_w, 210.5);
        assert_eq!(gpu1.vram_used_pct, 12.0);
        assert_eq!(gpu1.gpu_usage_pct, 99.0);
        assert_eq!(gpu1.fan_speed_pct, 35.0);

        let gpu2 = &sample.devices[2];
        assert_eq!(gpu2.temperature_c, 38.0);
        assert_eq!(gpu2.power_w, 15.0);
        assert_eq!(gpu2.gpu_usage_pct, 0.0);
    }

    #[test]
    fn hex_device_ids_are_not_read_as_temperature() {
        let sample = Parser::new().parse(THREE_DEVICES).unwrap();
        assert_eq!(sample.devices[0].temperature_c, 45.0);
    }

    #[test]
    fn parse_legacy_single_line() {
        let sample = Parser::new().parse("0  45.0c  120.0W  ...  50%  80%\n").unwrap();
        assert_eq!(sample.devices.len(), 1);

        let gpu = &sample.devices[0];
        assert_eq!(gpu.id, 0);
        assert_eq!(gpu.temperature_c, 45.0);
        assert_eq!(gpu.power_w, 120.0);
        assert!((gpu.vram_used_gb - 50.0).abs() < 1e-9);
        assert_eq!(gpu.gpu_usage_pct, 80.0);
        assert_eq!(sample.host_cpu_usage, 0.0);
    }

    #[test]
    fn parse_empty_input_fails() {
        let parser = Parser::new();
        assert_eq!(parser.parse(""), Err(ParseError::EmptyInput));
        assert_eq!(parser.parse("  \n\t\n"), Err(ParseError::EmptyInput));
    }

    #[test]
    fn output_without_device_lines_becomes_device_zero() {
        let sample = Parser::new().parse("GPU temperature 61.0c and 88.0W\n").unwrap();
        assert_eq!(sample.devices.len(), 1);
        assert_eq!(sample.devices[0].id, 0);
        assert_eq!(sample.devices[0].temperature_c, 61.0);
        assert_eq!(sample.devices[0].power_w, 88.0);
        assert!(sample.partial);
    }

    #[test]
    fn detached_c_is_not_a_temperature() {
        let sample = Parser::new()
            .parse("Found 2 C devices\nTemperature 55.0°C Power 80.0W\n")
            .unwrap();
        assert_eq!(sample.devices[0].temperature_c, 55.0);
        assert_eq!(sample.devices[0].power_w, 80.0);

        let sample = Parser::new().parse("0  61.5 °C  90.0W  10%  20%\n").unwrap();
        assert_eq!(sample.devices[0].temperature_c, 61.5);
    }

    #[test]
    fn missing_tokens_stay_zero_and_mark_partial() {
        let sample = Parser::new().parse("0  N/A  N/A  N/A\n").unwrap();
        let gpu = &sample.devices[0];
        assert_eq!(gpu.temperature_c, 0.0);
        assert_eq!(gpu.power_w, 0.0);
        assert_eq!(gpu.gpu_usage_pct, 0.0);
        assert!(sample.partial);
        assert!(sample.validate().is_ok());
    }

    #[test]
    fn detailed_vram_bytes_override_percentage() {
        let combined = format!("{THREE_DEVICES}\n{VRAM_INFO}");
        let sample = Parser::new().parse(&combined).unwrap();

        let gpu0 = &sample.devices[0];
        assert!((gpu0.vram_total_gb - 23.984375).abs() < 1e-6);
        assert!((gpu0.vram_used_gb - 4.0).abs() < 1e-9);
        assert_eq!(gpu0.vram_used_pct, 50.0);

        let gpu1 = &sample.devices[1];
        assert!((gpu1.vram_used_gb - 1.0).abs() < 1e-9);

        // No byte figures for GPU 2: the percentage token stays.
        let gpu2 = &sample.devices[2];
        assert_eq!(gpu2.vram_used_gb, 3.0);
        assert_eq!(gpu2.vram_total_gb, 0.0);
    }

    #[test]
    fn clocks_are_matched_by_device_index() {
        let combined = format!("{THREE_DEVICES}\n{CLOCKS}");
        let sample = Parser::new().parse(&combined).unwrap();

        assert_eq!(sample.devices[0].sclk_mhz, 2021.0);
        assert_eq!(sample.devices[0].mclk_mhz, 1249.0);
        assert_eq!(sample.devices[1].sclk_mhz, 500.0);
        assert_eq!(sample.devices[1].mclk_mhz, 96.0);
        assert_eq!(sample.devices[2].sclk_mhz, 0.0);
    }

    #[test]
    fn repeated_device_index_keeps_last_line() {
        let raw = "0  40.0c  100.0W  10%  20%\n0  42.0c  101.0W  11%  21%\n";
        let sample = Parser::new().parse(raw).unwrap();
        assert_eq!(sample.devices.len(), 1);
        assert_eq!(sample.devices[0].temperature_c, 42.0);
    }

    #[test]
    fn parse_at_uses_given_timestamp() {
        let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let sample = Parser::new().parse_at("0  45.0c  120.0W  50%  80%", ts).unwrap();
        assert_eq!(sample.timestamp, ts);
    }
}
