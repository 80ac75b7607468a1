// src/device/dx1000.rs
//
// Yokogawa DX1000 adapter. Register layout is fixed by the vendor manual;
// only the per-channel tag/unit/alarm metadata comes from the device's own
// config text. DX200 (dx200.rs) reuses this module's parsing and poll
// logic wholesale — the two models differ only in the label reported to
// the manifest and the database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};

use crate::device::connection::ConnectionManager;
use crate::device::metadata::{decode_alarm_word, engineering_value, TagMetadata, DX1000_ALARM_MASKS, NO_TAG, UNUSED};
use crate::device::DeviceAdapter;
use crate::io::modbus::ModbusLink;
use crate::lanes::{DataPoint, DataTable, DeviceType};
use crate::logging::severe;

pub const PORT: u16 = 502;
const START_DATA: u16 = 0;
const START_ALARMS: u16 = 1000;
const START_MATH: u16 = 2000;
const START_MATH_ALARMS: u16 = 3000;
const CLOCK_ADDR: u16 = 9000;

/// Channel numbers below this belong to measurement points; at or above it
/// they are math channels. Yokogawa's own channel numbering convention
/// (measurement 001-020, math 101-130) — the spec names only the register
/// layout, not how SR/SA/ST channel numbers map to data vs math, so this
/// split is inferred from the vendor numbering scheme rather than stated
/// outright.
const MATH_CHANNEL_FLOOR: u32 = 100;

#[derive(Default)]
struct ChannelAccum {
    units: Option<String>,
    decimal_shift: Option<u8>,
    alarm_types: [String; 4],
    tag: Option<String>,
}

impl ChannelAccum {
    fn into_metadata(self) -> TagMetadata {
        let alarm_types = {
            let mut out = self.alarm_types;
            for slot in &mut out {
                if slot.is_empty() {
                    *slot = UNUSED.to_string();
                }
            }
            out
        };
        TagMetadata {
            tag: self.tag.unwrap_or_else(|| NO_TAG.to_string()),
            units: self.units.unwrap_or_else(|| UNUSED.to_string()),
            decimal_shift: self.decimal_shift.unwrap_or(0),
            alarm_types,
        }
    }
}

pub struct YokogawaDx1000 {
    device_id: u32,
    priority: u8,
    ip: String,
    unit_id: u8,
    config_path: String,
    model_name: &'static str,
    data_tags: Vec<TagMetadata>,
    math_tags: Vec<TagMetadata>,
    conn: ConnectionManager,
}

impl YokogawaDx1000 {
    pub fn new(device_id: u32, priority: u8, ip: String, unit_id: u8, config_path: &str, lines: &[String]) -> Self {
        Self::new_with_label(device_id, priority, ip, unit_id, config_path, lines, "DX1000")
    }

    /// Shared by dx200.rs, which differs only in the reported model label.
    pub fn new_with_label(
        device_id: u32,
        priority: u8,
        ip: String,
        unit_id: u8,
        config_path: &str,
        lines: &[String],
        model_name: &'static str,
    ) -> Self {
        let (data_tags, math_tags) = parse_channels(lines);
        Self {
            device_id,
            priority,
            ip,
            unit_id,
            config_path: config_path.to_string(),
            model_name,
            data_tags,
            math_tags,
            conn: ConnectionManager::new(),
        }
    }

    fn context(&self) -> String {
        format!("{}:{}", self.model_name, self.ip)
    }
}

fn parse_channels(lines: &[String]) -> (Vec<TagMetadata>, Vec<TagMetadata>) {
    let mut channels: BTreeMap<u32, ChannelAccum> = BTreeMap::new();

    for raw in lines {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("**") {
            continue;
        }

        if let Some((ch, rest)) = split_prefixed(line, "SR") {
            let (units, shift) = classify_range(rest);
            let entry = channels.entry(ch).or_default();
            entry.units = Some(units);
            entry.decimal_shift = Some(shift);
            continue;
        }
        if let Some((ch, rest)) = split_prefixed(line, "SA") {
            let fields: Vec<&str> = rest.split(',').map(|f| f.trim()).collect();
            if fields.len() >= 2 {
                if let Ok(slot) = fields[0].parse::<usize>() {
                    if (1..=4).contains(&slot) {
                        let on = fields[1].eq_ignore_ascii_case("ON");
                        let alarm_type = if on {
                            fields.get(2).map(|s| s.to_string()).unwrap_or_else(|| UNUSED.to_string())
                        } else {
                            UNUSED.to_string()
                        };
                        let entry = channels.entry(ch).or_default();
                        entry.alarm_types[slot - 1] = alarm_type;
                    }
                }
            }
            continue;
        }
        if let Some((ch, rest)) = split_prefixed(line, "ST") {
            let tag_field = rest.trim().trim_matches('"').trim_matches('\'');
            let tag = if tag_field.is_empty() {
                NO_TAG.to_string()
            } else {
                tag_field.to_string()
            };
            let entry = channels.entry(ch).or_default();
            entry.tag = Some(tag);
            continue;
        }
    }

    let mut data = Vec::new();
    let mut math = Vec::new();
    for (channel, accum) in channels {
        if channel < MATH_CHANNEL_FLOOR {
            data.push(accum.into_metadata());
        } else {
            math.push(accum.into_metadata());
        }
    }
    (data, math)
}

/// Split a line of the form `SR001, rest...` into its channel number and
/// the remainder after the prefix and channel digits.
fn split_prefixed<'a>(line: &'a str, prefix: &str) -> Option<(u32, &'a str)> {
    if line.len() < prefix.len() || !line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return None;
    }
    let after = &line[prefix.len()..];
    let digit_end = after.find(|c: char| !c.is_ascii_digit()).unwrap_or(after.len());
    if digit_end == 0 {
        return None;
    }
    let channel: u32 = after[..digit_end].parse().ok()?;
    let rest = after[digit_end..].trim_start_matches([',', ' ']);
    Some((channel, rest))
}

/// Implements the §4.2.2 precedence table mapping an `SR` line's free-form
/// tail to `(units, decimalShift)`.
pub(crate) fn classify_range(rest: &str) -> (String, u8) {
    let upper = rest.to_ascii_uppercase();
    let fields: Vec<&str> = rest.split(',').map(|f| f.trim()).collect();
    let from_end = |n: usize| -> String {
        if fields.len() >= n {
            fields[fields.len() - n].to_string()
        } else {
            String::new()
        }
    };
    let shift = |s: &str| -> u8 { s.trim().parse().unwrap_or(0) };
    let contains = |needle: &str| upper.contains(needle);

    if contains("SKIP") || contains("VOLT,2V,-20000,20000") {
        return (UNUSED.to_string(), 0);
    }
    if contains("DELTA") && contains("VOLT") && contains("2V") {
        return ("NO UNITS".to_string(), 4);
    }
    if contains("DELTA") && contains("VOLT") && (contains("20MV") || contains("6V") || contains("20V")) {
        return ("NO UNITS".to_string(), 3);
    }
    if contains("DELTA") && contains("VOLT") {
        return ("NO UNITS".to_string(), 2);
    }
    if contains("DELTA") && (contains("RTD") || contains("TC")) {
        return ("F".to_string(), 1);
    }
    if contains("DELTA") && contains("DI") {
        return ("NO UNITS".to_string(), 0);
    }
    if contains("DELTA") {
        let last = from_end(1);
        if last.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false) {
            return (last, 2);
        }
    }
    if contains("SCALE") && (contains("VOLT") || contains("DI")) {
        return (from_end(1), shift(&from_end(2)));
    }
    if contains("SCALE") && (contains("RTD") || contains("TC")) {
        return ("F".to_string(), shift(&from_end(2)));
    }
    if contains("SCALE") && contains("1-5V") {
        return (from_end(2), shift(&from_end(3)));
    }
    if contains("SCALE") {
        return (from_end(1), 0);
    }
    if contains("SQRT") && contains("ON") {
        return (from_end(3), shift(&from_end(4)));
    }
    if contains("SQRT") {
        return (from_end(2), shift(&from_end(3)));
    }
    if contains("VOLT") && contains("2V") {
        return ("V".to_string(), 4);
    }
    if contains("VOLT") && (contains("20MV") || contains("6V") || contains("20V")) {
        return ("V".to_string(), 3);
    }
    if contains("VOLT") {
        return ("V".to_string(), 2);
    }
    if contains("RTD") || contains("TC") {
        return ("F".to_string(), 1);
    }
    if contains("DI") {
        return ("NO UNITS".to_string(), 0);
    }
    ("NO UNITS".to_string(), 0)
}

async fn read_clock(link: &mut ModbusLink) -> Option<DateTime<Local>> {
    let regs = link.read_input_16(CLOCK_ADDR, 7).await;
    if regs.len() < 7 {
        return None;
    }
    let year = 1900 + regs[0] as i32;
    let (month, day, hour, min, sec, ms) = (
        regs[1] as u32,
        regs[2] as u32,
        regs[3] as u32,
        regs[4] as u32,
        regs[5] as u32,
        regs[6] as u32,
    );
    Local
        .with_ymd_and_hms(year, month, day, hour, min, sec)
        .single()
        .map(|dt| dt + chrono::Duration::milliseconds(ms as i64))
}

#[async_trait]
impl DeviceAdapter for YokogawaDx1000 {
    fn model_name(&self) -> &'static str {
        self.model_name
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn ip(&self) -> &str {
        &self.ip
    }

    fn unit_id(&self) -> u8 {
        self.unit_id
    }

    fn config_path(&self) -> &str {
        &self.config_path
    }

    fn transmitted_metadata(&self) -> Vec<TagMetadata> {
        self.data_tags
            .iter()
            .chain(self.math_tags.iter())
            .filter(|m| !m.is_unused())
            .cloned()
            .collect()
    }

    async fn poll(&mut self) -> Option<DataTable> {
        if !self.conn.gate() {
            return None;
        }

        let mut link = match ModbusLink::connect(&self.ip, PORT, self.unit_id).await {
            Ok(l) => {
                self.conn.record_open_success(&self.context());
                l
            }
            Err(e) => {
                self.conn.record_open_failure(&self.context());
                severe!("[{}] connect failed: {}", self.context(), e);
                return None;
            }
        };

        let timestamp = read_clock(&mut link).await.unwrap_or_else(Local::now);

        let n_data = self.data_tags.len() as u16;
        let n_math = self.math_tags.len() as u16;

        let data_raw = link.read_input_16(START_DATA, n_data).await;
        let alarm_data_raw = link.read_input_16(START_ALARMS, n_data).await;
        let math_raw = link.read_input_32_le(START_MATH, n_math).await;
        let alarm_math_raw = link.read_input_16(START_MATH_ALARMS, n_math).await;

        if (data_raw.len() as u16) < n_data || (math_raw.len() as u16) < n_math {
            return None;
        }

        let mut points = Vec::with_capacity(self.data_tags.len() + self.math_tags.len());
        for (i, meta) in self.data_tags.iter().enumerate() {
            if meta.is_unused() {
                continue;
            }
            let value = engineering_value(data_raw[i] as i64, meta.decimal_shift);
            let word = alarm_data_raw.get(i).copied().unwrap_or(0);
            points.push(DataPoint::with_alarms(value, decode_alarm_word(word, DX1000_ALARM_MASKS)));
        }
        for (i, meta) in self.math_tags.iter().enumerate() {
            if meta.is_unused() {
                continue;
            }
            let value = engineering_value(math_raw[i] as i64, meta.decimal_shift);
            let word = alarm_math_raw.get(i).copied().unwrap_or(0);
            points.push(DataPoint::with_alarms(value, decode_alarm_word(word, DX1000_ALARM_MASKS)));
        }

        Some(DataTable {
            timestamp,
            device_type: DeviceType::Recorder,
            device_id: self.device_id,
            data: points,
        })
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_worked_example_skips_unused_and_scales_tc() {
        let lines: Vec<String> = vec![
            "SR001, VOLT,2V,-20000,20000".to_string(),
            "SR002, TC,K,0,1000,F,0,NORMAL".to_string(),
        ];
        let (data, math) = parse_channels(&lines);
        assert!(math.is_empty());
        assert_eq!(data.len(), 2);
        assert!(data[0].is_unused());
        assert_eq!(data[1].units, "F");
        assert_eq!(data[1].decimal_shift, 1);
    }

    #[test]
    fn sa_lines_accumulate_four_alarm_slots() {
        let lines: Vec<String> = vec![
            "SR001, TC,K,0,1000,F,0,NORMAL".to_string(),
            "SA001, 1, ON, HH".to_string(),
            "SA001, 2, OFF, ".to_string(),
            "SA001, 3, ON, LL".to_string(),
            "SA001, 4, OFF, ".to_string(),
        ];
        let (data, _math) = parse_channels(&lines);
        assert_eq!(data[0].alarm_types, ["HH".to_string(), UNUSED.to_string(), "LL".to_string(), UNUSED.to_string()]);
    }

    #[test]
    fn st_line_blank_tag_becomes_no_tag_unused() {
        let lines: Vec<String> = vec!["SR001, TC,K,0,1000,F,0,NORMAL".to_string(), "ST001, ''".to_string()];
        let (data, _math) = parse_channels(&lines);
        assert_eq!(data[0].tag, NO_TAG);
    }

    #[test]
    fn math_channel_numbers_split_from_data() {
        let lines: Vec<String> = vec![
            "SR001, TC,K,0,1000,F,0,NORMAL".to_string(),
            "SR101, SCALE,VOLT,0,100,PSI,1".to_string(),
        ];
        let (data, math) = parse_channels(&lines);
        assert_eq!(data.len(), 1);
        assert_eq!(math.len(), 1);
    }
}
