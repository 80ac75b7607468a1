// src/device/gx20.rs
//
// Yokogawa GX20 adapter. Differs structurally from the DX1000/DX200 family
// because expansion chassis produce non-contiguous channel ranges: analog
// channels are grouped into "channel modules", each a contiguous run of
// channel numbers, and each module is addressed separately at poll time.
// Math channels have no such chassis and are handled as one flat block,
// the same way the DX1000 handles its math channels.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Local;

use crate::device::connection::ConnectionManager;
use crate::device::metadata::{decode_alarm_word, engineering_value, TagMetadata, GX20_ALARM_MASKS, NO_TAG, UNUSED};
use crate::device::{ChannelModule, DeviceAdapter};
use crate::io::modbus::ModbusLink;
use crate::lanes::{DataPoint, DataTable, DeviceType};
use crate::logging::severe;

pub const PORT: u16 = 502;
const START_ALARMS: u16 = 2500;
const START_MATH: u16 = 5000;
const START_MATH_ALARMS: u16 = 5500;
const DATA_WORDS_PER_POINT: u16 = 2;

/// The controller's register-file origin: an expansion module's channel
/// addressing is relative to this, not to `START_DATA`.
const MODULE_ADDR_ORIGIN: u16 = 8999;

#[derive(Default)]
struct ChannelAccum {
    units: Option<String>,
    decimal_shift: Option<u8>,
    alarm_types: [String; 4],
    tag: Option<String>,
}

impl ChannelAccum {
    fn into_metadata(self) -> TagMetadata {
        let mut alarm_types = self.alarm_types;
        for slot in &mut alarm_types {
            if slot.is_empty() {
                *slot = UNUSED.to_string();
            }
        }
        TagMetadata {
            tag: self.tag.unwrap_or_else(|| NO_TAG.to_string()),
            units: self.units.unwrap_or_else(|| UNUSED.to_string()),
            decimal_shift: self.decimal_shift.unwrap_or(0),
            alarm_types,
        }
    }
}

pub struct YokogawaGx20 {
    device_id: u32,
    priority: u8,
    ip: String,
    unit_id: u8,
    config_path: String,
    data_tags: Vec<TagMetadata>,
    channel_modules: Vec<ChannelModule>,
    math_tags: Vec<TagMetadata>,
    conn: ConnectionManager,
}

impl YokogawaGx20 {
    pub fn new(device_id: u32, priority: u8, ip: String, unit_id: u8, config_path: &str, lines: &[String]) -> Self {
        let (data_tags, channel_modules) = parse_io_channels(lines);
        let math_tags = parse_math_channels(lines);
        Self {
            device_id,
            priority,
            ip,
            unit_id,
            config_path: config_path.to_string(),
            data_tags,
            channel_modules,
            math_tags,
            conn: ConnectionManager::new(),
        }
    }

    fn context(&self) -> String {
        format!("GX20:{}", self.ip)
    }
}

/// Walk `SRANGEAI` lines in file order, splitting into modules whenever a
/// channel number is not immediately consecutive with the previous one.
fn discover_modules(lines: &[String]) -> Vec<Vec<u32>> {
    let mut modules: Vec<Vec<u32>> = Vec::new();
    for raw in lines {
        let line = raw.trim();
        if let Some((ch, _rest)) = split_prefixed(line, "SRANGEAI") {
            match modules.last_mut() {
                Some(current) if *current.last().unwrap() + 1 == ch => current.push(ch),
                _ => modules.push(vec![ch]),
            }
        }
    }
    modules
}

fn parse_io_channels(lines: &[String]) -> (Vec<TagMetadata>, Vec<ChannelModule>) {
    let modules = discover_modules(lines);
    let mut data_tags = Vec::new();
    let mut channel_modules = Vec::new();

    for channels in modules {
        let base_channel = channels[0];
        let mut accums: BTreeMap<u32, ChannelAccum> = BTreeMap::new();
        for &ch in &channels {
            accums.insert(ch, ChannelAccum::default());
        }

        for raw in lines {
            let line = raw.trim();
            if let Some((ch, rest)) = split_prefixed(line, "SRANGEAI") {
                if let Some(entry) = accums.get_mut(&ch) {
                    let (units, shift) = classify_range_gx20(rest);
                    entry.units = Some(units);
                    entry.decimal_shift = Some(shift);
                }
                continue;
            }
            if let Some((ch, rest)) = split_prefixed(line, "SALARMIO") {
                if let Some(entry) = accums.get_mut(&ch) {
                    apply_alarm_slot(entry, rest);
                }
                continue;
            }
            if let Some((ch, rest)) = split_prefixed(line, "STAGIO") {
                if let Some(entry) = accums.get_mut(&ch) {
                    apply_tag(entry, rest);
                }
                continue;
            }
        }

        let n_points = channels.len() as u16;
        let base_addr = MODULE_ADDR_ORIGIN + (base_channel as u16 - 1) * DATA_WORDS_PER_POINT;
        channel_modules.push(ChannelModule {
            base_channel,
            base_addr,
            n_points,
        });
        for ch in channels {
            data_tags.push(accums.remove(&ch).unwrap().into_metadata());
        }
    }

    (data_tags, channel_modules)
}

fn parse_math_channels(lines: &[String]) -> Vec<TagMetadata> {
    let mut accums: BTreeMap<u32, ChannelAccum> = BTreeMap::new();
    for raw in lines {
        let line = raw.trim();
        if let Some((ch, rest)) = split_prefixed(line, "SRANGEMATH") {
            let (units, shift) = classify_range_gx20(rest);
            let entry = accums.entry(ch).or_default();
            entry.units = Some(units);
            entry.decimal_shift = Some(shift);
            continue;
        }
        if let Some((ch, rest)) = split_prefixed(line, "SALARMMATH") {
            let entry = accums.entry(ch).or_default();
            apply_alarm_slot(entry, rest);
            continue;
        }
        if let Some((ch, rest)) = split_prefixed(line, "STAGMATH") {
            let entry = accums.entry(ch).or_default();
            apply_tag(entry, rest);
            continue;
        }
    }
    accums.into_values().map(ChannelAccum::into_metadata).collect()
}

fn apply_alarm_slot(entry: &mut ChannelAccum, rest: &str) {
    let fields: Vec<&str> = rest.split(',').map(|f| f.trim()).collect();
    if fields.len() < 2 {
        return;
    }
    let slot: usize = match fields[0].parse() {
        Ok(s) if (1..=4).contains(&s) => s,
        _ => return,
    };
    let on = fields[1].eq_ignore_ascii_case("ON");
    entry.alarm_types[slot - 1] = if on {
        fields.get(2).map(|s| s.to_string()).unwrap_or_else(|| UNUSED.to_string())
    } else {
        UNUSED.to_string()
    };
}

fn apply_tag(entry: &mut ChannelAccum, rest: &str) {
    let tag_field = rest.trim().trim_matches('"').trim_matches('\'');
    entry.tag = Some(if tag_field.is_empty() {
        NO_TAG.to_string()
    } else {
        tag_field.to_string()
    });
}

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

/// DX1000's precedence table plus the GX20-specific `LOG`/`GS` sub-ranges
/// (§4.2.3's "minor additions"), checked ahead of the shared rules.
fn classify_range_gx20(rest: &str) -> (String, u8) {
    let upper = rest.to_ascii_uppercase();
    if upper.contains("SKIP") {
        return (UNUSED.to_string(), 0);
    }
    if upper.contains("LOG") {
        return ("NO UNITS".to_string(), 2);
    }
    if upper.contains("GS") {
        return ("NO UNITS".to_string(), 3);
    }
    crate::device::dx1000::classify_range(rest)
}

#[async_trait]
impl DeviceAdapter for YokogawaGx20 {
    fn model_name(&self) -> &'static str {
        "GX20"
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

        let mut data_raw: Vec<u32> = Vec::with_capacity(self.data_tags.len());
        for module in &self.channel_modules {
            let values = link.read_input_32_le(module.base_addr, module.n_points).await;
            if values.len() < module.n_points as usize {
                return None;
            }
            data_raw.extend(values);
        }

        let n_data = self.data_tags.len() as u16;
        let n_math = self.math_tags.len() as u16;
        let alarm_data_raw = link.read_input_16(START_ALARMS, n_data).await;
        let math_raw = link.read_input_32_le(START_MATH, n_math).await;
        let alarm_math_raw = link.read_input_16(START_MATH_ALARMS, n_math).await;

        if (math_raw.len() as u16) < n_math {
            return None;
        }

        let mut points = Vec::with_capacity(self.data_tags.len() + self.math_tags.len());
        for (i, meta) in self.data_tags.iter().enumerate() {
            if meta.is_unused() {
                continue;
            }
            let value = engineering_value(data_raw[i] as i64, meta.decimal_shift);
            let word = alarm_data_raw.get(i).copied().unwrap_or(0);
            points.push(DataPoint::with_alarms(value, decode_alarm_word(word, GX20_ALARM_MASKS)));
        }
        for (i, meta) in self.math_tags.iter().enumerate() {
            if meta.is_unused() {
                continue;
            }
            let value = engineering_value(math_raw[i] as i64, meta.decimal_shift);
            let word = alarm_math_raw.get(i).copied().unwrap_or(0);
            points.push(DataPoint::with_alarms(value, decode_alarm_word(word, GX20_ALARM_MASKS)));
        }

        Some(DataTable {
            timestamp: Local::now(),
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
    fn s3_split_modules_have_expected_base_channels_and_sizes() {
        let lines: Vec<String> = vec![
            "SRANGEAI001, TC,K,0,1000,F,0,NORMAL".to_string(),
            "SRANGEAI002, TC,K,0,1000,F,0,NORMAL".to_string(),
            "SRANGEAI003, TC,K,0,1000,F,0,NORMAL".to_string(),
            "SRANGEAI011, TC,K,0,1000,F,0,NORMAL".to_string(),
            "SRANGEAI012, TC,K,0,1000,F,0,NORMAL".to_string(),
        ];
        let (data_tags, modules) = parse_io_channels(&lines);
        assert_eq!(data_tags.len(), 5);
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].base_channel, 1);
        assert_eq!(modules[0].n_points, 3);
        assert_eq!(modules[1].base_channel, 11);
        assert_eq!(modules[1].n_points, 2);
    }

    #[test]
    fn gx20_alarm_slots_use_single_bit_masks() {
        assert_eq!(decode_alarm_word(0x0005, GX20_ALARM_MASKS), [1, 0, 1, 0]);
    }
}
