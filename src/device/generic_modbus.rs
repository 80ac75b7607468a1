// src/device/generic_modbus.rs
//
// The generic Modbus adapter. Unlike the Yokogawa recorders, a plain Modbus
// device's identity (ip/port/unit/priority) lives inside its own config
// file rather than on the manifest line — the manifest only says
// `Modbus, <path>`.

use crate::device::connection::ConnectionManager;
use crate::device::metadata::{engineering_value, UNUSED};
use crate::device::DeviceAdapter;
use crate::io::modbus::ModbusLink;
use crate::lanes::{DataPoint, DataTable, DeviceType};
use crate::logging::severe;

use async_trait::async_trait;
use chrono::Local;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DataType {
    ShortHolding,
    ShortInput,
    BigEndianHolding,
    BigEndianInput,
    LittleEndianHolding,
    LittleEndianInput,
    SingleBitHolding,
    SingleBitInput,
}

impl DataType {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short holding" => Some(DataType::ShortHolding),
            "short input" => Some(DataType::ShortInput),
            "big endian holding" => Some(DataType::BigEndianHolding),
            "big endian input" => Some(DataType::BigEndianInput),
            "little endian holding" => Some(DataType::LittleEndianHolding),
            "little endian input" => Some(DataType::LittleEndianInput),
            "single bit holding" => Some(DataType::SingleBitHolding),
            "single bit input" => Some(DataType::SingleBitInput),
            _ => None,
        }
    }

    fn is_32bit(self) -> bool {
        matches!(
            self,
            DataType::BigEndianHolding
                | DataType::BigEndianInput
                | DataType::LittleEndianHolding
                | DataType::LittleEndianInput
        )
    }

    fn is_bit(self) -> bool {
        matches!(self, DataType::SingleBitHolding | DataType::SingleBitInput)
    }
}

/// One reading register block, started by a `Registers:` line and bound by
/// the tag rows that follow it until the next `Registers:`/`Data Type:`
/// pair.
struct Module {
    /// Zero-based internal start (`config_start - 1`), used as the Modbus
    /// read address.
    start_addr: u16,
    /// One-based inclusive start as written in the config, used to resolve
    /// a tag's `registerRef` into an offset within this block.
    config_start: u16,
    n_regs: u16,
    data_type: DataType,
    tags: Vec<TagBinding>,
}

struct TagBinding {
    tag: String,
    units: String,
    decimal_shift: u8,
    /// Index of this tag's value within the block's decoded reading, i.e.
    /// `registerRef - configStart`.
    offset: u16,
}

pub struct GenericModbus {
    device_id: u32,
    priority: u8,
    ip: String,
    port: u16,
    unit_id: u8,
    config_path: String,
    modules: Vec<Module>,
    link: Option<ModbusLink>,
    conn: ConnectionManager,
}

impl GenericModbus {
    /// Parse a Modbus device config file's lines into an adapter. Returns
    /// `Err` with a human-readable reason on malformed required fields
    /// (bad IP, non-integer port/slave) — the caller logs SEVERE and drops
    /// the device, per the config-malformed error path.
    pub fn parse_config(device_id: u32, config_path: &str, lines: &[String]) -> Result<Self, String> {
        let mut ip: Option<String> = None;
        let mut port: u16 = 502;
        let mut unit_id: u8 = 1;
        let mut priority: u8 = 3;
        let mut modules: Vec<Module> = Vec::new();
        let mut pending_type: Option<DataType> = None;

        for raw in lines {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("**") {
                continue;
            }

            if let Some(rest) = strip_key(line, "Device Name:") {
                let _ = rest; // informational only
                continue;
            }
            if let Some(rest) = strip_key(line, "IP Address:") {
                ip = Some(rest.trim().to_string());
                continue;
            }
            if let Some(rest) = strip_key(line, "Slave number:") {
                unit_id = rest
                    .trim()
                    .parse()
                    .map_err(|_| format!("bad slave number: {}", rest))?;
                continue;
            }
            if let Some(rest) = strip_key(line, "Port:") {
                port = rest.trim().parse().map_err(|_| format!("bad port: {}", rest))?;
                continue;
            }
            if let Some(rest) = strip_key(line, "Priority:") {
                priority = match rest.trim().parse::<u8>() {
                    Ok(p) if (1..=3).contains(&p) => p,
                    _ => 3,
                };
                continue;
            }
            if let Some(rest) = strip_key(line, "Registers:") {
                let (start, end) = parse_range(rest)?;
                modules.push(Module {
                    start_addr: start.saturating_sub(1),
                    config_start: start,
                    n_regs: end - start + 1,
                    data_type: pending_type.unwrap_or(DataType::ShortHolding),
                    tags: Vec::new(),
                });
                continue;
            }
            if let Some(rest) = strip_key(line, "Data Type:") {
                let dt = DataType::parse(rest).ok_or_else(|| format!("unknown data type: {}", rest))?;
                pending_type = Some(dt);
                if let Some(last) = modules.last_mut() {
                    last.data_type = dt;
                }
                continue;
            }

            // Anything else non-empty is a tag row: tagName, units, decimals, registerRef
            let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
            if fields.len() < 4 {
                continue;
            }
            let module = match modules.last_mut() {
                Some(m) => m,
                None => continue,
            };
            let decimal_shift: u8 = fields[2].parse().unwrap_or(0);
            let register_ref: u16 = match fields[3].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            module.tags.push(TagBinding {
                tag: fields[0].to_string(),
                units: fields[1].to_string(),
                decimal_shift,
                offset: register_ref.saturating_sub(module.config_start),
            });
        }

        let ip = ip.ok_or_else(|| "missing IP Address:".to_string())?;

        Ok(Self {
            device_id,
            priority,
            ip,
            port,
            unit_id,
            config_path: config_path.to_string(),
            modules,
            link: None,
            conn: ConnectionManager::new(),
        })
    }

    fn context(&self) -> String {
        format!("modbus:{}", self.ip)
    }

    /// Decode one module's raw register read into per-tag engineering
    /// values, honoring the data-type's 16/32-bit and bit-index rules.
    async fn poll_module(&mut self, module: &Module) -> Vec<(String, String, f64)> {
        let link = self.link.as_mut().expect("link opened before poll_module");
        let mut out = Vec::new();

        if module.data_type.is_bit() {
            // `single bit holding`/`single bit input` repurpose the tag
            // row's decimals column as a bit index into the block's coil
            // array rather than a decimal-shift divisor (the registerRef
            // offset isn't meaningful here).
            let bits = match module.data_type {
                DataType::SingleBitHolding => link.read_holding_bits(module.start_addr, module.n_regs).await,
                DataType::SingleBitInput => link.read_input_bits(module.start_addr, module.n_regs).await,
                _ => unreachable!(),
            };
            for t in &module.tags {
                if let Some(v) = bit_value(&bits, t.decimal_shift) {
                    out.push((t.tag.clone(), t.units.clone(), v));
                }
            }
            return out;
        }

        if module.data_type.is_32bit() {
            let regs = match module.data_type {
                DataType::BigEndianHolding => link.read_holding_32_be(module.start_addr, module.n_regs).await,
                DataType::BigEndianInput => link.read_input_32_be(module.start_addr, module.n_regs).await,
                DataType::LittleEndianHolding => link.read_holding_32_le(module.start_addr, module.n_regs).await,
                DataType::LittleEndianInput => link.read_input_32_le(module.start_addr, module.n_regs).await,
                _ => unreachable!(),
            };
            for t in &module.tags {
                if let Some(raw) = regs.get(t.offset as usize) {
                    out.push((t.tag.clone(), t.units.clone(), engineering_value(*raw as i64, t.decimal_shift)));
                }
            }
            return out;
        }

        let regs = match module.data_type {
            DataType::ShortHolding => link.read_holding_16(module.start_addr, module.n_regs).await,
            DataType::ShortInput => link.read_input_16(module.start_addr, module.n_regs).await,
            _ => unreachable!(),
        };
        for t in &module.tags {
            if let Some(raw) = regs.get(t.offset as usize) {
                out.push((t.tag.clone(), t.units.clone(), engineering_value(*raw as i64, t.decimal_shift)));
            }
        }
        out
    }
}

#[async_trait]
impl DeviceAdapter for GenericModbus {
    fn model_name(&self) -> &'static str {
        "Modbus"
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

    fn transmitted_metadata(&self) -> Vec<crate::device::metadata::TagMetadata> {
        self.modules
            .iter()
            .flat_map(|m| {
                m.tags.iter().map(|t| crate::device::metadata::TagMetadata {
                    tag: t.tag.clone(),
                    units: t.units.clone(),
                    decimal_shift: t.decimal_shift,
                    alarm_types: [UNUSED.to_string(), UNUSED.to_string(), UNUSED.to_string(), UNUSED.to_string()],
                })
            })
            .filter(|m| m.units != UNUSED)
            .collect()
    }

    async fn poll(&mut self) -> Option<DataTable> {
        if !self.conn.gate() {
            return None;
        }

        match ModbusLink::connect(&self.ip, self.port, self.unit_id).await {
            Ok(link) => {
                self.conn.record_open_success(&self.context());
                self.link = Some(link);
            }
            Err(e) => {
                self.conn.record_open_failure(&self.context());
                severe!("[{}] connect failed: {}", self.context(), e);
                return None;
            }
        }

        let mut data = Vec::new();
        let modules: Vec<Module> = std::mem::take(&mut self.modules);
        for module in &modules {
            for (_tag, units, value) in self.poll_module(module).await {
                if units == UNUSED {
                    continue;
                }
                data.push(DataPoint::plain(value));
            }
        }
        self.modules = modules;
        self.link = None;

        Some(DataTable {
            timestamp: Local::now(),
            device_type: DeviceType::ModbusDevice,
            device_id: self.device_id,
            data,
        })
    }

    async fn close(&mut self) {
        self.link = None;
    }
}

fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    if line.len() >= key.len() && line[..key.len()].eq_ignore_ascii_case(key) {
        Some(&line[key.len()..])
    } else {
        None
    }
}

fn parse_range(rest: &str) -> Result<(u16, u16), String> {
    let parts: Vec<&str> = rest.split(',').map(|p| p.trim()).collect();
    if parts.len() != 2 {
        return Err(format!("malformed Registers: line: {}", rest));
    }
    let start: u16 = parts[0].parse().map_err(|_| format!("bad register start: {}", parts[0]))?;
    let end: u16 = parts[1].parse().map_err(|_| format!("bad register end: {}", parts[1]))?;
    Ok((start, end))
}

/// Pick bit `bit_index` out of a block's decoded coil/discrete-input
/// array, yielding 0.0/1.0 per §4.2.1's `single bit holding`/`single bit
/// input` rule.
fn bit_value(bits: &[bool], bit_index: u8) -> Option<f64> {
    bits.get(bit_index as usize).map(|b| if *b { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        s.lines().map(|l| l.to_string()).collect()
    }

    #[test]
    fn parses_s1_worked_example_layout() {
        let cfg = lines(concat!(
            "Device Name: demo\n",
            "IP Address: 10.0.0.5\n",
            "Slave number: 1\n",
            "Priority: 2\n",
            "Registers: 40001, 40002\n",
            "Data Type: short holding\n",
            "temp1, C, 1, 40001\n",
        ));
        let dev = GenericModbus::parse_config(0, "demo.cfg", &cfg).unwrap();
        assert_eq!(dev.ip, "10.0.0.5");
        assert_eq!(dev.unit_id, 1);
        assert_eq!(dev.priority, 2);
        assert_eq!(dev.modules.len(), 1);
        let module = &dev.modules[0];
        assert_eq!(module.start_addr, 40000);
        assert_eq!(module.n_regs, 2);
        assert_eq!(module.tags.len(), 1);
        assert_eq!(module.tags[0].offset, 0);
        assert_eq!(module.tags[0].decimal_shift, 1);
    }

    #[test]
    fn rejects_missing_ip() {
        let cfg = lines("Registers: 1, 2\nData Type: short holding\n");
        assert!(GenericModbus::parse_config(0, "demo.cfg", &cfg).is_err());
    }

    #[test]
    fn defaults_out_of_range_priority_to_three() {
        let cfg = lines("IP Address: 1.2.3.4\nPriority: 9\n");
        let dev = GenericModbus::parse_config(0, "demo.cfg", &cfg).unwrap();
        assert_eq!(dev.priority, 3);
    }

    #[test]
    fn single_bit_tag_row_carries_bit_index_in_decimal_shift() {
        let cfg = lines(concat!(
            "IP Address: 10.0.0.5\n",
            "Registers: 1, 8\n",
            "Data Type: single bit holding\n",
            "din, NO UNITS, 3, 1\n",
        ));
        let dev = GenericModbus::parse_config(0, "demo.cfg", &cfg).unwrap();
        assert_eq!(dev.modules[0].tags[0].decimal_shift, 3);
    }

    #[test]
    fn bit_value_reads_the_indexed_bit_not_the_first() {
        let bits = [false, false, false, true, false];
        assert_eq!(bit_value(&bits, 3), Some(1.0));
        assert_eq!(bit_value(&bits, 0), Some(0.0));
        assert_eq!(bit_value(&bits, 99), None);
    }
}
