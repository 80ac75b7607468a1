// src/config/manifest.rs
//
// The main manifest (`config.txt`, §6): line-oriented, `**` and empty
// lines ignored, selects process role and lists every device. Both the
// transmit and receive side load the same file so device indices line up.

use std::path::Path;

use crate::device::factory;
use crate::device::generic_modbus::GenericModbus;
use crate::device::Device;
use crate::lanes::DeviceType;
use crate::logging::severe;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Transmit,
    Receive,
}

pub struct Manifest {
    pub role: Role,
    /// Every device in the order it appeared in `config.txt`. The poll
    /// scheduler walks this directly; the dispatcher instead uses
    /// [`Manifest::recorder_at`]/[`Manifest::modbus_at`], since a wire
    /// record's `deviceId` is assigned within its own category, not this
    /// combined list.
    pub devices: Vec<Device>,
}

impl Manifest {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let base_dir = path.parent().map(|p| p.to_path_buf());

        let mut role = Role::Transmit;
        let mut devices = Vec::new();
        let mut recorder_count: u32 = 0;
        let mut modbus_count: u32 = 0;

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with("**") {
                continue;
            }

            if let Some(rest) = strip_key(line, "Function:") {
                role = match rest.trim().to_ascii_lowercase().as_str() {
                    "receive" => Role::Receive,
                    _ => Role::Transmit,
                };
                continue;
            }

            if let Some(rest) = strip_key(line, "Modbus,") {
                let config_path = rest.trim();
                let resolved = resolve(&base_dir, config_path);
                match std::fs::read_to_string(&resolved) {
                    Ok(text) => {
                        let cfg_lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
                        match GenericModbus::parse_config(modbus_count, config_path, &cfg_lines) {
                            Ok(dev) => {
                                devices.push(Device::Modbus(dev));
                                modbus_count += 1;
                            }
                            Err(e) => severe!("[manifest] dropping modbus device {}: {}", config_path, e),
                        }
                    }
                    Err(e) => severe!("[manifest] cannot read modbus config {}: {}", config_path, e),
                }
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
            if fields.len() != 5 {
                severe!("[manifest] malformed manifest line, skipping: {}", line);
                continue;
            }
            let (model, config_path, ip, unit_field, priority_field) =
                (fields[0], fields[1], fields[2], fields[3], fields[4]);

            let unit_id: u8 = match unit_field.parse() {
                Ok(v) => v,
                Err(_) => {
                    severe!("[manifest] bad unit id {:?} for {}, skipping", unit_field, config_path);
                    continue;
                }
            };
            // Out-of-range priority silently maps to 3 (§9 open question 3:
            // a loose contract, kept as specified rather than rejected).
            let priority: u8 = match priority_field.parse::<u8>() {
                Ok(p) if (1..=3).contains(&p) => p,
                _ => 3,
            };

            let resolved = resolve(&base_dir, config_path);
            let cfg_lines: Vec<String> = match std::fs::read_to_string(&resolved) {
                Ok(text) => text.lines().map(|l| l.to_string()).collect(),
                Err(e) => {
                    severe!("[manifest] cannot read device config {}: {}", config_path, e);
                    continue;
                }
            };

            match factory::build(model, recorder_count, priority, ip.to_string(), unit_id, config_path, &cfg_lines) {
                Some(dev) => {
                    devices.push(dev);
                    recorder_count += 1;
                }
                None => severe!("[manifest] unknown model {:?}, skipping", model),
            }
        }

        Ok(Self { role, devices })
    }

    pub fn recorder_at(&self, index: u32) -> Option<&Device> {
        self.devices.iter().filter(|d| d.is_recorder()).nth(index as usize)
    }

    pub fn modbus_at(&self, index: u32) -> Option<&Device> {
        self.devices.iter().filter(|d| !d.is_recorder()).nth(index as usize)
    }

    pub fn find(&self, device_type: DeviceType, device_id: u32) -> Option<&Device> {
        match device_type {
            DeviceType::Recorder => self.recorder_at(device_id),
            DeviceType::ModbusDevice => self.modbus_at(device_id),
        }
    }
}

fn resolve(base_dir: &Option<std::path::PathBuf>, config_path: &str) -> std::path::PathBuf {
    let p = Path::new(config_path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match base_dir {
        Some(dir) => dir.join(p),
        None => p.to_path_buf(),
    }
}

fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    if line.len() >= key.len() && line[..key.len()].eq_ignore_ascii_case(key) {
        Some(&line[key.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("diode-bridge-manifest-test-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_one_modbus_and_one_dx1000_device_in_order() {
        let dir = scratch_dir("mixed");
        fs::write(dir.join("modbus1.cfg"), "IP Address: 10.0.0.5\nPriority: 2\n").unwrap();
        fs::write(dir.join("dx1.cfg"), "SR001, TC,K,0,1000,F,0,NORMAL\n").unwrap();
        fs::write(
            dir.join("config.txt"),
            "Function: Transmit\nModbus, modbus1.cfg\nDX1000,dx1.cfg,10.0.0.9,1,1\n",
        )
        .unwrap();

        let manifest = Manifest::load(&dir.join("config.txt")).unwrap();
        assert_eq!(manifest.role, Role::Transmit);
        assert_eq!(manifest.devices.len(), 2);
        assert_eq!(manifest.devices[0].model_name(), "Modbus");
        assert_eq!(manifest.devices[1].model_name(), "DX1000");
        assert!(manifest.modbus_at(0).is_some());
        assert!(manifest.recorder_at(0).is_some());
    }

    #[test]
    fn out_of_range_priority_field_maps_to_three() {
        let dir = scratch_dir("priority");
        fs::write(dir.join("dx1.cfg"), "SR001, TC,K,0,1000,F,0,NORMAL\n").unwrap();
        fs::write(dir.join("config.txt"), "DX1000,dx1.cfg,10.0.0.9,1,9\n").unwrap();

        let manifest = Manifest::load(&dir.join("config.txt")).unwrap();
        assert_eq!(manifest.devices[0].priority(), 3);
    }

    #[test]
    fn unknown_model_line_is_skipped() {
        let dir = scratch_dir("unknown");
        fs::write(dir.join("config.txt"), "Siemens S7,missing.cfg,10.0.0.9,1,1\n").unwrap();

        let manifest = Manifest::load(&dir.join("config.txt")).unwrap();
        assert!(manifest.devices.is_empty());
    }
}
