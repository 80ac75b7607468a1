// src/device/factory.rs
//
// Model-name dispatch (§4.2.5): given a manifest line's model token and its
// config file's lines, build the matching concrete adapter. Case-insensitive,
// with an optional "Yokogawa" prefix tolerated on any of the three
// recognized recorder models.

use crate::device::dx1000::YokogawaDx1000;
use crate::device::dx200::YokogawaDx200;
use crate::device::gx20::YokogawaGx20;
use crate::device::Device;

/// Build a device from a manifest-declared model name. Returns `None` for
/// an unrecognized model; the manifest loader logs SEVERE and skips the
/// line.
pub fn build(
    model: &str,
    device_id: u32,
    priority: u8,
    ip: String,
    unit_id: u8,
    config_path: &str,
    config_lines: &[String],
) -> Option<Device> {
    let normalized = strip_vendor_prefix(model).to_ascii_uppercase();
    match normalized.as_str() {
        "GX20" => Some(Device::Gx20(YokogawaGx20::new(
            device_id,
            priority,
            ip,
            unit_id,
            config_path,
            config_lines,
        ))),
        "DX200" => Some(Device::Dx200(YokogawaDx200::new(
            device_id,
            priority,
            ip,
            unit_id,
            config_path,
            config_lines,
        ))),
        "DX1000" => Some(Device::Dx1000(YokogawaDx1000::new(
            device_id,
            priority,
            ip,
            unit_id,
            config_path,
            config_lines,
        ))),
        _ => None,
    }
}

fn strip_vendor_prefix(model: &str) -> &str {
    let trimmed = model.trim();
    for prefix in ["Yokogawa ", "Yokogawa"] {
        if trimmed.len() > prefix.len() && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return trimmed[prefix.len()..].trim();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_bare_and_vendor_prefixed_model_names() {
        assert!(build("GX20", 0, 1, "10.0.0.1".into(), 1, "gx20.cfg", &[]).is_some());
        assert!(build("Yokogawa DX1000", 0, 1, "10.0.0.1".into(), 1, "dx1000.cfg", &[]).is_some());
        assert!(build("dx200", 0, 1, "10.0.0.1".into(), 1, "dx200.cfg", &[]).is_some());
    }

    #[test]
    fn unknown_model_yields_none() {
        assert!(build("Siemens S7", 0, 1, "10.0.0.1".into(), 1, "unknown.cfg", &[]).is_none());
    }
}
