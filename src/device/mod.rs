// src/device/mod.rs
//
// Device adapters: the common register-layout/metadata shapes, the shared
// connection-manager and Modbus I/O they're all built from, and the
// tagged-variant dispatch that stands in for "abstract recorder, concrete
// models" (enum-based dispatch rather than `Box<dyn DeviceAdapter>`, the
// same trade the `ProtocolClientImpl` enum in the reference IGW bridge
// makes to keep async trait methods usable without a vtable).

pub mod connection;
pub mod dx1000;
pub mod dx200;
pub mod factory;
pub mod generic_modbus;
pub mod gx20;
pub mod metadata;

use async_trait::async_trait;

use crate::device::metadata::TagMetadata;
use crate::lanes::DataTable;

/// Register layout derived from a device's config file. Not every field is
/// meaningful for every model: `n_math_points` is 0 for plain Modbus
/// devices, and GX20 additionally carries a list of channel modules.
#[derive(Clone, Debug, Default)]
pub struct RegisterLayout {
    pub start_data_addr: u16,
    pub n_data_points: u16,
    pub data_words_per_point: u8,
    pub start_alarm_addr: u16,
    pub start_math_addr: u16,
    pub n_math_points: u16,
    pub math_words_per_point: u8,
    pub start_math_alarm_addr: u16,
}

/// A GX20 expansion-chassis channel block: a contiguous run of channel
/// numbers starting at `base_channel`, covering `n_points` points, whose
/// absolute register address is `base_addr` within the module's own
/// register file. Modules hold the device's identity (ip/port/unit id) by
/// value where they need it — never an ownership-carrying pointer back to
/// the parent device.
#[derive(Clone, Debug)]
pub struct ChannelModule {
    pub base_channel: u32,
    pub base_addr: u16,
    pub n_points: u16,
}

/// Common contract every adapter implements. Failures during poll yield
/// `None` (an empty DataTable in the spec's terms) — never propagated as
/// an error, since a failed poll for one device must not interrupt the
/// scheduler's sweep over the rest of the manifest.
#[async_trait]
pub trait DeviceAdapter: Send {
    fn model_name(&self) -> &'static str;
    fn device_id(&self) -> u32;
    fn priority(&self) -> u8;
    fn ip(&self) -> &str;
    fn unit_id(&self) -> u8;
    fn config_path(&self) -> &str;
    /// The ordered, UNUSED-filtered tag metadata a poll's DataTable lines
    /// up with — used by the database writer to interpret a reconstructed
    /// record without needing a live connection to the device itself.
    fn transmitted_metadata(&self) -> Vec<TagMetadata>;
    async fn poll(&mut self) -> Option<DataTable>;
    async fn close(&mut self);
}

/// Enum-based dispatch over the four concrete adapters. Chosen over
/// `Box<dyn DeviceAdapter>` for the same reason the IGW bridge's
/// `ProtocolClientImpl` prefers an enum: async trait methods don't need to
/// be dyn-compatible, and the match is exhaustive by construction whenever
/// a new model is added.
pub enum Device {
    Gx20(gx20::YokogawaGx20),
    Dx200(dx200::YokogawaDx200),
    Dx1000(dx1000::YokogawaDx1000),
    Modbus(generic_modbus::GenericModbus),
}

impl Device {
    pub fn model_name(&self) -> &'static str {
        match self {
            Device::Gx20(d) => d.model_name(),
            Device::Dx200(d) => d.model_name(),
            Device::Dx1000(d) => d.model_name(),
            Device::Modbus(d) => d.model_name(),
        }
    }

    pub fn device_id(&self) -> u32 {
        match self {
            Device::Gx20(d) => d.device_id(),
            Device::Dx200(d) => d.device_id(),
            Device::Dx1000(d) => d.device_id(),
            Device::Modbus(d) => d.device_id(),
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            Device::Gx20(d) => d.priority(),
            Device::Dx200(d) => d.priority(),
            Device::Dx1000(d) => d.priority(),
            Device::Modbus(d) => d.priority(),
        }
    }

    pub async fn poll(&mut self) -> Option<DataTable> {
        match self {
            Device::Gx20(d) => d.poll().await,
            Device::Dx200(d) => d.poll().await,
            Device::Dx1000(d) => d.poll().await,
            Device::Modbus(d) => d.poll().await,
        }
    }

    pub async fn close(&mut self) {
        match self {
            Device::Gx20(d) => d.close().await,
            Device::Dx200(d) => d.close().await,
            Device::Dx1000(d) => d.close().await,
            Device::Modbus(d) => d.close().await,
        }
    }

    pub fn ip(&self) -> &str {
        match self {
            Device::Gx20(d) => d.ip(),
            Device::Dx200(d) => d.ip(),
            Device::Dx1000(d) => d.ip(),
            Device::Modbus(d) => d.ip(),
        }
    }

    pub fn unit_id(&self) -> u8 {
        match self {
            Device::Gx20(d) => d.unit_id(),
            Device::Dx200(d) => d.unit_id(),
            Device::Dx1000(d) => d.unit_id(),
            Device::Modbus(d) => d.unit_id(),
        }
    }

    pub fn config_path(&self) -> &str {
        match self {
            Device::Gx20(d) => d.config_path(),
            Device::Dx200(d) => d.config_path(),
            Device::Dx1000(d) => d.config_path(),
            Device::Modbus(d) => d.config_path(),
        }
    }

    pub fn transmitted_metadata(&self) -> Vec<TagMetadata> {
        match self {
            Device::Gx20(d) => d.transmitted_metadata(),
            Device::Dx200(d) => d.transmitted_metadata(),
            Device::Dx1000(d) => d.transmitted_metadata(),
            Device::Modbus(d) => d.transmitted_metadata(),
        }
    }

    /// `true` for the Yokogawa recorders, `false` for plain Modbus
    /// devices — decides which manifest list a wire record's `device_id`
    /// indexes into on the receive side.
    pub fn is_recorder(&self) -> bool {
        !matches!(self, Device::Modbus(_))
    }
}
