// src/device/dx200.rs
//
// The DX200 is structurally identical to the DX1000: same register layout
// constants, same SR/SA/ST config grammar. Per the supplemented factory
// contract it is a real variant of its own (reported separately to the
// manifest and the database) rather than a bare type alias, so it wraps a
// `YokogawaDx1000` built with its own model label instead of reusing the
// DX1000 type directly.

use async_trait::async_trait;

use crate::device::dx1000::YokogawaDx1000;
use crate::device::metadata::TagMetadata;
use crate::device::DeviceAdapter;
use crate::lanes::DataTable;

pub struct YokogawaDx200 {
    inner: YokogawaDx1000,
}

impl YokogawaDx200 {
    pub fn new(device_id: u32, priority: u8, ip: String, unit_id: u8, config_path: &str, lines: &[String]) -> Self {
        Self {
            inner: YokogawaDx1000::new_with_label(device_id, priority, ip, unit_id, config_path, lines, "DX200"),
        }
    }
}

#[async_trait]
impl DeviceAdapter for YokogawaDx200 {
    fn model_name(&self) -> &'static str {
        self.inner.model_name()
    }

    fn device_id(&self) -> u32 {
        self.inner.device_id()
    }

    fn priority(&self) -> u8 {
        self.inner.priority()
    }

    fn ip(&self) -> &str {
        self.inner.ip()
    }

    fn unit_id(&self) -> u8 {
        self.inner.unit_id()
    }

    fn config_path(&self) -> &str {
        self.inner.config_path()
    }

    fn transmitted_metadata(&self) -> Vec<TagMetadata> {
        self.inner.transmitted_metadata()
    }

    async fn poll(&mut self) -> Option<DataTable> {
        self.inner.poll().await
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}
