// src/io/modbus.rs
//
// The Modbus/TCP I/O primitive shared by every device adapter: eight typed
// block reads (input/holding register file x 16/32-bit x big/little endian
// for the 32-bit case), matching the eight `Data Type:` values a generic
// Modbus config file can declare. No exception ever reaches the caller —
// a transport failure logs SEVERE with the device's IP and returns an
// empty vector, which callers treat as "this poll failed for this block".

use std::net::SocketAddr;

use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

use crate::logging::severe;

pub struct ModbusLink {
    ctx: Context,
    ip: String,
}

impl ModbusLink {
    pub async fn connect(ip: &str, port: u16, unit_id: u8) -> Result<Self, tokio_modbus::Error> {
        let addr: SocketAddr = format!("{}:{}", ip, port)
            .parse()
            .map_err(|e| tokio_modbus::Error::Transport(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        let ctx = tcp::connect_slave(addr, Slave(unit_id)).await?;
        Ok(Self {
            ctx,
            ip: ip.to_string(),
        })
    }

    /// 16-bit holding registers, one value per register.
    pub async fn read_holding_16(&mut self, start: u16, count: u16) -> Vec<u16> {
        self.read_words(start, count, true).await
    }

    /// 16-bit input registers, one value per register.
    pub async fn read_input_16(&mut self, start: u16, count: u16) -> Vec<u16> {
        self.read_words(start, count, false).await
    }

    /// 32-bit holding registers, big-endian word order, two registers per value.
    pub async fn read_holding_32_be(&mut self, start: u16, count: u16) -> Vec<u32> {
        self.read_dwords(start, count, true, Endian::Big).await
    }

    /// 32-bit holding registers, little-endian (vendor) word order.
    pub async fn read_holding_32_le(&mut self, start: u16, count: u16) -> Vec<u32> {
        self.read_dwords(start, count, true, Endian::Little).await
    }

    /// 32-bit input registers, big-endian word order.
    pub async fn read_input_32_be(&mut self, start: u16, count: u16) -> Vec<u32> {
        self.read_dwords(start, count, false, Endian::Big).await
    }

    /// 32-bit input registers, little-endian (vendor) word order.
    pub async fn read_input_32_le(&mut self, start: u16, count: u16) -> Vec<u32> {
        self.read_dwords(start, count, false, Endian::Little).await
    }

    /// Single-bit holding (coil) read.
    pub async fn read_holding_bits(&mut self, start: u16, count: u16) -> Vec<bool> {
        match self.ctx.read_coils(start, count).await {
            Ok(Ok(bits)) => bits,
            Ok(Err(exc)) => {
                severe!("[modbus:{}] exception reading coils @{}: {}", self.ip, start, exc);
                Vec::new()
            }
            Err(e) => {
                severe!("[modbus:{}] I/O error reading coils @{}: {}", self.ip, start, e);
                Vec::new()
            }
        }
    }

    /// Single-bit input (discrete input) read.
    pub async fn read_input_bits(&mut self, start: u16, count: u16) -> Vec<bool> {
        match self.ctx.read_discrete_inputs(start, count).await {
            Ok(Ok(bits)) => bits,
            Ok(Err(exc)) => {
                severe!(
                    "[modbus:{}] exception reading discrete inputs @{}: {}",
                    self.ip, start, exc
                );
                Vec::new()
            }
            Err(e) => {
                severe!(
                    "[modbus:{}] I/O error reading discrete inputs @{}: {}",
                    self.ip, start, e
                );
                Vec::new()
            }
        }
    }

    async fn read_words(&mut self, start: u16, count: u16, holding: bool) -> Vec<u16> {
        let result = if holding {
            self.ctx.read_holding_registers(start, count).await
        } else {
            self.ctx.read_input_registers(start, count).await
        };
        match result {
            Ok(Ok(regs)) => regs,
            Ok(Err(exc)) => {
                severe!("[modbus:{}] exception reading registers @{}: {}", self.ip, start, exc);
                Vec::new()
            }
            Err(e) => {
                severe!("[modbus:{}] I/O error reading registers @{}: {}", self.ip, start, e);
                Vec::new()
            }
        }
    }

    /// Reads `count` 32-bit values, i.e. `2 * count` consecutive registers.
    /// Endianness selects which of each register pair is the high word; see
    /// [`combine32`] for the exact (and slightly unusual) vendor convention.
    async fn read_dwords(&mut self, start: u16, count: u16, holding: bool, endian: Endian) -> Vec<u32> {
        let words = self.read_words(start, count.saturating_mul(2), holding).await;
        if words.len() < (count as usize) * 2 {
            return Vec::new();
        }
        words
            .chunks_exact(2)
            .map(|pair| combine32(pair[0], pair[1], endian))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Combine two consecutive 16-bit registers into a 32-bit value, per the
/// vendor's word-order convention (pinned by the spec's own worked example,
/// not the usual Modbus 32-bit convention): under "little endian" the first
/// register read is the high word; under "big endian" it is the low word.
pub fn combine32(r0: u16, r1: u16, endian: Endian) -> u32 {
    match endian {
        Endian::Little => ((r0 as u32) << 16) | (r1 as u32),
        Endian::Big => ((r1 as u32) << 16) | (r0 as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine32_matches_vendor_convention() {
        // registers read in order: r0 = 0x0001, r1 = 0x2345
        assert_eq!(combine32(0x0001, 0x2345, Endian::Little), 0x0001_2345);
        assert_eq!(combine32(0x0001, 0x2345, Endian::Big), 0x2345_0001);
    }
}
