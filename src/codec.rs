// src/codec.rs
//
// The wire format exchanged across the diode. Self-length-described so the
// receiver can frame messages with no application-layer acknowledgement:
// a 4-byte big-endian length prefix followed by a bytewise-stable encoding
// of `{timestamp, deviceType, deviceId, data[]}`. Both sides must agree on
// this layout precisely, since only numeric payloads and alarm bits cross
// the link — tag/unit/alarm-type metadata is derived independently by each
// side from its own copy of the config files.

use chrono::{DateTime, Local, TimeZone};
use thiserror::Error;

use crate::lanes::{DataPoint, DataTable, DeviceType};

/// Maximum payload length accepted from the wire. A record holding this
/// many data points would be nonsensical; treating larger values as
/// corruption avoids allocating on a garbage length prefix.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD_LEN)]
    TooLarge(u32),
    #[error("unknown device type tag {0}")]
    UnknownDeviceType(u8),
}

/// Encode a record, including the 4-byte length prefix, ready to write
/// straight onto a serial link.
pub fn encode(record: &DataTable) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + record.data.len() * 21);

    payload.extend_from_slice(&record.timestamp.timestamp_millis().to_be_bytes());
    payload.push(match record.device_type {
        DeviceType::Recorder => 0,
        DeviceType::ModbusDevice => 1,
    });
    payload.extend_from_slice(&record.device_id.to_be_bytes());
    payload.extend_from_slice(&(record.data.len() as u16).to_be_bytes());

    for point in &record.data {
        payload.extend_from_slice(&point.value.to_be_bytes());
        match point.alarm_status {
            Some(bits) => {
                payload.push(1);
                for bit in bits {
                    payload.extend_from_slice(&(bit as i32).to_be_bytes());
                }
            }
            None => {
                payload.push(0);
                payload.extend_from_slice(&[0u8; 16]);
            }
        }
    }

    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(&payload);
    framed
}

/// Decode a record from its payload bytes (the part *after* the 4-byte
/// length prefix has already been stripped off by the framer).
pub fn decode(payload: &[u8]) -> Result<DataTable, CodecError> {
    let mut cursor = Cursor::new(payload);

    let timestamp_ms = cursor.take_i64()?;
    let timestamp = Local
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .unwrap_or_else(Local::now);

    let device_type = match cursor.take_u8()? {
        0 => DeviceType::Recorder,
        1 => DeviceType::ModbusDevice,
        other => return Err(CodecError::UnknownDeviceType(other)),
    };

    let device_id = cursor.take_u32()?;
    let count = cursor.take_u16()? as usize;

    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        let value = cursor.take_f64()?;
        let has_alarms = cursor.take_u8()? != 0;
        let mut bits = [0i32; 4];
        for bit in &mut bits {
            *bit = cursor.take_i32()?;
        }
        data.push(if has_alarms {
            DataPoint::with_alarms(value, [bits[0] as u8, bits[1] as u8, bits[2] as u8, bits[3] as u8])
        } else {
            DataPoint::plain(value)
        });
    }

    Ok(DataTable {
        timestamp,
        device_type,
        device_id,
        data,
    })
}

/// Read the 4-byte big-endian length prefix used by [`encode`].
pub fn decode_len_prefix(bytes: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*bytes)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn need(&self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::Truncated {
                need: self.pos + n,
                have: self.buf.len(),
            });
        }
        Ok(&self.buf[self.pos..self.pos + n])
    }

    fn take_u8(&mut self) -> Result<u8, CodecError> {
        let b = self.need(1)?[0];
        self.pos += 1;
        Ok(b)
    }

    fn take_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.need(2)?;
        let v = u16::from_be_bytes([b[0], b[1]]);
        self.pos += 2;
        Ok(v)
    }

    fn take_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.need(4)?;
        let v = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        self.pos += 4;
        Ok(v)
    }

    fn take_i32(&mut self) -> Result<i32, CodecError> {
        let b = self.need(4)?;
        let v = i32::from_be_bytes([b[0], b[1], b[2], b[3]]);
        self.pos += 4;
        Ok(v)
    }

    fn take_i64(&mut self) -> Result<i64, CodecError> {
        let b = self.need(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        self.pos += 8;
        Ok(i64::from_be_bytes(arr))
    }

    fn take_f64(&mut self) -> Result<f64, CodecError> {
        let b = self.need(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        self.pos += 8;
        Ok(f64::from_be_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    #[test]
    fn round_trips_a_mixed_record() {
        let record = DataTable {
            timestamp: Local::now(),
            device_type: DeviceType::Recorder,
            device_id: 3,
            data: vec![
                DataPoint::plain(123.45),
                DataPoint::with_alarms(67.8, [1, 0, 1, 0]),
            ],
        };

        let framed = encode(&record);
        let len = decode_len_prefix(&framed[0..4].try_into().unwrap());
        assert_eq!(len as usize, framed.len() - 4);

        let decoded = decode(&framed[4..]).unwrap();
        assert_eq!(decoded.device_id, record.device_id);
        assert_eq!(decoded.device_type, record.device_type);
        assert_eq!(decoded.data.len(), 2);
        assert_eq!(decoded.data[0].value, 123.45);
        assert_eq!(decoded.data[0].alarm_status, None);
        assert_eq!(decoded.data[1].alarm_status, Some([1, 0, 1, 0]));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let record = DataTable {
            timestamp: Local::now(),
            device_type: DeviceType::ModbusDevice,
            device_id: 0,
            data: vec![DataPoint::plain(1.0)],
        };
        let framed = encode(&record);
        let short = &framed[4..framed.len() - 2];
        assert!(decode(short).is_err());
    }
}
