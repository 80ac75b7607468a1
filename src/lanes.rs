// src/lanes.rs
//
// The record that crosses the diode, and the three priority lanes that
// carry it from pollers to serial senders (transmit side) or from serial
// receivers to the dispatcher (receive side).

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One reading plus its up-to-four alarm bits. `alarm_status` is `None` for
/// plain Modbus devices, which have no alarm bitfield to decode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub value: f64,
    pub alarm_status: Option<[u8; 4]>,
}

impl DataPoint {
    pub fn plain(value: f64) -> Self {
        Self {
            value,
            alarm_status: None,
        }
    }

    pub fn with_alarms(value: f64, alarm_status: [u8; 4]) -> Self {
        Self {
            value,
            alarm_status: Some(alarm_status),
        }
    }
}

/// Which manifest list a record's `device_id` indexes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Recorder,
    ModbusDevice,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Recorder => "Recorder",
            DeviceType::ModbusDevice => "Modbus Device",
        }
    }
}

/// A single poll cycle's worth of readings for one device. Created by a
/// poll, enqueued on a priority lane, serialized and destroyed on the
/// transmit side; reconstructed, consumed by the database writer, and
/// destroyed on the receive side.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataTable {
    pub timestamp: DateTime<Local>,
    pub device_type: DeviceType,
    pub device_id: u32,
    pub data: Vec<DataPoint>,
}

/// Lane index. There are exactly three, numbered 1..=3 by device priority.
pub const LANE_COUNT: usize = 3;

/// A single-producer-per-device / multi-producer / single-consumer FIFO.
/// Backed by an unbounded mpsc channel: enqueue order is preserved exactly,
/// and producers never block (the diode has no back-pressure path to push
/// against anyway).
pub type LaneSender = tokio::sync::mpsc::UnboundedSender<DataTable>;
pub type LaneReceiver = tokio::sync::mpsc::UnboundedReceiver<DataTable>;

/// Three independent lanes. `senders[0]` is priority 1, `senders[2]` is
/// priority 3 — there is no ordering guarantee across lanes, only within
/// one.
pub struct PriorityLanes {
    pub senders: [LaneSender; LANE_COUNT],
    pub receivers: Option<[LaneReceiver; LANE_COUNT]>,
}

impl PriorityLanes {
    pub fn new() -> Self {
        let (tx0, rx0) = tokio::sync::mpsc::unbounded_channel();
        let (tx1, rx1) = tokio::sync::mpsc::unbounded_channel();
        let (tx2, rx2) = tokio::sync::mpsc::unbounded_channel();
        Self {
            senders: [tx0, tx1, tx2],
            receivers: Some([rx0, rx1, rx2]),
        }
    }

    /// Take ownership of the three receiving ends; this consumes the
    /// option, since each lane has exactly one consumer.
    pub fn take_receivers(&mut self) -> [LaneReceiver; LANE_COUNT] {
        self.receivers
            .take()
            .expect("priority lane receivers already taken")
    }

    /// Clamp a manifest-declared priority into a lane index (0-based).
    /// Per the manifest contract, any value outside 1..=3 silently maps to
    /// lane 3 (see DESIGN.md open-question decisions).
    pub fn lane_index_for_priority(priority: u8) -> usize {
        match priority {
            1 => 0,
            2 => 1,
            3 => 2,
            _ => 2,
        }
    }
}

impl Default for PriorityLanes {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_preserves_enqueue_order() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut lanes = PriorityLanes::new();
            let mut receivers = lanes.take_receivers();
            let rx = &mut receivers[0];
            let tx = &lanes.senders[0];

            for id in [0u32, 1, 2] {
                tx.send(DataTable {
                    timestamp: Local::now(),
                    device_type: DeviceType::ModbusDevice,
                    device_id: id,
                    data: vec![],
                })
                .unwrap();
            }

            let a = rx.recv().await.unwrap();
            let b = rx.recv().await.unwrap();
            let c = rx.recv().await.unwrap();
            assert_eq!([a.device_id, b.device_id, c.device_id], [0, 1, 2]);
        });
    }

    #[test]
    fn invalid_priority_maps_to_lane_three() {
        assert_eq!(PriorityLanes::lane_index_for_priority(1), 0);
        assert_eq!(PriorityLanes::lane_index_for_priority(2), 1);
        assert_eq!(PriorityLanes::lane_index_for_priority(3), 2);
        assert_eq!(PriorityLanes::lane_index_for_priority(0), 2);
        assert_eq!(PriorityLanes::lane_index_for_priority(9), 2);
    }
}
