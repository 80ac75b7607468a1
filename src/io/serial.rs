// src/io/serial.rs
//
// Serial senders (transmit side) and receivers (receive side). Each link is
// /dev/ttyS0..2 at 115200 8N1, no flow control, carrying length-delimited
// DataTable records (see crate::codec). The serialport crate is blocking,
// so every port is driven from its own tokio::task::spawn_blocking thread,
// the same way the original driver split "blocking hardware I/O" from
// "async everything else".

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{self, CodecError};
use crate::lanes::{DataTable, LaneReceiver, LaneSender};
use crate::logging::{info, severe};

pub const BAUD_RATE: u32 = 115_200;
const LEN_PREFIX: usize = 4;
const READ_BUF: usize = 4096;
const SEND_INTERVAL: Duration = Duration::from_millis(50);

fn open(path: &str) -> Result<Box<dyn serialport::SerialPort>, serialport::Error> {
    serialport::new(path, BAUD_RATE)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(100))
        .open()
}

/// Accumulates bytes read off a serial port and yields complete
/// length-prefixed records as they become available, carrying partial
/// reads across calls.
struct RecordFramer {
    buf: Vec<u8>,
}

impl RecordFramer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn feed(&mut self, data: &[u8]) -> Vec<Result<DataTable, CodecError>> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();

        loop {
            if self.buf.len() < LEN_PREFIX {
                break;
            }
            let len_bytes: [u8; 4] = self.buf[0..4].try_into().unwrap();
            let len = codec::decode_len_prefix(&len_bytes) as usize;

            if len as u32 > codec::MAX_PAYLOAD_LEN {
                // Corrupt length prefix: there is no recovery point other
                // than dropping this prefix and resynchronising on the
                // next one that happens to look plausible.
                out.push(Err(CodecError::TooLarge(len as u32)));
                self.buf.drain(0..LEN_PREFIX);
                continue;
            }

            if self.buf.len() < LEN_PREFIX + len {
                break;
            }

            let payload: Vec<u8> = self.buf.drain(0..LEN_PREFIX + len).skip(LEN_PREFIX).collect();
            out.push(codec::decode(&payload));
        }

        out
    }
}

/// Drives one outbound serial link, draining `lane` and writing one
/// length-delimited record per iteration.
pub async fn run_sender(port_path: String, mut lane: LaneReceiver, stop: Arc<AtomicBool>) {
    let port = match open(&port_path) {
        Ok(p) => p,
        Err(e) => {
            severe!("[sender:{}] failed to open serial port: {}", port_path, e);
            return;
        }
    };
    info!("[sender:{}] open at {} baud", port_path, BAUD_RATE);

    let port = Arc::new(std::sync::Mutex::new(port));
    let mut iterations: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        let record = match lane.recv().await {
            Some(r) => r,
            None => break,
        };

        let bytes = codec::encode(&record);
        let port = port.clone();
        let write_result =
            tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
                let mut port = port.lock().unwrap();
                port.write_all(&bytes)?;
                port.flush()
            })
            .await;

        match write_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => severe!("[sender:{}] write failed: {}", port_path, e),
            Err(e) => severe!("[sender:{}] sender task panicked: {}", port_path, e),
        }

        iterations += 1;
        if iterations % 60 == 0 {
            // Reclamation hint in the original implementation; not
            // meaningful in a systems language and intentionally omitted.
        }

        tokio::time::sleep(SEND_INTERVAL).await;
    }

    info!("[sender:{}] stopped", port_path);
}

/// Drives one inbound serial link, reading bytes as they arrive and
/// enqueueing complete records onto `lane`.
pub async fn run_receiver(port_path: String, lane: LaneSender, stop: Arc<AtomicBool>) {
    let port = match open(&port_path) {
        Ok(p) => p,
        Err(e) => {
            severe!("[receiver:{}] failed to open serial port: {}", port_path, e);
            return;
        }
    };
    info!("[receiver:{}] open at {} baud", port_path, BAUD_RATE);

    let stop_blocking = stop.clone();
    let join = tokio::task::spawn_blocking(move || {
        let mut port = port;
        let mut framer = RecordFramer::new();
        let mut buf = [0u8; READ_BUF];

        while !stop_blocking.load(Ordering::Relaxed) {
            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    for result in framer.feed(&buf[..n]) {
                        match result {
                            Ok(record) => {
                                if lane.send(record).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                severe!("[receiver:{}] deserialize failure: {}", port_path, e);
                            }
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    severe!("[receiver:{}] read error: {}", port_path, e);
                    return;
                }
            }
        }
    });

    let _ = join.await;
    info!("[receiver:{}] stopped", port_path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lanes::{DataPoint, DeviceType};
    use chrono::Local;

    #[test]
    fn framer_reassembles_split_records() {
        let record = DataTable {
            timestamp: Local::now(),
            device_type: DeviceType::ModbusDevice,
            device_id: 7,
            data: vec![DataPoint::plain(1.5)],
        };
        let bytes = codec::encode(&record);

        let mut framer = RecordFramer::new();
        let mid = bytes.len() / 2;
        assert!(framer.feed(&bytes[..mid]).is_empty());
        let results = framer.feed(&bytes[mid..]);
        assert_eq!(results.len(), 1);
        let decoded = results[0].as_ref().unwrap();
        assert_eq!(decoded.device_id, 7);
    }

    #[test]
    fn framer_yields_multiple_records_from_one_read() {
        let r1 = DataTable {
            timestamp: Local::now(),
            device_type: DeviceType::Recorder,
            device_id: 1,
            data: vec![DataPoint::plain(1.0)],
        };
        let r2 = DataTable {
            timestamp: Local::now(),
            device_type: DeviceType::Recorder,
            device_id: 2,
            data: vec![DataPoint::plain(2.0)],
        };
        let mut combined = codec::encode(&r1);
        combined.extend(codec::encode(&r2));

        let mut framer = RecordFramer::new();
        let results = framer.feed(&combined);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().device_id, 1);
        assert_eq!(results[1].as_ref().unwrap().device_id, 2);
    }
}
