// src/receive/mod.rs
//
// Receive-side orchestration (§4.7): three serial receivers feed three
// lanes, and a single dispatcher drains them in fixed priority order
// (lane 1 before lane 2 before lane 3 whenever more than one has a record
// waiting) and hands each reconstructed record to the database writer.
// Every 60th dispatched record the writer's connection is force-closed, a
// liveness probe carried over from the original design rather than
// anything this side needs for correctness (see DESIGN.md).

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::Manifest;
use crate::db::DatabaseWriter;
use crate::io::serial;
use crate::lanes::{DataTable, PriorityLanes};
use crate::logging::{info, severe};

pub struct SerialPaths {
    pub lane1: String,
    pub lane2: String,
    pub lane3: String,
}

const FORCE_CLOSE_EVERY: u64 = 60;

pub async fn run(manifest: Manifest, serial_paths: SerialPaths, db_url: String, stop: Arc<AtomicBool>) {
    let mut lanes = PriorityLanes::new();
    let receivers = lanes.take_receivers();
    let [mut rx1, mut rx2, mut rx3] = receivers;

    info!("[receive] starting with {} device(s)", manifest.devices.len());

    let receiver1 = tokio::spawn(serial::run_receiver(serial_paths.lane1, lanes.senders[0].clone(), stop.clone()));
    let receiver2 = tokio::spawn(serial::run_receiver(serial_paths.lane2, lanes.senders[1].clone(), stop.clone()));
    let receiver3 = tokio::spawn(serial::run_receiver(serial_paths.lane3, lanes.senders[2].clone(), stop.clone()));
    drop(lanes.senders);

    let mut writer = DatabaseWriter::new(db_url);
    let mut dispatched: u64 = 0;

    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
        let record = tokio::select! {
            biased;
            r = rx1.recv() => r,
            r = rx2.recv() => r,
            r = rx3.recv() => r,
        };

        let Some(record) = record else {
            break;
        };

        dispatch(&manifest, &mut writer, &record).await;

        dispatched += 1;
        if dispatched % FORCE_CLOSE_EVERY == 0 {
            writer.force_close();
        }
    }

    let _ = tokio::join!(receiver1, receiver2, receiver3);
    info!("[receive] all tasks joined, exiting");
}

async fn dispatch(manifest: &Manifest, writer: &mut DatabaseWriter, record: &DataTable) {
    match manifest.find(record.device_type, record.device_id) {
        Some(device) => writer.update_database(device, record).await,
        None => severe!(
            "[receive] no manifest entry for {} device id {}, dropping record",
            record.device_type.as_str(),
            record.device_id
        ),
    }
}
