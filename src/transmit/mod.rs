// src/transmit/mod.rs
//
// Transmit-side orchestration (§5): one poll scheduler and three serial
// senders running concurrently, one sender per priority lane. The
// scheduler owns every device and routes each poll's record onto the lane
// matching that device's manifest priority; each sender only ever sees its
// own lane, so cross-lane ordering is never implied.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::Manifest;
use crate::io::serial;
use crate::lanes::PriorityLanes;
use crate::logging::info;
use crate::scheduler;

/// Serial device paths for the three outbound links, in priority order.
pub struct SerialPaths {
    pub lane1: String,
    pub lane2: String,
    pub lane3: String,
}

pub async fn run(manifest: Manifest, serial_paths: SerialPaths, gather_interval_ms: u64, stop: Arc<AtomicBool>) {
    let mut lanes = PriorityLanes::new();
    let receivers = lanes.take_receivers();
    let [rx1, rx2, rx3] = receivers;

    info!("[transmit] starting with {} device(s)", manifest.devices.len());

    let scheduler_task = tokio::spawn(scheduler::run(
        manifest.devices,
        gather_interval_ms,
        lanes.senders,
        stop.clone(),
    ));

    let sender1 = tokio::spawn(serial::run_sender(serial_paths.lane1, rx1, stop.clone()));
    let sender2 = tokio::spawn(serial::run_sender(serial_paths.lane2, rx2, stop.clone()));
    let sender3 = tokio::spawn(serial::run_sender(serial_paths.lane3, rx3, stop.clone()));

    let _ = tokio::join!(scheduler_task, sender1, sender2, sender3);
    info!("[transmit] all tasks joined, exiting");
}
