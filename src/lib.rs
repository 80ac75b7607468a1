// src/lib.rs
//
// Library surface shared by the `diode-bridge` binary: module layout plus
// the two top-level entry points a process picks between based on its
// manifest's `Function:` line.

pub mod codec;
pub mod config;
pub mod db;
pub mod device;
pub mod error;
pub mod io;
pub mod lanes;
pub mod logging;
pub mod receive;
pub mod scheduler;
pub mod transmit;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use config::Manifest;

/// Serial device paths for the three diode-crossing links, shared by both
/// roles since the manifest alone decides which one a process plays.
#[derive(Clone, Debug)]
pub struct Links {
    pub lane1: String,
    pub lane2: String,
    pub lane3: String,
}

pub async fn run_transmit(manifest: Manifest, links: Links, gather_interval_ms: u64, stop: Arc<AtomicBool>) {
    transmit::run(
        manifest,
        transmit::SerialPaths {
            lane1: links.lane1,
            lane2: links.lane2,
            lane3: links.lane3,
        },
        gather_interval_ms,
        stop,
    )
    .await;
}

pub async fn run_receive(manifest: Manifest, links: Links, db_url: String, stop: Arc<AtomicBool>) {
    receive::run(
        manifest,
        receive::SerialPaths {
            lane1: links.lane1,
            lane2: links.lane2,
            lane3: links.lane3,
        },
        db_url,
        stop,
    )
    .await;
}
