// src/scheduler.rs
//
// Poll scheduler (transmit side, §4.4): a single loop that compares wall
// clock against the last poll time and, once the interval has elapsed,
// sweeps every device in manifest order. No sleep between checks — the
// interval gate alone prevents drift accumulation, since poll duration is
// dominated by network I/O rather than loop overhead. A `yield_now` stands
// in for the busy-spin's missing suspension point so the task cooperates
// with the rest of the runtime between clock checks; it is not a sleep and
// does not affect the interval gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::device::Device;
use crate::lanes::{LaneSender, PriorityLanes};
use crate::logging::info;

pub async fn run(mut devices: Vec<Device>, interval_ms: u64, lane_senders: [LaneSender; 3], stop: Arc<AtomicBool>) {
    let interval = Duration::from_millis(interval_ms.max(1));
    let mut last_poll = Instant::now()
        .checked_sub(interval)
        .unwrap_or_else(Instant::now);
    let mut iterations: u64 = 0;

    info!("[scheduler] polling {} device(s) every {} ms", devices.len(), interval_ms);

    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now.duration_since(last_poll) >= interval {
            last_poll = now;

            for device in devices.iter_mut() {
                if let Some(record) = device.poll().await {
                    let lane = PriorityLanes::lane_index_for_priority(device.priority());
                    let _ = lane_senders[lane].send(record);
                }
            }

            iterations += 1;
            if iterations % 60 == 0 {
                // Garbage-collection hint in the original implementation;
                // not meaningful in a systems language (see DESIGN.md).
            }
        }

        tokio::task::yield_now().await;
    }

    for device in devices.iter_mut() {
        device.close().await;
    }
    info!("[scheduler] stopped, all device connections closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_zero_is_clamped_to_one_millisecond() {
        assert_eq!(Duration::from_millis(0u64.max(1)), Duration::from_millis(1));
    }
}
