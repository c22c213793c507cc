use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use common::metrics::TickResult;
use common::TickRecorder;
use tracing::{debug, info};

use crate::error::Result;
use crate::world::WorldSimulator;

/// Simulated seconds between progress summaries.
const SUMMARY_EVERY_SECS: u64 = 10;

/// Ticks the world at the configured frame rate until `running` is cleared.
///
/// Each tick is scheduled `1 / fps` after the previous one, so an occasional
/// slow tick does not shift the schedule. Ticks are recorded with their
/// processing time and how late they started.
pub fn run_update_loop(
    world: Arc<WorldSimulator>,
    recorder: TickRecorder,
    running: Arc<AtomicBool>,
    start_time: Instant,
) {
    let period = world.settings().tick_period();
    let summary_every = u64::from(world.settings().fps) * SUMMARY_EVERY_SECS;
    let mut next_tick = start_time;
    let mut tick = 0u64;

    while running.load(Ordering::Relaxed) {
        let expected = next_tick;
        next_tick += period;

        let now = Instant::now();
        if now < expected {
            thread::sleep(expected - now);
        }

        let actual = Instant::now();
        let robots = world.tick();
        let processing = actual.elapsed();
        let deadline_met = Instant::now() <= next_tick;
        if !deadline_met {
            debug!(tick, ?processing, "tick overran its period");
        }

        recorder.record(TickResult {
            tick,
            robots,
            processing_time_ns: processing.as_nanos() as u64,
            deadline_met,
            lateness_ns: actual.duration_since(expected).as_nanos() as i64,
        });
        tick += 1;
        if tick % summary_every == 0 {
            info!(tick, missed = recorder.missed_deadlines(), "update loop running");
        }
    }

    info!(ticks = tick, missed = recorder.missed_deadlines(), "update loop stopped");
}

pub fn spawn_update_loop(
    world: Arc<WorldSimulator>,
    recorder: TickRecorder,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let start_time = Instant::now();
    let handle = thread::Builder::new()
        .name("update-loop".into())
        .spawn(move || run_update_loop(world, recorder, running, start_time))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::WorldConfig;
    use std::time::Duration;

    #[test]
    fn ticks_at_the_configured_rate() {
        let config = WorldConfig::from_toml(
            r#"
            [simulation]
            fps = 100

            [[robots]]
            name = "r"
            x = 10.0
            y = 10.0
            bricks = []
            "#,
        )
        .unwrap();
        let world = Arc::new(crate::world::WorldSimulator::from_config(&config).unwrap());
        let recorder = TickRecorder::new();
        let running = Arc::new(AtomicBool::new(true));

        let handle =
            spawn_update_loop(Arc::clone(&world), recorder.clone(), Arc::clone(&running)).unwrap();
        thread::sleep(Duration::from_millis(200));
        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();

        let ticks = recorder.len();
        assert!(ticks >= 5, "only {} ticks in 200ms", ticks);
        assert!(ticks <= 25, "{} ticks in 200ms", ticks);
        assert_eq!(world.tick_count(), ticks as u64);
        let results = recorder.get_results();
        assert!(results.iter().enumerate().all(|(i, r)| r.tick == i as u64 && r.robots == 1));
    }
}
