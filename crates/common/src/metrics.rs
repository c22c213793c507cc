use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Ticks kept by default: about half an hour at 50 fps.
pub const DEFAULT_TICK_CAPACITY: usize = 100_000;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TickResult {
    pub tick: u64,
    pub robots: usize,
    pub processing_time_ns: u64,
    pub deadline_met: bool,
    pub lateness_ns: i64,
}

/// Thread-safe recorder with internal mutability.
/// Cloning shares the underlying storage.
///
/// Only the most recent `capacity` ticks are kept; older ones are dropped
/// but still count towards `total` and the missed-deadline tally.
#[derive(Clone)]
pub struct TickRecorder {
    results: Arc<Mutex<VecDeque<TickResult>>>,
    capacity: usize,
    total: Arc<AtomicUsize>,
    missed_deadlines: Arc<AtomicUsize>,
}

impl Default for TickRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TickRecorder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TICK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            results: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(10_000)))),
            capacity,
            total: Arc::new(AtomicUsize::new(0)),
            missed_deadlines: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn record(&self, result: TickResult) {
        let mut data = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        if !result.deadline_met {
            self.missed_deadlines.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        if data.len() == self.capacity {
            data.pop_front();
        }
        data.push_back(result);
    }

    /// Every tick ever recorded, including dropped ones.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> usize {
        self.total().saturating_sub(self.len())
    }

    pub fn missed_deadlines(&self) -> usize {
        self.missed_deadlines.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_results(&self) -> Vec<TickResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Share of ticks that finished within their period, in percent.
    pub fn compliance(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        (total - self.missed_deadlines().min(total)) as f64 / total as f64 * 100.0
    }

    pub fn save_to_csv(&self, filename: &str) -> Result<usize, csv::Error> {
        let data = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        let mut wtr = csv::Writer::from_path(filename)?;
        for record in data.iter() {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(tick: u64, deadline_met: bool) -> TickResult {
        TickResult {
            tick,
            robots: 1,
            processing_time_ns: 1_000,
            deadline_met,
            lateness_ns: 0,
        }
    }

    #[test]
    fn clones_share_results() {
        let recorder = TickRecorder::new();
        let other = recorder.clone();
        other.record(tick(0, true));
        other.record(tick(1, false));

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.missed_deadlines(), 1);
        assert!((recorder.compliance() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn keeps_only_the_latest_ticks() {
        let recorder = TickRecorder::with_capacity(3);
        for i in 0..5 {
            recorder.record(tick(i, i != 0));
        }

        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.total(), 5);
        assert_eq!(recorder.dropped(), 2);
        let kept: Vec<u64> = recorder.get_results().iter().map(|r| r.tick).collect();
        assert_eq!(kept, [2, 3, 4]);
        // The dropped miss still counts.
        assert_eq!(recorder.missed_deadlines(), 1);
        assert!((recorder.compliance() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn writes_csv_with_header() {
        let recorder = TickRecorder::new();
        recorder.record(tick(7, true));

        let path = std::env::temp_dir().join(format!("ticks-{}.csv", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        assert_eq!(recorder.save_to_csv(&path_str).unwrap(), 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("tick,robots,processing_time_ns,deadline_met,lateness_ns")
        );
        assert_eq!(lines.next(), Some("7,1,1000,true,0"));
    }
}
