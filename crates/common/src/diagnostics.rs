use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every connection handler and the update loop.
#[derive(Default)]
pub struct SharedDiagnostics {
    pub connections_opened: AtomicU64,
    pub connections_closed: AtomicU64,
    pub decode_failures: AtomicU64,
    pub unknown_commands: AtomicU64,
    pub rejected_commands: AtomicU64,
    pub sensor_timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub decode_failures: u64,
    pub unknown_commands: u64,
    pub rejected_commands: u64,
    pub sensor_timeouts: u64,
}

impl SharedDiagnostics {
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_command(&self) {
        self.unknown_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_command(&self) {
        self.rejected_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sensor_timeout(&self) {
        self.sensor_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unknown_commands: self.unknown_commands.load(Ordering::Relaxed),
            rejected_commands: self.rejected_commands.load(Ordering::Relaxed),
            sensor_timeouts: self.sensor_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let diagnostics = SharedDiagnostics::default();
        diagnostics.record_connection_opened();
        diagnostics.record_connection_opened();
        diagnostics.record_unknown_command();

        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.connections_opened, 2);
        assert_eq!(snapshot.unknown_commands, 1);
        assert_eq!(snapshot.connections_closed, 0);
    }
}
