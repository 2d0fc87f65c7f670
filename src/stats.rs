/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cumulative counters of one client process.
//!
//! Publishing side: sent, acked, dropped (after exhausting retries), retried, latency.
//! Receiving side: frames read off the stream, frames dropped because the buffer was full,
//! frames classified by a worker, decoded messages, decode failures.
//!
//! Counters only grow. They are updated from the publisher tasks and the workers under one
//! short lock, and read at shutdown and for progress logs.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub acked: u64,
    /// publishes abandoned after all retries failed
    pub dropped: u64,
    pub retried: u64,
    pub send_attempts: u64,
    pub total_latency: Duration,

    /// frames read off the stream by the receive pump
    pub frames: u64,
    /// frames accepted into the message buffer
    pub enqueued: u64,
    /// frames dropped by the receive pump because the message buffer was full
    pub buffer_dropped: u64,
    /// frames taken out of the buffer and classified by a worker
    pub processed: u64,
    pub received: u64,
    pub traces: u64,
    pub unknown: u64,
    pub decode_errors: u64,

    pub elapsed: Duration,
}

impl StatsSnapshot {
    pub fn average_latency(&self) -> Duration {
        if self.acked == 0 {
            return Duration::ZERO;
        }
        self.total_latency / self.acked as u32
    }

    fn per_second(count: u64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            count as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Final statistics ({:.2?}) ===", self.elapsed)?;
        writeln!(
            f,
            "published: sent={} acked={} dropped={} retried={} attempts={} avg_latency={:.2?} ({:.1} msg/s)",
            self.sent,
            self.acked,
            self.dropped,
            self.retried,
            self.send_attempts,
            self.average_latency(),
            Self::per_second(self.sent, self.elapsed),
        )?;
        write!(
            f,
            "received: messages={} traces={} unknown={} decode_errors={} frames={} buffer_dropped={} ({:.1} msg/s)",
            self.received,
            self.traces,
            self.unknown,
            self.decode_errors,
            self.frames,
            self.buffer_dropped,
            Self::per_second(self.received, self.elapsed),
        )
    }
}

pub struct Statistics {
    counters: Mutex<StatsSnapshot>,
    started: Instant,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(StatsSnapshot::default()),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record_attempt(&self) {
        self.counters.lock().send_attempts += 1;
    }

    /// A publish went through. Without acknowledgments from the node, sent implies acked.
    pub fn record_sent(&self, latency: Duration) {
        let mut counters = self.counters.lock();
        counters.sent += 1;
        counters.acked += 1;
        counters.total_latency += latency;
    }

    pub fn record_retry(&self) {
        self.counters.lock().retried += 1;
    }

    pub fn record_dropped(&self) {
        self.counters.lock().dropped += 1;
    }

    pub fn record_enqueued(&self) {
        let mut counters = self.counters.lock();
        counters.frames += 1;
        counters.enqueued += 1;
    }

    pub fn record_buffer_drop(&self) -> u64 {
        let mut counters = self.counters.lock();
        counters.frames += 1;
        counters.buffer_dropped += 1;
        counters.buffer_dropped
    }

    pub fn record_processed(&self) {
        self.counters.lock().processed += 1;
    }

    /// Returns the number of messages received so far, this one included.
    pub fn record_received(&self) -> u64 {
        let mut counters = self.counters.lock();
        counters.received += 1;
        counters.received
    }

    pub fn record_trace(&self) {
        self.counters.lock().traces += 1;
    }

    pub fn record_unknown(&self) {
        self.counters.lock().unknown += 1;
    }

    pub fn record_decode_error(&self) {
        self.counters.lock().decode_errors += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snapshot = self.counters.lock().clone();
        snapshot.elapsed = self.elapsed();
        snapshot
    }
}
