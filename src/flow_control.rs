/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Admission control for outbound publishing.
//!
//! The [FlowController] owns three things:
//! 1. a credit pool. One credit is taken per send attempt, and it is handed back if the
//!    attempt fails. A successful send adds `credit_increment` credits, and so does every
//!    inbound message a worker finishes ([FlowController::add_credits]).
//! 2. a concurrency gate: a semaphore bounding the number of publishes in flight
//!    ([FlowController::acquire_slot]).
//! 3. the retry policy: each publish gets `max_retries + 1` attempts, `retry_delay` apart.
//!
//! The node does not acknowledge publishes, so credits measure local pacing rather than
//! the receiver's real capacity. Replenishment only comes from our own successes and
//! deliveries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::FlowControlConfig;
use crate::messages::Command;
use crate::stats::Statistics;
use crate::stream_handle::CommandSink;

/// How a [FlowController::send_with_retry] call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// every attempt failed; the message is abandoned
    Dropped,
    Cancelled,
}

pub struct FlowController {
    config: FlowControlConfig,
    credits: Mutex<u64>,
    gate: Arc<Semaphore>,
    gauge: Arc<InFlight>,
    stats: Arc<Statistics>,
}

#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// A place in the concurrency gate. Dropping it releases the place.
pub struct SendSlot {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<InFlight>,
}

impl Drop for SendSlot {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FlowController {
    pub fn new(config: FlowControlConfig, stats: Arc<Statistics>) -> Self {
        Self {
            credits: Mutex::new(config.initial_credits),
            gate: Arc::new(Semaphore::new(config.max_concurrent_sends)),
            gauge: Arc::new(InFlight::default()),
            config,
            stats,
        }
    }

    pub fn config(&self) -> &FlowControlConfig {
        &self.config
    }

    pub fn credits(&self) -> u64 {
        *self.credits.lock()
    }

    /// Publishes currently holding a [SendSlot].
    pub fn in_flight(&self) -> usize {
        self.gauge.current.load(Ordering::SeqCst)
    }

    /// Highest number of [SendSlot]s held at the same time so far.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    /// Wait until at least one credit is available, re-checking every poll interval.
    /// Returns false if `cancel` fires first.
    pub async fn wait_for_credits(&self, cancel: &CancellationToken) -> bool {
        loop {
            if self.credits() > 0 {
                return true;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Take a place in the concurrency gate, or `None` once `cancel` fires.
    pub async fn acquire_slot(&self, cancel: &CancellationToken) -> Option<SendSlot> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = self.gate.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return None,
            },
        };
        let current = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(current, Ordering::SeqCst);
        Some(SendSlot {
            _permit: permit,
            gauge: self.gauge.clone(),
        })
    }

    /// Grow the credit pool, up to `max_credits` if one is configured.
    pub fn add_credits(&self, amount: u64) {
        let mut credits = self.credits.lock();
        *credits = credits.saturating_add(amount);
        if let Some(max_credits) = self.config.max_credits {
            *credits = (*credits).min(max_credits);
        }
    }

    fn try_take_credit(&self) -> bool {
        let mut credits = self.credits.lock();
        if *credits == 0 {
            return false;
        }
        *credits -= 1;
        true
    }

    async fn take_credit(&self, cancel: &CancellationToken) -> bool {
        loop {
            if self.try_take_credit() {
                return true;
            }
            if !self.wait_for_credits(cancel).await {
                return false;
            }
        }
    }

    /// Publish `payload` on `topic`, retrying failed sends.
    ///
    /// Each attempt spends one credit and hands it back if the send fails. After
    /// `max_retries` failed retries, or at once if the stream is gone, the message is
    /// counted as dropped and abandoned. Cancellation also interrupts a send in progress.
    pub async fn send_with_retry<S: CommandSink + ?Sized>(
        &self,
        sink: &S,
        topic: &str,
        payload: Vec<u8>,
        index: usize,
        cancel: &CancellationToken,
    ) -> SendOutcome {
        let started = Instant::now();
        let attempts = self.config.max_retries + 1;
        let mut attempt = 1;
        loop {
            if !self.take_credit(cancel).await {
                return SendOutcome::Cancelled;
            }

            self.stats.record_attempt();
            let command = Command::Publish {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // the attempt never completed
                    self.add_credits(1);
                    return SendOutcome::Cancelled;
                }
                sent = sink.send(command) => sent,
            };
            let error = match sent {
                Ok(()) => {
                    self.add_credits(self.config.credit_increment);
                    self.stats.record_sent(started.elapsed());
                    return SendOutcome::Sent;
                }
                Err(error) => error,
            };
            // the attempt never reached the node
            self.add_credits(1);

            if attempt == attempts || !error.is_retriable() {
                log::warn!(
                    "Message {} dropped after {} attempt(s): {}",
                    index,
                    attempt,
                    error
                );
                self.stats.record_dropped();
                return SendOutcome::Dropped;
            }

            log::info!(
                "Send failed for message {} (attempt {}/{}): {}. Retrying in {:?}",
                index,
                attempt,
                attempts,
                error,
                self.config.retry_delay
            );
            self.stats.record_retry();
            attempt += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return SendOutcome::Cancelled,
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
    }
}
