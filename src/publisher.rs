/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Publishing a batch of payloads on the shared command stream.
//!
//! With flow control on, every payload goes through the [FlowController]: wait for a
//! credit, take a slot in the concurrency gate, then send (with retries) on a task of its
//! own while the loop paces itself by `pacing_delay` and admits the next payload. With flow control
//! off, payloads are sent one after another with only the configured `sleep` between them.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::PublishConfig;
use crate::constants::{DEFAULT_TEMPLATE, HASH_PREFIX_CHARS, PACING_GRANULARITY, RANDOM_SUFFIX_BYTES};
use crate::conversions::{find_ipv4, sha256_hex};
use crate::flow_control::{FlowController, SendOutcome};
use crate::ledger::LedgerRecorder;
use crate::messages::Command;
use crate::stats::Statistics;
use crate::stream_handle::CommandSink;

/// Outcome of one [Publisher::publish] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub sent: usize,
    pub dropped: usize,
    /// payloads never attempted, or abandoned mid-retry, because of cancellation
    pub cancelled: usize,
    pub elapsed: Duration,
}

pub struct Publisher {
    sink: Arc<dyn CommandSink>,
    flow: Option<Arc<FlowController>>,
    config: PublishConfig,
    stats: Arc<Statistics>,
    ledger: Option<LedgerRecorder>,
    /// tag prepended to `--data-size` payloads and written to the ledger
    sender: String,
}

impl Publisher {
    pub fn new(sink: Arc<dyn CommandSink>, config: PublishConfig, stats: Arc<Statistics>) -> Self {
        Self {
            sink,
            flow: None,
            config,
            stats,
            ledger: None,
            sender: String::new(),
        }
    }

    /// Route sends through `flow`. Without one, publishing is unthrottled.
    pub fn flow_control(mut self, flow: Option<Arc<FlowController>>) -> Self {
        self.flow = flow;
        self
    }

    pub fn ledger(mut self, ledger: Option<LedgerRecorder>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Publish `count` payloads built from `template` on `topic`.
    ///
    /// `count == 1` sends `template` as is. Larger counts make every payload distinct by
    /// embedding a timestamp, the index, and a random suffix. A configured `data_size`
    /// replaces all of that with `<sender>-<hex of data_size random bytes>`.
    pub async fn publish(
        &self,
        topic: &str,
        template: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> PublishReport {
        let started = Instant::now();
        let mut report = match &self.flow {
            Some(flow) => {
                self.publish_with_flow_control(flow, topic, template, count, cancel)
                    .await
            }
            None => self.publish_unthrottled(topic, template, count, cancel).await,
        };
        report.elapsed = started.elapsed();
        log::info!(
            "Published {} of {} messages to topic {} in {:?} ({} dropped)",
            report.sent,
            count,
            topic,
            report.elapsed,
            report.dropped
        );
        report
    }

    async fn publish_with_flow_control(
        &self,
        flow: &Arc<FlowController>,
        topic: &str,
        template: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> PublishReport {
        let mut report = PublishReport::default();
        let mut sends = JoinSet::new();
        let mut pacing_debt = Duration::ZERO;

        for index in 0..count {
            if !flow.wait_for_credits(cancel).await {
                break;
            }
            let slot = match flow.acquire_slot(cancel).await {
                Some(slot) => slot,
                None => break,
            };

            let payload = self.payload(template, count, index);
            let record = self.ledger_line(&payload);
            let (controller, sink, ledger) = (flow.clone(), self.sink.clone(), self.ledger.clone());
            let (topic, task_cancel) = (topic.to_string(), cancel.clone());
            sends.spawn(async move {
                let size = payload.len();
                let outcome = controller
                    .send_with_retry(&*sink, &topic, payload, index, &task_cancel)
                    .await;
                drop(slot);
                if outcome == SendOutcome::Sent {
                    log::debug!("Published data on topic {} size:{} hash:{}", topic, size, &record.hash);
                    if let Some(ledger) = ledger {
                        ledger.record(record.line).await;
                    }
                }
                outcome
            });

            // timers fire on a millisecond wheel, so short delays are paid in bulk
            pacing_debt += flow.config().pacing_delay;
            if pacing_debt >= PACING_GRANULARITY {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pacing_debt) => {}
                }
                pacing_debt = Duration::ZERO;
            }
        }

        let spawned = sends.len();
        report.cancelled = count - spawned;
        while let Some(outcome) = sends.join_next().await {
            match outcome {
                Ok(SendOutcome::Sent) => report.sent += 1,
                Ok(SendOutcome::Dropped) => report.dropped += 1,
                Ok(SendOutcome::Cancelled) => report.cancelled += 1,
                Err(e) => {
                    log::error!("publish task failed: {}", e);
                    report.dropped += 1;
                }
            }
        }
        report
    }

    async fn publish_unthrottled(
        &self,
        topic: &str,
        template: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> PublishReport {
        let mut report = PublishReport::default();

        for index in 0..count {
            if cancel.is_cancelled() {
                report.cancelled = count - index;
                break;
            }

            let payload = self.payload(template, count, index);
            let record = self.ledger_line(&payload);
            let size = payload.len();
            let command = Command::Publish {
                topic: topic.to_string(),
                payload,
            };

            let started = Instant::now();
            self.stats.record_attempt();
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = count - index;
                    break;
                }
                sent = self.sink.send(command) => sent,
            };
            match sent {
                Ok(()) => {
                    self.stats.record_sent(started.elapsed());
                    report.sent += 1;
                    log::debug!("Published data on topic {} size:{} hash:{}", topic, size, &record.hash);
                    if let Some(ledger) = &self.ledger {
                        ledger.record(record.line).await;
                    }
                }
                Err(e) => {
                    self.stats.record_dropped();
                    report.dropped += 1;
                    log::warn!("Failed to publish message {}: {}", index, e);
                }
            }

            if index + 1 < count && !self.config.sleep.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        report.cancelled = count - index - 1;
                        break;
                    }
                    _ = tokio::time::sleep(self.config.sleep) => {}
                }
            }
        }
        report
    }

    fn payload(&self, template: &str, count: usize, index: usize) -> Vec<u8> {
        let mut rng = rand::thread_rng();

        if let Some(data_size) = self.config.data_size {
            let mut random = vec![0u8; data_size];
            rng.fill_bytes(&mut random);
            return format!("{}-{}", self.sender, hex::encode(random)).into_bytes();
        }

        if count == 1 {
            return template.as_bytes().to_vec();
        }

        let mut suffix = [0u8; RANDOM_SUFFIX_BYTES];
        rng.fill_bytes(&mut suffix);
        let suffix = hex::encode(suffix);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let body = if template.is_empty() {
            DEFAULT_TEMPLATE
        } else {
            template
        };
        format!("[{} {}] {} - {} {}", now, suffix.len(), index + 1, suffix, body).into_bytes()
    }

    fn ledger_line(&self, payload: &[u8]) -> LedgerLine {
        let hash = sha256_hex(payload);
        LedgerLine {
            line: format!("{}\t{}\t{}", self.sender, payload.len(), hash),
            hash: hash[..HASH_PREFIX_CHARS].to_string(),
        }
    }
}

struct LedgerLine {
    line: String,
    /// short hash for the publish log
    hash: String,
}

/// The tag a publisher signs its payloads with: the first IPv4 address in `address` if there
/// is one, else its host part.
pub fn sender_tag(address: &str) -> String {
    if let Some(ip) = find_ipv4(address) {
        return ip.to_string();
    }
    let authority = address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address);
    let authority = authority.split('/').next().unwrap_or_default();
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
        _ => authority.to_string(),
    }
}
