/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fixed-size pool of workers draining the message buffer.
//!
//! Workers compete for frames on one shared receiver, so the order in which messages are
//! handed to the gates is not the order they were received in. Each worker exits when the
//! shutdown token fires or when the buffer is closed and empty.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::PROGRESS_EVERY;
use crate::flow_control::FlowController;
use crate::message_gate::{Delivery, MessageGateChain};
use crate::messages::{Envelope, Inbound};
use crate::proto;
use crate::stats::Statistics;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

struct Worker {
    id: usize,
    buffer: flume::Receiver<proto::Response>,
    gates: Arc<MessageGateChain>,
    stats: Arc<Statistics>,
    flow: Option<Arc<FlowController>>,
}

impl WorkerPool {
    /// Start `workers` workers on `buffer`. When `flow` is given, every delivered message
    /// grows its credit pool by the configured increment.
    pub fn spawn(
        workers: usize,
        buffer: flume::Receiver<proto::Response>,
        gates: Arc<MessageGateChain>,
        stats: Arc<Statistics>,
        flow: Option<Arc<FlowController>>,
        shutdown: CancellationToken,
    ) -> Self {
        let handles = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    buffer: buffer.clone(),
                    gates: gates.clone(),
                    stats: stats.clone(),
                    flow: flow.clone(),
                };
                tokio::task::spawn(worker.run(shutdown.clone()))
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                log::error!("worker task failed: {}", e);
            }
        }
    }
}

impl Worker {
    async fn run(self, shutdown: CancellationToken) {
        loop {
            let response = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                response = self.buffer.recv_async() => match response {
                    Ok(response) => response,
                    // closed and drained
                    Err(flume::RecvError::Disconnected) => break,
                },
            };
            self.handle(response).await;
        }
        log::debug!("worker {} stopped", self.id);
    }

    async fn handle(&self, response: proto::Response) {
        self.stats.record_processed();

        match Inbound::from(response) {
            Inbound::Message(data) => {
                let envelope = match Envelope::try_from(data.as_slice()) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        self.stats.record_decode_error();
                        log::warn!("Error decoding message ({} bytes): {}", data.len(), e);
                        return;
                    }
                };

                let seq = self.stats.record_received();
                if seq % PROGRESS_EVERY == 0 {
                    let secs = self.stats.elapsed().as_secs_f64();
                    let rate = if secs > 0.0 { seq as f64 / secs } else { 0.0 };
                    log::info!("Received {} messages ({:.2} msg/s)", seq, rate);
                }

                if let Some(flow) = &self.flow {
                    flow.add_credits(flow.config().credit_increment);
                }

                self.gates
                    .message_in(&Delivery::Message { seq, envelope })
                    .await;
            }
            Inbound::Trace(trace) => {
                self.stats.record_trace();
                self.gates.message_in(&Delivery::Trace(trace)).await;
            }
            Inbound::Unknown(command) => {
                self.stats.record_unknown();
                log::info!("Unknown message type: {}", command);
            }
        }
    }
}
