/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::constants::TRACE_HEAD_BYTES;
use crate::conversions::{head_hex, sha256_hex};
use crate::ledger::LedgerRecorder;
use crate::messages::{Envelope, TraceEvent};

/// What a worker hands to the gates after classifying an inbound frame.
#[derive(Clone, Debug)]
pub enum Delivery {
    /// `seq` is the position of the message in the received count
    Message { seq: u64, envelope: Envelope },
    Trace(TraceEvent),
}

/// [MessageGate] is a handler for [Delivery]s. Which deliveries the gate handles is
/// specified in `accepted()`.
///
/// Macro `async_trait` has to be added for using this trait, Example:
///
/// ```no_run
/// struct MyGate {}
///
/// #[async_trait]
/// impl MessageGate for MyGate {
///     fn accepted(&self, delivery: &Delivery) -> bool {
///         matches!(delivery, Delivery::Message { .. })
///     }
///
///     async fn process(&self, delivery: &Delivery) {
///         // ... process the delivery
///     }
/// }
/// ```
#[async_trait]
pub trait MessageGate: Send + Sync + 'static {
    /// Check if the message gate accepts the delivery.
    fn accepted(&self, delivery: &Delivery) -> bool;
    /// Process the delivery.
    async fn process(&self, delivery: &Delivery);
}

/// List of [MessageGate]s. Every gate that accepts a delivery gets to process it, in the
/// order the gates were appended.
///
/// ### Example
///
/// ```no_run
/// let chain = MessageGateChain::new()
///     .append(ConsoleGate)
///     .append(TraceLogGate);
/// ```
#[derive(Default)]
pub struct MessageGateChain {
    gates: Vec<Box<dyn MessageGate>>,
}

impl MessageGateChain {
    pub fn new() -> Self {
        Self { gates: Vec::new() }
    }

    /// `append` adds a [MessageGate] to the list of handlers
    pub fn append(mut self, gate: impl MessageGate) -> Self {
        self.gates.push(Box::new(gate));
        self
    }

    pub(crate) async fn message_in(&self, delivery: &Delivery) {
        for gate in self.gates.iter().filter(|gate| gate.accepted(delivery)) {
            gate.process(delivery).await;
        }
    }
}

/// Prints every received message to stdout.
pub struct ConsoleGate;

#[async_trait]
impl MessageGate for ConsoleGate {
    fn accepted(&self, delivery: &Delivery) -> bool {
        matches!(delivery, Delivery::Message { .. })
    }

    async fn process(&self, delivery: &Delivery) {
        if let Delivery::Message { seq, envelope } = delivery {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            println!(
                "Recv message: [{}] [{} {}] {}",
                seq,
                now,
                envelope.message.len(),
                String::from_utf8_lossy(&envelope.message)
            );
        }
    }
}

/// Logs trace events. Their protobuf bodies are left to external tooling.
pub struct TraceLogGate;

#[async_trait]
impl MessageGate for TraceLogGate {
    fn accepted(&self, delivery: &Delivery) -> bool {
        matches!(delivery, Delivery::Trace(_))
    }

    async fn process(&self, delivery: &Delivery) {
        if let Delivery::Trace(trace) = delivery {
            log::debug!(
                "[TRACE] {} size={}B head={}",
                trace.kind,
                trace.data.len(),
                head_hex(&trace.data, TRACE_HEAD_BYTES)
            );
        }
    }
}

/// Appends one `receiver publisher size sha256` line per received message to the
/// hash ledger.
pub struct LedgerGate {
    receiver: String,
    recorder: LedgerRecorder,
}

impl LedgerGate {
    pub fn new(receiver: impl Into<String>, recorder: LedgerRecorder) -> Self {
        Self {
            receiver: receiver.into(),
            recorder,
        }
    }
}

#[async_trait]
impl MessageGate for LedgerGate {
    fn accepted(&self, delivery: &Delivery) -> bool {
        matches!(delivery, Delivery::Message { .. })
    }

    async fn process(&self, delivery: &Delivery) {
        if let Delivery::Message { envelope, .. } = delivery {
            let line = format!(
                "{}\t{}\t{}\t{}",
                self.receiver,
                envelope.publisher(),
                envelope.message.len(),
                sha256_hex(&envelope.message)
            );
            self.recorder.record(line).await;
        }
    }
}
