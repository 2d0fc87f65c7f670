/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A session runs one client invocation on an established command stream. It spawns the
//! receive pump and the worker pool, then drives the configured mode.
//!
//! ### Subscribe
//!
//! The session sends the subscription and then waits for either the context token to be
//! cancelled (interrupt) or the pump to stop. A pump that stops on its own (end-of-stream,
//! ping limit, stream error) leaves the buffer closed, and the workers drain what is left
//! before they exit.
//!
//! ### Publish
//!
//! The session runs the [Publisher] to completion, then lingers briefly so the transport
//! can drain the last frames. A pump that stops for any reason cancels the context, which
//! interrupts the publisher and any send it has in progress.
//!
//! ### Shutdown
//!
//! The shutdown token is cancelled first, then the context token. The workers are joined,
//! and only after that is the pump awaited and the command sink released. The hash ledger,
//! if any, belongs to the caller and is closed after the session returns.

use std::sync::Arc;

use futures::Stream;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, Mode};
use crate::constants::{PUBLISH_FLUSH_DELAY, UNSUBSCRIBE_TIMEOUT};
use crate::error::{ClientError, StreamError};
use crate::flow_control::FlowController;
use crate::ledger::LedgerRecorder;
use crate::message_gate::MessageGateChain;
use crate::messages::Command;
use crate::proto;
use crate::publisher::{sender_tag, PublishReport, Publisher};
use crate::pump::{self, PumpExit};
use crate::stats::{Statistics, StatsSnapshot};
use crate::stream_handle::CommandSink;
use crate::worker::WorkerPool;

/// How a session ended.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionExit {
    /// the context token was cancelled from outside
    Interrupted,
    /// every message was published
    Published,
    /// the pump stopped on its own
    StreamEnded(PumpExit),
}

#[derive(Clone, Debug)]
pub struct SessionReport {
    pub exit: SessionExit,
    pub stats: StatsSnapshot,
    /// set in publish mode
    pub publish: Option<PublishReport>,
}

impl SessionReport {
    /// The stream error that ended the session, if it was not a clean exit.
    pub fn error(&self) -> Option<&StreamError> {
        match &self.exit {
            SessionExit::StreamEnded(PumpExit::Error(e)) => Some(e),
            _ => None,
        }
    }
}

/// Run a session of `config.mode` over `sink` and `inbound` until it completes or `cancel`
/// fires.
///
/// Fails only if the subscription cannot be sent. Cancellation interrupts any send in
/// progress, so the session returns promptly even when the node stops reading. Stream failures after that are reported
/// through [SessionReport::exit].
pub async fn run_session<S>(
    config: &Config,
    sink: Arc<dyn CommandSink>,
    inbound: S,
    gates: MessageGateChain,
    ledger: Option<LedgerRecorder>,
    cancel: CancellationToken,
) -> Result<SessionReport, ClientError>
where
    S: Stream<Item = Result<proto::Response, tonic::Status>> + Unpin + Send + 'static,
{
    let stats = Arc::new(Statistics::new());
    let flow = config
        .flow_control
        .enabled
        .then(|| Arc::new(FlowController::new(config.flow_control.clone(), stats.clone())));

    // 1. Start the consumers
    let (buffer, queue) = flume::bounded(config.consumer.buffer_size);
    let shutdown = CancellationToken::new();
    let workers = WorkerPool::spawn(
        config.consumer.workers,
        queue,
        Arc::new(gates),
        stats.clone(),
        flow.clone(),
        shutdown.clone(),
    );
    let mut pump = tokio::task::spawn(pump::run(inbound, buffer, stats.clone(), cancel.clone()));

    // 2. Drive the mode
    let driven = match config.mode {
        Mode::Subscribe => subscribe(config, sink.as_ref(), &mut pump, &cancel).await,
        Mode::Publish => {
            let publisher = Publisher::new(sink.clone(), config.publish.clone(), stats.clone())
                .flow_control(flow)
                .ledger(ledger)
                .sender(sender_tag(&config.connection.address));
            publish(config, &publisher, &mut pump, &cancel).await
        }
    };

    // 3. Shut down
    log::info!("Shutting down the session...");
    let pump_seen = match &driven {
        Ok(driven) if matches!(driven.exit, SessionExit::StreamEnded(_)) => {
            // buffer is closed, let the workers drain it
            workers.join().await;
            shutdown.cancel();
            cancel.cancel();
            true
        }
        _ => {
            shutdown.cancel();
            cancel.cancel();
            workers.join().await;
            matches!(&driven, Ok(driven) if driven.pump_seen)
        }
    };
    if !pump_seen {
        let exit = pump_exit(pump.await);
        log::debug!("receive pump stopped: {:?}", exit);
    }
    drop(sink);

    let driven = driven?;
    Ok(SessionReport {
        exit: driven.exit,
        stats: stats.snapshot(),
        publish: driven.publish,
    })
}

struct Driven {
    exit: SessionExit,
    publish: Option<PublishReport>,
    /// the pump handle has already been awaited
    pump_seen: bool,
}

impl Driven {
    fn interrupted(publish: Option<PublishReport>) -> Self {
        Self {
            exit: SessionExit::Interrupted,
            publish,
            pump_seen: false,
        }
    }

    /// The pump reported `exit`. A pump that stopped because of the context token is an
    /// interrupt, not the end of the stream.
    fn pump_stopped(exit: PumpExit, publish: Option<PublishReport>) -> Self {
        let exit = match exit {
            PumpExit::Cancelled => SessionExit::Interrupted,
            exit => SessionExit::StreamEnded(exit),
        };
        Self {
            exit,
            publish,
            pump_seen: true,
        }
    }
}

async fn subscribe(
    config: &Config,
    sink: &dyn CommandSink,
    pump: &mut JoinHandle<PumpExit>,
    cancel: &CancellationToken,
) -> Result<Driven, ClientError> {
    let subscribe = Command::Subscribe {
        topic: config.topic.clone(),
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Ok(Driven::interrupted(None))
        }
        sent = sink.send(subscribe) => sent?,
    }
    println!("Subscribed to topic {:?}, waiting for messages…", config.topic);

    let driven = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            // best effort, the stream is torn down right after
            let unsubscribe = Command::Unsubscribe {
                topic: config.topic.clone(),
            };
            match tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, sink.send(unsubscribe)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("unsubscribe not sent: {}", e),
                Err(_) => log::debug!("unsubscribe timed out"),
            }
            Driven::interrupted(None)
        }
        exit = pump => Driven::pump_stopped(pump_exit(exit), None),
    };
    Ok(driven)
}

async fn publish(
    config: &Config,
    publisher: &Publisher,
    pump: &mut JoinHandle<PumpExit>,
    cancel: &CancellationToken,
) -> Result<Driven, ClientError> {
    let publishing = publisher.publish(
        &config.topic,
        &config.publish.message,
        config.publish.count,
        cancel,
    );
    tokio::pin!(publishing);

    let mut stopped = None;
    let report = tokio::select! {
        report = &mut publishing => report,
        exit = &mut *pump => {
            // nothing more can reach the node
            cancel.cancel();
            stopped = Some(pump_exit(exit));
            publishing.await
        }
    };

    if let Some(exit) = stopped {
        return Ok(Driven::pump_stopped(exit, Some(report)));
    }
    if cancel.is_cancelled() {
        return Ok(Driven::interrupted(Some(report)));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(PUBLISH_FLUSH_DELAY) => {}
    }
    Ok(Driven {
        exit: SessionExit::Published,
        publish: Some(report),
        pump_seen: false,
    })
}

fn pump_exit(result: Result<PumpExit, JoinError>) -> PumpExit {
    result.unwrap_or_else(|e| {
        log::error!("receive pump failed: {}", e);
        PumpExit::Error(StreamError::Closed)
    })
}
