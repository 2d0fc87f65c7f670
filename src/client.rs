/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Entry point to the optimum_p2p_client library.
//!
//! A [Client] is built from a [Config] and, optionally, a [MessageGateChain] that decides
//! what happens to received messages. Running it connects to the node, opens the command
//! stream, and runs one session (see [crate::engine]) until the session completes or the
//! given signal future resolves.
//!
//! Example:
//!
//! // 1. Define the configurations
//! let config = Config::new("topicA").set_mode(Mode::Publish).set_message("hello");
//!
//! // 2. Build the client and run it until ctrl-c
//! let report = Client::new(config)
//!     .gates(MessageGateChain::new().append(ConsoleGate))
//!     .run_until(tokio::signal::ctrl_c())
//!     .await?;
//!
//! // 3. Print the statistics
//! println!("{}", report.stats);

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, Mode};
use crate::connection;
use crate::engine::{self, SessionReport};
use crate::error::ClientError;
use crate::ledger::{HashLedger, PUBLISH_HEADER, RECEIVE_HEADER};
use crate::message_gate::{ConsoleGate, LedgerGate, MessageGateChain, TraceLogGate};
use crate::publisher::sender_tag;
use crate::stream_handle::StreamHandle;

pub struct Client {
    config: Config,

    /// Gates for received messages. [ConsoleGate] and [TraceLogGate] if not set.
    gates: Option<MessageGateChain>,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            gates: None,
        }
    }

    pub fn gates(mut self, gates: MessageGateChain) -> Self {
        self.gates = Some(gates);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one session, stopping early when `signal` resolves.
    ///
    /// Configuration, output file, and dial errors are returned before anything is sent.
    pub async fn run_until<F>(self, signal: F) -> Result<SessionReport, ClientError>
    where
        F: Future + Send + 'static,
    {
        let config = self.config;
        config.validate()?;

        let ledger = match &config.output {
            Some(path) => {
                let header = match config.mode {
                    Mode::Publish => PUBLISH_HEADER,
                    Mode::Subscribe => RECEIVE_HEADER,
                };
                Some(HashLedger::create(path, header).await?)
            }
            None => None,
        };

        let mut gates = self.gates.unwrap_or_else(default_gates);
        let mut publish_ledger = None;
        if let Some(ledger) = &ledger {
            match config.mode {
                Mode::Subscribe => {
                    let receiver = sender_tag(&config.connection.address);
                    gates = gates.append(LedgerGate::new(receiver, ledger.recorder()));
                }
                Mode::Publish => publish_ledger = Some(ledger.recorder()),
            }
        }

        let connection = connection::connect(&config.connection).await?;
        let (handle, inbound) = StreamHandle::establish(&connection);

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::task::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = signal => {
                        println!("shutting down…");
                        cancel.cancel();
                    }
                }
            })
        };

        let report = engine::run_session(
            &config,
            Arc::new(handle),
            inbound,
            gates,
            publish_ledger,
            cancel.clone(),
        )
        .await;

        cancel.cancel();
        if let Err(e) = watcher.await {
            log::debug!("signal watcher failed: {}", e);
        }
        connection.close();

        if let Some(ledger) = ledger {
            let lines = ledger.close().await?;
            log::info!("Wrote {} lines to the hash ledger", lines);
        }

        report
    }
}

/// Print messages to stdout and log traces.
pub fn default_gates() -> MessageGateChain {
    MessageGateChain::new()
        .append(ConsoleGate)
        .append(TraceLogGate)
}
