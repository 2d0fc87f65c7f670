/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Flow-controlled client for the gRPC command stream of an OptimumP2P sidecar node.
//!
//! The client holds one HTTP/2 connection and one bidirectional `ListenCommands` stream to
//! the node. Over it the client either subscribes to a topic and consumes the messages the
//! node pushes, or publishes a batch of payloads to a topic.
//!
//! ## Subscribing
//!
//! ```no_run
//! use optimum_p2p_client::{Client, Config};
//!
//! // 1. Build a configuration.
//! let config = Config::new("topicA")
//!     .set_address("127.0.0.1:33212")
//!     .set_workers(4);
//!
//! // 2. Run until ctrl-c. Received messages are printed by the default gates.
//! let report = Client::new(config)
//!     .run_until(tokio::signal::ctrl_c())
//!     .await?;
//!
//! // 3. Inspect what happened.
//! println!("{}", report.stats);
//! ```
//!
//! ## Publishing
//!
//! ```no_run
//! use optimum_p2p_client::{Client, Config, Mode};
//!
//! let config = Config::new("topicA")
//!     .set_mode(Mode::Publish)
//!     .set_message("hello")
//!     .set_count(200)
//!     .set_initial_credits(50)
//!     .set_credit_increment(5);
//!
//! let report = Client::new(config)
//!     .run_until(tokio::signal::ctrl_c())
//!     .await?;
//! ```
//!
//! Publishing goes through the [flow_control::FlowController] unless flow control is
//! disabled, in which case payloads are sent back to back with the configured sleep.

pub mod cli;

pub mod client;
pub use client::Client;

pub mod config;
pub use config::{Config, Mode};

pub mod connection;

pub mod constants;

pub mod conversions;

pub mod engine;
pub use engine::{SessionExit, SessionReport};

pub mod error;
pub use error::ClientError;

pub mod flow_control;

pub mod ledger;

pub mod message_gate;
pub use message_gate::{MessageGate, MessageGateChain};

pub mod messages;

pub mod proto;

pub mod publisher;

pub mod pump;

pub mod stats;

pub mod stream_handle;

pub mod worker;
