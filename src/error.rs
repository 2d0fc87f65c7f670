/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Error types of the client.
//!
//! - [ConfigError] and [ConnectError] are fatal at start-up.
//! - [StreamError] describes why a send or receive on the command stream failed. A
//!   [PingLimit](StreamError::PingLimit) rejection is an expected way for a stream to end.
//! - [DecodeError] is raised for a single malformed inbound frame and never stops the client.
//! - [ClientError] is what [Client::run_until](crate::client::Client::run_until) returns.

use thiserror::Error;

use crate::constants::PING_LIMIT_PATTERNS;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("--topic is required")]
    MissingTopic,

    #[error("--msg is required in publish mode")]
    MissingMessage,

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("invalid node address {address}: {source}")]
    InvalidAddress {
        address: String,
        source: tonic::transport::Error,
    },

    #[error("failed to connect to node {address}: {source}")]
    Dial {
        address: String,
        source: tonic::transport::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// The outbound half of the stream is gone.
    #[error("command stream closed")]
    Closed,

    /// The node refused our keepalive pings (`ENHANCE_YOUR_CALM` / `too_many_pings`) or
    /// closed the connection.
    #[error("connection closed due to keepalive ping limit: {message}")]
    PingLimit { message: String },

    #[error("stream error ({code:?}): {message}")]
    Status { code: tonic::Code, message: String },
}

impl StreamError {
    /// Classify a status received on the stream.
    pub fn from_status(status: &tonic::Status) -> Self {
        if is_ping_limit(status.message()) {
            return StreamError::PingLimit {
                message: status.message().to_string(),
            };
        }
        StreamError::Status {
            code: status.code(),
            message: status.message().to_string(),
        }
    }

    pub fn is_ping_limit(&self) -> bool {
        matches!(self, StreamError::PingLimit { .. })
    }

    /// Whether sending again on the same stream can succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, StreamError::Closed | StreamError::PingLimit { .. })
    }
}

fn is_ping_limit(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    PING_LIMIT_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("error unmarshalling message: {0}")]
    Envelope(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("output file: {0}")]
    Io(#[from] std::io::Error),
}
