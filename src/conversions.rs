/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! This module defines the data conversion functions that are used throughout the client.
//!
//! The following are implemented for converting between different types:
//!     - From<[Command]> for [proto::Request]
//!     - From<[proto::Response]> for [Inbound]
//!     - TryFrom<&[u8]> for [Envelope]

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::DecodeError;
use crate::messages::{Command, Envelope, Inbound, TraceEvent, TraceKind};
use crate::proto::{self, RequestCommand, ResponseType};

impl From<Command> for proto::Request {
    fn from(command: Command) -> Self {
        match command {
            Command::Subscribe { topic } => proto::Request {
                command: RequestCommand::SubscribeToTopic as i32,
                topic,
                data: Vec::new(),
            },
            Command::Unsubscribe { topic } => proto::Request {
                command: RequestCommand::UnsubscribeFromTopic as i32,
                topic,
                data: Vec::new(),
            },
            Command::Publish { topic, payload } => proto::Request {
                command: RequestCommand::PublishData as i32,
                topic,
                data: payload,
            },
        }
    }
}

impl From<proto::Response> for Inbound {
    fn from(response: proto::Response) -> Self {
        match ResponseType::try_from(response.command) {
            Ok(ResponseType::Message) => Inbound::Message(response.data),
            Ok(ResponseType::MessageTraceGossipSub) => Inbound::Trace(TraceEvent {
                kind: TraceKind::GossipSub,
                data: response.data,
            }),
            Ok(ResponseType::MessageTraceOptimumP2p) => Inbound::Trace(TraceEvent {
                kind: TraceKind::OptimumP2P,
                data: response.data,
            }),
            Ok(ResponseType::Unknown) | Err(_) => Inbound::Unknown(response.command),
        }
    }
}

impl TryFrom<&[u8]> for Envelope {
    type Error = DecodeError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Hex of the first `n` bytes of `data`.
pub fn head_hex(data: &[u8], n: usize) -> String {
    hex::encode(&data[..data.len().min(n)])
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}

static IPV4: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\.\d+\.\d+\.\d+").expect("Invalid IPv4 regex"));

/// The first dotted quad in `text`, if any.
pub fn find_ipv4(text: &str) -> Option<&str> {
    IPV4.find(text).map(|m| m.as_str())
}
