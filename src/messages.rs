/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! This module defines the message-related types that travel on the command stream:
//! - [Command]: what the client asks the node to do (outbound).
//! - [Inbound]: what the node pushes back (inbound), before payload decoding.
//! - [Envelope]: the decoded application message carried by [Inbound::Message].
//! - [TraceEvent]: a raw protocol trace, handed on undecoded.
//!
//! Conversions from and to the protobuf types live in [crate::conversions].

use serde::{Deserialize, Serialize};

use crate::conversions::find_ipv4;

/// [Command] defines the requests the client sends to the node.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: Vec<u8> },
}

/// Response frames received from the node, classified by their command code.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// JSON [Envelope] bytes
    Message(Vec<u8>),
    Trace(TraceEvent),
    Unknown(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceKind {
    GossipSub,
    OptimumP2P,
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceKind::GossipSub => write!(f, "GossipSub"),
            TraceKind::OptimumP2P => write!(f, "OptimumP2P"),
        }
    }
}

/// A protocol trace emitted by the node's mesh. Its protobuf body is not decoded here.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceEvent {
    pub kind: TraceKind,
    pub data: Vec<u8>,
}

/// [Envelope] is the message delivered to a subscriber, as serialized by the node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "MessageID", default)]
    pub message_id: String,

    #[serde(rename = "Topic", default)]
    pub topic: String,

    /// application payload
    #[serde(rename = "Message", default, with = "base64_bytes")]
    pub message: Vec<u8>,

    /// node that published the message, for debugging only
    #[serde(rename = "SourceNodeID", default)]
    pub source_node_id: String,
}

impl Envelope {
    /// The publisher of a payload: the first IPv4 address in it, else the tag of a
    /// `<sender>-<hex>` payload. Empty when the payload carries neither.
    pub fn publisher(&self) -> String {
        let text = String::from_utf8_lossy(&self.message);
        if let Some(ip) = find_ipv4(&text) {
            return ip.to_string();
        }
        match text.rsplit_once('-') {
            Some((tag, random))
                if !random.is_empty() && random.bytes().all(|b| b.is_ascii_hexdigit()) =>
            {
                tag.to_string()
            }
            _ => String::new(),
        }
    }
}

/// Byte slices are base64 strings in the node's JSON; `null` stands for an empty slice.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
