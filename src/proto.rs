/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Protobuf messages and the gRPC client of the node's `CommandStream` service, generated
//! from `proto/p2p_stream.proto` by the build script.

tonic::include_proto!("proto");

/// Operations the sidecar performs on behalf of the client, carried in [Request::command].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum RequestCommand {
    Unknown = 0,
    PublishData = 1,
    SubscribeToTopic = 2,
    UnsubscribeFromTopic = 3,
}
