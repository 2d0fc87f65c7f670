/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [StreamHandle], the handle type you use to send commands on the `ListenCommands` stream.
//!
//! One stream is opened per client. Its outbound half is an mpsc queue drained by the gRPC
//! transport. Its inbound half is an [InboundStream] that belongs to the receive pump.
//!
//! To send a command, call `.send()` with a [Command]. The handle keeps writes serialized,
//! so several publish tasks can share it.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use crate::connection::Connection;
use crate::constants::OUTBOUND_QUEUE_DEPTH;
use crate::error::StreamError;
use crate::messages::Command;
use crate::proto::{self, command_stream_client::CommandStreamClient};

/// Inbound half of the command stream.
pub type InboundStream = BoxStream<'static, Result<proto::Response, tonic::Status>>;

/// Anything that accepts [Command]s for the node.
///
/// Implemented by [StreamHandle]. Tests provide in-memory sinks.
#[async_trait]
pub trait CommandSink: Send + Sync + 'static {
    async fn send(&self, command: Command) -> Result<(), StreamError>;
}

pub struct StreamHandle {
    /// single writer of the outbound half
    sender: Mutex<mpsc::Sender<proto::Request>>,
}

impl StreamHandle {
    /// Open the `ListenCommands` stream on `connection`.
    ///
    /// The call itself is driven by the returned [InboundStream]: the node only answers with
    /// response headers once it has something to deliver, so commands can be queued on the
    /// handle before the first inbound frame arrives.
    pub fn establish(connection: &Connection) -> (StreamHandle, InboundStream) {
        let mut client = CommandStreamClient::new(connection.channel())
            .max_decoding_message_size(usize::MAX)
            .max_encoding_message_size(usize::MAX);

        let (sender, receiver) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let requests = ReceiverStream::new(receiver);

        let call = async move { client.listen_commands(requests).await };
        let inbound = stream::once(call)
            .map(|response| match response {
                Ok(response) => response.into_inner().boxed(),
                Err(status) => stream::iter([Err(status)]).boxed(),
            })
            .flatten()
            .boxed();

        (
            StreamHandle {
                sender: Mutex::new(sender),
            },
            inbound,
        )
    }
}

#[async_trait]
impl CommandSink for StreamHandle {
    async fn send(&self, command: Command) -> Result<(), StreamError> {
        let sender = self.sender.lock().await;
        sender
            .send(command.into())
            .await
            .map_err(|_| StreamError::Closed)
    }
}
