/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The receive pump: the only reader of the inbound half of the command stream.
//!
//! Every frame is put into the bounded message buffer without waiting. When the buffer is
//! full the frame is dropped and counted, so a slow consumer never stalls the stream.
//! The pump stops on cancellation, end-of-stream, a ping-limit rejection, or any other
//! stream error. Stopping drops the buffer's sender, so the workers see the buffer close
//! once they have drained it.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::proto;
use crate::stats::Statistics;

/// Why the pump stopped.
#[derive(Clone, Debug, PartialEq)]
pub enum PumpExit {
    Cancelled,
    EndOfStream,
    /// The node rejected our keepalive pings or closed the connection.
    PingLimit(String),
    Error(StreamError),
    /// all workers are gone
    BufferClosed,
}

pub async fn run<S>(
    mut inbound: S,
    buffer: flume::Sender<proto::Response>,
    stats: Arc<Statistics>,
    cancel: CancellationToken,
) -> PumpExit
where
    S: Stream<Item = Result<proto::Response, tonic::Status>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PumpExit::Cancelled,
            next = inbound.next() => next,
        };

        let response = match next {
            Some(Ok(response)) => response,
            None => {
                log::info!("stream closed by server");
                return PumpExit::EndOfStream;
            }
            Some(Err(status)) => {
                return match StreamError::from_status(&status) {
                    StreamError::PingLimit { message } => {
                        log::warn!("Connection closed due to keepalive ping limit. This indicates the server has stricter ping limits than expected.");
                        log::warn!("Consider adjusting keepalive settings or server configuration.");
                        PumpExit::PingLimit(message)
                    }
                    error => {
                        log::error!("recv error: {}", error);
                        PumpExit::Error(error)
                    }
                };
            }
        };

        match buffer.try_send(response) {
            Ok(()) => stats.record_enqueued(),
            Err(flume::TrySendError::Full(_)) => {
                let dropped = stats.record_buffer_drop();
                log::warn!(
                    "Message buffer full ({} frames), dropping inbound frame ({} dropped so far)",
                    buffer.capacity().unwrap_or_default(),
                    dropped
                );
            }
            Err(flume::TrySendError::Disconnected(_)) => return PumpExit::BufferClosed,
        }
    }
}
