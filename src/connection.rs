/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Opens the single HTTP/2 connection to the node.
//!
//! The receive windows are raised well past the 64KiB protocol default. With the default
//! the window fills while the client is still working through a backlog, and the node
//! blocks on send. Keepalive pings are tuned so the node does not answer with
//! `ENHANCE_YOUR_CALM`. Dial failures are not retried here.

use tonic::transport::{Channel, Endpoint};

use crate::config::ConnectionConfig;
use crate::error::ConnectError;

/// One connection to one node, owned by the client for its whole lifetime.
pub struct Connection {
    address: String,
    channel: Channel,
}

impl Connection {
    pub(crate) fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// Tear the connection down. Any stream still open on it is cut.
    pub fn close(self) {
        log::debug!("closing connection to {}", self.address);
        drop(self.channel);
    }
}

/// Dial the node at `config.address`.
pub async fn connect(config: &ConnectionConfig) -> Result<Connection, ConnectError> {
    let endpoint = endpoint(config)?;
    log::info!("Connecting to node at: {}…", config.address);
    let channel = endpoint
        .connect()
        .await
        .map_err(|source| ConnectError::Dial {
            address: config.address.clone(),
            source,
        })?;

    Ok(Connection {
        address: config.address.clone(),
        channel,
    })
}

pub(crate) fn endpoint(config: &ConnectionConfig) -> Result<Endpoint, ConnectError> {
    let uri = if config.address.contains("://") {
        config.address.clone()
    } else {
        format!("http://{}", config.address)
    };

    let endpoint = Endpoint::from_shared(uri).map_err(|source| ConnectError::InvalidAddress {
        address: config.address.clone(),
        source,
    })?;

    Ok(endpoint
        .connect_timeout(config.connect_timeout)
        .tcp_nodelay(true)
        .initial_stream_window_size(Some(config.initial_stream_window_size))
        .initial_connection_window_size(Some(config.initial_connection_window_size))
        .http2_keep_alive_interval(config.keepalive_interval)
        .keep_alive_timeout(config.keepalive_timeout)
        .keep_alive_while_idle(config.permit_without_stream))
}
