/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Configuration parameters provided by the library user.
//!
//! Example:
//!
//! ```no_run
//! let config = Config::new("topicA")
//!     .set_mode(Mode::Publish)
//!     .set_message("hello")
//!     .set_count(1000)
//!     .set_initial_credits(50);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// What the client does with its command stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Subscribe,
    Publish,
}

/// Configuration of the client, built once at start-up and handed to every component.
///
/// For convenience, default values are predefined when calling `new()` as following:
/// - Node address: localhost:33212
/// - Keepalive: ping every 2 minutes, 20 seconds timeout, pings allowed without active stream
/// - HTTP/2 windows: 1 GiB per stream and per connection
/// - Flow control: enabled, 100 initial credits, +10 per delivery, 3 retries 100ms apart,
///   100us pacing, 10 concurrent sends
/// - Consumer: buffer of 10000 frames drained by 10 workers
#[derive(Clone, Debug)]
pub struct Config {
    pub mode: Mode,

    /// topic to subscribe or publish to
    pub topic: String,

    pub connection: ConnectionConfig,

    pub flow_control: FlowControlConfig,

    pub consumer: ConsumerConfig,

    pub publish: PublishConfig,

    /// file that receives one hash line per published or received message
    pub output: Option<PathBuf>,
}

/// Transport tuning of the single connection to the node.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub address: String,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    /// Disabling this avoids a "too many pings" rejection on idle connections.
    pub permit_without_stream: bool,
    pub initial_stream_window_size: u32,
    pub initial_connection_window_size: u32,
    pub connect_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct FlowControlConfig {
    /// when false, messages are sent back to back with only [PublishConfig::sleep] in between
    pub enabled: bool,
    pub initial_credits: u64,
    pub credit_increment: u64,
    /// Upper bound of the credit pool. `None` lets the pool grow without limit.
    pub max_credits: Option<u64>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub pacing_delay: Duration,
    pub max_concurrent_sends: usize,
    pub poll_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct ConsumerConfig {
    /// capacity of the buffer between the receive pump and the workers
    pub buffer_size: usize,
    pub workers: usize,
}

#[derive(Clone, Debug)]
pub struct PublishConfig {
    pub message: String,
    pub count: usize,
    /// delay between two sends when flow control is disabled
    pub sleep: Duration,
    /// size of the random body of each message, if set
    pub data_size: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            keepalive_interval: KEEPALIVE_INTERVAL,
            keepalive_timeout: KEEPALIVE_TIMEOUT,
            permit_without_stream: PERMIT_WITHOUT_STREAM,
            initial_stream_window_size: INITIAL_STREAM_WINDOW_SIZE,
            initial_connection_window_size: INITIAL_CONNECTION_WINDOW_SIZE,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            enabled: FLOW_CONTROL_ENABLED,
            initial_credits: INITIAL_CREDITS,
            credit_increment: CREDIT_INCREMENT,
            max_credits: None,
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            pacing_delay: PACING_DELAY,
            max_concurrent_sends: MAX_CONCURRENT_SENDS,
            poll_interval: CREDIT_POLL_INTERVAL,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            buffer_size: BUFFER_SIZE,
            workers: WORKERS,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            message: String::new(),
            count: 1,
            sleep: Duration::ZERO,
            data_size: None,
        }
    }
}

impl Config {
    /// Create config for a topic, subscribing with default settings.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            mode: Mode::Subscribe,
            topic: topic.into(),
            connection: ConnectionConfig::default(),
            flow_control: FlowControlConfig::default(),
            consumer: ConsumerConfig::default(),
            publish: PublishConfig::default(),
            output: None,
        }
    }

    pub fn set_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Address of the node's sidecar endpoint, e.g. `localhost:33212`
    pub fn set_address(mut self, address: impl Into<String>) -> Self {
        self.connection.address = address.into();
        self
    }

    pub fn set_keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.connection.keepalive_interval = interval;
        self.connection.keepalive_timeout = timeout;
        self
    }

    pub fn set_permit_without_stream(mut self, permit: bool) -> Self {
        self.connection.permit_without_stream = permit;
        self
    }

    pub fn set_window_sizes(mut self, stream: u32, connection: u32) -> Self {
        self.connection.initial_stream_window_size = stream;
        self.connection.initial_connection_window_size = connection;
        self
    }

    pub fn set_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connection.connect_timeout = connect_timeout;
        self
    }

    pub fn set_message(mut self, message: impl Into<String>) -> Self {
        self.publish.message = message.into();
        self
    }

    pub fn set_count(mut self, count: usize) -> Self {
        self.publish.count = count;
        self
    }

    pub fn set_sleep(mut self, sleep: Duration) -> Self {
        self.publish.sleep = sleep;
        self
    }

    pub fn set_data_size(mut self, data_size: Option<usize>) -> Self {
        self.publish.data_size = data_size;
        self
    }

    pub fn set_flow_control(mut self, enabled: bool) -> Self {
        self.flow_control.enabled = enabled;
        self
    }

    pub fn set_initial_credits(mut self, initial_credits: u64) -> Self {
        self.flow_control.initial_credits = initial_credits;
        self
    }

    pub fn set_credit_increment(mut self, credit_increment: u64) -> Self {
        self.flow_control.credit_increment = credit_increment;
        self
    }

    pub fn set_max_credits(mut self, max_credits: Option<u64>) -> Self {
        self.flow_control.max_credits = max_credits;
        self
    }

    pub fn set_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.flow_control.max_retries = max_retries;
        self.flow_control.retry_delay = retry_delay;
        self
    }

    pub fn set_pacing_delay(mut self, pacing_delay: Duration) -> Self {
        self.flow_control.pacing_delay = pacing_delay;
        self
    }

    pub fn set_max_concurrent_sends(mut self, max_concurrent_sends: usize) -> Self {
        self.flow_control.max_concurrent_sends = max_concurrent_sends;
        self
    }

    pub fn set_buffer_size(mut self, buffer_size: usize) -> Self {
        self.consumer.buffer_size = buffer_size;
        self
    }

    pub fn set_workers(mut self, workers: usize) -> Self {
        self.consumer.workers = workers;
        self
    }

    pub fn set_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    /// Check the configuration before any connection is made.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::MissingTopic);
        }
        if self.mode == Mode::Publish
            && self.publish.message.is_empty()
            && self.publish.count == 1
            && self.publish.data_size.is_none()
        {
            return Err(ConfigError::MissingMessage);
        }
        at_least_one("count", self.publish.count)?;
        at_least_one("workers", self.consumer.workers)?;
        at_least_one("buffer-size", self.consumer.buffer_size)?;
        at_least_one("max-concurrent", self.flow_control.max_concurrent_sends)?;
        if let Some(max_credits) = self.flow_control.max_credits {
            if max_credits < self.flow_control.initial_credits {
                return Err(ConfigError::InvalidValue {
                    field: "max-credits",
                    reason: format!(
                        "{} is below initial-credits {}",
                        max_credits, self.flow_control.initial_credits
                    ),
                });
            }
        }
        for (field, size) in [
            ("initial-window-size", self.connection.initial_stream_window_size),
            ("initial-conn-window-size", self.connection.initial_connection_window_size),
        ] {
            if size < MIN_WINDOW_SIZE {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{} is below the HTTP/2 minimum of {}", size, MIN_WINDOW_SIZE),
                });
            }
        }
        Ok(())
    }
}

fn at_least_one(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
