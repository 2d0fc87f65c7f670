/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Defines useful constants which are used in optimum_p2p_client.
//!
use std::time::Duration;

// Default connection configuration
pub const DEFAULT_ADDRESS: &str = "localhost:33212";
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(20);
pub const PERMIT_WITHOUT_STREAM: bool = true;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// HTTP/2 flow-control windows. The 64KiB protocol default fills up while the
// client works through a backlog and the node then blocks on send.
pub const MEGABYTES: u32 = 1048576;
pub const INITIAL_STREAM_WINDOW_SIZE: u32 = 1024 * MEGABYTES;
pub const INITIAL_CONNECTION_WINDOW_SIZE: u32 = 1024 * MEGABYTES;
pub const MIN_WINDOW_SIZE: u32 = 65535;

// Stream handle
pub const OUTBOUND_QUEUE_DEPTH: usize = 1024;

// Default flow control configuration
pub const FLOW_CONTROL_ENABLED: bool = true;
pub const INITIAL_CREDITS: u64 = 100;
pub const CREDIT_INCREMENT: u64 = 10;
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_millis(100);
pub const PACING_DELAY: Duration = Duration::from_micros(100);
/// Pacing delays are accumulated and slept once they reach this much.
pub const PACING_GRANULARITY: Duration = Duration::from_millis(1);
pub const MAX_CONCURRENT_SENDS: usize = 10;
pub const CREDIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// Default consumer configuration
pub const BUFFER_SIZE: usize = 10000;
pub const WORKERS: usize = 10;
pub const PROGRESS_EVERY: u64 = 100;
pub const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1);

// Publisher
pub const PUBLISH_FLUSH_DELAY: Duration = Duration::from_millis(500);
pub const RANDOM_SUFFIX_BYTES: usize = 4;
pub const DEFAULT_TEMPLATE: &str = "XXX";

// Diagnostics
pub const TRACE_HEAD_BYTES: usize = 64;
pub const HASH_PREFIX_CHARS: usize = 8;

// Status messages the node (or its HTTP/2 stack) uses when it rejects our
// keepalive pings or tears the connection down.
pub const PING_LIMIT_PATTERNS: [&str; 4] = [
    "enhance_your_calm",
    "too_many_pings",
    "too many pings",
    "connection closed",
];
