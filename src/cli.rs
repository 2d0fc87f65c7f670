/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Command line of the `p2p_client` binary. Every flag maps onto one [Config] value.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{Config, Mode};
use crate::constants::{
    BUFFER_SIZE, CREDIT_INCREMENT, DEFAULT_ADDRESS, INITIAL_CONNECTION_WINDOW_SIZE,
    INITIAL_CREDITS, INITIAL_STREAM_WINDOW_SIZE, MAX_CONCURRENT_SENDS, MAX_RETRIES, WORKERS,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Flow-controlled client for the OptimumP2P sidecar", long_about = None)]
pub struct Args {
    /// sidecar gRPC address
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    pub addr: String,

    #[arg(long, value_enum, default_value_t = Mode::Subscribe)]
    pub mode: Mode,

    /// topic name
    #[arg(long, default_value = "")]
    pub topic: String,

    /// message data (for publish)
    #[arg(long, default_value = "")]
    pub msg: String,

    /// number of messages to publish
    #[arg(long, default_value_t = 1)]
    pub count: usize,

    /// delay between publishes when flow control is off (e.g. 1s, 500ms)
    #[arg(long, value_parser = parse_duration, default_value = "0")]
    pub sleep: Duration,

    /// publish `<sender>-<hex>` payloads with this many random bytes instead of `--msg`
    #[arg(long)]
    pub data_size: Option<usize>,

    /// write a hash ledger of every published or received message to this file
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub flow_control: bool,

    #[arg(long, default_value_t = INITIAL_CREDITS)]
    pub initial_credits: u64,

    /// credits added per successful send and per received message
    #[arg(long, default_value_t = CREDIT_INCREMENT)]
    pub credit_increment: u64,

    /// upper bound of the credit pool (unbounded if not set)
    #[arg(long)]
    pub max_credits: Option<u64>,

    #[arg(long, default_value_t = MAX_RETRIES)]
    pub max_retries: u32,

    #[arg(long, value_parser = parse_duration, default_value = "100ms")]
    pub retry_delay: Duration,

    /// pause between admitted sends
    #[arg(long, value_parser = parse_duration, default_value = "100us")]
    pub pacing_delay: Duration,

    #[arg(long, default_value_t = BUFFER_SIZE)]
    pub buffer_size: usize,

    #[arg(long, default_value_t = WORKERS)]
    pub workers: usize,

    /// maximum publishes in flight
    #[arg(long, default_value_t = MAX_CONCURRENT_SENDS)]
    pub max_concurrent: usize,

    #[arg(long, alias = "keepalive-internal", value_parser = parse_duration, default_value = "2m")]
    pub keepalive_interval: Duration,

    #[arg(long, value_parser = parse_duration, default_value = "20s")]
    pub keepalive_timeout: Duration,

    /// send keepalive pings while no stream is open
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub permit_without_stream: bool,

    /// HTTP/2 stream receive window in bytes
    #[arg(long, default_value_t = INITIAL_STREAM_WINDOW_SIZE)]
    pub initial_window_size: u32,

    /// HTTP/2 connection receive window in bytes
    #[arg(long, default_value_t = INITIAL_CONNECTION_WINDOW_SIZE)]
    pub initial_conn_window_size: u32,

    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub connect_timeout: Duration,
}

impl Args {
    pub fn into_config(self) -> Config {
        Config::new(self.topic)
            .set_mode(self.mode)
            .set_address(self.addr)
            .set_keepalive(self.keepalive_interval, self.keepalive_timeout)
            .set_permit_without_stream(self.permit_without_stream)
            .set_window_sizes(self.initial_window_size, self.initial_conn_window_size)
            .set_connect_timeout(self.connect_timeout)
            .set_message(self.msg)
            .set_count(self.count)
            .set_sleep(self.sleep)
            .set_data_size(self.data_size)
            .set_flow_control(self.flow_control)
            .set_initial_credits(self.initial_credits)
            .set_credit_increment(self.credit_increment)
            .set_max_credits(self.max_credits)
            .set_retries(self.max_retries, self.retry_delay)
            .set_pacing_delay(self.pacing_delay)
            .set_max_concurrent_sends(self.max_concurrent)
            .set_buffer_size(self.buffer_size)
            .set_workers(self.workers)
            .set_output(self.output)
    }
}

/// Parse a duration such as `300ms`, `1.5s`, `2m`, or `1h2m3s`. A bare `0` is accepted.
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, and `h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("invalid duration {:?}", s));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number in duration {:?}", s))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration {:?}", s)),
            unit => return Err(format!("unknown unit {:?} in duration {:?}", unit, s)),
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    Ok(Duration::from_nanos(total.round() as u64))
}
