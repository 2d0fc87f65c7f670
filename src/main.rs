/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use clap::Parser;

use optimum_p2p_client::cli::Args;
use optimum_p2p_client::Client;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    let report = match Client::new(config)
        .run_until(tokio::signal::ctrl_c())
        .await
    {
        Ok(report) => report,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    println!("{}", report.stats);
    if let Some(err) = report.error() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
