/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tab-separated log of message hashes, written to the `--output` file.
//!
//! Publishers write `sender size sha256` lines and subscribers write
//! `receiver publisher size sha256` lines. Comparing the files of both ends shows which
//! messages made it through the mesh. A single writer task owns the file and flushes
//! after every line.

use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LEDGER_QUEUE_DEPTH: usize = 100;

pub const PUBLISH_HEADER: &str = "sender\tsize\tsha256(msg)";
pub const RECEIVE_HEADER: &str = "receiver\tpublisher\tsize\tsha256(msg)";

pub struct HashLedger {
    recorder: LedgerRecorder,
    writer: JoinHandle<io::Result<u64>>,
}

/// Cheap handle for appending lines to a [HashLedger].
#[derive(Clone)]
pub struct LedgerRecorder {
    sender: mpsc::Sender<String>,
}

impl LedgerRecorder {
    pub async fn record(&self, line: String) {
        if self.sender.send(line).await.is_err() {
            log::debug!("hash ledger closed, line discarded");
        }
    }
}

impl HashLedger {
    /// Create (or truncate) the file at `path`, write `header`, and start the writer task.
    pub async fn create(path: &Path, header: &str) -> io::Result<Self> {
        let mut file = BufWriter::new(File::create(path).await?);
        file.write_all(header.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        let (sender, mut receiver) = mpsc::channel::<String>(LEDGER_QUEUE_DEPTH);
        let writer = tokio::task::spawn(async move {
            let mut lines: u64 = 0;
            while let Some(line) = receiver.recv().await {
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await?;
                lines += 1;
            }
            file.shutdown().await?;
            Ok::<u64, io::Error>(lines)
        });

        Ok(Self {
            recorder: LedgerRecorder { sender },
            writer,
        })
    }

    pub fn recorder(&self) -> LedgerRecorder {
        self.recorder.clone()
    }

    /// Wait for every queued line to reach the file. Lines recorded through recorders
    /// still alive elsewhere are written as long as they were queued before those
    /// recorders are dropped. Returns the number of lines written, header excluded.
    pub async fn close(self) -> io::Result<u64> {
        drop(self.recorder);
        let lines = self
            .writer
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        println!("All data flushed to disk");
        Ok(lines)
    }
}
