//! Result / Log Sink
//!
//! One multi-producer queue into which every actor dumps its logs and user
//! results at teardown. The kernel drains it once, single-threaded, after
//! its main loop exits.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// One dumped record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub device: String,
    pub channel: String,
    pub payload: Value,
}

/// Producer side of the result queue
#[derive(Debug, Clone)]
pub struct ResultSink {
    tx: Sender<ResultRecord>,
}

impl ResultSink {
    /// Create the sink and its single consumer
    pub fn new() -> (Self, Receiver<ResultRecord>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    /// Dump one record. A closed sink means the kernel already aggregated;
    /// the record is dropped.
    pub fn dump(&self, device: impl Into<String>, channel: impl Into<String>, payload: Value) {
        let record = ResultRecord {
            device: device.into(),
            channel: channel.into(),
            payload,
        };
        if self.tx.send(record).is_err() {
            debug!("Result sink closed, dropping record");
        }
    }
}
