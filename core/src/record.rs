//! Training-sample records and their wire envelopes (spec §4.K, supplemented
//! per the design notes), grounded on `elfgames/tutorial_distri/record.h`.

use std::fs;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};

use crate::error::Result;

/// One training sample: a flattened observation, the action taken, and the
/// outcome assigned to it in hindsight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub state: Vec<f32>,
    pub action: i32,
    pub value: f32,
    pub reward: f32,
}

/// A batch of records shipped from one writer thread to the loader, tagged
/// with a per-thread sequence number so the loader (and `GuardedRecords`)
/// can detect gaps or duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgRequest {
    pub thread_id: u64,
    pub seq: u64,
    pub records: Vec<Record>,
}

/// The loader's acknowledgement of a `MsgRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsgResult {
    pub thread_id: u64,
    pub seq: u64,
    pub accepted: usize,
}

/// Per-writer-thread bookkeeping tracked by `GuardedRecords` (see
/// `writer.rs`) for liveness/debugging, not for replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: u64,
    pub last_seq: u64,
    pub total_sent: u64,
}

/// A plain collection of records with JSON (de)serialization and optional
/// file dump/load helpers, for offline inspection of a training run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Records {
    pub records: Vec<Record>,
}

impl Records {
    pub fn new() -> Records {
        Records::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Records> {
        Ok(serde_json::from_str(s)?)
    }

    /// Write this collection to `path` as JSON. Not used on any hot path -
    /// a debugging aid for inspecting a run's training data after the
    /// fact.
    pub fn dump_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Records> {
        let contents = fs::read_to_string(path)?;
        Records::from_json(&contents)
    }
}
