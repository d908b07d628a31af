//! Remote batching extension (spec §4.I), grounded on
//! `elf/base/remote_common.h`, `remote_sender.h` and `remote_receiver.h`:
//! a TCP stand-in for the local [`crate::batch::BatchContext`] consumer,
//! for when the batch consumer lives on a different machine from the game
//! threads.
//!
//! The original is built on `mio`'s non-blocking reactor. Per the design
//! notes' redesign flag, this crate uses blocking `std::net` with one OS
//! thread per connection instead, to match the rest of the crate's
//! thread-per-role concurrency model; framing is length-prefixed JSON (see
//! `frame.rs`) rather than a custom binary tensor protocol.

pub mod frame;
pub mod receiver;
pub mod sender;

pub use receiver::{IncomingRequest, RemoteReceiver};
pub use sender::RemoteSender;

use std::sync::atomic::{AtomicU64, Ordering};

use serde_derive::{Deserialize, Serialize};

/// Reserved for future multi-channel expansion, mirroring the original's
/// `kPortPerClient`; this implementation multiplexes control and data over
/// a single connection, so both constants are currently `1`.
pub const PORTS_PER_CLIENT: usize = 1;
pub const PORTS_PER_SERVER: usize = 1;

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct ControlHello;

#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct ControlAck {
    pub valid: bool,
    pub signature: u64,
    pub port: Vec<u16>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct RequestFrame {
    pub signature: u64,
    pub opts: serde_json::Value,
    pub mem: String,
    pub batchsize: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct ReplyFrame {
    pub signature: u64,
    pub mem: String,
}

/// Running counters for one remote endpoint, surfaced for logging/metrics
/// (see `writer.rs`'s periodic summaries for the consumer side).
#[derive(Default)]
pub struct RemoteStats {
    pub frames_sent: AtomicU64,
    pub frames_recv: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_recv: AtomicU64,
}

impl RemoteStats {
    pub fn new() -> RemoteStats {
        RemoteStats::default()
    }

    pub fn record_send(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_recv(&self, bytes: usize) {
        self.frames_recv.fetch_add(1, Ordering::Relaxed);
        self.bytes_recv.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}
