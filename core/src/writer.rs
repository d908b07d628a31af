//! The writer-client / loader-server record plane (spec §4.K, supplemented),
//! grounded on `elf/distri/client.h` (writer side) and
//! `elf/distributed/data_loader.h` (loader side). Game threads batch up
//! [`crate::record::Record`]s and ship them to a loader process over a
//! [`crate::remote::RemoteSender`]/[`crate::remote::RemoteReceiver`] pair.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use slog::Logger;

use crate::error::Result;
use crate::record::{MsgRequest, MsgResult, Records, ThreadState};
use crate::remote::{IncomingRequest, RemoteReceiver, RemoteSender};

const GUARDED_WINDOW: usize = 100;

/// A rolling window of the last 100 distinct writer threads' state, kept
/// for liveness/debugging rather than correctness - nothing in the replay
/// path reads from it.
pub struct GuardedRecords {
    window: Mutex<VecDeque<ThreadState>>,
}

impl GuardedRecords {
    pub fn new() -> GuardedRecords {
        GuardedRecords { window: Mutex::new(VecDeque::new()) }
    }

    pub fn update(&self, state: ThreadState) {
        let mut window = self.window.lock();
        if let Some(existing) = window.iter_mut().find(|s| s.thread_id == state.thread_id) {
            *existing = state;
            return;
        }
        window.push_back(state);
        if window.len() > GUARDED_WINDOW {
            window.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<ThreadState> {
        self.window.lock().iter().cloned().collect()
    }
}

impl Default for GuardedRecords {
    fn default() -> Self {
        GuardedRecords::new()
    }
}

/// One game thread's connection to the record loader. Batches of records
/// are sent via [`WriterClient::on_send`]; a background thread started by
/// [`WriterClient::spawn_heartbeat`] logs a liveness line every second
/// (`on_timer`) so a stalled writer shows up in the logs rather than just
/// going quiet.
pub struct WriterClient {
    sender: RemoteSender,
    thread_id: u64,
    seq: AtomicU64,
    guarded: Arc<GuardedRecords>,
    logger: Logger,
}

impl WriterClient {
    pub fn new(sender: RemoteSender, thread_id: u64, guarded: Arc<GuardedRecords>, logger: Logger) -> WriterClient {
        WriterClient { sender, thread_id, seq: AtomicU64::new(0), guarded, logger }
    }

    /// Send `records` to the loader and block for its acknowledgement.
    pub fn on_send(&self, records: Records) -> Result<MsgResult> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let count = records.len();
        let req = MsgRequest { thread_id: self.thread_id, seq, records: records.records };
        let payload = serde_json::to_vec(&req)?;

        let reply_bytes = self.sender.send_wait(serde_json::json!({"kind": "records"}), &payload, count)?;
        let result: MsgResult = serde_json::from_slice(&reply_bytes)?;
        self.on_recv(&result);
        Ok(result)
    }

    fn on_recv(&self, result: &MsgResult) {
        self.guarded.update(ThreadState { thread_id: self.thread_id, last_seq: result.seq, total_sent: result.accepted as u64 });
        slog::debug!(self.logger, "writer received ack"; "thread_id" => self.thread_id, "seq" => result.seq, "accepted" => result.accepted);
    }

    fn on_timer(&self) {
        slog::info!(self.logger, "writer heartbeat"; "thread_id" => self.thread_id, "last_seq" => self.seq.load(Ordering::Relaxed));
    }

    /// Spawn the 1-second heartbeat thread. The returned handle is
    /// detached by the caller dropping it; there is no clean shutdown
    /// signal since a writer thread's lifetime is the process's.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let this = self.clone();
        thread::spawn(move || loop {
            thread::sleep(Duration::from_secs(1));
            this.on_timer();
        })
    }
}

/// Running counters for the loader side, surfaced for logging.
#[derive(Default)]
pub struct Stats {
    pub requests: AtomicU64,
    pub records: AtomicU64,
}

/// The loader server: drains incoming [`MsgRequest`]s from a
/// [`RemoteReceiver`] and feeds each record to a caller-supplied sink
/// (typically `ReplayBuffer::push`).
pub struct DataOnlineLoader {
    receiver: RemoteReceiver,
    pub stats: Arc<Stats>,
    logger: Logger,
}

impl DataOnlineLoader {
    pub fn new(receiver: RemoteReceiver, logger: Logger) -> DataOnlineLoader {
        DataOnlineLoader { receiver, stats: Arc::new(Stats::default()), logger }
    }

    /// Block for the next batch of records, feed each to `sink`, and reply
    /// with an acknowledgement. Returns `false` once the receiver's
    /// connections are all gone (signals the caller's loop to stop).
    pub fn on_receive(&self, mut sink: impl FnMut(crate::record::Record)) -> bool {
        let req = match self.receiver.recv() {
            Some(r) => r,
            None => return false,
        };

        let msg: MsgRequest = match serde_json::from_slice(&req.mem) {
            Ok(m) => m,
            Err(e) => {
                slog::warn!(self.logger, "loader dropped malformed request"; "error" => e.to_string());
                return true;
            }
        };

        let count = msg.records.len();
        for record in msg.records.iter().cloned() {
            sink(record);
        }
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        self.stats.records.fetch_add(count as u64, Ordering::Relaxed);

        self.on_reply(req, msg.thread_id, msg.seq, count);
        true
    }

    fn on_reply(&self, req: IncomingRequest, thread_id: u64, seq: u64, accepted: usize) {
        let result = MsgResult { thread_id, seq, accepted };
        match serde_json::to_vec(&result) {
            Ok(bytes) => {
                if let Err(e) = req.reply(&bytes) {
                    slog::warn!(self.logger, "loader failed to ack request"; "error" => e.to_string());
                }
            }
            Err(e) => slog::warn!(self.logger, "loader failed to encode ack"; "error" => e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::test_logger;
    use crate::record::Record;
    use std::thread;

    #[test]
    fn write_and_load_round_trip() {
        let receiver = RemoteReceiver::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr();
        let loader = DataOnlineLoader::new(receiver, test_logger());

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let server = thread::spawn(move || {
            loader.on_receive(|record| received_clone.lock().push(record));
        });

        let sender = RemoteSender::connect(addr).unwrap();
        let guarded = Arc::new(GuardedRecords::new());
        let writer = WriterClient::new(sender, 7, guarded.clone(), test_logger());

        let mut records = Records::new();
        records.push(Record { state: vec![1.0], action: 0, value: 0.0, reward: 1.0 });
        let result = writer.on_send(records).unwrap();

        assert_eq!(result.thread_id, 7);
        assert_eq!(result.accepted, 1);
        assert_eq!(received.lock().len(), 1);
        assert_eq!(guarded.snapshot().len(), 1);

        server.join().unwrap();
    }

    #[test]
    fn guarded_records_caps_window_at_100() {
        let guarded = GuardedRecords::new();
        for i in 0..150u64 {
            guarded.update(ThreadState { thread_id: i, last_seq: 0, total_sent: 0 });
        }
        assert_eq!(guarded.snapshot().len(), 100);
    }
}
