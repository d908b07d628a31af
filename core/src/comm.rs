//! Client/server request-reply comm layer (spec §4.C), grounded on
//! `elf/comm/comm.h`, built directly on top of [`crate::node::Node`].
//!
//! Servers register under a string label via [`Comm::reg_server`]; any
//! number of servers may share a label, in which case a client's
//! [`Comm::send_wait`] picks one at random (label-based routing, same as
//! the original's per-label `SendQ` fan-out).
//!
//! Each message on the wire carries a `Vec<Req>`, not a lone `Req`: a
//! single-item [`Comm::send_wait`] is the `datas.len() == 1` case of the
//! same envelope [`Comm::send_batch_wait`] uses to submit several items in
//! one round trip. `Batch::len`/`Batch::jobs` count and index by item, per
//! [`crate::node::Node`]'s item-counted `base_idx`.

use std::sync::Arc;

use crossbeam_channel::{bounded, Sender};
use hashbrown::HashMap;
use parking_lot::RwLock;
use rand::Rng;

use crate::node::{Node, PendingSession, WaitOptions};

/// Outcome of a single job within a batch, reported by the server's reply
/// closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// This job is complete; the client may proceed.
    DoneOneJob,
    /// The whole batch the job belonged to succeeded.
    Success,
    /// The whole batch the job belonged to failed.
    Failed,
    /// No status was recorded (default for replies that don't report one).
    Unknown,
}

type Envelope<Req, Reply> = (Vec<Req>, Sender<(ReplyStatus, Vec<Reply>)>);

struct CommInner<Req, Reply> {
    servers: RwLock<HashMap<String, Vec<Arc<Node<Envelope<Req, Reply>>>>>>,
}

/// A registered server endpoint. Returned by [`Comm::reg_server`] and passed
/// to [`Comm::wait_batch`].
pub struct ServerSlot<Req, Reply> {
    pub label: String,
    node: Arc<Node<Envelope<Req, Reply>>>,
}

/// A gathered batch of client jobs, already notified of their `base_idx`.
/// Consume it with [`Comm::send_closures_wait_done`] or
/// [`Comm::release_batch`].
pub struct Batch<Req, Reply> {
    pending: PendingSession<Envelope<Req, Reply>>,
}

impl<Req, Reply> Batch<Req, Reply> {
    /// Total item count across every message in this batch (a message from
    /// `send_batch_wait` can itself carry more than one item).
    pub fn len(&self) -> usize {
        self.pending.members.iter().map(|m| m.payload.0.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.members.is_empty()
    }

    /// Iterate `(base_idx, request)` pairs for every item in this batch,
    /// flattening each message's `Vec<Req>` in order.
    pub fn jobs(&self) -> impl Iterator<Item = (usize, &Req)> {
        self.pending.members.iter().flat_map(|m| m.payload.0.iter().enumerate().map(move |(i, req)| (m.base_idx + i, req)))
    }
}

/// The client/server comm endpoint. Cheap to clone; every clone shares the
/// same server registry.
pub struct Comm<Req, Reply> {
    inner: Arc<CommInner<Req, Reply>>,
}

impl<Req, Reply> Clone for Comm<Req, Reply> {
    fn clone(&self) -> Self {
        Comm { inner: self.inner.clone() }
    }
}

impl<Req, Reply> Comm<Req, Reply>
where
    Req: Send + 'static,
    Reply: Send + 'static,
{
    pub fn new() -> Comm<Req, Reply> {
        Comm { inner: Arc::new(CommInner { servers: RwLock::new(HashMap::new()) }) }
    }

    /// Register a new server under `label`. Multiple servers may share a
    /// label; clients sending to that label are routed to one at random.
    pub fn reg_server(&self, label: impl Into<String>) -> ServerSlot<Req, Reply> {
        let label = label.into();
        let node = Arc::new(Node::new());
        self.inner.servers.write().entry(label.clone()).or_insert_with(Vec::new).push(node.clone());
        ServerSlot { label, node }
    }

    fn pick_server(&self, label: &str) -> Option<Arc<Node<Envelope<Req, Reply>>>> {
        let servers = self.inner.servers.read();
        let candidates = servers.get(label)?;
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx].clone())
    }

    /// Send `req` to a server registered under `label`, picked at random if
    /// more than one is registered, and block for the reply. Panics if no
    /// server is registered under `label`.
    pub fn send_wait(&self, label: &str, req: Req) -> Reply {
        self.send_wait_status(label, req).1
    }

    /// As [`Comm::send_wait`] but also returns the server's reported
    /// [`ReplyStatus`].
    pub fn send_wait_status(&self, label: &str, req: Req) -> (ReplyStatus, Reply) {
        let node = self.pick_server(label).unwrap_or_else(|| panic!("send_wait: no server registered under label {:?}", label));
        let (reply_tx, reply_rx) = bounded(1);
        let (_base_idx, end) = node.wait_session_invite((vec![req], reply_tx));
        let (status, mut replies) = reply_rx.recv().expect("send_wait: server dropped batch without replying");
        end.wait();
        let reply = replies.pop().expect("send_wait: server replied with no items for a single-item request");
        (status, reply)
    }

    /// Send every item in `datas` to a server registered under `label`, as
    /// a single message counting `datas.len()` items toward that server's
    /// `WaitOptions::batchsize`, and block for one combined reply covering
    /// all of them. Panics if no server is registered under `label`, or if
    /// `datas` is empty.
    pub fn send_batch_wait(&self, label: &str, datas: Vec<Req>) -> (ReplyStatus, Vec<Reply>) {
        assert!(!datas.is_empty(), "send_batch_wait: datas must not be empty");
        let node = self.pick_server(label).unwrap_or_else(|| panic!("send_batch_wait: no server registered under label {:?}", label));
        let item_count = datas.len();
        let (reply_tx, reply_rx) = bounded(1);
        let (_base_idx, end) = node.wait_session_invite_n((datas, reply_tx), item_count);
        let result = reply_rx.recv().expect("send_batch_wait: server dropped batch without replying");
        end.wait();
        result
    }

    /// Send `req` (cloned per destination) to every label in `labels`
    /// concurrently and collect all replies. Unlike [`Comm::send_batch_wait`]
    /// this fans one item out to several independent servers rather than
    /// submitting several items to one.
    pub fn fan_out_wait(&self, labels: &[String], req: Req) -> Vec<(String, ReplyStatus, Reply)>
    where
        Req: Clone,
    {
        std::thread::scope(|scope| {
            let handles: Vec<_> = labels
                .iter()
                .map(|label| {
                    let req = req.clone();
                    scope.spawn(move || {
                        let (status, reply) = self.send_wait_status(label, req);
                        (label.clone(), status, reply)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("fan_out_wait: worker thread panicked")).collect()
        })
    }

    /// Server side: gather a batch of jobs for `slot` per `opts`, admitting
    /// clients into the session (they remain blocked until a reply is
    /// sent).
    pub fn wait_batch(&self, slot: &ServerSlot<Req, Reply>, opts: &WaitOptions) -> Batch<Req, Reply> {
        let pending = slot.node.start_session(opts);
        slot.node.notify_session_invite(&pending);
        Batch { pending }
    }

    /// Compute and send a reply for every job in `batch` via `f`, then
    /// release the batch. `f` is called once per item (not once per
    /// message); a message carrying several items (from `send_batch_wait`)
    /// gets back a `Vec<Reply>` in the same order, with the message's
    /// overall `ReplyStatus` taken from its last item's call to `f`.
    pub fn send_closures_wait_done(&self, batch: Batch<Req, Reply>, mut f: impl FnMut(usize, &Req) -> (ReplyStatus, Reply)) {
        for m in &batch.pending.members {
            let mut status = ReplyStatus::Unknown;
            let mut replies = Vec::with_capacity(m.payload.0.len());
            for (i, req) in m.payload.0.iter().enumerate() {
                let (s, reply) = f(m.base_idx + i, req);
                status = s;
                replies.push(reply);
            }
            let _ = m.payload.1.send((status, replies));
        }
        self.release_batch(batch);
    }

    /// Release a batch without sending replies (e.g. the server is
    /// shutting down). Clients blocked in `send_wait` will observe a
    /// disconnected channel.
    pub fn release_batch(&self, batch: Batch<Req, Reply>) {
        batch.pending.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_server_round_trip() {
        let comm: Comm<i32, i32> = Comm::new();
        let slot = comm.reg_server("echo");

        let server_comm = comm.clone();
        let server = thread::spawn(move || {
            let batch = server_comm.wait_batch(&slot, &WaitOptions { batchsize: 1, min_batchsize: 1, timeout_usec: -1 });
            server_comm.send_closures_wait_done(batch, |_idx, req| (ReplyStatus::DoneOneJob, req * 2));
        });

        let (status, reply) = comm.send_wait_status("echo", 21);
        assert_eq!(status, ReplyStatus::DoneOneJob);
        assert_eq!(reply, 42);

        server.join().unwrap();
    }

    #[test]
    fn batch_gathers_multiple_clients() {
        let comm: Comm<i32, i32> = Comm::new();
        let slot = comm.reg_server("sum-batch");

        let server_comm = comm.clone();
        let server = thread::spawn(move || {
            let batch =
                server_comm.wait_batch(&slot, &WaitOptions { batchsize: 3, min_batchsize: 3, timeout_usec: -1 });
            assert_eq!(batch.len(), 3);
            server_comm.send_closures_wait_done(batch, |_idx, req| (ReplyStatus::DoneOneJob, req + 100));
        });

        let clients: Vec<_> = (0..3)
            .map(|i| {
                let c = comm.clone();
                thread::spawn(move || c.send_wait("sum-batch", i))
            })
            .collect();

        let mut results: Vec<i32> = clients.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![100, 101, 102]);

        server.join().unwrap();
    }

    #[test]
    fn random_routing_among_same_label_servers() {
        let comm: Comm<i32, &'static str> = Comm::new();
        let slot_a = comm.reg_server("pool");
        let slot_b = comm.reg_server("pool");

        let ca = comm.clone();
        let server_a = thread::spawn(move || {
            let batch = ca.wait_batch(&slot_a, &WaitOptions { batchsize: 1, min_batchsize: 1, timeout_usec: 200_000 });
            if !batch.is_empty() {
                ca.send_closures_wait_done(batch, |_idx, _req| (ReplyStatus::DoneOneJob, "a"));
            }
        });
        let cb = comm.clone();
        let server_b = thread::spawn(move || {
            let batch = cb.wait_batch(&slot_b, &WaitOptions { batchsize: 1, min_batchsize: 1, timeout_usec: 200_000 });
            if !batch.is_empty() {
                cb.send_closures_wait_done(batch, |_idx, _req| (ReplyStatus::DoneOneJob, "b"));
            }
        });

        thread::sleep(Duration::from_millis(10));
        let reply = comm.send_wait("pool", 1);
        assert!(reply == "a" || reply == "b");

        server_a.join().unwrap();
        server_b.join().unwrap();
    }

    #[test]
    fn send_batch_wait_submits_one_message_worth_many_items() {
        let comm: Comm<i32, i32> = Comm::new();
        let slot = comm.reg_server("double");

        let server_comm = comm.clone();
        let server = thread::spawn(move || {
            // batchsize=3 items; the one message below supplies all 3, so
            // this session gathers from a single client.
            let batch = server_comm.wait_batch(&slot, &WaitOptions { batchsize: 3, min_batchsize: 3, timeout_usec: -1 });
            assert_eq!(batch.len(), 3);
            server_comm.send_closures_wait_done(batch, |_idx, req| (ReplyStatus::DoneOneJob, req * 2));
        });

        let (status, replies) = comm.send_batch_wait("double", vec![1, 2, 3]);
        assert_eq!(status, ReplyStatus::DoneOneJob);
        assert_eq!(replies, vec![2, 4, 6]);

        server.join().unwrap();
    }

    #[test]
    fn batch_mixes_single_item_and_multi_item_messages() {
        let comm: Comm<i32, i32> = Comm::new();
        let slot = comm.reg_server("mixed");

        let server_comm = comm.clone();
        let server = thread::spawn(move || {
            let batch = server_comm.wait_batch(&slot, &WaitOptions { batchsize: 4, min_batchsize: 4, timeout_usec: -1 });
            assert_eq!(batch.len(), 4);
            let mut idxs: Vec<usize> = batch.jobs().map(|(idx, _)| idx).collect();
            idxs.sort_unstable();
            assert_eq!(idxs, vec![0, 1, 2, 3]);
            server_comm.send_closures_wait_done(batch, |_idx, req| (ReplyStatus::DoneOneJob, req + 100));
        });

        let c = comm.clone();
        let single = thread::spawn(move || c.send_wait("mixed", 1));
        let c = comm.clone();
        let triple = thread::spawn(move || c.send_batch_wait("mixed", vec![2, 3, 4]));

        let single_reply = single.join().unwrap();
        let (status, triple_replies) = triple.join().unwrap();

        assert_eq!(single_reply, 101);
        assert_eq!(status, ReplyStatus::DoneOneJob);
        assert_eq!(triple_replies, vec![102, 103, 104]);

        server.join().unwrap();
    }
}
