//! Broadcast rendezvous primitive (spec §4.B), grounded on
//! `elf/comm/broadcast.h`. A `Node<T>` lets an unbounded number of client
//! threads queue up an "invite" carrying a payload and an item count, while
//! a single server thread gathers invites into a session bounded by total
//! *item* count (not message count), hands each admitted client a `base_idx`
//! equal to the cumulative item count before it, and later releases them
//! once the session's work is done.
//!
//! `batchsize`/`min_batchsize` count data items, matching the original's
//! `sufficient_batch_size()` check on accumulated rows rather than message
//! count: a single invite can itself carry more than one item (see
//! `Comm::send_batch_wait`). When the next invite would push a session over
//! `batchsize`, it is stashed in `unprocessed` instead of being admitted, and
//! surfaces as the first candidate for the following session - so no
//! invite is ever dropped or reordered past another, it just waits one
//! session longer.
//!
//! This is the primitive `Comm`'s server loop (`comm.rs`) and
//! `CollectorContext` (`collector.rs`) build batching on top of.

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// Batch-gathering parameters for [`Node::start_session`]. `batchsize` and
/// `min_batchsize` are item counts, not message counts.
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Stop admitting new invites once this many items are gathered.
    pub batchsize: usize,
    /// Never return fewer than this many items, timeout or not.
    pub min_batchsize: usize,
    /// Once `min_batchsize` is met, wait at most this long (microseconds)
    /// for the session to fill up to `batchsize`. Negative means block
    /// until `batchsize` is reached regardless of `min_batchsize`.
    pub timeout_usec: i64,
}

struct Invite<T> {
    payload: T,
    item_count: usize,
    base_idx_tx: Sender<usize>,
    end_tx: Sender<()>,
}

/// Handed back to a client by [`Node::wait_session_invite`]; blocking on it
/// is [`Node::wait_session_end`].
pub struct SessionEnd {
    rx: Receiver<()>,
}

impl SessionEnd {
    /// Block until the server finishes the session this client was
    /// admitted into.
    pub fn wait(self) {
        let _ = self.rx.recv();
    }
}

/// One client admitted into a session, together with the channels needed to
/// wake it.
pub struct Member<T> {
    pub payload: T,
    /// Cumulative item count admitted into this session before this
    /// member's own items - the offset its items occupy in the batch, not
    /// a per-message sequence number.
    pub base_idx: usize,
    pub item_count: usize,
    base_idx_tx: Sender<usize>,
    end_tx: Sender<()>,
}

/// A gathered batch of admitted clients, not yet notified. The server reads
/// `members` (payload + base_idx), does its work, calls
/// [`Node::notify_session_invite`] to release clients into processing and,
/// once done, [`PendingSession::finish`] to wake their
/// [`Node::wait_session_end`].
pub struct PendingSession<T> {
    pub members: Vec<Member<T>>,
}

impl<T> PendingSession<T> {
    /// Signal every admitted client that the session is over.
    pub fn finish(self) {
        for m in self.members {
            let _ = m.end_tx.send(());
        }
    }
}

/// The rendezvous point itself. Cheap to clone; every clone shares the same
/// invite queue.
#[derive(Clone)]
pub struct Node<T> {
    invites_tx: Sender<Invite<T>>,
    invites_rx: Receiver<Invite<T>>,
    unprocessed: std::sync::Arc<Mutex<Option<Invite<T>>>>,
}

impl<T: Send + 'static> Node<T> {
    pub fn new() -> Node<T> {
        let (invites_tx, invites_rx) = unbounded();
        Node { invites_tx, invites_rx, unprocessed: std::sync::Arc::new(Mutex::new(None)) }
    }

    /// Client side: queue a single-item `payload` and block until admitted
    /// into a session, receiving this session's `base_idx` plus a token to
    /// wait for the session's end.
    pub fn wait_session_invite(&self, payload: T) -> (usize, SessionEnd) {
        self.wait_session_invite_n(payload, 1)
    }

    /// As [`Node::wait_session_invite`], but `payload` counts as
    /// `item_count` items toward `WaitOptions::batchsize`/`min_batchsize`
    /// instead of one.
    pub fn wait_session_invite_n(&self, payload: T, item_count: usize) -> (usize, SessionEnd) {
        assert!(item_count > 0, "wait_session_invite_n: item_count must be positive");
        let (base_idx_tx, base_idx_rx) = bounded(1);
        let (end_tx, end_rx) = bounded(1);
        self.invites_tx
            .send(Invite { payload, item_count, base_idx_tx, end_tx })
            .expect("wait_session_invite_n: node has no live server side");
        let base_idx = base_idx_rx.recv().expect("wait_session_invite_n: session dropped before notify");
        (base_idx, SessionEnd { rx: end_rx })
    }

    /// Server side: gather invites per `opts` until the cumulative item
    /// count reaches `opts.batchsize` (or `min_batchsize` is met and the
    /// timeout elapses), assigning each admitted member a `base_idx` equal
    /// to the item count admitted before it. An invite that would push the
    /// running total over `batchsize` is stashed for the next session
    /// instead of being admitted, unless it is the only candidate so far
    /// (a lone invite larger than `batchsize` still forms its own session -
    /// splitting one message's items across two sessions isn't possible).
    pub fn start_session(&self, opts: &WaitOptions) -> PendingSession<T> {
        let deadline =
            if opts.timeout_usec < 0 { None } else { Some(Instant::now() + Duration::from_micros(opts.timeout_usec as u64)) };

        let mut members: Vec<Member<T>> = Vec::new();
        let mut total = 0usize;

        if let Some(inv) = self.unprocessed.lock().take() {
            let item_count = inv.item_count;
            members.push(Member { base_idx: total, item_count, payload: inv.payload, base_idx_tx: inv.base_idx_tx, end_tx: inv.end_tx });
            total += item_count;
        }

        while total < opts.batchsize {
            let next = if total < opts.min_batchsize {
                self.invites_rx.recv().ok()
            } else {
                match deadline {
                    None => None,
                    Some(dl) => {
                        let now = Instant::now();
                        if now >= dl {
                            None
                        } else {
                            self.invites_rx.recv_timeout(dl - now).ok()
                        }
                    }
                }
            };

            let inv = match next {
                Some(inv) => inv,
                None => break,
            };

            if !members.is_empty() && total + inv.item_count > opts.batchsize {
                *self.unprocessed.lock() = Some(inv);
                break;
            }

            let base_idx = total;
            total += inv.item_count;
            members.push(Member { payload: inv.payload, base_idx, item_count: inv.item_count, base_idx_tx: inv.base_idx_tx, end_tx: inv.end_tx });
        }

        PendingSession { members }
    }

    /// Server side: wake every admitted client's `wait_session_invite` with
    /// its assigned `base_idx`.
    pub fn notify_session_invite(&self, pending: &PendingSession<T>) {
        for m in &pending.members {
            let _ = m.base_idx_tx.send(m.base_idx);
        }
    }
}
