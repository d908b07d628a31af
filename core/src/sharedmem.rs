//! The shared batch-memory slot and its state machine (spec §4.E), grounded
//! on `elf/base/sharedmem.h`.
//!
//! Each [`SharedMem`] is one slot of a [`crate::collector::CollectorContext`]'s
//! batch: a named set of raw byte buffers (one per extractor field, sized
//! `elem_size * batchsize`) plus a state machine that enforces the
//! producer/consumer handoff: `Idle -> Registered -> Filling -> Filled ->
//! Replying -> Registered`. Any call out of turn is a protocol violation and
//! panics rather than returning an error, per the design notes' error
//! taxonomy.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};

use crate::extractor::AnyP;
use crate::node::WaitOptions;

/// Which side is responsible for filling this slot on a given pass: the
/// server (producing observations for the batch) or the client (writing
/// actions/results back).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferType {
    Server,
    Client,
}

/// Per-slot configuration, assigned once at `allocate_shared_mem` time and
/// immutable for the life of the slot (spec §3 `SharedMemOptions`). `idx` is
/// a global monotonic slot counter and `label_idx` a per-label one; both are
/// filled in by `CollectorContext`, not by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedMemOptions {
    pub idx: usize,
    pub label_idx: usize,
    pub label: String,
    pub transfer_type: TransferType,
    pub batchsize: usize,
    pub min_batchsize: usize,
    pub timeout_usec: i64,
}

impl SharedMemOptions {
    /// The `WaitOptions` this slot's `waitBatch` call gathers against,
    /// derived from the fields above rather than passed in separately.
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions { batchsize: self.batchsize, min_batchsize: self.min_batchsize, timeout_usec: self.timeout_usec }
    }
}

/// The raw per-field byte buffers backing one batch slot.
pub struct SharedMemData {
    batchsize: usize,
    buffers: HashMap<String, (Vec<u8>, usize)>,
}

impl SharedMemData {
    fn new(batchsize: usize) -> SharedMemData {
        SharedMemData { batchsize, buffers: HashMap::new() }
    }

    /// Allocate a zeroed buffer for `name` sized for `elem_size`-byte
    /// elements, one per batch slot. Re-allocating an existing field with a
    /// different `elem_size` is a protocol violation.
    pub fn alloc_field(&mut self, name: impl Into<String>, elem_size: usize) {
        let name = name.into();
        if let Some((_, existing_size)) = self.buffers.get(&name) {
            assert_eq!(*existing_size, elem_size, "sharedmem: field {:?} re-allocated with a different elem_size", name);
            return;
        }
        self.buffers.insert(name, (vec![0u8; elem_size * self.batchsize], elem_size));
    }

    pub fn field(&mut self, name: &str) -> AnyP<'_> {
        let (bytes, elem_size) = self.buffers.get_mut(name).unwrap_or_else(|| panic!("sharedmem: unknown field {:?}", name));
        AnyP::new(bytes, *elem_size)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(|s| s.as_str())
    }

    pub fn batchsize(&self) -> usize {
        self.batchsize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Registered,
    Filling,
    Filled,
    Replying,
}

/// One batch slot: the byte buffers plus the handoff state machine.
pub struct SharedMem {
    pub options: SharedMemOptions,
    state: Mutex<State>,
    pub data: Mutex<SharedMemData>,
}

impl SharedMem {
    pub fn new(options: SharedMemOptions) -> SharedMem {
        let data = Mutex::new(SharedMemData::new(options.batchsize));
        SharedMem { options, state: Mutex::new(State::Idle), data }
    }

    fn transition(&self, from: State, to: State) {
        let mut s = self.state.lock();
        assert_eq!(*s, from, "sharedmem: expected state {:?} to transition to {:?}, found {:?}", from, to, *s);
        *s = to;
    }

    /// `Idle -> Registered`: the slot has had its fields allocated and is
    /// ready to be claimed by a batch session.
    pub fn register(&self) {
        self.transition(State::Idle, State::Registered);
    }

    /// `Registered -> Filling`: a producer has claimed the slot and is
    /// writing into it.
    pub fn begin_filling(&self) {
        self.transition(State::Registered, State::Filling);
    }

    /// `Filling -> Filled`: the producer is done writing.
    pub fn mark_filled(&self) {
        self.transition(State::Filling, State::Filled);
    }

    /// `Filled -> Replying`: a consumer has claimed the filled slot and is
    /// reading (and possibly writing a reply) from it.
    pub fn begin_replying(&self) {
        self.transition(State::Filled, State::Replying);
    }

    /// `Replying -> Registered`: the consumer is done; the slot is free for
    /// the next session.
    pub fn release(&self) {
        self.transition(State::Replying, State::Registered);
    }

    pub fn is_server_fill(&self) -> bool {
        self.options.transfer_type == TransferType::Server
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(batchsize: usize, transfer_type: TransferType) -> SharedMemOptions {
        SharedMemOptions {
            idx: 0,
            label_idx: 0,
            label: "test".into(),
            transfer_type,
            batchsize,
            min_batchsize: batchsize,
            timeout_usec: -1,
        }
    }

    #[test]
    fn full_lifecycle_round_trip() {
        let mem = SharedMem::new(opts(2, TransferType::Server));
        mem.data.lock().alloc_field("obs", std::mem::size_of::<f32>());

        mem.register();
        mem.begin_filling();
        mem.data.lock().field("obs").write(0, 1.0f32);
        mem.mark_filled();
        mem.begin_replying();
        let val: f32 = mem.data.lock().field("obs").read(0);
        assert_eq!(val, 1.0);
        mem.release();

        // slot is reusable
        mem.register();
        mem.begin_filling();
        mem.mark_filled();
        mem.begin_replying();
        mem.release();
    }

    #[test]
    #[should_panic(expected = "expected state Registered")]
    fn out_of_turn_transition_panics() {
        let mem = SharedMem::new(opts(1, TransferType::Client));
        mem.begin_filling();
    }

    #[test]
    fn re_alloc_same_size_is_noop() {
        let mem = SharedMem::new(opts(4, TransferType::Server));
        mem.data.lock().alloc_field("x", 4);
        mem.data.lock().alloc_field("x", 4);
        assert_eq!(mem.data.lock().field_names().count(), 1);
    }

    #[test]
    #[should_panic(expected = "different elem_size")]
    fn re_alloc_different_size_panics() {
        let mem = SharedMem::new(opts(4, TransferType::Server));
        mem.data.lock().alloc_field("x", 4);
        mem.data.lock().alloc_field("x", 8);
    }
}
