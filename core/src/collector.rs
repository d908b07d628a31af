//! Batch collection across SharedMem slots (spec §4.F), grounded on the
//! `CollectorContext` half of `elf/base/sharedmem.h`.
//!
//! A [`CollectorContext<S>`] owns one [`Extractor<S>`] and hands out
//! [`BatchContext<S>`] slots, each backed by its own [`SharedMem`] and its
//! own [`ServerSlot`] on a shared [`Comm`]. Game threads call
//! [`Comm::send_wait`] against the collector's label; exactly one consumer
//! thread per slot drives it via [`BatchContext::wait`] /
//! [`BatchHandle::step`] (see `batch.rs` for the single-waiter contract).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::comm::{Comm, ReplyStatus, ServerSlot};
use crate::extractor::Extractor;
use crate::sharedmem::{SharedMem, SharedMemOptions, TransferType};

pub struct CollectorContext<S> {
    extractor: Arc<Extractor<S>>,
    comm: Arc<Comm<S, S>>,
    next_idx: AtomicUsize,
    label_counts: Mutex<HashMap<String, usize>>,
}

impl<S> CollectorContext<S>
where
    S: Send + Clone + 'static,
{
    pub fn new(extractor: Extractor<S>) -> CollectorContext<S> {
        CollectorContext {
            extractor: Arc::new(extractor),
            comm: Arc::new(Comm::new()),
            next_idx: AtomicUsize::new(0),
            label_counts: Mutex::new(HashMap::new()),
        }
    }

    /// The shared comm endpoint game threads submit state against via
    /// `comm().send_wait(label, state)`.
    pub fn comm(&self) -> Arc<Comm<S, S>> {
        self.comm.clone()
    }

    /// Allocate one batch slot under `label`: a `SharedMem` sized for every
    /// field the extractor knows about, registered as a server on the
    /// shared comm endpoint. `idx` (global) and `label_idx` (per-label) are
    /// assigned here, monotonically, per spec §4.F - the caller only
    /// supplies the batching parameters.
    pub fn allocate_shared_mem(
        &self,
        label: impl Into<String>,
        transfer_type: TransferType,
        batchsize: usize,
        min_batchsize: usize,
        timeout_usec: i64,
    ) -> BatchContext<S> {
        let label = label.into();
        let idx = self.next_idx.fetch_add(1, Ordering::Relaxed);
        let label_idx = {
            let mut counts = self.label_counts.lock();
            let entry = counts.entry(label.clone()).or_insert(0);
            let label_idx = *entry;
            *entry += 1;
            label_idx
        };

        let slot = self.comm.reg_server(label.clone());
        let options = SharedMemOptions { idx, label_idx, label, transfer_type, batchsize, min_batchsize, timeout_usec };
        let shared_mem = SharedMem::new(options);
        {
            let mut data = shared_mem.data.lock();
            for name in self.extractor.field_names() {
                data.alloc_field(name.to_string(), self.extractor.elem_size(name));
            }
        }
        shared_mem.register();

        BatchContext {
            comm: self.comm.clone(),
            slot,
            extractor: self.extractor.clone(),
            shared_mem: Arc::new(shared_mem),
            guard: Mutex::new(()),
        }
    }
}

/// One collector slot: a single-waiter consumer loop gathers a batch,
/// exposes the filled `SharedMem` for the caller's own computation, then
/// replies and releases it. See `batch.rs` for the public `wait`/`step`
/// surface built on top of this.
pub struct BatchContext<S> {
    pub(crate) comm: Arc<Comm<S, S>>,
    pub(crate) slot: ServerSlot<S, S>,
    pub(crate) extractor: Arc<Extractor<S>>,
    pub(crate) shared_mem: Arc<SharedMem>,
    pub(crate) guard: Mutex<()>,
}

impl<S> BatchContext<S>
where
    S: Send + Clone + 'static,
{
    pub fn shared_mem(&self) -> &SharedMem {
        &self.shared_mem
    }

    pub(crate) fn gather_and_fill(&self) -> crate::comm::Batch<S, S> {
        let opts = self.shared_mem.options.wait_options();
        let batch = self.comm.wait_batch(&self.slot, &opts);
        self.shared_mem.begin_filling();
        {
            let mut data = self.shared_mem.data.lock();
            for (idx, state) in batch.jobs() {
                for name in self.extractor.field_names() {
                    let mut anyp = data.field(name);
                    self.extractor.extract(name, state, &mut anyp, idx);
                }
            }
        }
        self.shared_mem.mark_filled();
        batch
    }

    pub(crate) fn reply_and_release(&self, batch: crate::comm::Batch<S, S>) {
        self.shared_mem.begin_replying();
        let extractor = self.extractor.clone();
        let shared_mem = self.shared_mem.clone();
        self.comm.send_closures_wait_done(batch, move |idx, state| {
            let mut reply = state.clone();
            let mut data = shared_mem.data.lock();
            for name in extractor.field_names() {
                let anyp = data.field(name);
                extractor.fill(name, &anyp, idx, &mut reply);
            }
            (ReplyStatus::DoneOneJob, reply)
        });
        self.shared_mem.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharedmem::TransferType;
    use std::thread;

    #[derive(Clone)]
    struct Toy {
        val: i32,
        action: i32,
    }

    #[test]
    fn allocate_shared_mem_sizes_every_field() {
        let mut extractor: Extractor<Toy> = Extractor::new();
        extractor.add_field("val", |t: &Toy| t.val, |t: &mut Toy, v| t.val = v);
        extractor.add_field("action", |t: &Toy| t.action, |t: &mut Toy, v| t.action = v);

        let ctx: CollectorContext<Toy> = CollectorContext::new(extractor);
        let batch_ctx = ctx.allocate_shared_mem("toy", TransferType::Server, 4, 4, -1);

        let data = batch_ctx.shared_mem.data.lock();
        let mut names: Vec<&str> = data.field_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["action", "val"]);
        assert_eq!(data.batchsize(), 4);
        assert_eq!(batch_ctx.shared_mem.options.idx, 0);
        assert_eq!(batch_ctx.shared_mem.options.label_idx, 0);
    }

    #[test]
    fn label_idx_counts_per_label_idx_global() {
        let extractor: Extractor<Toy> = Extractor::new();
        let ctx: CollectorContext<Toy> = CollectorContext::new(extractor);

        let a0 = ctx.allocate_shared_mem("a", TransferType::Server, 1, 1, -1);
        let b0 = ctx.allocate_shared_mem("b", TransferType::Server, 1, 1, -1);
        let a1 = ctx.allocate_shared_mem("a", TransferType::Server, 1, 1, -1);

        assert_eq!((a0.shared_mem.options.idx, a0.shared_mem.options.label_idx), (0, 0));
        assert_eq!((b0.shared_mem.options.idx, b0.shared_mem.options.label_idx), (1, 0));
        assert_eq!((a1.shared_mem.options.idx, a1.shared_mem.options.label_idx), (2, 1));
    }

    #[test]
    fn end_to_end_double_the_value() {
        let mut extractor: Extractor<Toy> = Extractor::new();
        extractor.add_field("val", |t: &Toy| t.val, |t: &mut Toy, v| t.val = v);
        extractor.add_field("action", |t: &Toy| t.action, |t: &mut Toy, v| t.action = v);

        let ctx: CollectorContext<Toy> = CollectorContext::new(extractor);
        let batch_ctx = Arc::new(ctx.allocate_shared_mem("toy", TransferType::Server, 2, 2, -1));
        let comm = ctx.comm();

        let trainer_ctx = batch_ctx.clone();
        let trainer = thread::spawn(move || {
            let batch = trainer_ctx.gather_and_fill();
            {
                let mut data = trainer_ctx.shared_mem.data.lock();
                let n = data.batchsize();
                for i in 0..n {
                    let val: i32 = data.field("val").read(i);
                    data.field("action").write(i, val * 2);
                }
            }
            trainer_ctx.reply_and_release(batch);
        });

        let clients: Vec<_> = (0..2)
            .map(|i| {
                let c = comm.clone();
                thread::spawn(move || c.send_wait("toy", Toy { val: i, action: 0 }))
            })
            .collect();

        let results: Vec<i32> = clients.into_iter().map(|h| h.join().unwrap().action).collect();
        trainer.join().unwrap();

        let mut sorted = results;
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 2]);
    }
}
