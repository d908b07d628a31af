//! The single-waiter consumer surface for a [`BatchContext`] (spec §4.G).
//!
//! Only one thread may have a live [`BatchHandle`] for a given
//! `BatchContext` at a time; a second `wait()` call blocks until the first
//! handle is consumed by [`BatchHandle::step`] (or dropped).

use parking_lot::MutexGuard;

pub use crate::collector::BatchContext;
use crate::comm::Batch as CommBatch;
use crate::sharedmem::SharedMem;

pub struct BatchHandle<'a, S> {
    ctx: &'a BatchContext<S>,
    batch: CommBatch<S, S>,
    _guard: MutexGuard<'a, ()>,
}

impl<S> BatchContext<S>
where
    S: Send + Clone + 'static,
{
    /// Gather a batch per this slot's own `SharedMemOptions` (batchsize,
    /// min_batchsize, timeout_usec), filling the backing `SharedMem` from
    /// each admitted client's state. Blocks the caller until the batch is
    /// ready.
    pub fn wait(&self) -> BatchHandle<'_, S> {
        let guard = self.guard.lock();
        let batch = self.gather_and_fill();
        BatchHandle { ctx: self, batch, _guard: guard }
    }
}

impl<'a, S> BatchHandle<'a, S>
where
    S: Send + Clone + 'static,
{
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// The batch's backing memory, ready for the caller's own computation
    /// (e.g. running a model over the filled observation fields and
    /// writing the result into the action fields) between `wait` and
    /// `step`.
    pub fn shared_mem(&self) -> &SharedMem {
        self.ctx.shared_mem()
    }

    /// Fill action fields back from shared memory, reply to every admitted
    /// client, and release the slot for the next session.
    pub fn step(self) {
        self.ctx.reply_and_release(self.batch);
    }
}
