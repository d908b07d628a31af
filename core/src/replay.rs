//! Parity-balanced replay buffer (spec §4.J), grounded on
//! `elf/distributed/shared_reader.h`: a sharded ring buffer that keeps
//! self-play experience roughly balanced between two parity classes (e.g.
//! which side won) even as data arrives unevenly, and gates sampling on a
//! minimum fill level so training doesn't start against a near-empty
//! buffer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const MIN_FILL_WAIT: Duration = Duration::from_secs(60);
const MIN_FILL_POLL: Duration = Duration::from_millis(20);

/// Either the thread-local RNG (the default - fine for live training) or a
/// `ChaCha8` RNG seeded once at construction, for runs that need
/// reproducible sampling (e.g. replaying a training run bit-for-bit from a
/// recorded seed).
enum RngSource {
    Thread,
    Seeded(Mutex<ChaCha8Rng>),
}

impl RngSource {
    fn gen_f64(&self) -> f64 {
        match self {
            RngSource::Thread => rand::thread_rng().gen(),
            RngSource::Seeded(rng) => rng.lock().gen(),
        }
    }

    fn gen_below(&self, n: usize) -> usize {
        match self {
            RngSource::Thread => rand::thread_rng().gen_range(0..n),
            RngSource::Seeded(rng) => rng.lock().gen_range(0..n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayBufferOptions {
    /// Must be even: half the shards hold parity-0 items, half parity-1.
    pub num_shards: usize,
    pub shard_capacity: usize,
    /// `get_sampler` busy-waits (up to 60s) until *every* shard holds at
    /// least this many items - not the aggregate total - matching
    /// `shared_reader.h`'s `sufficient_per_queue_size()` (returns false,
    /// i.e. keep waiting, if any single queue is under-filled). A
    /// per-shard gate is what makes the parity-balance guarantee on
    /// `get_sampler` meaningful: an aggregate gate can open while one
    /// parity class is still empty, defeating it.
    pub queue_min_size: usize,
}

struct Shard<T> {
    items: RwLock<VecDeque<T>>,
}

/// A sampled item, held behind the shard's read lock for the caller's
/// duration of use; the lock releases when this guard drops.
pub struct Sampler<'a, T> {
    guard: RwLockReadGuard<'a, VecDeque<T>>,
    index: usize,
}

impl<'a, T> Sampler<'a, T> {
    pub fn item(&self) -> &T {
        &self.guard[self.index]
    }
}

/// A sharded, parity-balanced replay buffer. Shards with an even index
/// hold parity `false` (0) items, odd shards hold parity `true` (1); each
/// shard drops its oldest item once full (`shard_capacity`).
pub struct ReplayBuffer<T> {
    shards: Vec<Shard<T>>,
    options: ReplayBufferOptions,
    pushed: [AtomicU64; 2],
    next_even: AtomicUsize,
    next_odd: AtomicUsize,
    rng: RngSource,
}

impl<T> ReplayBuffer<T> {
    pub fn new(options: ReplayBufferOptions) -> ReplayBuffer<T> {
        Self::with_rng(options, RngSource::Thread)
    }

    /// As [`Self::new`], but sampling draws from a `ChaCha8` RNG seeded
    /// with `seed` instead of the thread-local RNG, for reproducible runs.
    pub fn with_seed(options: ReplayBufferOptions, seed: u64) -> ReplayBuffer<T> {
        Self::with_rng(options, RngSource::Seeded(Mutex::new(ChaCha8Rng::seed_from_u64(seed))))
    }

    fn with_rng(options: ReplayBufferOptions, rng: RngSource) -> ReplayBuffer<T> {
        assert!(options.num_shards > 0 && options.num_shards % 2 == 0, "replay buffer: num_shards must be a positive even number");
        let shards = (0..options.num_shards).map(|_| Shard { items: RwLock::new(VecDeque::new()) }).collect();
        ReplayBuffer {
            shards,
            options,
            pushed: [AtomicU64::new(0), AtomicU64::new(0)],
            next_even: AtomicUsize::new(0),
            next_odd: AtomicUsize::new(0),
            rng,
        }
    }

    /// Insert `item` into a shard of the given parity, round-robin across
    /// that parity's shards, dropping the oldest entry if the shard is
    /// full.
    pub fn push(&self, item: T, parity: bool) {
        let idx = self.next_shard_index(parity);
        {
            let mut items = self.shards[idx].items.write();
            items.push_back(item);
            if items.len() > self.options.shard_capacity {
                items.pop_front();
            }
        }
        self.pushed[parity as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn next_shard_index(&self, parity: bool) -> usize {
        let half = self.shards.len() / 2;
        if parity {
            (self.next_odd.fetch_add(1, Ordering::Relaxed) % half) * 2 + 1
        } else {
            (self.next_even.fetch_add(1, Ordering::Relaxed) % half) * 2
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.items.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn every_shard_meets_min_size(&self) -> bool {
        self.shards.iter().all(|s| s.items.read().len() >= self.options.queue_min_size)
    }

    fn wait_until_min_fill(&self) {
        let deadline = Instant::now() + MIN_FILL_WAIT;
        while !self.every_shard_meets_min_size() {
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(MIN_FILL_POLL);
        }
    }

    /// The probability of drawing from parity 0 on the next sample: the
    /// actual proportion of parity-0 pushes seen so far, clamped to
    /// [0.45, 0.55] so neither class can come to dominate sampling even
    /// under a heavily skewed arrival rate.
    fn parity0_probability(&self) -> f64 {
        let p0 = self.pushed[0].load(Ordering::Relaxed) as f64;
        let p1 = self.pushed[1].load(Ordering::Relaxed) as f64;
        let total = p0 + p1;
        let raw = if total > 0.0 { p0 / total } else { 0.5 };
        raw.clamp(0.45, 0.55)
    }

    /// Busy-wait (up to 60s) for every shard to reach `queue_min_size`, then draw a uniformly random
    /// item from a parity chosen by [`Self::parity0_probability`]. Falls
    /// back to the other parity if the chosen one has no data yet. Panics
    /// if the buffer is still empty once the wait elapses.
    pub fn get_sampler(&self) -> Sampler<'_, T> {
        self.wait_until_min_fill();
        assert!(!self.is_empty(), "replay buffer: get_sampler called on an empty buffer");

        let want_parity0 = self.rng.gen_f64() < self.parity0_probability();
        self.sample_from_parity(!want_parity0)
    }

    fn sample_from_parity(&self, parity: bool) -> Sampler<'_, T> {
        let half = self.shards.len() / 2;
        let mut candidates: Vec<usize> = (0..half).map(|i| if parity { i * 2 + 1 } else { i * 2 }).collect();
        if candidates.iter().all(|&i| self.shards[i].items.read().is_empty()) {
            candidates = (0..self.shards.len()).collect();
        }

        loop {
            let idx = candidates[self.rng.gen_below(candidates.len())];
            let guard = self.shards[idx].items.read();
            if guard.is_empty() {
                continue;
            }
            let index = self.rng.gen_below(guard.len());
            return Sampler { guard, index };
        }
    }
}
