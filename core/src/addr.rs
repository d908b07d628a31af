//! Thread identity used throughout the mailbox/comm/dispatcher layers.
//!
//! The teacher's ELF ancestor keys everything off `std::thread::id`. Per
//! the design notes' redesign flag ("key mailboxes by a runtime-generated
//! stable thread handle, not the OS thread-id"), `ThreadHandle` is instead a
//! process-unique counter handed out by `Ctrl::reg_mailbox`. This keeps the
//! model portable to non-OS-thread executors without changing any other
//! contract.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ThreadHandle(u64);

impl ThreadHandle {
    pub(crate) fn next() -> ThreadHandle {
        ThreadHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// A routing address: which thread, and under what human label it
/// registered. Labels support prefix matching so a dispatcher can address
/// "all game threads" via `filter_prefix("game")`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Addr {
    pub owner: ThreadHandle,
    pub label: String,
}

impl Addr {
    pub fn new(owner: ThreadHandle, label: impl Into<String>) -> Addr {
        Addr { owner, label: label.into() }
    }

    pub fn match_prefix(&self, prefix: &str) -> bool {
        self.label.starts_with(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_prefix() {
        let addr = Addr::new(ThreadHandle::next(), "game_3");
        assert!(addr.match_prefix("game"));
        assert!(!addr.match_prefix("train"));
        assert!(!addr.match_prefix("game_3_extra"));
    }

    #[test]
    fn handles_are_unique() {
        let a = ThreadHandle::next();
        let b = ThreadHandle::next();
        assert_ne!(a, b);
    }
}
