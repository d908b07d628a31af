//! Typed per-thread mailboxes and the `Ctrl` control plane (spec §4.A).
//!
//! The ELF ancestor (`elf/base/ctrl.h`) keys a thread's mailbox set by
//! `std::thread::id` and type-erases each queue via `typeid`. Here the same
//! shape is built on a small hand-rolled `TypeMap` (a `HashMap<TypeId, Box<dyn
//! Any + Send + Sync>>`) rather than `anymap::AnyMap`, because mailbox
//! contents cross threads and need a `Send + Sync` bound the stock `AnyMap`
//! doesn't carry. `Extractor`'s registry (see `extractor.rs`) is read
//! concurrently by every collector thread for the same reason, so it keeps
//! the same hand-rolled shape rather than pulling in `anymap` for a single
//! call site.

use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::addr::{Addr, ThreadHandle};

trait AnyBox: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AnyBox for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TypeMap {
    items: HashMap<TypeId, Box<dyn AnyBox>>,
}

impl TypeMap {
    fn new() -> TypeMap {
        TypeMap { items: HashMap::new() }
    }

    fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.items.insert(TypeId::of::<T>(), Box::new(value));
    }

    fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.items.get(&TypeId::of::<T>()).and_then(|b| b.as_any().downcast_ref::<T>())
    }
}

struct Mailbox<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

struct Callback<T>(Box<dyn Fn(&Addr, &T) -> bool + Send + Sync>);

/// The set of message types a thread admits, fixed for the lifetime of the
/// thread's registration. Implemented for tuples up to arity 4; register a
/// single type as a one-element tuple, e.g. `ctrl.reg_mailbox::<(S,)>(label)`.
pub trait MailboxTypes {
    fn build(map: &mut TypeMap);
}

macro_rules! impl_mailbox_types {
    ($($t:ident),+) => {
        impl<$($t: 'static + Send + Sync),+> MailboxTypes for ($($t,)+) {
            fn build(map: &mut TypeMap) {
                $(
                    let (tx, rx) = unbounded::<$t>();
                    map.insert(Mailbox::<$t> { tx, rx });
                )+
            }
        }
    };
}

impl_mailbox_types!(A);
impl_mailbox_types!(A, B);
impl_mailbox_types!(A, B, C);
impl_mailbox_types!(A, B, C, D);

struct ThreadEntry {
    addr: Addr,
    mailboxes: TypeMap,
}

static NEXT_CTRL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: std::cell::RefCell<HashMap<u64, Arc<ThreadEntry>>> =
        std::cell::RefCell::new(HashMap::new());
}

struct CtrlInner {
    id: u64,
    threads: RwLock<IndexMap<ThreadHandle, Arc<ThreadEntry>>>,
    callbacks: RwLock<TypeMap>,
}

/// The control plane: typed mailbox registration, send/wait/peek, prefix
/// lookup, and synchronous callback dispatch. Cheap to clone (an `Arc`
/// underneath); every thread that wants to participate registers once via
/// [`Ctrl::reg_mailbox`].
#[derive(Clone)]
pub struct Ctrl {
    inner: Arc<CtrlInner>,
}

impl Ctrl {
    pub fn new() -> Ctrl {
        Ctrl {
            inner: Arc::new(CtrlInner {
                id: NEXT_CTRL_ID.fetch_add(1, Ordering::Relaxed),
                threads: RwLock::new(IndexMap::new()),
                callbacks: RwLock::new(TypeMap::new()),
            }),
        }
    }

    fn current_entry(&self) -> Option<Arc<ThreadEntry>> {
        CURRENT.with(|c| c.borrow().get(&self.inner.id).cloned())
    }

    /// Register the calling thread's mailbox set. Idempotent: a second call
    /// from the same thread returns the address from the first call and
    /// ignores the supplied label.
    pub fn reg_mailbox<Ts: MailboxTypes>(&self, label: impl Into<String>) -> Addr {
        if let Some(entry) = self.current_entry() {
            return entry.addr.clone();
        }

        let owner = ThreadHandle::next();
        let mut mailboxes = TypeMap::new();
        Ts::build(&mut mailboxes);

        let addr = Addr::new(owner, label);
        let entry = Arc::new(ThreadEntry { addr: addr.clone(), mailboxes });

        self.inner.threads.write().insert(owner, entry.clone());
        CURRENT.with(|c| c.borrow_mut().insert(self.inner.id, entry));

        addr
    }

    /// The calling thread's own address. Panics if the thread never
    /// registered on this `Ctrl`.
    pub fn current_addr(&self) -> Addr {
        self.current_entry().expect("current_addr: calling thread is not registered on this Ctrl").addr.clone()
    }

    /// Enqueue `value` on `addr`'s inbox for type `T`. This is a protocol
    /// violation (and panics) if the target thread never registered a
    /// mailbox for `T`.
    pub fn send<T: Any + Send + Sync>(&self, addr: &Addr, value: T) {
        let threads = self.inner.threads.read();
        let entry = threads.get(&addr.owner).unwrap_or_else(|| panic!("send: unknown target thread for {:?}", addr));
        let mailbox = entry
            .mailboxes
            .get::<Mailbox<T>>()
            .unwrap_or_else(|| panic!("send: {:?} has no inbox registered for this message type", addr));
        mailbox.tx.send(value).expect("send: mailbox receiver dropped unexpectedly");
    }

    /// Block until an item of type `T` arrives on the calling thread's
    /// inbox.
    pub fn wait<T: Any + Send + Sync>(&self) -> T {
        let entry = self.current_entry().expect("wait: calling thread is not registered on this Ctrl");
        let mailbox = entry.mailboxes.get::<Mailbox<T>>().expect("wait: no inbox registered for this message type");
        mailbox.rx.recv().expect("wait: all senders for this inbox dropped")
    }

    /// Wait up to `timeout_usec` microseconds for an item of type `T`.
    /// Negative means wait indefinitely; zero polls without blocking.
    pub fn peek<T: Any + Send + Sync>(&self, timeout_usec: i64) -> Option<T> {
        let entry = self.current_entry().expect("peek: calling thread is not registered on this Ctrl");
        let mailbox = entry.mailboxes.get::<Mailbox<T>>().expect("peek: no inbox registered for this message type");

        if timeout_usec < 0 {
            mailbox.rx.recv().ok()
        } else if timeout_usec == 0 {
            mailbox.rx.try_recv().ok()
        } else {
            mailbox.rx.recv_timeout(Duration::from_micros(timeout_usec as u64)).ok()
        }
    }

    /// Snapshot of every registered address whose label starts with
    /// `prefix`, sorted ascending by `(label, registration order)` for
    /// determinism (see design notes on `filterPrefix` ordering).
    pub fn filter_prefix(&self, prefix: &str) -> Vec<Addr> {
        let threads = self.inner.threads.read();
        let mut addrs: Vec<Addr> = threads.values().map(|e| e.addr.clone()).filter(|a| a.match_prefix(prefix)).collect();
        addrs.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.owner.cmp(&b.owner)));
        addrs
    }

    /// Register a synchronous in-thread callback for messages of type `T`.
    pub fn register_callback<T: Any + Send + Sync>(&self, f: impl Fn(&Addr, &T) -> bool + Send + Sync + 'static) {
        self.inner.callbacks.write().insert(Callback::<T>(Box::new(f)));
    }

    /// Invoke the registered callback for `T` with the calling thread's
    /// address and `msg`, synchronously.
    pub fn process<T: Any + Send + Sync>(&self, msg: &T) -> bool {
        let addr = self.current_addr();
        let callbacks = self.inner.callbacks.read();
        let cb = callbacks.get::<Callback<T>>().expect("process: no callback registered for this message type");
        (cb.0)(&addr, msg)
    }
}
