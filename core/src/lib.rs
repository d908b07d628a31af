#![allow(clippy::new_without_default)]
#![allow(clippy::type_complexity)]

pub mod addr;
pub mod batch;
pub mod collector;
pub mod comm;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod mailbox;
pub mod node;
pub mod record;
pub mod remote;
pub mod replay;
pub mod sharedmem;
pub mod writer;

pub mod prelude {
    pub use crate::addr::Addr;
    pub use crate::batch::BatchContext;
    pub use crate::collector::CollectorContext;
    pub use crate::comm::{Comm, ReplyStatus};
    pub use crate::dispatcher::ThreadedDispatcher;
    pub use crate::error::{Error, Result};
    pub use crate::extractor::{AnyP, Extractor};
    pub use crate::mailbox::Ctrl;
    pub use crate::replay::ReplayBuffer;
    pub use crate::sharedmem::{SharedMemData, SharedMemOptions};
}
