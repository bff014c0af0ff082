//! LogRing - Bounded Lock-Free Ring Buffer with a Batching Notify-Dispatcher
//!
//! A fixed-capacity SPSC ring buffer of owned items plus a dispatcher layer
//! that serializes producers (MPSC) and wakes consumers through a single
//! semaphore-counting notification fd. Built as the staging queue of an
//! append-only log store: producers enqueue request blocks, flush workers
//! drain them in batches.
//!
//! # Key Features
//!
//! - Cache-line isolated producer/consumer indices (no false sharing)
//! - Batched draining (single head update for N items)
//! - Adaptive backoff (spin → yield → give up)
//! - One wake token per enqueue; consumers batch opportunistically
//!
//! # Example
//!
//! ```
//! use logring::NotifyDispatcher;
//!
//! let dispatcher = NotifyDispatcher::<u64>::with_capacity(256, 32).unwrap();
//! dispatcher.enqueue(42).unwrap();
//!
//! let mut batch = Vec::new();
//! let drained = dispatcher.next(&mut batch).unwrap();
//! assert_eq!(batch[..drained], [42]);
//! ```

mod dispatcher;
mod invariants;
mod notify;
mod ring;

pub use dispatcher::{DispatchError, EnqueueError, NotifyDispatcher};
pub use ring::{Ring, RingError};
