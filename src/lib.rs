//! Offline cache management for the FocusFlow app shell.
//!
//! The crate covers the worker-side cache machinery: versioned cache tiers
//! (static / dynamic / offline), request routing with cache-first and
//! network-first strategies, size-bounded eviction, an offline data queue,
//! and the background sync protocol that drains it once connectivity
//! returns. The UI, timers and task tracking live elsewhere and talk to this
//! layer only through fetch routing and the cross-context message protocol.

pub mod config;
pub mod evict;
pub mod http;
pub mod lifecycle;
pub mod offline;
pub mod router;
pub mod store;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use http::{Request, Response, ResponseSource};
pub use lifecycle::{Lifecycle, MessageReply, WorkerMessage, WorkerState};
pub use offline::{OfflineQueue, OfflineRecord};
pub use router::{FetchRouter, RequestClass};
pub use store::{CacheEntry, CacheStore, SqliteStore, TierKind, TierUsage, Tiers};
pub use sync::{SyncCoordinator, SyncReport};
pub use transport::{HttpTransport, Transport};
