//! Synchronized request cache for the dashboard data layer.
//!
//! Many independent UI consumers bind to the same logical remote resource
//! (identified by a [`ResourceKey`]), share one in-flight fetch, receive
//! coherent updates, and revalidate on a timer or when the application
//! regains focus - without duplicate network calls or race-induced stale
//! overwrites.
//!
//! This crate provides:
//! - `ResourceKey` / `resource_key!` - cache key composition
//! - `CacheStore` - process-wide entry map with per-key subscriptions
//! - `Coordinator` - fetch dedupe, supersession, optimistic mutation
//! - `Binding` - per-consumer lifecycle (attach, poll, focus, detach)
//! - `FocusSignal` - focus/visibility revalidation events
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use dash_sync::{resource_key, BindingOptions, CacheStore, Coordinator};
//!
//! let store = Arc::new(CacheStore::new());
//! let coordinator = Coordinator::new(store);
//!
//! let binding = coordinator.bind(
//!     resource_key!["attempts", "dashboard"],
//!     fetcher,
//!     BindingOptions::new()
//!         .with_poll_interval(Duration::from_secs(60))
//!         .with_revalidate_on_focus(),
//!     |snapshot| render(snapshot),
//! );
//! ```
//!
//! Writes to a key are ordered by task start order, not completion order: a
//! fetch started later always wins over one started earlier, even if the
//! earlier one finishes last. Detaching a consumer never cancels a fetch
//! other consumers are joined to.

mod binding;
mod coordinator;
mod error;
mod fetcher;
mod focus;
mod key;
mod store;

pub use binding::*;
pub use coordinator::*;
pub use error::*;
pub use fetcher::*;
pub use focus::*;
pub use key::*;
pub use store::*;
