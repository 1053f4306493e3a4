//! # Tether Resource
//!
//! Queued open/close/destroy lifecycle management for resources whose real
//! work happens elsewhere (a worker thread, an event loop, a device).
//!
//! A [`Resource`] serialises lifecycle requests through a bounded FIFO and
//! tracks the flags they drive. The application supplies [`Hooks`] that
//! perform the work and report back through [`Request::complete`], either
//! synchronously or later from the same thread. Active holds
//! ([`Resource::active`], [`ActiveGuard`]) defer close and destroy until the
//! resource is idle.
//!
//! ```
//! use tether_resource::{Resource, ResourceOptions};
//!
//! let resource = Resource::new(ResourceOptions::new())?;
//! resource.open(|_, result| assert!(result.is_ok()))?;
//! assert!(resource.is_opened());
//!
//! resource.destroy(|_, result| assert!(result.is_ok()))?;
//! assert!(resource.is_destroyed());
//! # Ok::<(), tether_resource::Error>(())
//! ```

pub mod alloc;
pub mod config;
pub mod error;
pub mod gate;
pub mod hooks;
pub mod queue;
pub mod request;
pub mod resource;
pub mod version;

pub use alloc::{AllocHook, AllocStats, CountingHook, Ownership};
pub use config::ResourceConfig;
pub use error::{Error, Result};
pub use gate::ActiveGuard;
pub use hooks::{Hooks, NoHooks};
pub use queue::RequestQueue;
pub use request::{Request, RequestKind, RequestOptions, RequestStatus};
pub use resource::{Resource, ResourceId, ResourceOptions, ResourceStatus, Snapshot};
