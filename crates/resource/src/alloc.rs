//! Allocation accounting for library-owned resources and requests.
//!
//! Rust owns the actual memory; this module observes it. Every entity built
//! through a library constructor (`Resource::new`, `Request::new`) carries an
//! [`Allocation`] token that reports to the process-wide counters and to an
//! optional [`AllocHook`]. Dropping or releasing the entity returns the token.
//!
//! The counters are diagnostic only. Nothing in the lifecycle logic reads
//! them.

use std::alloc::Layout;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Observer notified whenever a library-owned entity is allocated or freed.
pub trait AllocHook: Send + Sync {
    /// Called when an entity with `layout` is allocated.
    fn on_alloc(&self, layout: Layout);

    /// Called when an entity with `layout` is released.
    fn on_free(&self, layout: Layout);
}

/// Who is responsible for an entity's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Built by a library constructor; accounted and released by the library
    Library,
    /// Built for the caller, who releases it by dropping the last handle
    Caller,
}

/// Allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Number of allocations
    pub alloc: usize,
    /// Number of deallocations
    pub free: usize,
}

impl AllocStats {
    /// Allocations not yet released
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.alloc.saturating_sub(self.free)
    }

    /// Whether every allocation has been released
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.alloc == self.free
    }
}

static ALLOC_COUNT: AtomicUsize = AtomicUsize::new(0);
static FREE_COUNT: AtomicUsize = AtomicUsize::new(0);
static GLOBAL_HOOK: RwLock<Option<Arc<dyn AllocHook>>> = parking_lot::const_rwlock(None);

/// Install (or clear) the process-wide allocation hook.
///
/// Entities created with their own hook in `ResourceOptions` ignore it.
pub fn set_hook(hook: Option<Arc<dyn AllocHook>>) {
    *GLOBAL_HOOK.write() = hook;
}

/// Process-wide allocation counters.
#[must_use]
pub fn stats() -> AllocStats {
    AllocStats {
        alloc: ALLOC_COUNT.load(Ordering::Relaxed),
        free: FREE_COUNT.load(Ordering::Relaxed),
    }
}

/// Number of library allocations so far.
#[must_use]
pub fn alloc_count() -> usize {
    ALLOC_COUNT.load(Ordering::Relaxed)
}

/// Number of library deallocations so far.
#[must_use]
pub fn free_count() -> usize {
    FREE_COUNT.load(Ordering::Relaxed)
}

/// Hook that keeps its own counters.
///
/// Handy for giving one resource (and the requests issued against it) an
/// isolated view of its allocation balance.
#[derive(Debug, Default)]
pub struct CountingHook {
    alloc: AtomicUsize,
    free: AtomicUsize,
}

impl CountingHook {
    /// Create a hook with zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> AllocStats {
        AllocStats {
            alloc: self.alloc.load(Ordering::Relaxed),
            free: self.free.load(Ordering::Relaxed),
        }
    }
}

impl AllocHook for CountingHook {
    fn on_alloc(&self, _layout: Layout) {
        self.alloc.fetch_add(1, Ordering::Relaxed);
    }

    fn on_free(&self, _layout: Layout) {
        self.free.fetch_add(1, Ordering::Relaxed);
    }
}

/// RAII token for one library-owned entity.
pub(crate) struct Allocation {
    layout: Layout,
    hook: Option<Arc<dyn AllocHook>>,
}

impl Allocation {
    /// Account for a new `T`, reporting to `hook` or else the global hook.
    pub(crate) fn track<T>(hook: Option<Arc<dyn AllocHook>>) -> Self {
        let layout = Layout::new::<T>();
        let hook = hook.or_else(|| GLOBAL_HOOK.read().clone());

        ALLOC_COUNT.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = &hook {
            hook.on_alloc(layout);
        }

        Self { layout, hook }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        FREE_COUNT.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = &self.hook {
            hook.on_free(self.layout);
        }
    }
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("size", &self.layout.size())
            .field("hooked", &self.hook.is_some())
            .finish()
    }
}
