//! The resource state machine.
//!
//! A [`Resource`] owns a queue of [`Request`]s and the lifecycle flags they
//! drive. Requests run one at a time on the open/close/destroy lane; user
//! requests drained from the queue may overlap. All mutation happens on one
//! thread of control: handles are `Rc`-based and therefore `!Send`, so work
//! finished on another thread has to be marshalled back before it calls
//! [`Request::complete`].
//!
//! No `RefCell` borrow is held while user code (hooks, callbacks, work
//! closures) runs, which is what lets hooks complete synchronously from
//! inside dispatch.

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::alloc::{AllocHook, Allocation, Ownership};
use crate::config::ResourceConfig;
use crate::error::{Error, Result};
use crate::hooks::{Hooks, NoHooks};
use crate::queue::RequestQueue;
use crate::request::{Request, RequestKind, RequestOptions, RequestStatus};

/// Unique identifier of a resource, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(uuid::Uuid);

impl ResourceId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Options for [`Resource::new`] and [`Resource::init`].
pub struct ResourceOptions {
    config: ResourceConfig,
    hooks: Rc<dyn Hooks>,
    data: Option<Box<dyn Any>>,
    alloc_hook: Option<Arc<dyn AllocHook>>,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            config: ResourceConfig::default(),
            hooks: Rc::new(NoHooks),
            data: None,
            alloc_hook: None,
        }
    }
}

impl ResourceOptions {
    /// Options with no hooks, no data and the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Work hooks for open/close/destroy and data-less user requests
    #[must_use]
    pub fn hooks<H: Hooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Rc::new(hooks);
        self
    }

    /// Shared work hooks
    #[must_use]
    pub fn shared_hooks(mut self, hooks: Rc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Opaque user data carried by the resource
    #[must_use]
    pub fn data<T: Any>(mut self, data: T) -> Self {
        self.data = Some(Box::new(data));
        self
    }

    /// Resource configuration
    #[must_use]
    pub fn config(mut self, config: ResourceConfig) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for setting `config.queue_capacity`
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Allocation hook for this resource and the requests issued against it
    #[must_use]
    pub fn alloc_hook(mut self, hook: Arc<dyn AllocHook>) -> Self {
        self.alloc_hook = Some(hook);
        self
    }
}

impl std::fmt::Debug for ResourceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceOptions")
            .field("config", &self.config)
            .field("data", &self.data.is_some())
            .field("alloc_hook", &self.alloc_hook.is_some())
            .finish_non_exhaustive()
    }
}

/// Point-in-time copy of a resource's flags and counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStatus {
    /// An open completed successfully and no close has since
    pub opened: bool,
    /// A close completed successfully and no open has since
    pub closed: bool,
    /// An open hook is in flight
    pub opening: bool,
    /// A close hook is in flight
    pub closing: bool,
    /// A destroy completed successfully
    pub destroyed: bool,
    /// A destroy hook is in flight
    pub destroying: bool,
    /// No open has succeeded yet
    pub needs_open: bool,
    /// Dispatched requests that have not completed
    pub pending: usize,
    /// Outstanding active holds
    pub actives: usize,
    /// Requests in the queue
    pub queued: usize,
}

/// Identifying fields of the most recently dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Request id
    pub request: u64,
    /// Request kind
    pub kind: RequestKind,
}

pub(crate) struct ResourceState {
    pub(crate) opened: bool,
    pub(crate) closed: bool,
    pub(crate) opening: bool,
    pub(crate) closing: bool,
    pub(crate) destroyed: bool,
    pub(crate) destroying: bool,
    pub(crate) needs_open: bool,
    pub(crate) pending: usize,
    pub(crate) actives: usize,
    pub(crate) draining: bool,
    pub(crate) queue: RequestQueue,
    // Close/destroy requests waiting on holds or an in-flight open, queued
    // or run directly.
    pub(crate) deferred: Vec<Request>,
    pub(crate) last: Option<Snapshot>,
}

impl ResourceState {
    fn new(capacity: usize) -> Self {
        Self {
            opened: false,
            closed: false,
            opening: false,
            closing: false,
            destroyed: false,
            destroying: false,
            needs_open: true,
            pending: 0,
            actives: 0,
            draining: false,
            queue: RequestQueue::new(capacity),
            deferred: Vec::new(),
            last: None,
        }
    }
}

pub(crate) struct ResourceInner {
    id: ResourceId,
    ownership: Ownership,
    state: RefCell<ResourceState>,
    hooks: RefCell<Option<Rc<dyn Hooks>>>,
    data: RefCell<Option<Box<dyn Any>>>,
    alloc_hook: Option<Arc<dyn AllocHook>>,
    allocation: RefCell<Option<Allocation>>,
}

/// Handle to a lifecycle-managed resource.
///
/// Cloning the handle is cheap; every clone refers to the same state.
#[derive(Clone)]
pub struct Resource {
    inner: Rc<ResourceInner>,
}

impl Resource {
    /// Create a library-owned resource.
    ///
    /// It is accounted through the allocation hook and released (hooks, data
    /// and allocation token dropped) as soon as a destroy request succeeds.
    pub fn new(options: ResourceOptions) -> Result<Self> {
        Self::build(options, Ownership::Library)
    }

    /// Create a caller-owned resource.
    ///
    /// Its hooks and data stay in place after destroy until the caller drops
    /// the last handle. Destroy is still final: as with [`Resource::new`],
    /// later open and user requests fail with [`Error::Destroyed`] without
    /// reaching the hooks.
    pub fn init(options: ResourceOptions) -> Result<Self> {
        Self::build(options, Ownership::Caller)
    }

    fn build(options: ResourceOptions, ownership: Ownership) -> Result<Self> {
        let ResourceOptions {
            config,
            hooks,
            data,
            alloc_hook,
        } = options;
        config.validate()?;

        let allocation = match ownership {
            Ownership::Library => Some(Allocation::track::<ResourceInner>(alloc_hook.clone())),
            Ownership::Caller => None,
        };

        let resource = Self {
            inner: Rc::new(ResourceInner {
                id: ResourceId::generate(),
                ownership,
                state: RefCell::new(ResourceState::new(config.queue_capacity)),
                hooks: RefCell::new(Some(hooks)),
                data: RefCell::new(data),
                alloc_hook,
                allocation: RefCell::new(allocation),
            }),
        };

        tracing::debug!(
            resource = %resource.id(),
            ?ownership,
            capacity = config.queue_capacity,
            "resource initialised"
        );
        Ok(resource)
    }

    pub(crate) fn from_inner(inner: Rc<ResourceInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ResourceInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn as_ptr(&self) -> *const ResourceInner {
        Rc::as_ptr(&self.inner)
    }

    pub(crate) fn state(&self) -> Ref<'_, ResourceState> {
        self.inner.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, ResourceState> {
        self.inner.state.borrow_mut()
    }

    pub(crate) fn hooks(&self) -> Option<Rc<dyn Hooks>> {
        self.inner.hooks.borrow().clone()
    }

    pub(crate) fn alloc_hook(&self) -> Option<Arc<dyn AllocHook>> {
        self.inner.alloc_hook.clone()
    }

    /// Resource identifier
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    /// Who owns the resource's storage
    #[must_use]
    pub fn ownership(&self) -> Ownership {
        self.inner.ownership
    }

    /// Whether both handles refer to the same resource
    #[must_use]
    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot of flags and counters
    #[must_use]
    pub fn status(&self) -> ResourceStatus {
        let state = self.state();
        ResourceStatus {
            opened: state.opened,
            closed: state.closed,
            opening: state.opening,
            closing: state.closing,
            destroyed: state.destroyed,
            destroying: state.destroying,
            needs_open: state.needs_open,
            pending: state.pending,
            actives: state.actives,
            queued: state.queue.len(),
        }
    }

    /// Whether the resource is open
    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.state().opened
    }

    /// Whether the resource is closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Whether the resource has been destroyed
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    /// Dispatched requests that have not completed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state().pending
    }

    /// Outstanding active holds
    #[must_use]
    pub fn actives(&self) -> usize {
        self.state().actives
    }

    /// Requests waiting in the queue (including the in-flight head)
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    /// Queue capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state().queue.capacity()
    }

    /// The most recently dispatched request
    #[must_use]
    pub fn last_dispatched(&self) -> Option<Snapshot> {
        self.state().last
    }

    /// Whether a destroy released the resource's hooks and data
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.hooks.borrow().is_none()
    }

    /// Run `f` against the resource data if it is a `T`.
    ///
    /// The data is moved out for the duration of the call, so `f` may use
    /// the resource freely.
    pub fn with_data<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut data = self.inner.data.borrow_mut().take()?;
        let out = data.downcast_mut::<T>().map(f);
        let mut slot = self.inner.data.borrow_mut();
        if slot.is_none() {
            *slot = Some(data);
        }
        out
    }

    /// Replace the resource data, returning the previous value.
    pub fn set_data<T: Any>(&self, data: T) -> Option<Box<dyn Any>> {
        self.inner.data.borrow_mut().replace(Box::new(data))
    }

    /// Take the resource data out if it is a `T`.
    pub fn take_data<T: Any>(&self) -> Option<Box<T>> {
        let mut slot = self.inner.data.borrow_mut();
        match slot.take()?.downcast::<T>() {
            Ok(data) => Some(data),
            Err(other) => {
                *slot = Some(other);
                None
            }
        }
    }

    /// Queue an open. `done` receives the outcome.
    pub fn open<F>(&self, done: F) -> Result<()>
    where
        F: FnOnce(&Resource, Result<()>) + 'static,
    {
        self.submit(RequestOptions::new(RequestKind::Open).done(done)).map(drop)
    }

    /// Queue a close. `done` receives the outcome.
    pub fn close<F>(&self, done: F) -> Result<()>
    where
        F: FnOnce(&Resource, Result<()>) + 'static,
    {
        self.submit(RequestOptions::new(RequestKind::Close).done(done)).map(drop)
    }

    /// Queue a close followed by a destroy. `done` receives the outcome of
    /// the destroy.
    ///
    /// Both requests are queued before either runs, so a failing close also
    /// fails the destroy behind it.
    pub fn destroy<F>(&self, done: F) -> Result<()>
    where
        F: FnOnce(&Resource, Result<()>) + 'static,
    {
        {
            let state = self.state();
            if state.queue.len() + 2 > state.queue.capacity() {
                return Err(Error::QueueFull {
                    capacity: state.queue.capacity(),
                });
            }
        }
        let close = Request::new(RequestOptions::new(RequestKind::Close).resource(self))?;
        let destroy =
            Request::new(RequestOptions::new(RequestKind::Destroy).resource(self).done(done))?;

        let idle = self.push(&close)?;
        self.push(&destroy)?;
        if idle {
            self.drain();
        }
        Ok(())
    }

    /// Build a library-owned request against this resource and queue it.
    pub fn submit(&self, options: RequestOptions) -> Result<Request> {
        let request = Request::new(options.resource(self))?;
        self.enqueue(&request)?;
        Ok(request)
    }

    /// Push `request` onto the queue and, if nothing is pending, start
    /// draining.
    pub fn enqueue(&self, request: &Request) -> Result<()> {
        if self.push(request)? {
            self.drain();
        }
        Ok(())
    }

    // Returns whether the resource was idle.
    fn push(&self, request: &Request) -> Result<bool> {
        if !request.belongs_to(self) {
            return Err(Error::invalid_argument(
                "request belongs to a different resource",
            ));
        }
        if request.status() != RequestStatus::Idle {
            return Err(Error::invalid_argument("request was already queued"));
        }

        let idle = {
            let mut state = self.state_mut();
            match state.queue.push(request.clone()) {
                Ok(queued) => {
                    tracing::trace!(
                        resource = %self.id(),
                        request = request.id(),
                        kind = %request.kind(),
                        queued,
                        "request queued"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        resource = %self.id(),
                        request = request.id(),
                        error = %err,
                        "request rejected"
                    );
                    return Err(err);
                }
            }
            state.pending == 0
        };
        request.set_status(RequestStatus::Queued);
        Ok(idle)
    }

    /// Run queued requests until a lifecycle request is in flight.
    ///
    /// A lifecycle head stops the drain while it is outstanding, because it
    /// changes the resource state the requests behind it depend on. A user
    /// head is detached from the queue once dispatched and the drain moves
    /// on, so user requests may run concurrently with each other.
    pub(crate) fn drain(&self) {
        {
            let mut state = self.state_mut();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        let _draining = DrainGuard(self);

        loop {
            let Some(head) = self.state().queue.front().cloned() else {
                break;
            };
            match head.status() {
                RequestStatus::Running | RequestStatus::Deferred => break,
                RequestStatus::Completed => {
                    self.evict(&head);
                    continue;
                }
                RequestStatus::Idle | RequestStatus::Queued => {}
            }

            tracing::trace!(
                resource = %self.id(),
                request = head.id(),
                kind = %head.kind(),
                "draining queue head"
            );
            if let Err(err) = head.run() {
                tracing::debug!(
                    resource = %self.id(),
                    request = head.id(),
                    error = %err,
                    "drained request failed"
                );
            }

            if head.kind().is_lifecycle() {
                if head.status() == RequestStatus::Completed && self.state().pending == 0 {
                    continue;
                }
                break;
            }
            self.evict(&head);
        }
    }

    fn evict(&self, request: &Request) -> bool {
        let mut state = self.state_mut();
        match state.queue.position(request) {
            Some(index) => state.queue.remove(index).is_some(),
            None => false,
        }
    }

    /// Drop hooks, data and the allocation token of a library-owned resource.
    pub(crate) fn release(&self) {
        let hooks = self.inner.hooks.borrow_mut().take();
        let data = self.inner.data.borrow_mut().take();
        let allocation = self.inner.allocation.borrow_mut().take();
        tracing::debug!(resource = %self.id(), "resource released");
        drop((hooks, data, allocation));
    }
}

struct DrainGuard<'a>(&'a Resource);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.state_mut().draining = false;
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.inner.id)
            .field("ownership", &self.inner.ownership)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn fresh_resource_needs_open() {
        let resource = Resource::init(ResourceOptions::new()).unwrap();
        let status = resource.status();
        assert!(status.needs_open);
        assert!(!status.opened && !status.closed && !status.destroyed);
        assert_eq!(status.pending, 0);
        assert_eq!(resource.capacity(), crate::config::DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Resource::new(ResourceOptions::new().queue_capacity(0)).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn data_access() {
        let resource = Resource::init(ResourceOptions::new().data(41u32)).unwrap();
        let bumped = resource.with_data(|n: &mut u32| {
            *n += 1;
            *n
        });
        assert_eq!(bumped, Some(42));
        assert_eq!(resource.with_data(|_: &mut String| ()), None);
        assert_eq!(resource.take_data::<u32>().map(|b| *b), Some(42));
        assert!(resource.take_data::<u32>().is_none());
    }

    #[test]
    fn no_hooks_complete_synchronously() {
        let resource = Resource::init(ResourceOptions::new()).unwrap();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        resource
            .open(move |_, result| {
                assert!(result.is_ok());
                f.set(true);
            })
            .unwrap();
        assert!(fired.get());
        assert!(resource.is_opened());
        assert_eq!(resource.queued(), 0);
        assert_eq!(resource.pending(), 0);
        assert_eq!(resource.last_dispatched().map(|s| s.kind), Some(RequestKind::Open));
    }

    #[test]
    fn last_dispatched_identifies_the_request() {
        let resource = Resource::init(ResourceOptions::new()).unwrap();
        assert_eq!(resource.last_dispatched(), None);

        let request = resource.submit(RequestOptions::user()).unwrap();
        assert_eq!(
            resource.last_dispatched(),
            Some(Snapshot {
                request: request.id(),
                kind: RequestKind::User,
            })
        );
    }

    #[test]
    fn destroyed_caller_resource_stays_final() {
        let resource = Resource::init(ResourceOptions::new()).unwrap();
        resource.destroy(|_, _| {}).unwrap();
        assert!(!resource.is_released());

        let outcome = Rc::new(RefCell::new(None));
        let o = outcome.clone();
        resource.open(move |_, result| *o.borrow_mut() = Some(result)).unwrap();
        assert_eq!(*outcome.borrow(), Some(Err(Error::Destroyed)));
        assert!(!resource.is_opened());
    }

    #[test]
    fn destroy_needs_two_slots() {
        let resource = Resource::init(ResourceOptions::new().queue_capacity(1)).unwrap();
        let err = resource.destroy(|_, _| {}).unwrap_err();
        assert_eq!(err, Error::QueueFull { capacity: 1 });
        assert_eq!(resource.queued(), 0);
    }

    #[test]
    fn library_resource_released_after_destroy() {
        let resource = Resource::new(ResourceOptions::new().data(String::from("payload"))).unwrap();
        resource.destroy(|_, result| assert!(result.is_ok())).unwrap();
        assert!(resource.is_destroyed());
        assert!(resource.is_released());
        assert!(resource.with_data(|_: &mut String| ()).is_none());

        let caller = Resource::init(ResourceOptions::new().data(String::from("payload"))).unwrap();
        caller.destroy(|_, _| {}).unwrap();
        assert!(caller.is_destroyed());
        assert!(!caller.is_released());
    }
}
