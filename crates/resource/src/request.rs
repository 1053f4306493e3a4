//! Requests: one scheduled operation against one resource.
//!
//! [`Request::run`] dispatches a request to its work hook and
//! [`Request::complete`] is the single completion entry point the hook must
//! call. Completion commits the resource state, fails the requests queued
//! behind a failed open, pops the request off the queue, fires the caller's
//! callbacks and then drains whatever is queued next.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::alloc::{Allocation, Ownership};
use crate::error::{Error, Result};
use crate::gate;
use crate::resource::{Resource, ResourceInner, Snapshot};

/// Terminal callback for a request, receiving its final outcome.
pub type DoneCallback = Box<dyn FnOnce(&Resource, Result<()>)>;

/// Hook invoked right before a request is dispatched to its work.
pub type BeforeHook = Box<dyn FnOnce(&Request)>;

/// Hook invoked after the terminal callback, whatever the outcome.
pub type AfterHook = Box<dyn FnOnce(&Request, &Result<()>)>;

/// Work closure of a user request.
pub type WorkFn = Box<dyn FnOnce(Request)>;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// What a request does to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Open the resource
    Open,
    /// Close the resource
    Close,
    /// Destroy the resource
    Destroy,
    /// Application-defined operation
    User,
}

impl RequestKind {
    /// Open, close and destroy share one lane and run one at a time.
    #[must_use]
    pub fn is_lifecycle(self) -> bool {
        !matches!(self, Self::User)
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
            Self::Destroy => write!(f, "destroy"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// Built, not queued
    #[default]
    Idle,
    /// Waiting in its resource's queue
    Queued,
    /// A close/destroy held back by active holds or an in-flight open
    Deferred,
    /// Handed to its work hook, waiting for completion
    Running,
    /// Completed; callbacks have fired
    Completed,
}

/// Options for [`Request::new`] and [`Request::init`].
pub struct RequestOptions {
    kind: RequestKind,
    resource: Option<Resource>,
    work: Option<WorkFn>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
    done: Option<DoneCallback>,
    data: Option<Box<dyn Any>>,
}

impl RequestOptions {
    /// Options for a request of `kind`
    #[must_use]
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            resource: None,
            work: None,
            before: None,
            after: None,
            done: None,
            data: None,
        }
    }

    /// Options for a user request
    #[must_use]
    pub fn user() -> Self {
        Self::new(RequestKind::User)
    }

    /// The resource the request acts on
    #[must_use]
    pub fn resource(mut self, resource: &Resource) -> Self {
        self.resource = Some(resource.clone());
        self
    }

    /// Work closure for a user request
    #[must_use]
    pub fn work<F>(mut self, work: F) -> Self
    where
        F: FnOnce(Request) + 'static,
    {
        self.work = Some(Box::new(work));
        self
    }

    /// Hook run right before dispatch
    #[must_use]
    pub fn before<F>(mut self, before: F) -> Self
    where
        F: FnOnce(&Request) + 'static,
    {
        self.before = Some(Box::new(before));
        self
    }

    /// Hook run after the terminal callback
    #[must_use]
    pub fn after<F>(mut self, after: F) -> Self
    where
        F: FnOnce(&Request, &Result<()>) + 'static,
    {
        self.after = Some(Box::new(after));
        self
    }

    /// Terminal callback
    #[must_use]
    pub fn done<F>(mut self, done: F) -> Self
    where
        F: FnOnce(&Resource, Result<()>) + 'static,
    {
        self.done = Some(Box::new(done));
        self
    }

    /// Opaque per-request data
    #[must_use]
    pub fn data<T: Any>(mut self, data: T) -> Self {
        self.data = Some(Box::new(data));
        self
    }
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestOptions")
            .field("kind", &self.kind)
            .field("resource", &self.resource.as_ref().map(Resource::id))
            .field("work", &self.work.is_some())
            .field("data", &self.data.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RequestState {
    status: RequestStatus,
    error: Option<Error>,
    // Whether this request is counted in its resource's `pending`.
    counted: bool,
    work: Option<WorkFn>,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
    done: Option<DoneCallback>,
    data: Option<Box<dyn Any>>,
    allocation: Option<Allocation>,
}

struct RequestInner {
    id: u64,
    kind: RequestKind,
    ownership: Ownership,
    resource: Weak<ResourceInner>,
    state: RefCell<RequestState>,
}

/// Handle to a request.
///
/// Hooks receive a clone and keep it until they call [`Request::complete`].
#[derive(Clone)]
pub struct Request {
    inner: Rc<RequestInner>,
}

enum Dispatch {
    Skip,
    Fail(Error),
    Work,
}

impl Request {
    /// Create a library-owned request.
    ///
    /// Its closures and data are dropped right after it completes.
    pub fn new(options: RequestOptions) -> Result<Self> {
        Self::build(options, Ownership::Library)
    }

    /// Create a caller-owned request.
    ///
    /// Its data survives completion so the caller can read it back.
    pub fn init(options: RequestOptions) -> Result<Self> {
        Self::build(options, Ownership::Caller)
    }

    fn build(options: RequestOptions, ownership: Ownership) -> Result<Self> {
        let RequestOptions {
            kind,
            resource,
            work,
            before,
            after,
            done,
            data,
        } = options;
        let resource =
            resource.ok_or_else(|| Error::invalid_argument("request has no resource"))?;

        let allocation = match ownership {
            Ownership::Library => Some(Allocation::track::<RequestInner>(resource.alloc_hook())),
            Ownership::Caller => None,
        };

        Ok(Self {
            inner: Rc::new(RequestInner {
                id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                ownership,
                resource: resource.downgrade(),
                state: RefCell::new(RequestState {
                    work,
                    before,
                    after,
                    done,
                    data,
                    allocation,
                    ..RequestState::default()
                }),
            }),
        })
    }

    /// Process-unique request id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Operation kind
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.inner.kind
    }

    /// Who owns the request
    #[must_use]
    pub fn ownership(&self) -> Ownership {
        self.inner.ownership
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> RequestStatus {
        self.inner.state.borrow().status
    }

    /// Whether the request sits in a queue or is in flight
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status(),
            RequestStatus::Queued | RequestStatus::Deferred | RequestStatus::Running
        )
    }

    /// Recorded error, if any
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.inner.state.borrow().error.clone()
    }

    /// The resource this request acts on, while it exists
    #[must_use]
    pub fn resource(&self) -> Option<Resource> {
        self.inner.resource.upgrade().map(Resource::from_inner)
    }

    /// Whether both handles refer to the same request
    #[must_use]
    pub fn ptr_eq(&self, other: &Request) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn belongs_to(&self, resource: &Resource) -> bool {
        std::ptr::eq(self.inner.resource.as_ptr(), resource.as_ptr())
    }

    pub(crate) fn set_status(&self, status: RequestStatus) {
        self.inner.state.borrow_mut().status = status;
    }

    /// Run `f` against the request data if it is a `T`.
    pub fn with_data<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut data = self.inner.state.borrow_mut().data.take()?;
        let out = data.downcast_mut::<T>().map(f);
        let mut state = self.inner.state.borrow_mut();
        if state.data.is_none() {
            state.data = Some(data);
        }
        out
    }

    /// Take the request data out if it is a `T`.
    pub fn take_data<T: Any>(&self) -> Option<Box<T>> {
        let mut state = self.inner.state.borrow_mut();
        match state.data.take()?.downcast::<T>() {
            Ok(data) => Some(data),
            Err(other) => {
                state.data = Some(other);
                None
            }
        }
    }

    /// Fail the request before it is dispatched.
    ///
    /// When it runs it completes with `error` without doing any work. An
    /// error already recorded is kept.
    pub fn poison(&self, error: Error) -> Result<()> {
        let mut state = self.inner.state.borrow_mut();
        match state.status {
            RequestStatus::Completed => Err(Error::AlreadyCompleted),
            RequestStatus::Running => Err(Error::invalid_argument("request is already running")),
            RequestStatus::Idle | RequestStatus::Queued | RequestStatus::Deferred => {
                if state.error.is_none() {
                    state.error = Some(error);
                }
                Ok(())
            }
        }
    }

    fn count_pending(&self, resource: &Resource) {
        let mut state = self.inner.state.borrow_mut();
        if !state.counted {
            state.counted = true;
            resource.state_mut().pending += 1;
        }
    }

    /// Dispatch the request.
    ///
    /// A request that already carries an error completes with it at once.
    /// A close or destroy is deferred while the resource has active holds
    /// or an open in flight. Otherwise the kind's guard either settles the
    /// request immediately or hands it to the work hook.
    ///
    /// Returns an error only when the core itself failed the request.
    pub fn run(&self) -> Result<()> {
        let resource = self.resource().ok_or(Error::Detached)?;
        let kind = self.inner.kind;

        let (status, poisoned) = {
            let state = self.inner.state.borrow();
            (state.status, state.error.clone())
        };
        match status {
            RequestStatus::Completed => return Err(Error::AlreadyCompleted),
            RequestStatus::Running => {
                return Err(Error::invalid_argument("request is already running"));
            }
            RequestStatus::Idle | RequestStatus::Queued | RequestStatus::Deferred => {}
        }

        if let Some(err) = poisoned {
            self.count_pending(&resource);
            tracing::debug!(
                resource = %resource.id(),
                request = self.id(),
                %kind,
                error = %err,
                "completing failed request without dispatch"
            );
            return self.complete(Err(err));
        }

        if matches!(kind, RequestKind::Close | RequestKind::Destroy) {
            let (actives, opening) = {
                let state = resource.state();
                (state.actives, state.opening)
            };
            if actives > 0 || opening {
                self.count_pending(&resource);
                self.set_status(RequestStatus::Deferred);
                {
                    let mut state = resource.state_mut();
                    if !state.deferred.iter().any(|deferred| deferred.ptr_eq(self)) {
                        state.deferred.push(self.clone());
                    }
                }
                tracing::debug!(
                    resource = %resource.id(),
                    request = self.id(),
                    %kind,
                    actives,
                    opening,
                    "request deferred"
                );
                return Ok(());
            }
        }

        self.count_pending(&resource);
        self.set_status(RequestStatus::Running);
        resource.state_mut().last = Some(Snapshot {
            request: self.id(),
            kind,
        });

        let before = self.inner.state.borrow_mut().before.take();
        if let Some(before) = before {
            before(self);
        }

        let dispatch = {
            let mut state = resource.state_mut();
            match kind {
                RequestKind::Open | RequestKind::User if state.destroyed => {
                    Dispatch::Fail(Error::Destroyed)
                }
                RequestKind::Open if state.opened && !state.needs_open => Dispatch::Skip,
                RequestKind::Open => {
                    state.opening = true;
                    Dispatch::Work
                }
                RequestKind::Close if state.closed || !state.opened => Dispatch::Skip,
                RequestKind::Close => {
                    state.closing = true;
                    Dispatch::Work
                }
                RequestKind::Destroy if state.destroyed => Dispatch::Skip,
                RequestKind::Destroy => {
                    state.destroying = true;
                    Dispatch::Work
                }
                RequestKind::User => Dispatch::Work,
            }
        };

        tracing::debug!(
            resource = %resource.id(),
            request = self.id(),
            %kind,
            "dispatching request"
        );
        match dispatch {
            Dispatch::Skip => self.complete(Ok(())),
            Dispatch::Fail(err) => self.complete(Err(err)),
            Dispatch::Work => {
                self.invoke(&resource);
                Ok(())
            }
        }
    }

    fn invoke(&self, resource: &Resource) {
        let kind = self.inner.kind;
        if kind == RequestKind::User {
            let work = self.inner.state.borrow_mut().work.take();
            if let Some(work) = work {
                work(self.clone());
                return;
            }
        }

        let Some(hooks) = resource.hooks() else {
            if let Err(err) = self.complete(Ok(())) {
                tracing::debug!(request = self.id(), error = %err, "completion rejected");
            }
            return;
        };
        match kind {
            RequestKind::Open => hooks.on_open(self.clone()),
            RequestKind::Close => hooks.on_close(self.clone()),
            RequestKind::Destroy => hooks.on_destroy(self.clone()),
            RequestKind::User => hooks.on_user(self.clone()),
        }
    }

    /// Complete the request with the outcome of its work.
    ///
    /// Must be called exactly once per dispatched request. Returns the
    /// request's final outcome, which differs from `result` when an earlier
    /// error was already recorded. A second call is rejected with
    /// [`Error::AlreadyCompleted`] and has no effect.
    pub fn complete(&self, result: Result<()>) -> Result<()> {
        let Some(resource) = self.resource() else {
            tracing::warn!(request = self.id(), "completion for a detached request");
            return Err(Error::Detached);
        };
        let kind = self.inner.kind;

        let (was_running, counted, outcome) = {
            let mut state = self.inner.state.borrow_mut();
            if state.status == RequestStatus::Completed {
                drop(state);
                tracing::warn!(
                    resource = %resource.id(),
                    request = self.id(),
                    %kind,
                    "request completed twice"
                );
                return Err(Error::AlreadyCompleted);
            }
            if let Err(err) = result {
                if state.error.is_none() {
                    state.error = Some(err);
                }
            }
            let was_running = state.status == RequestStatus::Running;
            state.status = RequestStatus::Completed;
            let counted = std::mem::take(&mut state.counted);
            (was_running, counted, state.error.clone())
        };

        let replay = {
            let mut state = resource.state_mut();

            if let Some(err) = &outcome {
                let victims: Vec<Request> = state
                    .queue
                    .iter()
                    .filter(|queued| !queued.ptr_eq(self))
                    .filter(|queued| match kind {
                        RequestKind::Open => true,
                        RequestKind::Close => queued.kind() == RequestKind::Destroy,
                        RequestKind::Destroy | RequestKind::User => false,
                    })
                    .cloned()
                    .collect();
                for victim in &victims {
                    victim.inherit_error(err);
                }
                if !victims.is_empty() {
                    tracing::debug!(
                        resource = %resource.id(),
                        request = self.id(),
                        %kind,
                        failed = victims.len(),
                        "failure propagated to queued requests"
                    );
                }
            }

            if was_running {
                match kind {
                    RequestKind::Open => state.opening = false,
                    RequestKind::Close => state.closing = false,
                    RequestKind::Destroy => state.destroying = false,
                    RequestKind::User => {}
                }
            }
            if outcome.is_none() {
                match kind {
                    RequestKind::Open => {
                        state.opened = true;
                        state.closed = false;
                        state.needs_open = false;
                    }
                    RequestKind::Close => {
                        state.opened = false;
                        state.closed = true;
                    }
                    RequestKind::Destroy => {
                        state.opened = false;
                        state.closed = true;
                        state.destroyed = true;
                    }
                    RequestKind::User => {}
                }
            }

            state.deferred.retain(|deferred| !deferred.ptr_eq(self));
            if state.queue.front().is_some_and(|head| head.ptr_eq(self)) {
                state.queue.shift();
            }
            if counted {
                state.pending = state.pending.saturating_sub(1);
            }

            kind == RequestKind::Open && was_running && state.actives == 0
        };

        tracing::debug!(
            resource = %resource.id(),
            request = self.id(),
            %kind,
            ok = outcome.is_none(),
            "request completed"
        );

        let result = outcome.map_or(Ok(()), Err);

        let done = self.inner.state.borrow_mut().done.take();
        if let Some(done) = done {
            done(&resource, result.clone());
        }

        let after = self.inner.state.borrow_mut().after.take();
        if let Some(after) = after {
            after(self, &result);
        }

        if self.inner.ownership == Ownership::Library {
            self.release();
        }
        if kind == RequestKind::Destroy
            && result.is_ok()
            && resource.ownership() == Ownership::Library
        {
            resource.release();
        }

        if replay {
            gate::replay_deferred(&resource);
        }
        if resource.state().pending == 0 {
            resource.drain();
        }

        result
    }

    fn inherit_error(&self, error: &Error) {
        let mut state = self.inner.state.borrow_mut();
        if state.status != RequestStatus::Running && state.error.is_none() {
            state.error = Some(error.clone());
        }
    }

    fn release(&self) {
        let released = {
            let mut state = self.inner.state.borrow_mut();
            (
                state.work.take(),
                state.before.take(),
                state.data.take(),
                state.allocation.take(),
            )
        };
        drop(released);
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("ownership", &self.inner.ownership)
            .field("status", &state.status)
            .field("error", &state.error)
            .finish()
    }
}
