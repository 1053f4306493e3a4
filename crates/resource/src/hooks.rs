//! Work hooks supplied by the embedding application.
//!
//! The core never performs I/O. When a request is dispatched it hands the
//! [`Request`] to one of these methods, and the implementation must call
//! [`Request::complete`] exactly once: either before returning, or later
//! from the same thread of control (a worker's result marshalled back onto
//! the owning thread, an event-loop tick, ...).
//!
//! Every method defaults to completing synchronously with success, which is
//! how a resource without an open/close/destroy hook behaves.

use crate::request::Request;

/// Lifecycle work supplied by the embedding application.
pub trait Hooks {
    /// Open the underlying resource.
    fn on_open(&self, request: Request) {
        finish(&request);
    }

    /// Close the underlying resource.
    fn on_close(&self, request: Request) {
        finish(&request);
    }

    /// Tear down the underlying resource for good.
    fn on_destroy(&self, request: Request) {
        finish(&request);
    }

    /// Run a user-defined operation that carries no work closure of its own.
    fn on_user(&self, request: Request) {
        finish(&request);
    }
}

/// Hooks that complete every request immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl Hooks for NoHooks {}

fn finish(request: &Request) {
    if let Err(err) = request.complete(Ok(())) {
        tracing::debug!(request = request.id(), error = %err, "default hook completion rejected");
    }
}
