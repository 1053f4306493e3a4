//! Active/inactive gating.
//!
//! While a resource has outstanding active holds, close and destroy requests
//! are deferred instead of dispatched. Releasing the last hold replays them.

use crate::error::{Error, Result};
use crate::request::RequestStatus;
use crate::resource::Resource;

impl Resource {
    /// Take an active hold.
    ///
    /// Fails with [`Error::Retry`] while a close is in flight and with
    /// [`Error::Locked`] once the resource is closed.
    pub fn active(&self) -> Result<()> {
        let actives = {
            let mut state = self.state_mut();
            if state.closing {
                return Err(Error::Retry);
            }
            if state.closed {
                return Err(Error::Locked);
            }
            state.actives += 1;
            state.actives
        };
        tracing::trace!(resource = %self.id(), actives, "active hold taken");
        Ok(())
    }

    /// Release an active hold.
    ///
    /// When the last hold goes away, deferred close and destroy requests are
    /// dispatched. Returns how many of them left the deferred state. Calling
    /// it with no hold outstanding does nothing.
    pub fn inactive(&self) -> usize {
        let actives = {
            let mut state = self.state_mut();
            if state.actives == 0 {
                return 0;
            }
            state.actives -= 1;
            state.actives
        };
        tracing::trace!(resource = %self.id(), actives, "active hold released");

        if actives == 0 {
            replay_deferred(self)
        } else {
            0
        }
    }

    /// Take an active hold released when the guard drops.
    pub fn hold(&self) -> Result<ActiveGuard> {
        self.active()?;
        Ok(ActiveGuard {
            resource: Some(self.clone()),
        })
    }
}

/// RAII form of [`Resource::active`] / [`Resource::inactive`].
#[derive(Debug)]
#[must_use = "the hold is released as soon as the guard is dropped"]
pub struct ActiveGuard {
    resource: Option<Resource>,
}

impl ActiveGuard {
    /// Release the hold now, returning how many deferred requests resumed.
    pub fn release(mut self) -> usize {
        self.resource.take().map_or(0, |resource| resource.inactive())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            resource.inactive();
        }
    }
}

/// Re-run close/destroy requests that are still deferred, whether they sit
/// in the queue or were run directly.
///
/// Returns the number that left the deferred state.
pub(crate) fn replay_deferred(resource: &Resource) -> usize {
    let deferred = std::mem::take(&mut resource.state_mut().deferred);

    let mut resumed = 0;
    for request in deferred {
        // A request run earlier in this loop may have completed it.
        if request.status() != RequestStatus::Deferred {
            continue;
        }
        if let Err(err) = request.run() {
            tracing::debug!(
                resource = %resource.id(),
                request = request.id(),
                error = %err,
                "replayed request failed"
            );
        }
        if request.status() != RequestStatus::Deferred {
            resumed += 1;
        }
    }

    if resumed > 0 {
        tracing::debug!(resource = %resource.id(), resumed, "deferred requests resumed");
    }
    resumed
}
