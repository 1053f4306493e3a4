//! File hooks: every request is forwarded to a worker thread, and the
//! outcome comes back to the main thread as a [`Message`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tether_resource::{ActiveGuard, Error, Hooks, Request};

/// Worker → main thread traffic.
#[derive(Debug)]
pub enum Message {
    /// The work for request `request` finished
    Completed {
        /// Request id
        request: u64,
        /// Outcome to pass to [`Request::complete`]
        result: tether_resource::Result<()>,
    },
    /// The watched file changed
    Changed {
        /// Watched path
        path: PathBuf,
        /// File length after the change, if it could be read
        len: Option<u64>,
    },
}

/// Data carried by the watch request.
#[derive(Debug)]
pub struct WatchContext {
    /// Changes to observe before completing
    pub changes: usize,
    /// Wait for each change
    pub timeout: Duration,
    /// Active hold on the resource for the duration of the watch
    pub guard: Option<ActiveGuard>,
}

/// Hooks watching one file.
#[derive(Debug)]
pub struct FileHooks {
    path: PathBuf,
    tx: Sender<Message>,
    inflight: RefCell<HashMap<u64, Request>>,
    workers: RefCell<Vec<JoinHandle<()>>>,
}

impl FileHooks {
    /// Hooks for `path`, reporting to `tx`
    pub fn new(path: impl Into<PathBuf>, tx: Sender<Message>) -> Self {
        Self {
            path: path.into(),
            tx,
            inflight: RefCell::default(),
            workers: RefCell::default(),
        }
    }

    /// Claim the in-flight request with `id`.
    pub fn take(&self, id: u64) -> Option<Request> {
        self.inflight.borrow_mut().remove(&id)
    }

    /// Requests handed to a worker and not yet claimed
    pub fn in_flight(&self) -> usize {
        self.inflight.borrow().len()
    }

    /// Wait for every worker thread.
    pub fn join(&self) {
        let workers: Vec<_> = self.workers.borrow_mut().drain(..).collect();
        for worker in workers {
            let name = worker.thread().name().map(str::to_owned);
            if worker.join().is_err() {
                tracing::warn!(thread = ?name, "worker panicked");
            }
        }
    }

    fn forward<F>(&self, request: Request, name: &str, work: F)
    where
        F: FnOnce(&Sender<Message>) -> tether_resource::Result<()> + Send + 'static,
    {
        let id = request.id();
        self.inflight.borrow_mut().insert(id, request);

        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("tether-{name}"))
            .spawn(move || {
                let result = work(&tx);
                // The receiver only goes away once the main loop has finished.
                let _ = tx.send(Message::Completed { request: id, result });
            });

        match spawned {
            Ok(worker) => self.workers.borrow_mut().push(worker),
            Err(err) => {
                tracing::error!(error = %err, "failed to spawn worker");
                if let Some(request) = self.take(id) {
                    let _ = request.complete(Err(err.into()));
                }
            }
        }
    }
}

impl Hooks for FileHooks {
    fn on_open(&self, request: Request) {
        let path = self.path.clone();
        self.forward(request, "open", move |_| {
            tracing::debug!(path = %path.display(), "opening");
            let metadata = std::fs::metadata(&path)?;
            if !metadata.is_file() {
                let err = io::Error::new(io::ErrorKind::InvalidInput, "not a regular file");
                return Err(err.into());
            }
            tracing::info!(path = %path.display(), len = metadata.len(), "opened");
            Ok(())
        });
    }

    fn on_close(&self, request: Request) {
        let path = self.path.clone();
        self.forward(request, "close", move |_| {
            tracing::debug!(path = %path.display(), "closing");
            Ok(())
        });
    }

    fn on_destroy(&self, request: Request) {
        let path = self.path.clone();
        self.forward(request, "destroy", move |_| {
            tracing::debug!(path = %path.display(), "destroying");
            Ok(())
        });
    }

    fn on_user(&self, request: Request) {
        let Some((changes, timeout)) =
            request.with_data(|ctx: &mut WatchContext| (ctx.changes, ctx.timeout))
        else {
            let _ = request.complete(Err(Error::invalid_argument("watch request without context")));
            return;
        };
        let path = self.path.clone();
        self.forward(request, "watch", move |tx| watch(&path, changes, timeout, tx));
    }
}

/// Block until `changes` modifications of `path` were seen.
fn watch(
    path: &Path,
    changes: usize,
    timeout: Duration,
    tx: &Sender<Message>,
) -> tether_resource::Result<()> {
    let (events_tx, events) = channel::unbounded();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
        let _ = events_tx.send(event);
    })
    .map_err(io::Error::other)?;
    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(io::Error::other)?;
    tracing::info!(path = %path.display(), changes, "watching");

    let mut seen = 0;
    while seen < changes {
        match events.recv_timeout(timeout) {
            Ok(Ok(event)) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    seen += 1;
                    let len = std::fs::metadata(path).map(|m| m.len()).ok();
                    let _ = tx.send(Message::Changed {
                        path: path.to_path_buf(),
                        len,
                    });
                }
            }
            Ok(Err(err)) => return Err(io::Error::other(err).into()),
            Err(RecvTimeoutError::Timeout) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no change within {}s", timeout.as_secs()),
                )
                .into());
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}
