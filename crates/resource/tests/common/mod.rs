//! Shared hooks for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tether_resource::{Error, Hooks, Request, RequestKind, Resource, Result};

/// How a hook answers a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Complete before returning
    Now(Result<()>),
    /// Park the request until the test completes it
    Later,
}

/// Hooks that log every call and answer according to a per-kind script.
#[derive(Clone, Default)]
pub struct Scripted {
    log: Rc<RefCell<Vec<String>>>,
    parked: Rc<RefCell<VecDeque<Request>>>,
    replies: Rc<RefCell<Vec<(RequestKind, Reply)>>>,
}

impl Scripted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `kind` request with `reply` from now on.
    pub fn reply(&self, kind: RequestKind, reply: Reply) -> &Self {
        let mut replies = self.replies.borrow_mut();
        replies.retain(|(k, _)| *k != kind);
        replies.push((kind, reply));
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.log.borrow_mut().push(entry.into());
    }

    /// Handle for callbacks to append to the same log.
    pub fn logger(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.log)
    }

    pub fn parked(&self) -> usize {
        self.parked.borrow().len()
    }

    /// Complete the oldest parked request.
    pub fn complete_next(&self, result: Result<()>) -> Option<Result<()>> {
        let next = self.parked.borrow_mut().pop_front();
        next.map(|request| request.complete(result))
    }

    /// Complete parked requests (and any they lead to) until none remain.
    pub fn settle(&self) -> usize {
        let mut completed = 0;
        loop {
            let next = self.parked.borrow_mut().pop_front();
            let Some(request) = next else {
                break;
            };
            let _ = request.complete(Ok(()));
            completed += 1;
        }
        completed
    }

    fn answer(&self, name: &str, request: Request) {
        self.push(format!("hook:{name}"));
        let reply = self
            .replies
            .borrow()
            .iter()
            .find(|(kind, _)| *kind == request.kind())
            .map(|(_, reply)| reply.clone())
            .unwrap_or(Reply::Now(Ok(())));
        match reply {
            Reply::Now(result) => {
                let _ = request.complete(result);
            }
            Reply::Later => self.parked.borrow_mut().push_back(request),
        }
    }
}

impl Hooks for Scripted {
    fn on_open(&self, request: Request) {
        self.answer("open", request);
    }

    fn on_close(&self, request: Request) {
        self.answer("close", request);
    }

    fn on_destroy(&self, request: Request) {
        self.answer("destroy", request);
    }

    fn on_user(&self, request: Request) {
        self.answer("user", request);
    }
}

/// Terminal callback that logs `name:ok` or `name:<errno>`.
pub fn record(
    log: &Rc<RefCell<Vec<String>>>,
    name: &'static str,
) -> impl FnOnce(&Resource, Result<()>) + 'static {
    let log = Rc::clone(log);
    move |_, result| log.borrow_mut().push(outcome(name, &result))
}

pub fn outcome(name: &str, result: &Result<()>) -> String {
    match result {
        Ok(()) => format!("{name}:ok"),
        Err(err) => format!("{name}:{}", err.errno()),
    }
}

pub fn io_error() -> Error {
    Error::failed(libc::EIO, "device unavailable")
}
