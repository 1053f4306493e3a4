//! `tether-watch`: open a file as a tether resource, watch it for a number of
//! changes, then destroy it.
//!
//! Hooks run their work on worker threads. Resource and request handles
//! never leave the main thread; workers send their outcome back over a
//! channel and the main loop completes the matching request.

mod config;
mod hooks;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::Parser;
use crossbeam::channel::{self, RecvTimeoutError};
use tether_resource::{Request, RequestOptions, Resource, ResourceOptions};

use crate::config::{LogOverrides, Overrides, WatchConfig};
use crate::hooks::{FileHooks, Message, WatchContext};

#[derive(Parser, Debug)]
#[command(name = "tether-watch", version, about = "Watch a file for changes")]
struct Cli {
    /// File to watch
    path: PathBuf,

    /// Configuration file
    #[arg(long, default_value = "tether.toml")]
    config: PathBuf,

    /// Changes to observe before finishing
    #[arg(short = 'n', long)]
    changes: Option<usize>,

    /// Seconds to wait for each change
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Log filter directive, e.g. `debug` or `tether_resource=trace`
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: compact, pretty, json
    #[arg(long)]
    log_format: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            changes: self.changes,
            timeout_secs: self.timeout_secs,
            log: LogOverrides {
                level: self.log_level.clone(),
                format: self.log_format.as_deref().map(tether_log::Format::parse_lossy),
            },
        }
    }
}

type Outcome = Rc<RefCell<Option<tether_resource::Result<()>>>>;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = config::load(&cli.config, cli.overrides())
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.resource.validate()?;
    if config.log.fields.service.is_none() {
        config.log.fields.service = Some("tether-watch".to_string());
    }

    let _log = tether_log::init(config.log.clone())?;
    tracing::info!(
        version = %tether_resource::version::string(),
        path = %cli.path.display(),
        "starting"
    );

    run(&cli.path, &config)
}

fn run(path: &Path, config: &WatchConfig) -> anyhow::Result<()> {
    let (tx, rx) = channel::unbounded();
    let hooks = Rc::new(FileHooks::new(path, tx));
    let resource = Resource::new(
        ResourceOptions::new()
            .config(config.resource.clone())
            .shared_hooks(hooks.clone()),
    )?;

    let outcome: Outcome = Rc::default();
    let timeout = Duration::from_secs(config.timeout_secs);
    let changes = config.changes;

    let on_open = Rc::clone(&outcome);
    resource.open(move |resource, result| {
        if let Err(err) = result {
            tracing::error!(error = %err, "open failed");
            *on_open.borrow_mut() = Some(Err(err));
            return;
        }
        if let Err(err) = start_watch(resource, changes, timeout, &on_open) {
            *on_open.borrow_mut() = Some(Err(err));
        }
    })?;

    // Leave room for every change plus the lifecycle round trips.
    let rounds = u32::try_from(changes).unwrap_or(u32::MAX).saturating_add(2);
    let stall = timeout.saturating_mul(rounds);
    while outcome.borrow().is_none() {
        match rx.recv_timeout(stall) {
            Ok(Message::Completed { request, result }) => {
                let Some(request) = hooks.take(request) else {
                    tracing::warn!(request, "completion for an unknown request");
                    continue;
                };
                if let Err(err) = request.complete(result) {
                    tracing::debug!(request = request.id(), error = %err, "request failed");
                }
            }
            Ok(Message::Changed { path, len }) => {
                tracing::info!(path = %path.display(), ?len, "changed");
            }
            Err(RecvTimeoutError::Timeout) => {
                bail!(
                    "no progress for {}s ({} requests in flight)",
                    stall.as_secs(),
                    hooks.in_flight()
                );
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    hooks.join();
    let result = outcome.borrow_mut().take();
    match result {
        Some(Ok(())) => {
            tracing::info!("done");
            Ok(())
        }
        Some(Err(err)) => Err(err).context("watch failed"),
        None => bail!("worker channel closed"),
    }
}

/// Queue the watch request. Its `done` callback destroys the resource.
fn start_watch(
    resource: &Resource,
    changes: usize,
    timeout: Duration,
    outcome: &Outcome,
) -> tether_resource::Result<()> {
    let on_done = Rc::clone(outcome);
    let request = Request::new(
        RequestOptions::user()
            .resource(resource)
            .data(WatchContext {
                changes,
                timeout,
                guard: None,
            })
            .before(|request| {
                let Some(resource) = request.resource() else {
                    return;
                };
                match resource.hold() {
                    Ok(guard) => {
                        request.with_data(|ctx: &mut WatchContext| ctx.guard = Some(guard));
                    }
                    Err(err) => tracing::warn!(error = %err, "watch runs without an active hold"),
                }
            })
            .done(move |resource, result| {
                match &result {
                    Ok(()) => tracing::info!("watch finished"),
                    Err(err) => tracing::warn!(error = %err, "watch failed"),
                }
                let on_destroy = Rc::clone(&on_done);
                let queued = resource.destroy(move |_, destroyed| {
                    tracing::info!(ok = destroyed.is_ok(), "destroyed");
                    *on_destroy.borrow_mut() = Some(result.and(destroyed));
                });
                if let Err(err) = queued {
                    *on_done.borrow_mut() = Some(Err(err));
                }
            })
            .after(|request, _| {
                // Dropping the context releases the hold; a close waiting on
                // it runs now.
                if request.take_data::<WatchContext>().is_some() {
                    tracing::debug!("active hold released");
                }
            }),
    )?;
    request.run()
}
