//! Threaded coordinator service
//!
//! Runs a coordinator on its own thread and feeds it over a channel, for
//! hosts that cannot own the coordinator on their UI thread. Ports are built
//! inside the thread, so they do not need to be `Send`.

use std::thread::{self, JoinHandle};
use std::time::Instant;

use atmos_types::ProducerConfig;
use tokio::sync::mpsc::{self, Sender, error::TryRecvError};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::CoordinatorConfig;
use crate::coordinator::{Coordinator, Ports, ViewSnapshot};
use crate::ports::HostHandle;
use crate::timer::VirtualTimer;

/// Commands accepted by the service thread.
#[derive(Debug)]
pub enum CoordinatorCommand {
    Register {
        owner_id: String,
        producer_id: String,
        config: ProducerConfig,
        host: HostHandle,
        is_preview: Option<bool>,
    },
    Unregister {
        owner_id: String,
        producer_id: String,
        is_preview: Option<bool>,
    },
    /// Run a pass immediately
    ForceUpdate,
    /// Request the active view count via oneshot channel
    ActiveViews(oneshot::Sender<usize>),
    /// Request per-view diagnostics via oneshot channel
    Snapshot(oneshot::Sender<Vec<ViewSnapshot>>),
    /// Dispose everything and stop the thread
    Shutdown,
}

pub struct CoordinatorHandle {
    pub tx: Sender<CoordinatorCommand>,
    pub handle: JoinHandle<()>,
}

/// Spawn the service. `build` receives the timer the coordinator must be
/// given and returns the host ports.
///
/// The virtual timer is driven from a monotonic clock once per tick; the
/// thread exits on [`CoordinatorCommand::Shutdown`] or when every sender
/// is dropped.
pub fn spawn_coordinator<F>(config: CoordinatorConfig, build: F) -> CoordinatorHandle
where
    F: FnOnce(VirtualTimer) -> Ports + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<CoordinatorCommand>(32);

    let handle = thread::spawn(move || {
        let timer = VirtualTimer::new();
        let mut coordinator = Coordinator::new(&config, build(timer.clone()));
        let started = Instant::now();
        let tick = config.service_tick();
        info!(tick_ms = tick.as_millis(), "Coordinator service started");

        loop {
            // Process all pending commands
            loop {
                match rx.try_recv() {
                    Ok(CoordinatorCommand::Shutdown) => {
                        coordinator.shutdown();
                        return;
                    }
                    Ok(cmd) => handle_command(&mut coordinator, cmd),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        debug!("All senders dropped, stopping coordinator service");
                        coordinator.shutdown();
                        return;
                    }
                }
            }

            let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            timer.run_until(elapsed, |handle| coordinator.on_timer(handle));

            thread::sleep(tick);
        }
    });

    CoordinatorHandle { tx, handle }
}

fn handle_command(coordinator: &mut Coordinator, cmd: CoordinatorCommand) {
    match cmd {
        CoordinatorCommand::Register {
            owner_id,
            producer_id,
            config,
            host,
            is_preview,
        } => coordinator.register(&owner_id, &producer_id, config, host, is_preview),
        CoordinatorCommand::Unregister {
            owner_id,
            producer_id,
            is_preview,
        } => coordinator.unregister(&owner_id, &producer_id, is_preview),
        CoordinatorCommand::ForceUpdate => coordinator.force_update(),
        CoordinatorCommand::ActiveViews(response_tx) => {
            let _ = response_tx.send(coordinator.active_view_count());
        }
        CoordinatorCommand::Snapshot(response_tx) => {
            let _ = response_tx.send(coordinator.snapshot());
        }
        CoordinatorCommand::Shutdown => coordinator.shutdown(),
    }
}
