pub mod config;
pub mod coordinator;
pub mod gateway;
pub mod ledger;
pub mod local;
pub mod phase;
pub mod protocol;
pub mod remote;
pub mod scheduler;
pub mod subscription;
pub mod surface;

use slint::ComponentHandle;
use std::io;
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::spawn_inbound_reader;

pub use crate::config::StationConfig;
pub use crate::coordinator::{
    ActionFailure, Command, CommandError, Coordinator, CoordinatorHandle, GroupAction, StationView,
};
pub use crate::gateway::{GatewayAction, GatewayError, MessageChannelGateway};
pub use crate::ledger::{VoteLedger, VoteRecord};
pub use crate::local::LocalAuthority;
pub use crate::phase::{DisplayPolicy, Phase, Timestamp};
pub use crate::protocol::InboundMessage;
pub use crate::remote::{RemoteError, RemoteEvent, RemoteStateClient};
pub use crate::surface::DisplayIntent;

pub trait HostBindings: 'static {
    type Ui: ComponentHandle + 'static;

    fn new_ui() -> Result<Self::Ui, slint::PlatformError>;

    fn bind_create_group<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn() + Send + 'static;

    fn bind_close_group<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn() + Send + 'static;

    fn bind_advance_time<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn() + Send + 'static;

    fn apply_view(ui: &Self::Ui, view: &StationView);
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Platform(#[from] slint::PlatformError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("core thread failed: {0}")]
    CoreThread(String),
}

pub fn run<B: HostBindings>(
    config: StationConfig,
    remote: Arc<dyn RemoteStateClient>,
    clock_step_secs: u64,
) -> Result<(), HostError> {
    let ui = B::new_ui()?;
    let ui_weak = ui.as_weak();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_cap.max(1));
    let (coordinator, handle) = Coordinator::new(config, remote, inbound_rx);

    install_callbacks::<B>(&ui, &handle, clock_step_secs);
    B::apply_view(&ui, &handle.view());

    let mut views = handle.watch();
    let core_handle = thread::Builder::new()
        .name("station-core".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let forward = async move {
                    while views.changed().await.is_ok() {
                        let view = views.borrow_and_update().clone();
                        let painted = ui_weak.upgrade_in_event_loop(move |ui| B::apply_view(&ui, &view));
                        if let Err(err) = painted {
                            debug!(error = %err, "UI event loop gone; no longer forwarding views");
                            break;
                        }
                    }
                };

                tokio::join!(coordinator.run(), forward);
            });

            let quit_result = slint::invoke_from_event_loop(|| {
                let _ = slint::quit_event_loop();
            });

            if let Err(err) = quit_result {
                debug!(error = %err, "UI event loop already stopped");
            }
        })?;

    let reader_handle = spawn_inbound_reader(io::stdin(), inbound_tx);

    ui.run()?;

    // Drop UI first so callback closures release their handle clones.
    drop(ui);
    if let Err(err) = handle.shutdown() {
        debug!(error = %err, "shutdown command not queued; waiting for handles to drop");
    }
    drop(handle);

    if core_handle.join().is_err() {
        return Err(HostError::CoreThread("coordinator thread panicked".to_string()));
    }

    if reader_handle.is_finished() {
        match reader_handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "inbound reader returned error"),
            Err(err) => warn!(error = ?err, "inbound reader join failed"),
        }
    } else {
        // Avoid hanging process exit on a blocked stdin read during teardown.
        info!("inbound reader still blocked on stdin during shutdown; skipping join");
    }

    Ok(())
}

fn install_callbacks<B: HostBindings>(ui: &B::Ui, handle: &CoordinatorHandle, clock_step_secs: u64) {
    let create_handle = handle.clone();
    B::bind_create_group(ui, move || send_command(&create_handle, Command::CreateGroup));

    let close_handle = handle.clone();
    B::bind_close_group(ui, move || send_command(&close_handle, Command::CloseGroup));

    let clock_handle = handle.clone();
    B::bind_advance_time(ui, move || {
        send_command(
            &clock_handle,
            Command::AdvanceClock {
                seconds: clock_step_secs,
            },
        )
    });
}

fn send_command(handle: &CoordinatorHandle, command: Command) {
    let name = command.name();

    match handle.send(command) {
        Ok(()) => debug!(command = name, "command queued"),
        // Already counted and logged by the handle.
        Err(CommandError::QueueFull { .. }) => {}
        Err(err @ CommandError::Closed) => warn!(command = name, error = %err, "command not delivered"),
    }
}
