use std::collections::VecDeque;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::StationConfig;
use crate::gateway::{GatewayAction, MessageChannelGateway, VoteSubmission};
use crate::ledger::{VoteLedger, VoteRecord};
use crate::phase::{DisplayPolicy, Phase, Timestamp};
use crate::protocol::InboundMessage;
use crate::remote::{RemoteError, RemoteSnapshot, RemoteStateClient, read_snapshot};
use crate::scheduler::{ExecutionScheduler, TriggerDecision};
use crate::subscription::EventSubscriptionManager;
use crate::surface::{DisplayIntent, EmbeddedViewCoordinator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    Create,
    Close,
    AdvanceClock,
}

impl fmt::Display for GroupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupAction::Create => "create group",
            GroupAction::Close => "close group",
            GroupAction::AdvanceClock => "advance time",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    pub action: GroupAction,
    pub message: String,
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to {}: {}", self.action, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StationView {
    pub phase: Phase,
    pub next_trigger: Option<Timestamp>,
    pub remote_clock: Option<Timestamp>,
    pub display: DisplayIntent,
    pub votes: Arc<Vec<VoteRecord>>,
    pub polling: bool,
    pub last_failure: Option<ActionFailure>,
}

impl StationView {
    pub fn active_group(&self) -> bool {
        self.phase.is_active()
    }

    pub fn deadline_message(&self) -> Option<String> {
        self.next_trigger
            .and_then(|next_trigger| self.phase.deadline_message(next_trigger))
    }

    pub fn clock_display(&self) -> Option<String> {
        self.remote_clock.map(Timestamp::to_clock_string)
    }
}

pub enum Command {
    CreateGroup,
    CloseGroup,
    AdvanceClock { seconds: u64 },
    Refresh,
    ReplaceRemote(Arc<dyn RemoteStateClient>),
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateGroup => "create_group",
            Command::CloseGroup => "close_group",
            Command::AdvanceClock { .. } => "advance_clock",
            Command::Refresh => "refresh",
            Command::ReplaceRemote(_) => "replace_remote",
            Command::Shutdown => "shutdown",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AdvanceClock { seconds } => {
                f.debug_struct("AdvanceClock").field("seconds", seconds).finish()
            }
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("command queue full; dropped {command}")]
    QueueFull { command: &'static str },

    #[error("coordinator has stopped")]
    Closed,
}

#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<StationView>,
    dropped_commands: Arc<AtomicU64>,
}

impl CoordinatorHandle {
    pub fn send(&self, command: Command) -> Result<(), CommandError> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                let dropped = self.dropped_commands.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped.is_power_of_two() {
                    warn!(
                        command = command.name(),
                        dropped, "command queue full; dropping command"
                    );
                }
                Err(CommandError::QueueFull {
                    command: command.name(),
                })
            }
            Err(TrySendError::Closed(_)) => Err(CommandError::Closed),
        }
    }

    pub fn create_group(&self) -> Result<(), CommandError> {
        self.send(Command::CreateGroup)
    }

    pub fn close_group(&self) -> Result<(), CommandError> {
        self.send(Command::CloseGroup)
    }

    pub fn advance_clock(&self, seconds: u64) -> Result<(), CommandError> {
        self.send(Command::AdvanceClock { seconds })
    }

    pub fn refresh(&self) -> Result<(), CommandError> {
        self.send(Command::Refresh)
    }

    pub fn replace_remote(&self, remote: Arc<dyn RemoteStateClient>) -> Result<(), CommandError> {
        self.send(Command::ReplaceRemote(remote))
    }

    pub fn shutdown(&self) -> Result<(), CommandError> {
        self.send(Command::Shutdown)
    }

    pub fn view(&self) -> StationView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<StationView> {
        self.view.clone()
    }

    pub fn dropped_commands(&self) -> u64 {
        self.dropped_commands.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteAction {
    Refresh,
    Poll,
    Advance { trigger: Timestamp },
    Create,
    Close,
    AdvanceClock { seconds: u64 },
}

impl RemoteAction {
    fn group_action(self) -> Option<GroupAction> {
        match self {
            RemoteAction::Create => Some(GroupAction::Create),
            RemoteAction::Close => Some(GroupAction::Close),
            RemoteAction::AdvanceClock { .. } => Some(GroupAction::AdvanceClock),
            RemoteAction::Refresh | RemoteAction::Poll | RemoteAction::Advance { .. } => None,
        }
    }
}

#[derive(Debug)]
struct TaskReport {
    action: RemoteAction,
    // The authority confirmed the submit; the re-read may still have failed.
    submitted: bool,
    result: Result<RemoteSnapshot, RemoteError>,
}

async fn execute(remote: Arc<dyn RemoteStateClient>, action: RemoteAction) -> TaskReport {
    let submitted = match submit(remote.as_ref(), action).await {
        Ok(submitted) => submitted,
        Err(err) => {
            return TaskReport {
                action,
                submitted: false,
                result: Err(err),
            };
        }
    };

    TaskReport {
        action,
        submitted,
        result: read_snapshot(remote.as_ref()).await,
    }
}

async fn submit(remote: &dyn RemoteStateClient, action: RemoteAction) -> Result<bool, RemoteError> {
    match action {
        RemoteAction::Refresh | RemoteAction::Poll => return Ok(false),
        RemoteAction::Advance { .. } => remote.submit_advance().await?,
        RemoteAction::Create => remote.submit_create().await?,
        RemoteAction::Close => remote.submit_close().await?,
        RemoteAction::AdvanceClock { seconds } => remote.advance_clock(seconds).await?,
    }

    Ok(true)
}

#[derive(Debug, Clone, Copy)]
struct ClockReading {
    remote: Timestamp,
    observed_at: Instant,
}

impl ClockReading {
    fn estimate_now(&self) -> Timestamp {
        self.remote
            .saturating_add_secs(self.observed_at.elapsed().as_secs())
    }
}

#[derive(Debug, Default)]
struct RemoteMirror {
    phase: Phase,
    next_trigger: Option<Timestamp>,
    clock: Option<ClockReading>,
}

pub struct Coordinator {
    remote: Arc<dyn RemoteStateClient>,
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Receiver<InboundMessage>,
    inbound_open: bool,
    view_tx: watch::Sender<StationView>,
    mirror: RemoteMirror,
    scheduler: ExecutionScheduler,
    subscriptions: EventSubscriptionManager,
    surfaces: EmbeddedViewCoordinator,
    gateway: MessageChannelGateway,
    ledger: VoteLedger,
    in_flight: JoinSet<TaskReport>,
    current: Option<RemoteAction>,
    queued: VecDeque<RemoteAction>,
    last_failure: Option<ActionFailure>,
}

impl Coordinator {
    pub fn new(
        config: StationConfig,
        remote: Arc<dyn RemoteStateClient>,
        inbound: mpsc::Receiver<InboundMessage>,
    ) -> (Self, CoordinatorHandle) {
        let (command_tx, commands) = mpsc::channel(config.command_queue_cap.max(1));
        let (view_tx, view_rx) = watch::channel(StationView::default());

        let coordinator = Self {
            remote,
            commands,
            inbound,
            inbound_open: true,
            view_tx,
            mirror: RemoteMirror::default(),
            scheduler: ExecutionScheduler::new(config.poll_interval),
            subscriptions: EventSubscriptionManager::new(),
            surfaces: EmbeddedViewCoordinator::new(config.admin_url),
            gateway: MessageChannelGateway::new(config.trusted_origin),
            ledger: VoteLedger::new(),
            in_flight: JoinSet::new(),
            current: None,
            queued: VecDeque::new(),
            last_failure: None,
        };

        let handle = CoordinatorHandle {
            commands: command_tx,
            view: view_rx,
            dropped_commands: Arc::new(AtomicU64::new(0)),
        };

        (coordinator, handle)
    }

    pub async fn run(mut self) {
        if let Err(err) = self.subscriptions.activate(self.remote.clone()) {
            warn!(error = %err, "could not subscribe to embedded view notifications");
        }
        self.start(RemoteAction::Refresh);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("all coordinator handles dropped");
                        break;
                    };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                () = self.scheduler.tick() => self.on_tick(),
                event = self.subscriptions.next_event() => {
                    info!(event = event.name(), "embedded view notification");
                    self.surfaces.set_visible(event.visible());
                }
                message = self.inbound.recv(), if self.inbound_open => match message {
                    Some(message) => self.on_inbound(message),
                    None => {
                        self.inbound_open = false;
                        info!("inbound message channel closed");
                    }
                },
                Some(joined) = self.in_flight.join_next() => self.on_task_finished(joined),
            }

            self.publish();
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        debug!(?command, "command received");

        match command {
            Command::CreateGroup => self.start(RemoteAction::Create),
            Command::CloseGroup => self.start(RemoteAction::Close),
            Command::AdvanceClock { seconds } => self.start(RemoteAction::AdvanceClock { seconds }),
            Command::Refresh => self.start(RemoteAction::Refresh),
            Command::ReplaceRemote(remote) => self.replace_remote(remote),
            Command::Shutdown => return ControlFlow::Break(()),
        }

        ControlFlow::Continue(())
    }

    fn start(&mut self, action: RemoteAction) {
        if !self.in_flight.is_empty() {
            debug!(?action, queued = self.queued.len() + 1, "remote call queued");
            self.queued.push_back(action);
            return;
        }

        debug!(?action, "remote call started");
        self.current = Some(action);
        self.in_flight.spawn(execute(self.remote.clone(), action));
    }

    fn start_queued(&mut self) {
        if !self.in_flight.is_empty() {
            return;
        }

        if let Some(action) = self.queued.pop_front() {
            self.start(action);
        }
    }

    fn on_tick(&mut self) {
        if !self.in_flight.is_empty() {
            self.scheduler.tick_skipped();
            return;
        }

        self.start(RemoteAction::Poll);
    }

    fn on_task_finished(&mut self, joined: Result<TaskReport, JoinError>) {
        self.current = None;

        match joined {
            Ok(report) => self.on_report(report),
            Err(err) if err.is_cancelled() => debug!("remote call cancelled"),
            Err(err) => error!(error = %err, "remote call task failed"),
        }

        self.start_queued();
    }

    fn on_report(&mut self, report: TaskReport) {
        let TaskReport {
            action,
            submitted,
            result,
        } = report;

        if submitted {
            self.on_confirmed(action);
        }

        match result {
            Ok(snapshot) => {
                self.apply_snapshot(snapshot);

                match action {
                    RemoteAction::Poll => self.on_poll(snapshot),
                    RemoteAction::Advance { .. } => {
                        let policy = snapshot.phase.display_policy();
                        self.surfaces.set_visible(policy != DisplayPolicy::None);
                    }
                    _ => {}
                }
            }
            Err(err) => match action {
                RemoteAction::Poll => self.scheduler.poll_failed(&err),
                RemoteAction::Advance { trigger } if !submitted => {
                    self.scheduler.advance_failed(trigger, &err)
                }
                _ if !submitted => match action.group_action() {
                    Some(group_action) => self.action_failed(group_action, err),
                    None => warn!(?action, error = %err, "remote read failed"),
                },
                _ => warn!(?action, error = %err, "re-read after confirmed submit failed"),
            },
        }
    }

    fn on_confirmed(&mut self, action: RemoteAction) {
        if action.group_action().is_some() {
            self.last_failure = None;
        }

        match action {
            RemoteAction::Create => {
                self.surfaces.clear_voting_url();
                info!("group created");
            }
            RemoteAction::Close => {
                self.ledger.clear();
                self.surfaces.clear_voting_url();
                self.scheduler.reset_guard();
                info!("group closed; vote records cleared");
            }
            RemoteAction::Advance { trigger } => info!(%trigger, "advance confirmed"),
            RemoteAction::AdvanceClock { seconds } => info!(seconds, "remote clock advanced"),
            RemoteAction::Refresh | RemoteAction::Poll => {}
        }
    }

    fn action_failed(&mut self, action: GroupAction, err: RemoteError) {
        error!(%action, error = %err, "user action failed");
        self.last_failure = Some(ActionFailure {
            action,
            message: err.to_string(),
        });
    }

    fn apply_snapshot(&mut self, snapshot: RemoteSnapshot) {
        if snapshot.phase != self.mirror.phase {
            info!(
                from = %self.mirror.phase,
                to = %snapshot.phase,
                next_trigger = %snapshot.next_trigger,
                "phase changed"
            );
        }

        self.mirror = RemoteMirror {
            phase: snapshot.phase,
            next_trigger: Some(snapshot.next_trigger),
            clock: Some(ClockReading {
                remote: snapshot.clock,
                observed_at: Instant::now(),
            }),
        };

        self.scheduler.sync_activity(snapshot.phase.is_active());
        self.surfaces.set_policy(snapshot.phase.display_policy());
    }

    fn on_poll(&mut self, snapshot: RemoteSnapshot) {
        // The group may have gone idle while the poll was outstanding.
        if !self.scheduler.is_polling() {
            return;
        }

        if self.scheduler.observe(snapshot.clock, snapshot.next_trigger) == TriggerDecision::Due {
            self.start(RemoteAction::Advance {
                trigger: snapshot.next_trigger,
            });
        }
    }

    fn on_inbound(&mut self, message: InboundMessage) {
        match self.gateway.route(&message) {
            Some(GatewayAction::SetVotingUrl(url)) => {
                info!(%url, "voting url received");
                self.surfaces.set_voting_url(url);
            }
            Some(GatewayAction::RecordVote(vote)) => self.record_vote(vote),
            None => {}
        }
    }

    fn record_vote(&mut self, vote: VoteSubmission) {
        let time = self
            .mirror
            .clock
            .map(|reading| reading.estimate_now())
            .unwrap_or_else(local_now);

        self.ledger.append(VoteRecord {
            time,
            document_reference: vote.document_reference,
            proof_hash: vote.proof_hash,
            transaction_reference: vote.transaction_reference,
        });
        info!(%time, records = self.ledger.len(), "vote recorded");
    }

    fn replace_remote(&mut self, remote: Arc<dyn RemoteStateClient>) {
        if let Some(RemoteAction::Advance { trigger }) = self.current {
            self.scheduler.advance_failed(
                trigger,
                &RemoteError::Unavailable("remote handle replaced".to_string()),
            );
        }
        if let Some(action) = self.current.take() {
            warn!(?action, "abandoning remote call on replaced handle");
        }
        self.in_flight.abort_all();

        self.remote = remote;
        if let Err(err) = self.subscriptions.activate(self.remote.clone()) {
            warn!(error = %err, "could not subscribe on replaced remote");
        }
        self.start(RemoteAction::Refresh);
    }

    fn view(&self) -> StationView {
        StationView {
            phase: self.mirror.phase,
            next_trigger: self.mirror.next_trigger,
            remote_clock: self.mirror.clock.map(|reading| reading.remote),
            display: self.surfaces.intent(),
            votes: self.ledger.shared(),
            polling: self.scheduler.is_polling(),
            last_failure: self.last_failure.clone(),
        }
    }

    fn publish(&self) {
        let view = self.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn teardown(&mut self) {
        self.in_flight.abort_all();
        self.queued.clear();
        self.current = None;
        self.scheduler.stop();
        self.subscriptions.deactivate();
        info!(
            accepted = self.gateway.stats().accepted,
            untrusted = self.gateway.stats().untrusted,
            malformed = self.gateway.stats().malformed,
            failed_polls = self.scheduler.failed_polls(),
            skipped_ticks = self.scheduler.skipped_ticks(),
            "coordinator stopped"
        );
    }
}

fn local_now() -> Timestamp {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    Timestamp::from_secs(secs)
}
