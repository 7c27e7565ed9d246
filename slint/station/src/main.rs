use governance_station_runtime::config::parse_positive;
use governance_station_runtime::{
    HostBindings, HostError, LocalAuthority, StationConfig, StationView, Timestamp,
};
use slint::{ModelRc, VecModel};
use std::process;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

slint::include_modules!();

const DEFAULT_PHASE_SECONDS: u64 = 60;
const DEFAULT_CLOCK_STEP_SECONDS: u64 = 30;

struct StationBindings;

impl HostBindings for StationBindings {
    type Ui = AppWindow;

    fn new_ui() -> Result<Self::Ui, slint::PlatformError> {
        AppWindow::new()
    }

    fn bind_create_group<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn() + Send + 'static,
    {
        ui.on_create_group(handler);
    }

    fn bind_close_group<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn() + Send + 'static,
    {
        ui.on_close_group(handler);
    }

    fn bind_advance_time<F>(ui: &Self::Ui, handler: F)
    where
        F: Fn() + Send + 'static,
    {
        ui.on_advance_time(handler);
    }

    fn apply_view(ui: &Self::Ui, view: &StationView) {
        let phase_message = view
            .deadline_message()
            .unwrap_or_else(|| "No active group".to_string());
        let clock_text = view
            .clock_display()
            .unwrap_or_else(|| "--:--:--".to_string());
        let action_error = view
            .last_failure
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        ui.set_phase_message(phase_message.into());
        ui.set_clock_text(clock_text.into());
        ui.set_active_group(view.active_group());
        ui.set_surface_visible(view.display.is_visible());
        ui.set_surface_kind(view.display.kind().into());
        ui.set_surface_url(view.display.url().unwrap_or_default().into());
        ui.set_action_error(action_error.into());

        let rows: Vec<VoteRow> = view
            .votes
            .iter()
            .map(|record| VoteRow {
                time: record.time.to_clock_string().into(),
                proof: record.proof_hash.as_str().into(),
                document: record.document_reference.as_str().into(),
                transaction: record.transaction_reference.as_str().into(),
            })
            .collect();
        ui.set_votes(ModelRc::new(VecModel::from(rows)));
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        error!(error = %err, "governance station fatal error");
        process::exit(1);
    }
}

fn run() -> Result<(), HostError> {
    let config = StationConfig::from_env();
    let lookup = |key: &str| std::env::var(key).ok();
    let phase_seconds =
        parse_positive(&lookup, "GOVERNANCE_PHASE_SECONDS").unwrap_or(DEFAULT_PHASE_SECONDS);
    let clock_step_secs = parse_positive(&lookup, "GOVERNANCE_CLOCK_STEP_SECONDS")
        .unwrap_or(DEFAULT_CLOCK_STEP_SECONDS);

    let started_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);

    info!(
        trusted_origin = %config.trusted_origin,
        admin_url = %config.admin_url,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        phase_seconds,
        clock_step_secs,
        "starting governance station against local authority"
    );

    let authority = Arc::new(LocalAuthority::new(
        Timestamp::from_secs(started_at),
        phase_seconds,
    ));

    governance_station_runtime::run::<StationBindings>(config, authority, clock_step_secs)
}
