//! Per-invocation state

use tracing_appender::non_blocking::WorkerGuard;

use crate::app::options::GlobalOptions;
use crate::cancel::Cancellation;
use crate::errors::ShipError;
use crate::logs::{init_logging, LogOptions};
use crate::storage::layout::AppLayout;
use crate::storage::settings::Settings;

/// Everything one invocation of either binary shares
pub struct AppState {
    pub settings: Settings,
    pub cancel: Cancellation,

    // flushes the log file on drop
    _log_guard: Option<WorkerGuard>,
}

impl AppState {
    /// Load settings, start logging and listen for shutdown signals
    pub async fn init(global: &GlobalOptions) -> Result<Self, ShipError> {
        let settings = Settings::load(global.config.as_deref()).await?;

        let log_options = LogOptions {
            log_level: global.log_level.unwrap_or(settings.log_level),
            log_dir: settings.log_dir.clone(),
            json_format: global.log_json,
            ..Default::default()
        };
        let log_guard = init_logging(log_options)?;

        let cancel = Cancellation::new();
        cancel.cancel_on_shutdown_signal();

        Ok(Self {
            settings,
            cancel,
            _log_guard: log_guard,
        })
    }

    pub fn layout(&self) -> AppLayout {
        AppLayout::new(&self.settings.apps_root)
    }
}
