use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::cleanup::ConfirmationGate;
use crate::cleanup::kick::KICK_DELAY;
use crate::config::{ChannelDefaults, SweeperConfig, split_env_list};
use crate::discord::client::GuildClient;
use crate::engine::progress::{INACTIVE_SCAN, ZERO_MESSAGE_SCAN};
use crate::engine::{JobSlot, ScanSlot};
use crate::storage::CsvStore;

/// Shared state handed to every handler. One slot per job kind; the slots
/// are the only place a job's status and cancellation token live.
pub struct AppState {
    pub client: Arc<dyn GuildClient>,
    pub guild_id: String,
    pub config: SweeperConfig,
    pub store: CsvStore,
    pub ignore_dir: PathBuf,
    pub defaults: ChannelDefaults,
    /// Categories from `INACTIVE_EXCLUDED_CATEGORIES`, read at startup.
    pub env_excluded_categories: Vec<String>,
    pub kick_delay: Duration,
    ready: AtomicBool,
    pub zero_scan: Arc<ScanSlot>,
    pub inactive_scan: Arc<ScanSlot>,
    pub kick: Arc<JobSlot>,
    pub roles: Arc<JobSlot>,
    pub archive: Arc<JobSlot>,
    pub confirmations: ConfirmationGate,
}

impl AppState {
    pub fn new(config: SweeperConfig, client: Arc<dyn GuildClient>) -> Self {
        Self {
            client,
            guild_id: config.discord.guild_id.clone(),
            store: CsvStore::new(&config.storage.csv_dir),
            ignore_dir: PathBuf::from(&config.storage.ignore_dir),
            defaults: ChannelDefaults::new(&config.storage.config_dir),
            env_excluded_categories: split_env_list(
                std::env::var("INACTIVE_EXCLUDED_CATEGORIES").ok(),
            ),
            kick_delay: KICK_DELAY,
            ready: AtomicBool::new(false),
            zero_scan: ScanSlot::new(ZERO_MESSAGE_SCAN),
            inactive_scan: ScanSlot::new(INACTIVE_SCAN),
            kick: Arc::new(JobSlot::new()),
            roles: Arc::new(JobSlot::new()),
            archive: Arc::new(JobSlot::new()),
            confirmations: ConfirmationGate::default(),
            config,
        }
    }

    /// Whether the bot has identified itself against the API.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Config and JSON defaults, then `extra`, then the environment list.
    pub fn excluded_categories(&self, extra: Vec<String>) -> Vec<String> {
        self.config
            .scan
            .excluded_categories
            .iter()
            .chain(self.defaults.excluded_categories())
            .cloned()
            .chain(extra)
            .chain(self.env_excluded_categories.iter().cloned())
            .collect()
    }

    /// The defaults shown in the dashboard before any request extras.
    pub fn default_excluded_categories(&self) -> Vec<String> {
        self.excluded_categories(Vec::new())
    }
}
