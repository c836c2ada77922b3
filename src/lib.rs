pub mod api;
pub mod changes;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod event;
pub mod identity;
pub mod job;
pub mod logging;
pub mod processor;
pub mod rate_limit;
pub mod restriction;
pub mod scm;
pub mod subscribers;
pub mod supersede;
pub mod trigger;
pub mod utils;
pub mod webhook;

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

pub use config::{AppConfig, load_config, reload_config};

use api::stats::DeliveryStats;
use db::MemoryStore;
use processor::{DeliveryPolicy, HookProcessor};
use rate_limit::RateLimiter;
use scm::{GithubHookParser, LocalScm};

pub struct AppState {
    pub config: RwLock<AppConfig>,
    pub config_path: PathBuf,
    pub store: Arc<MemoryStore>,
    pub scm: Arc<LocalScm>,
    pub processor: HookProcessor,
    pub rate_limiter: Mutex<RateLimiter>,
    pub stats: DeliveryStats,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wires the in-memory store and the config-backed SCM adapter seeded
    /// from `config`.
    pub fn new(config: AppConfig, config_path: impl Into<PathBuf>) -> Self {
        let store = Arc::new(MemoryStore::from_config(&config));
        let scm = Arc::new(LocalScm::from_config(&config));
        let processor = HookProcessor::with_store(store.clone(), scm.clone());

        Self {
            config: RwLock::new(config),
            config_path: config_path.into(),
            store,
            scm,
            processor,
            rate_limiter: Mutex::new(RateLimiter::new()),
            stats: DeliveryStats::default(),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Webhook policy for one delivery, cloned so a concurrent reload
    /// cannot change it mid-flight
    pub fn delivery_policy(&self) -> DeliveryPolicy {
        let config = self.config.read().unwrap();
        DeliveryPolicy {
            settings: config.webhooks.clone(),
            scm_context: config.scm_context(&config.webhooks.scm_context).cloned(),
        }
    }

    pub fn hook_parser(&self) -> GithubHookParser {
        let config = self.config.read().unwrap();
        GithubHookParser::new(
            config.webhooks.scm_context.clone(),
            config.webhooks.secret.clone(),
        )
    }
}

pub type SharedState = Arc<AppState>;
