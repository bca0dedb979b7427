use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::engine::CancelSignal;
use crate::engine::registry::PartnerRegistry;
use crate::engine::scheduler::Scheduler;
use crate::identity::UserDirectory;
use crate::models::order::Order;
use crate::observability::metrics::Metrics;
use crate::realtime::RealtimeHub;

pub struct AppState {
    pub config: Config,
    pub orders: DashMap<Uuid, Order>,
    pub catalog: Catalog,
    pub users: UserDirectory,
    pub partners: PartnerRegistry,
    pub scheduler: Scheduler,
    pub realtime: Arc<RealtimeHub>,
    pub metrics: Metrics,
    shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let metrics = Metrics::new();
        let realtime = Arc::new(RealtimeHub::new(config.event_buffer_size, metrics.clone()));
        Self::with_realtime(config, metrics, realtime)
    }

    pub fn with_realtime(config: Config, metrics: Metrics, realtime: Arc<RealtimeHub>) -> Self {
        let (shutdown_tx, _unused_rx) = watch::channel(false);

        Self {
            partners: PartnerRegistry::new(config.max_concurrent_orders, metrics.clone()),
            orders: DashMap::new(),
            catalog: Catalog::new(),
            users: UserDirectory::new(),
            scheduler: Scheduler::new(),
            realtime,
            metrics,
            shutdown_tx,
            config,
        }
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
