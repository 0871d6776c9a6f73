pub mod aggregator;
pub mod api;
pub mod chain;
pub mod config;
pub mod merkle;
pub mod resolver;
pub mod stamper;
pub mod store;

use crate::aggregator::Aggregator;
use crate::chain::ChainClient;
use crate::config::Config;
use crate::resolver::ProofResolver;
use crate::stamper::{ChainStamper, StamperConfig};
use crate::store::CalendarStore;
use std::sync::Arc;

/// Everything the background loops and the HTTP layer need, constructed
/// once at startup and passed explicitly. No global singletons.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<CalendarStore>,
    pub aggregator: Arc<Aggregator>,
    pub stamper: Arc<ChainStamper>,
    pub resolver: Arc<ProofResolver>,
}

impl AppContext {
    pub fn build(config: Config, chain: Arc<dyn ChainClient>) -> Result<Self, store::StoreError> {
        let store = Arc::new(CalendarStore::open(&config.data_path)?);
        let aggregator = Arc::new(Aggregator::new(store.clone(), config.batch_threshold));
        let stamper = Arc::new(ChainStamper::new(
            store.clone(),
            chain,
            StamperConfig {
                wait_confirmations: config.wait_confirmations,
                min_interval: config.min_broadcast_interval,
                reorg_poll_limit: config.reorg_poll_limit,
            },
        ));
        let resolver = Arc::new(ProofResolver::new(store.clone()));
        Ok(Self {
            config,
            store,
            aggregator,
            stamper,
            resolver,
        })
    }
}
