use std::sync::Arc;

use process::Forecaster;
use tracing::info;

use super::{config::Config, database::Store};

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub forecaster: Forecaster,
}

impl AppState {
    pub fn new() -> anyhow::Result<Arc<Self>> {
        let config = Config::load()?;
        let store = Store::open(config.ledger_path.clone())?;
        let forecaster = Forecaster::from_endpoint(config.model_url.as_deref())?;

        match &config.model_url {
            Some(url) => info!("Predictions served by model at {url}"),
            None => info!("MODEL_URL not set, predictions use the mock predictor"),
        }

        Ok(Self::from_parts(config, store, forecaster))
    }

    pub fn from_parts(config: Config, store: Store, forecaster: Forecaster) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            forecaster,
        })
    }
}
