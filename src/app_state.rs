use crate::broker::Broker;
use crate::config::Settings;
use crate::health::HealthSink;
use crate::persistence::PersistenceLayer;
use std::sync::Arc;

/// Process-wide shared handles, constructed once after configuration loads
/// and cloned by `Arc` into every task that needs them.
#[derive(Clone)]
pub struct AppState {
    pub persistence: Arc<PersistenceLayer>,
    pub broker: Arc<Broker>,
    pub settings: Arc<Settings>,
    pub health: Arc<dyn HealthSink>,
}

impl AppState {
    pub fn new(
        persistence: Arc<PersistenceLayer>,
        broker: Arc<Broker>,
        settings: Arc<Settings>,
        health: Arc<dyn HealthSink>,
    ) -> Self {
        AppState {
            persistence,
            broker,
            settings,
            health,
        }
    }
}
