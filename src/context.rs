use crate::{
    channels::{ChannelRegistry, RejoinPolicy},
    config::{Config, ReconnectPolicy, ServerConfig},
    connection::ConnectionManager,
    dispatcher::EventDispatcher,
    error::Result,
    transport::Connector,
};
use std::sync::Arc;

/// The connection and the components layered on it, built once at startup
/// and passed to whatever needs channel or event access.
#[derive(Clone)]
pub struct RealtimeContext {
    pub manager: ConnectionManager,
    pub channels: Arc<ChannelRegistry>,
    pub events: EventDispatcher,
}

impl RealtimeContext {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_manager(ConnectionManager::from_config(config)?, config.session.rejoin)
    }

    pub fn with_connector(
        server: ServerConfig,
        policy: ReconnectPolicy,
        connector: Arc<dyn Connector>,
        rejoin: RejoinPolicy,
    ) -> Result<Self> {
        Self::with_manager(ConnectionManager::new(server, policy, connector), rejoin)
    }

    pub fn with_manager(manager: ConnectionManager, rejoin: RejoinPolicy) -> Result<Self> {
        let channels = ChannelRegistry::with_policy(manager.clone(), rejoin)?;
        Ok(Self {
            events: EventDispatcher::new(manager.clone()),
            channels: Arc::new(channels),
            manager,
        })
    }

    pub async fn shutdown(&self) {
        self.manager.disconnect().await;
    }
}
