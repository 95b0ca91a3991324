//! Client construction from resolved credentials.
//!
//! The engine builds fresh clients per run so each run gets its own cached
//! session; tests substitute a factory that hands back mock clients.

use std::sync::Arc;

use crate::credentials::Credential;
use crate::error::ConnectorResult;
use crate::source_rest::RestSourceClient;
use crate::target_rest::RestTargetClient;
use crate::traits::{SourceClient, TargetClient};

/// Builds Source and Target clients from resolved credentials.
pub trait ClientFactory: Send + Sync {
    /// Build a Source client.
    fn source(&self, credential: &Credential) -> ConnectorResult<Arc<dyn SourceClient>>;

    /// Build a Target client.
    fn target(&self, credential: &Credential) -> ConnectorResult<Arc<dyn TargetClient>>;
}

/// Factory producing the REST clients.
#[derive(Debug, Default)]
pub struct RestClientFactory;

impl ClientFactory for RestClientFactory {
    fn source(&self, credential: &Credential) -> ConnectorResult<Arc<dyn SourceClient>> {
        let client = RestSourceClient::new(&credential.base_url, &credential.secret)?;
        Ok(Arc::new(client))
    }

    fn target(&self, credential: &Credential) -> ConnectorResult<Arc<dyn TargetClient>> {
        let client = RestTargetClient::new(&credential.base_url, &credential.secret)?;
        Ok(Arc::new(client))
    }
}
