//! Client selection by stage location type.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use stagexfer_common::{Error, LocationType, Result, StageLocation};

use crate::client::StorageClient;
use crate::gcs::GcsClient;
use crate::http::HttpConfig;
use crate::local::LocalClient;

/// Maps a stage's location type to its protocol client.
///
/// The set of location types is closed. GCS and local stages get built-in
/// clients; S3 and Azure stages fail unless a client was supplied with
/// [`ClientSelector::with_client`].
pub struct ClientSelector {
    clients: HashMap<LocationType, Arc<dyn StorageClient>>,
}

impl ClientSelector {
    /// Create a selector with the built-in clients.
    ///
    /// # Errors
    /// - The HTTP client cannot be built
    pub fn new(http: &HttpConfig) -> Result<Self> {
        let mut clients: HashMap<LocationType, Arc<dyn StorageClient>> = HashMap::new();
        clients.insert(LocationType::Gcs, Arc::new(GcsClient::new(http)?));
        clients.insert(LocationType::LocalFs, Arc::new(LocalClient::new()));
        Ok(Self { clients })
    }

    /// Create a selector with no clients at all.
    pub fn empty() -> Self {
        Self {
            clients: HashMap::new(),
        }
    }

    /// Install `client` for `location`, replacing any existing one.
    pub fn with_client(mut self, location: LocationType, client: Arc<dyn StorageClient>) -> Self {
        debug!("Installing {} client for {}", client.name(), location);
        self.clients.insert(location, client);
        self
    }

    /// Client for a location type tag such as `"GCS"`.
    ///
    /// # Errors
    /// - `Error::UnsupportedLocation` for unknown tags, or known tags with
    ///   no client installed
    pub fn select(&self, location_type: &str) -> Result<Arc<dyn StorageClient>> {
        let location: LocationType = location_type.parse()?;
        self.clients.get(&location).cloned().ok_or_else(|| {
            Error::UnsupportedLocation(format!("no client available for {} stages", location))
        })
    }

    /// Client for `stage`.
    pub fn select_for(&self, stage: &StageLocation) -> Result<Arc<dyn StorageClient>> {
        self.select(&stage.location_type)
    }

    /// Location types that currently have a client.
    pub fn location_types(&self) -> Vec<LocationType> {
        self.clients.keys().copied().collect()
    }

    pub fn has_client(&self, location: LocationType) -> bool {
        self.clients.contains_key(&location)
    }
}
