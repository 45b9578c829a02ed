//! Named clients and the process-wide registry behind the free functions.
//!
//! A [`ClientRegistry`] owns clients by name. The functions at the bottom of
//! this module operate on a global registry whose `"default"` client is
//! created on first use from the configured defaults.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

use crate::client::Client;
use crate::config::{ClientConfig, DEFAULT_CLIENT_NAME};
use crate::document::NewDocument;
use crate::driver::{drivers, DriverRegistry};
use crate::error::{DocketError, Result};
use crate::queue::{PushOutcome, Queue};

/// Clients keyed by name.
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Client>>,
    defaults: RwLock<ClientConfig>,
    drivers: Arc<DriverRegistry>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.client_names())
            .field("drivers", &self.drivers.kinds())
            .finish()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Registry resolving drivers from the process-wide driver registry.
    pub fn new() -> Self {
        Self::with_drivers(drivers())
    }

    pub fn with_drivers(drivers: Arc<DriverRegistry>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            defaults: RwLock::new(ClientConfig::default()),
            drivers,
        }
    }

    /// Configuration used for clients created implicitly by
    /// [`use_client`](Self::use_client).
    pub fn set_defaults(&self, config: ClientConfig) -> Result<()> {
        config.validate()?;
        *self.defaults.write() = config;
        Ok(())
    }

    pub fn defaults(&self) -> ClientConfig {
        self.defaults.read().clone()
    }

    /// Create and register a client without connecting it.
    pub fn create_client(&self, config: ClientConfig) -> Result<Client> {
        let mut clients = self.clients.write();
        if clients.contains_key(&config.name) {
            return Err(DocketError::DuplicateClient(config.name));
        }

        let client = Client::with_drivers(config, &self.drivers)?;
        clients.insert(client.name().to_string(), client.clone());
        tracing::debug!(client = %client.name(), "client created");
        Ok(client)
    }

    pub fn get_client(&self, name: &str) -> Result<Client> {
        self.clients
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DocketError::ClientNotFound(name.to_string()))
    }

    /// Return the named client, creating it from the defaults when missing,
    /// and wait until it is connected.
    pub async fn use_client(&self, name: &str) -> Result<Client> {
        let client = {
            let mut clients = self.clients.write();
            match clients.get(name) {
                Some(client) => client.clone(),
                None => {
                    let mut config = self.defaults.read().clone();
                    config.name = name.to_string();
                    let client = Client::with_drivers(config, &self.drivers)?;
                    clients.insert(name.to_string(), client.clone());
                    client
                }
            }
        };

        client.ready().await?;
        Ok(client)
    }

    /// Create a client and connect it.
    pub async fn connect(&self, config: ClientConfig) -> Result<Client> {
        let client = self.create_client(config)?;
        client.init().await?;
        Ok(client)
    }

    /// Destroy a single client and forget it.
    pub async fn destroy_client(&self, name: &str) -> Result<()> {
        let client = self
            .clients
            .write()
            .remove(name)
            .ok_or_else(|| DocketError::ClientNotFound(name.to_string()))?;
        client.destroy().await
    }

    /// Destroy every client and empty the registry.
    ///
    /// Every client is torn down even when one fails; the first error is
    /// returned.
    pub async fn destroy_all(&self) -> Result<()> {
        let clients: Vec<Client> = self.clients.write().drain().map(|(_, c)| c).collect();
        let results = futures::future::join_all(clients.iter().map(Client::destroy)).await;

        let mut first = None;
        for (client, result) in clients.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(client = %client.name(), error = %err, "client destroy failed");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn client_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.clients.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Open `name` on the default client.
    pub async fn queue(&self, name: &str) -> Result<Queue> {
        self.use_client(DEFAULT_CLIENT_NAME).await?.queue(name).await
    }

    /// Push into `queue` on the default client.
    pub async fn push<D>(&self, queue: &str, documents: impl IntoIterator<Item = D>) -> Result<PushOutcome>
    where
        D: Into<NewDocument>,
    {
        self.queue(queue).await?.push(documents).await
    }
}

static CLIENTS: LazyLock<ClientRegistry> = LazyLock::new(ClientRegistry::new);

/// Process-wide client registry.
pub fn clients() -> &'static ClientRegistry {
    &CLIENTS
}

pub fn set_defaults(config: ClientConfig) -> Result<()> {
    CLIENTS.set_defaults(config)
}

pub fn create_client(config: ClientConfig) -> Result<Client> {
    CLIENTS.create_client(config)
}

pub fn get_client(name: &str) -> Result<Client> {
    CLIENTS.get_client(name)
}

pub async fn use_client(name: &str) -> Result<Client> {
    CLIENTS.use_client(name).await
}

pub async fn connect(config: ClientConfig) -> Result<Client> {
    CLIENTS.connect(config).await
}

pub async fn destroy_all() -> Result<()> {
    CLIENTS.destroy_all().await
}

/// Open `name` on the default client.
pub async fn queue(name: &str) -> Result<Queue> {
    CLIENTS.queue(name).await
}

/// Push into `queue` on the default client.
pub async fn push<D>(queue: &str, documents: impl IntoIterator<Item = D>) -> Result<PushOutcome>
where
    D: Into<NewDocument>,
{
    CLIENTS.push(queue, documents).await
}
