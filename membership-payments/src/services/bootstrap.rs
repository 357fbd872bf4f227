//! Shared gateway and document-store handles.
//!
//! Both are built at most once per process. A missing credential source is
//! not an error: the gateway then fails per call and the store resolves to
//! [`Persistence::Disabled`].

use mongodb::options::ClientOptions;
use mongodb::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;

use crate::config::{RazorpayConfig, StoreConfig, StoreCredentials};
use crate::services::razorpay::{PaymentGateway, RazorpayClient};
use crate::services::store::{MongoPaymentStore, Persistence};

/// Store key file contents.
#[derive(Deserialize)]
struct ServiceAccountKey {
    uri: Secret<String>,
    database: Option<String>,
}

pub struct ClientRegistry {
    razorpay: RazorpayConfig,
    store: StoreConfig,
    gateway: OnceLock<Arc<RazorpayClient>>,
    persistence: OnceCell<Persistence>,
}

impl ClientRegistry {
    pub fn new(razorpay: RazorpayConfig, store: StoreConfig) -> Self {
        Self {
            razorpay,
            store,
            gateway: OnceLock::new(),
            persistence: OnceCell::new(),
        }
    }

    pub fn gateway(&self) -> Arc<dyn PaymentGateway> {
        let client = self.gateway.get_or_init(|| {
            let client = RazorpayClient::new(self.razorpay.clone());
            if client.is_configured() {
                tracing::info!("Razorpay client initialized");
            } else {
                tracing::warn!(
                    "Razorpay credentials not configured - gateway calls will fail until they are set"
                );
            }
            Arc::new(client)
        });
        client.clone()
    }

    /// Resolve the document store. Failed initialisation is retried on the
    /// next call; success and "no credentials" are cached.
    pub async fn document_store(&self) -> Persistence {
        let result = self
            .persistence
            .get_or_try_init(|| async {
                match &self.store.credentials {
                    None => {
                        tracing::warn!(
                            "No document store credentials configured - persistence disabled"
                        );
                        Ok(Persistence::Disabled)
                    }
                    Some(credentials) => self.connect(credentials).await,
                }
            })
            .await;

        match result {
            Ok(persistence) => persistence.clone(),
            Err(e) => {
                tracing::error!(error = %e, "Document store initialization failed");
                Persistence::Disabled
            }
        }
    }

    /// True once the store handle has been resolved for good.
    pub fn store_initialized(&self) -> bool {
        self.persistence.initialized()
    }

    async fn connect(&self, credentials: &StoreCredentials) -> anyhow::Result<Persistence> {
        let (uri, database) = match credentials {
            StoreCredentials::KeyFile(path) => {
                let key = read_key_file(path).await?;
                let database = key
                    .database
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| self.store.database.clone());
                (key.uri, database)
            }
            StoreCredentials::Discrete {
                host,
                username,
                password,
            } => (
                discrete_uri(host, username, password),
                self.store.database.clone(),
            ),
        };

        let mut options = ClientOptions::parse(uri.expose_secret()).await?;
        options.app_name = Some("membership-payments".to_string());
        options.server_selection_timeout = Some(self.store.request_timeout);

        let client = Client::with_options(options)?;
        let store = MongoPaymentStore::new(client, &database, self.store.request_timeout);

        tokio::time::timeout(self.store.request_timeout, store.init_indexes())
            .await
            .map_err(|_| anyhow::anyhow!("Timed out creating store indexes"))??;

        tracing::info!(database = %database, "Document store initialized");
        Ok(Persistence::enabled(store))
    }
}

async fn read_key_file(path: &Path) -> anyhow::Result<ServiceAccountKey> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Cannot read store key file {}: {}", path.display(), e))?;
    let key: ServiceAccountKey = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid store key file {}: {}", path.display(), e))?;
    Ok(key)
}

fn discrete_uri(host: &str, username: &str, password: &Secret<String>) -> Secret<String> {
    Secret::new(format!(
        "mongodb://{}:{}@{}",
        urlencoding::encode(username),
        urlencoding::encode(password.expose_secret()),
        host
    ))
}
