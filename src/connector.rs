//! Connector configurations, replaced as a whole.

// self
use crate::{
	_prelude::*,
	obs::{self, RepoKind},
	store::{self, Backend, Document, RepoFuture, Table, WriteBatch},
};

/// Configuration for one upstream identity connector.
///
/// The store only interprets `id`; `kind` and `config` belong to the connector implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
	/// Connector identifier.
	pub id: String,
	/// Connector implementation name.
	#[serde(rename = "type")]
	pub kind: String,
	/// Implementation-specific settings.
	#[serde(default)]
	pub config: Value,
}

/// Connector configuration persistence contract.
pub trait ConnectorConfigRepo
where
	Self: Send + Sync,
{
	/// Lists every stored configuration, ordered by id.
	fn all(&self) -> RepoFuture<'_, Vec<ConnectorConfig>>;

	/// Fetches one configuration.
	fn get_connector_by_id<'a>(&'a self, id: &'a str) -> RepoFuture<'a, ConnectorConfig>;

	/// Atomically replaces every stored configuration with `configs`.
	fn set(&self, configs: Vec<ConnectorConfig>) -> RepoFuture<'_, ()>;
}

/// [`ConnectorConfigRepo`] over any [`Backend`].
#[derive(Clone, Debug)]
pub struct BackendConnectorConfigRepo {
	backend: Arc<dyn Backend>,
}
impl BackendConnectorConfigRepo {
	/// Creates a repository.
	pub fn new(backend: Arc<dyn Backend>) -> Self {
		Self { backend }
	}
}
impl ConnectorConfigRepo for BackendConnectorConfigRepo {
	fn all(&self) -> RepoFuture<'_, Vec<ConnectorConfig>> {
		obs::observe(RepoKind::ConnectorConfig, "all", async move {
			store::load_all(&*self.backend, Table::ConnectorConfig).await
		})
	}

	fn get_connector_by_id<'a>(&'a self, id: &'a str) -> RepoFuture<'a, ConnectorConfig> {
		obs::observe(RepoKind::ConnectorConfig, "get_connector_by_id", async move {
			let (_, config) =
				store::load(&*self.backend, Table::ConnectorConfig, id).await?.ok_or(Error::NotFound)?;

			Ok(config)
		})
	}

	fn set(&self, configs: Vec<ConnectorConfig>) -> RepoFuture<'_, ()> {
		obs::observe(RepoKind::ConnectorConfig, "set", async move {
			let mut batch = WriteBatch::new().truncate(Table::ConnectorConfig);

			for config in &configs {
				if config.id.is_empty() {
					return Err(Error::InvalidId);
				}

				batch = batch.insert(Table::ConnectorConfig, config.id.clone(), Document::encode(config)?);
			}

			match self.backend.commit(batch).await?.conflict_table() {
				None => Ok(()),
				Some(_) => Err(Error::DuplicateId),
			}
		})
	}
}
