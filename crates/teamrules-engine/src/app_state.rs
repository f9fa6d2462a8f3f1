//! Shared application state.
//!
//! Compiles the schema and policy once and hands out `Arc`s to the
//! authorizer, metrics and store. Startup errors are returned, never panicked.

use std::path::Path;
use std::sync::Arc;

use teamrules_core::document::PolicyDocument;
use teamrules_core::error::{ConfigError, Result};

use crate::config::{self, ServiceConfig};
use crate::obs::metrics::Metrics;
use crate::policy::{Authorizer, PolicySet};
use crate::schema::Schema;
use crate::store::MemoryStore;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: ServiceConfig,
    schema: Arc<Schema>,
    authorizer: Arc<Authorizer>,
    metrics: Arc<Metrics>,
    store: Arc<MemoryStore>,
    load_errors: Vec<ConfigError>,
}

impl AppState {
    /// Build state from a validated config and its manifest.
    ///
    /// With `policy.fail_fast` any compile error aborts; otherwise broken
    /// entity types are quarantined and their errors kept in
    /// [`AppState::load_errors`].
    pub fn new(cfg: ServiceConfig, doc: &PolicyDocument) -> Result<Self> {
        let schema = Arc::new(Schema::from_section(&cfg.schema)?);

        let (policy, load_errors) = if cfg.policy.fail_fast {
            (PolicySet::compile(doc, &schema)?, Vec::new())
        } else {
            let (set, errors) = PolicySet::compile_lenient(doc, &schema);
            for e in &errors {
                tracing::error!(entity = e.entity().unwrap_or("-"), error = %e, "policy quarantined");
            }
            (set, errors)
        };

        let metrics = Arc::new(Metrics::default());
        let authorizer = Arc::new(Authorizer::with_metrics(Arc::new(policy), metrics.clone()));
        let store = Arc::new(MemoryStore::new(schema.clone(), authorizer.clone()));

        tracing::info!(
            entities = authorizer.policy().entity_names().len(),
            load_errors = load_errors.len(),
            "policy loaded"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                schema,
                authorizer,
                metrics,
                store,
                load_errors,
            }),
        })
    }

    /// Read the config file, then the manifest it points at.
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref();
        let cfg = config::load_from_file(config_path)?;
        let policy_path = config::policy_path(&cfg, config_path);
        let doc = config::load_policy_file(&policy_path)?;
        tracing::info!(config = %config_path.display(), policy = %policy_path.display(), "config loaded");
        Self::new(cfg, &doc)
    }

    pub fn cfg(&self) -> &ServiceConfig {
        &self.inner.cfg
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    pub fn authorizer(&self) -> &Arc<Authorizer> {
        &self.inner.authorizer
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.inner.store
    }

    /// Errors of quarantined entities (empty when `fail_fast`).
    pub fn load_errors(&self) -> &[ConfigError] {
        &self.inner.load_errors
    }
}
