//! The three core components wired to one shared router

use std::sync::Arc;
use tracing::info;

use specsmith_clarifier::Clarifier;
use specsmith_config::Config;
use specsmith_generator::CodeGenerator;
use specsmith_llm::{LlmError, ProviderRouter};
use specsmith_model::{RecordStore, RecordStoreError};

/// Counts of records handed to the store by [`Pipeline::sync_to_memory`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SyncSummary {
    pub expectations: usize,
    pub generations: usize,
    pub requests: usize,
}

/// Clarifier and generator sharing one [`ProviderRouter`].
///
/// Each pipeline owns its conversations and runs; several can live in one
/// process.
#[derive(Debug)]
pub struct Pipeline {
    router: Arc<ProviderRouter>,
    pub clarifier: Clarifier,
    pub generator: CodeGenerator,
}

impl Pipeline {
    /// Build from configuration, constructing providers from the environment.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` when no provider of the chain can
    /// be constructed.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let router = ProviderRouter::from_config(config)?;
        info!(providers = ?router.providers(), "Provider router ready");
        Ok(Self::with_router(Arc::new(router), config))
    }

    /// Build around an existing router
    pub fn with_router(router: Arc<ProviderRouter>, config: &Config) -> Self {
        Self {
            clarifier: Clarifier::new(Arc::clone(&router), config.clarifier.clone()),
            generator: CodeGenerator::new(Arc::clone(&router), config.generator.clone()),
            router,
        }
    }

    #[must_use]
    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Flush finalized expectations, completed runs and the router's request
    /// history to `store`.
    ///
    /// # Errors
    ///
    /// Stops at the first store error; whatever was not written stays queued
    /// for the next call.
    pub async fn sync_to_memory(&mut self, store: &dyn RecordStore) -> Result<SyncSummary, RecordStoreError> {
        let expectations = self.clarifier.sync_to_memory(store).await?;
        let generations = self.generator.sync_to_memory(store).await?;
        let requests = self.router.sync_history(store).await?;
        Ok(SyncSummary {
            expectations,
            generations,
            requests,
        })
    }
}
