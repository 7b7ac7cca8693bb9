//! Translator composition layer wiring configuration, provider adapters,
//! event bus, and the orchestration engine behind one construction surface.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use backend_ollama::{OllamaBackendConfig, OllamaHandler};
use backend_openrouter::{OpenRouterBackendConfig, OpenRouterHandler};
use glossa_config::{ConfigError, GlossaConfig};
use glossa_domain::{LockLevel, Project, TranslationState};
use glossa_engine::{
    EngineResult, TranslationOrchestrator, TranslationOrchestratorConfig, TranslationPerfSnapshot,
};
use glossa_eventbus::{TranslationEventBus, TranslationEventEnvelope};
use glossa_provider_protocol::backend::{HandlerFactory, ProviderHandler, ProviderKind};
use glossa_provider_protocol::error::{ProviderResult, ProviderRuntimeError};
use tokio::sync::broadcast;

/// Builds provider handlers from the configuration registry.
///
/// Provider selection happens by identifier prefix before any configuration
/// lookup, so an unrecognized prefix reports unsupported-provider instead of
/// a misleading missing-configuration message.
pub struct ConfiguredHandlerFactory {
    config: GlossaConfig,
}

impl ConfiguredHandlerFactory {
    pub fn new(config: GlossaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl HandlerFactory for ConfiguredHandlerFactory {
    async fn create_handler(&self, model_id: &str) -> ProviderResult<Box<dyn ProviderHandler>> {
        let provider = ProviderKind::for_model_id(model_id)?;
        let resolved = self
            .config
            .resolve_model(model_id)
            .map_err(|error| ProviderRuntimeError::Configuration(error.to_string()))?;
        tracing::debug!(
            model = model_id,
            provider = %provider,
            endpoint = %resolved.endpoint,
            "building provider handler"
        );

        match provider {
            ProviderKind::Ollama => Ok(Box::new(OllamaHandler::new(OllamaBackendConfig {
                endpoint: resolved.endpoint,
                model_id: model_id.to_owned(),
                parameters: resolved.parameters,
            })?)),
            ProviderKind::OpenRouter => {
                Ok(Box::new(OpenRouterHandler::new(OpenRouterBackendConfig {
                    base_url: resolved.endpoint,
                    api_key: resolved.api_key,
                    model_id: model_id.to_owned(),
                    parameters: resolved.parameters,
                })?))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslatorRuntimePerfSnapshot {
    pub engine: TranslationPerfSnapshot,
    pub active_runner_tasks: usize,
}

/// A fully wired translation stack for one project session.
///
/// Construction reads the configuration once: prompt defaults and
/// orchestration tuning go to the orchestrator, the provider registry goes
/// to the handler factory. Everything else delegates.
pub struct TranslatorRuntime {
    orchestrator: TranslationOrchestrator,
    eventbus: Arc<TranslationEventBus>,
}

impl TranslatorRuntime {
    pub fn new(project: Project, config: GlossaConfig) -> Self {
        Self::with_eventbus(project, config, TranslationEventBus::default())
    }

    /// Loads configuration from `GLOSSA_CONFIG` or the default path,
    /// creating the default file when none exists.
    pub fn from_env(project: Project) -> Result<Self, ConfigError> {
        Ok(Self::new(project, glossa_config::load_from_env()?))
    }

    pub fn with_eventbus(
        project: Project,
        config: GlossaConfig,
        eventbus: TranslationEventBus,
    ) -> Self {
        let factory = Arc::new(ConfiguredHandlerFactory::new(config.clone()));
        Self::with_components(project, config, eventbus, factory)
    }

    pub fn with_components(
        project: Project,
        config: GlossaConfig,
        eventbus: TranslationEventBus,
        factory: Arc<dyn HandlerFactory>,
    ) -> Self {
        let eventbus = Arc::new(eventbus);
        let orchestrator = TranslationOrchestrator::with_config(
            project,
            factory,
            Arc::clone(&eventbus),
            config.default_prompts.clone(),
            TranslationOrchestratorConfig {
                idle_timeout: config.idle_timeout(),
                completion_idle_delay: config.completion_idle_delay(),
            },
        );
        Self {
            orchestrator,
            eventbus,
        }
    }

    /// Full orchestration surface, including the gated project and item
    /// mutations.
    pub fn orchestrator(&self) -> &TranslationOrchestrator {
        &self.orchestrator
    }

    pub async fn translate(&self, index: usize) -> EngineResult<()> {
        self.orchestrator.translate(index).await
    }

    pub async fn stop(&self, index: usize) {
        self.orchestrator.stop(index).await;
    }

    pub async fn stop_all(&self) {
        self.orchestrator.stop_all().await;
    }

    pub async fn is_translating(&self, index: usize) -> bool {
        self.orchestrator.is_translating(index).await
    }

    pub async fn translating_indices(&self) -> BTreeSet<usize> {
        self.orchestrator.translating_indices().await
    }

    pub async fn aggregate_state(&self) -> TranslationState {
        self.orchestrator.aggregate_state().await
    }

    pub async fn lock_level(&self) -> LockLevel {
        self.orchestrator.lock_level().await
    }

    pub async fn live_text(&self, index: usize) -> Option<String> {
        self.orchestrator.live_text(index).await
    }

    pub async fn project_snapshot(&self) -> Project {
        self.orchestrator.project_snapshot().await
    }

    pub fn subscribe_item(&self, item: usize) -> broadcast::Receiver<TranslationEventEnvelope> {
        self.orchestrator.subscribe_item(item)
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<TranslationEventEnvelope> {
        self.eventbus.subscribe_all()
    }

    pub async fn perf_snapshot(&self) -> TranslatorRuntimePerfSnapshot {
        TranslatorRuntimePerfSnapshot {
            engine: self.orchestrator.perf_snapshot().await,
            active_runner_tasks: self.orchestrator.task_snapshot().await.active_runner_tasks,
        }
    }
}
