//! Concurrent translation dispatch over one project.
//!
//! One orchestrator instance supervises every in-flight translation job for
//! its project: dispatching runner tasks, forwarding stream fragments to the
//! event bus, committing completed text, and gating structural mutation of
//! the project while jobs hold item indices.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glossa_domain::{
    select_context, ContextMode, Item, LockLevel, Project, PromptDefaults, PromptOverrides,
    TokenCounter, TranslationState,
};
use glossa_eventbus::{
    CompletedEvent, ErrorEvent, FragmentEvent, LockLevelEvent, ProgressEvent, StateChangedEvent,
    TimeoutEvent, TranslationEvent, TranslationEventBus, TranslationEventEnvelope,
    ValidationFailedEvent,
};
use glossa_provider_protocol::backend::HandlerFactory;
use glossa_provider_protocol::error::ProviderRuntimeError;
use glossa_provider_protocol::request::ChatRequest;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{EngineError, EngineResult};
use crate::payload::build_chat_request;
use crate::registry::{TranslationJob, TranslationRegistry};

const ANNOUNCED_LOCK: &str = "announced state lock poisoned";

/// How long `stop` waits for a runner task to wind down before aborting it.
const STOP_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Timing knobs for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationOrchestratorConfig {
    /// Longest quiet gap between stream fragments before a job is aborted
    /// as timed out. Independent of the transport read timeout inside the
    /// provider handler.
    pub idle_timeout: Duration,
    /// How long the completed or errored aggregate state stays visible on
    /// the event stream before the idle announcement.
    pub completion_idle_delay: Duration,
}

impl Default for TranslationOrchestratorConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            completion_idle_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslationTaskSnapshot {
    pub active_runner_tasks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslationPerfSnapshot {
    pub active_jobs: usize,
    pub dispatch_requests_total: u64,
    pub dispatch_rejections_total: u64,
    pub stop_requests_total: u64,
    pub fragments_forwarded_total: u64,
    pub jobs_completed_total: u64,
    pub jobs_stopped_total: u64,
    pub jobs_failed_total: u64,
    pub jobs_timed_out_total: u64,
    pub validation_failures_total: u64,
}

#[derive(Debug, Default)]
struct TranslationPerfCounters {
    dispatch_requests_total: AtomicU64,
    dispatch_rejections_total: AtomicU64,
    stop_requests_total: AtomicU64,
    fragments_forwarded_total: AtomicU64,
    jobs_completed_total: AtomicU64,
    jobs_stopped_total: AtomicU64,
    jobs_failed_total: AtomicU64,
    jobs_timed_out_total: AtomicU64,
    validation_failures_total: AtomicU64,
}

impl TranslationPerfCounters {
    fn snapshot(&self, active_jobs: usize) -> TranslationPerfSnapshot {
        TranslationPerfSnapshot {
            active_jobs,
            dispatch_requests_total: self.dispatch_requests_total.load(Ordering::Relaxed),
            dispatch_rejections_total: self.dispatch_rejections_total.load(Ordering::Relaxed),
            stop_requests_total: self.stop_requests_total.load(Ordering::Relaxed),
            fragments_forwarded_total: self.fragments_forwarded_total.load(Ordering::Relaxed),
            jobs_completed_total: self.jobs_completed_total.load(Ordering::Relaxed),
            jobs_stopped_total: self.jobs_stopped_total.load(Ordering::Relaxed),
            jobs_failed_total: self.jobs_failed_total.load(Ordering::Relaxed),
            jobs_timed_out_total: self.jobs_timed_out_total.load(Ordering::Relaxed),
            validation_failures_total: self.validation_failures_total.load(Ordering::Relaxed),
        }
    }
}

/// Last aggregate state and lock level announced on the event stream. Kept
/// separately from the queryable values so repeat announcements collapse.
#[derive(Debug, Default)]
struct AnnouncedState {
    state: TranslationState,
    lock: LockLevel,
}

/// Terminal disposition of one runner task.
enum JobOutcome {
    Completed,
    Stopped,
    ValidationFailed { message: String },
    TimedOut { message: String },
    Failed { error: ProviderRuntimeError },
}

/// Concurrent translation dispatcher for one project.
///
/// Owns the project behind a read/write lock and keys in-flight jobs by item
/// index. Dispatch, stop, and the mutation methods never block on job
/// completion; terminal outcomes arrive on the event bus. Clones share all
/// state.
#[derive(Clone)]
pub struct TranslationOrchestrator {
    project: Arc<RwLock<Project>>,
    counter: Arc<TokenCounter>,
    factory: Arc<dyn HandlerFactory>,
    prompt_defaults: PromptDefaults,
    config: TranslationOrchestratorConfig,
    registry: Arc<RwLock<TranslationRegistry>>,
    eventbus: Arc<TranslationEventBus>,
    runner_tasks: Arc<RwLock<HashMap<usize, JoinHandle<()>>>>,
    announced: Arc<std::sync::Mutex<AnnouncedState>>,
    perf: Arc<TranslationPerfCounters>,
}

impl TranslationOrchestrator {
    pub fn new(
        project: Project,
        factory: Arc<dyn HandlerFactory>,
        eventbus: Arc<TranslationEventBus>,
    ) -> Self {
        Self::with_config(
            project,
            factory,
            eventbus,
            PromptDefaults::default(),
            TranslationOrchestratorConfig::default(),
        )
    }

    pub fn with_config(
        project: Project,
        factory: Arc<dyn HandlerFactory>,
        eventbus: Arc<TranslationEventBus>,
        prompt_defaults: PromptDefaults,
        config: TranslationOrchestratorConfig,
    ) -> Self {
        Self {
            project: Arc::new(RwLock::new(project)),
            counter: Arc::new(TokenCounter::new()),
            factory,
            prompt_defaults,
            config,
            registry: Arc::new(RwLock::new(TranslationRegistry::new())),
            eventbus,
            runner_tasks: Arc::new(RwLock::new(HashMap::new())),
            announced: Arc::new(std::sync::Mutex::new(AnnouncedState::default())),
            perf: Arc::new(TranslationPerfCounters::default()),
        }
    }

    /// Starts a translation job for item `index`.
    ///
    /// Refuses out-of-range indices, blank source text / target language /
    /// model, and indices that are already translating; a refusal creates no
    /// job and publishes no events. On success a runner task streams
    /// fragments into the job buffer and the terminal outcome arrives on the
    /// event bus; any number of indices may run concurrently.
    pub async fn translate(&self, index: usize) -> EngineResult<()> {
        self.perf
            .dispatch_requests_total
            .fetch_add(1, Ordering::Relaxed);

        let (request, source_chars, job) = {
            let project = self.project.read().await;
            let selection = select_context(&project, index, &self.counter);
            let request =
                match build_chat_request(&project, index, &selection, &self.prompt_defaults) {
                    Ok(request) => request,
                    Err(error) => {
                        self.perf
                            .dispatch_rejections_total
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(error);
                    }
                };
            let source_chars = project
                .item(index)
                .map(|item| item.source_text.trim().chars().count())
                .unwrap_or(0);

            let job = {
                let mut registry = self.registry.write().await;
                match registry.reserve(index) {
                    Some(job) => job,
                    None => {
                        self.perf
                            .dispatch_rejections_total
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(EngineError::AlreadyTranslating(index));
                    }
                }
            };
            (request, source_chars, job)
        };

        self.announce_state(TranslationState::Translating);
        self.announce_lock(LockLevel::ProjectOp);

        tracing::info!(item = index, model = %request.model, "translation dispatched");
        let mut runner_tasks = self.runner_tasks.write().await;
        let runner = self.spawn_runner_task(index, job, request, source_chars);
        runner_tasks.insert(index, runner);
        Ok(())
    }

    /// Stops the job for `index`, if one is running.
    ///
    /// Freezes the job buffer so no further fragment can land, cancels the
    /// runner, waits a short grace period for the task and aborts it if it
    /// does not wind down. The item's stored translated text is left
    /// untouched. Stopping an index with no job is a no-op.
    pub async fn stop(&self, index: usize) {
        self.perf
            .stop_requests_total
            .fetch_add(1, Ordering::Relaxed);

        let job = {
            let mut registry = self.registry.write().await;
            match registry.remove(index) {
                Some(job) => job,
                None => return,
            }
        };

        self.announce_state(TranslationState::Stopping);
        job.request_stop();

        let task = {
            let mut runner_tasks = self.runner_tasks.write().await;
            runner_tasks.remove(&index)
        };
        if let Some(mut task) = task {
            if timeout(STOP_GRACE_PERIOD, &mut task).await.is_err() {
                task.abort();
            }
        }

        self.perf.jobs_stopped_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(item = index, "translation stopped; partial output discarded");
        self.release_lock_if_idle().await;
        self.settle_state().await;
    }

    /// Stops every running job, one index at a time.
    pub async fn stop_all(&self) {
        let indices = { self.registry.read().await.indices() };
        for index in indices {
            self.stop(index).await;
        }
    }

    pub async fn is_translating(&self, index: usize) -> bool {
        self.registry.read().await.contains(index)
    }

    pub async fn translating_indices(&self) -> BTreeSet<usize> {
        self.registry.read().await.indices()
    }

    /// `Idle` exactly when no job is active. The transient stopping /
    /// completed / error values appear only on the event stream.
    pub async fn aggregate_state(&self) -> TranslationState {
        if self.registry.read().await.is_empty() {
            TranslationState::Idle
        } else {
            TranslationState::Translating
        }
    }

    /// `ProjectOp` while any job is active, `None` otherwise.
    pub async fn lock_level(&self) -> LockLevel {
        if self.registry.read().await.is_empty() {
            LockLevel::None
        } else {
            LockLevel::ProjectOp
        }
    }

    /// Text streamed so far for `index`, or `None` when no job is running.
    /// Advisory: the runner may append concurrently.
    pub async fn live_text(&self, index: usize) -> Option<String> {
        let job = { self.registry.read().await.job(index) };
        job.map(|job| job.live_text())
    }

    pub fn subscribe_item(&self, item: usize) -> broadcast::Receiver<TranslationEventEnvelope> {
        self.eventbus.subscribe_item(item)
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<TranslationEventEnvelope> {
        self.eventbus.subscribe_all()
    }

    /// Clone of the current project, including committed translations.
    pub async fn project_snapshot(&self) -> Project {
        self.project.read().await.clone()
    }

    pub async fn task_snapshot(&self) -> TranslationTaskSnapshot {
        let runner_tasks = self.runner_tasks.read().await;
        TranslationTaskSnapshot {
            active_runner_tasks: runner_tasks.len(),
        }
    }

    pub async fn perf_snapshot(&self) -> TranslationPerfSnapshot {
        let active_jobs = self.registry.read().await.len();
        self.perf.snapshot(active_jobs)
    }

    // Structural project mutations. All of them shift or consume item
    // indices, so every one is refused while any job is in flight.

    pub async fn add_item(&self, item: Item) -> EngineResult<usize> {
        let mut project = self.project.write().await;
        self.require_structural().await?;
        Ok(project.add_item(item)?)
    }

    pub async fn insert_item(&self, index: usize, item: Item) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_structural().await?;
        Ok(project.insert_item(index, item)?)
    }

    pub async fn remove_item(&self, index: usize) -> EngineResult<Item> {
        let mut project = self.project.write().await;
        self.require_structural().await?;
        let item = project.remove_item(index)?;
        // Subscribers of the removed index see a closed channel rather than
        // another item's events once later indices shift down.
        self.eventbus.remove_item(index);
        Ok(item)
    }

    pub async fn rename_item(&self, index: usize, new_name: &str) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_structural().await?;
        Ok(project.rename_item(index, new_name)?)
    }

    pub async fn duplicate_item(&self, index: usize) -> EngineResult<usize> {
        let mut project = self.project.write().await;
        self.require_structural().await?;
        Ok(project.duplicate_item(index)?)
    }

    pub async fn move_item_up(&self, index: usize) -> EngineResult<usize> {
        let mut project = self.project.write().await;
        self.require_structural().await?;
        Ok(project.move_item_up(index)?)
    }

    pub async fn move_item_down(&self, index: usize) -> EngineResult<usize> {
        let mut project = self.project.write().await;
        self.require_structural().await?;
        Ok(project.move_item_down(index)?)
    }

    /// Swaps in a different project. Refused while any job is active; on
    /// success the token cache is cleared since every text may have changed.
    pub async fn replace_project(&self, project: Project) -> EngineResult<()> {
        let mut current = self.project.write().await;
        self.require_structural().await?;
        *current = project;
        self.counter.clear_cache();
        Ok(())
    }

    pub async fn set_source_text(
        &self,
        index: usize,
        text: impl Into<String>,
    ) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_item_editable(index).await?;
        Ok(project.set_source_text(index, text)?)
    }

    pub async fn set_translated_text(
        &self,
        index: usize,
        text: impl Into<String>,
    ) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_item_editable(index).await?;
        Ok(project.set_translated_text(index, text)?)
    }

    pub async fn set_include_in_context(&self, index: usize, include: bool) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_item_flag_edit().await?;
        Ok(project.set_include_in_context(index, include)?)
    }

    pub async fn set_title(&self, title: impl Into<String>) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_settings_edit().await?;
        project.title = title.into();
        Ok(())
    }

    pub async fn set_target_language(&self, language: impl Into<String>) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_settings_edit().await?;
        project.target_language = language.into();
        Ok(())
    }

    pub async fn set_model(&self, model: impl Into<String>) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_settings_edit().await?;
        project.model = model.into();
        Ok(())
    }

    pub async fn set_context_mode(&self, mode: ContextMode) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_settings_edit().await?;
        project.context_mode = mode;
        Ok(())
    }

    pub async fn set_context_token_budget(&self, budget: i64) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_settings_edit().await?;
        project.context_token_budget = budget;
        Ok(())
    }

    pub async fn set_prompt_overrides(&self, overrides: PromptOverrides) -> EngineResult<()> {
        let mut project = self.project.write().await;
        self.require_settings_edit().await?;
        project.prompt_overrides = overrides;
        Ok(())
    }

    fn spawn_runner_task(
        &self,
        index: usize,
        job: TranslationJob,
        request: ChatRequest,
        source_chars: usize,
    ) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let outcome = orchestrator
                .run_translation(index, &job, request, source_chars)
                .await;
            orchestrator.finalize_job(index, &job, outcome).await;

            let mut runner_tasks = orchestrator.runner_tasks.write().await;
            runner_tasks.remove(&index);
        })
    }

    /// Drives one provider stream to a terminal outcome. Every failure is
    /// converted into an outcome here; nothing escapes as a panic.
    async fn run_translation(
        &self,
        index: usize,
        job: &TranslationJob,
        request: ChatRequest,
        source_chars: usize,
    ) -> JobOutcome {
        let cancellation = job.cancellation();
        if cancellation.is_cancelled() {
            return JobOutcome::Stopped;
        }

        let handler = match self.factory.create_handler(&request.model).await {
            Ok(handler) => handler,
            Err(error) => return JobOutcome::Failed { error },
        };

        match handler.validate_connection().await {
            Ok(true) => {}
            Ok(false) => {
                return JobOutcome::ValidationFailed {
                    message: format!("Connection validation failed for model {}", request.model),
                }
            }
            Err(error) => {
                return JobOutcome::ValidationFailed {
                    message: error.to_string(),
                }
            }
        }

        let mut stream = match handler.send_request(&request).await {
            Ok(stream) => stream,
            Err(error) => return JobOutcome::Failed { error },
        };

        loop {
            let read = tokio::select! {
                _ = cancellation.cancelled() => return JobOutcome::Stopped,
                read = timeout(self.config.idle_timeout, stream.next_fragment()) => read,
            };
            match read {
                Err(_) => {
                    return JobOutcome::TimedOut {
                        message: format!(
                            "No stream activity for {}s - translation aborted",
                            self.config.idle_timeout.as_secs()
                        ),
                    }
                }
                Ok(Ok(Some(text))) => {
                    let Some(received_chars) = job.append_fragment(&text) else {
                        return JobOutcome::Stopped;
                    };
                    self.perf
                        .fragments_forwarded_total
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(item = index, received_chars, "fragment forwarded");
                    let percent = progress_percent(received_chars, source_chars);
                    self.eventbus
                        .publish_item(index, TranslationEvent::Fragment(FragmentEvent { text }));
                    self.eventbus.publish_item(
                        index,
                        TranslationEvent::Progress(ProgressEvent {
                            percent,
                            message: "Translating...".to_owned(),
                        }),
                    );
                }
                Ok(Ok(None)) => return JobOutcome::Completed,
                Ok(Err(error)) => return JobOutcome::Failed { error },
            }
        }
    }

    async fn finalize_job(&self, index: usize, job: &TranslationJob, outcome: JobOutcome) {
        match outcome {
            // stop() owns registry cleanup, accounting, and announcements.
            JobOutcome::Stopped => {}
            JobOutcome::Completed => {
                self.remove_job(index).await;
                self.commit_completed(index, job).await;
            }
            JobOutcome::ValidationFailed { message } => {
                self.remove_job(index).await;
                self.perf
                    .validation_failures_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(item = index, message = %message, "translation validation failed");
                self.eventbus.publish_item(
                    index,
                    TranslationEvent::ValidationFailed(ValidationFailedEvent { message }),
                );
                self.settle_after_failure(false).await;
            }
            JobOutcome::TimedOut { message } => {
                self.remove_job(index).await;
                self.perf
                    .jobs_timed_out_total
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(item = index, message = %message, "translation timed out; partial output discarded");
                self.eventbus
                    .publish_item(index, TranslationEvent::Timeout(TimeoutEvent { message }));
                self.settle_after_failure(false).await;
            }
            JobOutcome::Failed { error } => {
                self.remove_job(index).await;
                let kind = error.kind();
                self.perf.jobs_failed_total.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(item = index, kind = ?kind, error = %error, "translation failed; partial output discarded");
                self.eventbus.publish_item(
                    index,
                    TranslationEvent::Error(ErrorEvent {
                        message: error.to_string(),
                        kind,
                    }),
                );
                self.settle_after_failure(kind.is_authorization_class()).await;
            }
        }
    }

    /// Commits the finished buffer into the item's translated text and
    /// announces completion. The translated text is written only here, never
    /// incrementally during streaming.
    async fn commit_completed(&self, index: usize, job: &TranslationJob) {
        let translated_text = job.finish();
        let chars = translated_text.chars().count();
        {
            let mut project = self.project.write().await;
            if let Err(error) = project.set_translated_text(index, translated_text.clone()) {
                tracing::warn!(item = index, error = %error, "completed translation could not be stored");
            }
        }
        self.eventbus.publish_item(
            index,
            TranslationEvent::Progress(ProgressEvent {
                percent: 100,
                message: "Translation completed".to_owned(),
            }),
        );
        self.eventbus.publish_item(
            index,
            TranslationEvent::Completed(CompletedEvent { translated_text }),
        );
        self.perf
            .jobs_completed_total
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(item = index, chars, "translation committed");
        self.announce_state(TranslationState::Completed);
        self.release_lock_if_idle().await;
        self.schedule_idle_settle();
    }

    async fn remove_job(&self, index: usize) {
        let mut registry = self.registry.write().await;
        registry.remove(index);
    }

    /// Post-failure announcements. Authorization-class failures settle to
    /// idle at once so the caller never sees a stale translating state;
    /// everything else shows a transient error first.
    async fn settle_after_failure(&self, authorization_class: bool) {
        if authorization_class {
            self.release_lock_if_idle().await;
            self.settle_state().await;
        } else {
            self.announce_state(TranslationState::Error);
            self.release_lock_if_idle().await;
            self.schedule_idle_settle();
        }
    }

    /// Re-announces the settled aggregate state after the configured delay,
    /// unless jobs are active again by then.
    fn schedule_idle_settle(&self) {
        let orchestrator = self.clone();
        let delay = self.config.completion_idle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            orchestrator.settle_state().await;
        });
    }

    async fn settle_state(&self) {
        let idle = self.registry.read().await.is_empty();
        if idle {
            self.announce_state(TranslationState::Idle);
        } else {
            self.announce_state(TranslationState::Translating);
        }
    }

    async fn release_lock_if_idle(&self) {
        if self.registry.read().await.is_empty() {
            self.announce_lock(LockLevel::None);
        }
    }

    fn announce_state(&self, state: TranslationState) {
        {
            let mut announced = self.announced.lock().expect(ANNOUNCED_LOCK);
            if announced.state == state {
                return;
            }
            announced.state = state;
        }
        self.eventbus
            .publish_global(TranslationEvent::StateChanged(StateChangedEvent { state }));
    }

    fn announce_lock(&self, level: LockLevel) {
        {
            let mut announced = self.announced.lock().expect(ANNOUNCED_LOCK);
            if announced.lock == level {
                return;
            }
            announced.lock = level;
        }
        self.eventbus
            .publish_global(TranslationEvent::LockLevel(LockLevelEvent { level }));
    }

    async fn require_structural(&self) -> EngineResult<()> {
        if self.lock_level().await.permits_structural_ops() {
            Ok(())
        } else {
            Err(EngineError::ProjectLocked)
        }
    }

    async fn require_settings_edit(&self) -> EngineResult<()> {
        if self.lock_level().await.permits_text_edit() {
            Ok(())
        } else {
            Err(EngineError::ProjectLocked)
        }
    }

    async fn require_item_flag_edit(&self) -> EngineResult<()> {
        if self.lock_level().await.permits_item_modification() {
            Ok(())
        } else {
            Err(EngineError::ProjectLocked)
        }
    }

    async fn require_item_editable(&self, index: usize) -> EngineResult<()> {
        let registry = self.registry.read().await;
        if registry.contains(index) {
            return Err(EngineError::ItemBusy(index));
        }
        if !registry.is_empty() {
            return Err(EngineError::ProjectLocked);
        }
        Ok(())
    }
}

/// Character-count progress heuristic, capped below 100 until completion
/// reports the real 100.
fn progress_percent(received_chars: usize, source_chars: usize) -> u8 {
    let estimate = received_chars.saturating_mul(100) / source_chars.max(1);
    estimate.min(95) as u8
}
