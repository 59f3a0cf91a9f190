//! Supervisor Router: the per-request routing state machine.
//!
//! ```text
//! Start ──► Deciding ──► Invoking ──► Continuing ──► Deciding ...
//!              │             │             │
//!              └─ respond ───┴─ error ─────┴─ terminal / max_depth ──► Done
//! ```
//!
//! One request holds the session lock from Start to Done, so requests on the
//! same key are served one after another while different keys run in
//! parallel. Every failure inside the chain becomes a visible message; only
//! cancellation is returned as an `Err`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cancel::CancelFlag;
use super::consolidate::{consolidate, NO_RESPONSE_TEXT};
use super::reasoning::{ReasoningCapability, ReasoningRequest, RoutingDecision};
use crate::capabilities::{Arguments, CapabilityContext, CapabilityRegistry};
use crate::error::{DispatchError, DispatchResult};
use crate::presentation::PresentationSink;
use crate::session::{Message, Session, SessionStore, ThinkingAnnotation};

/// Context key holding the name of the last capability whose step committed.
pub const ACTIVE_CAPABILITY: &str = "active_capability";

// ---------------------------------------------------------------------------
// Configuration and request / response types
// ---------------------------------------------------------------------------

/// Limits applied to every routing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Maximum capability invocations per request.
    pub max_depth: usize,
    pub invocation_timeout: Duration,
    pub reasoning_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            invocation_timeout: Duration::from_secs(120),
            reasoning_timeout: Duration::from_secs(120),
        }
    }
}

/// A request entering the router.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundRequest {
    pub session_key: String,
    pub user_text: String,
    /// Context variables to set before routing starts.
    #[serde(default)]
    pub context: Option<BTreeMap<String, String>>,
    /// Context variables to set only where the session has no value yet.
    /// Applied under the session lock, after `context`.
    #[serde(default)]
    pub context_defaults: Option<BTreeMap<String, String>>,
    /// Answer with the consolidated (longest informative) message instead
    /// of the last one.
    #[serde(default)]
    pub consolidate: bool,
    /// Return the full session transcript with the response.
    #[serde(default)]
    pub include_transcript: bool,
}

impl InboundRequest {
    pub fn new(session_key: impl Into<String>, user_text: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            user_text: user_text.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.context
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_default_context(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.context_defaults
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn consolidated(mut self) -> Self {
        self.consolidate = true;
        self
    }

    pub fn with_transcript(mut self) -> Self {
        self.include_transcript = true;
        self
    }
}

/// Why a routing chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A terminal capability produced the answer.
    Terminal,
    /// The reasoning capability answered directly.
    DirectAnswer,
    /// The reasoning capability chose to stop without further text.
    Terminated,
    /// `max_depth` invocations were made; the last result is returned.
    DepthExceeded,
    SchemaViolation,
    Unregistered,
    HandlerFailure,
    ReasoningFailure,
}

/// Outcome of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<Message>>,
    /// Capability invocations performed.
    pub depth: usize,
    pub stop_reason: StopReason,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes requests between the reasoning capability and the registry.
#[derive(Clone)]
pub struct SupervisorRouter {
    registry: Arc<CapabilityRegistry>,
    reasoner: Arc<dyn ReasoningCapability>,
    store: Arc<SessionStore>,
    sink: Option<Arc<dyn PresentationSink>>,
    config: RouterConfig,
}

impl SupervisorRouter {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        reasoner: Arc<dyn ReasoningCapability>,
        store: Arc<SessionStore>,
    ) -> Self {
        Self {
            registry,
            reasoner,
            store,
            sink: None,
            config: RouterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn PresentationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Same registry, store and sink, different reasoning capability.
    pub fn with_reasoner(&self, reasoner: Arc<dyn ReasoningCapability>) -> Self {
        Self {
            reasoner,
            ..self.clone()
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route a request that cannot be cancelled.
    pub async fn route(&self, request: InboundRequest) -> DispatchResult<RouterResponse> {
        self.route_with_cancel(request, &CancelFlag::new()).await
    }

    /// Route a request, checking `cancel` between steps.
    ///
    /// Returns `Err(Cancelled)` if the flag was raised; steps committed
    /// before that remain in the session.
    pub async fn route_with_cancel(
        &self,
        request: InboundRequest,
        cancel: &CancelFlag,
    ) -> DispatchResult<RouterResponse> {
        let key = request.session_key.as_str();
        let handle = self.store.get_or_create(key);
        let mut session = handle.lock().await;

        log::debug!(
            "Routing request for session '{}' ({} prior messages)",
            key,
            session.len()
        );

        if let Some(context) = &request.context {
            for (name, value) in context {
                session.set_context(name.as_str(), value.as_str());
            }
        }
        if let Some(defaults) = &request.context_defaults {
            for (name, value) in defaults {
                if session.get_context(name).is_none() {
                    session.set_context(name.as_str(), value.as_str());
                }
            }
        }
        let start = session.append(Message::user(request.user_text.as_str()));

        let mut depth = 0usize;
        let stop_reason = loop {
            self.check_cancel(cancel, key)?;

            // Deciding
            let decision = match self.decide(&session).await {
                Ok(decision) => decision,
                Err(err) => {
                    log::warn!("Session '{}': {}", key, err);
                    self.commit(&mut session, Message::error(&err), Vec::new());
                    break StopReason::ReasoningFailure;
                }
            };
            self.check_cancel(cancel, key)?;

            let (name, arguments) = match decision {
                RoutingDecision::Respond { text } => {
                    log::debug!("Session '{}': direct answer", key);
                    self.commit(&mut session, Message::assistant(text), Vec::new());
                    break StopReason::DirectAnswer;
                }
                RoutingDecision::Terminate => {
                    log::debug!("Session '{}': reasoning chose to stop", key);
                    break StopReason::Terminated;
                }
                RoutingDecision::Invoke {
                    capability,
                    arguments,
                } => (capability, arguments),
            };

            if depth >= self.config.max_depth {
                log::warn!(
                    "Session '{}': {}; not invoking '{}'",
                    key,
                    DispatchError::DepthExceeded {
                        max_depth: self.config.max_depth
                    },
                    name
                );
                break StopReason::DepthExceeded;
            }

            // Invoking
            match self.invoke(&mut session, &name, arguments, cancel).await? {
                StepOutcome::Continue => {
                    depth += 1;
                    if depth >= self.config.max_depth {
                        log::warn!(
                            "Session '{}': {}; returning last result",
                            key,
                            DispatchError::DepthExceeded {
                                max_depth: self.config.max_depth
                            }
                        );
                        break StopReason::DepthExceeded;
                    }
                }
                StepOutcome::Terminal => {
                    depth += 1;
                    break StopReason::Terminal;
                }
                StepOutcome::Failed(reason) => {
                    if reason == StopReason::HandlerFailure {
                        depth += 1;
                    }
                    break reason;
                }
            }
        };

        let produced = session.messages_since(start + 1);
        let text = if request.consolidate {
            consolidate(produced)
        } else {
            produced
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_else(|| NO_RESPONSE_TEXT.to_string())
        };

        log::debug!(
            "Session '{}' done: {:?} after {} invocation(s)",
            key,
            stop_reason,
            depth
        );

        Ok(RouterResponse {
            text,
            transcript: request
                .include_transcript
                .then(|| session.messages().to_vec()),
            depth,
            stop_reason,
        })
    }

    fn check_cancel(&self, cancel: &CancelFlag, key: &str) -> DispatchResult<()> {
        if cancel.is_cancelled() {
            log::info!("Request for session '{}' cancelled", key);
            return Err(DispatchError::Cancelled {
                session_key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn decide(&self, session: &Session) -> DispatchResult<RoutingDecision> {
        let request = ReasoningRequest {
            message_history: session.messages().to_vec(),
            available_capabilities: self.registry.descriptors(),
            context: session.context().clone(),
        };

        match tokio::time::timeout(self.config.reasoning_timeout, self.reasoner.decide(&request))
            .await
        {
            Ok(Ok(response)) => Ok(response.into()),
            Ok(Err(e)) => Err(DispatchError::ReasoningFailure {
                message: e.to_string(),
            }),
            Err(_) => Err(DispatchError::ReasoningFailure {
                message: format!(
                    "timed out after {:.1} seconds",
                    self.config.reasoning_timeout.as_secs_f64()
                ),
            }),
        }
    }

    async fn invoke(
        &self,
        session: &mut Session,
        name: &str,
        arguments: Arguments,
        cancel: &CancelFlag,
    ) -> DispatchResult<StepOutcome> {
        let capability = match self.registry.resolve(name) {
            Ok(capability) => capability,
            Err(err) => {
                log::warn!("Session '{}': {}", session.key(), err);
                let notice = Message::assistant(format!(
                    "I could not route this request: {}. Please rephrase or ask for something else.",
                    err
                ))
                .with_capability(name)
                .with_error_kind(err.kind());
                self.commit(session, notice, Vec::new());
                return Ok(StepOutcome::Failed(StopReason::Unregistered));
            }
        };

        if let Err(err) = capability.validate(&arguments) {
            log::warn!("Session '{}': {}", session.key(), err);
            self.commit(session, Message::error(&err).with_capability(name), Vec::new());
            return Ok(StepOutcome::Failed(StopReason::SchemaViolation));
        }

        self.emit(
            session.key(),
            &Message::assistant("")
                .with_capability(name)
                .with_thinking(ThinkingAnnotation::pending(format!("Calling {}", name))),
        );
        log::debug!("Session '{}': invoking '{}'", session.key(), name);

        let ctx = CapabilityContext::new(session.key(), session.context().clone());
        let result = capability
            .invoke(arguments, &ctx, self.config.invocation_timeout)
            .await;

        // The handler ran to completion; drop its result if we were cancelled meanwhile.
        self.check_cancel(cancel, session.key())?;

        match result {
            Ok(output) => {
                let terminal = output.terminal;
                let mut updates = output.context_updates;
                updates.push((ACTIVE_CAPABILITY.to_string(), name.to_string()));
                let message = output
                    .message
                    .with_capability(name)
                    .with_thinking(ThinkingAnnotation::done(format!("Called {}", name)));
                self.commit(session, message, updates);
                Ok(if terminal {
                    StepOutcome::Terminal
                } else {
                    StepOutcome::Continue
                })
            }
            Err(err) => {
                log::warn!("Session '{}': {}", session.key(), err);
                self.commit(session, Message::error(&err).with_capability(name), Vec::new());
                Ok(StepOutcome::Failed(StopReason::HandlerFailure))
            }
        }
    }

    fn commit(&self, session: &mut Session, message: Message, updates: Vec<(String, String)>) {
        let position = session.commit_step(message, updates);
        if let Some(committed) = session.messages().get(position) {
            self.emit(session.key(), committed);
        }
    }

    fn emit(&self, key: &str, message: &Message) {
        if let Some(sink) = &self.sink {
            sink.emit(key, message);
        }
    }
}

enum StepOutcome {
    Continue,
    Terminal,
    Failed(StopReason),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        CapabilityContext, CapabilityHandler, CapabilityOutput, FieldType, FnHandler, InputSchema,
    };
    use crate::error::HandlerError;
    use crate::presentation::CollectingSink;
    use crate::session::{Role, ThinkingStatus};
    use crate::supervisor::ReasoningResponse;
    use crate::test_support::ScriptedReasoner;
    use async_trait::async_trait;
    use futures::future::join_all;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn args(value: serde_json::Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn echo_registry(calls: Arc<AtomicUsize>) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                "echo",
                "Echo the given text",
                InputSchema::new().required("text", FieldType::String, "Text to echo"),
                Arc::new(FnHandler::new(move |args, _ctx| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let text = args["text"].as_str().unwrap_or_default().to_string();
                    Ok(CapabilityOutput::finish(text))
                })),
                true,
            )
            .unwrap();
        registry
    }

    fn loop_registry(calls: Arc<AtomicUsize>) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                "loop",
                "Always wants more",
                InputSchema::new(),
                Arc::new(FnHandler::new(move |_args, _ctx| {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(CapabilityOutput::proceed(format!("iteration {}", n)))
                })),
                false,
            )
            .unwrap();
        registry
    }

    fn router(registry: CapabilityRegistry, reasoner: ScriptedReasoner) -> SupervisorRouter {
        SupervisorRouter::new(
            Arc::new(registry),
            Arc::new(reasoner),
            Arc::new(SessionStore::new()),
        )
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate(
            "echo",
            args(json!({"text": "hello"})),
        ));
        let router = router(echo_registry(Arc::clone(&calls)), reasoner);

        let resp = router.route(InboundRequest::new("s1", "hello")).await.unwrap();
        assert_eq!(resp.text, "hello");
        assert_eq!(resp.stop_reason, StopReason::Terminal);
        assert_eq!(resp.depth, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let session = router.store().snapshot("s1").await.unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session.messages()[0].role, Role::User);
        assert_eq!(session.messages()[1].capability(), Some("echo"));
        assert_eq!(session.get_context(ACTIVE_CAPABILITY), Some("echo"));
    }

    #[tokio::test]
    async fn test_unregistered_capability_falls_back_to_notice() {
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate("missing", Arguments::new()));
        let router = router(CapabilityRegistry::new(), reasoner);

        let resp = router.route(InboundRequest::new("s2", "do it")).await.unwrap();
        assert_eq!(resp.stop_reason, StopReason::Unregistered);
        assert!(resp.text.contains("'missing' is not registered"));
        assert_eq!(resp.depth, 0);

        let session = router.store().snapshot("s2").await.unwrap();
        assert_eq!(
            session.last_message().and_then(|m| m.metadata.error.as_deref()),
            Some("unregistered")
        );
    }

    #[tokio::test]
    async fn test_depth_limit_returns_last_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate("loop", Arguments::new()));
        let router = router(loop_registry(Arc::clone(&calls)), reasoner).with_config(RouterConfig {
            max_depth: 2,
            ..RouterConfig::default()
        });

        let resp = router.route(InboundRequest::new("s3", "go")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(resp.depth, 2);
        assert_eq!(resp.stop_reason, StopReason::DepthExceeded);
        assert_eq!(resp.text, "iteration 2");
    }

    #[tokio::test]
    async fn test_depth_never_exceeds_limit() {
        for max_depth in 1..=5 {
            let calls = Arc::new(AtomicUsize::new(0));
            let reasoner =
                ScriptedReasoner::always(ReasoningResponse::delegate("loop", Arguments::new()));
            let router = router(loop_registry(Arc::clone(&calls)), reasoner).with_config(
                RouterConfig {
                    max_depth,
                    ..RouterConfig::default()
                },
            );
            let resp = router.route(InboundRequest::new("s", "go")).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), max_depth);
            assert!(!resp.text.is_empty());
        }
    }

    #[tokio::test]
    async fn test_zero_depth_invokes_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate("loop", Arguments::new()));
        let router = router(loop_registry(Arc::clone(&calls)), reasoner).with_config(RouterConfig {
            max_depth: 0,
            ..RouterConfig::default()
        });

        let resp = router.route(InboundRequest::new("s0", "go")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(resp.depth, 0);
        assert_eq!(resp.stop_reason, StopReason::DepthExceeded);
        assert_eq!(resp.text, NO_RESPONSE_TEXT);
        assert_eq!(router.store().snapshot("s0").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_context_defaults_do_not_override_session_values() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                "whoami",
                "Reports the selected dataset",
                InputSchema::new(),
                Arc::new(FnHandler::new(|_a, ctx: &CapabilityContext| {
                    Ok(CapabilityOutput::finish(
                        ctx.get("selected_triangle").unwrap_or("none").to_string(),
                    ))
                })),
                true,
            )
            .unwrap();
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate("whoami", Arguments::new()));
        let router = router(registry, reasoner);

        let fresh = router
            .route(InboundRequest::new("d", "which?").with_default_context("selected_triangle", "clrd"))
            .await
            .unwrap();
        assert_eq!(fresh.text, "clrd");

        router.store().set_context("d", "selected_triangle", "raa").await;
        let kept = router
            .route(InboundRequest::new("d", "which?").with_default_context("selected_triangle", "clrd"))
            .await
            .unwrap();
        assert_eq!(kept.text, "raa");
    }

    #[tokio::test]
    async fn test_schema_violation_is_reported_and_handler_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate("echo", Arguments::new()));
        let router = router(echo_registry(Arc::clone(&calls)), reasoner);

        let resp = router.route(InboundRequest::new("s4", "hello")).await.unwrap();
        assert_eq!(resp.stop_reason, StopReason::SchemaViolation);
        assert!(resp.text.contains("field 'text' is required"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(resp.depth, 0);
    }

    #[tokio::test]
    async fn test_direct_answer_and_continuation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reasoner = ScriptedReasoner::sequence(vec![
            ReasoningResponse::delegate("loop", Arguments::new()),
            ReasoningResponse::final_text("All done after one step."),
        ]);
        let router = router(loop_registry(Arc::clone(&calls)), reasoner);

        let resp = router
            .route(InboundRequest::new("s5", "go").with_transcript())
            .await
            .unwrap();
        assert_eq!(resp.stop_reason, StopReason::DirectAnswer);
        assert_eq!(resp.text, "All done after one step.");
        assert_eq!(resp.depth, 1);
        let transcript = resp.transcript.unwrap();
        let contents: Vec<_> = transcript.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["go", "iteration 1", "All done after one step."]);
    }

    #[tokio::test]
    async fn test_handler_failure_is_recorded() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                "flaky",
                "Fails",
                InputSchema::new(),
                Arc::new(FnHandler::new(|_a, _c| Err("backend unreachable".into()))),
                false,
            )
            .unwrap();
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate("flaky", Arguments::new()));
        let router = router(registry, reasoner);

        let resp = router.route(InboundRequest::new("s6", "go")).await.unwrap();
        assert_eq!(resp.stop_reason, StopReason::HandlerFailure);
        assert!(resp.text.starts_with("Error: "));
        assert!(resp.text.contains("backend unreachable"));

        let session = router.store().snapshot("s6").await.unwrap();
        let last = session.last_message().unwrap();
        assert_eq!(last.metadata.error.as_deref(), Some("handler_failure"));
        assert_eq!(last.capability(), Some("flaky"));
        // A failed step commits no context updates.
        assert_eq!(session.get_context(ACTIVE_CAPABILITY), None);
    }

    #[tokio::test]
    async fn test_reasoning_failure_becomes_message() {
        let router = router(CapabilityRegistry::new(), ScriptedReasoner::failing("model offline"));
        let resp = router.route(InboundRequest::new("s7", "hi")).await.unwrap();
        assert_eq!(resp.stop_reason, StopReason::ReasoningFailure);
        assert!(resp.text.contains("model offline"));
    }

    #[tokio::test]
    async fn test_inbound_context_is_visible_to_handlers() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                "whoami",
                "Reports the selected dataset",
                InputSchema::new(),
                Arc::new(FnHandler::new(|_a, ctx: &CapabilityContext| {
                    let selected = ctx.get("selected_triangle").unwrap_or("none").to_string();
                    Ok(CapabilityOutput::finish(selected).with_update("seen", "yes"))
                })),
                true,
            )
            .unwrap();
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate("whoami", Arguments::new()));
        let router = router(registry, reasoner);

        let resp = router
            .route(InboundRequest::new("s8", "which?").with_context("selected_triangle", "genins"))
            .await
            .unwrap();
        assert_eq!(resp.text, "genins");
        assert_eq!(
            router.store().get_context("s8", "seen").await.as_deref(),
            Some("yes")
        );
    }

    #[tokio::test]
    async fn test_sink_sees_pending_then_done() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate(
            "echo",
            args(json!({"text": "hello"})),
        ));
        let sink = CollectingSink::new();
        let router =
            router(echo_registry(calls), reasoner).with_sink(Arc::new(sink.clone()));

        router.route(InboundRequest::new("s9", "hello")).await.unwrap();
        let emitted = sink.messages_for("s9");
        let statuses: Vec<_> = emitted
            .iter()
            .map(|m| m.metadata.thinking.as_ref().map(|t| t.status))
            .collect();
        assert_eq!(
            statuses,
            [Some(ThinkingStatus::Pending), Some(ThinkingStatus::Done)]
        );
        assert_eq!(
            emitted[0].metadata.thinking.as_ref().unwrap().title,
            "Calling echo"
        );
    }

    /// Handler that raises the cancel flag while it runs.
    struct CancelDuringRun(CancelFlag);

    #[async_trait]
    impl CapabilityHandler for CancelDuringRun {
        async fn handle(
            &self,
            _args: Arguments,
            _ctx: &CapabilityContext,
        ) -> Result<CapabilityOutput, HandlerError> {
            self.0.cancel();
            Ok(CapabilityOutput::proceed("finished anyway"))
        }
    }

    #[tokio::test]
    async fn test_cancelled_result_is_discarded() {
        let cancel = CancelFlag::new();
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                "slow",
                "Gets cancelled",
                InputSchema::new(),
                Arc::new(CancelDuringRun(cancel.clone())),
                false,
            )
            .unwrap();
        let reasoner = ScriptedReasoner::always(ReasoningResponse::delegate("slow", Arguments::new()));
        let router = router(registry, reasoner);

        let err = router
            .route_with_cancel(InboundRequest::new("s10", "go"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");

        let session = router.store().snapshot("s10").await.unwrap();
        assert_eq!(session.len(), 1);
        assert_eq!(session.messages()[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let router = router(
            CapabilityRegistry::new(),
            ScriptedReasoner::always(ReasoningResponse::final_text("never")),
        );
        let err = router
            .route_with_cancel(InboundRequest::new("s11", "go"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Cancelled {
                session_key: "s11".into()
            }
        );
    }

    #[tokio::test]
    async fn test_consolidated_answer_prefers_longest() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reasoner = ScriptedReasoner::sequence(vec![
            ReasoningResponse::delegate("loop", Arguments::new()),
            ReasoningResponse::final_text("ok"),
        ]);
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                "loop",
                "Long result",
                InputSchema::new(),
                Arc::new(FnHandler::new(move |_a, _c| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(CapabilityOutput::proceed(
                        "The chain-ladder ultimate for RAA is 213,122 with IBNR of 52,135.",
                    ))
                })),
                false,
            )
            .unwrap();
        let router = router(registry, reasoner);

        let plain = router.route(InboundRequest::new("a", "go")).await.unwrap();
        assert_eq!(plain.text, "ok");

        let router = router.with_reasoner(Arc::new(ScriptedReasoner::sequence(vec![
            ReasoningResponse::delegate("loop", Arguments::new()),
            ReasoningResponse::final_text("ok"),
        ])));
        let consolidated = router
            .route(InboundRequest::new("b", "go").consolidated())
            .await
            .unwrap();
        assert!(consolidated.text.starts_with("The chain-ladder ultimate"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_on_one_session_do_not_interleave() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reasoner = ScriptedReasoner::echo_last_user("echo");
        let router = Arc::new(router(echo_registry(Arc::clone(&calls)), reasoner));

        let tasks = (0..20).map(|i| {
            let router = Arc::clone(&router);
            tokio::spawn(async move {
                router
                    .route(InboundRequest::new("shared", format!("msg-{}", i)))
                    .await
            })
        });
        for result in join_all(tasks).await {
            result.unwrap().unwrap();
        }

        let session = router.store().snapshot("shared").await.unwrap();
        assert_eq!(session.len(), 40);
        // Each request's reply directly follows its own user message.
        for pair in session.messages().chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content, pair[1].content);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 20);
    }
}
