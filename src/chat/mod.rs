//! Chat pipeline: the inbound-request path in front of the router.
//!
//! Per message:
//! 1. Reject empty input
//! 2. Sanitize the selected triangle against the dataset catalog
//! 3. Pick the reasoning capability (per-request API key, configured one, or refuse)
//! 4. Route with a cancel flag registered for the session
//! 5. Turn anything unexpected into an `Error: ...` reply

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::CapabilityRegistry;
use crate::error::{DispatchError, DispatchResult};
use crate::llm::{LlmConfig, OpenAiReasoner};
use crate::presentation::PresentationSink;
use crate::session::{Message, SessionStore};
use crate::specialists::{DatasetCatalog, SELECTED_TRIANGLE_KEY};
use crate::supervisor::{
    CancelFlag, InboundRequest, ReasoningCapability, RouterConfig, StopReason, SupervisorRouter,
};

/// Reply when no API key is available for the hosted model.
pub const MISSING_API_KEY_TEXT: &str = "Error: Please provide an OpenAI API key.";

// ============================================================================
// Request / Response types
// ============================================================================

/// Incoming chat message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub session_key: String,
    pub message: String,
    /// Selected sample triangle.
    #[serde(default)]
    pub triangle: Option<String>,
    /// Extra context variables.
    #[serde(default)]
    pub context: Option<BTreeMap<String, String>>,
    /// Per-request key for the hosted model.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Return the full transcript.
    #[serde(default)]
    pub transcript: bool,
    /// Consolidate to the most informative answer (default true).
    #[serde(default)]
    pub consolidate: Option<bool>,
}

impl ChatRequest {
    pub fn new(session_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Reply to a chat message.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub session_key: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<Message>>,
    /// `None` when the request was answered without routing.
    pub stop_reason: Option<StopReason>,
    pub depth: usize,
}

impl ChatResponse {
    fn unrouted(session_key: &str, text: impl Into<String>) -> Self {
        Self {
            session_key: session_key.to_string(),
            text: text.into(),
            transcript: None,
            stop_reason: None,
            depth: 0,
        }
    }
}

/// Failures the caller must handle instead of reading a reply.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

// ============================================================================
// In-flight tracking
// ============================================================================

type InFlight = DashMap<String, Vec<(u64, CancelFlag)>>;

/// Removes a request's cancel flag when the request finishes.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
    session_key: String,
    id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let empty = match self.in_flight.get_mut(&self.session_key) {
            Some(mut flags) => {
                flags.retain(|(id, _)| *id != self.id);
                flags.is_empty()
            }
            None => false,
        };
        if empty {
            self.in_flight
                .remove_if(&self.session_key, |_, flags| flags.is_empty());
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// Entry point for chat messages.
pub struct ChatService {
    registry: Arc<CapabilityRegistry>,
    store: Arc<SessionStore>,
    catalog: Arc<DatasetCatalog>,
    router_config: RouterConfig,
    sink: Option<Arc<dyn PresentationSink>>,
    reasoner: Option<Arc<dyn ReasoningCapability>>,
    llm: Option<LlmConfig>,
    in_flight: InFlight,
    next_id: AtomicU64,
}

impl ChatService {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        store: Arc<SessionStore>,
        catalog: Arc<DatasetCatalog>,
    ) -> Self {
        Self {
            registry,
            store,
            catalog,
            router_config: RouterConfig::default(),
            sink: None,
            reasoner: None,
            llm: None,
            in_flight: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Use a fixed reasoning capability for every request.
    pub fn with_reasoner(mut self, reasoner: Arc<dyn ReasoningCapability>) -> Self {
        self.reasoner = Some(reasoner);
        self
    }

    /// Use the hosted model. With a configured key it becomes the default
    /// reasoner; requests may always bring their own key.
    pub fn with_llm(mut self, llm: LlmConfig) -> DispatchResult<Self> {
        if llm.has_api_key() {
            self.reasoner = Some(Arc::new(OpenAiReasoner::new(llm.clone())?));
        }
        self.llm = Some(llm);
        Ok(self)
    }

    pub fn with_router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = config;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn PresentationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<DatasetCatalog> {
        &self.catalog
    }

    /// Number of requests currently routing for `session_key`.
    pub fn in_flight(&self, session_key: &str) -> usize {
        self.in_flight.get(session_key).map_or(0, |f| f.len())
    }

    /// Cancel every in-flight request of a session; returns how many.
    pub fn cancel(&self, session_key: &str) -> usize {
        let Some(flags) = self.in_flight.get(session_key) else {
            return 0;
        };
        for (_, flag) in flags.iter() {
            flag.cancel();
        }
        log::info!(
            "Cancelled {} in-flight request(s) for session '{}'",
            flags.len(),
            session_key
        );
        flags.len()
    }

    /// Evict a session unless a request is still routing on it.
    ///
    /// A routing request keeps its own handle, so evicting underneath it
    /// would let its steps land in a session nobody can reach.
    pub fn evict(&self, session_key: &str) -> DispatchResult<bool> {
        if self.in_flight(session_key) > 0 {
            return Err(DispatchError::Busy {
                session_key: session_key.to_string(),
            });
        }
        Ok(self.store.evict(session_key))
    }

    fn resolve_reasoner(
        &self,
        api_key: Option<&str>,
    ) -> Result<Arc<dyn ReasoningCapability>, String> {
        let request_key = api_key.map(str::trim).filter(|k| !k.is_empty());
        if let (Some(key), Some(llm)) = (request_key, &self.llm) {
            return OpenAiReasoner::with_api_key(llm.clone(), key)
                .map(|r| Arc::new(r) as Arc<dyn ReasoningCapability>)
                .map_err(|e| format!("Error: {}", e));
        }
        self.reasoner
            .clone()
            .ok_or_else(|| MISSING_API_KEY_TEXT.to_string())
    }

    fn router(&self, reasoner: Arc<dyn ReasoningCapability>) -> SupervisorRouter {
        let router = SupervisorRouter::new(
            Arc::clone(&self.registry),
            reasoner,
            Arc::clone(&self.store),
        )
        .with_config(self.router_config);
        match &self.sink {
            Some(sink) => router.with_sink(Arc::clone(sink)),
            None => router,
        }
    }

    /// Answer one chat message.
    ///
    /// Only an empty message and cancellation are errors; every other
    /// failure comes back as reply text.
    pub async fn handle(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        let key = request.session_key.as_str();
        if request.message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        log::debug!(
            "Chat message for session '{}' (triangle: {:?}, own key: {})",
            key,
            request.triangle,
            request.api_key.as_deref().map_or(false, |k| !k.trim().is_empty())
        );

        let reasoner = match self.resolve_reasoner(request.api_key.as_deref()) {
            Ok(reasoner) => reasoner,
            Err(text) => return Ok(ChatResponse::unrouted(key, text)),
        };

        let mut context = request.context.clone().unwrap_or_default();
        let requested = request
            .triangle
            .as_deref()
            .or_else(|| context.get(SELECTED_TRIANGLE_KEY).map(String::as_str))
            .map(str::to_string);
        let mut inbound = InboundRequest::new(key, request.message.as_str());
        match requested {
            Some(name) => {
                context.insert(
                    SELECTED_TRIANGLE_KEY.to_string(),
                    self.catalog.sanitize(Some(&name)),
                );
            }
            // Decided under the session lock so a concurrent selection wins.
            None => {
                inbound = inbound
                    .with_default_context(SELECTED_TRIANGLE_KEY, self.catalog.default_name());
            }
        }
        inbound.context = Some(context);
        inbound.consolidate = request.consolidate.unwrap_or(true);
        inbound.include_transcript = request.transcript;

        let cancel = CancelFlag::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.in_flight
            .entry(key.to_string())
            .or_default()
            .push((id, cancel.clone()));
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            session_key: key.to_string(),
            id,
        };

        match self.router(reasoner).route_with_cancel(inbound, &cancel).await {
            Ok(resp) => Ok(ChatResponse {
                session_key: key.to_string(),
                text: resp.text,
                transcript: resp.transcript,
                stop_reason: Some(resp.stop_reason),
                depth: resp.depth,
            }),
            Err(err @ DispatchError::Cancelled { .. }) => Err(err.into()),
            Err(err) => {
                log::error!("Chat request for session '{}' failed: {}", key, err);
                Ok(ChatResponse::unrouted(key, format!("Error: {}", err)))
            }
        }
    }
}
