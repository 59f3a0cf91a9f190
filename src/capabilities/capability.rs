//! Capability definition: a named unit of delegated work.
//!
//! A capability couples a declared [`InputSchema`], an output contract
//! (`terminal` or not) and a [`CapabilityHandler`]. Handlers only ever see
//! arguments that passed schema validation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::schema::{Arguments, InputSchema};
use crate::error::{DispatchError, DispatchResult, HandlerError};
use crate::session::Message;

// ---------------------------------------------------------------------------
// Handler contract
// ---------------------------------------------------------------------------

/// Read-only view of the session handed to a handler.
#[derive(Debug, Clone, Default)]
pub struct CapabilityContext {
    pub session_key: String,
    pub context: BTreeMap<String, String>,
}

impl CapabilityContext {
    pub fn new(session_key: impl Into<String>, context: BTreeMap<String, String>) -> Self {
        Self {
            session_key: session_key.into(),
            context,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.context.get(name).map(String::as_str)
    }
}

/// What a handler produces for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityOutput {
    /// Ask the router to stop after this step.
    pub terminal: bool,
    pub message: Message,
    /// Context variables to set, committed together with `message`.
    pub context_updates: Vec<(String, String)>,
}

impl CapabilityOutput {
    /// Assistant reply that ends the routing chain.
    pub fn finish(text: impl Into<String>) -> Self {
        Self {
            terminal: true,
            message: Message::assistant(text),
            context_updates: Vec::new(),
        }
    }

    /// Assistant reply folded back for further routing.
    pub fn proceed(text: impl Into<String>) -> Self {
        Self {
            terminal: false,
            message: Message::assistant(text),
            context_updates: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = message;
        self
    }

    pub fn with_update(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_updates.push((name.into(), value.into()));
        self
    }
}

/// The callable side of a capability.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn handle(
        &self,
        args: Arguments,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, HandlerError>;
}

/// Type alias for a boxed synchronous handler function.
pub type HandlerFn = Arc<
    dyn Fn(Arguments, &CapabilityContext) -> Result<CapabilityOutput, HandlerError>
        + Send
        + Sync,
>;

/// Handler backed by a plain function or closure.
#[derive(Clone)]
pub struct FnHandler {
    func: HandlerFn,
}

impl FnHandler {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Arguments, &CapabilityContext) -> Result<CapabilityOutput, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

#[async_trait]
impl CapabilityHandler for FnHandler {
    async fn handle(
        &self,
        args: Arguments,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, HandlerError> {
        (self.func)(args, ctx)
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Name, description and schema as advertised to the reasoning capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub terminal: bool,
}

/// A registered capability.
#[derive(Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    /// Declared output contract: a terminal capability always ends routing.
    pub terminal: bool,
    handler: Arc<dyn CapabilityHandler>,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("terminal", &self.terminal)
            .field("fields", &self.input_schema.fields.len())
            .finish()
    }
}

impl Capability {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
        handler: Arc<dyn CapabilityHandler>,
        terminal: bool,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            terminal,
            handler,
        }
    }

    pub fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            terminal: self.terminal,
        }
    }

    pub fn validate(&self, args: &Arguments) -> DispatchResult<()> {
        self.input_schema.validate(&self.name, args)
    }

    /// Validate `args`, then run the handler under `timeout`.
    ///
    /// Handler errors and timeouts both become `HandlerFailure`. The
    /// returned output is final iff the capability is declared terminal or
    /// the handler asked to stop.
    pub async fn invoke(
        &self,
        args: Arguments,
        ctx: &CapabilityContext,
        timeout: Duration,
    ) -> DispatchResult<CapabilityOutput> {
        self.validate(&args)?;

        let mut output = match tokio::time::timeout(timeout, self.handler.handle(args, ctx)).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(DispatchError::HandlerFailure {
                    capability: self.name.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DispatchError::HandlerFailure {
                    capability: self.name.clone(),
                    message: format!("timed out after {:.1} seconds", timeout.as_secs_f64()),
                })
            }
        };

        output.terminal |= self.terminal;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::schema::FieldType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_echo(calls: Arc<AtomicUsize>) -> Capability {
        let handler = FnHandler::new(move |args, _ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(CapabilityOutput::proceed(text))
        });
        Capability::new(
            "echo",
            "Echo text back",
            InputSchema::new().required("text", FieldType::String, "text"),
            Arc::new(handler),
            true,
        )
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cap = counting_echo(Arc::clone(&calls));

        let err = cap
            .invoke(Arguments::new(), &CapabilityContext::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema_violation");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declared_terminal_overrides_output() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cap = counting_echo(Arc::clone(&calls));
        let mut args = Arguments::new();
        args.insert("text".into(), "hello".into());

        let out = cap
            .invoke(args, &CapabilityContext::default(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(out.terminal);
        assert_eq!(out.message.content, "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct Sleepy;

    #[async_trait]
    impl CapabilityHandler for Sleepy {
        async fn handle(
            &self,
            _args: Arguments,
            _ctx: &CapabilityContext,
        ) -> Result<CapabilityOutput, HandlerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(CapabilityOutput::finish("late"))
        }
    }

    #[tokio::test]
    async fn test_timeout_is_handler_failure() {
        let cap = Capability::new("slow", "", InputSchema::new(), Arc::new(Sleepy), false);
        let err = cap
            .invoke(
                Arguments::new(),
                &CapabilityContext::default(),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "handler_failure");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_handler_error_is_handler_failure() {
        let handler = FnHandler::new(|_args, _ctx| Err("upstream unavailable".into()));
        let cap = Capability::new("flaky", "", InputSchema::new(), Arc::new(handler), false);
        let err = cap
            .invoke(Arguments::new(), &CapabilityContext::default(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::HandlerFailure {
                capability: "flaky".into(),
                message: "upstream unavailable".into(),
            }
        );
    }
}
