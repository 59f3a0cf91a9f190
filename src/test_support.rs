//! Test doubles for the reasoning boundary and the reserving backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::HandlerError;
use crate::specialists::ReservingBackend;
use crate::supervisor::{ReasoningCapability, ReasoningRequest, ReasoningResponse};

type Script = Box<dyn Fn(&ReasoningRequest, usize) -> Result<ReasoningResponse, HandlerError> + Send + Sync>;

/// Reasoning capability that follows a fixed script.
pub(crate) struct ScriptedReasoner {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoner {
    fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Same answer every time.
    pub fn always(response: ReasoningResponse) -> Self {
        Self::new(Box::new(move |_, _| Ok(response.clone())))
    }

    /// Answers in order; the last one repeats.
    pub fn sequence(responses: Vec<ReasoningResponse>) -> Self {
        Self::new(Box::new(move |_, call| {
            let idx = call.min(responses.len().saturating_sub(1));
            responses
                .get(idx)
                .cloned()
                .ok_or_else(|| "empty script".into())
        }))
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::new(Box::new(move |_, _| Err(message.clone().into())))
    }

    /// Delegate to `capability` with `{"text": <last user message>}`.
    pub fn echo_last_user(capability: &str) -> Self {
        let capability = capability.to_string();
        Self::new(Box::new(move |req, _| {
            let text = req.last_user_text().unwrap_or_default();
            let mut args = serde_json::Map::new();
            args.insert("text".into(), Value::String(text.to_string()));
            Ok(ReasoningResponse::delegate(capability.clone(), args))
        }))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ReasoningCapability for ScriptedReasoner {
    async fn decide(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        (self.script)(request, call)
    }
}

/// In-memory reserving backend with canned results.
#[derive(Default)]
pub(crate) struct StubBackend {
    overrides: HashMap<String, Value>,
    failing: Vec<String>,
    calls: Mutex<Vec<(String, String, Value)>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, method: &str, value: Value) -> Self {
        self.overrides.insert(method.to_string(), value);
        self
    }

    pub fn failing(mut self, method: &str) -> Self {
        self.failing.push(method.to_string());
        self
    }

    /// `(dataset, method, params)` of every call, in order.
    pub fn calls(&self) -> Vec<(String, String, Value)> {
        self.calls.lock().clone()
    }

    fn canned(dataset: &str, method: &str, params: &Value) -> Option<Value> {
        let value = match method {
            "load" | "summary" => json!({
                "name": dataset,
                "shape": [1, 1, 10, 10],
                "is_cumulative": true,
                "grain": "OYDY",
                "columns": ["values"],
            }),
            "validate" => json!({
                "is_valid": true,
                "checks": {"is_cumulative": true, "has_nan": false},
            }),
            "convert" => json!({
                "is_cumulative": params.get("to_cumulative").cloned().unwrap_or(json!(true)),
            }),
            "grain" => json!({"grain": params.get("grain").cloned().unwrap_or(Value::Null)}),
            "latest_diagonal" => json!({"1981": 18834.0, "1982": 16704.0}),
            "development" => json!({
                "methods_used": ["volume"],
                "link_ratios": {"12-24": 2.999, "24-36": 1.624},
            }),
            "tail" => json!({
                "tail_method": params.get("tail_method").cloned().unwrap_or(json!("constant")),
                "tail_factor": 1.05,
            }),
            "ibnr" => json!({
                "method": params.get("method").cloned().unwrap_or(json!("chainladder")),
                "ultimate_losses": {"1981": 18834.0, "1982": 16857.95},
                "ibnr_estimates": {"1981": 0.0, "1982": 153.95},
            }),
            "bootstrap" => json!({
                "n_simulations": params.get("n_simulations").cloned().unwrap_or(json!(1000)),
                "ibnr_mean": {"values": 52000.0},
                "ibnr_std_dev": {"values": 18000.0},
            }),
            "compare" => json!({
                "results": {
                    "chainladder": {"ultimate": {"1982": 16857.95}, "ibnr": {"1982": 153.95}},
                    "benktander": {"ultimate": {"1982": 16800.0}, "ibnr": {"1982": 96.0}},
                }
            }),
            "plot" => json!({
                "image_path": format!(
                    "/tmp/{}_{}.png",
                    dataset,
                    params.get("plot_type").and_then(Value::as_str).unwrap_or("plot")
                ),
            }),
            _ => return None,
        };
        Some(value)
    }
}

#[async_trait]
impl ReservingBackend for StubBackend {
    async fn invoke(
        &self,
        dataset: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, HandlerError> {
        self.calls
            .lock()
            .push((dataset.to_string(), method.to_string(), params.clone()));

        if self.failing.iter().any(|m| m == method) {
            return Err(format!("{} failed for '{}'", method, dataset).into());
        }
        if let Some(value) = self.overrides.get(method) {
            return Ok(value.clone());
        }
        Self::canned(dataset, method, &params)
            .ok_or_else(|| format!("unknown method '{}'", method).into())
    }
}
