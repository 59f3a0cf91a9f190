//! Boundary to the external actuarial computation service.
//!
//! Triangle construction, development factors and reserving methods are not
//! computed here. Specialists name a dataset and a method and get a JSON
//! table back.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::HandlerError;

/// Black-box reserving computation.
#[async_trait]
pub trait ReservingBackend: Send + Sync {
    /// Run `method` on `dataset` with method-specific `params`.
    async fn invoke(&self, dataset: &str, method: &str, params: Value)
        -> Result<Value, HandlerError>;
}

#[derive(Debug, Serialize)]
struct InvokeBody<'a> {
    dataset: &'a str,
    method: &'a str,
    params: Value,
}

/// Backend reached over HTTP: `POST <base_url>/invoke`.
#[derive(Debug, Clone)]
pub struct HttpReservingBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReservingBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, HandlerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/invoke", self.base_url)
    }
}

#[async_trait]
impl ReservingBackend for HttpReservingBackend {
    async fn invoke(
        &self,
        dataset: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, HandlerError> {
        log::debug!("Reserving backend: {} on '{}'", method, dataset);

        let response = self
            .client
            .post(self.endpoint())
            .json(&InvokeBody {
                dataset,
                method,
                params,
            })
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(format!(
                "reserving backend returned {} for {} on '{}': {}",
                status,
                method,
                dataset,
                text.chars().take(300).collect::<String>()
            )
            .into());
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| format!("invalid JSON from reserving backend: {}", e))?;
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(format!("{} on '{}' failed: {}", method, dataset, error).into());
        }
        Ok(body)
    }
}
