//! Data specialist: discovering, loading and inspecting triangles.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::models::DataAction;
use super::{pretty, str_arg, target_triangle, DatasetCatalog, ReservingBackend, SELECTED_TRIANGLE_KEY};
use crate::capabilities::{
    Arguments, Capability, CapabilityContext, CapabilityHandler, CapabilityOutput, FieldType,
    InputSchema,
};
use crate::error::HandlerError;

pub const NAME: &str = "data_agent";

const DESCRIPTION: &str = "Data preparation expert for loss triangles. Lists and loads sample \
    triangles, summarises their structure (origin, development, grain, cumulative or incremental), \
    validates them before analysis, converts between cumulative and incremental form, changes the \
    grain and extracts the latest diagonal.";

pub fn input_schema() -> InputSchema {
    InputSchema::new()
        .required("action", FieldType::String, "Operation to perform")
        .one_of(DataAction::NAMES)
        .optional(
            "triangle",
            FieldType::String,
            "Sample triangle name; defaults to the selected triangle",
        )
        .optional(
            "to_cumulative",
            FieldType::Boolean,
            "For convert: true for cumulative, false for incremental",
        )
        .optional(
            "grain",
            FieldType::String,
            "For grain: target grain such as OYDY, OYDQ or OQDQ",
        )
}

pub fn capability(backend: Arc<dyn ReservingBackend>, catalog: Arc<DatasetCatalog>) -> Capability {
    Capability::new(
        NAME,
        DESCRIPTION,
        input_schema(),
        Arc::new(DataAgent { backend, catalog }),
        false,
    )
}

pub struct DataAgent {
    backend: Arc<dyn ReservingBackend>,
    catalog: Arc<DatasetCatalog>,
}

impl DataAgent {
    fn describe_load(triangle: &str, info: &Value) -> String {
        let shape = info
            .get("shape")
            .map(Value::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        let grain = info.get("grain").and_then(Value::as_str).unwrap_or("unknown");
        let format = match info.get("is_cumulative").and_then(Value::as_bool) {
            Some(true) => "cumulative",
            Some(false) => "incremental",
            None => "unknown format",
        };
        format!(
            "Loaded triangle '{}' (shape {}, grain {}, {}). It is now the selected triangle.",
            triangle, shape, grain, format
        )
    }
}

#[async_trait]
impl CapabilityHandler for DataAgent {
    async fn handle(
        &self,
        args: Arguments,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, HandlerError> {
        let action = str_arg(&args, "action")
            .and_then(DataAction::parse)
            .ok_or("missing or unknown action")?;
        let triangle = target_triangle(&args, ctx, &self.catalog);

        let output = match action {
            DataAction::ListTriangles => CapabilityOutput::proceed(format!(
                "Available sample triangles: {}. The default is '{}'.",
                self.catalog.names().join(", "),
                self.catalog.default_name()
            )),
            DataAction::Load => {
                let info = self.backend.invoke(&triangle, "load", json!({})).await?;
                CapabilityOutput::proceed(Self::describe_load(&triangle, &info))
                    .with_update(SELECTED_TRIANGLE_KEY, triangle.as_str())
            }
            DataAction::Summary => {
                let summary = self.backend.invoke(&triangle, "summary", json!({})).await?;
                CapabilityOutput::proceed(format!(
                    "Summary of triangle '{}':\n{}",
                    triangle,
                    pretty(&summary)
                ))
            }
            DataAction::Validate => {
                let result = self.backend.invoke(&triangle, "validate", json!({})).await?;
                let valid = result.get("is_valid").and_then(Value::as_bool).unwrap_or(false);
                let checks = result.get("checks").cloned().unwrap_or(Value::Null);
                let verdict = if valid {
                    "is valid for analysis"
                } else {
                    "failed validation"
                };
                CapabilityOutput::proceed(format!(
                    "Triangle '{}' {}. Checks:\n{}",
                    triangle,
                    verdict,
                    pretty(&checks)
                ))
            }
            DataAction::Convert => {
                let to_cumulative = args
                    .get("to_cumulative")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let result = self
                    .backend
                    .invoke(&triangle, "convert", json!({"to_cumulative": to_cumulative}))
                    .await?;
                CapabilityOutput::proceed(format!(
                    "Converted triangle '{}' to {} form:\n{}",
                    triangle,
                    if to_cumulative { "cumulative" } else { "incremental" },
                    pretty(&result)
                ))
            }
            DataAction::Grain => {
                let grain = str_arg(&args, "grain").ok_or("the grain action needs a 'grain' argument")?;
                let result = self
                    .backend
                    .invoke(&triangle, "grain", json!({"grain": grain}))
                    .await?;
                CapabilityOutput::proceed(format!(
                    "Changed the grain of triangle '{}' to {}:\n{}",
                    triangle,
                    grain,
                    pretty(&result)
                ))
            }
            DataAction::LatestDiagonal => {
                let diagonal = self
                    .backend
                    .invoke(&triangle, "latest_diagonal", json!({}))
                    .await?;
                CapabilityOutput::proceed(format!(
                    "Latest diagonal of triangle '{}' (total {}):\n{}",
                    triangle,
                    super::format_amount(super::total(&diagonal)),
                    pretty(&diagonal)
                ))
            }
        };

        Ok(output)
    }
}
