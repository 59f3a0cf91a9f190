//! Visualization specialist.
//!
//! Single plots go to the backend's `plot` method one at a time. The
//! `diagnostics` kind renders a fixed set of plots and records every image
//! that was created; plots the backend fails on are skipped.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::models::{Average, IbnrMethod, PlotType};
use super::{str_arg, target_triangle, DatasetCatalog, ReservingBackend, VISUALIZATION_PATHS_KEY};
use crate::capabilities::{
    Arguments, Capability, CapabilityContext, CapabilityHandler, CapabilityOutput, FieldType,
    InputSchema,
};
use crate::error::HandlerError;

pub const NAME: &str = "visualization_agent";

const DESCRIPTION: &str = "Visualization expert for loss triangles. Creates heatmaps, development \
    charts, development factor charts, ultimate loss plots, bootstrap IBNR distributions, residual \
    and actual-versus-expected diagnostics, and method comparisons, or a full diagnostic set at \
    once. Returns the path of each generated image.";

const DEFAULT_FACTOR_AVERAGES: [Average; 2] = [Average::Volume, Average::Simple];
const DEFAULT_COMPARED_METHODS: [IbnrMethod; 2] =
    [IbnrMethod::Chainladder, IbnrMethod::BornhuetterFerguson];
const DEFAULT_SIMULATIONS: i64 = 1000;
const DEFAULT_RANDOM_STATE: i64 = 42;

/// Plots rendered by the `diagnostics` kind, in order.
const DIAGNOSTIC_SET: [PlotType; 4] = [
    PlotType::Development,
    PlotType::Heatmap,
    PlotType::DevelopmentFactors,
    PlotType::Comparison,
];

pub fn input_schema() -> InputSchema {
    InputSchema::new()
        .required("plot_type", FieldType::String, "Kind of plot to create")
        .one_of(PlotType::NAMES)
        .optional(
            "triangle",
            FieldType::String,
            "Sample triangle name; defaults to the selected triangle",
        )
        .optional("title", FieldType::String, "Plot title")
        .optional(
            "compare_with",
            FieldType::String,
            "For comparison: second triangle to compare against; without it the \
             Chain Ladder and Bornhuetter-Ferguson ultimates are compared",
        )
        .optional(
            "cumulative",
            FieldType::Boolean,
            "For development: plot cumulative (true) or incremental (false) values",
        )
        .optional(
            "methods",
            FieldType::Array,
            "For development_factors: averaging methods (volume, simple, regression)",
        )
        .optional(
            "n_periods",
            FieldType::Integer,
            "For development_factors: number of latest periods to average over",
        )
        .optional(
            "n_simulations",
            FieldType::Integer,
            "For bootstrap_distribution: number of simulated triangles",
        )
        .optional(
            "random_state",
            FieldType::Integer,
            "For bootstrap_distribution: random seed",
        )
}

pub fn capability(backend: Arc<dyn ReservingBackend>, catalog: Arc<DatasetCatalog>) -> Capability {
    Capability::new(
        NAME,
        DESCRIPTION,
        input_schema(),
        Arc::new(VisualizationAgent { backend, catalog }),
        false,
    )
}

pub struct VisualizationAgent {
    backend: Arc<dyn ReservingBackend>,
    catalog: Arc<DatasetCatalog>,
}

/// Image paths recorded in the session so far.
pub fn recorded_paths(ctx: &CapabilityContext) -> Vec<String> {
    ctx.get(VISUALIZATION_PATHS_KEY)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

/// One single-plot call to the backend.
#[derive(Debug)]
struct PlotRequest {
    kind: PlotType,
    title: String,
    params: Value,
}

fn positive_int(args: &Arguments, name: &str, default: Option<i64>) -> Result<Option<i64>, HandlerError> {
    match args.get(name).and_then(Value::as_i64).or(default) {
        Some(n) if n <= 0 => Err(format!("{} must be positive", name).into()),
        other => Ok(other),
    }
}

fn factor_averages(args: &Arguments) -> Result<Vec<Average>, HandlerError> {
    let Some(items) = args.get("methods").and_then(Value::as_array) else {
        return Ok(DEFAULT_FACTOR_AVERAGES.to_vec());
    };
    let mut averages = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str().and_then(Average::parse) {
            Some(average) => averages.push(average),
            None => {
                return Err(format!(
                    "unknown averaging method {}; expected any of: {}",
                    item,
                    Average::NAMES.join(", ")
                )
                .into())
            }
        }
    }
    if averages.is_empty() {
        return Err("methods must name at least one averaging method".into());
    }
    Ok(averages)
}

/// Backend parameters and the default title for a single plot.
fn plot_request(kind: PlotType, triangle: &str, args: &Arguments) -> Result<PlotRequest, HandlerError> {
    let mut params = json!({ "plot_type": kind.as_str() });
    let default_title = match kind {
        PlotType::Heatmap => format!("Heatmap of {}", triangle),
        PlotType::Development => {
            if let Some(cumulative) = args.get("cumulative").and_then(Value::as_bool) {
                params["cumulative"] = json!(cumulative);
            }
            format!("Development Patterns for {}", triangle)
        }
        PlotType::Ultimates => format!("Ultimate Loss Estimates for {}", triangle),
        PlotType::Residuals => format!("Residual Plot for {}", triangle),
        PlotType::ActualVsExpected => format!("Actual vs Ultimate for {}", triangle),
        PlotType::Comparison => match str_arg(args, "compare_with").filter(|s| !s.trim().is_empty()) {
            Some(other) => {
                params["compare_with"] = json!(other);
                format!("Comparison: {} vs {}", triangle, other)
            }
            None => {
                let methods: Vec<&str> = DEFAULT_COMPARED_METHODS.iter().map(|m| m.as_str()).collect();
                params["methods"] = json!(methods);
                format!("Method Comparison for {}", triangle)
            }
        },
        PlotType::DevelopmentFactors => {
            let averages: Vec<&str> = factor_averages(args)?.iter().map(|a| a.as_str()).collect();
            params["methods"] = json!(averages);
            if let Some(n) = positive_int(args, "n_periods", None)? {
                params["n_periods"] = json!(n);
            }
            format!(
                "Development Factors for {} using {} methods",
                triangle,
                averages.join(", ")
            )
        }
        PlotType::BootstrapDistribution => {
            let n = positive_int(args, "n_simulations", Some(DEFAULT_SIMULATIONS))?
                .unwrap_or(DEFAULT_SIMULATIONS);
            params["n_simulations"] = json!(n);
            params["random_state"] = json!(args
                .get("random_state")
                .and_then(Value::as_i64)
                .unwrap_or(DEFAULT_RANDOM_STATE));
            format!("Bootstrap Distribution of IBNR for {} (n={})", triangle, n)
        }
        PlotType::Diagnostics => return Err("diagnostics is a plot set, not a single plot".into()),
    };

    let title = str_arg(args, "title")
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
        .unwrap_or(default_title);
    params["title"] = json!(title);

    Ok(PlotRequest { kind, title, params })
}

impl VisualizationAgent {
    async fn render(&self, triangle: &str, request: &PlotRequest) -> Result<String, HandlerError> {
        let result = self
            .backend
            .invoke(triangle, "plot", request.params.clone())
            .await?;
        let path = result
            .get("image_path")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| format!("the reserving backend returned no image path for the {} plot", request.kind))?;
        Ok(path.to_string())
    }

    async fn diagnostics(
        &self,
        triangle: &str,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, HandlerError> {
        let mut created = Vec::new();
        let mut skipped = Vec::new();
        for kind in DIAGNOSTIC_SET {
            let request = plot_request(kind, triangle, &Arguments::new())?;
            match self.render(triangle, &request).await {
                Ok(path) => created.push((kind, path)),
                Err(e) => {
                    log::warn!("Diagnostic {} plot for '{}' failed: {}", kind, triangle, e);
                    skipped.push(kind.as_str());
                }
            }
        }

        if created.is_empty() {
            return Err(format!("no diagnostic plots could be created for '{}'", triangle).into());
        }

        let mut text = format!(
            "Created {} diagnostic plots for '{}':",
            created.len(),
            triangle
        );
        for (kind, path) in &created {
            text.push_str(&format!("\n- {}: {}", kind, path));
        }
        if !skipped.is_empty() {
            text.push_str(&format!("\nSkipped: {}", skipped.join(", ")));
        }

        let mut paths = recorded_paths(ctx);
        paths.extend(created.into_iter().map(|(_, path)| path));
        Ok(CapabilityOutput::proceed(text)
            .with_update(VISUALIZATION_PATHS_KEY, Value::from(paths).to_string()))
    }
}

#[async_trait]
impl CapabilityHandler for VisualizationAgent {
    async fn handle(
        &self,
        args: Arguments,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, HandlerError> {
        let kind = str_arg(&args, "plot_type")
            .and_then(PlotType::parse)
            .ok_or("missing or unknown plot_type")?;
        let triangle = target_triangle(&args, ctx, &self.catalog);

        if kind == PlotType::Diagnostics {
            return self.diagnostics(&triangle, ctx).await;
        }

        let request = plot_request(kind, &triangle, &args)?;
        let path = self.render(&triangle, &request).await?;

        let mut paths = recorded_paths(ctx);
        paths.push(path.clone());

        Ok(CapabilityOutput::proceed(format!(
            "Created a {} plot for '{}' titled \"{}\". Image saved to {}",
            kind, triangle, request.title, path
        ))
        .with_update(VISUALIZATION_PATHS_KEY, Value::from(paths).to_string()))
    }
}
