//! # Specialists
//!
//! The four capabilities behind the supervisor: data handling, reserving
//! analysis, visualization and explanation. The first three feed results
//! back for further routing; the explanation specialist ends the chain.
//!
//! Shared state between specialists travels through session context
//! variables (see the `*_KEY` constants), never through globals.

pub mod analysis;
pub mod backend;
pub mod catalog;
pub mod data;
pub mod explanation;
pub mod models;
pub mod visualization;

use std::sync::Arc;

use serde_json::Value;

use crate::capabilities::{Arguments, CapabilityContext, CapabilityRegistry};
use crate::error::DispatchResult;

pub use backend::{HttpReservingBackend, ReservingBackend};
pub use catalog::{DatasetCatalog, DEFAULT_DATASETS};

/// Dataset the user is working on.
pub const SELECTED_TRIANGLE_KEY: &str = "selected_triangle";
/// Dataset of the last development analysis.
pub const DEVELOPMENT_TRIANGLE_KEY: &str = "development_triangle";
/// Dataset of the last IBNR estimate.
pub const IBNR_TRIANGLE_KEY: &str = "ibnr_triangle";
/// JSON array of generated image paths.
pub const VISUALIZATION_PATHS_KEY: &str = "visualization_paths";
/// JSON object of the most recent analysis result.
pub const LAST_ANALYSIS_KEY: &str = "last_analysis";
/// Rendered report text.
pub const REPORT_KEY: &str = "report";

/// Register all four specialists.
pub fn register_all(
    registry: &mut CapabilityRegistry,
    backend: Arc<dyn ReservingBackend>,
    catalog: Arc<DatasetCatalog>,
) -> DispatchResult<()> {
    registry.register_capability(data::capability(Arc::clone(&backend), Arc::clone(&catalog)))?;
    registry.register_capability(analysis::capability(
        Arc::clone(&backend),
        Arc::clone(&catalog),
    ))?;
    registry.register_capability(visualization::capability(
        Arc::clone(&backend),
        Arc::clone(&catalog),
    ))?;
    registry.register_capability(explanation::capability(backend, catalog))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers shared by the specialists
// ---------------------------------------------------------------------------

pub(crate) fn str_arg<'a>(args: &'a Arguments, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Dataset an action applies to: explicit argument, then the session's
/// selection, then the catalog default.
pub(crate) fn target_triangle(
    args: &Arguments,
    ctx: &CapabilityContext,
    catalog: &DatasetCatalog,
) -> String {
    str_arg(args, "triangle")
        .filter(|s| !s.trim().is_empty())
        .or_else(|| ctx.get(SELECTED_TRIANGLE_KEY))
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| catalog.default_name().to_string())
}

/// Copy every argument except `skip` into a params object.
pub(crate) fn params_without(args: &Arguments, skip: &[&str]) -> Value {
    let params: Arguments = args
        .iter()
        .filter(|(k, v)| !skip.contains(&k.as_str()) && !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(params)
}

/// Sum of all numbers in a JSON value, descending into objects and arrays.
pub fn total(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Object(map) => map.values().map(total).sum(),
        Value::Array(items) => items.iter().map(total).sum(),
        _ => 0.0,
    }
}

/// Two decimals with thousands separators: `52135.228` becomes `52,135.23`.
///
/// Same output as a `{:,.2f}` format spec; `std::fmt` has no grouping flag.
pub fn format_amount(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && formatted != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, grouped, frac_part)
}

/// Pretty JSON for inclusion in a reply.
pub(crate) fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
