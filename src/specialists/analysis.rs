//! Analysis specialist: development factors, tails and reserve estimates.
//!
//! Every successful action stores its raw result as `last_analysis` so the
//! explanation specialist can interpret it or build a report from it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::models::{AnalysisAction, IbnrMethod, TailMethod};
use super::{
    format_amount, params_without, pretty, str_arg, target_triangle, total, DatasetCatalog,
    ReservingBackend, DEVELOPMENT_TRIANGLE_KEY, IBNR_TRIANGLE_KEY, LAST_ANALYSIS_KEY,
};
use crate::capabilities::{
    Arguments, Capability, CapabilityContext, CapabilityHandler, CapabilityOutput, FieldType,
    InputSchema,
};
use crate::error::HandlerError;

pub const NAME: &str = "analysis_agent";

const DESCRIPTION: &str = "Actuarial analysis expert. Calculates development (age-to-age) factors, \
    applies tail methods, estimates IBNR with Chain Ladder, Mack, Bornhuetter-Ferguson, Benktander \
    or Cape Cod, runs bootstrap simulations and compares methods side by side.";

pub fn input_schema() -> InputSchema {
    InputSchema::new()
        .required("action", FieldType::String, "Analysis to run")
        .one_of(AnalysisAction::NAMES)
        .optional(
            "triangle",
            FieldType::String,
            "Sample triangle name; defaults to the selected triangle",
        )
        .optional(
            "averages",
            FieldType::Array,
            "For development: averaging methods such as volume, simple, regression",
        )
        .optional(
            "n_periods",
            FieldType::Integer,
            "For development: number of latest periods to average over",
        )
        .optional("tail_method", FieldType::String, "For tail: tail method")
        .one_of(TailMethod::NAMES)
        .optional("tail_factor", FieldType::Number, "For tail: constant tail factor")
        .optional("method", FieldType::String, "For ibnr: reserving method")
        .one_of(IbnrMethod::NAMES)
        .optional(
            "apriori",
            FieldType::Object,
            "For ibnr: a priori expected losses by origin period",
        )
        .optional("n_iters", FieldType::Integer, "For ibnr: Benktander iterations")
        .optional(
            "n_simulations",
            FieldType::Integer,
            "For bootstrap: number of simulated triangles",
        )
        .optional("random_state", FieldType::Integer, "For bootstrap: random seed")
        .optional("methods", FieldType::Array, "For compare: reserving methods to compare")
}

pub fn capability(backend: Arc<dyn ReservingBackend>, catalog: Arc<DatasetCatalog>) -> Capability {
    Capability::new(
        NAME,
        DESCRIPTION,
        input_schema(),
        Arc::new(AnalysisAgent { backend, catalog }),
        false,
    )
}

pub struct AnalysisAgent {
    backend: Arc<dyn ReservingBackend>,
    catalog: Arc<DatasetCatalog>,
}

/// Fill defaults and check values the schema cannot express.
fn prepare_params(action: AnalysisAction, args: &Arguments) -> Result<Value, HandlerError> {
    let mut params = params_without(args, &["action", "triangle"]);
    let map = params
        .as_object_mut()
        .ok_or("analysis parameters must be an object")?;

    match action {
        AnalysisAction::Development => {
            map.entry("averages").or_insert_with(|| json!(["volume"]));
        }
        AnalysisAction::Tail => {
            map.entry("tail_method")
                .or_insert_with(|| json!(TailMethod::Constant.as_str()));
        }
        AnalysisAction::Ibnr => {
            map.entry("method")
                .or_insert_with(|| json!(IbnrMethod::Chainladder.as_str()));
        }
        AnalysisAction::Bootstrap => {
            let n = map
                .entry("n_simulations")
                .or_insert_with(|| json!(1000))
                .as_i64()
                .unwrap_or(0);
            if n <= 0 {
                return Err("n_simulations must be positive".into());
            }
            map.entry("random_state").or_insert_with(|| json!(42));
        }
        AnalysisAction::Compare => {
            let methods = map.entry("methods").or_insert_with(|| {
                json!([
                    IbnrMethod::Chainladder.as_str(),
                    IbnrMethod::BornhuetterFerguson.as_str(),
                    IbnrMethod::Benktander.as_str()
                ])
            });
            let unknown: Vec<String> = methods
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter(|m| m.as_str().and_then(IbnrMethod::parse).is_none())
                        .map(Value::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if !unknown.is_empty() {
                return Err(format!(
                    "unknown reserving method(s) {}; expected any of: {}",
                    unknown.join(", "),
                    IbnrMethod::NAMES.join(", ")
                )
                .into());
            }
        }
    }

    Ok(params)
}

fn summarize(action: AnalysisAction, triangle: &str, params: &Value, result: &Value) -> String {
    match action {
        AnalysisAction::Development => {
            let ratios = result.get("link_ratios").unwrap_or(result);
            format!(
                "Development factors for '{}' ({} averaging):\n{}",
                triangle,
                params["averages"]
                    .as_array()
                    .map(|a| a
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(", "))
                    .unwrap_or_default(),
                pretty(ratios)
            )
        }
        AnalysisAction::Tail => {
            let factor = result
                .get("tail_factor")
                .and_then(Value::as_f64)
                .map(|f| format!("{:.4}", f))
                .unwrap_or_else(|| "n/a".to_string());
            format!(
                "Applied the {} tail method to '{}': tail factor {}.",
                params["tail_method"].as_str().unwrap_or("constant"),
                triangle,
                factor
            )
        }
        AnalysisAction::Ibnr => {
            let mut text = format!(
                "IBNR estimate for '{}' using {}: total IBNR {}, total ultimate losses {}.",
                triangle,
                params["method"].as_str().unwrap_or("chainladder"),
                format_amount(total(&result["ibnr_estimates"])),
                format_amount(total(&result["ultimate_losses"]))
            );
            if let Some(std_err) = result.get("std_err").filter(|v| !v.is_null()) {
                text.push_str(&format!(" Total standard error {}.", format_amount(total(std_err))));
            }
            text
        }
        AnalysisAction::Bootstrap => format!(
            "Bootstrap analysis of '{}' with {} simulations: mean IBNR {}, standard deviation {}.",
            triangle,
            params["n_simulations"],
            format_amount(total(&result["ibnr_mean"])),
            format_amount(total(&result["ibnr_std_dev"]))
        ),
        AnalysisAction::Compare => {
            let mut lines = vec![format!("Method comparison for '{}':", triangle)];
            if let Some(results) = result.get("results").and_then(Value::as_object) {
                for (method, values) in results {
                    lines.push(format!(
                        "- {}: IBNR {}, ultimate {}",
                        method,
                        format_amount(total(&values["ibnr"])),
                        format_amount(total(&values["ultimate"]))
                    ));
                }
            }
            lines.join("\n")
        }
    }
}

#[async_trait]
impl CapabilityHandler for AnalysisAgent {
    async fn handle(
        &self,
        args: Arguments,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, HandlerError> {
        let action = str_arg(&args, "action")
            .and_then(AnalysisAction::parse)
            .ok_or("missing or unknown action")?;
        let triangle = target_triangle(&args, ctx, &self.catalog);
        let params = prepare_params(action, &args)?;

        let result = self
            .backend
            .invoke(&triangle, action.as_str(), params.clone())
            .await?;

        let mut record = match &result {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("result".into(), other.clone());
                map
            }
        };
        record.insert("analysis".into(), json!(action.as_str()));
        record.insert("triangle_name".into(), json!(triangle));
        if let Some(method) = params.get("method") {
            record.insert("method".into(), method.clone());
        }

        let mut output = CapabilityOutput::proceed(summarize(action, &triangle, &params, &result))
            .with_update(LAST_ANALYSIS_KEY, Value::Object(record).to_string());
        match action {
            AnalysisAction::Development | AnalysisAction::Tail => {
                output = output.with_update(DEVELOPMENT_TRIANGLE_KEY, triangle.as_str());
            }
            AnalysisAction::Ibnr => {
                output = output.with_update(IBNR_TRIANGLE_KEY, triangle.as_str());
            }
            AnalysisAction::Bootstrap | AnalysisAction::Compare => {}
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specialists::SELECTED_TRIANGLE_KEY;
    use crate::test_support::StubBackend;
    use std::collections::BTreeMap;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn run(backend: Arc<StubBackend>, value: Value) -> Result<CapabilityOutput, HandlerError> {
        let agent = AnalysisAgent {
            backend,
            catalog: Arc::new(DatasetCatalog::default()),
        };
        let mut context = BTreeMap::new();
        context.insert(SELECTED_TRIANGLE_KEY.to_string(), "raa".to_string());
        let ctx = CapabilityContext::new("s", context);
        tokio_test::block_on(agent.handle(args(value), &ctx))
    }

    fn update<'a>(out: &'a CapabilityOutput, key: &str) -> Option<&'a str> {
        out.context_updates
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_ibnr_defaults_to_chainladder_and_records_result() {
        let backend = Arc::new(StubBackend::new());
        let out = run(Arc::clone(&backend), json!({"action": "ibnr"})).unwrap();

        assert_eq!(
            out.message.content,
            "IBNR estimate for 'raa' using chainladder: total IBNR 153.95, total ultimate losses 35,691.95."
        );
        assert_eq!(update(&out, IBNR_TRIANGLE_KEY), Some("raa"));

        let record: Value = serde_json::from_str(update(&out, LAST_ANALYSIS_KEY).unwrap()).unwrap();
        assert_eq!(record["analysis"], "ibnr");
        assert_eq!(record["method"], "chainladder");
        assert_eq!(record["triangle_name"], "raa");

        let (dataset, method, params) = &backend.calls()[0];
        assert_eq!((dataset.as_str(), method.as_str()), ("raa", "ibnr"));
        assert_eq!(params["method"], "chainladder");
    }

    #[test]
    fn test_development_sets_development_triangle() {
        let backend = Arc::new(StubBackend::new());
        let out = run(
            backend,
            json!({"action": "development", "triangle": "genins", "n_periods": 3}),
        )
        .unwrap();
        assert!(out.message.content.contains("'genins' (volume averaging)"));
        assert_eq!(update(&out, DEVELOPMENT_TRIANGLE_KEY), Some("genins"));
        assert_eq!(update(&out, IBNR_TRIANGLE_KEY), None);
    }

    #[test]
    fn test_compare_rejects_unknown_methods() {
        let backend = Arc::new(StubBackend::new());
        let err = run(
            Arc::clone(&backend),
            json!({"action": "compare", "methods": ["chainladder", "magic"]}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("\"magic\""));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_compare_lists_each_method() {
        let out = run(Arc::new(StubBackend::new()), json!({"action": "compare"})).unwrap();
        assert!(out.message.content.contains("- chainladder: IBNR 153.95"));
        assert!(out.message.content.contains("- benktander: IBNR 96.00"));
    }

    #[test]
    fn test_bootstrap_validates_simulations() {
        let err = run(
            Arc::new(StubBackend::new()),
            json!({"action": "bootstrap", "n_simulations": 0}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("positive"));

        let out = run(Arc::new(StubBackend::new()), json!({"action": "bootstrap"})).unwrap();
        assert!(out.message.content.contains("1000 simulations"));
        assert!(out.message.content.contains("mean IBNR 52,000.00"));
    }

    #[test]
    fn test_tail_reports_factor() {
        let out = run(
            Arc::new(StubBackend::new()),
            json!({"action": "tail", "tail_method": "bondy"}),
        )
        .unwrap();
        assert_eq!(
            out.message.content,
            "Applied the bondy tail method to 'raa': tail factor 1.0500."
        );
    }
}
