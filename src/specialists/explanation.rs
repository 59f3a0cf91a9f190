//! Explanation specialist: plain-language concepts, result interpretation
//! and reports. Its answer always ends the routing chain.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use super::models::{ExplanationAction, IbnrMethod, ReportType};
use super::visualization::recorded_paths;
use super::{
    format_amount, str_arg, target_triangle, total, DatasetCatalog, ReservingBackend,
    LAST_ANALYSIS_KEY, REPORT_KEY,
};
use crate::capabilities::{
    Arguments, Capability, CapabilityContext, CapabilityHandler, CapabilityOutput, FieldType,
    InputSchema,
};
use crate::error::HandlerError;

pub const NAME: &str = "explanation_agent";

const DESCRIPTION: &str = "Explanation expert. Explains actuarial concepts (IBNR, development \
    factors, chain ladder, Bornhuetter-Ferguson, tail factors, ...) in plain language, interprets \
    the latest analysis results and generates summary, detailed or executive reports.";

pub fn input_schema() -> InputSchema {
    InputSchema::new()
        .required("action", FieldType::String, "What to explain or produce")
        .one_of(ExplanationAction::NAMES)
        .optional("concept", FieldType::String, "For concept: the term to explain")
        .optional("report_type", FieldType::String, "For report: kind of report")
        .one_of(ReportType::NAMES)
        .optional(
            "include_visualizations",
            FieldType::Boolean,
            "For report: list generated plots (default true)",
        )
        .optional(
            "triangle",
            FieldType::String,
            "Sample triangle name; defaults to the selected triangle",
        )
}

pub fn capability(backend: Arc<dyn ReservingBackend>, catalog: Arc<DatasetCatalog>) -> Capability {
    Capability::new(
        NAME,
        DESCRIPTION,
        input_schema(),
        Arc::new(ExplanationAgent { backend, catalog }),
        true,
    )
}

pub struct ExplanationAgent {
    backend: Arc<dyn ReservingBackend>,
    catalog: Arc<DatasetCatalog>,
}

// ---------------------------------------------------------------------------
// Concepts
// ---------------------------------------------------------------------------

/// Glossary, matched in this order.
const GLOSSARY: &[(&str, &str)] = &[
    (
        "ibnr",
        "Incurred But Not Reported (IBNR) refers to losses that have occurred but haven't yet been \
         reported to the insurance company. These are estimated based on historical development \
         patterns and are a crucial component of an insurer's loss reserves.",
    ),
    (
        "development factor",
        "Development factors, also called loss development factors (LDFs) or age-to-age factors, \
         represent how losses for a given origin period are expected to grow from one valuation \
         date to the next. They are calculated from historical loss triangles and used to project \
         ultimate losses.",
    ),
    (
        "chain ladder",
        "The Chain Ladder method is a fundamental actuarial technique for estimating ultimate losses. \
         It applies development factors to the latest available loss data to project future \
         development. This method assumes that historical development patterns will repeat in the \
         future.",
    ),
    (
        "bornhuetter-ferguson",
        "The Bornhuetter-Ferguson method is an actuarial technique that combines the Chain Ladder \
         method with a priori loss estimates. It gives more weight to actual experience for older \
         development periods and more weight to expected losses for newer periods. This method is \
         particularly useful when dealing with immature data or volatile loss patterns.",
    ),
    (
        "benktander",
        "The Benktander method is a credibility-weighted approach that combines elements of the Chain \
         Ladder method and the Expected Loss Ratio method. It iteratively applies a formula that \
         gives more weight to actual data as development matures.",
    ),
    (
        "cape cod",
        "The Cape Cod method (also known as the Stanard-Bühlmann method) is similar to the \
         Bornhuetter-Ferguson method but uses the existing data to estimate the expected loss ratio. \
         It provides a way to incorporate both prior expectations and actual experience when \
         estimating ultimate losses.",
    ),
    (
        "triangle",
        "A loss triangle is a tabular arrangement of loss data, organized by origin period (rows) and \
         development period or age (columns). It shows how losses develop over time and forms the \
         basis for actuarial reserving methods.",
    ),
    (
        "ultimate loss",
        "Ultimate loss represents the final value of losses for a given origin period after all \
         claims have been settled. Actuaries project ultimate losses to determine how much money an \
         insurer needs to reserve for future claim payments.",
    ),
    (
        "tail factor",
        "A tail factor represents the additional development expected beyond the final development \
         period in a loss triangle. It accounts for the 'tail' of the development pattern that \
         extends beyond the observed data and is crucial for estimating ultimate losses for \
         long-tailed lines of business.",
    ),
    (
        "loss development",
        "Loss development refers to the process by which losses change (typically increase) over \
         time as claims are reported and settled. Understanding this process is fundamental to \
         actuarial reserving.",
    ),
    (
        "mack chainladder",
        "Mack Chainladder is a stochastic extension of the traditional Chain Ladder method that \
         provides estimates of the variability (standard error) of reserve estimates. It allows \
         actuaries to quantify the uncertainty in their projections without making distributional \
         assumptions.",
    ),
    (
        "bootstrap",
        "In actuarial science, bootstrap methods use resampling techniques to estimate the \
         distribution of reserve estimates. This stochastic approach involves generating multiple \
         simulated triangles based on the original data to create a range of possible outcomes and \
         quantify uncertainty.",
    ),
];

/// A glossary answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConceptExplanation {
    pub concept: String,
    pub explanation: String,
    pub related_concepts: Vec<String>,
}

/// Explain `concept`, matching glossary keys case-insensitively as substrings.
pub fn explain_concept(concept: &str) -> ConceptExplanation {
    let needle = concept.to_lowercase();
    if let Some((key, explanation)) = GLOSSARY.iter().find(|(key, _)| needle.contains(key)) {
        let lowered = explanation.to_lowercase();
        let related = GLOSSARY
            .iter()
            .map(|(k, _)| *k)
            .filter(|k| k != key && lowered.contains(k))
            .take(3)
            .map(str::to_string)
            .collect();
        return ConceptExplanation {
            concept: key.to_string(),
            explanation: explanation.to_string(),
            related_concepts: related,
        };
    }

    ConceptExplanation {
        concept: concept.to_string(),
        explanation: format!(
            "'{}' is an actuarial term that may relate to insurance reserving or pricing. Actuaries \
             use statistical methods to analyze historical data and make projections about future \
             losses and reserves. For more specific information, please provide additional context \
             or ask about a specific actuarial method.",
            concept
        ),
        related_concepts: vec![
            "triangle".to_string(),
            "development factor".to_string(),
            "ibnr".to_string(),
        ],
    }
}

// ---------------------------------------------------------------------------
// Interpretation
// ---------------------------------------------------------------------------

/// Business reading of an analysis result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Interpretation {
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub limitations: Vec<String>,
    pub interpretation: String,
}

fn lower_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn interpret_results(results: &Value) -> Interpretation {
    let mut out = Interpretation::default();

    if let Some(ibnr) = results.get("ibnr_estimates") {
        let total_ibnr = total(ibnr);
        out.key_findings
            .push(format!("Total IBNR reserve estimate: {}", format_amount(total_ibnr)));
        if total_ibnr > 0.0 {
            out.recommendations.push(
                "Consider setting aside appropriate reserves to cover the estimated IBNR amount."
                    .to_string(),
            );
        }
    }

    if let Some(ultimate) = results.get("ultimate_losses") {
        out.key_findings.push(format!(
            "Total ultimate loss estimate: {}",
            format_amount(total(ultimate))
        ));
    }

    if let Some(ratios) = results.get("link_ratios").and_then(Value::as_object) {
        out.key_findings.push(format!(
            "Age-to-age factors were calculated for {} development intervals",
            ratios.len()
        ));
    }

    if let Some(limitation) = results
        .get("method")
        .and_then(Value::as_str)
        .and_then(IbnrMethod::parse)
        .and_then(|m| m.limitation())
    {
        out.limitations.push(limitation.to_string());
    }

    if let Some(first) = out.key_findings.first() {
        let mut text = format!(
            "Based on the analysis results, the estimated future loss emergence indicates {}.",
            lower_first(first)
        );
        if let Some(limitation) = out.limitations.first() {
            text.push_str(&format!(
                " However, it's important to note that {} This should be considered when using \
                 these results for decision-making.",
                lower_first(limitation)
            ));
        }
        if let Some(recommendation) = out.recommendations.first() {
            text.push(' ');
            text.push_str(recommendation);
        }
        out.interpretation = text;
    }

    out
}

fn render_interpretation(analysis: &str, triangle: &str, insights: &Interpretation) -> String {
    let mut text = format!("Interpretation of the {} results for '{}':\n", analysis, triangle);
    for (heading, items) in [
        ("Key findings", &insights.key_findings),
        ("Recommendations", &insights.recommendations),
        ("Limitations", &insights.limitations),
    ] {
        if items.is_empty() {
            continue;
        }
        text.push_str(&format!("\n{}:\n", heading));
        for item in items {
            text.push_str(&format!("- {}\n", item));
        }
    }
    if !insights.interpretation.is_empty() {
        text.push('\n');
        text.push_str(&insights.interpretation);
    }
    text
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

const REPORT_TEMPLATE: &str = "# {{ title }}

_Generated {{ date_generated }}_

{{ summary }}
{% for section in sections %}
## {{ section.title }}

{{ section.content }}
{% endfor %}
## Conclusion

{{ conclusion }}
{% if visualizations %}
## Visualizations
{% for path in visualizations %}
- {{ path }}{% endfor %}
{% endif %}";

#[derive(Debug, Clone, Serialize)]
struct ReportSection {
    title: String,
    content: String,
}

fn dataset_overview(triangle: &str, info: &Value) -> ReportSection {
    let dims: Vec<u64> = info
        .get("shape")
        .and_then(Value::as_array)
        .map(|s| s.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default();
    let (origins, developments) = match dims.as_slice() {
        [.., o, d] => (o.to_string(), d.to_string()),
        _ => ("an unknown number of".to_string(), "an unknown number of".to_string()),
    };
    let format = match info.get("is_cumulative").and_then(Value::as_bool) {
        Some(false) => "incremental",
        _ => "cumulative",
    };
    let grain = info.get("grain").and_then(Value::as_str).unwrap_or("unknown");
    ReportSection {
        title: "Dataset Overview".to_string(),
        content: format!(
            "The analysis was performed on the {} dataset, which contains {} origin periods and {} \
             development periods. The data represents {} values with a {} grain.",
            triangle, origins, developments, format, grain
        ),
    }
}

fn analysis_sections(report_type: ReportType, analysis: &Value) -> Vec<ReportSection> {
    let mut sections = Vec::new();

    if let Some(methods) = analysis.get("methods_used").and_then(Value::as_array) {
        let methods: Vec<&str> = methods.iter().filter_map(Value::as_str).collect();
        let mut content = format!(
            "Development factors were calculated using the {} method(s). ",
            methods.join(", ")
        );
        if report_type != ReportType::Summary {
            content.push_str(
                "The selected age-to-age factors indicate how losses develop from one period to \
                 the next. These factors are crucial for projecting ultimate loss values.",
            );
        }
        sections.push(ReportSection {
            title: "Development Factors Analysis".to_string(),
            content: content.trim_end().to_string(),
        });
    }

    if let Some(ibnr) = analysis.get("ibnr_estimates") {
        let mut content = format!(
            "The estimated total IBNR reserve is {}, with projected ultimate losses of {}.",
            format_amount(total(ibnr)),
            format_amount(total(&analysis["ultimate_losses"]))
        );
        match report_type {
            ReportType::Detailed => content.push_str(
                " The IBNR estimates represent the expected future loss emergence based on \
                 historical development patterns. These estimates are critical for establishing \
                 adequate reserves.",
            ),
            ReportType::Executive => content.push_str(
                " These reserve estimates should be considered when making financial planning \
                 decisions and assessing overall risk exposure.",
            ),
            ReportType::Summary => {}
        }
        sections.push(ReportSection {
            title: "IBNR Reserve Estimates".to_string(),
            content,
        });
    }

    sections
}

fn conclusion(report_type: ReportType) -> &'static str {
    match report_type {
        ReportType::Summary => {
            "The analysis provides a basic overview of the development patterns and reserve \
             requirements based on the historical loss data. Further analysis may be needed for \
             specific business decisions."
        }
        ReportType::Detailed => {
            "This detailed analysis demonstrates the application of actuarial methods to estimate \
             ultimate losses and IBNR reserves. The results should be interpreted in consideration \
             of the underlying assumptions of each method and the quality of the historical data."
        }
        ReportType::Executive => {
            "The analysis results indicate the expected future loss emergence and reserve \
             requirements based on historical development patterns. These estimates should inform \
             strategic decisions regarding capital allocation, pricing, and risk management."
        }
    }
}

/// Render a report from the dataset description and the latest analysis.
pub fn render_report(
    triangle: &str,
    report_type: ReportType,
    dataset_info: &Value,
    analysis: Option<&Value>,
    visualizations: &[String],
) -> Result<String, HandlerError> {
    let mut sections = vec![dataset_overview(triangle, dataset_info)];
    if let Some(analysis) = analysis {
        sections.extend(analysis_sections(report_type, analysis));
    }

    let mut context = tera::Context::new();
    context.insert("title", &format!("Actuarial Analysis Report: {}", triangle.to_uppercase()));
    context.insert(
        "summary",
        &format!(
            "This report presents the results of actuarial analysis performed on the {} triangle \
             dataset using chainladder methods. The analysis includes development factor \
             calculations and loss reserve estimates.",
            triangle
        ),
    );
    context.insert("sections", &sections);
    context.insert("conclusion", conclusion(report_type));
    context.insert(
        "date_generated",
        &Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    context.insert("visualizations", visualizations);

    Ok(tera::Tera::one_off(REPORT_TEMPLATE, &context, false)?)
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

fn last_analysis(ctx: &CapabilityContext) -> Option<Value> {
    ctx.get(LAST_ANALYSIS_KEY)
        .and_then(|raw| serde_json::from_str(raw).ok())
}

#[async_trait]
impl CapabilityHandler for ExplanationAgent {
    async fn handle(
        &self,
        args: Arguments,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, HandlerError> {
        let action = str_arg(&args, "action")
            .and_then(ExplanationAction::parse)
            .ok_or("missing or unknown action")?;

        match action {
            ExplanationAction::Concept => {
                let concept = str_arg(&args, "concept")
                    .filter(|c| !c.trim().is_empty())
                    .ok_or("the concept action needs a 'concept' argument")?;
                let answer = explain_concept(concept);
                let mut text = format!("**{}**\n\n{}", answer.concept, answer.explanation);
                if !answer.related_concepts.is_empty() {
                    text.push_str(&format!(
                        "\n\nRelated concepts: {}",
                        answer.related_concepts.join(", ")
                    ));
                }
                Ok(CapabilityOutput::finish(text))
            }
            ExplanationAction::Interpret => {
                let Some(results) = last_analysis(ctx) else {
                    return Ok(CapabilityOutput::finish(
                        "There are no analysis results to interpret yet. Run an analysis first, \
                         for example an IBNR estimate with the chain ladder method.",
                    ));
                };
                let analysis = results["analysis"].as_str().unwrap_or("analysis");
                let triangle = results["triangle_name"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| target_triangle(&args, ctx, &self.catalog));
                let insights = interpret_results(&results);
                Ok(CapabilityOutput::finish(render_interpretation(
                    analysis, &triangle, &insights,
                )))
            }
            ExplanationAction::Report => {
                let report_type = str_arg(&args, "report_type")
                    .and_then(ReportType::parse)
                    .unwrap_or(ReportType::Summary);
                let include_visualizations = args
                    .get("include_visualizations")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let triangle = target_triangle(&args, ctx, &self.catalog);

                let info = self.backend.invoke(&triangle, "load", json!({})).await?;
                let analysis = last_analysis(ctx)
                    .filter(|a| a["triangle_name"].as_str().map_or(true, |t| t == triangle));
                let visualizations = if include_visualizations {
                    recorded_paths(ctx)
                } else {
                    Vec::new()
                };

                let report = render_report(
                    &triangle,
                    report_type,
                    &info,
                    analysis.as_ref(),
                    &visualizations,
                )?;
                Ok(CapabilityOutput::finish(report.clone()).with_update(REPORT_KEY, report))
            }
        }
    }
}
