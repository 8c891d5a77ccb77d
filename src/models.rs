//! Core data models for the filings question-answering pipeline

use crate::error::PipelineError;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

//
// ================= Query Category =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    Text,
    Arithmetic,
    Visualization,
}

impl QueryCategory {
    /// Normalize free-text model output into a category.
    ///
    /// Surrounding whitespace, quotes, backticks and a trailing period are
    /// ignored; matching is case-insensitive.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let token = raw
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.' || c.is_whitespace())
            .to_lowercase();

        match token.as_str() {
            "text" => Ok(Self::Text),
            "arithmetic" => Ok(Self::Arithmetic),
            "visualization" => Ok(Self::Visualization),
            _ => Err(PipelineError::ExtractionError(format!(
                "Unrecognized query category: '{}'",
                raw.trim()
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Arithmetic => "arithmetic",
            Self::Visualization => "visualization",
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ================= Query Parameters =================
//

/// Structured parameters extracted from a new query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryParameters {
    pub entity_ids: Vec<String>,
    pub timeframes: Vec<String>,
    pub category: QueryCategory,
    pub relevant_document_types: BTreeSet<String>,
}

/// Zero-pad a numeric entity id to the 10-digit EDGAR width.
/// Non-numeric ids are returned trimmed but otherwise untouched.
pub fn normalize_entity_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.len() <= 10 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>10}", trimmed)
    } else {
        trimmed.to_string()
    }
}

//
// ================= Fiscal Quarter =================
//

/// A year+quarter timeframe token such as `2024Q1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiscalQuarter {
    pub year: i32,
    pub quarter: u32,
}

impl FiscalQuarter {
    /// First calendar day of the quarter.
    pub fn start_date(&self) -> NaiveDate {
        let month = (self.quarter - 1) * 3 + 1;
        // quarter is validated to 1..=4 on construction
        NaiveDate::from_ymd_opt(self.year, month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Instantaneous calendar frame period used by the XBRL frames API.
    pub fn frame_period(&self) -> String {
        format!("CY{}Q{}I", self.year, self.quarter)
    }
}

impl FromStr for FiscalQuarter {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        let invalid = || PipelineError::AcquisitionFailure(format!("Invalid timeframe token: '{}'", token));

        if token.len() != 6 || !token.is_char_boundary(4) {
            return Err(invalid());
        }

        let (year_part, rest) = token.split_at(4);
        let quarter_part = rest
            .strip_prefix('Q')
            .or_else(|| rest.strip_prefix('q'))
            .ok_or_else(invalid)?;

        let year: i32 = year_part.parse().map_err(|_| invalid())?;
        let quarter: u32 = quarter_part.parse().map_err(|_| invalid())?;

        if !(1..=4).contains(&quarter) || NaiveDate::from_ymd_opt(year, 1, 1).is_none() {
            return Err(invalid());
        }

        Ok(Self { year, quarter })
    }
}

impl fmt::Display for FiscalQuarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

//
// ================= Visualization =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Line,
    Bar,
    Scatter,
    Pie,
    Area,
}

impl FromStr for ChartType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "bar" => Ok(Self::Bar),
            "scatter" => Ok(Self::Scatter),
            "pie" => Ok(Self::Pie),
            "area" => Ok(Self::Area),
            _ => Err(PipelineError::UnsupportedChartType(s.to_string())),
        }
    }
}

/// `y` values: one series or several.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChartSeries {
    Multi(Vec<Vec<serde_json::Value>>),
    Single(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartData {
    pub x: Vec<serde_json::Value>,
    pub y: ChartSeries,
}

/// Chart description produced for visualization queries.
///
/// `chart_type` is kept as the model wrote it; it is checked against
/// [`ChartType`] by the chart renderer, not at parse time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualizationSpec {
    pub chart_type: String,
    pub title: String,
    #[serde(default)]
    pub x_axis: String,
    #[serde(default)]
    pub y_axis: String,
    pub data: ChartData,
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

fn null_as_empty_map<'de, D>(deserializer: D) -> Result<serde_json::Map<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<serde_json::Map<String, serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl VisualizationSpec {
    pub fn chart_kind(&self) -> crate::Result<ChartType> {
        self.chart_type.parse()
    }
}

//
// ================= Answers =================
//

/// Either prose or a chart description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Answer {
    Text(String),
    Chart(VisualizationSpec),
}

impl Answer {
    /// Text used for history and usage logs (charts as JSON).
    pub fn to_log_string(&self) -> String {
        match self {
            Answer::Text(text) => text.clone(),
            Answer::Chart(spec) => serde_json::to_string(spec).unwrap_or_default(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Answer::Text(text) => Some(text),
            Answer::Chart(_) => None,
        }
    }
}

//
// ================= Degradation =================
//

/// A step that succeeded with reduced fidelity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// The relevant-form classification call failed; only default forms are used.
    FormTypesUnavailable { reason: String },
    /// Filing index did not reach back far enough; structured facts were used.
    StructuredFactsFallback { entity_id: String, timeframe: String },
    /// Follow-up classification could not be parsed and defaulted to text.
    ClassificationDefaulted { raw: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::FormTypesUnavailable { reason } => write!(
                f,
                "Relevant filing types could not be determined ({}); only quarterly and annual reports were searched.",
                reason
            ),
            Degradation::StructuredFactsFallback { entity_id, timeframe } => write!(
                f,
                "SEC filings cannot be found for {} in {}, so answers have a greater likelihood to be inaccurate or vague.",
                entity_id, timeframe
            ),
            Degradation::ClassificationDefaulted { raw } => write!(
                f,
                "Follow-up could not be classified ('{}'); answered as text.",
                raw
            ),
        }
    }
}

//
// ================= Turn Result =================
//

/// What `answer` hands back to the session layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResult {
    pub answer: Answer,
    pub category: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl TurnResult {
    /// True when the answer is the orchestrator's error string.
    pub fn is_error(&self) -> bool {
        self.answer
            .as_text()
            .map(|text| text.starts_with(crate::agent::ERROR_MARKER))
            .unwrap_or(false)
    }
}
