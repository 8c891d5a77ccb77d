//! Response synthesis
//!
//! Turns a question plus an evidence index into an [`Answer`]: prose for
//! text and arithmetic questions, a chart description for visualizations.

use crate::error::PipelineError;
use crate::evidence::EvidenceIndex;
use crate::llm::LanguageModel;
use crate::models::{Answer, QueryCategory, VisualizationSpec};
use crate::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, warn};

const CLASSIFICATION_PROMPT: &str = r#"You are an expert financial assistant tasked with examining and categorizing a financial question.
You will categorize the query type.
Instructions:
1. Read the financial question carefully.
2. Categorize the query into one of the following types:
   - Text: Questions answered in text format (e.g., general information queries)
   - Arithmetic: Questions involving mathematical calculations
   - Visualization: Questions requiring data to be presented in graphs
3. Provide only the type as a single word, without any additional text or explanation.

User Query: {query}"#;

const VISUALIZATION_PROMPT: &str = r#"You are an expert data visualization assistant. Analyze the given financial query and produce a JSON structure describing an appropriate visualization to answer the query, compatible with Plotly.

Instructions:
1. Read the financial question carefully.
2. Determine the most suitable visualization type to represent the data that would answer the query.
3. Create a JSON structure with the following elements:
   - chart_type: The type of chart (e.g., "line", "bar", "scatter", "pie", "area")
   - title: A descriptive title for the chart
   - x_axis: Description of the x-axis (typically time periods)
   - y_axis: Description of the y-axis (typically financial metrics)
   - data: A dictionary containing:
     - x: List of x-axis values
     - y: List of y-axis values (or list of lists for multiple series)
   - options: A dictionary containing any additional options for the chart

4. Return only the JSON structure as a string, without any additional text or explanation.

User Query: {query}"#;

/// Outcome of classifying a follow-up question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: QueryCategory,
    /// Raw model text when it could not be parsed and text was assumed.
    pub defaulted_from: Option<String>,
    pub tokens: u64,
}

pub struct ResponseSynthesizer {
    llm: Arc<dyn LanguageModel>,
    top_k: usize,
}

impl ResponseSynthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, top_k: usize) -> Self {
        Self {
            llm,
            top_k: top_k.max(1),
        }
    }

    /// Answer `query` from `index`. `context` carries recent turns for
    /// follow-ups and is `None` for new queries.
    pub async fn synthesize(
        &self,
        index: &EvidenceIndex,
        query: &str,
        category: QueryCategory,
        context: Option<&str>,
    ) -> Result<(Answer, u64)> {
        match category {
            QueryCategory::Text | QueryCategory::Arithmetic => {
                let prompt = match context {
                    None => answer_prompt(query, chrono::Local::now().date_naive()),
                    Some(context) => follow_up_prompt(query, context),
                };
                let completion = index
                    .query(self.llm.as_ref(), query, &prompt, self.top_k)
                    .await
                    .map_err(into_synthesis_error)?;
                Ok((Answer::Text(completion.text.trim().to_string()), completion.tokens))
            }
            QueryCategory::Visualization => {
                let prompt = VISUALIZATION_PROMPT.replace("{query}", query);
                let completion = index
                    .query(self.llm.as_ref(), query, &prompt, self.top_k)
                    .await
                    .map_err(into_synthesis_error)?;
                debug!(raw = %completion.text, "Visualization response");
                let spec = parse_visualization(&completion.text)?;
                Ok((Answer::Chart(spec), completion.tokens))
            }
        }
    }

    /// Classify a follow-up against the session's index. Unparseable
    /// output falls back to text.
    pub async fn classify(&self, index: &EvidenceIndex, query: &str) -> Result<Classification> {
        let prompt = CLASSIFICATION_PROMPT.replace("{query}", query);
        let completion = index
            .query(self.llm.as_ref(), query, &prompt, self.top_k)
            .await
            .map_err(into_synthesis_error)?;

        match QueryCategory::parse(&completion.text) {
            Ok(category) => Ok(Classification {
                category,
                defaulted_from: None,
                tokens: completion.tokens,
            }),
            Err(_) => {
                warn!(raw = %completion.text.trim(), "Unrecognized follow-up classification, answering as text");
                Ok(Classification {
                    category: QueryCategory::Text,
                    defaulted_from: Some(completion.text.trim().to_string()),
                    tokens: completion.tokens,
                })
            }
        }
    }
}

pub fn answer_prompt(query: &str, today: NaiveDate) -> String {
    format!(
        "{}\nPlease provide a definitive answer that directly answers the question using your general knowledge of the topic alongside the provided documents. \
         Be as precise as possible in your language. Do not be vague. \
         Make sure to support your answer with data points from the provided documents. \
         The current date is {}",
        query,
        today.format("%Y-%m-%d")
    )
}

pub fn follow_up_prompt(query: &str, context: &str) -> String {
    format!(
        "{}\nPlease provide a definitive answer that directly answers the question using your general knowledge of the topic alongside the provided documents. \
         Be as precise as possible in your language. Do not be vague. \
         Make sure to support your answer with data points from the documents provided.\n\
         Here are the last 3 queries and responses for context:\n{}",
        query, context
    )
}

/// Substring from the first `{` to the last `}`.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

pub fn parse_visualization(raw: &str) -> Result<VisualizationSpec> {
    let json = extract_json_object(raw).ok_or_else(|| {
        PipelineError::SynthesisError("Visualization response contains no JSON object".to_string())
    })?;
    serde_json::from_str(json).map_err(|e| {
        PipelineError::SynthesisError(format!("Invalid visualization description: {}", e))
    })
}

fn into_synthesis_error(e: PipelineError) -> PipelineError {
    match e {
        PipelineError::SynthesisError(_) => e,
        other => PipelineError::SynthesisError(other.to_string()),
    }
}
