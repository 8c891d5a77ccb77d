//! Query parameter extraction
//!
//! One model call turns the question into `ids:timeframes:category`; a
//! second call lists the SEC form types worth searching. The second call
//! is best-effort.

use crate::error::PipelineError;
use crate::llm::LanguageModel;
use crate::models::{normalize_entity_id, Degradation, QueryCategory, QueryParameters};
use crate::Result;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const EXTRACTION_INSTRUCTIONS: &str = r#"You are an expert financial assistant tasked with examining and categorizing a financial question.
You will examine the financial question provided, and accurately extract the company or companies of interest, and provide the correct CIK (Central Index Key) for each company. You will also give a relevant timeframe that the question mentions, and categorize the query type.

Instructions:
1. Carefully read the financial question provided.
2. Identify the company or companies of interest in the question.
3. For each company, provide the 10-digit CIK (Central Index Key). If you're not 100% certain, make your best educated guess based on your knowledge.
4. Determine the relevant financial quarters mentioned in the question in YYYYQ# format.
5. Categorize the query into one of the following types:
   - Text: Questions answered in text format (e.g., general information queries)
   - Arithmetic: Questions involving mathematical calculations
   - Visualization: Questions requiring data to be presented in graphs
6. Return the information in this format, extending lists as necessary:
   ciks:timeframes:category
7. Remember, the "ciks" will be the CIK numbers for the companies that the user asked about. "timeframes" is the relevant timeframe that the user will ask in the question. "category" is one of the three categories that you will organize the question into, either text, arithmetic, or visualization.

Important:
- Always provide a CIK, even if you're not 100% certain. Use your best judgment based on available information.
- Ensure the CIK format is correct: a 10-digit number starting with one or more zeros.
- Prioritize well-known, large cap companies when making educated guesses.
- If multiple companies are mentioned but you can only confidently provide CIKs for some, still include all companies in your response.

Examples:
1. Question: "How much revenue did Apple generate in Q1 2024?"
   Response: 0000320193:2024Q1:Arithmetic

2. Question: "Compare the stock prices of Microsoft and Google over the last two quarters of 2023."
   Response: 0000789019, 0001652044:2023Q3, 2023Q4:Visualization

3. Question: "Describe Amazon's expansion strategy in 2023."
   Response: 0001018724:2023Q1, 2023Q2, 2023Q3, 2023Q4:Text

4. Question: "What was Nvidia's profit margin in the first half of 2024?"
   Response: 0001045810:2024Q1, 2024Q2:Arithmetic

5. Question: "How has Tesla's stock performed compared to Ford in the last quarter?"
   Response: 0001318605, 0000037996:2024Q2:Visualization

Remember, while accuracy is crucial, it's better to provide a best guess than to omit the CIK entirely. Always strive to provide a CIK for each company mentioned, using your best judgment when necessary."#;

const FORM_TYPES_PROMPT: &str = r#"You are an assistant tasked with determining which SEC forms are relevant for answering a financial question.
Given the following financial question, provide a list of relevant SEC form types that would be useful for answering the question.
Instructions:
1. Carefully read the financial question provided.
2. Identify the SEC forms that would contain information that can be used to answer the question.
3. Return the information in this format, extending the list as necessary:
    form, form"#;

/// Extraction prompt with the current date, so relative timeframes
/// ("last quarter") resolve.
pub fn extraction_system_prompt(today: NaiveDate) -> String {
    format!(
        "{}\n\nThe current date is {}",
        EXTRACTION_INSTRUCTIONS,
        today.format("%Y-%m-%d")
    )
}

/// Parsed form of an extraction response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedExtraction {
    pub entity_ids: Vec<String>,
    pub timeframes: Vec<String>,
    pub category: QueryCategory,
}

/// Parse `ids:timeframes:category`.
///
/// Models sometimes wrap the answer in code fences or prefix it with
/// "Response:"; the last non-empty line is taken and a leading label is
/// ignored when four segments are present.
pub fn parse_extraction(raw: &str) -> Result<ParsedExtraction> {
    let line = raw
        .lines()
        .map(|l| l.trim().trim_matches('`').trim())
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| PipelineError::ExtractionError("Empty extraction response".to_string()))?;

    let mut segments: Vec<&str> = line.split(':').collect();
    if segments.len() == 4 && segments[0].trim().eq_ignore_ascii_case("response") {
        segments.remove(0);
    }
    if segments.len() != 3 {
        return Err(PipelineError::ExtractionError(format!(
            "Expected 'ids:timeframes:category', got '{}'",
            line
        )));
    }

    let entity_ids: Vec<String> = split_list(segments[0])
        .map(normalize_entity_id)
        .collect();
    if entity_ids.is_empty() {
        return Err(PipelineError::ExtractionError(
            "No entity identifiers in extraction response".to_string(),
        ));
    }

    let timeframes: Vec<String> = split_list(segments[1])
        .map(|t| t.to_uppercase())
        .collect();
    if timeframes.is_empty() {
        return Err(PipelineError::ExtractionError(
            "No timeframes in extraction response".to_string(),
        ));
    }

    let category = QueryCategory::parse(segments[2])?;

    Ok(ParsedExtraction {
        entity_ids,
        timeframes,
        category,
    })
}

/// Parse `form, form` into a set, dropping blanks.
pub fn parse_form_types(raw: &str) -> BTreeSet<String> {
    raw.lines()
        .flat_map(|line| line.split(','))
        .map(|form| form.trim().trim_matches(|c: char| c == '`' || c == '"' || c == '-' || c == '*').trim())
        .filter(|form| !form.is_empty())
        .map(|form| form.to_uppercase())
        .collect()
}

fn split_list(segment: &str) -> impl Iterator<Item = &str> {
    segment
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// Parameters plus what it cost to get them.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub params: QueryParameters,
    pub tokens: u64,
    pub warnings: Vec<Degradation>,
}

pub struct IdentifierExtractor {
    llm: Arc<dyn LanguageModel>,
}

impl IdentifierExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub async fn extract(&self, query: &str) -> Result<Extraction> {
        self.extract_on(query, chrono::Local::now().date_naive()).await
    }

    /// [`extract`](Self::extract) with an explicit current date.
    pub async fn extract_on(&self, query: &str, today: NaiveDate) -> Result<Extraction> {
        let completion = self
            .llm
            .complete(&extraction_system_prompt(today), query)
            .await
            .map_err(|e| PipelineError::ExtractionError(format!("Extraction call failed: {}", e)))?;

        debug!(raw = %completion.text, "Extraction response");
        let parsed = parse_extraction(&completion.text)?;

        let mut tokens = completion.tokens;
        let mut warnings = Vec::new();

        let relevant_document_types = match self.llm.complete(FORM_TYPES_PROMPT, query).await {
            Ok(forms) => {
                tokens += forms.tokens;
                parse_form_types(&forms.text)
            }
            Err(e) => {
                warn!("Form type classification failed, using default forms: {}", e);
                warnings.push(Degradation::FormTypesUnavailable {
                    reason: e.to_string(),
                });
                BTreeSet::new()
            }
        };

        let params = QueryParameters {
            entity_ids: parsed.entity_ids,
            timeframes: parsed.timeframes,
            category: parsed.category,
            relevant_document_types,
        };

        info!(
            entities = ?params.entity_ids,
            timeframes = ?params.timeframes,
            category = %params.category,
            forms = ?params.relevant_document_types,
            "Extracted query parameters"
        );

        Ok(Extraction {
            params,
            tokens,
            warnings,
        })
    }
}
