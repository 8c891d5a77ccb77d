//! Main orchestrator - sequences one question-answering turn
//!
//! NEW QUERY: EXTRACT → ACQUIRE → INDEX → SYNTHESIZE → LOG
//! FOLLOW UP: LOAD INDEX → CLASSIFY → SYNTHESIZE → LOG
//!
//! Every failure ends at the single recovery point in [`Orchestrator::answer`],
//! which turns it into a marker-prefixed error string.

use crate::acquisition::FilingAcquirer;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::evidence::SessionIndexStore;
use crate::extractor::IdentifierExtractor;
use crate::gemini::GeminiClient;
use crate::llm::LanguageModel;
use crate::models::{Answer, Degradation, QueryCategory, TurnResult};
use crate::sec::{EdgarClient, FilingSource, Throttle};
use crate::synthesis::ResponseSynthesizer;
use crate::usage::{build_usage_logger, UsageLogger, UsageRecord};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Prefix of every answer produced by the recovery point.
pub const ERROR_MARKER: &str = "Error processing query: ";

pub const DOCUMENTS_FAILURE_MESSAGE: &str = "Failed to retrieve documents.";

pub const FOLLOW_UP_GUIDANCE: &str = "Please make a query before asking a follow-up question.";

/// Matched case-insensitively at the start of the query.
pub const FOLLOW_UP_PREFIX: &str = "follow up:";

pub fn is_follow_up(query: &str) -> bool {
    follow_up_question(query).is_some()
}

/// The question after the follow-up prefix, if the query has one.
pub fn follow_up_question(query: &str) -> Option<&str> {
    let trimmed = query.trim_start();
    let prefix = trimmed.get(..FOLLOW_UP_PREFIX.len())?;
    prefix
        .eq_ignore_ascii_case(FOLLOW_UP_PREFIX)
        .then(|| trimmed[FOLLOW_UP_PREFIX.len()..].trim())
}

/// Outcome of one flow before metrics are attached.
struct Turn {
    answer: Answer,
    category: QueryCategory,
    tokens: u64,
    warnings: Vec<Degradation>,
    /// False for the literal guidance/failure messages, which are not logged.
    answered: bool,
}

impl Turn {
    fn declined(message: &str, category: QueryCategory, tokens: u64, warnings: Vec<Degradation>) -> Self {
        Self {
            answer: Answer::Text(message.to_string()),
            category,
            tokens,
            warnings,
            answered: false,
        }
    }
}

/// Main orchestrator that coordinates the entire workflow
pub struct Orchestrator {
    extractor: IdentifierExtractor,
    acquirer: FilingAcquirer,
    indexes: SessionIndexStore,
    synthesizer: ResponseSynthesizer,
    usage: Arc<dyn UsageLogger>,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        extractor: IdentifierExtractor,
        acquirer: FilingAcquirer,
        indexes: SessionIndexStore,
        synthesizer: ResponseSynthesizer,
        usage: Arc<dyn UsageLogger>,
    ) -> Self {
        Self {
            extractor,
            acquirer,
            indexes,
            synthesizer,
            usage,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wire Gemini, EDGAR and the usage log from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let llm: Arc<dyn LanguageModel> = Arc::new(GeminiClient::new(
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
        )?);
        let source: Arc<dyn FilingSource> = Arc::new(EdgarClient::new(&config.sec_user_agent)?);

        Ok(Self::new(
            IdentifierExtractor::new(llm.clone()),
            FilingAcquirer::new(
                source,
                Throttle::new(config.sec_request_delay),
                config.work_dir.clone(),
            ),
            SessionIndexStore::new(config.index_dir.clone()),
            ResponseSynthesizer::new(llm, config.retrieval_top_k),
            build_usage_logger(config.database_url.as_deref()),
        ))
    }

    /// Answer one query for a session. Never fails: errors come back as an
    /// answer starting with [`ERROR_MARKER`] and category `text`.
    pub async fn answer(&self, query: &str, session_key: &str, context: &str) -> TurnResult {
        let start_time = Instant::now();

        let lock = self.session_lock(session_key).await;
        let result = {
            let _turn_guard = lock.lock().await;
            self.run_turn(query, session_key, context, start_time).await
        };
        drop(lock);
        self.release_session_lock(session_key).await;

        result
    }

    async fn run_turn(&self, query: &str, session_key: &str, context: &str, start_time: Instant) -> TurnResult {
        let follow_up = is_follow_up(query);
        info!(session_key, follow_up, query = %query, "Orchestrator: starting turn");

        let outcome = if follow_up {
            self.run_follow_up(query, session_key, context).await
        } else {
            self.run_new_query(query, session_key).await
        };

        let elapsed = start_time.elapsed();

        match outcome {
            Ok(turn) => {
                if turn.answered {
                    self.log_usage(turn.tokens, elapsed, query, &turn.answer, follow_up);
                }

                info!(
                    session_key,
                    category = %turn.category,
                    tokens = turn.tokens,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Turn complete"
                );

                TurnResult {
                    answer: turn.answer,
                    category: turn.category.as_str().to_string(),
                    warnings: turn.warnings.iter().map(|w| w.to_string()).collect(),
                    tokens: turn.tokens,
                    elapsed_ms: elapsed.as_millis() as u64,
                }
            }
            Err(e) => {
                error!(session_key, "Turn failed: {}", e);
                TurnResult {
                    answer: Answer::Text(format!("{}{}", ERROR_MARKER, e)),
                    category: QueryCategory::Text.as_str().to_string(),
                    warnings: Vec::new(),
                    tokens: 0,
                    elapsed_ms: elapsed.as_millis() as u64,
                }
            }
        }
    }

    /// Remove every persisted session index and idle session lock.
    pub async fn clear_memory(&self) -> Result<usize> {
        self.session_locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        self.indexes.clear_all().await
    }

    async fn run_new_query(&self, query: &str, session_key: &str) -> Result<Turn> {
        // === EXTRACT ===
        let extraction = self.extractor.extract(query).await?;
        let category = extraction.params.category;
        let mut tokens = extraction.tokens;
        let mut warnings = extraction.warnings;

        // === ACQUIRE ===
        let acquisition = match self.acquirer.acquire(&extraction.params).await {
            Ok(acquisition) => acquisition,
            Err(PipelineError::AcquisitionFailure(reason)) => {
                warn!(session_key, "No documents acquired: {}", reason);
                return Ok(Turn::declined(DOCUMENTS_FAILURE_MESSAGE, category, tokens, warnings));
            }
            Err(e) => return Err(e),
        };
        warnings.extend(acquisition.warnings.iter().cloned());

        // === INDEX ===
        let index = self
            .indexes
            .build_or_load(session_key, Some(&acquisition.folder), false)
            .await?;
        drop(acquisition);
        debug!(session_key, chunks = index.len(), "Session index ready");

        // === SYNTHESIZE ===
        let (answer, synthesis_tokens) = self
            .synthesizer
            .synthesize(&index, query, category, None)
            .await?;
        tokens += synthesis_tokens;

        Ok(Turn {
            answer,
            category,
            tokens,
            warnings,
            answered: true,
        })
    }

    async fn run_follow_up(&self, query: &str, session_key: &str, context: &str) -> Result<Turn> {
        if !self.indexes.contains(session_key).await {
            info!(session_key, "Follow-up without a prior query");
            return Ok(Turn::declined(
                FOLLOW_UP_GUIDANCE,
                QueryCategory::Text,
                0,
                Vec::new(),
            ));
        }

        let question = follow_up_question(query).unwrap_or(query);
        let index = self.indexes.build_or_load(session_key, None, true).await?;

        let classification = self.synthesizer.classify(&index, question).await?;
        let mut warnings = Vec::new();
        if let Some(raw) = classification.defaulted_from {
            warnings.push(Degradation::ClassificationDefaulted { raw });
        }

        let (answer, synthesis_tokens) = self
            .synthesizer
            .synthesize(&index, question, classification.category, Some(context))
            .await?;

        Ok(Turn {
            answer,
            category: classification.category,
            tokens: classification.tokens + synthesis_tokens,
            warnings,
            answered: true,
        })
    }

    /// Detached; the turn never waits on the usage backend.
    fn log_usage(&self, tokens: u64, elapsed: Duration, query: &str, answer: &Answer, followup: bool) {
        let record = UsageRecord::new(
            tokens,
            elapsed.as_secs_f64(),
            query,
            answer.to_log_string(),
            followup,
        );
        let usage = Arc::clone(&self.usage);
        tokio::spawn(async move {
            if let Err(e) = usage.log(record).await {
                warn!("Failed to record usage: {}", e);
            }
        });
    }

    async fn session_lock(&self, session_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the session's lock once no turn holds or awaits it.
    async fn release_session_lock(&self, session_key: &str) {
        let mut locks = self.session_locks.lock().await;
        if locks
            .get(session_key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::testing::{filing_index, MemoryFilingSource, ScriptedModel, SourceCall};
    use crate::usage::InMemoryUsageLogger;
    use tempfile::TempDir;

    const APPLE_QUERY: &str = "How much revenue did Apple generate in Q1 2024?";
    const ARCHIVE: &str = "https://www.sec.gov/Archives/edgar/data/320193";

    const CHART: &str = r#"{"chart_type": "line", "title": "Apple net sales", "x_axis": "Quarter",
        "y_axis": "USD millions", "data": {"x": ["2023Q4"], "y": [119575]}}"#;

    struct Harness {
        tmp: TempDir,
        orchestrator: Orchestrator,
        model: Arc<ScriptedModel>,
        source: Arc<MemoryFilingSource>,
        usage: Arc<InMemoryUsageLogger>,
    }

    impl Harness {
        fn work_entries(&self) -> usize {
            std::fs::read_dir(self.tmp.path().join("work"))
                .map(|rd| rd.count())
                .unwrap_or(0)
        }

        fn persisted_indexes(&self) -> usize {
            std::fs::read_dir(self.tmp.path().join("indexes"))
                .map(|rd| rd.count())
                .unwrap_or(0)
        }

        /// Usage records once the detached log tasks have run.
        async fn usage_records(&self) -> Vec<UsageRecord> {
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
            self.usage.records().await
        }

        fn with_usage_logger(mut self, usage: Arc<dyn UsageLogger>) -> Self {
            self.orchestrator = orchestrator_over(&self.tmp, &self.model, &self.source, usage);
            self
        }

        async fn tracked_sessions(&self) -> usize {
            self.orchestrator.session_locks.lock().await.len()
        }
    }

    fn orchestrator_over(
        tmp: &TempDir,
        model: &Arc<ScriptedModel>,
        source: &Arc<MemoryFilingSource>,
        usage: Arc<dyn UsageLogger>,
    ) -> Orchestrator {
        Orchestrator::new(
            IdentifierExtractor::new(model.clone()),
            FilingAcquirer::new(source.clone(), Throttle::new(Duration::ZERO), tmp.path().join("work")),
            SessionIndexStore::new(tmp.path().join("indexes")),
            ResponseSynthesizer::new(model.clone(), 4),
            usage,
        )
    }

    /// Usage backend that never finishes a write.
    struct StalledUsageLogger;

    #[async_trait::async_trait]
    impl UsageLogger for StalledUsageLogger {
        async fn log(&self, _record: UsageRecord) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn apple_source(document: &str) -> MemoryFilingSource {
        MemoryFilingSource::new()
            .with_index(
                "0000320193",
                filing_index(
                    "320193",
                    &[
                        ("0000320193-24-000069", "2024-05-03", "10-Q", "aapl-20240330.htm"),
                        ("0000320193-24-000006", "2024-02-02", "10-Q", "aapl-20231230.htm"),
                        ("0000320193-23-000077", "2023-08-04", "10-Q", "aapl-20230701.htm"),
                    ],
                ),
            )
            .with_document(&format!("{}/000032019324000006/aapl-20231230.htm", ARCHIVE), document)
    }

    /// Extraction answers `extraction`; retrieval-augmented calls go to `rag`.
    fn harness<F>(extraction: &'static str, source: MemoryFilingSource, rag: F) -> Harness
    where
        F: Fn(&str) -> Result<Completion> + Send + Sync + 'static,
    {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new(move |system, user| {
            if system.contains("ciks:timeframes:category") {
                Ok(Completion::new(extraction, 100))
            } else if system.contains("relevant SEC form types") {
                Ok(Completion::new("10-Q, 10-K", 20))
            } else {
                rag(user)
            }
        }));
        let source = Arc::new(source);
        let usage = Arc::new(InMemoryUsageLogger::new());

        let orchestrator = orchestrator_over(&tmp, &model, &source, usage.clone());

        Harness {
            tmp,
            orchestrator,
            model,
            source,
            usage,
        }
    }

    fn apple_harness() -> Harness {
        harness(
            "0000320193:2024Q1:Arithmetic",
            apple_source("<p>Total net sales were $119,575 million.</p>"),
            |user| {
                if user.contains("Provide only the type as a single word") {
                    Ok(Completion::new("Visualization", 5))
                } else if user.contains("Return only the JSON structure") {
                    Ok(Completion::new(CHART, 40))
                } else {
                    Ok(Completion::new("Apple generated $119.6 billion in revenue.", 60))
                }
            },
        )
    }

    #[test]
    fn test_follow_up_prefix() {
        assert!(is_follow_up("follow up: and Q2?"));
        assert!(is_follow_up("  Follow Up: and Q2?"));
        assert!(is_follow_up("FOLLOW UP:"));
        assert!(!is_follow_up("follow-up: and Q2?"));
        assert!(!is_follow_up("What should I follow up: on?"));
        assert_eq!(follow_up_question("Follow up:  plot it "), Some("plot it"));
    }

    #[tokio::test]
    async fn test_apple_end_to_end() {
        let h = apple_harness();

        let result = h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;

        assert_eq!(result.category, "arithmetic");
        assert_eq!(
            result.answer,
            Answer::Text("Apple generated $119.6 billion in revenue.".to_string())
        );
        assert!(!result.is_error());
        assert!(result.warnings.is_empty());
        assert_eq!(result.tokens, 180);

        assert_eq!(h.work_entries(), 0);
        assert_eq!(h.persisted_indexes(), 1);

        let records = h.usage_records().await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].followup);
        assert_eq!(records[0].tokens_used, 180);
    }

    #[tokio::test]
    async fn test_turn_does_not_wait_for_usage_backend() {
        let h = apple_harness().with_usage_logger(Arc::new(StalledUsageLogger));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            h.orchestrator.answer(APPLE_QUERY, "chat-1", ""),
        )
        .await
        .expect("turn waited on the usage backend");

        assert!(!result.is_error());
        assert_eq!(result.tokens, 180);
    }

    #[tokio::test]
    async fn test_session_locks_released_after_turns() {
        let h = apple_harness();
        h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;
        h.orchestrator.answer("follow up: chart that", "chat-1", "").await;
        h.orchestrator.answer("follow up: anything?", "chat-2", "").await;

        assert_eq!(h.tracked_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_follow_up_without_prior_query() {
        let h = apple_harness();

        let result = h
            .orchestrator
            .answer("Follow up: what about Q2?", "fresh", "")
            .await;

        assert_eq!(result.answer, Answer::Text(FOLLOW_UP_GUIDANCE.to_string()));
        assert_eq!(result.category, "text");
        assert_eq!(h.model.calls(), 0);
        assert!(h.source.calls().is_empty());
        assert_eq!(h.persisted_indexes(), 0);
        assert!(h.usage_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_follow_up_reuses_session_index() {
        let h = apple_harness();
        h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;
        let source_calls = h.source.calls().len();

        let context = "Query: Apple revenue? \nResponse: $119.6B\n==========================\n";
        let result = h
            .orchestrator
            .answer("follow up: chart that", "chat-1", context)
            .await;

        assert_eq!(result.category, "visualization");
        assert!(matches!(result.answer, Answer::Chart(ref spec) if spec.chart_type == "line"));
        assert_eq!(result.tokens, 45);
        assert_eq!(h.source.calls().len(), source_calls);
        assert_eq!(h.persisted_indexes(), 1);

        let records = h.usage_records().await;
        assert_eq!(records.len(), 2);
        assert!(records[1].followup);
    }

    #[tokio::test]
    async fn test_follow_up_text_carries_context() {
        let h = harness(
            "0000320193:2024Q1:Text",
            apple_source("<p>Total net sales were $119,575 million.</p>"),
            |user| {
                if user.contains("Provide only the type as a single word") {
                    Ok(Completion::new("not sure", 5))
                } else {
                    Ok(Completion::new(user.to_string(), 10))
                }
            },
        );
        h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;

        let result = h
            .orchestrator
            .answer("Follow up: and services?", "chat-1", "Query: q0 \nResponse: r0\n")
            .await;

        assert_eq!(result.category, "text");
        assert_eq!(result.warnings.len(), 1);
        let text = result.answer.as_text().unwrap();
        assert!(text.contains("and services?"));
        assert!(text.contains("Here are the last 3 queries and responses for context:\nQuery: q0"));
    }

    #[tokio::test]
    async fn test_two_new_queries_leave_one_index() {
        let h = apple_harness();
        h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;
        h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;
        assert_eq!(h.persisted_indexes(), 1);

        h.orchestrator.answer(APPLE_QUERY, "chat-2", "").await;
        assert_eq!(h.persisted_indexes(), 2);

        assert_eq!(h.orchestrator.clear_memory().await.unwrap(), 2);
        assert_eq!(h.persisted_indexes(), 0);
    }

    #[tokio::test]
    async fn test_visualization_query() {
        let h = harness(
            "0000320193:2023Q4, 2024Q1:Visualization",
            apple_source("<p>Total net sales were $119,575 million.</p>"),
            |_| Ok(Completion::new(format!("Sure! {} Hope this helps.", CHART), 40)),
        );

        let result = h.orchestrator.answer("Chart Apple's sales", "chat-1", "").await;
        assert_eq!(result.category, "visualization");
        assert!(matches!(result.answer, Answer::Chart(_)));
        assert_eq!(h.work_entries(), 0);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_error_string() {
        let h = harness("I don't know", apple_source("<p>x</p>"), |_| {
            Ok(Completion::new("unused", 1))
        });

        let result = h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;
        assert!(result.is_error());
        assert_eq!(result.category, "text");
        assert!(h.source.calls().is_empty());
        assert_eq!(h.work_entries(), 0);
    }

    #[tokio::test]
    async fn test_acquisition_failure_message() {
        let h = harness(
            "0000320193:2024Q1:Arithmetic",
            MemoryFilingSource::new(),
            |_| Ok(Completion::new("unused", 1)),
        );

        let result = h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;
        assert_eq!(result.answer, Answer::Text(DOCUMENTS_FAILURE_MESSAGE.to_string()));
        assert_eq!(result.category, "arithmetic");
        assert!(!result.is_error());
        assert_eq!(h.work_entries(), 0);
        assert_eq!(h.persisted_indexes(), 0);
        assert!(h.usage_records().await.is_empty());
        assert_eq!(
            h.source.calls(),
            vec![SourceCall::FilingIndex("0000320193".to_string())]
        );
    }

    #[tokio::test]
    async fn test_index_failure_releases_folder() {
        // the filing converts to empty text, so nothing can be indexed
        let h = harness(
            "0000320193:2024Q1:Arithmetic",
            apple_source("<script>var x = 1;</script>"),
            |_| Ok(Completion::new("unused", 1)),
        );

        let result = h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;
        assert!(result.is_error());
        assert!(result.answer.as_text().unwrap().contains("Index error"));
        assert_eq!(h.work_entries(), 0);
        assert_eq!(h.persisted_indexes(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_failure_releases_folder() {
        let h = harness(
            "0000320193:2024Q1:Arithmetic",
            apple_source("<p>Total net sales</p>"),
            |_| Err(PipelineError::LlmError("model overloaded".to_string())),
        );

        let result = h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await;
        assert!(result.is_error());
        assert!(result.answer.as_text().unwrap().starts_with(ERROR_MARKER));
        assert_eq!(h.work_entries(), 0);
        assert!(h.usage_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_session() {
        let h = Arc::new(apple_harness());

        let a = {
            let h = h.clone();
            tokio::spawn(async move { h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await })
        };
        let b = {
            let h = h.clone();
            tokio::spawn(async move { h.orchestrator.answer(APPLE_QUERY, "chat-1", "").await })
        };

        assert!(!a.await.unwrap().is_error());
        assert!(!b.await.unwrap().is_error());
        assert_eq!(h.persisted_indexes(), 1);
        assert_eq!(h.work_entries(), 0);
        assert_eq!(h.tracked_sessions().await, 0);
        assert_eq!(h.usage_records().await.len(), 2);
    }
}
