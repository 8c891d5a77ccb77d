//! Filing acquisition
//!
//! Fetches each entity's filing index and downloads the filings around the
//! requested quarter. When the index does not reach back to the quarter,
//! the entity falls back to XBRL structured facts instead.
//!
//! Acquisition is best-effort: per-entity, per-concept and per-document
//! failures are logged and skipped. Every outbound call is paced by the
//! [`Throttle`].

use crate::error::PipelineError;
use crate::evidence::text::document_to_text;
use crate::evidence::{EvidenceFolder, SNAPSHOT_FILE_NAME};
use crate::models::{normalize_entity_id, Degradation, FiscalQuarter, QueryParameters};
use crate::sec::types::submission_text_url;
use crate::sec::{FilingIndex, FilingRef, FilingSource, Frame, RecentFilings, Throttle};
use crate::Result;
use chrono::{Months, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Quarterly and annual reports are always searched.
pub const DEFAULT_FORM_TYPES: &[&str] = &["10-Q", "10-K"];

/// Concepts fetched from the XBRL frames API on fallback.
pub const STRUCTURED_CONCEPTS: &[&str] = &["Assets", "Liabilities", "LongTermDebt", "AccountsPayableCurrent"];

/// Filings referenced by structured facts that are downloaded per entity.
const MAX_FACT_DOCUMENTS: usize = 4;

/// entity id → quarter → concept → facts
type FactsSnapshot = BTreeMap<String, BTreeMap<String, BTreeMap<String, Frame>>>;

//
// ================= Selection Rules =================
//

/// Open interval of filing dates searched for one quarter: six months
/// starting three months before the quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FilingWindow {
    pub fn around(quarter_start: NaiveDate) -> Self {
        let start = quarter_start
            .checked_sub_months(Months::new(3))
            .unwrap_or(NaiveDate::MIN);
        let end = start
            .checked_add_months(Months::new(6))
            .unwrap_or(NaiveDate::MAX);
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start < date && date < self.end
    }
}

/// Where an entity's evidence for a quarter comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceSource {
    FilingIndex,
    StructuredFacts,
}

/// Fall back to structured facts when the earliest filing in the index is
/// after the quarter start. `None` when the index lists no dated filings.
pub fn choose_source(index: &FilingIndex, quarter_start: NaiveDate) -> Option<EvidenceSource> {
    let earliest = index.filings.recent.earliest_filing_date()?;
    if earliest > quarter_start {
        Some(EvidenceSource::StructuredFacts)
    } else {
        Some(EvidenceSource::FilingIndex)
    }
}

/// Walk the newest-first filing list and pick wanted forms inside the
/// window. Scanning stops at the first filing older than the window.
pub fn select_filings(
    recent: &RecentFilings,
    window: FilingWindow,
    relevant_forms: &BTreeSet<String>,
) -> Vec<FilingRef> {
    let mut selected = Vec::new();

    for position in 0..recent.len() {
        let Some(filing) = recent.get(position) else {
            debug!(position, "Skipping filing with malformed date");
            continue;
        };

        let wanted_form = relevant_forms.contains(&filing.form)
            || DEFAULT_FORM_TYPES.contains(&filing.form.as_str());

        if wanted_form && window.contains(filing.filing_date) {
            selected.push(filing);
        } else if filing.filing_date < window.start {
            break;
        }
    }

    selected
}

//
// ================= Acquirer =================
//

/// Evidence gathered for one query. Dropping it deletes the folder.
#[derive(Debug)]
pub struct Acquisition {
    pub folder: EvidenceFolder,
    pub documents: usize,
    pub warnings: Vec<Degradation>,
}

pub struct FilingAcquirer {
    source: Arc<dyn FilingSource>,
    throttle: Throttle,
    work_dir: PathBuf,
}

impl FilingAcquirer {
    pub fn new(source: Arc<dyn FilingSource>, throttle: Throttle, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            throttle,
            work_dir: work_dir.into(),
        }
    }

    pub async fn acquire(&self, params: &QueryParameters) -> Result<Acquisition> {
        let quarters = params
            .timeframes
            .iter()
            .map(|t| t.parse::<FiscalQuarter>())
            .collect::<Result<Vec<_>>>()?;

        let folder = EvidenceFolder::create(&self.work_dir).map_err(|e| {
            PipelineError::AcquisitionFailure(format!("Could not create evidence folder: {}", e))
        })?;

        let mut indexes: HashMap<String, FilingIndex> = HashMap::new();
        let mut snapshot = FactsSnapshot::new();
        let mut warnings = Vec::new();

        for quarter in &quarters {
            for raw_id in &params.entity_ids {
                let entity_id = normalize_entity_id(raw_id);

                let written = self
                    .acquire_entity(
                        &entity_id,
                        quarter,
                        &params.relevant_document_types,
                        &folder,
                        &mut indexes,
                        &mut snapshot,
                        &mut warnings,
                    )
                    .await;

                match written {
                    Ok(written) => debug!(%entity_id, %quarter, written, "Entity acquisition finished"),
                    Err(e) => warn!(%entity_id, %quarter, "Acquisition failed for entity: {}", e),
                }
            }
        }

        let documents = folder.file_count()?;
        if documents == 0 {
            return Err(PipelineError::AcquisitionFailure(
                "No documents were retrieved for any entity".to_string(),
            ));
        }

        info!(documents, folder = %folder.path().display(), "Acquisition complete");

        Ok(Acquisition {
            folder,
            documents,
            warnings,
        })
    }

    /// Files written for one entity and quarter.
    #[allow(clippy::too_many_arguments)]
    async fn acquire_entity(
        &self,
        entity_id: &str,
        quarter: &FiscalQuarter,
        relevant_forms: &BTreeSet<String>,
        folder: &EvidenceFolder,
        indexes: &mut HashMap<String, FilingIndex>,
        snapshot: &mut FactsSnapshot,
        warnings: &mut Vec<Degradation>,
    ) -> Result<usize> {
        if !indexes.contains_key(entity_id) {
            let fetched = self.fetch_filing_index(entity_id).await?;
            indexes.insert(entity_id.to_string(), fetched);
        }
        let Some(index) = indexes.get(entity_id) else {
            return Ok(0);
        };

        let quarter_start = quarter.start_date();

        match choose_source(index, quarter_start) {
            None => {
                warn!(%entity_id, "Filing index lists no filings");
                Ok(0)
            }
            Some(EvidenceSource::StructuredFacts) => {
                warn!(
                    %entity_id,
                    %quarter,
                    "Filing index does not reach back to the requested quarter, using structured facts"
                );
                warnings.push(Degradation::StructuredFactsFallback {
                    entity_id: entity_id.to_string(),
                    timeframe: quarter.to_string(),
                });
                self.acquire_structured_facts(entity_id, quarter, folder, snapshot)
                    .await
            }
            Some(EvidenceSource::FilingIndex) => {
                let window = FilingWindow::around(quarter_start);
                let selected = select_filings(&index.filings.recent, window, relevant_forms);
                let cik = index.archive_cik(entity_id);
                debug!(%entity_id, selected = selected.len(), "Selected filings");

                Ok(self.download_filings(&cik, &selected, folder).await)
            }
        }
    }

    async fn download_filings(&self, cik: &str, filings: &[FilingRef], folder: &EvidenceFolder) -> usize {
        let mut written = 0;

        for filing in filings {
            let file_name = format!("{}.txt", filing.accession_path());
            if folder.contains(&file_name) {
                continue;
            }

            let url = filing.document_url(cik);
            match self.fetch_document(&url).await {
                Ok(bytes) => {
                    let text = document_to_text(&filing.primary_document, &bytes);
                    match folder.write_file(&file_name, text.as_bytes()) {
                        Ok(_) => written += 1,
                        Err(e) => warn!(%url, "Failed to save filing: {}", e),
                    }
                }
                Err(e) => warn!(%url, form = %filing.form, "Failed to fetch filing: {}", e),
            }
        }

        written
    }

    async fn acquire_structured_facts(
        &self,
        entity_id: &str,
        quarter: &FiscalQuarter,
        folder: &EvidenceFolder,
        snapshot: &mut FactsSnapshot,
    ) -> Result<usize> {
        let mut concepts = BTreeMap::new();

        for concept in STRUCTURED_CONCEPTS {
            match self.fetch_frame(concept, quarter).await {
                Ok(frame) => {
                    concepts.insert(concept.to_string(), frame.for_entity(entity_id));
                }
                Err(e) => warn!(%entity_id, concept, "Failed to fetch structured facts: {}", e),
            }
        }

        if concepts.is_empty() {
            return Err(PipelineError::AcquisitionFailure(format!(
                "No structured facts available for {} in {}",
                entity_id, quarter
            )));
        }

        let accessions: Vec<String> = concepts
            .values()
            .flat_map(|frame| frame.data.iter().map(|fact| fact.accn.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .take(MAX_FACT_DOCUMENTS)
            .collect();

        snapshot
            .entry(entity_id.to_string())
            .or_default()
            .insert(quarter.to_string(), concepts);
        folder.write_file(SNAPSHOT_FILE_NAME, &serde_json::to_vec_pretty(snapshot)?)?;

        let mut written = 1;
        for accession in accessions {
            let file_name = format!("{}.txt", accession.replace('-', ""));
            if folder.contains(&file_name) {
                continue;
            }

            let url = submission_text_url(entity_id, &accession);
            match self.fetch_document(&url).await {
                Ok(bytes) => {
                    let text = document_to_text(&file_name, &bytes);
                    match folder.write_file(&file_name, text.as_bytes()) {
                        Ok(_) => written += 1,
                        Err(e) => warn!(%url, "Failed to save referenced filing: {}", e),
                    }
                }
                Err(e) => warn!(%url, "Failed to fetch referenced filing: {}", e),
            }
        }

        Ok(written)
    }

    // Every outbound call goes through one of these.

    async fn fetch_filing_index(&self, entity_id: &str) -> Result<FilingIndex> {
        self.throttle.pace().await;
        self.source.filing_index(entity_id).await
    }

    async fn fetch_frame(&self, concept: &str, quarter: &FiscalQuarter) -> Result<Frame> {
        self.throttle.pace().await;
        self.source.frame(concept, quarter).await
    }

    async fn fetch_document(&self, url: &str) -> Result<Vec<u8>> {
        self.throttle.pace().await;
        self.source.document(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryCategory;
    use crate::sec::FrameFact;
    use crate::testing::{filing_index, MemoryFilingSource, SourceCall};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::Instant;

    const APPLE: &str = "0000320193";
    const ARCHIVE: &str = "https://www.sec.gov/Archives/edgar/data/320193";

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn params(ids: &[&str], timeframes: &[&str], forms: &[&str]) -> QueryParameters {
        QueryParameters {
            entity_ids: ids.iter().map(|s| s.to_string()).collect(),
            timeframes: timeframes.iter().map(|s| s.to_string()).collect(),
            category: QueryCategory::Arithmetic,
            relevant_document_types: forms.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn apple_index() -> FilingIndex {
        filing_index(
            "320193",
            &[
                ("0000320193-24-000069", "2024-05-03", "10-Q", "aapl-20240330.htm"),
                ("0000320193-24-000006", "2024-02-02", "10-Q", "aapl-20231230.htm"),
                ("0000320193-23-000106", "2023-11-03", "10-K", "aapl-20230930.htm"),
                ("0000320193-23-000077", "2023-08-04", "10-Q", "aapl-20230701.htm"),
            ],
        )
    }

    fn apple_source() -> MemoryFilingSource {
        MemoryFilingSource::new()
            .with_index(APPLE, apple_index())
            .with_document(
                &format!("{}/000032019324000006/aapl-20231230.htm", ARCHIVE),
                "<p>Total net sales $119,575 million</p>",
            )
            .with_document(
                &format!("{}/000032019323000106/aapl-20230930.htm", ARCHIVE),
                "<p>Annual report</p>",
            )
    }

    fn acquirer(source: Arc<MemoryFilingSource>, tmp: &TempDir) -> FilingAcquirer {
        FilingAcquirer::new(source, Throttle::new(Duration::ZERO), tmp.path().join("work"))
    }

    fn work_entries(tmp: &TempDir) -> usize {
        std::fs::read_dir(tmp.path().join("work"))
            .map(|rd| rd.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_window_is_open_interval() {
        let window = FilingWindow::around(date("2024-01-01"));
        assert_eq!(window.start, date("2023-10-01"));
        assert_eq!(window.end, date("2024-04-01"));

        assert!(!window.contains(date("2023-10-01")));
        assert!(!window.contains(date("2024-04-01")));
        assert!(window.contains(date("2023-10-02")));
        assert!(window.contains(date("2024-03-31")));
    }

    #[test]
    fn test_select_filings_window_forms_and_early_stop() {
        let index = filing_index(
            "320193",
            &[
                ("a-1", "2024-05-03", "10-Q", "after.htm"),
                ("a-2", "2024-04-01", "10-Q", "end-boundary.htm"),
                ("a-3", "2024-02-02", "10-Q", "inside.htm"),
                ("a-4", "2024-01-15", "4", "insider.htm"),
                ("a-5", "2023-12-01", "8-K", "event.htm"),
                ("a-6", "2023-10-01", "10-K", "start-boundary.htm"),
                ("a-7", "2023-08-04", "10-Q", "too-old.htm"),
                ("a-8", "2023-12-15", "10-Q", "never-inspected.htm"),
            ],
        );
        let window = FilingWindow::around(date("2024-01-01"));

        let defaults_only = select_filings(&index.filings.recent, window, &BTreeSet::new());
        let docs: Vec<_> = defaults_only.iter().map(|f| f.primary_document.as_str()).collect();
        assert_eq!(docs, vec!["inside.htm"]);

        let with_8k: BTreeSet<String> = ["8-K".to_string()].into_iter().collect();
        let selected = select_filings(&index.filings.recent, window, &with_8k);
        let docs: Vec<_> = selected.iter().map(|f| f.primary_document.as_str()).collect();
        assert_eq!(docs, vec!["inside.htm", "event.htm"]);
    }

    #[test]
    fn test_choose_source_compares_earliest_date_with_quarter_start() {
        let index = apple_index();
        assert_eq!(
            choose_source(&index, date("2023-08-04")),
            Some(EvidenceSource::FilingIndex)
        );
        assert_eq!(
            choose_source(&index, date("2023-08-03")),
            Some(EvidenceSource::StructuredFacts)
        );
        assert_eq!(choose_source(&filing_index("1", &[]), date("2024-01-01")), None);
    }

    #[tokio::test]
    async fn test_filing_index_path_downloads_selected_filings() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(apple_source());
        let acquisition = acquirer(source.clone(), &tmp)
            .acquire(&params(&["320193"], &["2024Q1"], &[]))
            .await
            .unwrap();

        assert_eq!(acquisition.documents, 2);
        assert!(acquisition.warnings.is_empty());
        assert!(acquisition.folder.contains("000032019324000006.txt"));
        let saved = std::fs::read_to_string(acquisition.folder.path().join("000032019324000006.txt")).unwrap();
        assert_eq!(saved, "Total net sales $119,575 million");

        assert!(!source
            .calls()
            .iter()
            .any(|c| matches!(c, SourceCall::Frame(..))));
    }

    #[tokio::test]
    async fn test_structured_facts_fallback_when_index_too_recent() {
        let tmp = TempDir::new().unwrap();
        let frame = Frame {
            tag: "Assets".to_string(),
            data: vec![
                FrameFact {
                    accn: "0000320193-19-000066".to_string(),
                    cik: 320193,
                    entity_name: "Apple Inc.".to_string(),
                    loc: "US-CA".to_string(),
                    end: "2019-03-30".to_string(),
                    val: serde_json::json!(341998000000u64),
                },
                FrameFact {
                    accn: "0000789019-19-000010".to_string(),
                    cik: 789019,
                    entity_name: "Microsoft".to_string(),
                    loc: "US-WA".to_string(),
                    end: "2019-03-31".to_string(),
                    val: serde_json::json!(1),
                },
            ],
            ..Frame::default()
        };
        let source = Arc::new(
            apple_source()
                .with_frame("Assets", frame)
                .with_document(
                    &format!("{}/000032019319000066/0000320193-19-000066.txt", ARCHIVE),
                    "<html><p>Quarterly report 2019</p></html>",
                ),
        );

        let acquisition = acquirer(source.clone(), &tmp)
            .acquire(&params(&["0000320193"], &["2019Q2"], &[]))
            .await
            .unwrap();

        assert_eq!(
            acquisition.warnings,
            vec![Degradation::StructuredFactsFallback {
                entity_id: APPLE.to_string(),
                timeframe: "2019Q2".to_string(),
            }]
        );
        assert!(acquisition.folder.contains(SNAPSHOT_FILE_NAME));
        assert!(acquisition.folder.contains("000032019319000066.txt"));

        let snapshot: serde_json::Value = serde_json::from_slice(
            &std::fs::read(acquisition.folder.path().join(SNAPSHOT_FILE_NAME)).unwrap(),
        )
        .unwrap();
        let facts = &snapshot[APPLE]["2019Q2"]["Assets"]["data"];
        assert_eq!(facts.as_array().unwrap().len(), 1);

        let calls = source.calls();
        let frame_calls = calls.iter().filter(|c| matches!(c, SourceCall::Frame(..))).count();
        assert_eq!(frame_calls, STRUCTURED_CONCEPTS.len());
        assert!(!calls.iter().any(|c| matches!(c, SourceCall::Document(url) if url.ends_with(".htm"))));
    }

    #[tokio::test]
    async fn test_failed_entity_does_not_block_others() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(apple_source());
        let acquisition = acquirer(source.clone(), &tmp)
            .acquire(&params(&["9999999999", "320193"], &["2024Q1"], &[]))
            .await
            .unwrap();

        assert_eq!(acquisition.documents, 2);
        assert_eq!(
            source.calls()[0],
            SourceCall::FilingIndex("9999999999".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_document_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(
            MemoryFilingSource::new()
                .with_index(APPLE, apple_index())
                .with_document(
                    &format!("{}/000032019323000106/aapl-20230930.htm", ARCHIVE),
                    "<p>Annual report</p>",
                ),
        );

        let acquisition = acquirer(source, &tmp)
            .acquire(&params(&[APPLE], &["2024Q1"], &[]))
            .await
            .unwrap();

        assert_eq!(acquisition.documents, 1);
        assert!(acquisition.folder.contains("000032019323000106.txt"));
    }

    #[tokio::test]
    async fn test_no_documents_is_failure_and_folder_removed() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MemoryFilingSource::new());

        let err = acquirer(source, &tmp)
            .acquire(&params(&[APPLE], &["2024Q1"], &[]))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::AcquisitionFailure(_)));
        assert_eq!(work_entries(&tmp), 0);
    }

    #[tokio::test]
    async fn test_invalid_timeframe_is_failure() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(apple_source());

        let err = acquirer(source.clone(), &tmp)
            .acquire(&params(&[APPLE], &["last quarter"], &[]))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::AcquisitionFailure(_)));
        assert!(source.calls().is_empty());
    }

    #[tokio::test]
    async fn test_filing_index_fetched_once_across_quarters() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(apple_source());

        acquirer(source.clone(), &tmp)
            .acquire(&params(&[APPLE], &["2023Q4", "2024Q1"], &[]))
            .await
            .unwrap();

        let index_calls = source
            .calls()
            .iter()
            .filter(|c| matches!(c, SourceCall::FilingIndex(_)))
            .count();
        assert_eq!(index_calls, 1);

        let document_calls = source
            .calls()
            .iter()
            .filter(|c| matches!(c, SourceCall::Document(_)))
            .count();
        assert_eq!(document_calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_applied_per_request() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(apple_source());
        let delay = Duration::from_millis(100);
        let acquirer = FilingAcquirer::new(source.clone(), Throttle::new(delay), tmp.path().join("work"));

        let start = Instant::now();
        acquirer
            .acquire(&params(&[APPLE], &["2024Q1"], &[]))
            .await
            .unwrap();
        let elapsed = start.elapsed();

        // one filing index + two documents
        let requests = source.calls().len() as u32;
        assert_eq!(requests, 3);
        assert_eq!(elapsed, delay * requests);
    }
}
