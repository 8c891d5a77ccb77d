//! Test doubles for the model and SEC seams

use crate::error::PipelineError;
use crate::llm::{Completion, LanguageModel};
use crate::models::FiscalQuarter;
use crate::sec::{FilingIndex, FilingSource, Frame, RecentFilings};
use crate::sec::types::Filings;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type Responder = dyn Fn(&str, &str) -> Result<Completion> + Send + Sync;

/// Language model answering through a closure over (system, user).
pub struct ScriptedModel {
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<Completion> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.responder)(system_prompt, user_prompt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    FilingIndex(String),
    Frame(String, FiscalQuarter),
    Document(String),
}

/// In-memory EDGAR stand-in; anything not registered answers like a 404.
#[derive(Default)]
pub struct MemoryFilingSource {
    indexes: HashMap<String, FilingIndex>,
    frames: HashMap<String, Frame>,
    documents: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<SourceCall>>,
}

impl MemoryFilingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, entity_id: &str, index: FilingIndex) -> Self {
        self.indexes.insert(entity_id.to_string(), index);
        self
    }

    pub fn with_frame(mut self, concept: &str, frame: Frame) -> Self {
        self.frames.insert(concept.to_string(), frame);
        self
    }

    pub fn with_document(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(url.to_string(), body.as_bytes().to_vec());
        self
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: SourceCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl FilingSource for MemoryFilingSource {
    async fn filing_index(&self, entity_id: &str) -> Result<FilingIndex> {
        self.record(SourceCall::FilingIndex(entity_id.to_string()));
        self.indexes.get(entity_id).cloned().ok_or_else(|| {
            PipelineError::TransportError(format!("no submissions for {}", entity_id))
        })
    }

    async fn frame(&self, concept: &str, quarter: &FiscalQuarter) -> Result<Frame> {
        self.record(SourceCall::Frame(concept.to_string(), *quarter));
        self.frames
            .get(concept)
            .cloned()
            .ok_or_else(|| PipelineError::TransportError(format!("no frame for {}", concept)))
    }

    async fn document(&self, url: &str) -> Result<Vec<u8>> {
        self.record(SourceCall::Document(url.to_string()));
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| PipelineError::TransportError(format!("GET {} returned 404", url)))
    }
}

/// Build a filing index from `(accession, filing date, form, primary document)` rows.
pub fn filing_index(cik: &str, rows: &[(&str, &str, &str, &str)]) -> FilingIndex {
    let mut recent = RecentFilings::default();
    for (accession, date, form, document) in rows {
        recent.accession_number.push(accession.to_string());
        recent.filing_date.push(date.to_string());
        recent.form.push(form.to_string());
        recent.primary_document.push(document.to_string());
    }
    FilingIndex {
        cik: cik.to_string(),
        name: String::new(),
        filings: Filings { recent },
    }
}
