//! Lexical retrieval index over one evidence folder
//!
//! Chunks are scored with BM25 against the user's question; the best
//! chunks become the context of a single model call.

use super::text::{document_to_text, split_into_chunks, tokenize, MAX_CHUNK_CHARS};
use crate::error::PipelineError;
use crate::llm::{Completion, LanguageModel};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

const INDEXED_EXTENSIONS: &[&str] = &["txt", "htm", "html", "json", "md", "xml"];

const RAG_SYSTEM_PROMPT: &str = r#"You are an expert financial analyst answering questions about SEC-registered public companies.
You are given excerpts retrieved from the company's SEC filings and XBRL financial data.
Ground your answer in those excerpts, citing figures from them where possible, and use your general knowledge only to fill gaps.
Follow the formatting instructions in the request exactly."#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub source: String,
    pub text: String,
    terms: HashMap<String, u32>,
    len: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceIndex {
    chunks: Vec<IndexedChunk>,
    doc_freq: HashMap<String, u32>,
    avg_len: f32,
    pub created_at: DateTime<Utc>,
}

impl EvidenceIndex {
    /// Index every supported file under `folder`.
    pub fn from_folder(folder: &Path) -> Result<Self> {
        if !folder.is_dir() {
            return Err(PipelineError::IndexError(format!(
                "Evidence folder not found: {}",
                folder.display()
            )));
        }

        let mut documents = Vec::new();
        for entry in WalkDir::new(folder).into_iter() {
            let entry = entry.map_err(|e| {
                PipelineError::IndexError(format!("Failed to read evidence folder: {}", e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if !INDEXED_EXTENSIONS.contains(&extension.as_str()) {
                debug!(path = %path.display(), "Skipping unsupported evidence file");
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            match fs::read(path) {
                Ok(bytes) => documents.push((name.clone(), document_to_text(&name, &bytes))),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable evidence file: {}", e),
            }
        }

        Self::from_documents(documents)
    }

    /// Index `(source, text)` pairs.
    pub fn from_documents(documents: Vec<(String, String)>) -> Result<Self> {
        let mut chunks = Vec::new();
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for (source, text) in documents {
            for chunk_text in split_into_chunks(&text, MAX_CHUNK_CHARS) {
                let mut terms: HashMap<String, u32> = HashMap::new();
                let tokens = tokenize(&chunk_text);
                for token in &tokens {
                    *terms.entry(token.clone()).or_insert(0) += 1;
                }
                for term in terms.keys() {
                    *doc_freq.entry(term.clone()).or_insert(0) += 1;
                }
                chunks.push(IndexedChunk {
                    source: source.clone(),
                    text: chunk_text,
                    terms,
                    len: tokens.len() as u32,
                });
            }
        }

        if chunks.is_empty() {
            return Err(PipelineError::IndexError(
                "No indexable text found in evidence".to_string(),
            ));
        }

        let total_len: u64 = chunks.iter().map(|c| c.len as u64).sum();
        let avg_len = (total_len as f32 / chunks.len() as f32).max(1.0);

        Ok(Self {
            chunks,
            doc_freq,
            avg_len,
            created_at: Utc::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Distinct document names in index order.
    pub fn sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for chunk in &self.chunks {
            if !sources.contains(&chunk.source.as_str()) {
                sources.push(&chunk.source);
            }
        }
        sources
    }

    fn score(&self, chunk: &IndexedChunk, query_terms: &[String]) -> f32 {
        let n = self.chunks.len() as f32;
        let len_norm = 1.0 - BM25_B + BM25_B * (chunk.len as f32 / self.avg_len);

        query_terms
            .iter()
            .filter_map(|term| {
                let tf = *chunk.terms.get(term)? as f32;
                let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
                let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                Some(idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * len_norm))
            })
            .sum()
    }

    /// Best `top_k` chunks for `query`; leading chunks when nothing matches.
    pub fn retrieve(&self, query: &str, top_k: usize) -> Vec<&IndexedChunk> {
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        let mut scored: Vec<(f32, usize)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (self.score(chunk, &query_terms), i))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        if scored.is_empty() {
            return self.chunks.iter().take(top_k).collect();
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, i)| &self.chunks[i])
            .collect()
    }

    /// Retrieval-augmented model call: excerpts for `retrieval_query`,
    /// followed by the full `prompt`.
    pub async fn query(
        &self,
        llm: &dyn LanguageModel,
        retrieval_query: &str,
        prompt: &str,
        top_k: usize,
    ) -> Result<Completion> {
        let excerpts = self.retrieve(retrieval_query, top_k);
        debug!(excerpts = excerpts.len(), "Retrieved evidence excerpts");

        let context = excerpts
            .iter()
            .map(|chunk| format!("[source: {}]\n{}", chunk.source, chunk.text))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let user_prompt = format!(
            "Context information is below.\n---------------------\n{}\n---------------------\n{}",
            context, prompt
        );

        llm.complete(RAG_SYSTEM_PROMPT, &user_prompt).await
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| {
            PipelineError::IndexError(format!(
                "Failed to read persisted index {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::IndexError(format!(
                "Corrupt persisted index {}: {}",
                path.display(),
                e
            ))
        })
    }
}
