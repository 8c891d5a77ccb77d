//! EDGAR payload types

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

pub const ARCHIVES_BASE_URL: &str = "https://www.sec.gov/Archives/edgar/data";

//
// ================= Submissions =================
//

/// `submissions/CIK##########.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilingIndex {
    #[serde(default, deserialize_with = "string_or_number")]
    pub cik: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub filings: Filings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filings {
    #[serde(default)]
    pub recent: RecentFilings,
}

/// Column-oriented list of filings, newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFilings {
    #[serde(default)]
    pub accession_number: Vec<String>,
    #[serde(default)]
    pub filing_date: Vec<String>,
    #[serde(default)]
    pub form: Vec<String>,
    #[serde(default)]
    pub primary_document: Vec<String>,
}

/// One row of [`RecentFilings`] with a parsed date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingRef {
    pub accession_number: String,
    pub filing_date: NaiveDate,
    pub form: String,
    pub primary_document: String,
}

impl FilingRef {
    /// Accession number without dashes, as used in archive paths.
    pub fn accession_path(&self) -> String {
        self.accession_number.replace('-', "")
    }

    pub fn document_url(&self, cik: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            ARCHIVES_BASE_URL,
            cik,
            self.accession_path(),
            self.primary_document
        )
    }
}

impl RecentFilings {
    /// Number of complete rows (columns may disagree on length).
    pub fn len(&self) -> usize {
        self.accession_number
            .len()
            .min(self.filing_date.len())
            .min(self.form.len())
            .min(self.primary_document.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row `index`, or `None` when out of range or the date is malformed.
    pub fn get(&self, index: usize) -> Option<FilingRef> {
        if index >= self.len() {
            return None;
        }
        let filing_date = parse_filing_date(&self.filing_date[index])?;
        Some(FilingRef {
            accession_number: self.accession_number[index].clone(),
            filing_date,
            form: self.form[index].clone(),
            primary_document: self.primary_document[index].clone(),
        })
    }

    /// Earliest parseable filing date in the index.
    pub fn earliest_filing_date(&self) -> Option<NaiveDate> {
        self.filing_date
            .iter()
            .filter_map(|d| parse_filing_date(d))
            .min()
    }
}

impl FilingIndex {
    /// CIK as used in archive URLs (no zero padding).
    pub fn archive_cik(&self, fallback_entity_id: &str) -> String {
        let source = if self.cik.trim().is_empty() {
            fallback_entity_id
        } else {
            self.cik.as_str()
        };
        unpadded_cik(source)
    }
}

pub fn parse_filing_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn unpadded_cik(entity_id: &str) -> String {
    let trimmed = entity_id.trim().trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Full submission text for a filing, used for documents referenced by facts.
pub fn submission_text_url(cik: &str, accession_number: &str) -> String {
    format!(
        "{}/{}/{}/{}.txt",
        ARCHIVES_BASE_URL,
        unpadded_cik(cik),
        accession_number.replace('-', ""),
        accession_number
    )
}

//
// ================= XBRL Frames =================
//

/// `api/xbrl/frames/{taxonomy}/{tag}/{unit}/{period}.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub taxonomy: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub ccp: String,
    #[serde(default)]
    pub uom: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data: Vec<FrameFact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameFact {
    pub accn: String,
    pub cik: u64,
    #[serde(default)]
    pub entity_name: String,
    #[serde(default)]
    pub loc: String,
    #[serde(default)]
    pub end: String,
    pub val: serde_json::Value,
}

impl Frame {
    /// Copy of the frame keeping only facts reported by `entity_id`.
    pub fn for_entity(&self, entity_id: &str) -> Frame {
        let wanted: Option<u64> = unpadded_cik(entity_id).parse().ok();
        Frame {
            data: self
                .data
                .iter()
                .filter(|fact| Some(fact.cik) == wanted)
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}
