use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Permit portal families we know how to talk to. Anything else is
/// rejected at parse time, before a scan can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    Energov,
    Arcgis,
}

impl FromStr for System {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "energov" => Ok(System::Energov),
            "arcgis" => Ok(System::Arcgis),
            other => anyhow::bail!("Unsupported permit system: {:?}", other),
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            System::Energov => write!(f, "energov"),
            System::Arcgis => write!(f, "arcgis"),
        }
    }
}

fn default_active() -> u8 {
    1
}

/// A configured municipal permit portal. Unique by (state, system, portal_url).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub id: u32,
    pub state: String,
    pub name: String,
    pub system: System,
    pub portal_url: String,
    #[serde(default = "default_active")]
    pub active: u8,
}

/// One address candidate coming in from parcel discovery or a CSV.
/// Only `address` is required; the contact fields ride along into the
/// lead rows when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParcelRecord {
    pub address: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub mailing_address: String,
    #[serde(default)]
    pub phone: String,
}

/// One permit entry parsed out of a portal response. Transient: produced
/// by the extractor, consumed by the classifier, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PermitRecord {
    pub permit_no: String,
    pub type_line: String,
    pub issued_date: Option<NaiveDate>,
    pub finalized_date: Option<NaiveDate>,
    pub applied_date: Option<NaiveDate>,
    pub raw: String,
}

/// The universal connector result shape. Every driver, browser-based or
/// plain HTTP, emits exactly this. Dates and metrics are display strings
/// for CSV compatibility: `roof_years` is formatted to one decimal and
/// `is_20plus` is the literal "True"/"False" (or "" when age is unknown).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub roof_detected: bool,
    pub query_used: String,
    pub permit_no: String,
    pub type_line: String,
    pub roof_date: String,
    pub issued: String,
    pub finalized: String,
    pub applied: String,
    pub roof_years: String,
    pub is_20plus: String,
    pub error: String,
}

impl SearchOutcome {
    /// A no-find result. An empty `error` means a clean "nothing there";
    /// a non-empty one means the lookup itself went wrong.
    pub fn not_detected(query: &str, error: &str) -> Self {
        SearchOutcome {
            roof_detected: false,
            query_used: query.to_string(),
            error: error.to_string(),
            ..SearchOutcome::default()
        }
    }
}

/// One output row per scanned address. Immutable once appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadRow {
    pub address: String,
    pub jurisdiction: String,
    pub owner: String,
    pub mailing_address: String,
    pub phone: String,
    pub query_used: String,
    pub permit_no: String,
    pub type_line: String,
    pub roof_date_used: String,
    pub issued: String,
    pub finalized: String,
    pub applied: String,
    pub roof_years: String,
    pub is_20plus: String,
    pub status: String,
    pub seconds: String,
}

impl LeadRow {
    pub fn to_csv_record(&self) -> Vec<String> {
        vec![
            self.address.clone(),
            self.jurisdiction.clone(),
            self.owner.clone(),
            self.mailing_address.clone(),
            self.phone.clone(),
            self.query_used.clone(),
            self.permit_no.clone(),
            self.type_line.clone(),
            self.roof_date_used.clone(),
            self.issued.clone(),
            self.finalized.clone(),
            self.applied.clone(),
            self.roof_years.clone(),
            self.is_20plus.clone(),
            self.status.clone(),
            self.seconds.clone(),
        ]
    }
}

/// Run-level counters exposed to status queries.
#[derive(Debug, Clone, Default)]
pub struct ScanStatus {
    pub running: bool,
    pub total: usize,
    pub done: usize,
    pub good: usize,
    pub started_at: String,
    pub finished_at: String,
    pub message: String,
}
