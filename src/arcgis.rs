use crate::debug_println;
use crate::models::{PermitRecord, SearchOutcome};
use crate::normalize::normalize_search_address;
use crate::permits::{self, valid_date};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::blocking::Client;
use std::time::Duration;

const PAGE_SIZE: usize = 1000;

/// Columns we project from a permit feature table. Field names follow
/// the Cape Coral OpenData layer; other deployments of the same schema
/// family use the same names.
const OUT_FIELDS: &str = "Permit_Number,permit_status,applydate,issuedate,finalizedate,\
permit_desc,Permit_Type,Work_Class,Addr1,Predir,Addr2,Street_Type,Post_Dir,Unit";

/// Permit lookup against an ArcGIS REST feature table. No browser:
/// plain HTTP with a `where` filter, paged via the service's
/// transfer-limit signal. Emits the same outcome contract as the
/// browser-based drivers.
pub struct ArcGisConnector {
    client: Client,
    layer_url: String,
}

impl ArcGisConnector {
    pub fn new(layer_url: &str) -> Result<Self> {
        let layer_url = layer_url.trim().trim_end_matches('/').to_string();
        if !layer_url.starts_with("http") {
            anyhow::bail!("Invalid ArcGIS layer URL: {}", layer_url);
        }

        let client = Client::builder()
            .user_agent("roofscan/0.1")
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(ArcGisConnector { client, layer_url })
    }

    /// Address filter over the split address schema: exact house number
    /// plus a prefix match on the street name.
    fn where_clause_for(query: &str) -> Option<String> {
        let mut tokens = query.split_whitespace();
        let number = tokens.next()?;
        if !number.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let street: Vec<&str> = tokens.collect();
        if street.is_empty() {
            return None;
        }
        let street = street.join(" ").replace('\'', "''");
        let number = number.replace('\'', "''");
        Some(format!(
            "Addr1 = '{}' AND UPPER(Addr2) LIKE '{}%'",
            number,
            // Street_Type lives in its own column; match on the name only.
            street.split(' ').next().unwrap_or(street.as_str())
        ))
    }

    fn query_page(&self, where_clause: &str, offset: usize) -> Result<serde_json::Value> {
        let url = format!(
            "{}/query?f=json&where={}&outFields={}&orderByFields=issuedate%20DESC\
             &resultOffset={}&resultRecordCount={}&returnGeometry=false",
            self.layer_url,
            urlencoding::encode(where_clause),
            urlencoding::encode(OUT_FIELDS),
            offset,
            PAGE_SIZE
        );

        debug_println!("ArcGIS query: {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .context("ArcGIS query request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("ArcGIS query returned HTTP {}", response.status());
        }
        response.json().context("ArcGIS query returned invalid JSON")
    }

    /// Pull every matching feature, following `exceededTransferLimit`
    /// until the service reports a short final page.
    fn fetch_permits(&self, where_clause: &str) -> Result<Vec<PermitRecord>> {
        let mut records = Vec::new();
        let mut offset = 0usize;

        loop {
            let page = self.query_page(where_clause, offset)?;

            if let Some(err) = page.get("error") {
                anyhow::bail!("ArcGIS service error: {}", err);
            }

            let features = page["features"].as_array().cloned().unwrap_or_default();
            if features.is_empty() {
                break;
            }

            let page_len = features.len();
            for feature in &features {
                let attrs = &feature["attributes"];
                let permit_no = attrs["Permit_Number"].as_str().unwrap_or("").trim();
                if permit_no.is_empty() {
                    continue;
                }

                let type_line = ["Permit_Type", "Work_Class", "permit_desc"]
                    .iter()
                    .filter_map(|k| attrs[*k].as_str())
                    .filter(|s| !s.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join(" / ");

                records.push(PermitRecord {
                    permit_no: permit_no.to_string(),
                    type_line: type_line.clone(),
                    issued_date: valid_date(epoch_ms_to_date(attrs["issuedate"].as_i64())),
                    finalized_date: valid_date(epoch_ms_to_date(attrs["finalizedate"].as_i64())),
                    applied_date: valid_date(epoch_ms_to_date(attrs["applydate"].as_i64())),
                    raw: type_line,
                });
            }

            offset += page_len;
            let exceeded = page["exceededTransferLimit"].as_bool() == Some(true);
            if !exceeded && page_len < PAGE_SIZE {
                break;
            }
        }

        Ok(records)
    }

    /// Same contract as the EnerGov driver: query, classify, report.
    pub fn search_address(&self, street_only: &str) -> Result<SearchOutcome> {
        let query = normalize_search_address(street_only);
        if query.is_empty() {
            return Ok(SearchOutcome::not_detected("", "Empty address"));
        }

        let Some(where_clause) = Self::where_clause_for(&query) else {
            return Ok(SearchOutcome::not_detected(
                &query,
                "Address has no house number to filter on",
            ));
        };

        let records = self.fetch_permits(&where_clause)?;
        Ok(permits::outcome_from_records(&records, &query))
    }
}

/// ArcGIS REST dates are epoch milliseconds.
pub fn epoch_ms_to_date(ms: Option<i64>) -> Option<NaiveDate> {
    let ms = ms?;
    if ms == 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}
