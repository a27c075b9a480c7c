use crate::models::{LeadRow, ParcelRecord};
use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

/// Column order of every lead export. Fixed so downstream sheets can
/// rely on positions across runs.
pub const LEAD_CSV_HEADER: [&str; 16] = [
    "address",
    "jurisdiction",
    "owner",
    "mailing_address",
    "phone",
    "query_used",
    "permit_no",
    "type_line",
    "roof_date_used",
    "issued",
    "finalized",
    "applied",
    "roof_years",
    "is_20plus",
    "status",
    "seconds",
];

/// Timestamped pair of export paths for one run: the full row log and
/// the qualified-leads subset.
pub fn export_paths(out_dir: &Path) -> (PathBuf, PathBuf) {
    let ts = Local::now().format("%Y%m%d_%H%M%S");
    (
        out_dir.join(format!("leads_all_{}.csv", ts)),
        out_dir.join(format!("leads_good_20plus_{}.csv", ts)),
    )
}

/// Write lead rows to a CSV file, header first. Creates the parent
/// directory if missing; an empty run still produces a header-only file.
pub fn write_leads_csv(path: &Path, rows: &[LeadRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }

    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?;
    writer
        .write_record(LEAD_CSV_HEADER)
        .context("Failed to write CSV header")?;
    for row in rows {
        writer
            .write_record(row.to_csv_record())
            .context("Failed to write CSV row")?;
    }
    writer.flush().context("Failed to flush CSV")?;
    Ok(())
}

/// Load scan candidates from a CSV. Headers are matched by name, so
/// column order does not matter; only `address` is required. Rows with
/// an empty address are skipped with a warning.
pub fn load_parcels_from_csv(path: &Path) -> Result<Vec<ParcelRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open parcel CSV {:?}", path))?;

    let headers = reader.headers().context("Parcel CSV has no header")?.clone();
    let col = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));

    let addr_col = col("address")
        .with_context(|| format!("Parcel CSV {:?} has no 'address' column", path))?;
    let owner_col = col("owner");
    let mailing_col = col("mailing_address");
    let phone_col = col("phone");

    let field = |record: &csv::StringRecord, idx: Option<usize>| {
        idx.and_then(|i| record.get(i)).unwrap_or("").trim().to_string()
    };

    let mut parcels = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Bad CSV record in {:?}", path))?;
        let address = field(&record, Some(addr_col));
        if address.is_empty() {
            eprintln!("Warning: skipping row {} with empty address", line + 2);
            continue;
        }
        parcels.push(ParcelRecord {
            address,
            owner: field(&record, owner_col),
            mailing_address: field(&record, mailing_col),
            phone: field(&record, phone_col),
        });
    }
    Ok(parcels)
}
