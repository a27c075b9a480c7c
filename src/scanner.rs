use crate::connectors::Connector;
use crate::exports;
use crate::models::{LeadRow, ParcelRecord, ScanStatus, SearchOutcome};
use crate::normalize::clean_street_address;
use crate::tui::ScanTui;
use anyhow::Result;
use chrono::Local;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

struct ScanState {
    status: ScanStatus,
    rows: Vec<LeadRow>,
}

/// All mutable run state for the single active scan: counters, the
/// accumulated rows and the cooperative stop flag. One coarse lock; it
/// is only ever held to read or update the summary, never across
/// portal work or pacing sleeps.
pub struct ScanSession {
    state: Mutex<ScanState>,
    stop: AtomicBool,
}

impl ScanSession {
    pub fn new() -> Self {
        ScanSession {
            state: Mutex::new(ScanState {
                status: ScanStatus::default(),
                rows: Vec::new(),
            }),
            stop: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScanState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, total: usize, jurisdiction_name: &str) {
        let mut state = self.lock();
        state.status = ScanStatus {
            running: true,
            total,
            done: 0,
            good: 0,
            started_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            finished_at: String::new(),
            message: format!("Scanning {}…", jurisdiction_name),
        };
        state.rows.clear();
        self.stop.store(false, Ordering::Relaxed);
    }

    /// Row append and counter bump happen under one lock acquisition,
    /// so `done`/`good` can never be observed out of step with the row
    /// list.
    fn append_row(&self, row: LeadRow) {
        let mut state = self.lock();
        state.status.done += 1;
        if row.is_20plus == "True" {
            state.status.good += 1;
        }
        state.status.message = if row.status.starts_with("ERROR") {
            format!("Last ERROR: {} ({}s)", row.address, row.seconds)
        } else {
            format!("Last: {} ({}s)", row.address, row.seconds)
        };
        state.rows.push(row);
    }

    fn set_message(&self, message: &str) {
        self.lock().status.message = message.to_string();
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.set_message("Stopping…");
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ScanStatus {
        self.lock().status.clone()
    }

    pub fn rows(&self) -> Vec<LeadRow> {
        self.lock().rows.clone()
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub delay_seconds: f64,
    pub fast_mode: bool,
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScanOutputs {
    pub all_csv: PathBuf,
    pub good_csv: PathBuf,
}

/// Base per-address delay with a floor that keeps even "no delay"
/// configurations polite; the floor is lower in fast mode.
pub fn base_delay(delay_seconds: f64, fast_mode: bool) -> f64 {
    if fast_mode {
        delay_seconds.max(0.4)
    } else {
        delay_seconds.max(0.6)
    }
}

/// Adaptive penalty keyed on the consecutive-error counter. Targets
/// portal instability specifically: a clean "no roofing permit" result
/// resets the counter and pays no penalty.
pub fn extra_delay(consecutive_errors: u32) -> f64 {
    match consecutive_errors {
        0 | 1 => 0.0,
        2 => 0.6,
        3 => 1.0,
        _ => 1.6,
    }
}

pub fn pause_seconds(base: f64, consecutive_errors: u32, jitter: f64) -> f64 {
    base + extra_delay(consecutive_errors) + jitter
}

fn row_from_outcome(
    address: &str,
    jurisdiction: &str,
    contact: &ParcelRecord,
    outcome: &SearchOutcome,
    elapsed: f64,
) -> (LeadRow, bool) {
    let seconds = format!("{:.1}", elapsed);

    if !outcome.roof_detected {
        let err = outcome.error.trim();
        let status = if err.is_empty() {
            "NO_ROOF_PERMIT_FOUND".to_string()
        } else {
            format!("ERROR: {}", err)
        };
        let row = LeadRow {
            address: address.to_string(),
            jurisdiction: jurisdiction.to_string(),
            owner: contact.owner.clone(),
            mailing_address: contact.mailing_address.clone(),
            phone: contact.phone.clone(),
            query_used: outcome.query_used.clone(),
            status,
            seconds,
            ..LeadRow::default()
        };
        return (row, !err.is_empty());
    }

    let row = LeadRow {
        address: address.to_string(),
        jurisdiction: jurisdiction.to_string(),
        owner: contact.owner.clone(),
        mailing_address: contact.mailing_address.clone(),
        phone: contact.phone.clone(),
        query_used: outcome.query_used.clone(),
        permit_no: outcome.permit_no.clone(),
        type_line: outcome.type_line.clone(),
        roof_date_used: outcome.roof_date.clone(),
        issued: outcome.issued.clone(),
        finalized: outcome.finalized.clone(),
        applied: outcome.applied.clone(),
        roof_years: outcome.roof_years.clone(),
        is_20plus: outcome.is_20plus.clone(),
        status: "OK".to_string(),
        seconds,
    };
    (row, false)
}

/// Writes both exports and flips the session out of the running state.
/// Reached through the drop guard on every exit path, so a failure
/// mid-scan never loses already-collected rows.
fn finalize(session: &ScanSession, out_dir: &Path) -> Result<ScanOutputs> {
    let rows;
    {
        let mut state = session.lock();
        rows = state.rows.clone();
        state.status.running = false;
        state.status.finished_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        state.status.message = if session.stop_requested() {
            "Stopped.".to_string()
        } else {
            "Done.".to_string()
        };
    }

    let good: Vec<LeadRow> = rows
        .iter()
        .filter(|r| r.is_20plus == "True")
        .cloned()
        .collect();

    let (all_csv, good_csv) = exports::export_paths(out_dir);
    exports::write_leads_csv(&all_csv, &rows)?;
    exports::write_leads_csv(&good_csv, &good)?;
    Ok(ScanOutputs { all_csv, good_csv })
}

struct FinalizeGuard<'a> {
    session: &'a ScanSession,
    out_dir: &'a Path,
    armed: bool,
}

impl Drop for FinalizeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = finalize(self.session, self.out_dir);
        }
    }
}

/// Run one scan: sequentially look up every address through the
/// connector, append a lead row per address, and pace the loop.
/// Serial on purpose — the EnerGov driver shares one browser tab and
/// the portals are rate-limit sensitive.
pub fn run_scan(
    session: &ScanSession,
    connector: &dyn Connector,
    jurisdiction_name: &str,
    parcels: &[ParcelRecord],
    options: &ScanOptions,
    mut tui: Option<&mut ScanTui>,
) -> Result<ScanOutputs> {
    if session.status().running {
        anyhow::bail!("A scan is already running");
    }

    let mut addresses: Vec<String> = Vec::new();
    let mut contacts: HashMap<String, ParcelRecord> = HashMap::new();
    for parcel in parcels {
        let addr = clean_street_address(&parcel.address);
        if addr.is_empty() {
            continue;
        }
        contacts.insert(addr.clone(), parcel.clone());
        addresses.push(addr);
    }

    session.begin(addresses.len(), jurisdiction_name);
    if let Some(tui) = tui.as_deref_mut() {
        let _ = tui.start_scan(addresses.len(), jurisdiction_name);
    }

    let mut guard = FinalizeGuard {
        session,
        out_dir: options.out_dir.as_path(),
        armed: true,
    };

    let base = base_delay(options.delay_seconds, options.fast_mode);
    let mut consecutive_errors = 0u32;
    let mut rng = rand::thread_rng();
    let default_contact = ParcelRecord::default();

    for addr in &addresses {
        if session.stop_requested() {
            session.set_message("Stopped.");
            break;
        }

        let started = Instant::now();
        let contact = contacts.get(addr).unwrap_or(&default_contact);

        let (row, errored) = match connector.search_roof(addr) {
            Ok(outcome) => row_from_outcome(
                addr,
                jurisdiction_name,
                contact,
                &outcome,
                started.elapsed().as_secs_f64(),
            ),
            Err(e) => {
                // One bad address never aborts the run.
                let row = LeadRow {
                    address: addr.clone(),
                    jurisdiction: jurisdiction_name.to_string(),
                    owner: contact.owner.clone(),
                    mailing_address: contact.mailing_address.clone(),
                    phone: contact.phone.clone(),
                    status: format!("ERROR: {:#}", e),
                    seconds: format!("{:.1}", started.elapsed().as_secs_f64()),
                    ..LeadRow::default()
                };
                (row, true)
            }
        };

        consecutive_errors = if errored { consecutive_errors + 1 } else { 0 };

        session.append_row(row.clone());
        if let Some(tui) = tui.as_deref_mut() {
            let _ = tui.row_done(&row, session.status().done, session.status().good);
        }

        let jitter = rng.gen_range(0.15..0.55);
        let pause = pause_seconds(base, consecutive_errors, jitter);
        thread::sleep(Duration::from_secs_f64(pause));
    }

    guard.armed = false;
    let outputs = finalize(session, &options.out_dir)?;

    if let Some(tui) = tui.as_deref_mut() {
        let _ = tui.finish(&session.status());
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_delay_tiers() {
        assert_eq!(extra_delay(0), 0.0);
        assert_eq!(extra_delay(1), 0.0);
        assert_eq!(extra_delay(2), 0.6);
        assert_eq!(extra_delay(3), 1.0);
        assert_eq!(extra_delay(4), 1.6);
        assert_eq!(extra_delay(9), 1.6);
    }

    #[test]
    fn base_delay_floors() {
        assert_eq!(base_delay(0.0, false), 0.6);
        assert_eq!(base_delay(0.0, true), 0.4);
        assert_eq!(base_delay(2.5, false), 2.5);
        assert_eq!(base_delay(2.5, true), 2.5);
    }

    #[test]
    fn delay_rises_over_error_streak_and_resets_on_success() {
        // Five connector errors followed by one success; the computed
        // pause (jitter held at zero) must be non-decreasing across the
        // streak, strictly higher than base by tier 2, and snap back to
        // base right after the success.
        let base = 1.0;
        let mut counter = 0u32;
        let mut pauses = Vec::new();
        for errored in [true, true, true, true, true, false] {
            counter = if errored { counter + 1 } else { 0 };
            pauses.push(pause_seconds(base, counter, 0.0));
        }
        assert_eq!(pauses, vec![1.0, 1.6, 2.0, 2.6, 2.6, 1.0]);
        assert!(pauses[4] > pauses[0]);
        assert_eq!(*pauses.last().unwrap(), base);
    }

    #[test]
    fn clean_no_permit_result_does_not_count_as_error() {
        let outcome = SearchOutcome::not_detected("Q", "");
        let (row, errored) =
            row_from_outcome("1 A ST", "TESTVILLE", &ParcelRecord::default(), &outcome, 0.2);
        assert_eq!(row.status, "NO_ROOF_PERMIT_FOUND");
        assert!(!errored);
    }

    #[test]
    fn connector_error_string_becomes_error_status() {
        let outcome = SearchOutcome::not_detected("Q", "No usable search input");
        let (row, errored) =
            row_from_outcome("1 A ST", "TESTVILLE", &ParcelRecord::default(), &outcome, 0.2);
        assert_eq!(row.status, "ERROR: No usable search input");
        assert!(errored);
    }

    #[test]
    fn ok_row_carries_roof_fields() {
        let outcome = SearchOutcome {
            roof_detected: true,
            query_used: "1 A ST".into(),
            permit_no: "R-1".into(),
            type_line: "Type: ROOFING".into(),
            roof_date: "01/01/2000".into(),
            issued: "01/01/2000".into(),
            roof_years: "26.6".into(),
            is_20plus: "True".into(),
            ..SearchOutcome::default()
        };
        let contact = ParcelRecord {
            address: "1 A St".into(),
            owner: "DOE JOHN".into(),
            mailing_address: "PO BOX 1".into(),
            phone: "555-0100".into(),
        };
        let (row, errored) = row_from_outcome("1 A ST", "TESTVILLE", &contact, &outcome, 1.23);
        assert!(!errored);
        assert_eq!(row.status, "OK");
        assert_eq!(row.roof_date_used, "01/01/2000");
        assert_eq!(row.owner, "DOE JOHN");
        assert_eq!(row.seconds, "1.2");
        assert!(!row.roof_date_used.is_empty(), "OK rows must carry a roof date");
    }
}
