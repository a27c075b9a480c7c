use crate::debug_println;
use crate::models::{PermitRecord, SearchOutcome};
use chrono::{Duration, Local, NaiveDate};
use regex::Regex;
use scraper::{Html, Selector};

/// Roof-related type keywords, most specific first. Bare "ROOF" is
/// deliberately last: it is the weakest signal but still wanted for
/// recall.
pub const ROOF_TYPE_KEYWORDS: [&str; 10] = [
    "ROOFING - RESIDENTIAL",
    "ROOFING - COMMERCIAL",
    "ROOFING RESIDENTIAL",
    "ROOFING COMMERCIAL",
    "ROOFING",
    "REROOF",
    "RE-ROOF",
    "RE ROOF",
    "ROOF REPLAC",
    "ROOF",
];

/// Rendered-page snapshot handed from a driver to the extractor. `text`
/// is the visible body text; `html` is the full markup, used only by
/// the row-based fallback strategy.
#[derive(Debug, Clone, Default)]
pub struct PageCapture {
    pub text: String,
    pub html: String,
}

impl PageCapture {
    pub fn from_text(text: impl Into<String>) -> Self {
        PageCapture {
            text: text.into(),
            html: String::new(),
        }
    }
}

fn norm(s: &str) -> String {
    s.to_uppercase().replace('\u{2013}', "-").trim().to_string()
}

/// Parse an MM/DD/YYYY or MM/DD/YY token.
pub fn parse_date_token(token: &str) -> Option<NaiveDate> {
    let token = token.trim();
    for fmt in ["%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(d) = NaiveDate::parse_from_str(token, fmt) {
            return Some(d);
        }
    }
    None
}

/// Portals sometimes render placeholder dates far in the future;
/// anything past tomorrow is treated as garbage.
pub fn valid_date(d: Option<NaiveDate>) -> Option<NaiveDate> {
    let cutoff = Local::now().date_naive() + Duration::days(1);
    d.filter(|d| *d <= cutoff)
}

/// Age in years between a roof date and today.
pub fn roof_age_years(d: NaiveDate) -> f64 {
    let days = (Local::now().date_naive() - d).num_days();
    days as f64 / 365.25
}

fn extract_field(block_text: &str, label: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r"(?i)\b{}\b\s*:?\s*(\d{{1,2}}/\d{{1,2}}/\d{{2,4}})",
        label
    ))
    .unwrap();
    re.captures(block_text)
        .map(|c| c.get(1).unwrap().as_str().to_string())
}

fn extract_type_line(block_text: &str) -> String {
    let re = Regex::new(r"(?i)^\s*Type\s*:?\s+").unwrap();
    for line in block_text.lines() {
        if re.is_match(line) {
            return line.trim().to_string();
        }
    }
    String::new()
}

fn parse_block(block: &str) -> PermitRecord {
    let permit_re = Regex::new(r"(?i)Permit Number\s*:?\s*([A-Za-z0-9-]+)").unwrap();
    let permit_no = permit_re
        .captures(block)
        .map(|c| c.get(1).unwrap().as_str().to_string())
        .unwrap_or_default();

    PermitRecord {
        permit_no,
        type_line: extract_type_line(block),
        issued_date: valid_date(extract_field(block, "Issued Date").and_then(|t| parse_date_token(&t))),
        finalized_date: valid_date(
            extract_field(block, "Finalized Date").and_then(|t| parse_date_token(&t)),
        ),
        applied_date: valid_date(
            extract_field(block, "Applied Date").and_then(|t| parse_date_token(&t)),
        ),
        raw: block.to_string(),
    }
}

/// Primary strategy: slice the rendered text at every "Permit Number"
/// marker and parse each block. Returns None when the marker never
/// appears so the next strategy gets a look.
fn extract_text_blocks(page: &PageCapture) -> Option<Vec<PermitRecord>> {
    if page.text.is_empty() {
        return None;
    }
    let txt = page.text.replace("\r\n", "\n");

    let marker = Regex::new(r"(?i)Permit Number\s*:?").unwrap();
    let mut starts: Vec<usize> = marker.find_iter(&txt).map(|m| m.start()).collect();
    if starts.is_empty() {
        return None;
    }
    starts.push(txt.len());

    let records = starts
        .windows(2)
        .map(|w| txt[w[0]..w[1]].trim())
        .filter(|b| !b.is_empty())
        .map(parse_block)
        .collect();
    Some(records)
}

/// Fallback strategy for grid-style portals that never render a
/// "Permit Number" label: walk table/grid rows in the raw HTML and keep
/// rows that carry both a permit-ish number and a date cell.
fn extract_html_rows(page: &PageCapture) -> Option<Vec<PermitRecord>> {
    if page.html.is_empty() {
        return None;
    }
    let document = Html::parse_document(&page.html);
    let row_selector = Selector::parse(r#"[role="row"], tr, .permit-row"#).ok()?;

    let permit_re = Regex::new(r"\b[A-Z]{0,3}\d{4,}-?\d*\b").unwrap();
    let date_re = Regex::new(r"\b\d{1,2}/\d{1,2}/\d{4}\b").unwrap();

    let mut records = Vec::new();
    for row in document.select(&row_selector) {
        let text = row.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            continue;
        }

        let upper = text.to_uppercase();
        let date = date_re
            .find(&text)
            .and_then(|m| parse_date_token(m.as_str()));
        let date = valid_date(date);
        let permit_no = permit_re.find(&upper).map(|m| m.as_str().to_string());

        let (Some(date), Some(permit_no)) = (date, permit_no) else {
            continue;
        };

        records.push(PermitRecord {
            permit_no,
            type_line: String::new(),
            issued_date: Some(date),
            finalized_date: None,
            applied_date: None,
            raw: upper,
        });
    }

    if records.is_empty() {
        None
    } else {
        Some(records)
    }
}

type ExtractStrategy = fn(&PageCapture) -> Option<Vec<PermitRecord>>;

/// Extraction heuristics as data: tried in priority order, first one
/// that recognizes the page wins. Adding a portal quirk means adding an
/// entry here, not a new code path.
const EXTRACT_STRATEGIES: [(&str, ExtractStrategy); 2] = [
    ("permit-number blocks", extract_text_blocks),
    ("result grid rows", extract_html_rows),
];

/// Run the strategy chain over one captured page. An empty result is a
/// valid "no data" state, not an error.
pub fn extract_permits(page: &PageCapture) -> Vec<PermitRecord> {
    for (name, strategy) in EXTRACT_STRATEGIES {
        if let Some(records) = strategy(page) {
            debug_println!("Extraction strategy {:?} produced {} record(s)", name, records.len());
            return records;
        }
    }
    Vec::new()
}

/// Keyword match on the normalized type line or the whole raw block.
pub fn block_is_roof(type_line: &str, raw: &str) -> bool {
    let t = norm(type_line);
    if ROOF_TYPE_KEYWORDS.iter().any(|k| t.contains(k)) {
        return true;
    }
    let b = norm(raw);
    ROOF_TYPE_KEYWORDS.iter().any(|k| b.contains(k))
}

/// Date precedence for ranking: issued beats finalized beats applied.
/// Records with no valid date at all sort last.
pub fn effective_date(record: &PermitRecord) -> Option<NaiveDate> {
    valid_date(record.issued_date)
        .or(valid_date(record.finalized_date))
        .or(valid_date(record.applied_date))
}

fn fmt_date(d: Option<NaiveDate>) -> String {
    d.map(|d| d.format("%m/%d/%Y").to_string())
        .unwrap_or_default()
}

/// Classify a record sequence into the universal connector outcome.
///
/// No roofing record: not detected, no error. Roofing records with at
/// least one valid date: the latest effective date wins and drives the
/// age math. Roofing records that are all undated: reported as detected
/// with unknown age (empty roof_date/roof_years/is_20plus) so the lead
/// is not silently dropped.
pub fn outcome_from_records(records: &[PermitRecord], query: &str) -> SearchOutcome {
    let roof_records: Vec<&PermitRecord> = records
        .iter()
        .filter(|r| block_is_roof(&r.type_line, &r.raw))
        .collect();

    if roof_records.is_empty() {
        return SearchOutcome::not_detected(query, "");
    }

    let best_dated = roof_records
        .iter()
        .filter(|r| effective_date(r).is_some())
        .max_by_key(|r| effective_date(r));

    let Some(best) = best_dated else {
        // Roofing permit exists but carries no usable date.
        let first = roof_records[0];
        return SearchOutcome {
            roof_detected: true,
            query_used: query.to_string(),
            permit_no: first.permit_no.clone(),
            type_line: first.type_line.clone(),
            ..SearchOutcome::default()
        };
    };

    let issued = valid_date(best.issued_date);
    let finalized = valid_date(best.finalized_date);
    let applied = valid_date(best.applied_date);
    let roof_date = issued.or(finalized).or(applied);

    let (roof_years, is_20plus) = match roof_date {
        Some(d) => {
            let yrs = roof_age_years(d);
            (
                format!("{:.1}", yrs),
                if yrs >= 20.0 { "True" } else { "False" }.to_string(),
            )
        }
        None => (String::new(), String::new()),
    };

    SearchOutcome {
        roof_detected: true,
        query_used: query.to_string(),
        permit_no: best.permit_no.clone(),
        type_line: best.type_line.clone(),
        roof_date: fmt_date(roof_date),
        issued: fmt_date(issued),
        finalized: fmt_date(finalized),
        applied: fmt_date(applied),
        roof_years,
        is_20plus,
        error: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn days_ago(n: i64) -> NaiveDate {
        Local::now().date_naive() - Duration::days(n)
    }

    #[test]
    fn single_roofing_block_round_trip() {
        let page = PageCapture::from_text(
            "Permit Number: R24-0001\nType: ROOFING - RESIDENTIAL\nIssued Date: 01/01/2000",
        );
        let records = extract_permits(&page);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].permit_no, "R24-0001");
        assert_eq!(records[0].type_line, "Type: ROOFING - RESIDENTIAL");

        let outcome = outcome_from_records(&records, "123 MAIN ST");
        assert!(outcome.roof_detected);
        assert_eq!(outcome.permit_no, "R24-0001");
        assert_eq!(outcome.roof_date, "01/01/2000");

        let expected = roof_age_years(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
        let got: f64 = outcome.roof_years.parse().unwrap();
        assert!((got - expected).abs() < 0.05);
        assert_eq!(outcome.is_20plus, "True");
    }

    #[test]
    fn twenty_year_boundary_is_inclusive() {
        // 20.0 * 365.25 days ago parses to exactly 20.0 years.
        let boundary = days_ago(7305);
        let page = PageCapture::from_text(format!(
            "Permit Number: B1\nType: ROOFING\nIssued Date: {}",
            boundary.format("%m/%d/%Y")
        ));
        let outcome = outcome_from_records(&extract_permits(&page), "Q");
        assert_eq!(outcome.is_20plus, "True");

        let fresh = days_ago(7304);
        let page = PageCapture::from_text(format!(
            "Permit Number: B2\nType: ROOFING\nIssued Date: {}",
            fresh.format("%m/%d/%Y")
        ));
        let outcome = outcome_from_records(&extract_permits(&page), "Q");
        assert_eq!(outcome.is_20plus, "False");
    }

    #[test]
    fn latest_effective_date_wins_across_blocks() {
        let page = PageCapture::from_text(
            "Permit Number: OLD-1\nType: REROOF\nIssued Date: 03/15/1999\n\
             Permit Number: NEW-2\nType: ROOFING\nIssued Date: 06/20/2010\n\
             Permit Number: MID-3\nType: ROOF REPLACEMENT\nIssued Date: 01/01/2005",
        );
        let outcome = outcome_from_records(&extract_permits(&page), "Q");
        assert_eq!(outcome.permit_no, "NEW-2");
        assert_eq!(outcome.roof_date, "06/20/2010");
    }

    #[test]
    fn issued_beats_finalized_beats_applied() {
        let record = PermitRecord {
            permit_no: "X".into(),
            type_line: "Type: ROOFING".into(),
            issued_date: NaiveDate::from_ymd_opt(2001, 1, 1),
            finalized_date: NaiveDate::from_ymd_opt(2003, 1, 1),
            applied_date: NaiveDate::from_ymd_opt(2000, 1, 1),
            raw: "ROOFING".into(),
        };
        assert_eq!(effective_date(&record), NaiveDate::from_ymd_opt(2001, 1, 1));

        let outcome = outcome_from_records(&[record], "Q");
        assert_eq!(outcome.roof_date, "01/01/2001");
        assert_eq!(outcome.issued, "01/01/2001");
        assert_eq!(outcome.finalized, "01/01/2003");
        assert_eq!(outcome.applied, "01/01/2000");
    }

    #[test]
    fn no_marker_yields_empty_records_not_error() {
        let page = PageCapture::from_text("Your search returned no results.");
        let records = extract_permits(&page);
        assert!(records.is_empty());

        let outcome = outcome_from_records(&records, "Q");
        assert!(!outcome.roof_detected);
        assert!(outcome.error.is_empty());
    }

    #[test]
    fn future_dates_are_discarded() {
        let future = (Local::now().date_naive() + Duration::days(400)).format("%m/%d/%Y");
        let page = PageCapture::from_text(format!(
            "Permit Number: F-1\nType: ROOFING\nIssued Date: {}",
            future
        ));
        let records = extract_permits(&page);
        assert_eq!(records[0].issued_date, None);
    }

    #[test]
    fn undated_roofing_permit_reports_detected_unknown_age() {
        let page = PageCapture::from_text("Permit Number: U-9\nType: ROOFING - COMMERCIAL\n");
        let outcome = outcome_from_records(&extract_permits(&page), "Q");
        assert!(outcome.roof_detected);
        assert_eq!(outcome.permit_no, "U-9");
        assert_eq!(outcome.roof_date, "");
        assert_eq!(outcome.roof_years, "");
        assert_eq!(outcome.is_20plus, "");
    }

    #[test]
    fn undated_records_lose_to_dated_ones() {
        let page = PageCapture::from_text(
            "Permit Number: NODATE\nType: ROOFING\n\
             Permit Number: DATED\nType: REROOF\nIssued Date: 05/05/2005",
        );
        let outcome = outcome_from_records(&extract_permits(&page), "Q");
        assert_eq!(outcome.permit_no, "DATED");
    }

    #[test]
    fn non_roofing_permits_are_ignored() {
        let page = PageCapture::from_text(
            "Permit Number: E-1\nType: ELECTRICAL\nIssued Date: 01/01/2001\n\
             Permit Number: P-2\nType: PLUMBING\nIssued Date: 01/01/2002",
        );
        let outcome = outcome_from_records(&extract_permits(&page), "Q");
        assert!(!outcome.roof_detected);
    }

    #[test]
    fn keyword_match_falls_back_to_raw_block() {
        // No type line, but the block mentions a reroof.
        let page =
            PageCapture::from_text("Permit Number: R-7\nDescription: RE-ROOF SHINGLE\nIssued Date: 02/02/2002");
        let outcome = outcome_from_records(&extract_permits(&page), "Q");
        assert!(outcome.roof_detected);
        assert_eq!(outcome.permit_no, "R-7");
    }

    #[test]
    fn extraction_and_classification_are_idempotent() {
        let page = PageCapture::from_text(
            "Permit Number: R24-0001\nType: ROOFING - RESIDENTIAL\nIssued Date: 01/01/2000",
        );
        let first = outcome_from_records(&extract_permits(&page), "Q");
        let second = outcome_from_records(&extract_permits(&page), "Q");
        assert_eq!(first, second);
    }

    #[test]
    fn two_digit_years_parse() {
        assert_eq!(
            parse_date_token("01/02/99"),
            NaiveDate::from_ymd_opt(1999, 1, 2)
        );
        assert_eq!(
            parse_date_token("03/04/2005"),
            NaiveDate::from_ymd_opt(2005, 3, 4)
        );
        assert_eq!(parse_date_token("not a date"), None);
    }

    #[test]
    fn html_row_strategy_kicks_in_without_marker() {
        let html = r#"<html><body><table>
            <tr><td>RF2004-123</td><td>REROOF</td><td>06/01/2004</td></tr>
            <tr><td>EL2010-999</td><td>ELECTRICAL</td><td>06/01/2010</td></tr>
        </table></body></html>"#;
        let page = PageCapture {
            text: "Search Results".into(),
            html: html.into(),
        };
        let records = extract_permits(&page);
        assert_eq!(records.len(), 2);

        let outcome = outcome_from_records(&records, "Q");
        assert!(outcome.roof_detected);
        assert_eq!(outcome.roof_date, "06/01/2004");
    }
}
