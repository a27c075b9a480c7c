use crate::browser::BrowserSession;
use crate::debug_println;
use crate::models::SearchOutcome;
use crate::normalize::address_variants;
use crate::permits::{self, PageCapture};
use anyhow::{Context, Result};
use headless_chrome::{Element, Tab};
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const RESULTS_MARKER: &str = "Permit Number";
const POLL_INTERVAL: Duration = Duration::from_millis(400);
const STABLE_POLLS: u32 = 3;

/// Drives one browser tab through the search-and-extract cycle against
/// an EnerGov self-service portal. The tab is opened once and reused
/// for every address in a scan; session setup is amortized, not paid
/// per address.
pub struct EnerGovScanner {
    tab: Arc<Tab>,
    portal_url: String,
    fast_mode: bool,
}

/// Explicit outcome of the results wait. The "stable" exit covers
/// legitimate zero-result queries, which never show the marker; waiting
/// on the marker alone would hang forever on those.
enum WaitOutcome {
    Results(String),
    Stable(String),
    TimedOut,
}

impl EnerGovScanner {
    /// Opens a tab and loads the portal. Fails fast on an unusable URL
    /// rather than address-by-address inside the scan loop.
    pub fn new(session: &BrowserSession, portal_url: &str, fast_mode: bool) -> Result<Self> {
        let portal_url = portal_url.trim().to_string();
        if !portal_url.starts_with("http") {
            anyhow::bail!("Invalid EnerGov portal URL: {}", portal_url);
        }

        let browser = session.acquire()?;
        let tab = browser.new_tab().context("Failed to open a browser tab")?;
        tab.navigate_to(&portal_url)
            .context("Failed to load EnerGov portal")?;
        let _ = tab.wait_until_navigated();
        // EnerGov SPAs keep rendering after navigation settles.
        thread::sleep(Duration::from_millis(600));

        Ok(EnerGovScanner {
            tab,
            portal_url,
            fast_mode,
        })
    }

    fn input_wait_limit(&self) -> Duration {
        Duration::from_secs(if self.fast_mode { 8 } else { 20 })
    }

    fn results_wait_limit(&self) -> Duration {
        Duration::from_secs(if self.fast_mode { 25 } else { 55 })
    }

    /// The portal renders its inputs asynchronously; poll until at
    /// least one visible, enabled `<input>` exists instead of racing
    /// the DOM.
    fn find_input(&self) -> Option<Element<'_>> {
        let deadline = Instant::now() + self.input_wait_limit();
        loop {
            if let Ok(inputs) = self.tab.find_elements("input") {
                for el in inputs.into_iter().take(30) {
                    if element_is_usable(&el) {
                        return Some(el);
                    }
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn clear_input(input: &Element<'_>) {
        let _ = input.call_js_fn(
            "function() { this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }",
            vec![],
            false,
        );
    }

    fn submit_query(&self, input: &Element<'_>) -> Result<()> {
        // Prefer the Search button when the portal renders one.
        if let Ok(btn) = self.tab.find_element("#button-Search") {
            if btn.click().is_ok() {
                return Ok(());
            }
        }
        input.focus()?;
        self.tab.press_key("Enter")?;
        Ok(())
    }

    fn body_text(&self) -> String {
        self.tab
            .find_element("body")
            .and_then(|body| body.get_inner_text())
            .unwrap_or_default()
    }

    /// Poll the rendered body until the results marker appears, or the
    /// text stops changing for several consecutive polls, or the
    /// overall ceiling is hit.
    fn wait_results_or_stable(&self) -> WaitOutcome {
        let started = Instant::now();
        let limit = self.results_wait_limit();
        let mut last = String::new();
        let mut stable = 0u32;

        while started.elapsed() < limit {
            let text = self.body_text();

            if text.contains(RESULTS_MARKER) {
                return WaitOutcome::Results(text);
            }

            if text == last && text.len() > 50 {
                stable += 1;
            } else {
                stable = 0;
                last = text;
            }

            if stable >= STABLE_POLLS {
                return WaitOutcome::Stable(last);
            }

            thread::sleep(POLL_INTERVAL);
        }

        WaitOutcome::TimedOut
    }

    /// Reload the portal from its base URL so the next query starts
    /// from a clean state. Best effort.
    fn refresh_portal(&self) {
        debug_println!("Reloading portal: {}", self.portal_url);
        if self.tab.navigate_to(&self.portal_url).is_ok() {
            let _ = self.tab.wait_until_navigated();
        }
        thread::sleep(Duration::from_millis(800));
    }

    /// One locate-input / type / submit / wait / extract cycle. All
    /// portal-interaction failures come back as outcomes with a typed
    /// error string; `Err` is reserved for transport-level faults.
    fn search_once(&self, query: &str) -> Result<SearchOutcome> {
        let Some(input) = self.find_input() else {
            return Ok(SearchOutcome::not_detected(query, "No usable search input"));
        };

        let _ = input.click();
        Self::clear_input(&input);
        input
            .type_into(query)
            .context("Failed to type search query")?;
        self.submit_query(&input)?;

        match self.wait_results_or_stable() {
            WaitOutcome::TimedOut => {
                if let Some(path) = crate::debug::dump_page_snapshot(query, &self.body_text()) {
                    crate::debug_eprintln!("Timeout on {:?}; page saved to {:?}", query, path);
                }
                Ok(SearchOutcome::not_detected(
                    query,
                    "Timed out waiting for results to stabilize",
                ))
            }
            WaitOutcome::Results(text) | WaitOutcome::Stable(text) => {
                let html = self.tab.get_content().unwrap_or_default();
                let records = permits::extract_permits(&PageCapture { text, html });
                Ok(permits::outcome_from_records(&records, query))
            }
        }
    }

    /// Try each query variant for one address, returning on the first
    /// roof detection. Timeouts and transport faults trigger a portal
    /// reload before the next attempt.
    pub fn search_address(&self, street_only: &str) -> SearchOutcome {
        let variants = address_variants(street_only);
        if variants.is_empty() {
            return SearchOutcome::not_detected("", "Empty address");
        }

        let mut last_err = String::new();
        let mut rng = rand::thread_rng();

        for query in &variants {
            match self.search_once(query) {
                Ok(mut outcome) => {
                    if outcome.roof_detected {
                        outcome.query_used = query.clone();
                        return outcome;
                    }
                    last_err = outcome.error;
                    if last_err.starts_with("Timed out") {
                        self.refresh_portal();
                    }
                }
                Err(e) => {
                    last_err = format!("{:#}", e);
                    self.refresh_portal();
                }
            }

            // Small jitter between variant attempts.
            let pause = 150 + rng.gen_range(0..250);
            thread::sleep(Duration::from_millis(pause));
        }

        SearchOutcome::not_detected(&variants[0], &last_err)
    }
}

/// Visible and enabled, judged in-page: EnerGov keeps a pile of hidden
/// template inputs around that must be skipped.
fn element_is_usable(el: &Element<'_>) -> bool {
    el.call_js_fn(
        "function() { return !this.disabled && this.offsetParent !== null; }",
        vec![],
        false,
    )
    .ok()
    .and_then(|obj| obj.value)
    .and_then(|v| v.as_bool())
    .unwrap_or(false)
}
