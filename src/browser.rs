use anyhow::{Context, Result};
use headless_chrome::{Browser, LaunchOptions};
use std::ffi::OsStr;
use std::sync::Mutex;
use std::time::Duration;

/// Owns the process-wide headless Chrome instance. The browser is
/// expensive to launch, so it is created lazily on first `acquire` and
/// reused for every scan in the process lifetime. Drivers receive this
/// by reference instead of reaching for a global.
pub struct BrowserSession {
    slot: Mutex<Option<Browser>>,
}

impl BrowserSession {
    pub fn new() -> Self {
        BrowserSession {
            slot: Mutex::new(None),
        }
    }

    /// Idempotent: launches Chrome on the first call, hands back a
    /// handle to the same instance afterwards.
    pub fn acquire(&self) -> Result<Browser> {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(browser) = slot.as_ref() {
            return Ok(browser.clone());
        }

        let options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some((1400, 900)))
            .args(vec![OsStr::new("--disable-dev-shm-usage")])
            // Long scans sleep between addresses; keep Chrome alive.
            .idle_browser_timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| anyhow::anyhow!("Bad browser launch options: {}", e))?;

        let browser = Browser::new(options).context("Failed to launch headless Chrome")?;
        *slot = Some(browser.clone());
        Ok(browser)
    }
}

impl Default for BrowserSession {
    fn default() -> Self {
        Self::new()
    }
}
