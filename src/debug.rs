use chrono::Local;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn set_debug(enabled: bool) {
    DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Save a rendered-page snapshot for post-mortem inspection of portal
/// failures. No-op unless debug is enabled; never fails the caller.
pub fn dump_page_snapshot(tag: &str, body_text: &str) -> Option<PathBuf> {
    if !is_debug_enabled() {
        return None;
    }
    let dir = std::env::temp_dir().join("roofscan_debug");
    fs::create_dir_all(&dir).ok()?;
    let safe_tag: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let path = dir.join(format!(
        "{}_{}.txt",
        Local::now().format("%Y%m%d_%H%M%S"),
        safe_tag
    ));
    fs::write(&path, body_text).ok()?;
    Some(path)
}

#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        if $crate::debug::is_debug_enabled() {
            println!("[debug] {}", format!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! debug_eprintln {
    ($($arg:tt)*) => {
        if $crate::debug::is_debug_enabled() {
            eprintln!("[debug] {}", format!($($arg)*));
        }
    };
}
