use crate::models::{Jurisdiction, System};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const ARCGIS_HINTS: [&str; 3] = ["arcgis/rest/services", "/featureserver", "/mapserver"];
const ENERGOV_HINTS: [&str; 5] = [
    "tylerhost.net/apps/selfservice",
    "/energovprod/selfservice",
    "selfservice/#/search",
    "#/search",
    "energov",
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    next_id: u32,
    items: Vec<Jurisdiction>,
}

/// JSON-file registry of configured portals. Loaded fully on every
/// operation; the file stays small enough that this beats carrying a
/// database around.
pub struct JurisdictionStore {
    path: PathBuf,
}

impl JurisdictionStore {
    pub fn new(data_dir: &Path) -> Self {
        JurisdictionStore {
            path: data_dir.join("jurisdictions.db.json"),
        }
    }

    fn load(&self) -> Result<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile {
                next_id: 1,
                items: Vec::new(),
            });
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt jurisdiction store {:?}", self.path))
    }

    fn save(&self, store: &StoreFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
        let content = serde_json::to_string_pretty(store)?;
        fs::write(&self.path, content).with_context(|| format!("Failed to write {:?}", self.path))
    }

    /// Make sure the built-in West Palm Beach portal exists. Safe to
    /// call on every startup.
    pub fn seed_default(&self) -> Result<()> {
        self.add_jurisdiction(
            "FL",
            "WEST PALM BEACH",
            System::Energov,
            "https://wpb-energovweb.tylerhost.net/apps/selfservice#/search?m=2&ps=10&pn=1&em=true",
        )?;
        Ok(())
    }

    /// Active portals for one state, ordered by name then id so the
    /// listing is stable across runs.
    pub fn list_active(&self, state: &str) -> Result<Vec<Jurisdiction>> {
        let store = self.load()?;
        let state = state.trim().to_uppercase();
        let mut items: Vec<Jurisdiction> = store
            .items
            .into_iter()
            .filter(|j| j.active == 1 && j.state.eq_ignore_ascii_case(&state))
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    pub fn get_by_id(&self, id: u32) -> Result<Option<Jurisdiction>> {
        Ok(self.load()?.items.into_iter().find(|j| j.id == id))
    }

    /// Insert or refresh a portal. Identity is (state, system, portal_url);
    /// re-adding an existing portal updates its name and reactivates it
    /// instead of duplicating the entry.
    pub fn add_jurisdiction(
        &self,
        state: &str,
        name: &str,
        system: System,
        portal_url: &str,
    ) -> Result<Jurisdiction> {
        let mut store = self.load()?;
        let state = state.trim().to_uppercase();
        let name = name.trim().to_uppercase();
        let portal_url = portal_url.trim().to_string();

        if let Some(existing) = store.items.iter_mut().find(|j| {
            j.state.eq_ignore_ascii_case(&state)
                && j.system == system
                && j.portal_url == portal_url
        }) {
            existing.name = name;
            existing.active = 1;
            let updated = existing.clone();
            self.save(&store)?;
            return Ok(updated);
        }

        let jurisdiction = Jurisdiction {
            id: store.next_id,
            state,
            name,
            system,
            portal_url,
            active: 1,
        };
        store.next_id += 1;
        store.items.push(jurisdiction.clone());
        self.save(&store)?;
        Ok(jurisdiction)
    }

    pub fn delete_jurisdiction(&self, id: u32) -> Result<bool> {
        let mut store = self.load()?;
        let before = store.items.len();
        store.items.retain(|j| j.id != id);
        let removed = store.items.len() < before;
        if removed {
            self.save(&store)?;
        }
        Ok(removed)
    }
}

/// Classify a portal URL and return it in canonical form. ArcGIS layer
/// URLs lose their query and fragment; EnerGov URLs keep the fragment,
/// which carries the SPA route.
pub fn detect_system_from_url(url: &str) -> Result<(System, String)> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!("Portal URL must start with http:// or https://: {:?}", url);
    }
    if host_of(url).is_empty() {
        anyhow::bail!("Portal URL has no host: {:?}", url);
    }

    let lower = url.to_lowercase();
    if ARCGIS_HINTS.iter().any(|h| lower.contains(h)) {
        let base = url
            .split('?')
            .next()
            .unwrap_or(url)
            .split('#')
            .next()
            .unwrap_or(url)
            .trim_end_matches('/');
        return Ok((System::Arcgis, base.to_string()));
    }
    if ENERGOV_HINTS.iter().any(|h| lower.contains(h)) {
        return Ok((System::Energov, url.to_string()));
    }
    anyhow::bail!("Cannot tell which permit system serves {:?}", url)
}

/// Best-effort display name from the portal host, e.g.
/// "wpb-energovweb.tylerhost.net" becomes "WPB".
pub fn infer_display_name_from_url(url: &str) -> String {
    let host = host_of(url);
    let first = host.split('.').next().unwrap_or("");
    let token = first.split('-').next().unwrap_or("");
    let cleaned: String = token.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    match cleaned.strip_suffix("fl") {
        Some(stripped) if !stripped.is_empty() => stripped.to_uppercase(),
        _ => cleaned.to_uppercase(),
    }
}

fn host_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or("")
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn temp_store() -> (JurisdictionStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "roofscan_jur_{}_{}",
            std::process::id(),
            Local::now().format("%H%M%S%f")
        ));
        (JurisdictionStore::new(&dir), dir)
    }

    #[test]
    fn detects_arcgis_and_strips_query() {
        let (system, canonical) = detect_system_from_url(
            "https://gis.capecoral.gov/arcgis/rest/services/OpenData/MapServer/4?f=json",
        )
        .unwrap();
        assert_eq!(system, System::Arcgis);
        assert_eq!(
            canonical,
            "https://gis.capecoral.gov/arcgis/rest/services/OpenData/MapServer/4"
        );
    }

    #[test]
    fn detects_energov_and_keeps_fragment() {
        let url = "https://wpb-energovweb.tylerhost.net/apps/selfservice#/search?m=2";
        let (system, canonical) = detect_system_from_url(url).unwrap();
        assert_eq!(system, System::Energov);
        assert_eq!(canonical, url);
    }

    #[test]
    fn unknown_portal_is_rejected() {
        assert!(detect_system_from_url("https://example.com/permits").is_err());
        assert!(detect_system_from_url("not-a-url").is_err());
    }

    #[test]
    fn add_is_idempotent_on_identity() {
        let (store, dir) = temp_store();
        let a = store
            .add_jurisdiction("fl", "Testville", System::Energov, "https://x.test/#/search")
            .unwrap();
        let b = store
            .add_jurisdiction("FL", "TESTVILLE NEW", System::Energov, "https://x.test/#/search")
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.name, "TESTVILLE NEW");
        assert_eq!(store.list_active("FL").unwrap().len(), 1);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn seed_then_delete() {
        let (store, dir) = temp_store();
        store.seed_default().unwrap();
        let listed = store.list_active("FL").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "WEST PALM BEACH");
        assert!(store.delete_jurisdiction(listed[0].id).unwrap());
        assert!(store.list_active("FL").unwrap().is_empty());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn infers_display_name_from_host() {
        assert_eq!(
            infer_display_name_from_url("https://wpb-energovweb.tylerhost.net/apps/selfservice"),
            "WPB"
        );
        assert_eq!(
            infer_display_name_from_url("https://capecoralfl.gov/arcgis/rest/services"),
            "CAPECORAL"
        );
    }
}
