use crate::arcgis::ArcGisConnector;
use crate::browser::BrowserSession;
use crate::energov::EnerGovScanner;
use crate::models::{Jurisdiction, SearchOutcome, System};
use anyhow::Result;

/// Every permit driver, browser-based or plain HTTP, presents this
/// interface to the orchestrator. `Err` is reserved for unexpected
/// transport faults; expected failure modes (no input, timeout, empty
/// address) come back inside the outcome's `error` field.
pub trait Connector {
    fn name(&self) -> &str;
    fn search_roof(&self, address: &str) -> Result<SearchOutcome>;
}

impl std::fmt::Debug for dyn Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector").field("name", &self.name()).finish()
    }
}

impl Connector for EnerGovScanner {
    fn name(&self) -> &str {
        "EnerGov"
    }

    fn search_roof(&self, address: &str) -> Result<SearchOutcome> {
        Ok(self.search_address(address))
    }
}

impl Connector for ArcGisConnector {
    fn name(&self) -> &str {
        "ArcGIS"
    }

    fn search_roof(&self, address: &str) -> Result<SearchOutcome> {
        self.search_address(address)
    }
}

/// Build the driver matching a jurisdiction's portal system.
/// Misconfiguration (inactive jurisdiction, unusable URL) fails here,
/// before any scan loop starts.
pub fn connector_for(
    jurisdiction: &Jurisdiction,
    session: &BrowserSession,
    fast_mode: bool,
) -> Result<Box<dyn Connector>> {
    if jurisdiction.active != 1 {
        anyhow::bail!("Jurisdiction {:?} is inactive", jurisdiction.name);
    }
    if !jurisdiction.portal_url.trim().starts_with("http") {
        anyhow::bail!(
            "Jurisdiction {:?} has an invalid portal URL: {:?}",
            jurisdiction.name,
            jurisdiction.portal_url
        );
    }

    match jurisdiction.system {
        System::Energov => Ok(Box::new(EnerGovScanner::new(
            session,
            &jurisdiction.portal_url,
            fast_mode,
        )?)),
        System::Arcgis => Ok(Box::new(ArcGisConnector::new(&jurisdiction.portal_url)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::System;
    use std::str::FromStr;

    fn jurisdiction(system: System, url: &str, active: u8) -> Jurisdiction {
        Jurisdiction {
            id: 1,
            state: "FL".into(),
            name: "TESTVILLE".into(),
            system,
            portal_url: url.into(),
            active,
        }
    }

    #[test]
    fn unknown_system_fails_at_parse_time() {
        let err = System::from_str("accela").unwrap_err();
        assert!(err.to_string().contains("Unsupported permit system"));
    }

    #[test]
    fn inactive_jurisdiction_is_rejected() {
        let j = jurisdiction(System::Arcgis, "https://example.gov/arcgis/rest/services/x/MapServer/1", 0);
        let err = connector_for(&j, &BrowserSession::new(), false).unwrap_err();
        assert!(err.to_string().contains("inactive"));
    }

    #[test]
    fn bad_portal_url_is_rejected_before_scanning() {
        let j = jurisdiction(System::Arcgis, "ftp://nope", 1);
        let err = connector_for(&j, &BrowserSession::new(), false).unwrap_err();
        assert!(err.to_string().contains("invalid portal URL"));
    }
}
