use regex::Regex;

/// Canonicalize a raw address into an upper-cased, comma-free,
/// whitespace-collapsed string. Never fails; garbage in, "" out.
pub fn clean_street_address(addr: &str) -> String {
    let without_commas = addr.replace(',', " ");
    without_commas
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Produce the search key actually typed into a portal: cleaned address
/// with the trailing state tail and unit markers stripped. EnerGov
/// matches on the street portion only, so "123 MAIN ST APT 4, FL 33401"
/// becomes "123 MAIN ST".
pub fn normalize_search_address(raw: &str) -> String {
    let s = clean_street_address(raw);
    if s.is_empty() {
        return s;
    }

    // Drop the state token and everything after it
    let state_re = Regex::new(r"\s*\bFL\b.*$").unwrap();
    let s = state_re.replace(&s, "").trim().to_string();

    // Drop trailing unit markers (APT 4, UNIT B, #12, STE 100, ...)
    let unit_re = Regex::new(r"\s+(?:APT|UNIT|STE|SUITE|LOT|BLDG|#)\s*\S*$").unwrap();
    unit_re.replace(&s, "").trim().to_string()
}

/// Ordered query variants for one address. The bare street form works
/// most often; the suffixed forms catch portals that index full
/// addresses. Empty input yields no variants, which callers treat as
/// unsearchable.
pub fn address_variants(street_only: &str) -> Vec<String> {
    let s = normalize_search_address(street_only);
    if s.is_empty() {
        return Vec::new();
    }
    vec![s.clone(), format!("{}, FL", s), format!("{} Florida", s)]
}
