//! Display-currency resolution.
//!
//! All stored amounts are USD cents. The single resolver below decides the
//! currency a user sees prices in; conversion is a presentation concern and
//! happens at the API edge, never in the ledger.

/// Resolve the display currency for a user from their billing country.
/// Unknown or missing countries fall back to USD.
pub fn resolve_currency(country: Option<&str>) -> &'static str {
    match country.map(|c| c.to_ascii_uppercase()) {
        Some(c) => match c.as_str() {
            "AT" | "BE" | "DE" | "ES" | "FI" | "FR" | "IE" | "IT" | "NL" | "PT" => "eur",
            "GB" => "gbp",
            "IN" => "inr",
            "AU" => "aud",
            "CA" => "cad",
            _ => "usd",
        },
        None => "usd",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_countries_map_to_their_currency() {
        assert_eq!(resolve_currency(Some("DE")), "eur");
        assert_eq!(resolve_currency(Some("gb")), "gbp");
        assert_eq!(resolve_currency(Some("IN")), "inr");
    }

    #[test]
    fn unknown_or_missing_country_falls_back_to_usd() {
        assert_eq!(resolve_currency(Some("BR")), "usd");
        assert_eq!(resolve_currency(None), "usd");
    }
}
