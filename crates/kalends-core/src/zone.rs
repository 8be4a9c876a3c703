//! Time zone resolution for iCalendar date-times.
//!
//! The engine never embeds zone-rule data itself; it consumes a
//! [`ZoneResolver`] and the default implementation delegates to the IANA
//! database shipped with `chrono-tz`.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

use chrono_tz::Tz;

use crate::error::{RecurError, RecurResult};

/// Resolves time zone identifiers to concrete zones.
///
/// Implementations must be usable from multiple evaluation threads, so
/// resolution takes `&self`.
pub trait ZoneResolver: Send + Sync {
    /// Resolves a TZID to a zone.
    ///
    /// ## Errors
    /// Returns [`RecurError::UnknownZone`] if the identifier cannot be
    /// resolved.
    fn resolve(&self, tzid: &str) -> RecurResult<Tz>;

    /// The zone used to interpret floating date-times.
    fn system_default(&self) -> Tz;

    /// Resolves a TZID, falling back to the system default zone when the
    /// identifier is unknown.
    fn resolve_or_default(&self, tzid: &str) -> Tz {
        self.resolve(tzid).unwrap_or_else(|_| self.system_default())
    }
}

/// IANA-database resolver backed by `chrono-tz`.
///
/// Maintains a cache of resolved zones and normalizes the nonstandard TZID
/// spellings common in the wild.
pub struct TzdbResolver {
    /// Cache of resolved zones by TZID.
    cache: RwLock<HashMap<String, Tz>>,
    /// Zone used for floating date-times.
    default_zone: Tz,
}

impl TzdbResolver {
    /// Creates a resolver that interprets floating times as UTC.
    #[must_use]
    pub fn new() -> Self {
        Self::with_default(Tz::UTC)
    }

    /// Creates a resolver with an explicit zone for floating times.
    #[must_use]
    pub fn with_default(default_zone: Tz) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            default_zone,
        }
    }
}

impl Default for TzdbResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneResolver for TzdbResolver {
    fn resolve(&self, tzid: &str) -> RecurResult<Tz> {
        if let Ok(cache) = self.cache.read()
            && let Some(tz) = cache.get(tzid)
        {
            return Ok(*tz);
        }

        let normalized = normalize_tzid(tzid);
        let tz = Tz::from_str(&normalized).map_err(|_e| {
            tracing::debug!(tzid, "TZID did not resolve against the IANA database");
            RecurError::UnknownZone(tzid.to_string())
        })?;

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(tzid.to_string(), tz);
        }

        Ok(tz)
    }

    fn system_default(&self) -> Tz {
        self.default_zone
    }
}

/// Normalizes common nonstandard TZID spellings to IANA names.
///
/// Calendar clients emit globally-unique TZIDs with a leading slash, vendor
/// prefixes, and Windows zone names; all of these need mapping before the
/// IANA lookup.
fn normalize_tzid(tzid: &str) -> String {
    let stripped = tzid
        .strip_prefix("/mozilla.org/")
        .or_else(|| tzid.strip_prefix("/softwarestudio.org/"))
        .or_else(|| tzid.strip_prefix('/'))
        .unwrap_or(tzid);

    match stripped {
        "Eastern Standard Time" => "America/New_York".to_string(),
        "Central Standard Time" => "America/Chicago".to_string(),
        "Mountain Standard Time" => "America/Denver".to_string(),
        "Pacific Standard Time" => "America/Los_Angeles".to_string(),
        // US/Eastern is commonly written as US-Eastern
        other if other.contains('-') && !other.contains('/') => other.replace('-', "/"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_standard_timezone() {
        let resolver = TzdbResolver::new();

        let tz = resolver.resolve("America/New_York").expect("should resolve");
        assert_eq!(tz, Tz::America__New_York);
    }

    #[test]
    fn test_resolve_unknown_timezone() {
        let resolver = TzdbResolver::new();

        let err = resolver.resolve("Not/A_Zone").expect_err("should fail");
        assert!(matches!(err, RecurError::UnknownZone(_)));
    }

    #[test]
    fn test_resolve_or_default_falls_back() {
        let resolver = TzdbResolver::with_default(Tz::Europe__Berlin);

        assert_eq!(resolver.resolve_or_default("Not/A_Zone"), Tz::Europe__Berlin);
    }

    #[test]
    fn test_normalize_windows_timezone() {
        assert_eq!(normalize_tzid("Eastern Standard Time"), "America/New_York");
        assert_eq!(
            normalize_tzid("Pacific Standard Time"),
            "America/Los_Angeles"
        );
    }

    #[test]
    fn test_normalize_prefixes() {
        assert_eq!(
            normalize_tzid("/mozilla.org/America/New_York"),
            "America/New_York"
        );
        assert_eq!(normalize_tzid("/Europe/Paris"), "Europe/Paris");
    }

    #[test]
    fn test_normalize_dashed_zone() {
        assert_eq!(normalize_tzid("US-Eastern"), "US/Eastern");
    }

    #[test]
    fn test_caching() {
        let resolver = TzdbResolver::new();

        resolver.resolve("America/New_York").expect("should resolve");
        assert!(
            resolver
                .cache
                .read()
                .expect("cache lock")
                .contains_key("America/New_York")
        );
    }
}
