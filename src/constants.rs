//! The constants provider: supplies the prologue's `"constants"` value
//! when the caller does not hand one in directly.

use chrono::Utc;
use serde_json::Value as Json;

/// Supplies the JSON value written as the log's `"constants"` prologue.
///
/// Implementations are expected to always succeed; a constants-encoding
/// failure is treated as a programmer error, not a runtime one.
pub trait ConstantsProvider: Send {
    fn constants(&self) -> Json;
}

/// Default provider: host/pid/platform metadata plus a start timestamp.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConstantsProvider;

impl ConstantsProvider for DefaultConstantsProvider {
    fn constants(&self) -> Json {
        serde_json::json!({
            "os": std::env::consts::OS,
            "hostname": whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string()),
            "pid": std::process::id(),
            "startedAt": Utc::now().to_rfc3339(),
        })
    }
}

/// A provider that always returns a fixed value, for callers who already
/// have their constants computed (and for tests).
pub struct FixedConstants(pub Json);

impl ConstantsProvider for FixedConstants {
    fn constants(&self) -> Json {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_provider_produces_object_with_expected_keys() {
        let c = DefaultConstantsProvider.constants();
        assert!(c.get("os").is_some());
        assert!(c.get("hostname").is_some());
        assert!(c.get("pid").is_some());
        assert!(c.get("startedAt").is_some());
    }

    #[test]
    fn fixed_constants_roundtrips_value() {
        let v = serde_json::json!({"a": 1});
        let c = FixedConstants(v.clone());
        assert_eq!(c.constants(), v);
    }
}
