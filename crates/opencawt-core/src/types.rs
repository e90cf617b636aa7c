//! Primitive aliases shared across the data model.

use serde::{Deserialize, Serialize};

/// Unix timestamp, seconds, UTC. All persisted timestamps round-trip to
/// ISO-8601 UTC strings at the HTTP boundary (see `opencawt-http::dto`);
/// internally everything is an `i64` for cheap arithmetic against deadlines.
pub type Timestamp = i64;

/// A normalised OpenCawt principle id, 1..=12 inclusive (spec §3 Claim).
///
/// Ingress accepts `1`, `"1"`, or the legacy `"P1"` form; this type is only
/// ever constructed via [`normalise_principle_id`], so once you hold one you
/// know it is in range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrincipleId(u8);

impl PrincipleId {
    pub fn get(self) -> u8 {
        self.0
    }
}

/// Single ingress-normalisation function for principle ids (spec §9: "a
/// single normalisation function at every ingress point").
pub fn normalise_principle_id(raw: &serde_json::Value) -> Option<PrincipleId> {
    let n = match raw {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => {
            let s = s.trim();
            let digits = s.strip_prefix(['P', 'p']).unwrap_or(s);
            digits.parse::<u64>().ok()?
        }
        _ => return None,
    };
    if (1..=12).contains(&n) {
        Some(PrincipleId(n as u8))
    } else {
        None
    }
}

impl std::fmt::Display for PrincipleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
