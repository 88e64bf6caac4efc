// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use compact_str::CompactString;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    //route variants that are the same physical route for reporting purposes,
    //e.g. directional suffixes of one corridor
    static ref ROUTE_ALIASES: HashMap<&'static str, &'static str> = HashMap::from([
        ("2A", "2"),
        ("2B", "2"),
        ("7A", "7"),
        ("7B", "7"),
        ("12A", "12"),
        ("12B", "12"),
    ]);
}

/// Canonical route identifier. Everything downstream of ingestion compares
/// and reports on this type, never on raw feed identifiers.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(CompactString);

impl RouteId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.0.as_str())
    }
}

/// Collapse a raw feed route identifier onto its canonical form.
///
/// Whitespace is trimmed, identifiers are compared case-insensitively, and
/// known variants collapse through the alias table. Returns None for blank
/// input so callers can drop the record instead of reporting on a phantom
/// route.
pub fn normalize_route_id(raw: &str) -> Option<RouteId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let upper = trimmed.to_uppercase();

    let canonical = match ROUTE_ALIASES.get(upper.as_str()) {
        Some(alias) => CompactString::from(*alias),
        None => CompactString::from(upper.as_str()),
    };

    Some(RouteId(canonical))
}

fn leading_number(id: &str) -> Option<u64> {
    let end = id
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(id.len());
    id[..end].parse::<u64>().ok()
}

/// Report ordering: routes with a numeric prefix sort numerically ("2"
/// before "10"), ties and letter-only identifiers fall back to lexical.
pub fn compare_route_ids(a: &RouteId, b: &RouteId) -> Ordering {
    match (leading_number(a.as_str()), leading_number(b.as_str())) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.as_str().cmp(b.as_str())),
        _ => a.as_str().cmp(b.as_str()),
    }
}
