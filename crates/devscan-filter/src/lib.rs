//! # devscan filter
//!
//! Pure query engine over a registry snapshot.
//!
//! An entry is kept when every rule built from the [`FilterSpec`] passes.
//! Results list favorites first, then sort by name.
//!
//! ## Example
//!
//! ```
//! use devscan_filter::{filter, FilterSpec};
//! use std::collections::HashSet;
//!
//! let result = filter(&[], &FilterSpec::default(), &HashSet::new());
//! assert!(result.is_empty());
//! ```

pub mod capability;
pub mod query;
pub mod rules;

pub use capability::{available_capabilities, capabilities_of, Capability};
pub use query::FilterSpec;
pub use rules::{FilterError, FilterResult, FilterRule};

use devscan_core::types::RegistryEntry;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// Filters and orders `entries`.
///
/// `favorites` holds uuids. A rule that fails for one entry excludes that
/// entry only.
pub fn filter(
    entries: &[RegistryEntry],
    spec: &FilterSpec,
    favorites: &HashSet<String>,
) -> Vec<RegistryEntry> {
    let rules = spec.rules();
    apply(entries, &rules, favorites)
}

/// Filters with an explicit rule set.
pub fn apply(
    entries: &[RegistryEntry],
    rules: &[Box<dyn FilterRule>],
    favorites: &HashSet<String>,
) -> Vec<RegistryEntry> {
    let mut matched: Vec<RegistryEntry> = entries
        .iter()
        .filter(|entry| passes(entry, rules))
        .cloned()
        .collect();

    matched.sort_by(|a, b| compare(a, b, favorites));
    matched
}

fn passes(entry: &RegistryEntry, rules: &[Box<dyn FilterRule>]) -> bool {
    for rule in rules {
        match rule.evaluate(entry) {
            Ok(FilterResult::Pass) => continue,
            Ok(FilterResult::Block) => return false,
            Err(e) => {
                debug!(uuid = %entry.uuid(), rule = %rule.describe(), error = %e, "Rule failed, entry excluded");
                return false;
            }
        }
    }
    true
}

fn compare(a: &RegistryEntry, b: &RegistryEntry, favorites: &HashSet<String>) -> Ordering {
    let a_fav = favorites.contains(a.uuid());
    let b_fav = favorites.contains(b.uuid());

    b_fav
        .cmp(&a_fav)
        .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
        .then_with(|| a.uuid().cmp(b.uuid()))
}
