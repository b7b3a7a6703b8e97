use crate::algorithm::Algorithm;
use crate::catalog::Algorithms;
use std::sync::Arc;

/// One `Accept-Encoding` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Preference<'a> {
    pub(crate) coding: &'a str,
    pub(crate) quality: f32,
}

/// Parses an `Accept-Encoding` value into its entries, highest quality first.
///
/// Entries with equal quality keep their order in the header. Malformed
/// entries are dropped.
pub(crate) fn preferences(header: &str) -> Vec<Preference<'_>> {
    let mut preferences: Vec<_> = header.split(',').filter_map(parse_preference).collect();

    // Stable, so ties keep header order
    preferences.sort_by(|a, b| b.quality.total_cmp(&a.quality));
    preferences
}

/// Parses an entry like "gzip" or "br;q=0.8".
fn parse_preference(s: &str) -> Option<Preference<'_>> {
    let mut parts = s.split(';');
    let coding = parts.next()?.trim();
    if coding.is_empty() {
        return None;
    }

    let mut quality = 1.0;
    for param in parts {
        let param = param.trim();
        if let Some(q) = param.strip_prefix("q=").or_else(|| param.strip_prefix("Q=")) {
            quality = q.trim().parse::<f32>().ok()?;
            if !(0.0..=1.0).contains(&quality) {
                return None;
            }
        }
    }

    Some(Preference { coding, quality })
}

/// Picks the algorithm to compress with, given the request's `Accept-Encoding`.
///
/// Returns `None` when the response should be sent with identity encoding:
/// the header is absent or empty, every acceptable coding is unknown or
/// unsupported, or all entries are excluded with `q=0`. A `*` entry selects
/// the first supported algorithm in server preference order.
pub fn negotiate(accept: Option<&str>, algorithms: &Algorithms) -> Option<Arc<dyn Algorithm>> {
    let accept = accept?;

    for preference in preferences(accept) {
        if preference.quality == 0.0 {
            continue;
        }

        if preference.coding == "*" {
            return algorithms.supported().next().cloned();
        }

        if let Some(algorithm) = algorithms
            .find(preference.coding)
            .filter(|a| a.supported())
        {
            return Some(algorithm.clone());
        }
    }

    None
}
