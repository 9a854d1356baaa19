//! Duplicate certificate detection
//!
//! Classifies a requested domain set against the existing lineages. The
//! subset direction matters: a lineage is a *subset* match when all of its
//! names were requested, never when the request is smaller than the
//! lineage.

use tracing::{debug, warn};

use certward_common::DomainSet;

use crate::errors::StorageError;
use crate::lineage::{CertificateLineage, LineageStore};

/// Anything that covers a set of names
pub trait NamedCertificate {
    fn names(&self) -> &DomainSet;
}

impl NamedCertificate for CertificateLineage {
    fn names(&self) -> &DomainSet {
        CertificateLineage::names(self)
    }
}

/// Result of classifying a request against existing lineages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Match<T> {
    None,
    /// Lineage names equal the requested names
    Identical(T),
    /// Largest lineage whose names are all contained in the request
    Subset(T),
}

impl<T> Match<T> {
    pub fn is_none(&self) -> bool {
        matches!(self, Match::None)
    }
}

/// Classify `requested` against `candidates`, in enumeration order
///
/// An identical match always wins over any subset match. Among subset
/// matches the one with the most names wins; on a tie the first one seen
/// is kept. When several candidates are identical the last one seen is
/// returned.
pub fn classify<T, I>(requested: &DomainSet, candidates: I) -> Match<T>
where
    T: NamedCertificate,
    I: IntoIterator<Item = T>,
{
    let mut identical: Option<T> = None;
    let mut subset: Option<T> = None;

    for candidate in candidates {
        let names = candidate.names();
        if names == requested {
            identical = Some(candidate);
        } else if names.is_subset(requested) {
            let larger = subset
                .as_ref()
                .is_none_or(|current| names.len() > current.names().len());
            if larger {
                subset = Some(candidate);
            }
        }
    }

    match (identical, subset) {
        (Some(lineage), _) => Match::Identical(lineage),
        (None, Some(lineage)) => Match::Subset(lineage),
        (None, None) => Match::None,
    }
}

/// Classify `requested` against every loadable lineage in `store`
///
/// Broken lineages are logged and skipped.
pub fn find_duplicative(
    store: &LineageStore,
    requested: &DomainSet,
) -> Result<Match<CertificateLineage>, StorageError> {
    let mut lineages = Vec::new();
    for path in store.list()? {
        match store.load(&path) {
            Ok(lineage) => lineages.push(lineage),
            Err(e) => {
                warn!(
                    record = %path.display(),
                    error = %e,
                    "Renewal conf file is broken. Skipping."
                );
            }
        }
    }

    let result = classify(requested, lineages);
    match &result {
        Match::None => debug!(requested = %requested, "No duplicative lineage"),
        Match::Identical(l) => {
            debug!(requested = %requested, lineage = %l.name(), "Identical lineage found")
        }
        Match::Subset(l) => {
            debug!(requested = %requested, lineage = %l.name(), "Subset lineage found")
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{mint_cert, new_store, params};
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Named(&'static str, DomainSet);

    impl NamedCertificate for Named {
        fn names(&self) -> &DomainSet {
            &self.1
        }
    }

    fn named(tag: &'static str, names: &[&str]) -> Named {
        Named(tag, DomainSet::parse(names).unwrap())
    }

    fn request(names: &[&str]) -> DomainSet {
        DomainSet::parse(names).unwrap()
    }

    #[test]
    fn test_no_candidates() {
        let result: Match<Named> = classify(&request(&["a.com"]), Vec::new());
        assert!(result.is_none());
    }

    #[test]
    fn test_identical_ignores_order() {
        let result = classify(
            &request(&["b.com", "a.com"]),
            vec![named("x", &["a.com", "b.com"])],
        );
        assert_eq!(result, Match::Identical(named("x", &["a.com", "b.com"])));
    }

    #[test]
    fn test_identical_beats_subset() {
        let result = classify(
            &request(&["a.com", "b.com"]),
            vec![named("sub", &["a.com"]), named("same", &["a.com", "b.com"])],
        );
        assert!(matches!(result, Match::Identical(Named("same", _))));
    }

    #[test]
    fn test_largest_subset_wins() {
        let result = classify(
            &request(&["a.com", "b.com", "c.com"]),
            vec![named("small", &["a.com"]), named("big", &["a.com", "b.com"])],
        );
        assert!(matches!(result, Match::Subset(Named("big", _))));
    }

    #[test]
    fn test_subset_tie_keeps_first_seen() {
        let result = classify(
            &request(&["a.com", "b.com", "c.com"]),
            vec![named("first", &["a.com"]), named("second", &["b.com"])],
        );
        assert!(matches!(result, Match::Subset(Named("first", _))));
    }

    #[test]
    fn test_superset_lineage_is_not_a_match() {
        // the lineage covers more than was asked for
        let result = classify(&request(&["a.com"]), vec![named("x", &["a.com", "b.com"])]);
        assert!(result.is_none());
    }

    #[test]
    fn test_overlapping_lineage_is_not_a_match() {
        let result = classify(
            &request(&["a.com", "b.com"]),
            vec![named("x", &["b.com", "c.com"])],
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_store_skips_broken_records() {
        let (_dir, store) = new_store();
        let (cert, key) = mint_cert(&["a.com"], "a.com", 2099);
        store
            .new_lineage(&request(&["a.com"]), &cert, &key, &cert, params(), None)
            .unwrap();
        std::fs::write(store.renewal_dir().join("0-broken.conf"), "cert = [").unwrap();

        let result = find_duplicative(&store, &request(&["a.com"])).unwrap();
        assert!(matches!(result, Match::Identical(l) if l.name().as_str() == "a.com"));
    }

    fn domain_pool() -> Vec<&'static str> {
        vec!["a.com", "b.com", "c.com", "d.com", "e.com", "f.com"]
    }

    fn subset_of_pool() -> impl Strategy<Value = Vec<&'static str>> {
        proptest::sample::subsequence(domain_pool(), 1..=6)
    }

    proptest! {
        #[test]
        fn prop_identical_always_wins(
            requested in subset_of_pool(),
            others in proptest::collection::vec(subset_of_pool(), 0..6),
            position in 0usize..6,
        ) {
            let req = DomainSet::parse(&requested).unwrap();
            let mut candidates: Vec<Named> = others
                .iter()
                .map(|names| Named("other", DomainSet::parse(names).unwrap()))
                .filter(|c| c.1 != req)
                .collect();
            let at = position.min(candidates.len());
            candidates.insert(at, Named("target", req.clone()));

            match classify(&req, candidates) {
                Match::Identical(found) => prop_assert_eq!(found.0, "target"),
                other => prop_assert!(false, "expected identical, got {:?}", other),
            }
        }

        #[test]
        fn prop_larger_subset_wins(
            requested in subset_of_pool(),
            small_len in 1usize..6,
            extra in 1usize..6,
            big_first in any::<bool>(),
        ) {
            prop_assume!(requested.len() >= 2);
            // both candidates are proper subsets, the big one strictly larger
            let big_len = (small_len + extra).min(requested.len() - 1);
            let small_len = small_len.min(big_len.saturating_sub(1));
            prop_assume!(small_len >= 1 && big_len > small_len);

            let req = DomainSet::parse(&requested).unwrap();
            let small = Named("small", DomainSet::parse(&requested[..small_len]).unwrap());
            let big = Named("big", DomainSet::parse(&requested[..big_len]).unwrap());
            let candidates = if big_first { vec![big, small] } else { vec![small, big] };

            match classify(&req, candidates) {
                Match::Subset(found) => prop_assert_eq!(found.0, "big"),
                other => prop_assert!(false, "expected subset, got {:?}", other),
            }
        }
    }
}
