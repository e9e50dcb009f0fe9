//! Object listing over a flat key space.
//!
//! Keys are full cache keys (`bucket/object`). Listing keeps those under the
//! bucket whose object name starts with the prefix and sorts after the
//! marker. The prefix is stripped before delimiter folding: a remainder
//! containing the delimiter collapses into a common prefix (prefix plus the
//! remainder up to and including the first delimiter), everything else is
//! listed individually.

use std::collections::BTreeSet;

use crate::metadata::ListObjectsParams;

/// Outcome of a listing, naming objects rather than carrying their metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPlan {
    /// Object names to return, sorted.
    pub objects: Vec<String>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

/// Compute a listing of `bucket` from its full cache keys.
pub fn plan<'a, I>(bucket: &str, keys: I, params: &ListObjectsParams) -> ListPlan
where
    I: IntoIterator<Item = &'a str>,
{
    let bucket_prefix = format!("{bucket}/");
    let prefix = if params.prefix.trim().is_empty() {
        ""
    } else {
        params.prefix.as_str()
    };

    let candidates = keys
        .into_iter()
        .filter_map(|key| key.strip_prefix(bucket_prefix.as_str()))
        .filter(|name| name.starts_with(params.prefix.as_str()) && *name > params.marker.as_str())
        .map(|name| &name[prefix.len()..]);

    let mut listed = BTreeSet::new();
    let mut folded = BTreeSet::new();
    let delimiter = params.delimiter.as_str();
    for rest in candidates {
        if params.is_delimiter_set() {
            if let Some(at) = rest.find(delimiter) {
                folded.insert(format!("{prefix}{}", &rest[..at + delimiter.len()]));
                continue;
            }
        }
        listed.insert(rest);
    }

    let mut result = ListPlan {
        common_prefixes: folded.into_iter().collect(),
        ..Default::default()
    };
    for rest in listed {
        if result.objects.len() == params.max_keys {
            result.is_truncated = true;
            if params.is_delimiter_set() {
                result.next_marker = result.objects.last().cloned();
            }
            break;
        }
        result.objects.push(format!("{prefix}{rest}"));
    }
    result
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn params(prefix: &str, delimiter: &str, max_keys: usize) -> ListObjectsParams {
        ListObjectsParams {
            prefix: prefix.into(),
            marker: String::new(),
            delimiter: delimiter.into(),
            max_keys,
        }
    }

    const KEYS: &[&str] = &["foo5/obj1", "foo5/obj2", "other/obj3"];

    #[test]
    fn prefix_and_delimiter_fold_common_prefix() {
        let plan = plan("foo5", KEYS.iter().copied(), &params("o", "1", 10));
        assert_eq!(plan.common_prefixes, vec!["obj1"]);
        assert_eq!(plan.objects, vec!["obj2"]);
        assert!(!plan.is_truncated);
    }

    #[test]
    fn delimiter_only() {
        let plan = plan("foo5", KEYS.iter().copied(), &params("", "1", 10));
        assert_eq!(plan.common_prefixes, vec!["obj1"]);
        assert_eq!(plan.objects, vec!["obj2"]);
    }

    #[test]
    fn prefix_only_lists_everything_under_bucket() {
        let plan = plan("foo5", KEYS.iter().copied(), &params("o", "", 10));
        assert_eq!(plan.objects, vec!["obj1", "obj2"]);
        assert!(plan.common_prefixes.is_empty());
    }

    #[test]
    fn truncation_without_delimiter_has_no_marker() {
        let keys = ["b/obj1", "b/obj2", "b/obj3"];
        let plan = plan("b", keys.iter().copied(), &params("o", "", 2));
        assert_eq!(plan.objects, vec!["obj1", "obj2"]);
        assert!(plan.is_truncated);
        assert_eq!(plan.next_marker, None);
    }

    #[test]
    fn truncation_with_delimiter_sets_marker() {
        let keys = ["b/a", "b/b", "b/c", "b/dir/x"];
        let plan = plan("b", keys.iter().copied(), &params("", "/", 2));
        assert_eq!(plan.objects, vec!["a", "b"]);
        assert_eq!(plan.next_marker.as_deref(), Some("b"));
        assert_eq!(plan.common_prefixes, vec!["dir/"]);
    }

    #[test]
    fn marker_is_exclusive() {
        let keys = ["b/a", "b/b", "b/c"];
        let mut p = params("", "", 10);
        p.marker = "b".into();
        assert_eq!(plan("b", keys.iter().copied(), &p).objects, vec!["c"]);
    }

    #[test]
    fn exact_fit_is_not_truncated() {
        let keys = ["b/a", "b/b"];
        let plan = plan("b", keys.iter().copied(), &params("", "", 2));
        assert!(!plan.is_truncated);
    }

    #[test]
    fn nested_folding_keeps_first_delimiter() {
        let keys = ["b/logs/2024/01", "b/logs/2024/02", "b/logs/readme"];
        let plan = plan("b", keys.iter().copied(), &params("logs/", "/", 10));
        assert_eq!(plan.common_prefixes, vec!["logs/2024/"]);
        assert_eq!(plan.objects, vec!["logs/readme"]);
    }

    proptest! {
        #[test]
        fn listing_never_exceeds_max_keys(
            names in proptest::collection::btree_set("[a-c]{1,4}", 0..30),
            max_keys in 0usize..10,
        ) {
            let keys: Vec<String> = names.iter().map(|n| format!("b/{n}")).collect();
            let plan = plan("b", keys.iter().map(String::as_str), &params("", "", max_keys));
            prop_assert!(plan.objects.len() <= max_keys);
            prop_assert_eq!(plan.is_truncated, names.len() > max_keys);
            let mut sorted = plan.objects.clone();
            sorted.sort();
            prop_assert_eq!(sorted, plan.objects);
        }
    }
}
