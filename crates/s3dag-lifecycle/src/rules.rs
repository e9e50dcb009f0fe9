//! Bucket lifecycle rules.
//!
//! A [`Lifecycle`] is a list of rules, each scoping an expiration to a key
//! prefix and an optional set of object tags. An object expires under the
//! first enabled rule that matches it, either a whole number of days after
//! its modification time (counted to the following UTC midnight) or on a
//! fixed date.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, LifecycleResult};

const MAX_RULES: usize = 1000;
const MAX_RULE_ID_LEN: usize = 255;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleStatus {
    #[default]
    Enabled,
    Disabled,
}

/// When matching objects expire. Exactly one of the two must be set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    /// Must fall on a UTC midnight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default)]
    pub prefix: String,
    /// Every tag listed here must be present on the object with this value.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub expiration: Expiration,
}

impl Rule {
    fn matches(&self, name: &str, tags: &BTreeMap<String, String>) -> bool {
        self.status == RuleStatus::Enabled
            && name.starts_with(&self.prefix)
            && self.tags.iter().all(|(k, v)| tags.get(k) == Some(v))
    }

    fn expiry_time(&self, mod_time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match (self.expiration.date, self.expiration.days) {
            (Some(date), _) => Some(date),
            (None, Some(days)) => expected_expiry(mod_time, days),
            (None, None) => None,
        }
    }

    fn validate(&self) -> LifecycleResult<()> {
        if self.id.len() > MAX_RULE_ID_LEN {
            return Err(invalid(format!("rule id longer than {MAX_RULE_ID_LEN} bytes")));
        }
        match (self.expiration.days, self.expiration.date) {
            (Some(_), Some(_)) => Err(invalid(format!(
                "rule {:?} sets both expiration days and date",
                self.id
            ))),
            (None, None) => Err(invalid(format!("rule {:?} has no expiration", self.id))),
            (Some(0), None) => Err(invalid(format!(
                "rule {:?} expiration days must be positive",
                self.id
            ))),
            (None, Some(date)) if !is_midnight(date) => Err(invalid(format!(
                "rule {:?} expiration date must be at midnight UTC",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    Delete,
}

/// A bucket's lifecycle configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    #[serde(default, rename = "rule")]
    pub rules: Vec<Rule>,
}

impl Lifecycle {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn validate(&self) -> LifecycleResult<()> {
        if self.rules.is_empty() {
            return Err(invalid("at least one rule is required".into()));
        }
        if self.rules.len() > MAX_RULES {
            return Err(invalid(format!("more than {MAX_RULES} rules")));
        }
        let mut ids = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !rule.id.is_empty() && !ids.insert(rule.id.as_str()) {
                return Err(invalid(format!("duplicate rule id {:?}", rule.id)));
            }
        }
        Ok(())
    }

    /// Expiry of `name` under the first enabled rule that matches it.
    pub fn expiry_time(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
        mod_time: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(name, tags))
            .find_map(|rule| rule.expiry_time(mod_time))
    }

    /// What to do with an object as of `now`.
    pub fn compute_action(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
        mod_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Action {
        if mod_time.timestamp() == 0 {
            return Action::None;
        }
        match self.expiry_time(name, tags, mod_time) {
            Some(expiry) if now > expiry => Action::Delete,
            _ => Action::None,
        }
    }

    /// The prefix shared by every rule: the narrowest walk that still sees
    /// every object any rule could match.
    pub fn common_prefix(&self) -> String {
        longest_common_prefix(self.rules.iter().map(|r| r.prefix.as_str()))
    }
}

/// `days` after `mod_time`, rounded up to the next UTC midnight. `None` when
/// that lies beyond the representable calendar.
fn expected_expiry(mod_time: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    let t = mod_time.checked_add_signed(Duration::try_days(i64::from(days) + 1)?)?;
    Some(t.date_naive().and_time(NaiveTime::MIN).and_utc())
}

fn is_midnight(t: DateTime<Utc>) -> bool {
    t.num_seconds_from_midnight() == 0 && t.nanosecond() == 0
}

fn invalid(msg: String) -> LifecycleError {
    LifecycleError::InvalidLifecycle(msg)
}

/// Longest string that prefixes every input. Empty if there are none.
pub fn longest_common_prefix<'a>(prefixes: impl IntoIterator<Item = &'a str>) -> String {
    let mut iter = prefixes.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let mut common = first;
    for p in iter {
        let shared = common
            .char_indices()
            .zip(p.chars())
            .find(|((_, a), b)| a != b)
            .map_or(common.len().min(p.len()), |((i, _), _)| i);
        common = &common[..shared];
        if common.is_empty() {
            break;
        }
    }
    common.to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn days_rule(prefix: &str, days: u32) -> Rule {
        Rule {
            id: format!("expire-{prefix}"),
            status: RuleStatus::Enabled,
            prefix: prefix.into(),
            tags: BTreeMap::new(),
            expiration: Expiration {
                days: Some(days),
                date: None,
            },
        }
    }

    fn no_tags() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    #[test]
    fn days_round_up_to_midnight() {
        let lc = Lifecycle::new(vec![days_rule("logs/", 1)]);
        let modified = utc(2024, 3, 10, 15);
        assert_eq!(
            lc.expiry_time("logs/a", &no_tags(), modified),
            Some(utc(2024, 3, 12, 0))
        );
        assert_eq!(
            lc.compute_action("logs/a", &no_tags(), modified, utc(2024, 3, 11, 23)),
            Action::None
        );
        assert_eq!(
            lc.compute_action("logs/a", &no_tags(), modified, utc(2024, 3, 12, 1)),
            Action::Delete
        );
    }

    #[test]
    fn prefix_must_match() {
        let lc = Lifecycle::new(vec![days_rule("logs/", 1)]);
        let modified = utc(2020, 1, 1, 0);
        assert_eq!(
            lc.compute_action("data/a", &no_tags(), modified, utc(2024, 1, 1, 0)),
            Action::None
        );
    }

    #[test]
    fn absolute_date() {
        let rule = Rule {
            expiration: Expiration {
                days: None,
                date: Some(utc(2024, 6, 1, 0)),
            },
            ..days_rule("", 1)
        };
        let lc = Lifecycle::new(vec![rule]);
        let modified = utc(2024, 5, 31, 0);
        assert_eq!(
            lc.compute_action("x", &no_tags(), modified, utc(2024, 5, 31, 23)),
            Action::None
        );
        assert_eq!(
            lc.compute_action("x", &no_tags(), modified, utc(2024, 6, 1, 1)),
            Action::Delete
        );
    }

    #[test]
    fn tags_and_status_filter_rules() {
        let mut tagged = days_rule("", 1);
        tagged.tags.insert("tier".into(), "scratch".into());
        let mut disabled = days_rule("", 1);
        disabled.id = "off".into();
        disabled.status = RuleStatus::Disabled;

        let lc = Lifecycle::new(vec![disabled, tagged]);
        let old = utc(2020, 1, 1, 0);
        let now = utc(2024, 1, 1, 0);
        assert_eq!(lc.compute_action("a", &no_tags(), old, now), Action::None);

        let tags = BTreeMap::from([("tier".to_string(), "scratch".to_string())]);
        assert_eq!(lc.compute_action("a", &tags, old, now), Action::Delete);
        let other = BTreeMap::from([("tier".to_string(), "keep".to_string())]);
        assert_eq!(lc.compute_action("a", &other, old, now), Action::None);
    }

    #[test]
    fn unreachable_expiry_never_expires() {
        let lc = Lifecycle::new(vec![days_rule("", u32::MAX)]);
        assert!(lc.validate().is_ok());
        let modified = utc(2024, 1, 1, 0);
        assert_eq!(lc.expiry_time("a", &no_tags(), modified), None);
        assert_eq!(
            lc.compute_action("a", &no_tags(), modified, utc(2999, 1, 1, 0)),
            Action::None
        );
    }

    #[test]
    fn unknown_mod_time_never_expires() {
        let lc = Lifecycle::new(vec![days_rule("", 1)]);
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(
            lc.compute_action("a", &no_tags(), epoch, utc(2024, 1, 1, 0)),
            Action::None
        );
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn validation() {
        assert!(Lifecycle::default().validate().is_err());
        assert!(Lifecycle::new(vec![days_rule("a", 1)]).validate().is_ok());
        assert!(Lifecycle::new(vec![days_rule("a", 0)]).validate().is_err());

        let both = Rule {
            expiration: Expiration {
                days: Some(1),
                date: Some(utc(2024, 1, 1, 0)),
            },
            ..days_rule("a", 1)
        };
        assert!(Lifecycle::new(vec![both]).validate().is_err());

        let not_midnight = Rule {
            expiration: Expiration {
                days: None,
                date: Some(utc(2024, 1, 1, 5)),
            },
            ..days_rule("a", 1)
        };
        assert!(Lifecycle::new(vec![not_midnight]).validate().is_err());

        let dup = Lifecycle::new(vec![days_rule("a", 1), days_rule("a", 2)]);
        assert!(matches!(dup.validate(), Err(LifecycleError::InvalidLifecycle(_))));
    }

    #[test]
    fn parses_from_toml() {
        let lc: Lifecycle = toml::from_str(
            r#"
            [[rule]]
            id = "tmp"
            prefix = "tmp/"
            expiration = { days = 7 }

            [[rule]]
            id = "old"
            status = "Disabled"
            expiration = { date = "2030-01-01T00:00:00Z" }
            "#,
        )
        .unwrap();
        assert_eq!(lc.rules.len(), 2);
        assert_eq!(lc.rules[0].expiration.days, Some(7));
        assert_eq!(lc.rules[1].status, RuleStatus::Disabled);
        lc.validate().unwrap();
    }

    // -----------------------------------------------------------------------
    // Common prefix
    // -----------------------------------------------------------------------

    #[test]
    fn common_prefix() {
        assert_eq!(longest_common_prefix([]), "");
        assert_eq!(longest_common_prefix(["logs/2024"]), "logs/2024");
        assert_eq!(longest_common_prefix(["logs/2024", "logs/2023"]), "logs/202");
        assert_eq!(longest_common_prefix(["logs/", "logs/a"]), "logs/");
        assert_eq!(longest_common_prefix(["a", "b"]), "");
        assert_eq!(longest_common_prefix(["é1", "é2"]), "é");
        assert_eq!(longest_common_prefix(["éa", "èa"]), "");

        let lc = Lifecycle::new(vec![days_rule("tmp/a", 1), days_rule("tmp/b", 1)]);
        assert_eq!(lc.common_prefix(), "tmp/");
    }

    proptest! {
        #[test]
        fn common_prefix_prefixes_every_input(inputs in proptest::collection::vec("[ab]{0,6}", 1..6)) {
            let lcp = longest_common_prefix(inputs.iter().map(String::as_str));
            for s in &inputs {
                prop_assert!(s.starts_with(&lcp));
            }
        }
    }
}
