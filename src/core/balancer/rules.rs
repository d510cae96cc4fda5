// src/core/balancer/rules.rs

//! Compiled redirect rules. Regexes are compiled once when the rule list is
//! built (config-load time), never at selection time — a selection must
//! never be able to fail on a bad pattern (SPEC_FULL.md §10.1).

use regex::Regex;

/// One `(pattern, target, weight)` redirect rule with its pattern already
/// compiled.
#[derive(Debug, Clone)]
pub struct RedirectRule {
    pattern: Regex,
    pub target: String,
    pub weight: f64,
}

impl RedirectRule {
    pub fn compile(pattern: &str, target: impl Into<String>, weight: f64) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            target: target.into(),
            weight,
        })
    }

    /// Returns the index of the first rule in `rules` whose pattern matches
    /// `candidate`, plus a reference to it.
    pub fn first_match<'a>(rules: &'a [RedirectRule], candidate: &str) -> Option<(usize, &'a RedirectRule)> {
        rules
            .iter()
            .enumerate()
            .find(|(_, r)| r.pattern.is_match(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_first_rule_in_order() {
        let rules = vec![
            RedirectRule::compile("^analytics_", "standby", 1.0).unwrap(),
            RedirectRule::compile("^analytics_reports$", "2", 1.0).unwrap(),
        ];
        let (idx, rule) = RedirectRule::first_match(&rules, "analytics_reports").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(rule.target, "standby");
    }

    #[test]
    fn no_match_returns_none() {
        let rules = vec![RedirectRule::compile("^billing_", "primary", 1.0).unwrap()];
        assert!(RedirectRule::first_match(&rules, "analytics_reports").is_none());
    }
}
