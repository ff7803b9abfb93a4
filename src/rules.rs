//! Association rule derivation.
//!
//! Every frequent itemset `I` with at least two items is split into each
//! possible `antecedent → I − antecedent`. A rule survives when
//!
//! ```text
//! confidence = support(I) / support(antecedent) >= min_confidence
//! ```
//!
//! Support counts come straight from [`FrequentItemsets`], which holds every
//! frequent subset, so no transaction is rescanned here.

use crate::fpgrowth::{FrequentItemsets, ItemSet};
use log::{debug, warn};
use rayon::prelude::*;
use serde::ser::{Serialize, Serializer};

/// Widest itemset whose candidate antecedents still fit a `u64` mask.
const MAX_RULE_ITEMSET_LEN: usize = 63;

/// A directional association rule.
///
/// Both sides are sorted and disjoint. Serializes as the artifact record
/// `[antecedent, consequent, confidence]`, or
/// `[antecedent, consequent, support, confidence]` when the support ratio of
/// the whole itemset is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    antecedent: Vec<String>,
    consequent: Vec<String>,
    confidence: f64,
    support: Option<f64>,
}

impl Rule {
    /// Callers guarantee non-empty, disjoint sides and a confidence in
    /// `[0, 1]`. Records from disk go through
    /// [`crate::artifact::validate_rule_record`] instead.
    #[must_use]
    pub fn new(mut antecedent: Vec<String>, mut consequent: Vec<String>, confidence: f64) -> Self {
        antecedent.sort_unstable();
        consequent.sort_unstable();
        Self {
            antecedent,
            consequent,
            confidence,
            support: None,
        }
    }

    /// Attach the support ratio of `antecedent ∪ consequent`.
    #[must_use]
    pub fn with_support(self, support: f64) -> Self {
        Self {
            support: Some(support),
            ..self
        }
    }

    #[must_use]
    pub fn antecedent(&self) -> &[String] {
        &self.antecedent
    }

    #[must_use]
    pub fn consequent(&self) -> &[String] {
        &self.consequent
    }

    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    #[must_use]
    pub fn support(&self) -> Option<f64> {
        self.support
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} → {:?} (conf: {:.3})",
            self.antecedent, self.consequent, self.confidence
        )
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.support {
            Some(support) => {
                (&self.antecedent, &self.consequent, support, self.confidence).serialize(serializer)
            }
            None => (&self.antecedent, &self.consequent, self.confidence).serialize(serializer),
        }
    }
}

/// Derive all rules with confidence at least `min_confidence`.
///
/// Itemsets are visited by size, then lexicographically, and antecedents in
/// bitmask order, so the output order is stable for a given input.
#[must_use]
pub fn generate_rules(itemsets: &FrequentItemsets, min_confidence: f64) -> Vec<Rule> {
    let candidates: Vec<ItemSet> = itemsets
        .sorted()
        .into_iter()
        .filter(|itemset| itemset.items.len() >= 2)
        .collect();
    debug!(
        "Deriving rules from {} itemsets of size >= 2 (min confidence {min_confidence})",
        candidates.len()
    );

    candidates
        .par_iter()
        .flat_map_iter(|itemset| rules_for_itemset(itemset, itemsets, min_confidence))
        .collect()
}

fn rules_for_itemset(
    itemset: &ItemSet,
    itemsets: &FrequentItemsets,
    min_confidence: f64,
) -> Vec<Rule> {
    let n = itemset.items.len();
    if n > MAX_RULE_ITEMSET_LEN {
        warn!(
            "Skipping itemset of {n} items: too wide for rule generation (cap itemset length when mining)"
        );
        return Vec::new();
    }

    let total = itemsets.transaction_count();
    let support = (total > 0).then(|| itemset.support_ratio(total));

    let full: u64 = (1u64 << n) - 1;
    let mut rules = Vec::new();
    for mask in 1..full {
        let (antecedent, consequent): (Vec<(usize, &String)>, Vec<(usize, &String)>) = itemset
            .items
            .iter()
            .enumerate()
            .partition(|&(i, _)| mask & (1 << i) != 0);
        let antecedent: Vec<String> = antecedent.into_iter().map(|(_, s)| s.clone()).collect();

        let Some(antecedent_support) = itemsets.support_count(&antecedent) else {
            warn!("No support recorded for antecedent {antecedent:?}, skipping");
            continue;
        };
        if antecedent_support == 0 {
            continue;
        }

        #[allow(clippy::cast_precision_loss)]
        let confidence = itemset.support_count as f64 / antecedent_support as f64;
        if confidence >= min_confidence {
            let consequent = consequent.into_iter().map(|(_, s)| s.clone()).collect();
            let rule = Rule::new(antecedent, consequent, confidence);
            rules.push(match support {
                Some(support) => rule.with_support(support),
                None => rule,
            });
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpgrowth::{mine, MiningParams};
    use crate::transactions::Transaction;
    use std::collections::HashSet;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn scenario() -> FrequentItemsets {
        let transactions: Vec<Transaction> = vec![
            ["rock", "pop"].into_iter().collect(),
            ["rock", "metal"].into_iter().collect(),
            ["pop", "dance"].into_iter().collect(),
            ["metal", "rock"].into_iter().collect(),
        ];
        mine(&transactions, &MiningParams::new(0.5)).unwrap()
    }

    #[test]
    fn test_rock_implies_metal() {
        let rules = generate_rules(&scenario(), 0.5);

        let rock_metal = rules
            .iter()
            .find(|r| r.antecedent() == ["rock"] && r.consequent() == ["metal"])
            .expect("rock → metal must be generated");
        assert!((rock_metal.confidence() - 2.0 / 3.0).abs() < 1e-9);

        let metal_rock = rules
            .iter()
            .find(|r| r.antecedent() == ["metal"] && r.consequent() == ["rock"])
            .expect("metal → rock must be generated");
        assert!((metal_rock.confidence() - 1.0).abs() < f64::EPSILON);
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn test_confidence_threshold_filters() {
        let rules = generate_rules(&scenario(), 0.7);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].antecedent(), ["metal"]);
    }

    #[test]
    fn test_pair_yields_two_candidates() {
        let itemsets = FrequentItemsets::from_counts(
            vec![
                (strings(&["a"]), 4),
                (strings(&["b"]), 2),
                (strings(&["a", "b"]), 1),
            ],
            10,
        );
        let rules = generate_rules(&itemsets, 0.0);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].antecedent(), ["a"]);
        assert!((rules[0].confidence() - 0.25).abs() < f64::EPSILON);
        assert_eq!(rules[1].antecedent(), ["b"]);
        assert!((rules[1].confidence() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_triple_candidates_and_missing_support() {
        let itemsets = FrequentItemsets::from_counts(
            vec![
                (strings(&["a"]), 3),
                (strings(&["b"]), 3),
                (strings(&["c"]), 3),
                (strings(&["a", "b"]), 3),
                (strings(&["a", "c"]), 3),
                (strings(&["b", "c"]), 3),
                (strings(&["a", "b", "c"]), 3),
            ],
            3,
        );
        // 3 pairs × 2 + 6 for the triple
        assert_eq!(generate_rules(&itemsets, 0.0).len(), 12);

        let incomplete = FrequentItemsets::from_counts(
            vec![(strings(&["a"]), 2), (strings(&["a", "b"]), 2)],
            2,
        );
        let rules = generate_rules(&incomplete, 0.0);
        assert_eq!(rules.len(), 1, "b → a has no antecedent support");
        assert_eq!(rules[0].consequent(), ["b"]);
    }

    #[test]
    fn test_rule_emitted_iff_confident() {
        let transactions: Vec<Transaction> = (0..120)
            .map(|i: usize| {
                (0..5)
                    .filter(|j| (i * 7 + j * 3) % (j + 2) != 0)
                    .map(|j| format!("t{}", (i + j * j) % 9))
                    .collect()
            })
            .filter(|t: &Transaction| !t.is_empty())
            .collect();
        let itemsets = mine(&transactions, &MiningParams::new(0.05)).unwrap();
        let min_confidence = 0.4;
        let rules = generate_rules(&itemsets, min_confidence);

        let emitted: HashSet<(Vec<String>, Vec<String>)> = rules
            .iter()
            .map(|r| (r.antecedent().to_vec(), r.consequent().to_vec()))
            .collect();
        assert_eq!(emitted.len(), rules.len(), "no duplicate rules");

        for rule in &rules {
            let mut union = rule.antecedent().to_vec();
            union.extend_from_slice(rule.consequent());
            let expected = itemsets.support_count(&union).unwrap() as f64
                / itemsets.support_count(rule.antecedent()).unwrap() as f64;
            assert!((rule.confidence() - expected).abs() < 1e-12);
            assert!(rule.confidence() >= min_confidence);
        }

        for itemset in itemsets.sorted().into_iter().filter(|s| s.items.len() >= 2) {
            let n = itemset.items.len();
            for mask in 1..(1u32 << n) - 1 {
                let (a, c): (Vec<_>, Vec<_>) = itemset
                    .items
                    .iter()
                    .enumerate()
                    .partition(|&(i, _)| mask & (1 << i) != 0);
                let a: Vec<String> = a.into_iter().map(|(_, s)| s.clone()).collect();
                let c: Vec<String> = c.into_iter().map(|(_, s)| s.clone()).collect();
                let confidence = itemset.support_count as f64
                    / itemsets.support_count(&a).unwrap() as f64;
                assert_eq!(
                    emitted.contains(&(a, c)),
                    confidence >= min_confidence,
                    "itemset {:?}",
                    itemset.items
                );
            }
        }
    }

    #[test]
    fn test_output_order_is_stable() {
        let itemsets = scenario();
        assert_eq!(generate_rules(&itemsets, 0.0), generate_rules(&itemsets, 0.0));
    }

    #[test]
    fn test_rules_carry_itemset_support() {
        let rules = generate_rules(&scenario(), 0.5);
        for rule in &rules {
            assert_eq!(rule.support(), Some(0.5), "{{rock, metal}} is in 2 of 4 playlists");
        }
    }

    #[test]
    fn test_serializes_as_triple() {
        let rule = Rule::new(strings(&["b", "a"]), strings(&["c"]), 0.5);
        assert_eq!(
            serde_json::to_string(&rule).unwrap(),
            r#"[["a","b"],["c"],0.5]"#
        );
        assert_eq!(rule.to_string(), r#"["a", "b"] → ["c"] (conf: 0.500)"#);

        let with_support = rule.with_support(0.25);
        assert_eq!(
            serde_json::to_string(&with_support).unwrap(),
            r#"[["a","b"],["c"],0.25,0.5]"#
        );
    }
}
