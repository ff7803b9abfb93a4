//! Rule matching for recommendation queries.
//!
//! A rule fires when its antecedent shares at least one item with the query
//! (any-match, not subset containment).
//!
//! Query items and rule antecedents are both normalized with [`normalize`]
//! (trimmed, lowercased). Antecedents are normalized once, when the
//! [`Matcher`] is built, into an inverted index from item to rules; the result
//! is the same as normalizing every antecedent for every query.
//!
//! Consequents of all firing rules are unioned, deduplicated and ranked by
//! best confidence, then by how many rules produced them, then by name.

use crate::artifact::ModelArtifact;
use log::trace;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Canonical form used for matching: surrounding whitespace removed,
/// lowercased.
#[must_use]
pub fn normalize(item: &str) -> String {
    item.trim().to_lowercase()
}

/// One recommended track.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTrack {
    /// Track identifier exactly as stored in the rules.
    pub track: String,
    /// Highest confidence among the rules recommending it.
    pub confidence: f64,
    /// Number of firing rules recommending it.
    pub rule_count: usize,
}

/// Outcome of a query against a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub enum Recommendation {
    Tracks {
        tracks: Vec<ScoredTrack>,
        matched_rules: usize,
    },
    /// No rule fired. Distinct from having no model at all.
    NoRecommendation,
}

impl Recommendation {
    #[must_use]
    pub fn tracks(&self) -> &[ScoredTrack] {
        match self {
            Self::Tracks { tracks, .. } => tracks,
            Self::NoRecommendation => &[],
        }
    }

    #[must_use]
    pub fn track_ids(&self) -> Vec<&str> {
        self.tracks().iter().map(|t| t.track.as_str()).collect()
    }

    #[must_use]
    pub fn matched_rules(&self) -> usize {
        match self {
            Self::Tracks { matched_rules, .. } => *matched_rules,
            Self::NoRecommendation => 0,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::NoRecommendation)
    }
}

/// An artifact paired with its normalized antecedent index.
#[derive(Debug)]
pub struct Matcher {
    artifact: ModelArtifact,
    by_antecedent_item: HashMap<String, Vec<usize>>,
}

impl Matcher {
    #[must_use]
    pub fn new(artifact: ModelArtifact) -> Self {
        let mut by_antecedent_item: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, rule) in artifact.rules().iter().enumerate() {
            let normalized: HashSet<String> = rule
                .antecedent()
                .iter()
                .map(|item| normalize(item))
                .filter(|item| !item.is_empty())
                .collect();
            for item in normalized {
                by_antecedent_item.entry(item).or_default().push(idx);
            }
        }
        Self {
            artifact,
            by_antecedent_item,
        }
    }

    #[must_use]
    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Recommend tracks for `query`. `limit` caps the number of tracks
    /// returned; `None` or `Some(0)` returns all of them.
    #[must_use]
    pub fn recommend<S: AsRef<str>>(&self, query: &[S], limit: Option<usize>) -> Recommendation {
        let query: HashSet<String> = query
            .iter()
            .map(|item| normalize(item.as_ref()))
            .filter(|item| !item.is_empty())
            .collect();

        let firing: BTreeSet<usize> = query
            .iter()
            .filter_map(|item| self.by_antecedent_item.get(item))
            .flatten()
            .copied()
            .collect();
        trace!("{} rules fired for {} query items", firing.len(), query.len());

        let rules = self.artifact.rules();
        let mut scored: HashMap<&str, ScoredTrack> = HashMap::new();
        for &idx in &firing {
            let rule = &rules[idx];
            for track in rule.consequent() {
                scored
                    .entry(track.as_str())
                    .and_modify(|s| {
                        s.confidence = s.confidence.max(rule.confidence());
                        s.rule_count += 1;
                    })
                    .or_insert_with(|| ScoredTrack {
                        track: track.clone(),
                        confidence: rule.confidence(),
                        rule_count: 1,
                    });
            }
        }

        if scored.is_empty() {
            return Recommendation::NoRecommendation;
        }

        let mut tracks: Vec<ScoredTrack> = scored.into_values().collect();
        tracks.sort_by(rank);
        if let Some(limit) = limit.filter(|&l| l > 0) {
            tracks.truncate(limit);
        }

        Recommendation::Tracks {
            tracks,
            matched_rules: firing.len(),
        }
    }
}

fn rank(a: &ScoredTrack, b: &ScoredTrack) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.rule_count.cmp(&a.rule_count))
        .then_with(|| a.track.cmp(&b.track))
}
