//! Frequent itemset mining with FP-Growth.
//!
//! Transactions are compressed into a prefix-sharing tree (the FP-tree) and
//! frequent itemsets are grown recursively from conditional trees, so no
//! candidate itemsets are ever enumerated blindly.
//!
//! ## Algorithm
//!
//! 1. Count every item once and drop the ones below the support threshold.
//!    An infrequent item can never be part of a frequent itemset.
//! 2. Sort each transaction's surviving items by descending support, ties by
//!    item identifier, and insert it as a path from the root.
//! 3. For each item, least frequent first, collect the prefix paths leading to
//!    its nodes (its conditional pattern base), build a conditional tree from
//!    them and recurse with the item appended to the suffix.
//! 4. A tree that has collapsed into a single path emits every subset of that
//!    path directly.
//!
//! The top-level items are grown in parallel with rayon. Results land in a
//! map keyed by the sorted itemset, so the output is identical from run to run.
//!
//! ## Example
//!
//! ```
//! use mixtape::fpgrowth::{mine, MiningParams};
//! use mixtape::transactions::Transaction;
//!
//! let transactions: Vec<Transaction> = vec![
//!     ["rock", "pop"].into_iter().collect(),
//!     ["rock", "metal"].into_iter().collect(),
//!     ["pop", "dance"].into_iter().collect(),
//!     ["metal", "rock"].into_iter().collect(),
//! ];
//!
//! let itemsets = mine(&transactions, &MiningParams::new(0.5))?;
//! assert_eq!(itemsets.support_count(&["rock".to_string()]), Some(3));
//! assert_eq!(itemsets.support_count(&["metal".to_string(), "rock".to_string()]), Some(2));
//! # Ok::<(), mixtape::fpgrowth::MiningError>(())
//! ```

use crate::transactions::Transaction;
use log::debug;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::HashMap;
use thiserror::Error;

/// Dense item identifier. Identifiers are assigned by descending global
/// support, so comparing two of them reproduces the global item order.
type ItemId = u32;

const ROOT: usize = 0;

#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Minimum support ratio must be in (0, 1], got {0}")]
    InvalidSupportRatio(f64),

    #[error("Maximum itemset length must be at least 1")]
    InvalidMaxItemsetLen,

    #[error("No frequent itemsets at min support ratio {min_support_ratio} over {transactions} transactions")]
    NoFrequentItemsets {
        min_support_ratio: f64,
        transactions: usize,
    },
}

/// Knobs for a mining run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MiningParams {
    pub min_support_ratio: f64,
    /// Upper bound on emitted itemset size. Bounds the cost of rule generation,
    /// which is exponential in itemset size.
    pub max_itemset_len: Option<usize>,
}

impl MiningParams {
    #[must_use]
    pub fn new(min_support_ratio: f64) -> Self {
        Self {
            min_support_ratio,
            max_itemset_len: None,
        }
    }

    #[must_use]
    pub fn with_max_itemset_len(self, max_itemset_len: usize) -> Self {
        Self {
            max_itemset_len: Some(max_itemset_len),
            ..self
        }
    }

    fn validate(&self) -> Result<(), MiningError> {
        let ratio = self.min_support_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(MiningError::InvalidSupportRatio(ratio));
        }
        if self.max_itemset_len == Some(0) {
            return Err(MiningError::InvalidMaxItemsetLen);
        }
        Ok(())
    }
}

/// A frequent itemset with its absolute support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSet {
    /// Sorted item identifiers.
    pub items: Vec<String>,
    pub support_count: u64,
}

impl ItemSet {
    #[must_use]
    pub fn support_ratio(&self, transaction_count: usize) -> f64 {
        ratio(self.support_count, transaction_count)
    }
}

/// Output of [`mine`]: sorted itemset → support count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequentItemsets {
    counts: HashMap<Vec<String>, u64>,
    transaction_count: usize,
}

impl FrequentItemsets {
    /// Build from explicit counts. Keys are sorted on the way in.
    #[must_use]
    pub fn from_counts(
        counts: impl IntoIterator<Item = (Vec<String>, u64)>,
        transaction_count: usize,
    ) -> Self {
        let counts = counts
            .into_iter()
            .map(|(mut items, count)| {
                items.sort_unstable();
                (items, count)
            })
            .collect();
        Self {
            counts,
            transaction_count,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.transaction_count
    }

    /// Support count of `items`, in any order.
    #[must_use]
    pub fn support_count(&self, items: &[String]) -> Option<u64> {
        if items.windows(2).all(|w| w[0] <= w[1]) {
            return self.counts.get(items).copied();
        }
        let mut sorted = items.to_vec();
        sorted.sort_unstable();
        self.counts.get(&sorted).copied()
    }

    #[must_use]
    pub fn support_ratio(&self, items: &[String]) -> Option<f64> {
        self.support_count(items)
            .map(|count| ratio(count, self.transaction_count))
    }

    /// Unordered view of `(sorted items, support count)`.
    pub fn iter(&self) -> impl Iterator<Item = (&[String], u64)> {
        self.counts
            .iter()
            .map(|(items, &count)| (items.as_slice(), count))
    }

    /// All itemsets ordered by size, then lexicographically.
    #[must_use]
    pub fn sorted(&self) -> Vec<ItemSet> {
        let mut itemsets: Vec<ItemSet> = self
            .counts
            .iter()
            .map(|(items, &support_count)| ItemSet {
                items: items.clone(),
                support_count,
            })
            .collect();
        itemsets.sort_unstable_by(|a, b| {
            a.items
                .len()
                .cmp(&b.items.len())
                .then_with(|| a.items.cmp(&b.items))
        });
        itemsets
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(count: u64, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 / total as f64
}

/// Smallest count `c` with `c / total >= min_support_ratio`, never below 1.
///
/// Computed against the same division used to report support ratios, so a
/// float product like `0.1 * 30 = 3.0000000000000004` cannot push the
/// threshold off by one.
#[must_use]
pub fn min_support_count(min_support_ratio: f64, total: usize) -> u64 {
    if total == 0 {
        return 1;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let mut count = (min_support_ratio * total as f64).floor().max(1.0) as u64;
    while count > 1 && ratio(count - 1, total) >= min_support_ratio {
        count -= 1;
    }
    while ratio(count, total) < min_support_ratio {
        count += 1;
    }
    count
}

/// Mine every itemset whose support ratio is at least
/// `params.min_support_ratio`.
///
/// All frequent subsets are returned, not only maximal ones, which is what
/// [`crate::rules::generate_rules`] relies on for antecedent lookups.
///
/// # Errors
///
/// - [`MiningError::InvalidSupportRatio`] / [`MiningError::InvalidMaxItemsetLen`]
///   for out-of-range parameters
/// - [`MiningError::NoFrequentItemsets`] when nothing meets the threshold
pub fn mine(
    transactions: &[Transaction],
    params: &MiningParams,
) -> Result<FrequentItemsets, MiningError> {
    params.validate()?;

    let total = transactions.len();
    let no_itemsets = || MiningError::NoFrequentItemsets {
        min_support_ratio: params.min_support_ratio,
        transactions: total,
    };
    if total == 0 {
        return Err(no_itemsets());
    }
    let min_count = min_support_count(params.min_support_ratio, total);

    let mut supports: HashMap<&str, u64> = HashMap::new();
    for transaction in transactions {
        for item in transaction.items() {
            *supports.entry(item.as_str()).or_insert(0) += 1;
        }
    }
    let distinct_items = supports.len();

    let mut frequent: Vec<(&str, u64)> = supports
        .into_iter()
        .filter(|&(_, count)| count >= min_count)
        .collect();
    if frequent.is_empty() {
        return Err(no_itemsets());
    }
    frequent.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    debug!(
        "{} of {distinct_items} items reach min count {min_count} over {total} transactions",
        frequent.len()
    );

    let names: Vec<&str> = frequent.iter().map(|&(name, _)| name).collect();
    #[allow(clippy::cast_possible_truncation)]
    let ids: HashMap<&str, ItemId> = names
        .iter()
        .enumerate()
        .map(|(id, &name)| (name, id as ItemId))
        .collect();

    let paths = transactions
        .iter()
        .map(|t| {
            let path = t
                .items()
                .iter()
                .filter_map(|item| ids.get(item.as_str()).copied())
                .collect();
            (path, 1)
        })
        .collect();
    let tree = FpTree::build(paths, min_count);
    debug!("FP-tree built with {} nodes", tree.nodes.len());

    let growth = Growth {
        min_count,
        max_len: params.max_itemset_len.unwrap_or(usize::MAX),
    };
    let found: Vec<(Vec<ItemId>, u64)> = match tree.single_path() {
        Some(path) => {
            let mut out = Vec::new();
            growth.emit_path_subsets(&path, 0, &[], &mut Vec::new(), &mut out);
            out
        }
        None => tree
            .items_by_ascending_support()
            .par_iter()
            .flat_map_iter(|&item| {
                let mut out = Vec::new();
                growth.grow(&tree, item, &[], &mut out);
                out
            })
            .collect(),
    };

    let counts = found.into_iter().map(|(ids, count)| {
        let items = ids
            .iter()
            .map(|&id| names[id as usize].to_string())
            .collect();
        (items, count)
    });
    Ok(FrequentItemsets::from_counts(counts, total))
}

#[derive(Debug)]
struct FpNode {
    item: ItemId,
    count: u64,
    parent: usize,
    children: Vec<usize>,
}

/// Arena-backed FP-tree. Node 0 is the root.
#[derive(Debug)]
struct FpTree {
    nodes: Vec<FpNode>,
    /// Item → every node carrying it.
    header: HashMap<ItemId, Vec<usize>>,
    /// Item → support within this tree, frequent items only.
    supports: HashMap<ItemId, u64>,
}

impl FpTree {
    /// Build a tree from weighted item paths, keeping items whose weighted
    /// support reaches `min_count`.
    fn build(paths: Vec<(Vec<ItemId>, u64)>, min_count: u64) -> Self {
        let mut supports: HashMap<ItemId, u64> = HashMap::new();
        for (path, weight) in &paths {
            for &item in path {
                *supports.entry(item).or_insert(0) += weight;
            }
        }
        supports.retain(|_, count| *count >= min_count);

        let mut tree = Self {
            nodes: vec![FpNode {
                item: ItemId::MAX,
                count: 0,
                parent: ROOT,
                children: Vec::new(),
            }],
            header: HashMap::new(),
            supports: HashMap::new(),
        };

        for (path, weight) in paths {
            let mut ordered: Vec<ItemId> = path
                .into_iter()
                .filter(|item| supports.contains_key(item))
                .collect();
            ordered.sort_unstable_by_key(|item| (Reverse(supports[item]), *item));
            tree.insert(&ordered, weight);
        }

        tree.supports = supports;
        tree
    }

    fn insert(&mut self, path: &[ItemId], weight: u64) {
        let mut cursor = ROOT;
        for &item in path {
            let existing = self.nodes[cursor]
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].item == item);

            cursor = match existing {
                Some(child) => {
                    self.nodes[child].count += weight;
                    child
                }
                None => {
                    let idx = self.nodes.len();
                    self.nodes.push(FpNode {
                        item,
                        count: weight,
                        parent: cursor,
                        children: Vec::new(),
                    });
                    self.nodes[cursor].children.push(idx);
                    self.header.entry(item).or_default().push(idx);
                    idx
                }
            };
        }
    }

    fn is_empty(&self) -> bool {
        self.supports.is_empty()
    }

    fn items_by_ascending_support(&self) -> Vec<ItemId> {
        let mut items: Vec<ItemId> = self.supports.keys().copied().collect();
        items.sort_unstable_by_key(|item| (self.supports[item], Reverse(*item)));
        items
    }

    /// `(item, count)` from the root down if the tree never branches.
    fn single_path(&self) -> Option<Vec<(ItemId, u64)>> {
        let mut path = Vec::new();
        let mut cursor = ROOT;
        loop {
            match self.nodes[cursor].children.as_slice() {
                [] => return Some(path),
                [only] => {
                    cursor = *only;
                    path.push((self.nodes[cursor].item, self.nodes[cursor].count));
                }
                _ => return None,
            }
        }
    }

    /// Prefix paths (root first) of every node carrying `item`, weighted by
    /// that node's count.
    fn conditional_base(&self, item: ItemId) -> Vec<(Vec<ItemId>, u64)> {
        let Some(nodes) = self.header.get(&item) else {
            return Vec::new();
        };
        nodes
            .iter()
            .filter_map(|&node| {
                let mut prefix = Vec::new();
                let mut cursor = self.nodes[node].parent;
                while cursor != ROOT {
                    prefix.push(self.nodes[cursor].item);
                    cursor = self.nodes[cursor].parent;
                }
                if prefix.is_empty() {
                    return None;
                }
                prefix.reverse();
                Some((prefix, self.nodes[node].count))
            })
            .collect()
    }
}

struct Growth {
    min_count: u64,
    max_len: usize,
}

impl Growth {
    fn mine_tree(&self, tree: &FpTree, suffix: &[ItemId], out: &mut Vec<(Vec<ItemId>, u64)>) {
        if let Some(path) = tree.single_path() {
            self.emit_path_subsets(&path, 0, suffix, &mut Vec::new(), out);
            return;
        }
        for item in tree.items_by_ascending_support() {
            self.grow(tree, item, suffix, out);
        }
    }

    /// Emit `suffix ∪ {item}` and everything that extends it.
    fn grow(&self, tree: &FpTree, item: ItemId, suffix: &[ItemId], out: &mut Vec<(Vec<ItemId>, u64)>) {
        let mut itemset = suffix.to_vec();
        itemset.push(item);
        out.push((itemset.clone(), tree.supports[&item]));

        if itemset.len() >= self.max_len {
            return;
        }
        let conditional = FpTree::build(tree.conditional_base(item), self.min_count);
        if !conditional.is_empty() {
            self.mine_tree(&conditional, &itemset, out);
        }
    }

    /// Every non-empty subset of a single path, each joined with `suffix`.
    /// Counts only shrink going down a path, so a subset's support is the
    /// count of its deepest node.
    fn emit_path_subsets(
        &self,
        path: &[(ItemId, u64)],
        start: usize,
        suffix: &[ItemId],
        chosen: &mut Vec<ItemId>,
        out: &mut Vec<(Vec<ItemId>, u64)>,
    ) {
        for (offset, &(item, count)) in path.iter().enumerate().skip(start) {
            chosen.push(item);
            let mut itemset = suffix.to_vec();
            itemset.extend_from_slice(chosen);
            let len = itemset.len();
            out.push((itemset, count));

            if len < self.max_len {
                self.emit_path_subsets(path, offset + 1, suffix, chosen, out);
            }
            chosen.pop();
        }
    }
}
