//! Brute-force Hamming matching and the nearest/second-nearest ratio test.

use crate::Descriptor;
use serde::{Deserialize, Serialize};

/// Inverse of the ratio-test factor: a match is kept when
/// `best < second * RATIO_TEST_FACTOR`.
pub const RATIO_TEST_FACTOR: f32 = 1.0 / 1.5;

/// A correspondence between a query descriptor and a trained (pattern) one.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Index into the query feature set.
    pub query_idx: usize,
    /// Index into the trained (pattern) feature set.
    pub train_idx: usize,
    /// Hamming distance between the two descriptors.
    pub distance: f32,
}

/// Nearest-neighbour search over a trained descriptor set.
pub trait DescriptorMatcher: Send {
    /// Replace the trained set. Previously trained descriptors are discarded.
    fn train(&mut self, descriptors: &[Descriptor]);

    /// For every query descriptor, up to `k` nearest trained descriptors in
    /// ascending distance.
    fn knn_match(&self, query: &[Descriptor], k: usize) -> Vec<Vec<Match>>;

    /// Number of trained descriptors.
    fn trained_len(&self) -> usize;
}

impl<T: DescriptorMatcher + ?Sized> DescriptorMatcher for Box<T> {
    fn train(&mut self, descriptors: &[Descriptor]) {
        (**self).train(descriptors)
    }

    fn knn_match(&self, query: &[Descriptor], k: usize) -> Vec<Vec<Match>> {
        (**self).knn_match(query, k)
    }

    fn trained_len(&self) -> usize {
        (**self).trained_len()
    }
}

/// Exhaustive Hamming search over every trained descriptor.
///
/// Ties are broken towards the lower train index.
#[derive(Clone, Debug, Default)]
pub struct BruteForceMatcher {
    trained: Vec<Descriptor>,
}

impl BruteForceMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nearest trained descriptor, stopping early on an exact hit.
    fn nearest(&self, query: &Descriptor) -> Option<(usize, u32)> {
        let mut best: Option<(usize, u32)> = None;
        for (idx, cand) in self.trained.iter().enumerate() {
            let d = query.hamming(cand);
            match best {
                None => best = Some((idx, d)),
                Some((_, prev)) => {
                    if d < prev {
                        best = Some((idx, d));
                        if d == 0 {
                            return best;
                        }
                    }
                }
            }
        }
        best
    }
}

impl DescriptorMatcher for BruteForceMatcher {
    fn train(&mut self, descriptors: &[Descriptor]) {
        self.trained.clear();
        self.trained.extend_from_slice(descriptors);
    }

    fn knn_match(&self, query: &[Descriptor], k: usize) -> Vec<Vec<Match>> {
        query
            .iter()
            .enumerate()
            .map(|(query_idx, q)| {
                if k == 0 {
                    return Vec::new();
                }
                if k == 1 {
                    return self
                        .nearest(q)
                        .map(|(train_idx, d)| Match {
                            query_idx,
                            train_idx,
                            distance: d as f32,
                        })
                        .into_iter()
                        .collect();
                }
                // keep the k best in a small sorted buffer
                let mut best: Vec<(u32, usize)> = Vec::with_capacity(k + 1);
                for (train_idx, t) in self.trained.iter().enumerate() {
                    let d = q.hamming(t);
                    if best.len() == k && d >= best[k - 1].0 {
                        continue;
                    }
                    let pos = best.partition_point(|&(bd, _)| bd <= d);
                    best.insert(pos, (d, train_idx));
                    best.truncate(k);
                }
                best.into_iter()
                    .map(|(d, train_idx)| Match {
                        query_idx,
                        train_idx,
                        distance: d as f32,
                    })
                    .collect()
            })
            .collect()
    }

    fn trained_len(&self) -> usize {
        self.trained.len()
    }
}

/// Apply the ratio test to 2-NN candidates.
///
/// Keeps the nearest candidate iff `best < second * RATIO_TEST_FACTOR`. Equal
/// distances are always rejected; queries with fewer than two candidates are
/// dropped.
pub fn ratio_test(candidates: &[Vec<Match>]) -> Vec<Match> {
    candidates
        .iter()
        .filter_map(|knn| match knn.as_slice() {
            [best, second, ..] if best.distance < second.distance * RATIO_TEST_FACTOR => {
                Some(*best)
            }
            _ => None,
        })
        .collect()
}

/// Match `query` against the trained set.
///
/// With `use_ratio_test` the 2-NN ratio test filters the result; otherwise
/// every query gets its single nearest neighbour.
pub fn match_descriptors<M: DescriptorMatcher + ?Sized>(
    matcher: &M,
    query: &[Descriptor],
    use_ratio_test: bool,
) -> Vec<Match> {
    if use_ratio_test {
        ratio_test(&matcher.knn_match(query, 2))
    } else {
        matcher
            .knn_match(query, 1)
            .into_iter()
            .filter_map(|knn| knn.into_iter().next())
            .collect()
    }
}
