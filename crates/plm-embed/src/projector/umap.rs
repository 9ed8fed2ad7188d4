//! Uniform Manifold Approximation and Projection
//!
//! A single-process UMAP: exact nearest neighbours, a fuzzy simplicial set over them and
//! a seeded stochastic layout in two dimensions.
//!
//! ```ignore
//! let umap = Umap::builder().n_neighbors(10).seed(7).build();
//! let coords = umap.fit_transform(&embeddings)?;
//! ```
use super::Projector;
use crate::error::{PipelineError, PipelineResult};
use crate::extractor::EmbeddingMatrix;
use bon::Builder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::BTreeMap;

const SMOOTH_K_TOLERANCE: f32 = 1e-5;
const MIN_K_DIST_SCALE: f32 = 1e-3;
const BINARY_SEARCH_STEPS: usize = 64;
const GRADIENT_CLIP: f32 = 4.0;
const INIT_RANGE: f32 = 10.0;

#[derive(Debug, Clone, Builder)]
pub struct Umap {
    #[builder(default = 15)]
    pub n_neighbors: usize,
    #[builder(default = 0.1)]
    pub min_dist: f32,
    #[builder(default = 200)]
    pub n_epochs: usize,
    #[builder(default = 1.0)]
    pub spread: f32,
    #[builder(default = 1.0)]
    pub learning_rate: f32,
    #[builder(default = 5)]
    pub negative_sample_rate: usize,
    #[builder(default = 42)]
    pub seed: u64,
}

impl Default for Umap {
    fn default() -> Self {
        Umap::builder().build()
    }
}

/// `k` nearest neighbours of one point, closest first, self excluded.
#[derive(Debug, Clone)]
struct Neighbors {
    indices: Vec<usize>,
    distances: Vec<f32>,
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn nearest_neighbors(embeddings: &EmbeddingMatrix, k: usize) -> Vec<Neighbors> {
    (0..embeddings.len())
        .into_par_iter()
        .map(|i| {
            let row = embeddings.row(i);
            let mut candidates: Vec<(f32, usize)> = (0..embeddings.len())
                .filter(|&j| j != i)
                .map(|j| (euclidean(row, embeddings.row(j)), j))
                .collect();
            let closest_first = |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
            if k < candidates.len() {
                candidates.select_nth_unstable_by(k, closest_first);
                candidates.truncate(k);
            }
            candidates.sort_by(closest_first);
            Neighbors {
                indices: candidates.iter().map(|c| c.1).collect(),
                distances: candidates.iter().map(|c| c.0).collect(),
            }
        })
        .collect()
}

/// Per-point `(rho, sigma)`: distance to the nearest distinct neighbour and the bandwidth
/// that makes the neighbourhood's membership strengths sum to `log2(k)`.
fn smooth_knn_dist(knn: &[Neighbors], k: usize) -> Vec<(f32, f32)> {
    let target = (k as f32).log2();
    let mean_all = {
        let all: Vec<f32> = knn.iter().flat_map(|n| n.distances.iter().copied()).collect();
        if all.is_empty() {
            0.0
        } else {
            all.iter().sum::<f32>() / all.len() as f32
        }
    };

    knn.iter()
        .map(|n| {
            let rho = n.distances.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);
            let (mut lo, mut hi, mut mid) = (0.0f32, f32::INFINITY, 1.0f32);
            for _ in 0..BINARY_SEARCH_STEPS {
                let psum: f32 = n
                    .distances
                    .iter()
                    .map(|&d| (-(d - rho).max(0.0) / mid).exp())
                    .sum();
                if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                    break;
                }
                if psum > target {
                    hi = mid;
                    mid = (lo + hi) / 2.0;
                } else {
                    lo = mid;
                    mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
                }
            }
            let mean_local = if n.distances.is_empty() {
                0.0
            } else {
                n.distances.iter().sum::<f32>() / n.distances.len() as f32
            };
            let floor = MIN_K_DIST_SCALE * if rho > 0.0 { mean_local } else { mean_all };
            (rho, mid.max(floor).max(f32::MIN_POSITIVE))
        })
        .collect()
}

/// Symmetrized membership graph `w + wᵀ - w∘wᵀ` as `(head, tail, weight)` edges.
fn fuzzy_simplicial_set(knn: &[Neighbors], k: usize) -> Vec<(usize, usize, f32)> {
    let bandwidths = smooth_knn_dist(knn, k);
    let mut directed: BTreeMap<(usize, usize), f32> = BTreeMap::new();
    for (i, (n, (rho, sigma))) in knn.iter().zip(bandwidths).enumerate() {
        for (&j, &d) in n.indices.iter().zip(&n.distances) {
            let w = (-(d - rho).max(0.0) / sigma).exp();
            directed.insert((i, j), w);
        }
    }
    let mut edges = BTreeMap::new();
    for (&(i, j), &w) in &directed {
        let wt = directed.get(&(j, i)).copied().unwrap_or(0.0);
        let union = w + wt - w * wt;
        edges.insert((i, j), union);
        edges.insert((j, i), union);
    }
    edges
        .into_iter()
        .filter(|(_, w)| *w > 0.0)
        .map(|((i, j), w)| (i, j, w))
        .collect()
}

/// Fit `1 / (1 + a·x^(2b))` to the target curve that is flat up to `min_dist` and
/// decays with scale `spread` after it.
pub fn find_ab_params(spread: f32, min_dist: f32) -> (f32, f32) {
    let (spread, min_dist) = (spread as f64, min_dist as f64);
    let xs: Vec<f64> = (0..300).map(|i| spread * 3.0 * i as f64 / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let sse = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| {
                let r = 1.0 / (1.0 + a * x.powf(2.0 * b)) - y;
                r * r
            })
            .sum()
    };

    // Levenberg-Marquardt on (a, b).
    let (mut a, mut b, mut lambda) = (1.0f64, 1.0f64, 1e-3f64);
    let mut err = sse(a, b);
    for _ in 0..200 {
        let (mut jtj, mut jtr) = ([[0.0f64; 2]; 2], [0.0f64; 2]);
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let u = x.powf(2.0 * b);
            let denom = (1.0 + a * u).powi(2);
            let r = 1.0 / (1.0 + a * u) - y;
            let da = -u / denom;
            let db = -a * u * 2.0 * x.ln() / denom;
            jtj[0][0] += da * da;
            jtj[0][1] += da * db;
            jtj[1][1] += db * db;
            jtr[0] += da * r;
            jtr[1] += db * r;
        }
        jtj[1][0] = jtj[0][1];
        let m00 = jtj[0][0] * (1.0 + lambda);
        let m11 = jtj[1][1] * (1.0 + lambda);
        let det = m00 * m11 - jtj[0][1] * jtj[1][0];
        if det.abs() < 1e-300 {
            break;
        }
        let step_a = -(m11 * jtr[0] - jtj[0][1] * jtr[1]) / det;
        let step_b = -(m00 * jtr[1] - jtj[1][0] * jtr[0]) / det;
        let (na, nb) = (a + step_a, b + step_b);
        let nerr = if na > 0.0 && nb > 0.0 { sse(na, nb) } else { f64::INFINITY };
        if nerr < err {
            let converged = (err - nerr) < 1e-12;
            a = na;
            b = nb;
            err = nerr;
            lambda /= 10.0;
            if converged {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e10 {
                break;
            }
        }
    }
    (a as f32, b as f32)
}

fn clip(v: f32) -> f32 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

impl Umap {
    fn layout(
        &self,
        n: usize,
        edges: &[(usize, usize, f32)],
        rng: &mut StdRng,
    ) -> Vec<[f32; 2]> {
        let (a, b) = find_ab_params(self.spread, self.min_dist);
        let mut embedding: Vec<[f32; 2]> = (0..n)
            .map(|_| {
                [
                    rng.gen_range(-INIT_RANGE..INIT_RANGE),
                    rng.gen_range(-INIT_RANGE..INIT_RANGE),
                ]
            })
            .collect();

        let max_w = edges.iter().map(|e| e.2).fold(0.0f32, f32::max);
        let n_epochs = self.n_epochs as f32;
        // Edges too weak to be sampled once over the whole run are dropped.
        let edges: Vec<(usize, usize, f32)> = edges
            .iter()
            .copied()
            .filter(|e| e.2 >= max_w / n_epochs)
            .collect();
        let epochs_per_sample: Vec<f32> = edges.iter().map(|e| max_w / e.2).collect();
        let neg_rate = self.negative_sample_rate.max(1) as f32;
        let epochs_per_negative: Vec<f32> = epochs_per_sample.iter().map(|e| e / neg_rate).collect();
        let mut next_sample = epochs_per_sample.clone();
        let mut next_negative = epochs_per_negative.clone();

        for epoch in 0..self.n_epochs {
            let e = epoch as f32;
            let alpha = self.learning_rate * (1.0 - e / n_epochs);
            for (idx, &(head, tail, _)) in edges.iter().enumerate() {
                if next_sample[idx] > e {
                    continue;
                }
                let (current, other) = (embedding[head], embedding[tail]);
                let dist_sq = (current[0] - other[0]).powi(2) + (current[1] - other[1]).powi(2);
                let coeff = if dist_sq > 0.0 {
                    -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
                } else {
                    0.0
                };
                for d in 0..2 {
                    let grad = clip(coeff * (current[d] - other[d]));
                    embedding[head][d] += grad * alpha;
                    embedding[tail][d] -= grad * alpha;
                }
                next_sample[idx] += epochs_per_sample[idx];

                let n_neg = ((e - next_negative[idx]) / epochs_per_negative[idx]).max(0.0) as usize;
                for _ in 0..n_neg {
                    let k = rng.gen_range(0..n);
                    if k == head {
                        continue;
                    }
                    let (current, other) = (embedding[head], embedding[k]);
                    let dist_sq =
                        (current[0] - other[0]).powi(2) + (current[1] - other[1]).powi(2);
                    let coeff = if dist_sq > 0.0 {
                        2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                    } else {
                        0.0
                    };
                    for d in 0..2 {
                        let grad = if coeff > 0.0 {
                            clip(coeff * (current[d] - other[d]))
                        } else {
                            GRADIENT_CLIP
                        };
                        embedding[head][d] += grad * alpha;
                    }
                }
                next_negative[idx] += n_neg as f32 * epochs_per_negative[idx];
            }
        }
        embedding
    }
}

impl Projector for Umap {
    fn fit_transform(&self, embeddings: &EmbeddingMatrix) -> PipelineResult<Vec<[f32; 2]>> {
        let n = embeddings.len();
        match n {
            0 => return Ok(vec![]),
            1 => return Ok(vec![[0.0, 0.0]]),
            _ => {}
        }
        if self.n_neighbors < 2 {
            return Err(PipelineError::config("n_neighbors", "must be at least 2"));
        }
        if self.min_dist < 0.0 || self.spread <= 0.0 || self.min_dist > self.spread {
            return Err(PipelineError::config(
                "min_dist",
                format!(
                    "must lie in [0, spread]; got min_dist {} and spread {}",
                    self.min_dist, self.spread
                ),
            ));
        }
        let k = self.n_neighbors.min(n - 1);
        if k < self.n_neighbors {
            tracing::warn!(
                requested = self.n_neighbors,
                used = k,
                "fewer points than neighbours, clamping n_neighbors"
            );
        }
        tracing::info!(points = n, dim = embeddings.dim(), k, epochs = self.n_epochs, "fitting UMAP");

        let knn = nearest_neighbors(embeddings, k);
        let edges = fuzzy_simplicial_set(&knn, k);
        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok(self.layout(n, &edges, &mut rng))
    }
}
