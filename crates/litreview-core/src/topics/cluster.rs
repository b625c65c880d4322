//! Dimensionality reduction and density-based clustering.
//!
//! - [`project`] reduces embeddings with a seeded random sign projection.
//! - [`hdbscan`] clusters points by mutual-reachability density: build the
//!   minimum spanning tree, condense the single-linkage hierarchy with a
//!   minimum cluster size, and keep the most stable clusters. Points not
//!   captured by a kept cluster get [`NOISE`].
//!
//! Both are deterministic for a given input and seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::embedding::normalize;

/// Label of points that belong to no cluster.
pub const NOISE: i64 = -1;

/// Project unit vectors to `n_components` dimensions and re-normalize.
///
/// Vectors already at or below `n_components` dimensions are returned
/// normalized but otherwise unchanged.
pub fn project(vectors: &[Vec<f32>], n_components: usize, seed: u64) -> Vec<Vec<f32>> {
    let dims = vectors.first().map_or(0, Vec::len);
    if n_components == 0 || dims <= n_components {
        return vectors
            .iter()
            .map(|v| {
                let mut v = v.clone();
                normalize(&mut v);
                v
            })
            .collect();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let matrix: Vec<Vec<f32>> = (0..n_components)
        .map(|_| {
            (0..dims)
                .map(|_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 })
                .collect()
        })
        .collect();

    vectors
        .iter()
        .map(|v| {
            let mut out: Vec<f32> = matrix
                .iter()
                .map(|row| row.iter().zip(v).map(|(r, x)| r * x).sum())
                .collect();
            normalize(&mut out);
            out
        })
        .collect()
}

fn distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (x - y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

struct Merge {
    left: usize,
    right: usize,
    dist: f64,
    size: usize,
}

struct CondensedCluster {
    parent: Option<usize>,
    birth: f64,
    stability: f64,
    children: Vec<usize>,
}

/// Cluster points; returns one label per point, clusters numbered by size.
pub fn hdbscan(points: &[Vec<f32>], min_cluster_size: usize, min_samples: usize) -> Vec<i64> {
    let n = points.len();
    let min_cluster_size = min_cluster_size.max(2);
    if n < min_cluster_size {
        return vec![NOISE; n];
    }

    let k = min_samples.clamp(1, n - 1);
    let core = core_distances(points, k);
    let mst = minimum_spanning_tree(points, &core);
    let merges = single_linkage(n, mst);
    let labels = condense_and_select(n, &merges, min_cluster_size);
    renumber_by_size(labels)
}

/// Distance from each point to its `k`-th nearest other point.
///
/// Keeps the `k` smallest distances of one row at a time, so no pairwise
/// matrix is held in memory.
fn core_distances(points: &[Vec<f32>], k: usize) -> Vec<f64> {
    let mut nearest: Vec<f64> = Vec::with_capacity(k + 1);
    (0..points.len())
        .map(|i| {
            nearest.clear();
            for (j, other) in points.iter().enumerate() {
                if j == i {
                    continue;
                }
                let d = distance(&points[i], other);
                if nearest.len() == k && d >= nearest[k - 1] {
                    continue;
                }
                let at = nearest.partition_point(|x| *x <= d);
                nearest.insert(at, d);
                nearest.truncate(k);
            }
            nearest.last().copied().unwrap_or(0.0)
        })
        .collect()
}

/// Prim's algorithm over mutual-reachability distances, computed on demand.
fn minimum_spanning_tree(points: &[Vec<f32>], core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = points.len();
    let mutual = |i: usize, j: usize| distance(&points[i], &points[j]).max(core[i]).max(core[j]);

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    in_tree[0] = true;
    for j in 1..n {
        best[j] = mutual(0, j);
    }
    for _ in 1..n {
        let mut next = None;
        for j in 0..n {
            if !in_tree[j] && next.map_or(true, |m: usize| best[j] < best[m]) {
                next = Some(j);
            }
        }
        let Some(v) = next else { break };
        in_tree[v] = true;
        edges.push((from[v], v, best[v]));
        for j in 0..n {
            if !in_tree[j] {
                let d = mutual(v, j);
                if d < best[j] {
                    best[j] = d;
                    from[j] = v;
                }
            }
        }
    }
    edges
}

/// Merge MST edges in ascending order; node `n + i` is the i-th merge.
fn single_linkage(n: usize, mut edges: Vec<(usize, usize, f64)>) -> Vec<Merge> {
    edges.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)).then(a.1.cmp(&b.1)));

    let mut parent: Vec<usize> = (0..2 * n).collect();
    let mut size: Vec<usize> = vec![1; 2 * n];
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    let mut merges = Vec::with_capacity(n.saturating_sub(1));
    for (a, b, d) in edges {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        if ra == rb {
            continue;
        }
        let node = n + merges.len();
        parent[ra] = node;
        parent[rb] = node;
        size[node] = size[ra] + size[rb];
        merges.push(Merge {
            left: ra,
            right: rb,
            dist: d,
            size: size[node],
        });
    }
    merges
}

fn node_size(n: usize, merges: &[Merge], node: usize) -> usize {
    if node < n {
        1
    } else {
        merges[node - n].size
    }
}

fn leaves(n: usize, merges: &[Merge], node: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(x) = stack.pop() {
        if x < n {
            out.push(x);
        } else {
            let m = &merges[x - n];
            stack.push(m.left);
            stack.push(m.right);
        }
    }
    out
}

fn lambda(dist: f64) -> f64 {
    1.0 / dist.max(1e-12)
}

/// Build the condensed tree, pick clusters by excess of mass, label points.
fn condense_and_select(n: usize, merges: &[Merge], min_cluster_size: usize) -> Vec<i64> {
    if merges.len() + 1 != n {
        // Disconnected input cannot happen with a complete graph.
        return vec![NOISE; n];
    }
    let root = n + merges.len() - 1;

    let mut clusters = vec![CondensedCluster {
        parent: None,
        birth: 0.0,
        stability: 0.0,
        children: Vec::new(),
    }];
    // Condensed cluster each point last belonged to.
    let mut point_cluster = vec![0usize; n];

    let mut stack = vec![(root, 0usize)];
    while let Some((node, c)) = stack.pop() {
        if node < n {
            point_cluster[node] = c;
            continue;
        }
        let m = &merges[node - n];
        let l = lambda(m.dist);
        let birth = clusters[c].birth;
        let (sa, sb) = (node_size(n, merges, m.left), node_size(n, merges, m.right));

        match (sa >= min_cluster_size, sb >= min_cluster_size) {
            (true, true) => {
                clusters[c].stability += (l - birth) * (sa + sb) as f64;
                for child in [m.left, m.right] {
                    let id = clusters.len();
                    clusters.push(CondensedCluster {
                        parent: Some(c),
                        birth: l,
                        stability: 0.0,
                        children: Vec::new(),
                    });
                    clusters[c].children.push(id);
                    stack.push((child, id));
                }
            }
            (true, false) | (false, true) => {
                let (keep, drop, dropped) = if sa >= min_cluster_size {
                    (m.left, m.right, sb)
                } else {
                    (m.right, m.left, sa)
                };
                clusters[c].stability += (l - birth) * dropped as f64;
                for p in leaves(n, merges, drop) {
                    point_cluster[p] = c;
                }
                stack.push((keep, c));
            }
            (false, false) => {
                clusters[c].stability += (l - birth) * (sa + sb) as f64;
                for p in leaves(n, merges, node) {
                    point_cluster[p] = c;
                }
            }
        }
    }

    // Excess-of-mass selection, children before parents. The root is
    // never selected, so a single undivided blob is all noise.
    let mut selected = vec![false; clusters.len()];
    let mut best = vec![0.0f64; clusters.len()];
    for c in (1..clusters.len()).rev() {
        let children_best: f64 = clusters[c].children.iter().map(|&ch| best[ch]).sum();
        if clusters[c].children.is_empty() || clusters[c].stability >= children_best {
            selected[c] = true;
            best[c] = clusters[c].stability;
            let mut stack = clusters[c].children.clone();
            while let Some(d) = stack.pop() {
                selected[d] = false;
                stack.extend(clusters[d].children.iter().copied());
            }
        } else {
            best[c] = children_best;
        }
    }

    let mut labels = vec![NOISE; n];
    for (p, label) in labels.iter_mut().enumerate() {
        let mut c = Some(point_cluster[p]);
        while let Some(id) = c {
            if selected[id] {
                *label = id as i64;
                break;
            }
            c = clusters[id].parent;
        }
    }
    labels
}

/// Relabel clusters `0..k` by descending size; ties by first member.
fn renumber_by_size(labels: Vec<i64>) -> Vec<i64> {
    let mut groups: Vec<(i64, usize, usize)> = Vec::new(); // (label, size, first index)
    for (i, &l) in labels.iter().enumerate() {
        if l == NOISE {
            continue;
        }
        match groups.iter_mut().find(|g| g.0 == l) {
            Some(g) => g.1 += 1,
            None => groups.push((l, 1, i)),
        }
    }
    groups.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    labels
        .into_iter()
        .map(|l| {
            groups
                .iter()
                .position(|g| g.0 == l)
                .map_or(NOISE, |pos| pos as i64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(center: &[f32], n: usize, spread: f32) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                center
                    .iter()
                    .enumerate()
                    .map(|(d, c)| c + spread * (((i * 7 + d * 3) % 5) as f32 - 2.0))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_two_blobs_and_outlier() {
        let mut points = blob(&[0.0, 0.0], 8, 0.05);
        points.extend(blob(&[10.0, 10.0], 6, 0.05));
        points.push(vec![-30.0, 40.0]);

        let labels = hdbscan(&points, 3, 3);
        assert_eq!(labels.len(), 15);
        assert!(labels[..8].iter().all(|&l| l == labels[0] && l != NOISE));
        assert!(labels[8..14].iter().all(|&l| l == labels[8] && l != NOISE));
        assert_ne!(labels[0], labels[8]);
        // Larger cluster gets id 0.
        assert_eq!(labels[0], 0);
        assert_eq!(labels[14], NOISE);
    }

    #[test]
    fn test_too_few_points_is_all_noise() {
        let points = blob(&[0.0, 0.0], 3, 0.1);
        assert_eq!(hdbscan(&points, 5, 5), vec![NOISE; 3]);
        assert!(hdbscan(&[], 5, 5).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let mut points = blob(&[0.0, 1.0], 10, 0.1);
        points.extend(blob(&[5.0, -3.0], 10, 0.2));
        assert_eq!(hdbscan(&points, 4, 4), hdbscan(&points, 4, 4));
    }

    fn scatter(center: [f32; 2], n: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
        (0..n)
            .map(|_| {
                // Sum of uniforms: dense middle, thin edges.
                let mut jitter = || (0..3).map(|_| rng.gen_range(-0.5f32..0.5)).sum::<f32>();
                vec![center[0] + jitter(), center[1] + jitter()]
            })
            .collect()
    }

    #[test]
    fn test_core_distances_match_sorted_rows() {
        let mut rng = StdRng::seed_from_u64(3);
        let points = scatter([0.0, 0.0], 40, &mut rng);
        for k in [1, 4, 39] {
            let core = core_distances(&points, k);
            for (i, c) in core.iter().enumerate() {
                let mut row: Vec<f64> = (0..points.len())
                    .filter(|&j| j != i)
                    .map(|j| distance(&points[i], &points[j]))
                    .collect();
                row.sort_by(f64::total_cmp);
                assert_eq!(*c, row[k - 1]);
            }
        }
    }

    #[test]
    fn test_spanning_tree_weight_matches_full_matrix() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut points = scatter([0.0, 0.0], 30, &mut rng);
        points.extend(scatter([6.0, 2.0], 25, &mut rng));
        let core = core_distances(&points, 5);

        let edges = minimum_spanning_tree(&points, &core);
        assert_eq!(edges.len(), points.len() - 1);
        let weight: f64 = edges.iter().map(|e| e.2).sum();

        // Kruskal over every pair gives the same total weight.
        let n = points.len();
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for i in 0..n {
            for j in i + 1..n {
                let d = distance(&points[i], &points[j]).max(core[i]).max(core[j]);
                pairs.push((d, i, j));
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut component: Vec<usize> = (0..n).collect();
        let mut expected = 0.0;
        for (d, i, j) in pairs {
            let (ci, cj) = (component[i], component[j]);
            if ci != cj {
                expected += d;
                component.iter_mut().filter(|c| **c == cj).for_each(|c| *c = ci);
            }
        }
        assert!((weight - expected).abs() < 1e-9);
    }

    #[test]
    fn test_separated_groups_at_larger_size() {
        let mut rng = StdRng::seed_from_u64(7);
        let centers = [[0.0, 0.0], [20.0, 0.0], [0.0, 20.0]];
        let points: Vec<Vec<f32>> = centers
            .iter()
            .flat_map(|c| scatter(*c, 150, &mut rng))
            .collect();

        let labels = hdbscan(&points, 10, 10);
        assert_eq!(labels.len(), 450);
        let groups: Vec<std::collections::BTreeSet<i64>> = labels
            .chunks(150)
            .map(|chunk| chunk.iter().copied().filter(|&l| l != NOISE).collect())
            .collect();
        for (a, group) in groups.iter().enumerate() {
            assert!(!group.is_empty());
            for other in &groups[a + 1..] {
                assert!(group.is_disjoint(other));
            }
        }
    }

    #[test]
    fn test_project_dimensions_and_seed() {
        let vectors = vec![vec![0.5f32; 64], vec![-0.25f32; 64]];
        let a = project(&vectors, 8, 42);
        let b = project(&vectors, 8, 42);
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
        let norm: f32 = a[0].iter().map(|x| x * x).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_project_skips_small_inputs() {
        let vectors = vec![vec![3.0f32, 4.0]];
        let out = project(&vectors, 8, 1);
        assert_eq!(out[0].len(), 2);
        assert!((out[0][0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_renumber_by_size() {
        let labels = vec![7, 3, 3, NOISE, 7, 3];
        assert_eq!(renumber_by_size(labels), vec![1, 0, 0, NOISE, 1, 0]);
    }
}
