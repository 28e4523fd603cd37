use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Draw `k` distinct indices out of `0..n`, reproducibly for a given seed
pub fn sample_without_replacement(n: usize, k: usize, seed: u64) -> anyhow::Result<Vec<usize>> {
    if k > n {
        anyhow::bail!("cannot draw {} distinct indices out of {}", k, n);
    }
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(rand::seq::index::sample(&mut rng, n, k).into_vec())
}

/// A uniformly random permutation of `0..n`
pub fn random_permutation(n: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(&mut rng);
    perm
}

/// `inv` such that `inv[perm[i]] = i`
pub fn inverse_permutation(perm: &[usize]) -> anyhow::Result<Vec<usize>> {
    let n = perm.len();
    let mut inv = vec![usize::MAX; n];
    for (i, &p) in perm.iter().enumerate() {
        if p >= n || inv[p] != usize::MAX {
            anyhow::bail!("not a permutation of 0..{}", n);
        }
        inv[p] = i;
    }
    Ok(inv)
}

/// `out[:, j] = mat[:, cols[j]]`
pub fn select_columns(mat: &Array2<f64>, cols: &[usize]) -> anyhow::Result<Array2<f64>> {
    if let Some(&bad) = cols.iter().find(|&&j| j >= mat.ncols()) {
        anyhow::bail!("column {} out of range ({} columns)", bad, mat.ncols());
    }
    Ok(mat.select(Axis(1), cols))
}

/// `out[i, :] = mat[rows[i], :]`
pub fn select_rows(mat: &Array2<f64>, rows: &[usize]) -> anyhow::Result<Array2<f64>> {
    if let Some(&bad) = rows.iter().find(|&&i| i >= mat.nrows()) {
        anyhow::bail!("row {} out of range ({} rows)", bad, mat.nrows());
    }
    Ok(mat.select(Axis(0), rows))
}
