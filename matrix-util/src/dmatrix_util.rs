use nalgebra::DMatrix;

/// Project the rows of `yy` (n x d) onto its top `rank` principal axes
///
/// Returns an n x rank matrix of principal component scores. Columns are
/// centred before the decomposition. If `rank` exceeds the number of
/// available components the remaining columns are zero.
pub fn pca_scores(yy: &DMatrix<f64>, rank: usize) -> anyhow::Result<DMatrix<f64>> {
    let (nn, dd) = yy.shape();
    if nn == 0 || dd == 0 {
        anyhow::bail!("empty matrix {} x {}", nn, dd);
    }

    let mut centred = yy.clone();
    for mut y_j in centred.column_iter_mut() {
        let mu = y_j.mean();
        y_j.add_scalar_mut(-mu);
    }

    let svd = centred.svd(true, false);
    let uu = svd
        .u
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("SVD did not return left singular vectors"))?;
    let sv = &svd.singular_values;

    let mut order: Vec<usize> = (0..sv.len()).collect();
    order.sort_by(|&a, &b| sv[b].total_cmp(&sv[a]));

    let mut ret = DMatrix::<f64>::zeros(nn, rank);
    for (k, &j) in order.iter().take(rank).enumerate() {
        ret.set_column(k, &(uu.column(j) * sv[j]));
    }
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pca_recovers_rank_one_structure() -> anyhow::Result<()> {
        let t = DMatrix::from_fn(20, 1, |i, _| i as f64 - 9.5);
        let w = DMatrix::from_fn(1, 6, |_, j| (j + 1) as f64);
        let yy = &t * &w;

        let scores = pca_scores(&yy, 3)?;
        assert_eq!(scores.shape(), (20, 3));

        // first score is proportional to t, the others vanish
        let s0 = scores.column(0);
        let ratio = s0[0] / t[(0, 0)];
        for i in 0..20 {
            approx::assert_abs_diff_eq!(s0[i], ratio * t[(i, 0)], epsilon = 1e-8);
        }
        assert!(scores.column(1).amax() < 1e-8);
        assert!(scores.column(2).amax() < 1e-8);

        let padded = pca_scores(&yy, 25)?;
        assert_eq!(padded.ncols(), 25);
        Ok(())
    }
}
