use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

/// Initial inducing inputs `(M, Q)`: a random subset of the rows of the
/// latent means, topped up with standard normal draws when `M > N`
pub fn initial_inducing_input(
    x_mean: &Tensor,
    num_inducing: usize,
    rng: &mut StdRng,
) -> Result<Tensor> {
    let (nn, qq) = x_mean.dims2()?;
    let dev: &Device = x_mean.device();

    let take = num_inducing.min(nn);
    let rows: Vec<u32> = rand::seq::index::sample(rng, nn, take)
        .into_iter()
        .map(|i| i as u32)
        .collect();
    let rows = Tensor::from_vec(rows, take, dev)?;
    let subset = x_mean.index_select(&rows, 0)?;

    if take == num_inducing {
        return Ok(subset);
    }

    let extra = num_inducing - take;
    let draws: Vec<f64> = (0..(extra * qq))
        .map(|_| rng.sample::<f64, _>(StandardNormal))
        .collect();
    let draws = Tensor::from_vec(draws, (extra, qq), dev)?;
    Tensor::cat(&[&subset, &draws], 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn subset_of_latent_rows() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::arange(0f64, 12.0, &dev)?.reshape((6, 2))?;
        let mut rng = StdRng::seed_from_u64(4);

        let z = initial_inducing_input(&x, 4, &mut rng)?;
        assert_eq!(z.dims(), &[4, 2]);
        let rows = x.to_vec2::<f64>()?;
        for r in z.to_vec2::<f64>()? {
            assert!(rows.contains(&r));
        }

        let z = initial_inducing_input(&x, 9, &mut rng)?;
        assert_eq!(z.dims(), &[9, 2]);
        Ok(())
    }
}
