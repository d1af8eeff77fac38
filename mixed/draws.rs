//! Monte Carlo draws for the random coefficients.
//!
//! One `(decision_makers x draws)` matrix of standard normal variates is produced
//! per mixing variable. The generator is passed in explicitly, so reproducibility
//! never depends on a process-wide random stream.

use crate::estimate::EstimationError;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Draws standard normal matrices from a caller-owned generator.
///
/// The matrices are filled one mixing variable at a time, row-major within each
/// matrix, so two generators in the same state always yield identical draws.
pub fn normal_draws_from_rng<R: Rng + ?Sized>(
    rng: &mut R,
    num_decision_makers: usize,
    num_draws: usize,
    num_mixing_vars: usize,
) -> Result<Vec<Array2<f64>>, EstimationError> {
    for (name, value) in [
        ("number of decision-makers", num_decision_makers),
        ("number of draws", num_draws),
        ("number of mixing variables", num_mixing_vars),
    ] {
        if value == 0 {
            return Err(EstimationError::InvalidArgument(format!(
                "the {name} must be positive"
            )));
        }
    }

    let draws: Vec<Array2<f64>> = (0..num_mixing_vars)
        .map(|_| {
            Array2::from_shape_fn((num_decision_makers, num_draws), |_| {
                rng.sample::<f64, _>(StandardNormal)
            })
        })
        .collect();
    Ok(draws)
}

/// Draws standard normal matrices, seeded when `seed` is given and from OS
/// entropy otherwise.
pub fn get_normal_draws(
    num_decision_makers: usize,
    num_draws: usize,
    num_mixing_vars: usize,
    seed: Option<u64>,
) -> Result<Vec<Array2<f64>>, EstimationError> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    normal_draws_from_rng(&mut rng, num_decision_makers, num_draws, num_mixing_vars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_have_one_matrix_per_mixing_variable() {
        let draws = get_normal_draws(10, 5, 3, Some(11)).unwrap();
        assert_eq!(draws.len(), 3);
        for matrix in &draws {
            assert_eq!(matrix.dim(), (10, 5));
            assert!(matrix.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn identical_seeds_give_identical_draws() {
        let first = get_normal_draws(4, 6, 2, Some(912)).unwrap();
        let second = get_normal_draws(4, 6, 2, Some(912)).unwrap();
        assert_eq!(first, second);

        let other = get_normal_draws(4, 6, 2, Some(913)).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn unseeded_draws_differ_between_calls() {
        let first = get_normal_draws(4, 6, 1, None).unwrap();
        let second = get_normal_draws(4, 6, 1, None).unwrap();
        assert_eq!(first[0].dim(), second[0].dim());
        assert_ne!(first, second);
    }

    #[test]
    fn mixing_variables_get_independent_streams() {
        let draws = get_normal_draws(3, 3, 2, Some(5)).unwrap();
        assert_ne!(draws[0], draws[1]);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(matches!(
            get_normal_draws(0, 5, 1, Some(1)),
            Err(EstimationError::InvalidArgument(_))
        ));
        assert!(get_normal_draws(2, 0, 1, Some(1)).is_err());
        assert!(get_normal_draws(2, 5, 0, None).is_err());
    }

    #[test]
    fn sample_moments_are_close_to_standard_normal() {
        let mut rng = StdRng::seed_from_u64(2024);
        let draws = normal_draws_from_rng(&mut rng, 200, 100, 1).unwrap();
        let n = draws[0].len() as f64;
        let mean = draws[0].sum() / n;
        let var = draws[0].mapv(|v| (v - mean).powi(2)).sum() / (n - 1.0);
        assert!(mean.abs() < 0.05, "mean was {mean}");
        assert!((var - 1.0).abs() < 0.05, "variance was {var}");
    }
}
