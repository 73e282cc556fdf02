use rand::distr::{Bernoulli, Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Binomial, Normal, Poisson, StandardNormal};
use tracing::debug;

use crate::params::{LevelTwoDistribution, ModelFamily, PopulationParams};
use crate::{Dataset, ModelError, PopulationGenerator};

/// Reference generator for lag-one autoregressive panels.
///
/// Each unit gets its own level drawn from the level-two distribution, then a
/// series of `time_length` observations after `burn_in` discarded steps. All
/// randomness comes from one `ChaCha8Rng` seeded with the row seed.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoregressiveGenerator {
    /// Population mean (expected count for the count families).
    pub mean_level: f64,
    /// Spread of unit levels around the population mean.
    pub level_spread: f64,
    pub burn_in: usize,
}

impl Default for AutoregressiveGenerator {
    fn default() -> Self {
        Self {
            mean_level: 3.0,
            level_spread: 0.5,
            burn_in: 50,
        }
    }
}

impl AutoregressiveGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mean_level(mut self, mean_level: f64) -> Self {
        self.mean_level = mean_level;
        self
    }

    pub fn with_level_spread(mut self, level_spread: f64) -> Self {
        self.level_spread = level_spread;
        self
    }

    pub fn with_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    fn validate(&self, params: &PopulationParams) -> Result<(), ModelError> {
        if params.sample_count == 0 {
            return Err(ModelError::invalid("N", "sample count must be positive"));
        }
        if params.time_length == 0 {
            return Err(ModelError::invalid("T", "time length must be positive"));
        }
        let phi = params.autocorrelation;
        let in_range = if params.model_family.is_count() {
            (0.0..1.0).contains(&phi)
        } else {
            phi.abs() < 1.0
        };
        if !in_range {
            return Err(ModelError::invalid(
                "phi",
                format!(
                    "{} is not stationary for the {} family",
                    phi, params.model_family
                ),
            ));
        }
        if params.model_family.is_count() && self.mean_level <= 0.0 {
            return Err(ModelError::invalid(
                "mean_level",
                "count families need a positive mean",
            ));
        }
        if self.level_spread < 0.0 {
            return Err(ModelError::invalid(
                "level_spread",
                "spread cannot be negative",
            ));
        }
        Ok(())
    }

    /// Standardized level-two deviate: mean zero, unit variance.
    fn level_deviate(
        &self,
        distribution: LevelTwoDistribution,
        rng: &mut ChaCha8Rng,
    ) -> Result<f64, ModelError> {
        match distribution {
            LevelTwoDistribution::Normal => Ok(StandardNormal.sample(rng)),
            LevelTwoDistribution::Uniform => {
                let bound = 3f64.sqrt();
                let uniform = Uniform::new_inclusive(-bound, bound)
                    .map_err(|e| ModelError::Distribution(e.to_string()))?;
                Ok(uniform.sample(rng))
            }
            LevelTwoDistribution::Fixed => Ok(0.0),
        }
    }

    fn gaussian_series(
        &self,
        level: f64,
        phi: f64,
        steps: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<f64>, ModelError> {
        let innovation = Normal::new(0.0, (1.0 - phi * phi).sqrt())
            .map_err(|e| ModelError::Distribution(e.to_string()))?;
        let start: f64 = StandardNormal.sample(rng);

        let mut y = level + start;
        let mut series = Vec::with_capacity(steps);
        for _ in 0..steps {
            y = level + phi * (y - level) + innovation.sample(rng);
            series.push(y);
        }
        Ok(series)
    }

    fn binomial_thinning_series(
        &self,
        lambda: f64,
        phi: f64,
        steps: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<f64>, ModelError> {
        let marginal = poisson(lambda)?;
        let arrivals = poisson(lambda * (1.0 - phi))?;

        let start: f64 = marginal.sample(rng);
        let mut y = start as u64;
        let mut series = Vec::with_capacity(steps);
        for _ in 0..steps {
            let survivors: u64 = Binomial::new(y, phi)
                .map_err(|e| ModelError::Distribution(e.to_string()))?
                .sample(rng);
            let arrived: f64 = arrivals.sample(rng);
            y = survivors + arrived as u64;
            series.push(y as f64);
        }
        Ok(series)
    }

    fn discrete_series(
        &self,
        lambda: f64,
        phi: f64,
        steps: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<f64>, ModelError> {
        let marginal = poisson(lambda)?;
        let repeat =
            Bernoulli::new(phi).map_err(|e| ModelError::Distribution(e.to_string()))?;

        let mut y: f64 = marginal.sample(rng);
        let mut series = Vec::with_capacity(steps);
        for _ in 0..steps {
            if !repeat.sample(rng) {
                y = marginal.sample(rng);
            }
            series.push(y);
        }
        Ok(series)
    }
}

impl PopulationGenerator for AutoregressiveGenerator {
    fn generate(&self, params: &PopulationParams) -> Result<Dataset, ModelError> {
        self.validate(params)?;

        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let steps = self.burn_in + params.time_length;
        let phi = params.autocorrelation;

        let mut series = Vec::with_capacity(params.sample_count);
        for _ in 0..params.sample_count {
            let z = self.level_deviate(params.level_two_distribution, &mut rng)?;
            let mut unit = match params.model_family {
                ModelFamily::Ar => {
                    let level = self.mean_level + self.level_spread * z;
                    self.gaussian_series(level, phi, steps, &mut rng)?
                }
                ModelFamily::BinAr => {
                    let lambda = self.count_level(z);
                    self.binomial_thinning_series(lambda, phi, steps, &mut rng)?
                }
                ModelFamily::Dar => {
                    let lambda = self.count_level(z);
                    self.discrete_series(lambda, phi, steps, &mut rng)?
                }
            };
            unit.drain(..self.burn_in);
            series.push(unit);
        }

        debug!(
            "Generated {} panel: {} units x {} steps (seed {})",
            params.model_family, params.sample_count, params.time_length, params.seed
        );
        Ok(Dataset {
            model_family: params.model_family,
            seed: params.seed,
            series,
        })
    }
}

impl AutoregressiveGenerator {
    /// Log-normal unit mean whose expectation is `mean_level`.
    fn count_level(&self, z: f64) -> f64 {
        let s = self.level_spread;
        self.mean_level * (s * z - s * s / 2.0).exp()
    }
}

fn poisson(lambda: f64) -> Result<Poisson<f64>, ModelError> {
    Poisson::new(lambda).map_err(|e| ModelError::Distribution(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(family: ModelFamily, phi: f64, seed: u64) -> PopulationParams {
        PopulationParams {
            model_family: family,
            sample_count: 20,
            time_length: 30,
            autocorrelation: phi,
            level_two_distribution: LevelTwoDistribution::Normal,
            seed,
        }
    }

    #[test]
    fn test_same_seed_same_dataset() {
        let generator = AutoregressiveGenerator::new();
        for family in [ModelFamily::Ar, ModelFamily::BinAr, ModelFamily::Dar] {
            let a = generator.generate(&params(family, 0.4, 11007)).unwrap();
            let b = generator.generate(&params(family, 0.4, 11007)).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let generator = AutoregressiveGenerator::new();
        let a = generator.generate(&params(ModelFamily::Ar, 0.4, 11007)).unwrap();
        let b = generator.generate(&params(ModelFamily::Ar, 0.4, 21007)).unwrap();
        assert_ne!(a.series, b.series);
    }

    #[test]
    fn test_panel_has_requested_shape() {
        let dataset = AutoregressiveGenerator::new()
            .generate(&params(ModelFamily::BinAr, 0.4, 3))
            .unwrap();
        assert_eq!(dataset.sample_count(), 20);
        assert!(dataset.series.iter().all(|s| s.len() == 30));
        assert_eq!(dataset.model_family, ModelFamily::BinAr);
        assert_eq!(dataset.seed, 3);
    }

    #[test]
    fn test_count_families_produce_counts() {
        let generator = AutoregressiveGenerator::new();
        for family in [ModelFamily::BinAr, ModelFamily::Dar] {
            let dataset = generator.generate(&params(family, 0.7, 5)).unwrap();
            for value in dataset.series.iter().flatten() {
                assert!(*value >= 0.0);
                assert_eq!(value.fract(), 0.0);
            }
        }
    }

    #[test]
    fn test_fixed_level_two_shares_one_mean() {
        let mut p = params(ModelFamily::Ar, 0.0, 9);
        p.level_two_distribution = LevelTwoDistribution::Fixed;
        p.sample_count = 200;
        let dataset = AutoregressiveGenerator::new().generate(&p).unwrap();
        let mean = dataset.series.iter().flatten().sum::<f64>() / dataset.observations() as f64;
        assert!((mean - 3.0).abs() < 0.1, "mean {mean}");
    }

    fn unit_means(dataset: &Dataset) -> Vec<f64> {
        dataset
            .series
            .iter()
            .map(|s| s.iter().sum::<f64>() / s.len() as f64)
            .collect()
    }

    #[test]
    fn test_mean_level_moves_the_population_mean() {
        let mut p = params(ModelFamily::Ar, 0.0, 9);
        p.level_two_distribution = LevelTwoDistribution::Fixed;
        p.sample_count = 200;
        let dataset = AutoregressiveGenerator::new()
            .with_mean_level(10.0)
            .generate(&p)
            .unwrap();
        let means = unit_means(&dataset);
        let mean = means.iter().sum::<f64>() / means.len() as f64;
        assert!((mean - 10.0).abs() < 0.1, "mean {mean}");
    }

    #[test]
    fn test_level_spread_scales_unit_heterogeneity() {
        let mut p = params(ModelFamily::Ar, 0.0, 21);
        p.sample_count = 200;
        let variance = |spread: f64| {
            let dataset = AutoregressiveGenerator::new()
                .with_level_spread(spread)
                .generate(&p)
                .unwrap();
            let means = unit_means(&dataset);
            let centre = means.iter().sum::<f64>() / means.len() as f64;
            means.iter().map(|m| (m - centre).powi(2)).sum::<f64>() / means.len() as f64
        };
        // Within-unit noise alone leaves about 1/T of variance in the unit means.
        assert!(variance(0.0) < 0.2);
        assert!(variance(5.0) > 5.0);

        let negative = AutoregressiveGenerator::new().with_level_spread(-1.0);
        assert!(matches!(
            negative.generate(&p),
            Err(ModelError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_non_stationary_phi_is_rejected() {
        let generator = AutoregressiveGenerator::new();
        assert!(matches!(
            generator.generate(&params(ModelFamily::Ar, 1.0, 1)),
            Err(ModelError::InvalidParameter { .. })
        ));
        assert!(matches!(
            generator.generate(&params(ModelFamily::BinAr, -0.2, 1)),
            Err(ModelError::InvalidParameter { .. })
        ));
        assert!(generator
            .generate(&params(ModelFamily::Ar, -0.2, 1))
            .is_ok());
    }

    #[test]
    fn test_burn_in_is_discarded() {
        let short = AutoregressiveGenerator::new().with_burn_in(0);
        let dataset = short.generate(&params(ModelFamily::Dar, 0.3, 1)).unwrap();
        assert!(dataset.series.iter().all(|s| s.len() == 30));
    }
}
