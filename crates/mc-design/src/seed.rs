//! Collision-free seed derivation from condition values.
//!
//! Every condition value is mapped to a non-negative integer code, each axis
//! gets a prime weight, and the weighted sum of a row's codes (offset by the
//! global seed) forms the seed's magnitude. The replicate index is prepended
//! as a digit string, so replicates of one condition combination differ
//! textually and not just arithmetically.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use mc_types::{AxisSet, AxisValue, EncodingError};
use rust_decimal::Decimal;

/// Integer codes for the candidate values of one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisCoding {
    pub name: String,
    codes: BTreeMap<AxisValue, u64>,
}

impl AxisCoding {
    /// Code the candidate values of `name`.
    ///
    /// Axes holding any categorical level are coded ordinally (1-based, in
    /// sorted order, so declaration order never matters). Purely numeric axes
    /// are rescaled to their widest scale and have the decimal point
    /// stripped: `0.4 -> 4`, and `{0.4, 0.05} -> {40, 5}`.
    pub fn new(name: &str, values: &[AxisValue]) -> Result<Self, EncodingError> {
        let distinct: BTreeSet<&AxisValue> = values.iter().collect();
        if distinct.len() != values.len() {
            return Err(EncodingError::NonInvertible {
                axis: name.to_string(),
                message: "a candidate value is listed more than once".to_string(),
            });
        }

        let codes = if values.iter().any(AxisValue::is_level) {
            distinct
                .into_iter()
                .enumerate()
                .map(|(idx, v)| (v.clone(), idx as u64 + 1))
                .collect()
        } else {
            Self::numeric_codes(name, &distinct)?
        };

        let coding = Self {
            name: name.to_string(),
            codes,
        };
        coding.check_invertible()?;
        Ok(coding)
    }

    fn numeric_codes(
        name: &str,
        values: &BTreeSet<&AxisValue>,
    ) -> Result<BTreeMap<AxisValue, u64>, EncodingError> {
        let decimals: Vec<Decimal> = values.iter().filter_map(|v| v.as_decimal()).collect();
        let scale = decimals
            .iter()
            .map(|d| d.normalize().scale())
            .max()
            .unwrap_or(0);

        let mut codes = BTreeMap::new();
        for d in decimals {
            if d.is_sign_negative() && !d.is_zero() {
                return Err(EncodingError::NegativeCode {
                    axis: name.to_string(),
                    value: d.to_string(),
                });
            }
            let mut scaled = d.normalize();
            scaled.rescale(scale);
            let code = u64::try_from(scaled.mantissa()).map_err(|_| EncodingError::Overflow {
                message: format!("code of {d} on axis '{name}' exceeds u64"),
            })?;
            codes.insert(AxisValue::Number(d), code);
        }
        Ok(codes)
    }

    fn check_invertible(&self) -> Result<(), EncodingError> {
        let mut seen: HashMap<u64, &AxisValue> = HashMap::new();
        for (value, code) in &self.codes {
            if let Some(other) = seen.insert(*code, value) {
                return Err(EncodingError::NonInvertible {
                    axis: self.name.clone(),
                    message: format!("{other} and {value} share code {code}"),
                });
            }
        }
        Ok(())
    }

    pub fn code(&self, value: &AxisValue) -> Result<u64, EncodingError> {
        self.codes
            .get(value)
            .copied()
            .ok_or_else(|| EncodingError::NonInvertible {
                axis: self.name.clone(),
                message: format!("{value} is not a candidate value of this axis"),
            })
    }

    pub fn max_code(&self) -> u64 {
        self.codes.values().copied().max().unwrap_or(0)
    }

    pub fn codes(&self) -> impl Iterator<Item = u64> + '_ {
        self.codes.values().copied()
    }
}

/// Maps condition rows to unique seeds for one table-generation call.
#[derive(Debug, Clone)]
pub struct SeedEncoder {
    axes: Vec<AxisCoding>,
    weights: Vec<u64>,
    global_seed: u64,
    width: u32,
}

impl SeedEncoder {
    /// Build the per-axis codings and pick one prime weight per axis.
    ///
    /// Primes dividing any condition code are never used as weights, and each
    /// weight is larger than the biggest sum the preceding axes can reach, so
    /// the weighted sum is injective over the whole grid.
    pub fn new(axes: &AxisSet, global_seed: u64) -> Result<Self, EncodingError> {
        let axes: Vec<AxisCoding> = axes
            .iter()
            .map(|(name, values)| AxisCoding::new(name, values))
            .collect::<Result<_, _>>()?;

        let excluded: BTreeSet<u64> = axes
            .iter()
            .flat_map(|a| a.codes())
            .flat_map(prime_factors)
            .collect();

        let mut weights = Vec::with_capacity(axes.len());
        let mut reach: u64 = 0;
        for axis in &axes {
            let weight = next_prime_excluding(reach, &excluded)?;
            reach = weight
                .checked_mul(axis.max_code())
                .and_then(|c| c.checked_add(reach))
                .ok_or_else(|| overflow(format!("weighted sum over axis '{}'", axis.name)))?;
            weights.push(weight);
        }

        let max_magnitude = reach
            .checked_add(global_seed)
            .ok_or_else(|| overflow("global seed offset".to_string()))?;

        Ok(Self {
            axes,
            weights,
            global_seed,
            width: digit_count(max_magnitude),
        })
    }

    pub fn weights(&self) -> &[u64] {
        &self.weights
    }

    pub fn axes(&self) -> &[AxisCoding] {
        &self.axes
    }

    /// Digits reserved for the magnitude inside a seed.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Integer codes of a row, in axis order.
    pub fn codes(
        &self,
        conditions: &BTreeMap<String, AxisValue>,
    ) -> Result<Vec<u64>, EncodingError> {
        self.axes
            .iter()
            .map(|axis| {
                let value = conditions.get(&axis.name).ok_or_else(|| {
                    EncodingError::NonInvertible {
                        axis: axis.name.clone(),
                        message: "row has no value for this axis".to_string(),
                    }
                })?;
                axis.code(value)
            })
            .collect()
    }

    /// `global_seed + sum(code_i * weight_i)`.
    pub fn magnitude(&self, codes: &[u64]) -> Result<u64, EncodingError> {
        codes
            .iter()
            .zip(&self.weights)
            .try_fold(self.global_seed, |acc, (code, weight)| {
                code.checked_mul(*weight)
                    .and_then(|term| acc.checked_add(term))
            })
            .ok_or_else(|| overflow("row magnitude".to_string()))
    }

    /// Seed of one row: the replicate digits followed by the zero-padded
    /// magnitude. Depends only on the row's values, never on its position.
    pub fn seed(
        &self,
        conditions: &BTreeMap<String, AxisValue>,
        replicate: u32,
    ) -> Result<u64, EncodingError> {
        let magnitude = self.magnitude(&self.codes(conditions)?)?;
        10u64
            .checked_pow(self.width)
            .and_then(|shift| u64::from(replicate).checked_mul(shift))
            .and_then(|prefix| prefix.checked_add(magnitude))
            .ok_or_else(|| overflow(format!("seed for replicate {replicate}")))
    }
}

fn overflow(message: String) -> EncodingError {
    EncodingError::Overflow { message }
}

fn digit_count(mut n: u64) -> u32 {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d <= n / d {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Distinct prime factors; 0 and 1 have none.
fn prime_factors(mut n: u64) -> Vec<u64> {
    let mut factors = Vec::new();
    if n < 2 {
        return factors;
    }
    let mut d = 2;
    while d <= n / d {
        if n % d == 0 {
            factors.push(d);
            while n % d == 0 {
                n /= d;
            }
        }
        d += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// Smallest prime strictly above `floor` that is not in `excluded`.
fn next_prime_excluding(floor: u64, excluded: &BTreeSet<u64>) -> Result<u64, EncodingError> {
    let mut candidate = floor;
    loop {
        candidate = candidate
            .checked_add(1)
            .ok_or_else(|| overflow("prime weight search".to_string()))?;
        if is_prime(candidate) && !excluded.contains(&candidate) {
            return Ok(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn example_axes() -> AxisSet {
        let mut axes = AxisSet::new();
        axes.insert("T".into(), vec![30.into(), 100.into()]);
        axes.insert("N".into(), vec![100.into()]);
        axes.insert("Model".into(), vec!["BinAR".into(), "DAR".into()]);
        axes.insert("phi".into(), vec![AxisValue::Number(dec!(0.4))]);
        axes
    }

    fn row(pairs: &[(&str, AxisValue)]) -> BTreeMap<String, AxisValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_levels_are_coded_in_sorted_order() {
        let a = AxisCoding::new("Model", &["DAR".into(), "BinAR".into()]).unwrap();
        let b = AxisCoding::new("Model", &["BinAR".into(), "DAR".into()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.code(&"BinAR".into()).unwrap(), 1);
        assert_eq!(a.code(&"DAR".into()).unwrap(), 2);
    }

    #[test]
    fn test_decimal_point_is_stripped_at_common_scale() {
        let phi = AxisCoding::new("phi", &[AxisValue::Number(dec!(0.4))]).unwrap();
        assert_eq!(phi.code(&AxisValue::Number(dec!(0.4))).unwrap(), 4);

        let mixed = AxisCoding::new(
            "phi",
            &[AxisValue::Number(dec!(0.4)), AxisValue::Number(dec!(0.05))],
        )
        .unwrap();
        assert_eq!(mixed.code(&AxisValue::Number(dec!(0.4))).unwrap(), 40);
        assert_eq!(mixed.code(&AxisValue::Number(dec!(0.05))).unwrap(), 5);
    }

    #[test]
    fn test_negative_values_are_rejected() {
        let err = AxisCoding::new("phi", &[AxisValue::Number(dec!(-0.3))]).unwrap_err();
        assert!(matches!(err, EncodingError::NegativeCode { .. }));
    }

    #[test]
    fn test_duplicate_candidates_are_not_invertible() {
        let err = AxisCoding::new("T", &[30.into(), 30.into()]).unwrap_err();
        assert!(matches!(err, EncodingError::NonInvertible { .. }));
    }

    #[test]
    fn test_weights_skip_factors_of_codes_and_grow() {
        let encoder = SeedEncoder::new(&example_axes(), 0).unwrap();
        let weights = encoder.weights();
        assert_eq!(weights.len(), 4);
        // Codes 1, 2, 4, 30, 100 contribute the factors 2, 3 and 5.
        assert_eq!(weights[0], 7);
        assert_eq!(weights[1], 17);
        for w in weights {
            assert!(is_prime(*w));
            assert!(w % 2 != 0 && w % 3 != 0 && w % 5 != 0);
        }
        assert!(weights.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_replicate_is_prepended_to_magnitude() {
        let encoder = SeedEncoder::new(&example_axes(), 0).unwrap();
        let conditions = row(&[
            ("Model", "BinAR".into()),
            ("N", 100.into()),
            ("T", 30.into()),
            ("phi", AxisValue::Number(dec!(0.4))),
        ]);
        let magnitude = encoder.magnitude(&encoder.codes(&conditions).unwrap()).unwrap();

        let first = encoder.seed(&conditions, 1).unwrap().to_string();
        let third = encoder.seed(&conditions, 3).unwrap().to_string();
        let padded = format!("{:0width$}", magnitude, width = encoder.width() as usize);
        assert_eq!(first, format!("1{padded}"));
        assert_eq!(third, format!("3{padded}"));
    }

    #[test]
    fn test_seed_ignores_row_position_and_map_order() {
        let encoder = SeedEncoder::new(&example_axes(), 42).unwrap();
        let a = row(&[
            ("T", 100.into()),
            ("phi", AxisValue::Number(dec!(0.4))),
            ("N", 100.into()),
            ("Model", "DAR".into()),
        ]);
        let b = row(&[
            ("Model", "DAR".into()),
            ("N", 100.into()),
            ("T", 100.into()),
            ("phi", AxisValue::Number(dec!(0.4))),
        ]);
        assert_eq!(encoder.seed(&a, 2).unwrap(), encoder.seed(&b, 2).unwrap());
    }

    #[test]
    fn test_global_seed_shifts_every_magnitude() {
        let base = SeedEncoder::new(&example_axes(), 0).unwrap();
        let shifted = SeedEncoder::new(&example_axes(), 1000).unwrap();
        let conditions = row(&[
            ("Model", "BinAR".into()),
            ("N", 100.into()),
            ("T", 30.into()),
            ("phi", AxisValue::Number(dec!(0.4))),
        ]);
        let codes = base.codes(&conditions).unwrap();
        assert_eq!(
            shifted.magnitude(&codes).unwrap(),
            base.magnitude(&codes).unwrap() + 1000
        );
    }

    #[test]
    fn test_unknown_value_is_an_encoding_error() {
        let encoder = SeedEncoder::new(&example_axes(), 0).unwrap();
        let conditions = row(&[
            ("Model", "INAR".into()),
            ("N", 100.into()),
            ("T", 30.into()),
            ("phi", AxisValue::Number(dec!(0.4))),
        ]);
        assert!(encoder.seed(&conditions, 1).is_err());
    }

    #[test]
    fn test_prime_helpers() {
        assert_eq!(prime_factors(100), vec![2, 5]);
        assert_eq!(prime_factors(1), Vec::<u64>::new());
        assert_eq!(prime_factors(97), vec![97]);
        let excluded: BTreeSet<u64> = [2, 3, 5].into_iter().collect();
        assert_eq!(next_prime_excluding(0, &excluded).unwrap(), 7);
        assert_eq!(digit_count(0), 1);
        assert_eq!(digit_count(1714), 4);
    }
}
