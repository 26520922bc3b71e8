//! Latent dimension from explained variance
//!
//! Given the cumulative explained-variance ratios `cs` of a PCA model and a
//! threshold `t`:
//!
//! - `cs[last] < t`: every component is needed; the percentage reported is
//!   what they explain together
//! - otherwise: the first component (1-based) whose cumulative ratio is
//!   strictly greater than `t`; the percentage reported is `t * 100`
//!
//! `cs[last] == t` has no component strictly above the threshold: all
//! components are reported, described as meeting the threshold exactly.

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct LatentDimensionEstimate {
    pub latent_dimension: u32,
    pub variance_percentage: f64,
    pub description: String,
}

/// Running sum of per-component explained-variance ratios
pub fn cumulative_sum(ratios: &[f64]) -> Vec<f64> {
    ratios
        .iter()
        .scan(0.0, |acc, ratio| {
            *acc += ratio;
            Some(*acc)
        })
        .collect()
}

pub fn validate_threshold(threshold: f64) -> Result<()> {
    if threshold.is_finite() && threshold > 0.0 && threshold <= 1.0 {
        Ok(())
    } else {
        Err(PipelineError::Variance(format!(
            "variance threshold must be in (0, 1], got {}",
            threshold
        )))
    }
}

pub fn estimate_latent_dimension(cs: &[f64], threshold: f64) -> Result<LatentDimensionEstimate> {
    validate_threshold(threshold)?;
    let Some(&last) = cs.last() else {
        return Err(PipelineError::Variance(
            "model has no components".to_string(),
        ));
    };

    match cs.iter().position(|&v| v > threshold) {
        Some(index) if last >= threshold => {
            let latent_dimension = component_count(index + 1)?;
            let variance_percentage = threshold * 100.0;
            Ok(LatentDimensionEstimate {
                latent_dimension,
                variance_percentage,
                description: format!(
                    ">={}% of variance explained by {} components.",
                    format_percentage(variance_percentage),
                    latent_dimension
                ),
            })
        }
        _ => {
            let variance_percentage = last * 100.0;
            let explained = if last < threshold {
                "only explain"
            } else {
                "explain exactly"
            };
            Ok(LatentDimensionEstimate {
                latent_dimension: component_count(cs.len())?,
                variance_percentage,
                description: format!(
                    "All components together {} {}% of variance.",
                    explained,
                    format_percentage(variance_percentage)
                ),
            })
        }
    }
}

fn component_count(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| PipelineError::Variance(format!("{} components", n)))
}

/// `90` → `90.0`, `84.37` → `84.37`
fn format_percentage(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_threshold_reached() {
        let estimate = estimate_latent_dimension(&[0.5, 0.75, 0.92, 0.97], 0.90).unwrap();
        assert_eq!(estimate.latent_dimension, 3);
        assert_eq!(estimate.variance_percentage, 90.0);
        assert_eq!(
            estimate.description,
            ">=90.0% of variance explained by 3 components."
        );
    }

    #[test]
    fn test_threshold_not_reached() {
        let estimate = estimate_latent_dimension(&[0.3, 0.5], 0.90).unwrap();
        assert_eq!(estimate.latent_dimension, 2);
        assert_eq!(estimate.variance_percentage, 50.0);
        assert_eq!(
            estimate.description,
            "All components together only explain 50.0% of variance."
        );
    }

    #[test]
    fn test_comparison_is_strict() {
        // 0.5 equals the threshold and does not count
        let estimate = estimate_latent_dimension(&[0.5, 0.75, 1.0], 0.5).unwrap();
        assert_eq!(estimate.latent_dimension, 2);

        // Last value equals the threshold: no component strictly above it
        let estimate = estimate_latent_dimension(&[0.25, 0.5], 0.5).unwrap();
        assert_eq!(estimate.latent_dimension, 2);
        assert_eq!(estimate.variance_percentage, 50.0);
        assert_eq!(
            estimate.description,
            "All components together explain exactly 50.0% of variance."
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            estimate_latent_dimension(&[], 0.9),
            Err(PipelineError::Variance(_))
        ));
        assert!(estimate_latent_dimension(&[0.5], 0.0).is_err());
        assert!(estimate_latent_dimension(&[0.5], 1.5).is_err());
        assert!(estimate_latent_dimension(&[0.5], f64::NAN).is_err());
    }

    #[test]
    fn test_cumulative_sum() {
        assert_eq!(cumulative_sum(&[0.5, 0.25, 0.125]), vec![0.5, 0.75, 0.875]);
        assert!(cumulative_sum(&[]).is_empty());
    }

    fn cumulative() -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(0.0f64..0.3, 1..20).prop_map(|ratios| cumulative_sum(&ratios))
    }

    proptest! {
        #[test]
        fn prop_dimension_within_bounds(cs in cumulative(), t in 0.01f64..=1.0) {
            let estimate = estimate_latent_dimension(&cs, t).unwrap();
            prop_assert!(estimate.latent_dimension >= 1);
            prop_assert!(estimate.latent_dimension as usize <= cs.len());
        }

        #[test]
        fn prop_reported_component_is_first_above_threshold(cs in cumulative(), t in 0.01f64..=1.0) {
            let estimate = estimate_latent_dimension(&cs, t).unwrap();
            let n = estimate.latent_dimension as usize;
            if cs[cs.len() - 1] > t {
                prop_assert!(cs[n - 1] > t);
                prop_assert!(cs[..n - 1].iter().all(|&v| v <= t));
                prop_assert_eq!(estimate.variance_percentage, t * 100.0);
            } else {
                prop_assert_eq!(n, cs.len());
                prop_assert_eq!(estimate.variance_percentage, cs[cs.len() - 1] * 100.0);
            }
        }
    }
}
