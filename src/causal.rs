use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::CausalConfig;
use crate::error::{EngineError, EngineResult};
use crate::linalg;

const EPSILON: f64 = 1e-10;
const Z_95: f64 = 1.96;

/// One logged (context, action, outcome) row. Immutable once ingested apart
/// from the outcome clamp applied at the door.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalObservation {
    pub features: Vec<f64>,
    pub treatment: u8,
    pub outcome: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AteEstimate {
    pub ate: f64,
    pub standard_error: f64,
    pub confidence_interval: (f64, f64),
    pub p_value: f64,
    pub significant: bool,
    pub sample_size: usize,
    /// Kish effective sample size under the inverse-probability weights.
    pub effective_sample_size: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CateEstimate {
    pub cate: f64,
    pub standard_error: f64,
    pub confidence_interval: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropensityDiagnostics {
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub treatment_mean: f64,
    pub control_mean: f64,
    /// Histogram overlap of the two arms' propensity distributions.
    pub overlap: f64,
    /// AUC of the propensity model as a treatment classifier. Near 0.5 means
    /// good covariate balance; near 1.0 means the arms barely overlap and
    /// ATE estimates should not be trusted.
    pub auc: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyComparison {
    pub difference: f64,
    pub standard_error: f64,
    pub confidence_interval: (f64, f64),
    pub p_value: f64,
    pub significant: bool,
    pub sample_size_a: usize,
    pub sample_size_b: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FittedModel {
    propensity_weights: Vec<f64>,
    outcome_weights_treatment: Vec<f64>,
    outcome_weights_control: Vec<f64>,
    residual_variance_treatment: f64,
    residual_variance_control: f64,
}

/// Standalone inverse-probability weight: the propensity is clipped to the
/// band before inversion so a mis-logged score cannot explode the weight.
pub fn compute_ipw_weight(treatment: u8, propensity: f64, min: f64, max: f64) -> f64 {
    let e = propensity.clamp(min, max);
    if treatment == 1 {
        1.0 / e
    } else {
        1.0 / (1.0 - e)
    }
}

/// Offline estimator of whether a candidate policy causally improves
/// outcomes versus a baseline, correcting for non-random assignment via
/// propensity scores. Runs out-of-band over accumulated records; nothing
/// here touches the online loop.
pub struct CausalEvaluator {
    config: CausalConfig,
    observations: Vec<CausalObservation>,
    feature_dim: Option<usize>,
    model: Option<FittedModel>,
}

impl CausalEvaluator {
    pub fn new(config: CausalConfig) -> Self {
        Self {
            config,
            observations: Vec::new(),
            feature_dim: None,
            model: None,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    /// Validates and ingests one observation. Fails before mutation: a
    /// rejected row leaves the dataset untouched.
    pub fn add_observation(
        &mut self,
        features: Vec<f64>,
        treatment: u8,
        outcome: f64,
        ts: i64,
    ) -> EngineResult<()> {
        if features.is_empty() {
            return Err(EngineError::EmptyFeatures);
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidInput(
                "features must be finite".into(),
            ));
        }
        if treatment > 1 {
            return Err(EngineError::InvalidInput(format!(
                "treatment must be 0 or 1, got {treatment}"
            )));
        }
        if !outcome.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "outcome must be finite, got {outcome}"
            )));
        }
        if let Some(dim) = self.feature_dim {
            if features.len() != dim {
                return Err(EngineError::DimensionMismatch {
                    expected: dim,
                    actual: features.len(),
                });
            }
        } else {
            self.feature_dim = Some(features.len());
        }

        self.observations.push(CausalObservation {
            features,
            treatment,
            outcome: outcome.clamp(-1.0, 1.0),
            ts,
        });
        Ok(())
    }

    /// Trains the propensity model (logistic regression) and the per-arm
    /// outcome models (ridge). Below the sample minimums this fails with a
    /// retryable insufficient-data error and any previously fitted model is
    /// left in place.
    pub fn fit(&mut self) -> EngineResult<()> {
        let n = self.observations.len();
        if n < self.config.min_samples {
            return Err(EngineError::InsufficientData {
                context: "observations",
                required: self.config.min_samples,
                actual: n,
            });
        }
        let treated = self
            .observations
            .iter()
            .filter(|o| o.treatment == 1)
            .count();
        let control = n - treated;
        let smallest_arm = treated.min(control);
        if smallest_arm < self.config.min_arm_samples {
            return Err(EngineError::InsufficientData {
                context: "samples in the smaller treatment arm",
                required: self.config.min_arm_samples,
                actual: smallest_arm,
            });
        }

        let propensity_weights = self.fit_propensity();
        let (outcome_weights_treatment, residual_variance_treatment) = self.fit_outcome_arm(1);
        let (outcome_weights_control, residual_variance_control) = self.fit_outcome_arm(0);

        self.model = Some(FittedModel {
            propensity_weights,
            outcome_weights_treatment,
            outcome_weights_control,
            residual_variance_treatment,
            residual_variance_control,
        });
        Ok(())
    }

    /// Average treatment effect via inverse-probability weighting with the
    /// configured propensity clip. The confidence interval strictly
    /// straddles the point estimate.
    pub fn estimate_ate(&self) -> EngineResult<AteEstimate> {
        let model = self.fitted()?;
        let n = self.observations.len();

        let mut scores = Vec::with_capacity(n);
        let mut sum_weights = 0.0;
        let mut sum_weights_squared = 0.0;

        for obs in &self.observations {
            let e = self.propensity_from(model, &obs.features);
            let w = compute_ipw_weight(
                obs.treatment,
                e,
                self.config.propensity_min,
                self.config.propensity_max,
            );
            let score = if obs.treatment == 1 {
                w * obs.outcome
            } else {
                -w * obs.outcome
            };
            scores.push(score);
            sum_weights += w;
            sum_weights_squared += w * w;
        }

        let effective_n = if sum_weights_squared > 0.0 {
            (sum_weights * sum_weights) / sum_weights_squared
        } else {
            n as f64
        };

        let ate = mean(&scores);
        let se = (sample_variance(&scores) / n as f64).sqrt().max(EPSILON);
        let z = ate.abs() / se;
        let p_value = 2.0 * (1.0 - normal_cdf(z));

        Ok(AteEstimate {
            ate,
            standard_error: se,
            confidence_interval: (ate - Z_95 * se, ate + Z_95 * se),
            p_value,
            significant: p_value < 0.05,
            sample_size: n,
            effective_sample_size: effective_n,
        })
    }

    /// Conditional effect at one feature point from the outcome-model
    /// contrast. The interval is widened with the point's distance from the
    /// bulk of the data: the further from support, the less the models know.
    pub fn estimate_cate(&self, features: &[f64]) -> EngineResult<CateEstimate> {
        let model = self.fitted()?;
        self.check_features(features)?;

        let mu1 = predict(&model.outcome_weights_treatment, features);
        let mu0 = predict(&model.outcome_weights_control, features);
        let cate = mu1 - mu0;

        let base_variance =
            model.residual_variance_treatment + model.residual_variance_control + EPSILON;
        let inflation = 1.0 + self.distance_from_support(features);
        let se = base_variance.sqrt() * inflation;

        Ok(CateEstimate {
            cate,
            standard_error: se,
            confidence_interval: (cate - Z_95 * se, cate + Z_95 * se),
        })
    }

    /// Overlap and balance diagnostics. Reports only: a poor overlap is the
    /// caller's cue to distrust `estimate_ate`, not an error here.
    pub fn diagnose_propensity(&self) -> EngineResult<PropensityDiagnostics> {
        let model = self.fitted()?;

        let scores: Vec<f64> = self
            .observations
            .iter()
            .map(|o| self.propensity_from(model, &o.features))
            .collect();
        let treatment_scores: Vec<f64> = self
            .observations
            .iter()
            .filter(|o| o.treatment == 1)
            .map(|o| self.propensity_from(model, &o.features))
            .collect();
        let control_scores: Vec<f64> = self
            .observations
            .iter()
            .filter(|o| o.treatment == 0)
            .map(|o| self.propensity_from(model, &o.features))
            .collect();

        let labels: Vec<u8> = self.observations.iter().map(|o| o.treatment).collect();

        Ok(PropensityDiagnostics {
            mean: mean(&scores),
            std: sample_variance(&scores).sqrt(),
            median: median(&scores),
            treatment_mean: if treatment_scores.is_empty() {
                0.5
            } else {
                mean(&treatment_scores)
            },
            control_mean: if control_scores.is_empty() {
                0.5
            } else {
                mean(&control_scores)
            },
            overlap: histogram_overlap(&treatment_scores, &control_scores),
            auc: compute_auc(&scores, &labels),
        })
    }

    /// Difference test between two outcome groups (Welch), with the same
    /// statistical contract as [`Self::estimate_ate`].
    pub fn compare_strategies(
        &self,
        outcomes_a: &[f64],
        outcomes_b: &[f64],
    ) -> EngineResult<StrategyComparison> {
        if outcomes_a.iter().chain(outcomes_b).any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidInput("outcomes must be finite".into()));
        }
        let min = self.config.min_arm_samples;
        let smallest = outcomes_a.len().min(outcomes_b.len());
        if smallest < min {
            return Err(EngineError::InsufficientData {
                context: "outcomes in the smaller strategy group",
                required: min,
                actual: smallest,
            });
        }

        let difference = mean(outcomes_a) - mean(outcomes_b);
        let se = (sample_variance(outcomes_a) / outcomes_a.len() as f64
            + sample_variance(outcomes_b) / outcomes_b.len() as f64)
            .sqrt()
            .max(EPSILON);
        let z = difference.abs() / se;
        let p_value = 2.0 * (1.0 - normal_cdf(z));

        Ok(StrategyComparison {
            difference,
            standard_error: se,
            confidence_interval: (difference - Z_95 * se, difference + Z_95 * se),
            p_value,
            significant: p_value < 0.05,
            sample_size_a: outcomes_a.len(),
            sample_size_b: outcomes_b.len(),
        })
    }

    /// Bootstrap standard error of the ATE over seeded resamples, in
    /// parallel. Resamples whose arms collapse are skipped; too few
    /// surviving resamples is an insufficient-data error.
    pub fn bootstrap_se(&self, n_bootstrap: usize) -> EngineResult<f64> {
        self.fitted()?;
        let n = self.observations.len();

        let estimates: Vec<f64> = (0..n_bootstrap)
            .into_par_iter()
            .filter_map(|seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
                let mut resampled = CausalEvaluator::new(self.config.clone());
                for _ in 0..n {
                    let obs = &self.observations[rng.gen_range(0..n)];
                    resampled
                        .add_observation(
                            obs.features.clone(),
                            obs.treatment,
                            obs.outcome,
                            obs.ts,
                        )
                        .ok()?;
                }
                resampled.fit().ok()?;
                resampled.estimate_ate().ok().map(|e| e.ate)
            })
            .collect();

        if estimates.len() < 10 {
            return Err(EngineError::InsufficientData {
                context: "successful bootstrap resamples",
                required: 10,
                actual: estimates.len(),
            });
        }
        Ok(sample_variance(&estimates).sqrt())
    }

    pub fn propensity_score(&self, features: &[f64]) -> EngineResult<f64> {
        let model = self.fitted()?;
        self.check_features(features)?;
        Ok(self.propensity_from(model, features))
    }

    pub fn export_dataset(&self) -> Vec<CausalObservation> {
        self.observations.clone()
    }

    pub fn import_dataset(&mut self, observations: Vec<CausalObservation>) -> EngineResult<()> {
        let mut staged = CausalEvaluator::new(self.config.clone());
        for obs in observations {
            staged.add_observation(obs.features, obs.treatment, obs.outcome, obs.ts)?;
        }
        self.observations = staged.observations;
        self.feature_dim = staged.feature_dim;
        self.model = None;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.observations.clear();
        self.feature_dim = None;
        self.model = None;
    }

    fn fitted(&self) -> EngineResult<&FittedModel> {
        self.model
            .as_ref()
            .ok_or_else(|| EngineError::InvalidInput("fit() has not succeeded yet".into()))
    }

    fn check_features(&self, features: &[f64]) -> EngineResult<()> {
        if features.is_empty() {
            return Err(EngineError::EmptyFeatures);
        }
        if features.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::InvalidInput("features must be finite".into()));
        }
        if let Some(dim) = self.feature_dim {
            if features.len() != dim {
                return Err(EngineError::DimensionMismatch {
                    expected: dim,
                    actual: features.len(),
                });
            }
        }
        Ok(())
    }

    fn propensity_from(&self, model: &FittedModel, features: &[f64]) -> f64 {
        let raw = sigmoid(predict(&model.propensity_weights, features));
        raw.clamp(self.config.propensity_min, self.config.propensity_max)
    }

    /// Logistic regression by gradient descent with L2 regularization
    /// (intercept unregularized) and a convergence check.
    fn fit_propensity(&self) -> Vec<f64> {
        let n = self.observations.len();
        let d = self.feature_dim.unwrap_or(0) + 1;
        let mut weights = vec![0.0; d];
        let mut prev_loss = f64::INFINITY;

        for _ in 0..self.config.max_iterations {
            let mut gradients = vec![0.0; d];
            let mut loss = 0.0;

            for obs in &self.observations {
                let x = with_bias(&obs.features);
                let pred = sigmoid(linalg::dot(&x, &weights));
                let t = obs.treatment as f64;
                loss += -t * (pred + EPSILON).ln() - (1.0 - t) * (1.0 - pred + EPSILON).ln();

                let error = pred - t;
                for j in 0..d {
                    gradients[j] += error * x[j];
                }
            }

            for j in 0..(d - 1) {
                loss += (self.config.regularization / 2.0) * weights[j] * weights[j];
                gradients[j] += self.config.regularization * weights[j];
            }

            for j in 0..d {
                weights[j] -= self.config.learning_rate * gradients[j] / n as f64;
            }

            if (prev_loss - loss).abs() < self.config.convergence_threshold {
                break;
            }
            prev_loss = loss;
        }

        weights
    }

    /// Ridge outcome model for one arm, solved by Cholesky, plus the
    /// in-sample residual variance that feeds the CATE uncertainty.
    fn fit_outcome_arm(&self, treatment: u8) -> (Vec<f64>, f64) {
        let rows: Vec<&CausalObservation> = self
            .observations
            .iter()
            .filter(|o| o.treatment == treatment)
            .collect();
        let d = self.feature_dim.unwrap_or(0) + 1;
        if rows.is_empty() {
            return (vec![0.0; d], 0.0);
        }

        let mut xtx = vec![0.0; d * d];
        let mut xty = vec![0.0; d];
        for obs in &rows {
            let x = with_bias(&obs.features);
            linalg::rank1_update(&mut xtx, &x, d);
            linalg::vec_add_scaled(&mut xty, &x, obs.outcome);
        }
        for i in 0..(d - 1) {
            xtx[i * d + i] += self.config.regularization * rows.len() as f64;
        }

        let l = linalg::cholesky_decompose(&xtx, d);
        let weights = linalg::solve_cholesky(&l, &xty, d);

        let residual_variance = rows
            .iter()
            .map(|obs| {
                let fitted = predict(&weights, &obs.features);
                (obs.outcome - fitted) * (obs.outcome - fitted)
            })
            .sum::<f64>()
            / rows.len() as f64;

        (weights, residual_variance)
    }

    /// Normalized Euclidean distance from the dataset's mean feature point.
    fn distance_from_support(&self, features: &[f64]) -> f64 {
        let n = self.observations.len();
        if n == 0 {
            return 1.0;
        }
        let dim = features.len();
        let mut centroid = vec![0.0; dim];
        for obs in &self.observations {
            for (c, v) in centroid.iter_mut().zip(obs.features.iter()) {
                *c += v;
            }
        }
        for c in centroid.iter_mut() {
            *c /= n as f64;
        }
        let dist: f64 = centroid
            .iter()
            .zip(features.iter())
            .map(|(c, v)| (c - v) * (c - v))
            .sum::<f64>()
            .sqrt();
        dist / (dim as f64).sqrt()
    }
}

impl Default for CausalEvaluator {
    fn default() -> Self {
        Self::new(CausalConfig::default())
    }
}

fn with_bias(features: &[f64]) -> Vec<f64> {
    let mut x = features.to_vec();
    x.push(1.0);
    x
}

fn predict(weights: &[f64], features: &[f64]) -> f64 {
    linalg::dot(&with_bias(features), weights)
}

fn sigmoid(x: f64) -> f64 {
    if x > 20.0 {
        1.0 - EPSILON
    } else if x < -20.0 {
        EPSILON
    } else {
        1.0 / (1.0 + (-x).exp())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (values.len() - 1) as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Abramowitz–Stegun approximation of the standard normal CDF.
fn normal_cdf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0
        - (a1 * t + a2 * t.powi(2) + a3 * t.powi(3) + a4 * t.powi(4) + a5 * t.powi(5))
            * (-x * x / 2.0).exp();

    0.5 * (1.0 + sign * y)
}

fn histogram_overlap(scores_a: &[f64], scores_b: &[f64]) -> f64 {
    if scores_a.is_empty() || scores_b.is_empty() {
        return 0.0;
    }
    let bins = 20;
    let mut hist_a = vec![0.0; bins];
    let mut hist_b = vec![0.0; bins];

    for &s in scores_a {
        let bin = ((s * bins as f64) as usize).min(bins - 1);
        hist_a[bin] += 1.0 / scores_a.len() as f64;
    }
    for &s in scores_b {
        let bin = ((s * bins as f64) as usize).min(bins - 1);
        hist_b[bin] += 1.0 / scores_b.len() as f64;
    }

    hist_a
        .iter()
        .zip(hist_b.iter())
        .map(|(a, b)| a.min(*b))
        .sum()
}

fn compute_auc(scores: &[f64], labels: &[u8]) -> f64 {
    if scores.len() != labels.len() || scores.is_empty() {
        return 0.5;
    }
    let n_pos = labels.iter().filter(|&&l| l == 1).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut pairs: Vec<(f64, u8)> = scores.iter().copied().zip(labels.iter().copied()).collect();
    pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut auc = 0.0;
    let mut tp_sum = 0.0;
    for (_, label) in pairs {
        if label == 1 {
            tp_sum += 1.0;
        } else {
            auc += tp_sum;
        }
    }
    auc / (n_pos as f64 * n_neg as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic dataset with confounded assignment and a known effect of
    /// +0.5 on the treated arm.
    fn synthetic_observations(n: usize, seed: u64) -> Vec<(Vec<f64>, u8, f64)> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut rows = Vec::with_capacity(n);
        for _ in 0..n {
            let x1: f64 = rng.gen_range(-1.0..1.0);
            let x2: f64 = rng.gen_range(-1.0..1.0);
            let true_propensity = 1.0 / (1.0 + (-0.5 * x1 + 0.3 * x2).exp());
            let treatment = u8::from(rng.gen::<f64>() < true_propensity);
            let base = 0.2 * x1 - 0.1 * x2;
            let effect = if treatment == 1 { 0.5 } else { 0.0 };
            let noise: f64 = rng.gen_range(-0.1..0.1);
            rows.push((vec![x1, x2], treatment, (base + effect + noise).clamp(-1.0, 1.0)));
        }
        rows
    }

    fn fitted_evaluator(n: usize, seed: u64) -> CausalEvaluator {
        let mut evaluator = CausalEvaluator::default();
        for (i, (features, treatment, outcome)) in
            synthetic_observations(n, seed).into_iter().enumerate()
        {
            evaluator
                .add_observation(features, treatment, outcome, i as i64 + 1)
                .unwrap();
        }
        evaluator.fit().unwrap();
        evaluator
    }

    #[test]
    fn ipw_weight_formula() {
        assert!((compute_ipw_weight(1, 0.5, 0.05, 0.95) - 2.0).abs() < 1e-12);
        assert!((compute_ipw_weight(0, 0.5, 0.05, 0.95) - 2.0).abs() < 1e-12);
        assert!((compute_ipw_weight(1, 0.01, 0.05, 0.95) - 20.0).abs() < 1e-12);
        assert!((compute_ipw_weight(0, 0.99, 0.05, 0.95) - 20.0).abs() < 1e-12);
    }

    #[test]
    fn add_observation_validates_inputs() {
        let mut evaluator = CausalEvaluator::default();
        assert_eq!(
            evaluator.add_observation(vec![], 1, 0.5, 1).unwrap_err(),
            EngineError::EmptyFeatures
        );
        assert!(evaluator
            .add_observation(vec![f64::NAN, 0.1], 1, 0.5, 1)
            .is_err());
        assert!(evaluator.add_observation(vec![0.1, 0.2], 2, 0.5, 1).is_err());
        assert!(evaluator
            .add_observation(vec![0.1, 0.2], 1, f64::INFINITY, 1)
            .is_err());

        evaluator.add_observation(vec![0.1, 0.2], 1, 3.0, 1).unwrap();
        // Outcome clamped at ingestion.
        assert_eq!(evaluator.export_dataset()[0].outcome, 1.0);

        let err = evaluator
            .add_observation(vec![0.1, 0.2, 0.3], 0, 0.5, 2)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(evaluator.len(), 1);
    }

    #[test]
    fn fit_guards_minimum_samples() {
        let mut evaluator = CausalEvaluator::default();
        for i in 0..5 {
            evaluator
                .add_observation(vec![0.1, 0.2], (i % 2) as u8, 0.3, i + 1)
                .unwrap();
        }
        let err = evaluator.fit().unwrap_err();
        assert!(err.is_retryable());
        assert!(!evaluator.is_fitted());
    }

    #[test]
    fn fit_guards_minimum_arm_samples() {
        let mut evaluator = CausalEvaluator::default();
        // 11 treated, 1 control.
        for i in 0..11 {
            evaluator
                .add_observation(vec![0.1, 0.2], 1, 0.3, i + 1)
                .unwrap();
        }
        evaluator.add_observation(vec![0.1, 0.2], 0, 0.3, 12).unwrap();
        let err = evaluator.fit().unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                context: "samples in the smaller treatment arm",
                ..
            }
        ));
        assert!(!evaluator.is_fitted());
    }

    #[test]
    fn failed_fit_leaves_previous_model_usable() {
        let mut evaluator = fitted_evaluator(200, 42);
        let before = evaluator.estimate_ate().unwrap().ate;

        // A wave of treated-only rows unbalances the arms enough that a
        // bigger minimum would fail; simulate by shrinking thresholds the
        // other way: force a failure with a fresh config requirement.
        evaluator.config.min_samples = 10_000;
        assert!(evaluator.fit().is_err());

        let after = evaluator.estimate_ate().unwrap().ate;
        assert_eq!(before, after);
    }

    #[test]
    fn ate_recovers_known_effect() {
        let evaluator = fitted_evaluator(400, 42);
        let estimate = evaluator.estimate_ate().unwrap();
        assert!(
            (estimate.ate - 0.5).abs() < 0.15,
            "ate {} too far from 0.5",
            estimate.ate
        );
        assert!(estimate.significant);
        assert!(estimate.effective_sample_size > 0.0);
        assert!(estimate.effective_sample_size <= estimate.sample_size as f64);
    }

    #[test]
    fn ate_interval_strictly_straddles_estimate() {
        let evaluator = fitted_evaluator(200, 7);
        let estimate = evaluator.estimate_ate().unwrap();
        assert!(estimate.confidence_interval.0 < estimate.ate);
        assert!(estimate.ate < estimate.confidence_interval.1);
        assert!(estimate.standard_error > 0.0);
    }

    #[test]
    fn estimate_before_fit_is_rejected() {
        let evaluator = CausalEvaluator::default();
        assert!(evaluator.estimate_ate().is_err());
        assert!(evaluator.diagnose_propensity().is_err());
        assert!(evaluator.estimate_cate(&[0.1, 0.2]).is_err());
    }

    #[test]
    fn cate_is_wider_far_from_support() {
        let evaluator = fitted_evaluator(300, 11);
        let near = evaluator.estimate_cate(&[0.0, 0.0]).unwrap();
        let far = evaluator.estimate_cate(&[50.0, -50.0]).unwrap();
        assert!(far.standard_error > near.standard_error);
        assert!(near.confidence_interval.0 < near.cate);
        assert!(near.cate < near.confidence_interval.1);
    }

    #[test]
    fn cate_checks_dimensions() {
        let evaluator = fitted_evaluator(100, 3);
        assert!(matches!(
            evaluator.estimate_cate(&[0.1]).unwrap_err(),
            EngineError::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn diagnostics_are_bounded() {
        let evaluator = fitted_evaluator(300, 42);
        let diag = evaluator.diagnose_propensity().unwrap();
        assert!((0.0..=1.0).contains(&diag.mean));
        assert!((0.0..=1.0).contains(&diag.median));
        assert!((0.0..=1.0).contains(&diag.overlap));
        assert!((0.0..=1.0).contains(&diag.auc));
        assert!(diag.std >= 0.0);
        // Confounded assignment: the model should separate arms a bit
        // better than chance, but the arms still overlap.
        assert!(diag.overlap > 0.2);
    }

    #[test]
    fn compare_strategies_contract() {
        let evaluator = CausalEvaluator::default();
        let a = vec![0.8, 0.7, 0.9, 0.75, 0.85, 0.8];
        let b = vec![0.2, 0.3, 0.25, 0.35, 0.3, 0.2];
        let comparison = evaluator.compare_strategies(&a, &b).unwrap();
        assert!(comparison.difference > 0.4);
        assert!(comparison.significant);
        assert!(comparison.confidence_interval.0 < comparison.difference);
        assert!(comparison.difference < comparison.confidence_interval.1);

        assert!(evaluator.compare_strategies(&[0.5], &b).is_err());
        assert!(evaluator
            .compare_strategies(&[f64::NAN, 0.5], &b)
            .is_err());
    }

    #[test]
    fn bootstrap_se_is_positive_and_finite() {
        let evaluator = fitted_evaluator(120, 42);
        let se = evaluator.bootstrap_se(40).unwrap();
        assert!(se.is_finite());
        assert!(se >= 0.0);
    }

    #[test]
    fn dataset_round_trips_through_export() {
        let evaluator = fitted_evaluator(50, 5);
        let dataset = evaluator.export_dataset();

        let mut restored = CausalEvaluator::default();
        restored.import_dataset(dataset).unwrap();
        assert_eq!(restored.len(), 50);
        assert!(!restored.is_fitted());
        restored.fit().unwrap();
        assert!(restored.estimate_ate().is_ok());
    }

    #[test]
    fn normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 0.01);
        assert!((normal_cdf(1.96) - 0.975).abs() < 0.01);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 0.01);
    }
}
