use crate::estimate::EstimationError;
use crate::model::LinkFunction;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use ndarray_linalg::{Inverse, Solve};
use serde::{Deserialize, Serialize};

/// Linear predictors beyond this magnitude put fitted probabilities within ~3e-7 of 0 or 1.
/// A converged fit that reaches it only draws a warning. An unconverged one is treated as
/// coefficients running off towards infinity.
pub const SEPARATION_ETA: f64 = 15.0;

const MAX_STEP_HALVINGS: usize = 30;

/// Iteration budget and stopping rule for IRLS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrlsOptions {
    pub max_iterations: usize,
    /// Convergence is declared when `|dev - dev_old| / (|dev| + 0.1)` drops below this.
    pub tolerance: f64,
}

impl Default for IrlsOptions {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tolerance: 1e-8,
        }
    }
}

/// Holds the result of a converged IRLS fit.
///
/// * `beta`: coefficient vector in design-matrix column order.
/// * `covariance`: inverse Fisher information `(X'WX)^-1` at the final weights.
/// * `deviance`: the binomial deviance, -2 * log-likelihood for 0/1 outcomes.
/// * `final_weights`: the IRLS weights `mu * (1 - mu)` at convergence.
#[derive(Clone, Debug)]
pub struct IrlsResult {
    pub beta: Array1<f64>,
    pub covariance: Array2<f64>,
    pub deviance: f64,
    pub iterations: usize,
    pub max_abs_eta: f64,
    pub final_weights: Array1<f64>,
}

/// Fits a binomial GLM by iteratively reweighted least squares.
///
/// Each iteration solves the weighted normal equations `X'WX beta = X'Wz` for the
/// working response `z`. Steps that increase the deviance (or produce non-finite
/// values) are halved back towards the previous coefficients. Complete separation
/// is caught as soon as the current linear predictor classifies every observation
/// correctly; quasi-complete separation shows up as runaway linear predictors.
pub fn fit_glm(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    link: LinkFunction,
    options: &IrlsOptions,
) -> Result<IrlsResult, EstimationError> {
    log::debug!(
        "Starting IRLS: {} observations, {} coefficients, budget {} iterations",
        x.nrows(),
        x.ncols(),
        options.max_iterations
    );

    // Start from mu = (y + 0.5) / 2, as the binomial family does.
    let mu_start = y.mapv(|yi| (yi + 0.5) / 2.0);
    let mut eta = mu_start.mapv(|m| (m / (1.0 - m)).ln());
    let mut deviance = calculate_deviance(y, &mu_start);
    let mut beta: Option<Array1<f64>> = None;
    let mut last_change = f64::INFINITY;

    for iteration in 1..=options.max_iterations {
        let (_, weights, z) = update_glm_vectors(y, &eta, link);
        let xtwx = weighted_crossproduct(x, &weights);
        let xtwz = x.t().dot(&(&weights * &z));
        let proposal = xtwx
            .solve_into(xtwz)
            .map_err(EstimationError::LinearSystemSolveFailed)?;

        let (beta_new, eta_new, deviance_new) =
            step_with_halving(x, y, link, proposal, beta.as_ref(), deviance, options)?;

        last_change = (deviance_new - deviance).abs() / (deviance_new.abs() + 0.1);
        log::debug!(
            "IRLS iteration {iteration}: deviance {deviance_new:.8}, relative change {last_change:.3e}"
        );

        if separates_completely(y, &eta_new) {
            return Err(EstimationError::PerfectSeparation {
                detail: "the linear predictor classifies every observation correctly".to_string(),
            });
        }

        beta = Some(beta_new);
        eta = eta_new;
        deviance = deviance_new;

        if last_change < options.tolerance {
            let max_abs_eta = eta.iter().fold(0.0_f64, |acc, e| acc.max(e.abs()));
            if max_abs_eta > SEPARATION_ETA {
                log::warn!(
                    "Fitted probabilities numerically 0 or 1 occurred (max |eta| {max_abs_eta:.1})."
                );
            }

            let (_, final_weights, _) = update_glm_vectors(y, &eta, link);
            let covariance = weighted_crossproduct(x, &final_weights)
                .inv()
                .map_err(EstimationError::LinearSystemSolveFailed)?;

            log::info!("IRLS converged after {iteration} iterations, deviance {deviance:.4}");
            return Ok(IrlsResult {
                beta: beta.unwrap_or_else(|| Array1::zeros(x.ncols())),
                covariance,
                deviance,
                iterations: iteration,
                max_abs_eta,
                final_weights,
            });
        }
    }

    let max_abs_eta = eta.iter().fold(0.0_f64, |acc, e| acc.max(e.abs()));
    log::warn!(
        "IRLS FAILED to converge after {} iterations (max |eta| {:.1}).",
        options.max_iterations,
        max_abs_eta
    );
    if max_abs_eta > SEPARATION_ETA {
        return Err(EstimationError::PerfectSeparation {
            detail: format!("coefficients diverge (|eta| reached {max_abs_eta:.1})"),
        });
    }
    Err(EstimationError::NonConvergence {
        max_iterations: options.max_iterations,
        last_change,
    })
}

/// Accepts the proposed coefficients, halving the step towards `previous` while the
/// deviance is non-finite or has increased.
fn step_with_halving(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    link: LinkFunction,
    proposal: Array1<f64>,
    previous: Option<&Array1<f64>>,
    deviance_old: f64,
    options: &IrlsOptions,
) -> Result<(Array1<f64>, Array1<f64>, f64), EstimationError> {
    let mut candidate = proposal;
    for halving in 0..=MAX_STEP_HALVINGS {
        let eta = x.dot(&candidate);
        let mu = eta.mapv(|e| link.inverse(e));
        let deviance = calculate_deviance(y, &mu);

        let increased = (deviance - deviance_old) / (deviance.abs() + 0.1) > options.tolerance;
        let acceptable = deviance.is_finite() && candidate.iter().all(|b| b.is_finite());
        match previous {
            Some(beta_old) if !acceptable || increased => {
                log::debug!("Step halving {halving}: deviance {deviance:.6} vs {deviance_old:.6}");
                candidate = (&candidate + beta_old) * 0.5;
            }
            None if !acceptable => break,
            _ => return Ok((candidate, eta, deviance)),
        }
    }
    Err(EstimationError::NonConvergence {
        max_iterations: options.max_iterations,
        last_change: f64::NAN,
    })
}

/// `X' diag(w) X`.
fn weighted_crossproduct(x: ArrayView2<f64>, weights: &Array1<f64>) -> Array2<f64> {
    let weighted = &x * &weights.view().insert_axis(Axis(1));
    x.t().dot(&weighted)
}

/// True when the sign of the linear predictor reproduces every outcome.
fn separates_completely(y: ArrayView1<f64>, eta: &Array1<f64>) -> bool {
    Zip::from(y)
        .and(eta)
        .all(|&yi, &ei| (yi > 0.5 && ei > 0.0) || (yi < 0.5 && ei < 0.0))
}

/// Computes the fitted mean, the IRLS weights and the working response for the
/// current linear predictor.
pub fn update_glm_vectors(
    y: ArrayView1<f64>,
    eta: &Array1<f64>,
    link: LinkFunction,
) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    const MIN_WEIGHT: f64 = 1e-10;

    match link {
        LinkFunction::Logit => {
            // Clamp eta to prevent overflow in exp
            let eta_clamped = eta.mapv(|e| e.clamp(-700.0, 700.0));
            let mu = eta_clamped.mapv(|e| link.inverse(e));
            let weights = (&mu * (1.0 - &mu)).mapv(|v| v.max(MIN_WEIGHT));
            let residual = &y - &mu;
            let z = &eta_clamped + &(&residual / &weights);
            (mu, weights, z)
        }
    }
}

/// Binomial deviance of fitted probabilities `mu` for 0/1 outcomes `y`.
pub fn calculate_deviance(y: ArrayView1<f64>, mu: &Array1<f64>) -> f64 {
    const EPS: f64 = 1e-300;
    Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
        // Difference of logs rather than log of a ratio for stability.
        let term1 = if yi > 0.0 {
            yi * (yi.ln() - mui.max(EPS).ln())
        } else {
            0.0
        };
        let term2 = if yi < 1.0 {
            (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui).max(EPS).ln())
        } else {
            0.0
        };
        acc + 2.0 * (term1 + term2)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn with_intercept(column: &[f64]) -> Array2<f64> {
        let mut x = Array2::ones((column.len(), 2));
        for (i, &v) in column.iter().enumerate() {
            x[[i, 1]] = v;
        }
        x
    }

    #[test]
    fn intercept_only_fit_recovers_log_odds() {
        let y = array![1.0, 1.0, 1.0, 0.0];
        let x = Array2::ones((4, 1));
        let fit = fit_glm(x.view(), y.view(), LinkFunction::Logit, &IrlsOptions::default())
            .unwrap();
        assert_abs_diff_eq!(fit.beta[0], 3.0_f64.ln(), epsilon = 1e-6);
        // Var(beta0) = 1 / (n p (1 - p)) = 1 / (4 * 0.75 * 0.25).
        assert_abs_diff_eq!(fit.covariance[[0, 0]], 1.0 / 0.75, epsilon = 1e-5);
    }

    #[test]
    fn single_binary_predictor_matches_closed_form() {
        // Group x = 0: 2 of 6 positive; group x = 1: 4 of 5 positive.
        let xs = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let y = array![1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0];
        let x = with_intercept(&xs);
        let fit = fit_glm(x.view(), y.view(), LinkFunction::Logit, &IrlsOptions::default())
            .unwrap();

        let intercept = (2.0_f64 / 4.0).ln();
        let slope = (4.0_f64 / 1.0).ln() - intercept;
        assert_abs_diff_eq!(fit.beta[0], intercept, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.beta[1], slope, epsilon = 1e-6);

        // Standard errors from cell counts: sqrt(1/a + 1/b + 1/c + 1/d).
        let se_slope = (1.0 / 2.0 + 1.0 / 4.0 + 1.0 / 4.0 + 1.0 / 1.0_f64).sqrt();
        assert_abs_diff_eq!(fit.covariance[[1, 1]].sqrt(), se_slope, epsilon = 1e-5);
        assert!(fit.iterations <= 10);
    }

    #[test]
    fn complete_separation_is_reported() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let x = with_intercept(&xs);
        let err = fit_glm(x.view(), y.view(), LinkFunction::Logit, &IrlsOptions::default())
            .unwrap_err();
        assert!(
            matches!(err, EstimationError::PerfectSeparation { .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn wide_overlapping_predictor_converges_with_extreme_fitted_values() {
        // logit p = 0.2 x on x in [-100, 100]: the groups overlap around zero, but the
        // fitted linear predictor reaches well beyond the 0/1 warning level at the ends.
        let xs: Vec<f64> = (-100..=100).map(f64::from).collect();
        let y: Array1<f64> = xs
            .iter()
            .map(|&v| {
                let overlap = v.abs() <= 10.0 && (v as i64).rem_euclid(3) == 0;
                if (v > 0.0) != overlap { 1.0 } else { 0.0 }
            })
            .collect();
        let x = with_intercept(&xs);
        let fit = fit_glm(x.view(), y.view(), LinkFunction::Logit, &IrlsOptions::default())
            .unwrap();

        assert!(fit.beta[1] > 0.0);
        assert!(fit.max_abs_eta > SEPARATION_ETA, "max |eta| {}", fit.max_abs_eta);
        assert!(fit.beta.iter().all(|b| b.is_finite()));
    }

    #[test]
    fn exhausted_budget_is_non_convergence() {
        let xs = [0.5, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0];
        let y = array![0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0];
        let x = with_intercept(&xs);
        let options = IrlsOptions {
            max_iterations: 1,
            tolerance: 1e-14,
        };
        let err = fit_glm(x.view(), y.view(), LinkFunction::Logit, &options).unwrap_err();
        assert!(
            matches!(err, EstimationError::NonConvergence { max_iterations: 1, .. }),
            "got {err:?}"
        );
    }

    #[test]
    fn deviance_of_perfect_and_uninformative_fits() {
        let y = array![1.0, 0.0];
        assert_abs_diff_eq!(calculate_deviance(y.view(), &array![1.0, 0.0]), 0.0);
        assert_abs_diff_eq!(
            calculate_deviance(y.view(), &array![0.5, 0.5]),
            4.0 * 2.0_f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn working_response_is_consistent() {
        let y = array![1.0, 0.0];
        let eta = array![0.0, 0.0];
        let (mu, weights, z) = update_glm_vectors(y.view(), &eta, LinkFunction::Logit);
        assert_abs_diff_eq!(mu[0], 0.5);
        assert_abs_diff_eq!(weights[0], 0.25);
        assert_abs_diff_eq!(z[0], 2.0);
        assert_abs_diff_eq!(z[1], -2.0);
    }
}
