//! Weighted Levenberg–Marquardt optimizer for 1-D radial profile models.
//!
//! Minimizes the weighted residual sum Σ (wᵢ·(yᵢ − f(xᵢ)))² for small
//! fixed-size parameter vectors. The normal equations are solved with
//! Gaussian elimination and partial pivoting, which is plenty for the 2- and
//! 3-parameter models fitted here.

use crate::profile::ProfileKind;

/// Configuration for the Levenberg–Marquardt loop.
#[derive(Debug, Clone)]
pub struct LmConfig {
    /// Maximum iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the largest parameter step.
    pub convergence_threshold: f64,
    /// Initial damping parameter.
    pub initial_lambda: f64,
    /// Damping multiplier on a rejected step.
    pub lambda_up: f64,
    /// Damping multiplier on an accepted step.
    pub lambda_down: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 1e-10,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Final parameter vector.
    pub params: Vec<f64>,
    /// Final weighted chi-square.
    pub chi2: f64,
    /// Whether the parameter steps converged below threshold.
    pub converged: bool,
    /// Iterations run.
    pub iterations: usize,
}

/// A 1-D radial model that can be fitted with [`optimize`].
trait RadialModel<const N: usize> {
    fn evaluate(&self, x: f64, params: &[f64; N]) -> f64;
    fn jacobian_row(&self, x: f64, params: &[f64; N]) -> [f64; N];
    fn constrain(&self, params: &mut [f64; N]);
}

struct GaussianModel;

impl RadialModel<2> for GaussianModel {
    #[inline]
    fn evaluate(&self, x: f64, params: &[f64; 2]) -> f64 {
        let [amp, sigma] = *params;
        amp * (-x * x / (2.0 * sigma * sigma)).exp()
    }

    #[inline]
    fn jacobian_row(&self, x: f64, params: &[f64; 2]) -> [f64; 2] {
        let [amp, sigma] = *params;
        let e = (-x * x / (2.0 * sigma * sigma)).exp();
        [e, amp * e * x * x / (sigma * sigma * sigma)]
    }

    #[inline]
    fn constrain(&self, params: &mut [f64; 2]) {
        params[0] = params[0].max(0.0); // amplitude
        params[1] = params[1].max(1e-3); // sigma
    }
}

struct MoffatModel;

impl RadialModel<3> for MoffatModel {
    #[inline]
    fn evaluate(&self, x: f64, params: &[f64; 3]) -> f64 {
        let [amp, alpha, beta] = *params;
        amp * (1.0 + x * x / (alpha * alpha)).powf(-beta)
    }

    #[inline]
    fn jacobian_row(&self, x: f64, params: &[f64; 3]) -> [f64; 3] {
        let [amp, alpha, beta] = *params;
        let alpha2 = alpha * alpha;
        let u = 1.0 + x * x / alpha2;
        let ln_u = u.ln();
        let u_neg_beta = (-beta * ln_u).exp();
        let u_neg_beta_m1 = u_neg_beta / u;

        [
            u_neg_beta,
            2.0 * amp * beta * x * x / (alpha2 * alpha) * u_neg_beta_m1,
            -amp * ln_u * u_neg_beta,
        ]
    }

    #[inline]
    fn constrain(&self, params: &mut [f64; 3]) {
        params[0] = params[0].max(0.0); // amplitude
        params[1] = params[1].max(1e-3); // alpha
        params[2] = params[2].clamp(1.0, 10.0); // beta
    }
}

/// Fit `kind` to weighted `(x, y)` samples from the given starting point.
///
/// `initial` must hold `kind.n_params()` values; weights are 1/σ per sample.
pub fn fit_radial_model(
    kind: ProfileKind,
    x: &[f64],
    y: &[f64],
    w: &[f64],
    initial: &[f64],
    config: &LmConfig,
) -> LmResult {
    match kind {
        ProfileKind::Gaussian => {
            let init = [initial[0], initial[1]];
            optimize(&GaussianModel, x, y, w, init, config)
        }
        ProfileKind::Moffat => {
            let init = [initial[0], initial[1], initial[2]];
            optimize(&MoffatModel, x, y, w, init, config)
        }
    }
}

fn optimize<const N: usize, M: RadialModel<N>>(
    model: &M,
    x: &[f64],
    y: &[f64],
    w: &[f64],
    initial: [f64; N],
    config: &LmConfig,
) -> LmResult {
    let mut params = initial;
    model.constrain(&mut params);
    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = chi2(model, x, y, w, &params);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let (hessian, gradient) = normal_equations(model, x, y, w, &params);

        let mut damped = hessian;
        for (i, row) in damped.iter_mut().enumerate() {
            row[i] *= 1.0 + lambda;
        }

        let Some(delta) = solve(&damped, &gradient) else {
            break;
        };

        let mut candidate = params;
        for (p, d) in candidate.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut candidate);

        let candidate_chi2 = chi2(model, x, y, w, &candidate);

        if candidate_chi2 < prev_chi2 {
            params = candidate;
            prev_chi2 = candidate_chi2;
            lambda *= config.lambda_down;

            let max_step = delta.iter().fold(0.0f64, |a, d| a.max(d.abs()));
            if max_step < config.convergence_threshold {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                break;
            }
        }
    }

    // A chi2 plateau is convergence too: the last accepted step may have
    // landed exactly on the minimum before the threshold check ran.
    if !converged && prev_chi2 < f64::EPSILON {
        converged = true;
    }

    LmResult {
        params: params.to_vec(),
        chi2: prev_chi2,
        converged,
        iterations,
    }
}

fn chi2<const N: usize, M: RadialModel<N>>(
    model: &M,
    x: &[f64],
    y: &[f64],
    w: &[f64],
    params: &[f64; N],
) -> f64 {
    x.iter()
        .zip(y.iter())
        .zip(w.iter())
        .map(|((&xi, &yi), &wi)| {
            let r = wi * (yi - model.evaluate(xi, params));
            r * r
        })
        .sum()
}

/// Weighted J^T·J and J^T·r for the current parameters.
fn normal_equations<const N: usize, M: RadialModel<N>>(
    model: &M,
    x: &[f64],
    y: &[f64],
    w: &[f64],
    params: &[f64; N],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for ((&xi, &yi), &wi) in x.iter().zip(y.iter()).zip(w.iter()) {
        let mut row = model.jacobian_row(xi, params);
        for v in row.iter_mut() {
            *v *= wi;
        }
        let r = wi * (yi - model.evaluate(xi, params));

        for i in 0..N {
            gradient[i] += row[i] * r;
            for j in i..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}

/// Solve the NxN system with Gaussian elimination and partial pivoting.
/// Returns None when the matrix is singular.
fn solve<const N: usize>(a: &[[f64; N]; N], b: &[f64; N]) -> Option<[f64; N]> {
    let mut matrix = *a;
    let mut rhs = *b;

    for col in 0..N {
        let mut max_row = col;
        let mut max_val = matrix[col][col].abs();
        for row in (col + 1)..N {
            if matrix[row][col].abs() > max_val {
                max_val = matrix[row][col].abs();
                max_row = row;
            }
        }

        if max_val < 1e-14 {
            return None;
        }

        if max_row != col {
            matrix.swap(col, max_row);
            rhs.swap(col, max_row);
        }

        for row in (col + 1)..N {
            let factor = matrix[row][col] / matrix[col][col];
            let pivot_row = matrix[col];
            for (j, m) in matrix[row].iter_mut().enumerate().skip(col) {
                *m -= factor * pivot_row[j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        let mut sum = rhs[i];
        for (j, &xj) in x.iter().enumerate().skip(i + 1) {
            sum -= matrix[i][j] * xj;
        }
        x[i] = sum / matrix[i][i];
    }

    Some(x)
}
