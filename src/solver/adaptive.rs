use log::{debug, info};

use super::{Integrator, MethodKind, OdeSystem, StepStats};
use crate::config::IntegrationConfig;
use crate::error::{SimError, SimResult};

pub const MAX_ADAMS_ORDER: usize = 5;
pub const MAX_BDF_ORDER: usize = 4;

/// Slack when comparing the internal time against an output time.
const TIME_EPS: f64 = 1e-9;
/// Step-shrink clamps applied after an error-test rejection.
const REJECT_SHRINK_FLOOR: f64 = 0.1;
const REJECT_SHRINK_CEIL: f64 = 0.9;
/// Guard inside the step-factor power law against a vanishing error norm.
const ERR_NORM_FLOOR: f64 = 1e-16;

fn poly_mul(p: &[f64], q: &[f64]) -> Vec<f64> {
    let mut r = vec![0.0; p.len() + q.len() - 1];
    for (i, &pi) in p.iter().enumerate() {
        for (j, &qj) in q.iter().enumerate() {
            r[i + j] += pi * qj;
        }
    }
    r
}

/// Correction coefficients of the Adams-Moulton method of order `q` in
/// Nordsieck form, generated from the product polynomial
/// p(x) = (x+1)(x+2)...(x+q-1).
fn adams_coefficients(q: usize) -> Vec<f64> {
    if q == 1 {
        return vec![1.0, 1.0];
    }
    let mut p = vec![1.0];
    for j in 1..q {
        p = poly_mul(&p, &[j as f64, 1.0]);
    }
    let c0 = p[0];

    let mut l = vec![0.0; q + 1];
    for i in 1..=q {
        l[i] = p[i - 1] / (i as f64 * c0);
    }

    // l0 is the implicit weight: the integral over one step of the shifted
    // product polynomial x(x+1)...(x+q-2), normalized by p(0).
    let mut shifted = vec![1.0];
    for j in 0..q - 1 {
        shifted = poly_mul(&shifted, &[j as f64, 1.0]);
    }
    let integral: f64 = shifted
        .iter()
        .enumerate()
        .map(|(i, &coeff)| coeff / (i as f64 + 1.0))
        .sum();
    l[0] = integral / c0;
    l
}

/// Correction coefficients of the BDF method of order `q` in Nordsieck form:
/// the coefficients of (x+1)(x+2)...(x+q) normalized by the linear one.
fn bdf_coefficients(q: usize) -> Vec<f64> {
    let mut p = vec![1.0];
    for j in 1..=q {
        p = poly_mul(&p, &[j as f64, 1.0]);
    }
    let c1 = p[1];
    (0..=q).map(|i| p[i] / c1).collect()
}

fn coefficients_for(method: MethodKind, q: usize) -> Vec<f64> {
    match method {
        MethodKind::Adams => adams_coefficients(q),
        MethodKind::Bdf => bdf_coefficients(q),
        MethodKind::FixedStep => unreachable!("fixed-step method has no Nordsieck coefficients"),
    }
}

fn max_order(method: MethodKind) -> usize {
    match method {
        MethodKind::Adams => MAX_ADAMS_ORDER,
        MethodKind::Bdf => MAX_BDF_ORDER,
        MethodKind::FixedStep => 1,
    }
}

/// Adaptive-order, adaptive-step multistep integrator holding a Nordsieck
/// history z[j] = h^j y^(j) / j!, switching between the non-stiff
/// Adams-Moulton predictor-corrector and the stiff BDF family.
///
/// The corrector is a bounded fixed-point iteration for both methods; the
/// local error estimate is the weighted RMS norm of the accumulated
/// correction scaled by an order constant.
pub struct AdamsBdf {
    rtol: f64,
    atol: f64,
    min_step: f64,
    max_step: Option<f64>,
    max_corrector_iters: usize,
    corrector_threshold: f64,
    convergence_shrink: f64,
    max_step_retries: usize,
    step_control_bias: f64,
    max_growth: f64,
    growth_deadband: f64,
    stiffness_check_interval: usize,
    stiffness_upper: f64,
    stiffness_lower: f64,

    n: usize,
    t: f64,
    h: f64,
    nq: usize,
    method: MethodKind,
    z: Vec<Vec<f64>>,
    l: Vec<f64>,
    e_prev: Option<Vec<f64>>,
    steps_since_adjust: usize,
    steps_since_stiff_check: usize,

    accepted: u64,
    rejected: u64,
    convergence_failures: u64,
    method_switches: u64,
}

impl AdamsBdf {
    pub fn new(config: &IntegrationConfig, ndim: usize) -> Self {
        Self {
            rtol: config.rtol,
            atol: config.atol,
            min_step: config.min_step,
            max_step: config.max_step,
            max_corrector_iters: config.max_corrector_iters,
            corrector_threshold: config.corrector_threshold,
            convergence_shrink: config.convergence_shrink,
            max_step_retries: config.max_step_retries,
            step_control_bias: config.step_control_bias,
            max_growth: config.max_growth,
            growth_deadband: config.growth_deadband,
            stiffness_check_interval: config.stiffness_check_interval,
            stiffness_upper: config.stiffness_upper,
            stiffness_lower: config.stiffness_lower,
            n: ndim,
            t: 0.0,
            h: 0.0,
            nq: 1,
            method: MethodKind::Adams,
            z: Vec::new(),
            l: adams_coefficients(1),
            e_prev: None,
            steps_since_adjust: 0,
            steps_since_stiff_check: 0,
            accepted: 0,
            rejected: 0,
            convergence_failures: 0,
            method_switches: 0,
        }
    }

    fn wrms(&self, v: &[f64], scale_y: &[f64]) -> f64 {
        let mut sum = 0.0;
        for (vi, yi) in v.iter().zip(scale_y) {
            let w = self.rtol * yi.abs() + self.atol;
            sum += (vi / w) * (vi / w);
        }
        (sum / self.n as f64).sqrt()
    }

    fn err_const(&self, q: usize) -> f64 {
        1.0 / (q as f64 + 1.0)
    }

    /// Step factor from the biased error-norm power law of the given order.
    fn step_factor(&self, err: f64, q: usize) -> f64 {
        let err = err.max(ERR_NORM_FLOOR);
        1.0 / ((self.step_control_bias * err).powf(1.0 / (q as f64 + 1.0)) + 1e-6)
    }

    /// Predicted Nordsieck array: Pascal triangle extrapolation over one step.
    fn predict(&self) -> Vec<Vec<f64>> {
        let mut z = self.z.clone();
        for k in 1..=self.nq {
            for j in (k..=self.nq).rev() {
                for i in 0..self.n {
                    let carry = z[j][i];
                    z[j - 1][i] += carry;
                }
            }
        }
        z
    }

    /// Change the step size by `ratio`, rescaling the derivative history to
    /// keep the Nordsieck representation exact.
    fn rescale(&mut self, ratio: f64) {
        let mut r = 1.0;
        for j in 1..=self.nq {
            r *= ratio;
            for value in &mut self.z[j] {
                *value *= r;
            }
        }
        self.h *= ratio;
    }

    fn apply_growth(&mut self, factor: f64, t_stop_gap: Option<f64>) {
        let mut eta = factor.min(self.max_growth);
        if let Some(max_step) = self.max_step {
            eta = eta.min(max_step / self.h);
        }
        if let Some(gap) = t_stop_gap {
            // Never grow beyond the remaining segment.
            eta = eta.min((gap / self.h).max(1.0));
        }
        if eta > self.growth_deadband {
            self.rescale(eta);
            self.e_prev = None;
        }
    }

    fn set_order(&mut self, new_q: usize, e: Option<&[f64]>) {
        if new_q > self.nq {
            let row = match e {
                Some(e) => e
                    .iter()
                    .map(|&ei| self.l[self.nq] * ei / new_q as f64)
                    .collect(),
                None => vec![0.0; self.n],
            };
            self.z.push(row);
        } else if new_q < self.nq {
            self.z.truncate(new_q + 1);
        }
        self.nq = new_q;
        self.l = coefficients_for(self.method, new_q);
        self.steps_since_adjust = 0;
        self.e_prev = None;
    }

    fn switch_method(&mut self, target: MethodKind) {
        info!(
            "Integrator switching method {:?} -> {:?} at t = {:.4} min (h = {:.3e})",
            self.method, target, self.t, self.h
        );
        self.method = target;
        self.method_switches += 1;
        let nq = self.nq.min(max_order(target));
        self.z.truncate(nq + 1);
        self.nq = nq;
        self.l = coefficients_for(target, nq);
        self.steps_since_adjust = 0;
        self.e_prev = None;
    }

    /// Periodic order reassessment from the error estimates one order down
    /// (the history tail), at the current order, and one order up (the
    /// difference of successive corrections).
    fn consider_order(&mut self, e: &[f64], t_stop_gap: Option<f64>) {
        let y = &self.z[0];

        let err_q = self.wrms(e, y) * self.err_const(self.nq);
        let eta_q = self.step_factor(err_q, self.nq);

        let mut eta_down = 0.0;
        if self.nq > 1 {
            let err_down = self.wrms(&self.z[self.nq], y) * self.err_const(self.nq - 1);
            eta_down = self.step_factor(err_down, self.nq - 1);
        }

        let mut eta_up = 0.0;
        if self.nq < max_order(self.method) {
            if let Some(prev) = &self.e_prev {
                let diff: Vec<f64> = e.iter().zip(prev).map(|(a, b)| a - b).collect();
                let err_up = self.wrms(&diff, y) * self.err_const(self.nq + 1);
                eta_up = self.step_factor(err_up, self.nq + 1);
            }
        }

        let best = eta_q.max(eta_down).max(eta_up);
        if best == eta_up && eta_up > self.growth_deadband {
            debug!("Order raised to {} at t = {:.4}", self.nq + 1, self.t);
            self.set_order(self.nq + 1, Some(e));
        } else if best == eta_down && eta_down > self.growth_deadband {
            debug!("Order lowered to {} at t = {:.4}", self.nq - 1, self.t);
            self.set_order(self.nq - 1, None);
        }

        self.apply_growth(best, t_stop_gap);
        self.e_prev = None;
        self.steps_since_adjust = 0;
    }

    /// One accepted step: predict, evaluate, correct, test, adapt.
    fn step(&mut self, sys: &dyn OdeSystem, t_stop: f64) -> SimResult<()> {
        let mut failures = 0usize;

        let (z_pred, e) = loop {
            if self.h < self.min_step {
                return Err(SimError::StepSizeTooSmall { t: self.t, h: self.h });
            }
            if failures > self.max_step_retries {
                return Err(SimError::TooManyFailures { t: self.t, failures });
            }

            let z_pred = self.predict();

            // Corrector: bounded fixed-point iteration on the derivative
            // mismatch e = h f(t+h, y_pred + l0 e) - z_pred[1].
            let mut e = vec![0.0; self.n];
            let mut y = vec![0.0; self.n];
            let mut dydt = vec![0.0; self.n];
            let mut converged = false;
            for _ in 0..self.max_corrector_iters {
                for i in 0..self.n {
                    y[i] = z_pred[0][i] + self.l[0] * e[i];
                }
                sys.rhs(self.t + self.h, &y, &mut dydt);
                let mut increment_norm = 0.0;
                for i in 0..self.n {
                    let e_new = self.h * dydt[i] - z_pred[1][i];
                    let w = self.rtol * y[i].abs() + self.atol;
                    let delta = (e_new - e[i]) / w;
                    increment_norm += delta * delta;
                    e[i] = e_new;
                }
                increment_norm = (increment_norm / self.n as f64).sqrt();
                if increment_norm <= self.corrector_threshold {
                    converged = true;
                    break;
                }
            }

            if !converged {
                self.convergence_failures += 1;
                failures += 1;
                self.rescale(self.convergence_shrink);
                self.e_prev = None;
                continue;
            }

            let err = self.wrms(&e, &y) * self.err_const(self.nq);
            if err <= 1.0 {
                break (z_pred, e);
            }

            self.rejected += 1;
            failures += 1;
            let shrink = self
                .step_factor(err, self.nq)
                .clamp(REJECT_SHRINK_FLOOR, REJECT_SHRINK_CEIL);
            self.rescale(shrink);
            self.e_prev = None;
        };

        // Accept: fold the correction into the history.
        for j in 0..=self.nq {
            for i in 0..self.n {
                self.z[j][i] = z_pred[j][i] + self.l[j] * e[i];
            }
        }
        self.t += self.h;
        self.accepted += 1;
        self.steps_since_adjust += 1;
        self.steps_since_stiff_check += 1;

        let gap = t_stop - self.t;
        let t_stop_gap = if gap.is_finite() && gap > 0.0 {
            Some(gap)
        } else {
            None
        };

        if self.steps_since_adjust > self.nq {
            self.consider_order(&e, t_stop_gap);
        } else {
            let err = self.wrms(&e, &self.z[0]) * self.err_const(self.nq);
            let eta = self.step_factor(err, self.nq);
            if eta > self.growth_deadband {
                self.apply_growth(eta, t_stop_gap);
                self.e_prev = None;
            } else {
                self.e_prev = Some(e);
            }
        }

        if self.steps_since_stiff_check >= self.stiffness_check_interval {
            self.steps_since_stiff_check = 0;
            let lipschitz = sys.lipschitz_estimate(self.t, &self.z[0]);
            let indicator = self.h * lipschitz;
            match self.method {
                MethodKind::Adams if indicator > self.stiffness_upper => {
                    self.switch_method(MethodKind::Bdf);
                }
                MethodKind::Bdf if indicator < self.stiffness_lower => {
                    self.switch_method(MethodKind::Adams);
                }
                _ => {}
            }
        }

        Ok(())
    }
}

impl Integrator for AdamsBdf {
    fn reset(&mut self, sys: &dyn OdeSystem, t0: f64, y0: &[f64]) {
        debug_assert_eq!(y0.len(), self.n);
        let mut f0 = vec![0.0; self.n];
        sys.rhs(t0, y0, &mut f0);

        // Conservative startup step from the ratio of solution and
        // derivative norms, both measured in error-weight units.
        let d0 = self.wrms(y0, y0);
        let d1 = self.wrms(&f0, y0);
        let mut h = if d1 <= 1e-10 || d0 <= 1e-10 {
            1e-6
        } else {
            0.01 * d0 / d1
        };
        h = h.max(1e-8);
        if let Some(max_step) = self.max_step {
            h = h.min(max_step);
        }

        self.t = t0;
        self.h = h;
        self.nq = 1;
        self.method = MethodKind::Adams;
        self.l = adams_coefficients(1);
        self.z = vec![y0.to_vec(), f0.iter().map(|&v| h * v).collect()];
        self.e_prev = None;
        self.steps_since_adjust = 0;
        self.steps_since_stiff_check = 0;
    }

    fn advance_until(&mut self, sys: &dyn OdeSystem, t_out: f64, t_stop: f64) -> SimResult<()> {
        while self.t < t_out - TIME_EPS {
            if self.t + self.h > t_stop {
                let ratio = (t_stop - self.t) / self.h;
                self.rescale(ratio);
                self.e_prev = None;
            }
            self.step(sys, t_stop)?;
        }
        Ok(())
    }

    fn time(&self) -> f64 {
        self.t
    }

    /// Nordsieck interpolation: evaluate the stored Taylor expansion at the
    /// requested time, valid within the most recent accepted step.
    fn interpolate_state(&self, t: f64, out: &mut [f64]) {
        let s = (t - self.t) / self.h;
        for i in 0..self.n {
            let mut acc = self.z[self.nq][i];
            for j in (0..self.nq).rev() {
                acc = acc * s + self.z[j][i];
            }
            out[i] = acc;
        }
    }

    fn stats(&self) -> StepStats {
        StepStats {
            accepted: self.accepted,
            rejected: self.rejected,
            convergence_failures: self.convergence_failures,
            method_switches: self.method_switches,
            order: self.nq,
            method: self.method,
        }
    }
}
