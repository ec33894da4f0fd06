use super::{Integrator, MethodKind, OdeSystem, StepStats};
use crate::error::SimResult;

const TIME_EPS: f64 = 1e-9;

/// Fixed-step explicit second-order (Heun) integrator. This is the degraded
/// mode substituted when the adaptive integrator fails hard, and the
/// reference scheme the adaptive step counts are compared against. It never
/// rejects a step, so its only failure mode is inaccuracy.
pub struct FixedStepExplicit {
    h: f64,
    n: usize,
    t: f64,
    y: Vec<f64>,
    t_prev: f64,
    y_prev: Vec<f64>,
    accepted: u64,
}

impl FixedStepExplicit {
    pub fn new(step: f64, ndim: usize) -> Self {
        Self {
            h: step,
            n: ndim,
            t: 0.0,
            y: vec![0.0; ndim],
            t_prev: 0.0,
            y_prev: vec![0.0; ndim],
            accepted: 0,
        }
    }

    fn heun_step(&mut self, sys: &dyn OdeSystem, h: f64) {
        let mut k1 = vec![0.0; self.n];
        let mut k2 = vec![0.0; self.n];
        let mut y_euler = vec![0.0; self.n];

        sys.rhs(self.t, &self.y, &mut k1);
        for i in 0..self.n {
            y_euler[i] = self.y[i] + h * k1[i];
        }
        sys.rhs(self.t + h, &y_euler, &mut k2);

        self.t_prev = self.t;
        self.y_prev.copy_from_slice(&self.y);
        for i in 0..self.n {
            self.y[i] += 0.5 * h * (k1[i] + k2[i]);
        }
        self.t += h;
        self.accepted += 1;
    }
}

impl Integrator for FixedStepExplicit {
    fn reset(&mut self, _sys: &dyn OdeSystem, t0: f64, y0: &[f64]) {
        debug_assert_eq!(y0.len(), self.n);
        self.t = t0;
        self.y = y0.to_vec();
        self.t_prev = t0;
        self.y_prev = y0.to_vec();
    }

    fn advance_until(&mut self, sys: &dyn OdeSystem, t_out: f64, t_stop: f64) -> SimResult<()> {
        while self.t < t_out - TIME_EPS {
            let h = self.h.min(t_stop - self.t);
            self.heun_step(sys, h);
        }
        Ok(())
    }

    fn time(&self) -> f64 {
        self.t
    }

    fn interpolate_state(&self, t: f64, out: &mut [f64]) {
        let span = self.t - self.t_prev;
        let frac = if span.abs() < 1e-300 {
            0.0
        } else {
            (t - self.t_prev) / span
        };
        for i in 0..self.n {
            out[i] = self.y_prev[i] + frac * (self.y[i] - self.y_prev[i]);
        }
    }

    fn stats(&self) -> StepStats {
        StepStats {
            accepted: self.accepted,
            rejected: 0,
            convergence_failures: 0,
            method_switches: 0,
            order: 2,
            method: MethodKind::FixedStep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct ExpDecay {
        k: f64,
    }

    impl OdeSystem for ExpDecay {
        fn ndim(&self) -> usize {
            1
        }
        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) {
            dydt[0] = -self.k * y[0];
        }
    }

    #[test]
    fn test_heun_accuracy_on_decay() {
        let sys = ExpDecay { k: 0.5 };
        let mut ig = FixedStepExplicit::new(1.0 / 60.0, 1);
        ig.reset(&sys, 0.0, &[10.0]);
        ig.advance_until(&sys, 10.0, 10.0).unwrap();

        let mut y = [0.0];
        ig.interpolate_state(10.0, &mut y);
        assert_relative_eq!(y[0], 10.0 * (-0.5_f64 * 10.0).exp(), max_relative = 1e-4);
    }

    #[test]
    fn test_step_count_matches_grid() {
        let sys = ExpDecay { k: 0.1 };
        let mut ig = FixedStepExplicit::new(1.0, 1);
        ig.reset(&sys, 0.0, &[1.0]);
        ig.advance_until(&sys, 100.0, 100.0).unwrap();
        assert_eq!(ig.stats().accepted, 100);
        assert_eq!(ig.stats().method, MethodKind::FixedStep);
    }

    #[test]
    fn test_linear_interpolation_between_nodes() {
        let sys = ExpDecay { k: 0.0 };
        let mut ig = FixedStepExplicit::new(2.0, 1);
        ig.reset(&sys, 0.0, &[3.0]);
        ig.advance_until(&sys, 2.0, 2.0).unwrap();
        let mut y = [0.0];
        ig.interpolate_state(1.0, &mut y);
        assert_relative_eq!(y[0], 3.0, epsilon = 1e-12);
    }
}
