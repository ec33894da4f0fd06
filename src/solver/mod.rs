pub mod adaptive;
pub mod fixed;

use serde::{Deserialize, Serialize};

use crate::config::{IntegrationConfig, IntegratorChoice};
use crate::error::SimResult;

/// Right-hand side of an ODE system dy/dt = f(t, y).
pub trait OdeSystem {
    fn ndim(&self) -> usize;

    /// Evaluate f(t, y) into `dydt`. Both slices have length `ndim()`.
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]);

    /// Lipschitz estimate: the infinity norm of the Jacobian at (t, y),
    /// by forward finite differences. Used by the stiffness detector.
    fn lipschitz_estimate(&self, t: f64, y: &[f64]) -> f64 {
        let n = self.ndim();
        let mut f0 = vec![0.0; n];
        let mut fj = vec![0.0; n];
        let mut yp = y.to_vec();
        self.rhs(t, y, &mut f0);

        let mut norm: f64 = 0.0;
        for j in 0..n {
            let orig = yp[j];
            let d = 1e-7 * (orig.abs() + 1e-7);
            yp[j] = orig + d;
            self.rhs(t, &yp, &mut fj);
            yp[j] = orig;
            let col_sum: f64 = (0..n).map(|i| (fj[i] - f0[i]).abs()).sum::<f64>() / d;
            norm = norm.max(col_sum);
        }
        norm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Adams,
    Bdf,
    FixedStep,
}

/// Step counters and the currently active method/order, reported with every
/// simulation snapshot rather than logged away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    pub accepted: u64,
    pub rejected: u64,
    pub convergence_failures: u64,
    pub method_switches: u64,
    pub order: usize,
    pub method: MethodKind,
}

/// One integration strategy for a simulation run. The concrete implementation
/// is chosen once at construction and injected, never probed per call.
pub trait Integrator {
    /// Restart the history from (t0, y0). Called at the start of a run and at
    /// every dose discontinuity. Step counters survive as run diagnostics.
    fn reset(&mut self, sys: &dyn OdeSystem, t0: f64, y0: &[f64]);

    /// Step until the internal time reaches `t_out`, never stepping past
    /// `t_stop` (the next dose discontinuity).
    fn advance_until(&mut self, sys: &dyn OdeSystem, t_out: f64, t_stop: f64) -> SimResult<()>;

    fn time(&self) -> f64;

    /// Solution at `t`, which must lie within the most recent step.
    fn interpolate_state(&self, t: f64, out: &mut [f64]);

    fn stats(&self) -> StepStats;

    fn current_state(&self, out: &mut [f64]) {
        self.interpolate_state(self.time(), out);
    }
}

pub fn create_integrator(
    choice: IntegratorChoice,
    config: &IntegrationConfig,
    ndim: usize,
) -> Box<dyn Integrator> {
    match choice {
        IntegratorChoice::Adaptive => Box::new(adaptive::AdamsBdf::new(config, ndim)),
        IntegratorChoice::FixedStep => {
            Box::new(fixed::FixedStepExplicit::new(config.fixed_step_min, ndim))
        }
    }
}
