pub mod effect_site;
pub mod result;

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::config::Config;
use crate::dosing::DoseSchedule;
use crate::error::{SimError, SimResult};
use crate::models::disposition::derive_pk_parameters;
use crate::models::hybrid::HybridCoefficients;
use crate::models::ke0::{estimate_ke0, Ke0Estimate, Ke0Method};
use crate::models::{PKParameters, PatientCovariates};
use crate::solver::{create_integrator, Integrator, OdeSystem, StepStats};

use effect_site::advance_effect_site;
use result::{RunDiagnostics, RunResult, Snapshot};

/// Mass balance of the three-compartment disposition system. The active
/// infusion rate is read from the dosing schedule at the evaluation time; it
/// is constant within a segment because the run driver restarts the
/// integrator at every dose discontinuity.
pub struct MassBalanceSystem<'a> {
    pub params: &'a PKParameters,
    pub schedule: &'a DoseSchedule,
}

impl OdeSystem for MassBalanceSystem<'_> {
    fn ndim(&self) -> usize {
        3
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        let p = self.params;
        let rate = self.schedule.infusion_rate_at(t);
        dydt[0] = rate - (p.k10 + p.k12 + p.k13) * y[0] + p.k21 * y[1] + p.k31 * y[2];
        dydt[1] = p.k12 * y[0] - p.k21 * y[1];
        dydt[2] = p.k13 * y[0] - p.k31 * y[2];
    }
}

/// One strictly sequential simulation run: disposition parameters with the
/// resolved ke0, the dosing schedule, and the injected integrator. The
/// compartment state is owned here and mutated only by accepted steps;
/// independent runs share nothing mutable.
pub struct SimulationRun {
    config: Config,
    params: PKParameters,
    ke0_estimate: Ke0Estimate,
    schedule: DoseSchedule,
    integrator: Box<dyn Integrator>,
    /// Counters of an integrator retired by the degraded-mode substitution.
    carried: Option<StepStats>,
    degraded: bool,
}

impl SimulationRun {
    pub fn new(
        config: Config,
        covariates: &PatientCovariates,
        schedule: DoseSchedule,
    ) -> SimResult<Self> {
        config.validate()?;

        let params = derive_pk_parameters(covariates, &config.model)?;
        let hybrid = HybridCoefficients::from_rate_constants(&params)?;
        debug!(
            "Hybrid rate constants: alpha={:.5} beta={:.5} gamma={:.5}, unit impulse at tpeak = {:.4}",
            hybrid.alpha,
            hybrid.beta,
            hybrid.gamma,
            hybrid.plasma_impulse(config.model.time_to_peak_min)
        );

        let ke0_estimate = estimate_ke0(covariates, &hybrid, &config.model, &config.regression);
        let (ke0, method) = ke0_estimate.in_use();
        match method {
            Ke0Method::Numerical => {
                info!("ke0 = {:.4}/min from the exact peak-time solver", ke0)
            }
            Ke0Method::Regression => warn!(
                "Exact ke0 solver found no root in the bracket; using the regression estimate {:.4}/min",
                ke0
            ),
        }
        let params = params.with_ke0(ke0);

        let integrator = create_integrator(config.integration.integrator, &config.integration, 3);

        Ok(Self {
            config,
            params,
            ke0_estimate,
            schedule,
            integrator,
            carried: None,
            degraded: false,
        })
    }

    pub fn parameters(&self) -> &PKParameters {
        &self.params
    }

    pub fn ke0_estimate(&self) -> Ke0Estimate {
        self.ke0_estimate
    }

    pub fn run(&mut self) -> SimResult<RunResult> {
        let cancel = AtomicBool::new(false);
        self.run_until_cancelled(&cancel)
    }

    /// Advance the full simulation one tick at a time. `cancel` is honored
    /// only between ticks; a step in flight is atomic, either fully accepted
    /// or rejected and retried.
    pub fn run_until_cancelled(&mut self, cancel: &AtomicBool) -> SimResult<RunResult> {
        let duration = self.config.simulation.duration_min;
        let tick = self.config.simulation.tick_min;
        let (ke0, _) = self.ke0_estimate.in_use();

        let mut state = [0.0_f64; 3];
        let mut ce = 0.0_f64;
        let mut t = 0.0_f64;

        // Doses at t = 0 land before the first snapshot.
        state[0] += self.schedule.bolus_at(0.0);
        self.reset_integrator(t, &state);

        let n_ticks = (duration / tick).round() as usize;
        let mut snapshots = Vec::with_capacity(n_ticks + 1);
        snapshots.push(self.snapshot(t, &state, ce));

        let mut completed = true;
        for k in 1..=n_ticks {
            if cancel.load(Ordering::Relaxed) {
                info!("Run cancelled between ticks at t = {:.2} min", t);
                completed = false;
                break;
            }

            let t_next = k as f64 * tick;
            let cp0 = state[0] / self.params.v1;

            // Restart the multistep history at every dose discontinuity so
            // bolus impulses never enter the right-hand side.
            for boundary in self.schedule.event_times_between(t, t_next) {
                self.advance(boundary, boundary, &mut state)?;
                state[0] += self.schedule.bolus_at(boundary);
                self.reset_integrator(boundary, &state);
            }
            let t_stop = self.stop_time_after(t_next);
            self.advance(t_next, t_stop, &mut state)?;

            // Masses are physical and cannot go negative. Roundoff excursions
            // are clamped after the step and the history restarted from the
            // corrected state; this is a documented post-step correction, not
            // error suppression.
            if clamp_negative(&mut state) {
                self.reset_integrator(t_next, &state);
            }

            let cp1 = state[0] / self.params.v1;
            ce = advance_effect_site(cp0, cp1, ce, ke0, tick, &self.config.effect_site).max(0.0);

            t = t_next;
            snapshots.push(self.snapshot(t, &state, ce));
        }

        let stats = combine_stats(self.carried, self.integrator.stats());
        let (ke0_value, ke0_method) = self.ke0_estimate.in_use();
        Ok(RunResult {
            snapshots,
            diagnostics: RunDiagnostics {
                accepted_steps: stats.accepted,
                rejected_steps: stats.rejected,
                convergence_failures: stats.convergence_failures,
                method_switches: stats.method_switches,
                final_order: stats.order,
                final_method: stats.method,
                ke0_method,
                ke0_value,
                ke0_numerical: self.ke0_estimate.numerical,
                ke0_regression: self.ke0_estimate.regression,
                degraded: self.degraded,
            },
            completed,
        })
    }

    /// Step the mass sub-system to `t_out` and read the state there. A fatal
    /// integrator failure is substituted with the fixed-step fallback when
    /// configured, as an explicit degraded mode; otherwise it propagates.
    fn advance(&mut self, t_out: f64, t_stop: f64, state: &mut [f64; 3]) -> SimResult<()> {
        let sys = MassBalanceSystem {
            params: &self.params,
            schedule: &self.schedule,
        };
        match self.integrator.advance_until(&sys, t_out, t_stop) {
            Ok(()) => {}
            Err(err @ (SimError::StepSizeTooSmall { .. } | SimError::TooManyFailures { .. }))
                if self.config.integration.fallback_to_fixed_step && !self.degraded =>
            {
                warn!(
                    "Adaptive integrator failed ({}); continuing on the fixed-step fallback",
                    err
                );
                let t_resume = self.integrator.time();
                let mut y = [0.0; 3];
                self.integrator.current_state(&mut y);

                self.carried = Some(combine_stats(self.carried, self.integrator.stats()));
                self.integrator = Box::new(crate::solver::fixed::FixedStepExplicit::new(
                    self.config.integration.fixed_step_min,
                    3,
                ));
                self.integrator.reset(&sys, t_resume, &y);
                self.degraded = true;

                self.integrator.advance_until(&sys, t_out, t_stop)?;
            }
            Err(err) => return Err(err),
        }
        self.integrator.interpolate_state(t_out, state);
        Ok(())
    }

    fn reset_integrator(&mut self, t: f64, state: &[f64; 3]) {
        let sys = MassBalanceSystem {
            params: &self.params,
            schedule: &self.schedule,
        };
        self.integrator.reset(&sys, t, state);
    }

    /// First dose discontinuity strictly after `t`, the hard stop the
    /// integrator must not step across.
    fn stop_time_after(&self, t: f64) -> f64 {
        self.schedule
            .events()
            .iter()
            .map(|e| e.time_min)
            .find(|&et| et > t)
            .unwrap_or(f64::INFINITY)
    }

    fn snapshot(&self, t: f64, state: &[f64; 3], ce: f64) -> Snapshot {
        Snapshot {
            time_min: t,
            a1_mg: state[0],
            a2_mg: state[1],
            a3_mg: state[2],
            cp_ug_per_ml: state[0] / self.params.v1,
            ce_ug_per_ml: ce,
            stats: combine_stats(self.carried, self.integrator.stats()),
        }
    }
}

fn clamp_negative(state: &mut [f64; 3]) -> bool {
    let mut clamped = false;
    for value in state.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
            clamped = true;
        }
    }
    clamped
}

fn combine_stats(prior: Option<StepStats>, current: StepStats) -> StepStats {
    match prior {
        None => current,
        Some(p) => StepStats {
            accepted: p.accepted + current.accepted,
            rejected: p.rejected + current.rejected,
            convergence_failures: p.convergence_failures + current.convergence_failures,
            method_switches: p.method_switches + current.method_switches,
            order: current.order,
            method: current.method,
        },
    }
}
