use serde::{Deserialize, Serialize};

use crate::models::ke0::Ke0Method;
use crate::solver::{MethodKind, StepStats};

/// State of one simulation tick: compartment masses, plasma and effect-site
/// concentrations, plus the integrator counters at that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub time_min: f64,
    pub a1_mg: f64,
    pub a2_mg: f64,
    pub a3_mg: f64,
    pub cp_ug_per_ml: f64,
    pub ce_ug_per_ml: f64,
    pub stats: StepStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub accepted_steps: u64,
    pub rejected_steps: u64,
    pub convergence_failures: u64,
    pub method_switches: u64,
    pub final_order: usize,
    pub final_method: MethodKind,
    pub ke0_method: Ke0Method,
    pub ke0_value: f64,
    pub ke0_numerical: Option<f64>,
    pub ke0_regression: f64,
    /// True when the run finished on the degraded fixed-step integrator.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub snapshots: Vec<Snapshot>,
    pub diagnostics: RunDiagnostics,
    /// False when the run was cancelled between ticks.
    pub completed: bool,
}

impl RunResult {
    pub fn peak_plasma(&self) -> Option<(f64, f64)> {
        self.snapshots
            .iter()
            .max_by(|a, b| a.cp_ug_per_ml.partial_cmp(&b.cp_ug_per_ml).unwrap())
            .map(|s| (s.time_min, s.cp_ug_per_ml))
    }

    pub fn peak_effect_site(&self) -> Option<(f64, f64)> {
        self.snapshots
            .iter()
            .max_by(|a, b| a.ce_ug_per_ml.partial_cmp(&b.ce_ug_per_ml).unwrap())
            .map(|s| (s.time_min, s.ce_ug_per_ml))
    }

    pub fn final_snapshot(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(t: f64, cp: f64, ce: f64) -> Snapshot {
        Snapshot {
            time_min: t,
            a1_mg: cp * 3.57,
            a2_mg: 0.0,
            a3_mg: 0.0,
            cp_ug_per_ml: cp,
            ce_ug_per_ml: ce,
            stats: StepStats {
                accepted: 0,
                rejected: 0,
                convergence_failures: 0,
                method_switches: 0,
                order: 1,
                method: MethodKind::Adams,
            },
        }
    }

    fn result_with(snapshots: Vec<Snapshot>) -> RunResult {
        RunResult {
            snapshots,
            diagnostics: RunDiagnostics {
                accepted_steps: 0,
                rejected_steps: 0,
                convergence_failures: 0,
                method_switches: 0,
                final_order: 1,
                final_method: MethodKind::Adams,
                ke0_method: Ke0Method::Numerical,
                ke0_value: 0.22,
                ke0_numerical: Some(0.22),
                ke0_regression: 0.219,
                degraded: false,
            },
            completed: true,
        }
    }

    #[test]
    fn test_peak_lookup() {
        let result = result_with(vec![
            snapshot(1.0, 3.0, 0.5),
            snapshot(2.0, 2.0, 1.2),
            snapshot(3.0, 1.5, 1.0),
        ]);
        assert_eq!(result.peak_plasma(), Some((1.0, 3.0)));
        assert_eq!(result.peak_effect_site(), Some((2.0, 1.2)));
    }

    #[test]
    fn test_empty_result_has_no_peaks() {
        let result = result_with(Vec::new());
        assert_eq!(result.peak_plasma(), None);
        assert!(result.final_snapshot().is_none());
    }
}
