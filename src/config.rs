use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub regression: RegressionConfig,
    pub integration: IntegrationConfig,
    pub effect_site: EffectSiteConfig,
    pub simulation: SimulationConfig,
}

/// Disposition constant table for the reference individual, plus the
/// time-to-peak constraint used by the exact ke0 solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub reference_age_yr: f64,
    pub reference_weight_kg: f64,
    pub reference_height_cm: f64,
    pub v1_ref: f64,          // Central volume (L)
    pub v2_ref: f64,          // Shallow peripheral volume (L)
    pub v3_ref: f64,          // Deep peripheral volume (L)
    pub cl_ref: f64,          // Elimination clearance (L/min)
    pub q2_ref: f64,          // Inter-compartmental clearance 1<->2 (L/min)
    pub q3_ref: f64,          // Inter-compartmental clearance 1<->3 (L/min)
    pub volume_weight_exponent: f64,
    pub clearance_weight_exponent: f64,
    pub cl_female_factor: f64,   // Exponential covariate term on CL
    pub cl_asa34_factor: f64,    // Exponential covariate term on CL
    pub v3_age_exponent: f64,    // Power-law age correction on V3
    pub time_to_peak_min: f64,
    pub ke0_bracket: (f64, f64), // Search interval for the exact solver (1/min)
}

/// Coefficients of the closed-form regression ke0 estimator, centered on the
/// reference individual. Only this path clamps into the plausible band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionConfig {
    pub intercept: f64,
    pub age_slope: f64,
    pub weight_slope: f64,
    pub height_slope: f64,
    pub female_effect: f64,
    pub asa34_effect: f64,
    pub clamp: (f64, f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub integrator: IntegratorChoice,
    pub rtol: f64,
    pub atol: f64,
    pub min_step: f64,
    pub max_step: Option<f64>,
    pub max_corrector_iters: usize,
    pub corrector_threshold: f64,     // Convergence bound on the correction norm
    pub convergence_shrink: f64,      // Step reduction after a corrector failure
    pub max_step_retries: usize,
    pub step_control_bias: f64,       // Bias inside the error-norm power law
    pub max_growth: f64,
    pub growth_deadband: f64,         // Keep h unless the factor exceeds this
    pub stiffness_check_interval: usize,
    pub stiffness_upper: f64,         // h*L above this: switch to the stiff method
    pub stiffness_lower: f64,         // h*L below this: switch back
    pub fallback_to_fixed_step: bool,
    pub fixed_step_min: f64,          // Step of the degraded fixed-step method
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegratorChoice {
    Adaptive,
    FixedStep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectSiteConfig {
    pub cp_delta_negligible: f64,   // Below this |Cp1 - Cp0| counts as constant plasma
    pub small_step_threshold: f64,  // Below this ke0*dt uses the Taylor branch
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub duration_min: f64,
    pub tick_min: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                reference_age_yr: 54.0,
                reference_weight_kg: 67.3,
                reference_height_cm: 165.0,
                v1_ref: 3.57,
                v2_ref: 11.3,
                v3_ref: 27.2,
                cl_ref: 1.03,
                q2_ref: 1.10,
                q3_ref: 0.401,
                volume_weight_exponent: 1.0,
                clearance_weight_exponent: 0.75,
                cl_female_factor: -0.184,
                cl_asa34_factor: -0.187,
                v3_age_exponent: -0.220,
                time_to_peak_min: 2.6,
                ke0_bracket: (0.15, 0.26),
            },
            regression: RegressionConfig {
                intercept: 0.2188,
                age_slope: 0.0000724,
                weight_slope: 0.0008786,
                height_slope: 0.0001,
                female_effect: 0.0224,
                asa34_effect: 0.0214,
                clamp: (0.12, 0.30),
            },
            integration: IntegrationConfig {
                integrator: IntegratorChoice::Adaptive,
                rtol: 1e-8,
                atol: 1e-12,
                min_step: 1e-12,
                max_step: None,
                max_corrector_iters: 3,
                corrector_threshold: 0.33,
                convergence_shrink: 0.25,
                max_step_retries: 10,
                step_control_bias: 6.0,
                max_growth: 10.0,
                growth_deadband: 1.5,
                stiffness_check_interval: 25,
                stiffness_upper: 2.0,
                stiffness_lower: 0.1,
                fallback_to_fixed_step: false,
                fixed_step_min: 1.0 / 60.0,
            },
            effect_site: EffectSiteConfig {
                cp_delta_negligible: 1e-10,
                small_step_threshold: 1e-3,
            },
            simulation: SimulationConfig {
                duration_min: 240.0,
                tick_min: 1.0,
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        self.validate_model()?;
        self.validate_regression()?;
        self.validate_integration()?;
        self.validate_effect_site()?;
        self.validate_simulation()?;
        Ok(())
    }

    fn validate_model(&self) -> SimResult<()> {
        let m = &self.model;
        let positive = [
            ("reference_age_yr", m.reference_age_yr),
            ("reference_weight_kg", m.reference_weight_kg),
            ("reference_height_cm", m.reference_height_cm),
            ("v1_ref", m.v1_ref),
            ("v2_ref", m.v2_ref),
            ("v3_ref", m.v3_ref),
            ("cl_ref", m.cl_ref),
            ("q2_ref", m.q2_ref),
            ("q3_ref", m.q3_ref),
            ("time_to_peak_min", m.time_to_peak_min),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(SimError::Validation(format!(
                    "Model constant {} must be positive, got {}",
                    name, value
                )));
            }
        }
        let (lo, hi) = m.ke0_bracket;
        if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || hi <= lo {
            return Err(SimError::Validation(format!(
                "ke0 bracket must satisfy 0 < lo < hi, got [{}, {}]",
                lo, hi
            )));
        }
        Ok(())
    }

    fn validate_regression(&self) -> SimResult<()> {
        let r = &self.regression;
        let (lo, hi) = r.clamp;
        if !(lo.is_finite() && hi.is_finite()) || lo <= 0.0 || hi <= lo {
            return Err(SimError::Validation(format!(
                "Regression clamp band must satisfy 0 < lo < hi, got [{}, {}]",
                lo, hi
            )));
        }
        if !r.intercept.is_finite() || r.intercept <= 0.0 {
            return Err(SimError::Validation(
                "Regression intercept must be positive".to_string(),
            ));
        }
        // The bracket of the exact solver should sit inside the plausible band,
        // otherwise the two paths cannot be compared.
        let (blo, bhi) = self.model.ke0_bracket;
        if blo < lo || bhi > hi {
            return Err(SimError::Validation(format!(
                "ke0 bracket [{}, {}] must lie within the regression clamp band [{}, {}]",
                blo, bhi, lo, hi
            )));
        }
        Ok(())
    }

    fn validate_integration(&self) -> SimResult<()> {
        let i = &self.integration;
        if !i.rtol.is_finite() || i.rtol <= 0.0 {
            return Err(SimError::Validation("rtol must be positive".to_string()));
        }
        if !i.atol.is_finite() || i.atol <= 0.0 {
            return Err(SimError::Validation("atol must be positive".to_string()));
        }
        if i.min_step <= 0.0 {
            return Err(SimError::Validation("min_step must be positive".to_string()));
        }
        if let Some(max_step) = i.max_step {
            if max_step <= i.min_step {
                return Err(SimError::Validation(
                    "max_step must exceed min_step".to_string(),
                ));
            }
        }
        if i.max_corrector_iters == 0 || i.max_step_retries == 0 {
            return Err(SimError::Validation(
                "Corrector and retry bounds must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&i.corrector_threshold) || i.corrector_threshold == 0.0 {
            return Err(SimError::Validation(
                "corrector_threshold must be in (0, 1)".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&i.convergence_shrink) || i.convergence_shrink == 0.0 {
            return Err(SimError::Validation(
                "convergence_shrink must be in (0, 1)".to_string(),
            ));
        }
        if i.max_growth <= 1.0 || i.growth_deadband <= 1.0 {
            return Err(SimError::Validation(
                "max_growth and growth_deadband must exceed 1".to_string(),
            ));
        }
        if i.stiffness_check_interval == 0 {
            return Err(SimError::Validation(
                "stiffness_check_interval must be at least 1".to_string(),
            ));
        }
        if i.stiffness_lower >= i.stiffness_upper {
            return Err(SimError::Validation(
                "stiffness_lower must be below stiffness_upper".to_string(),
            ));
        }
        if i.fixed_step_min <= 0.0 {
            return Err(SimError::Validation(
                "fixed_step_min must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_effect_site(&self) -> SimResult<()> {
        let e = &self.effect_site;
        if e.cp_delta_negligible <= 0.0 || e.small_step_threshold <= 0.0 {
            return Err(SimError::Validation(
                "Effect-site branch thresholds must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_simulation(&self) -> SimResult<()> {
        let s = &self.simulation;
        if !s.duration_min.is_finite() || s.duration_min <= 0.0 {
            return Err(SimError::Validation(
                "Simulation duration must be positive".to_string(),
            ));
        }
        if !s.tick_min.is_finite() || s.tick_min <= 0.0 || s.tick_min > s.duration_min {
            return Err(SimError::Validation(
                "Tick resolution must be positive and no longer than the duration".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_bracket_rejected() {
        let mut config = Config::default();
        config.model.ke0_bracket = (0.26, 0.15);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bracket_outside_clamp_band_rejected() {
        let mut config = Config::default();
        config.regression.clamp = (0.16, 0.30);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_tolerances_rejected() {
        let mut config = Config::default();
        config.integration.rtol = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.integration.atol = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stiffness_hysteresis_order_enforced() {
        let mut config = Config::default();
        config.integration.stiffness_lower = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert!(back.validate().is_ok());
        assert_eq!(back.model.time_to_peak_min, config.model.time_to_peak_min);
        assert_eq!(back.integration.rtol, config.integration.rtol);
    }
}
