pub mod disposition;
pub mod hybrid;
pub mod ke0;

use serde::{Deserialize, Serialize};
use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

/// ASA physical status collapsed to the binary split the disposition model
/// distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsaClass {
    Class1Or2,
    Class3Or4,
}

/// Immutable covariate set for one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatientCovariates {
    pub age_yr: f64,
    pub weight_kg: f64,
    pub height_cm: f64,
    pub sex: Sex,
    pub asa: AsaClass,
}

impl PatientCovariates {
    pub fn validate(&self) -> SimResult<()> {
        if !self.age_yr.is_finite() || !(0.0..=120.0).contains(&self.age_yr) {
            return Err(SimError::InvalidCovariate(format!(
                "Age must be within [0, 120] years, got {}",
                self.age_yr
            )));
        }
        if !self.weight_kg.is_finite() || self.weight_kg <= 0.0 || self.weight_kg > 250.0 {
            return Err(SimError::InvalidCovariate(format!(
                "Weight must be within (0, 250] kg, got {}",
                self.weight_kg
            )));
        }
        if !self.height_cm.is_finite() || self.height_cm <= 0.0 || self.height_cm > 250.0 {
            return Err(SimError::InvalidCovariate(format!(
                "Height must be within (0, 250] cm, got {}",
                self.height_cm
            )));
        }
        Ok(())
    }
}

/// Individual disposition parameters. `ke0` stays `None` until the ke0
/// subsystem has resolved a value; everything else is read-only after
/// derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PKParameters {
    pub v1: f64,   // Central volume (L)
    pub v2: f64,   // Shallow peripheral volume (L)
    pub v3: f64,   // Deep peripheral volume (L)
    pub cl: f64,   // Elimination clearance (L/min)
    pub q2: f64,   // Inter-compartmental clearance 1<->2 (L/min)
    pub q3: f64,   // Inter-compartmental clearance 1<->3 (L/min)
    pub k10: f64,
    pub k12: f64,
    pub k21: f64,
    pub k13: f64,
    pub k31: f64,
    pub ke0: Option<f64>,
}

impl PKParameters {
    pub fn with_ke0(mut self, ke0: f64) -> Self {
        self.ke0 = Some(ke0);
        self
    }

    pub fn rate_constants(&self) -> (f64, f64, f64, f64, f64) {
        (self.k10, self.k12, self.k21, self.k13, self.k31)
    }
}
