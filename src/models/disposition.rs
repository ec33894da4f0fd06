use log::debug;

use super::{AsaClass, PKParameters, PatientCovariates, Sex};
use crate::config::ModelConfig;
use crate::error::SimResult;

/// Derive individual volumes, clearances and linear rate constants from the
/// covariates by allometric scaling against the reference individual.
///
/// Pure function: identical covariates yield bit-identical parameters. Bad
/// covariates are rejected up front, never clamped into range.
pub fn derive_pk_parameters(
    covariates: &PatientCovariates,
    model: &ModelConfig,
) -> SimResult<PKParameters> {
    covariates.validate()?;

    let weight_ratio = covariates.weight_kg / model.reference_weight_kg;
    let age_ratio = covariates.age_yr / model.reference_age_yr;

    let v1 = model.v1_ref * weight_ratio.powf(model.volume_weight_exponent);
    let v2 = model.v2_ref * weight_ratio.powf(model.volume_weight_exponent);
    let v3 = model.v3_ref
        * weight_ratio.powf(model.volume_weight_exponent)
        * age_ratio.powf(model.v3_age_exponent);

    let sex_term = match covariates.sex {
        Sex::Male => 0.0,
        Sex::Female => model.cl_female_factor,
    };
    let asa_term = match covariates.asa {
        AsaClass::Class1Or2 => 0.0,
        AsaClass::Class3Or4 => model.cl_asa34_factor,
    };
    let cl = model.cl_ref
        * weight_ratio.powf(model.clearance_weight_exponent)
        * (sex_term + asa_term).exp();
    let q2 = model.q2_ref * weight_ratio.powf(model.clearance_weight_exponent);
    let q3 = model.q3_ref * weight_ratio.powf(model.clearance_weight_exponent);

    debug!(
        "Derived disposition: V1={:.3} V2={:.3} V3={:.3} CL={:.4} Q2={:.4} Q3={:.4}",
        v1, v2, v3, cl, q2, q3
    );

    Ok(PKParameters {
        v1,
        v2,
        v3,
        cl,
        q2,
        q3,
        k10: cl / v1,
        k12: q2 / v1,
        k21: q2 / v2,
        k13: q3 / v1,
        k31: q3 / v3,
        ke0: None,
    })
}
