use super::PKParameters;
use crate::error::{SimError, SimResult};

/// Relative spacing below which two hybrid rate constants are treated as
/// coincident, which makes the partial-fraction residues ill-defined.
const ROOT_SEPARATION_EPS: f64 = 1e-10;

/// Hybrid (eigenvalue) rate constants of the linear three-compartment system
/// and the matching unit-impulse plasma coefficients.
///
/// The roots are sorted ascending, `alpha <= beta <= gamma`. The residue
/// formulas below assume exactly this ordering, so it is part of the type's
/// contract, not a presentation choice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridCoefficients {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl HybridCoefficients {
    /// Solve the characteristic cubic of the compartment system and build the
    /// tri-exponential plasma coefficients.
    ///
    /// Uses the closed-form trigonometric solution for three real roots. A
    /// positive discriminant means complex roots, which a physically valid
    /// rate-constant set cannot produce, so that case is a fatal
    /// `InvalidCompartmentModel` rather than something to iterate on.
    pub fn from_rate_constants(params: &PKParameters) -> SimResult<Self> {
        let (k10, k12, k21, k13, k31) = params.rate_constants();

        for (name, k) in [
            ("k10", k10),
            ("k12", k12),
            ("k21", k21),
            ("k13", k13),
            ("k31", k31),
        ] {
            if !k.is_finite() || k <= 0.0 {
                return Err(SimError::InvalidCompartmentModel(format!(
                    "Rate constant {} must be positive, got {}",
                    name, k
                )));
            }
        }

        // Characteristic cubic x^3 - a2*x^2 + a1*x - a0 = 0.
        let a2 = k10 + k12 + k21 + k13 + k31;
        let a1 = k10 * k21 + k13 * k21 + k10 * k31 + k12 * k31 + k21 * k31;
        let a0 = k10 * k21 * k31;

        // Depressed form and discriminant.
        let m = (3.0 * a1 - a2 * a2) / 3.0;
        let n = (2.0 * a2.powi(3) - 9.0 * a2 * a1 + 27.0 * a0) / 27.0;
        let q = n.powi(2) / 4.0 + m.powi(3) / 27.0;

        if q > 0.0 {
            return Err(SimError::InvalidCompartmentModel(format!(
                "Characteristic cubic has complex roots (discriminant {:.3e})",
                q
            )));
        }

        let im = (-q).sqrt();
        let re = -n / 2.0;
        let magnitude = (re * re + im * im).sqrt();
        let theta = im.atan2(re);
        let radius = magnitude.powf(1.0 / 3.0);

        let r1 = a2 / 3.0
            + radius * ((theta / 3.0).cos() + 3.0_f64.sqrt() * (theta / 3.0).sin());
        let r2 = a2 / 3.0
            + radius * ((theta / 3.0).cos() - 3.0_f64.sqrt() * (theta / 3.0).sin());
        let r3 = a2 / 3.0 - 2.0 * radius * (theta / 3.0).cos();

        let mut roots = [r1, r2, r3];
        roots.sort_by(|x, y| x.partial_cmp(y).unwrap());
        let [alpha, beta, gamma] = roots;

        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(SimError::InvalidCompartmentModel(format!(
                "Non-positive hybrid rate constant {:.6e}",
                alpha
            )));
        }
        if (beta - alpha) < ROOT_SEPARATION_EPS * gamma
            || (gamma - beta) < ROOT_SEPARATION_EPS * gamma
        {
            return Err(SimError::InvalidCompartmentModel(
                "Coincident hybrid rate constants, residues are undefined".to_string(),
            ));
        }

        // Partial-fraction residues of the Laplace-domain unit-impulse plasma
        // response a1(t)/V1; they sum to one by construction.
        let a = (k21 - alpha) * (k31 - alpha) / ((beta - alpha) * (gamma - alpha));
        let b = (k21 - beta) * (k31 - beta) / ((alpha - beta) * (gamma - beta));
        let c = (k21 - gamma) * (k31 - gamma) / ((alpha - gamma) * (beta - gamma));

        Ok(Self {
            alpha,
            beta,
            gamma,
            a,
            b,
            c,
        })
    }

    pub fn roots(&self) -> [f64; 3] {
        [self.alpha, self.beta, self.gamma]
    }

    pub fn residues(&self) -> [f64; 3] {
        [self.a, self.b, self.c]
    }

    /// Unit-impulse plasma concentration response at time t for a unit dose
    /// into the central compartment of unit volume.
    pub fn plasma_impulse(&self, t: f64) -> f64 {
        self.a * (-self.alpha * t).exp()
            + self.b * (-self.beta * t).exp()
            + self.c * (-self.gamma * t).exp()
    }
}
