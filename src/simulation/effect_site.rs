use crate::config::EffectSiteConfig;

/// Advance the effect-site concentration over one interval, selecting among
/// three update rules by the local regime of plasma-concentration change.
///
/// The selection is the point of this function: near-constant plasma would
/// make the general formula cancel catastrophically, a tiny ke0*dt would
/// lose digits in the exponential, and the Taylor branch would bias the
/// result over coarse intervals. Pure function of its arguments.
pub fn advance_effect_site(
    cp0: f64,
    cp1: f64,
    ce0: f64,
    ke0: f64,
    dt: f64,
    config: &EffectSiteConfig,
) -> f64 {
    let delta_cp = cp1 - cp0;

    // Constant plasma: plain exponential relaxation toward it.
    if delta_cp.abs() < config.cp_delta_negligible {
        return cp1 + (ce0 - cp1) * (-ke0 * dt).exp();
    }

    let slope = delta_cp / dt;

    // Very short step: second-order Taylor expansion in dt.
    if ke0 * dt < config.small_step_threshold {
        return ce0 + dt * ke0 * (cp0 - ce0) + dt * dt * ke0 * slope / 2.0;
    }

    // General solution for linearly varying plasma over the interval.
    cp0 + slope * dt - slope / ke0 + (ce0 - cp0 + slope / ke0) * (-ke0 * dt).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use approx::assert_relative_eq;

    fn config() -> Config {
        Config::default()
    }

    /// Thresholds forcing a particular branch, for boundary tests.
    fn force_taylor() -> EffectSiteConfig {
        EffectSiteConfig {
            cp_delta_negligible: 1e-300,
            small_step_threshold: f64::INFINITY,
        }
    }

    fn force_general() -> EffectSiteConfig {
        EffectSiteConfig {
            cp_delta_negligible: 1e-300,
            small_step_threshold: f64::MIN_POSITIVE,
        }
    }

    #[test]
    fn test_constant_plasma_relaxes_exponentially() {
        let cfg = config();
        let ke0 = 0.22;
        let ce1 = advance_effect_site(2.0, 2.0, 0.5, ke0, 3.0, &cfg.effect_site);
        let exact = 2.0 + (0.5 - 2.0) * (-ke0 * 3.0_f64).exp();
        assert_relative_eq!(ce1, exact, epsilon = 1e-12);
    }

    #[test]
    fn test_relaxation_is_stable_toward_plasma() {
        let cfg = config();
        // From either side, ce moves toward the plasma level and never
        // overshoots it.
        let above = advance_effect_site(1.0, 1.0, 3.0, 0.22, 5.0, &cfg.effect_site);
        assert!(above > 1.0 && above < 3.0);
        let below = advance_effect_site(1.0, 1.0, 0.2, 0.22, 5.0, &cfg.effect_site);
        assert!(below > 0.2 && below < 1.0);
    }

    #[test]
    fn test_branches_agree_to_second_order() {
        let ke0 = 0.2205;
        let taylor_cfg = force_taylor();
        let general_cfg = force_general();

        // The Taylor and general branches must converge at O(dt^2) as the
        // interval shrinks, so halving dt four times shrinks the gap by
        // about 256.
        let gap_at = |dt: f64| {
            let cp1 = 1.0 + 0.05 * dt;
            let taylor = advance_effect_site(1.0, cp1, 0.3, ke0, dt, &taylor_cfg);
            let general = advance_effect_site(1.0, cp1, 0.3, ke0, dt, &general_cfg);
            (taylor - general).abs()
        };

        let coarse = gap_at(1e-2);
        let fine = gap_at(1e-2 / 16.0);
        assert!(coarse < 1e-5);
        let ratio = coarse / fine;
        assert!(
            (128.0..512.0).contains(&ratio),
            "gap should scale as dt^2, got ratio {}",
            ratio
        );
    }

    #[test]
    fn test_general_branch_matches_analytic_solution() {
        // ce' = ke0 (cp(t) - ce) with cp linear has a closed-form solution;
        // the general branch must reproduce it over a coarse interval.
        let ke0 = 0.3;
        let dt = 4.0;
        let (cp0, cp1, ce0) = (1.0, 2.0, 0.25);
        let slope = (cp1 - cp0) / dt;
        let cfg = config();
        let ce1 = advance_effect_site(cp0, cp1, ce0, ke0, dt, &cfg.effect_site);
        let exact =
            cp0 + slope * dt - slope / ke0 + (ce0 - cp0 + slope / ke0) * (-ke0 * dt).exp();
        assert_relative_eq!(ce1, exact, epsilon = 1e-12);

        // And it stays between the starting effect-site level and the
        // plasma trajectory.
        assert!(ce1 > ce0 && ce1 < cp1);
    }

    #[test]
    fn test_zero_interval_is_identity_in_the_limit() {
        let cfg = config();
        let ce1 = advance_effect_site(1.5, 1.5000001, 0.9, 0.22, 1e-9, &cfg.effect_site);
        assert_relative_eq!(ce1, 0.9, epsilon = 1e-6);
    }
}
