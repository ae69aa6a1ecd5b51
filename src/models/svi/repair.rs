// src/models/svi/repair.rs

//! Butterfly repair for raw SVI slices.
//!
//! The slice is moved to jump-wings coordinates and repicked: `(v, ψ, p)` are kept
//! while `c` and `ṽ` are recomputed so that the slice coincides with an SSVI slice,
//! which is butterfly-free whenever it satisfies the Gatheral-Jacquier bounds
//! `θφ(1+|ρ|) < 4` and `θφ²(1+|ρ|) <= 4`. `(c, ṽ)` are then re-optimised inside the
//! box spanned by their original and repicked values to win back fit quality.

use crate::calibration::config::{OptimizationConfig, SliceCalibrationConfig};
use crate::calibration::pipeline::local_refine;
use crate::calibration::types::{MaturitySlice, ModelCalibrator};
use crate::models::svi::arbitrage::check_butterfly;
use crate::models::svi::svi_calibrator::{
    butterfly_penalty, normalised_weights, weighted_vol_distance, INFEASIBLE,
};
use crate::models::svi::svi_model::{JumpWings, RawSvi, SsviParams};

/// Safety margin applied to the Gatheral-Jacquier bounds in the last-resort projection.
const GJ_MARGIN: f64 = 0.999;

/// Objective over `[c, v_tilde]` with `(v, ψ, p)` frozen.
struct WingObjective<'a> {
    base: JumpWings,
    tenor: f64,
    slice: &'a MaturitySlice,
    weights: Vec<f64>,
    grid: &'a [f64],
    epsilon: f64,
    penalty_weight: f64,
    bounds: Vec<(f64, f64)>,
}

impl WingObjective<'_> {
    fn raw(&self, x: &[f64]) -> RawSvi {
        JumpWings {
            c: x[0],
            v_tilde: x[1],
            ..self.base
        }
        .to_raw(self.tenor)
    }
}

impl ModelCalibrator for WingObjective<'_> {
    fn model_name(&self) -> &str {
        "svi-jw-repair"
    }

    fn param_bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    fn evaluate_objective(&self, x: &[f64]) -> f64 {
        if x.len() != 2 {
            return INFEASIBLE;
        }
        let raw = self.raw(x);
        if !raw.to_vec().iter().all(|v| v.is_finite()) {
            return INFEASIBLE;
        }
        let distance = weighted_vol_distance(&raw, self.slice, &self.weights);
        match butterfly_penalty(&raw, self.grid, self.epsilon) {
            Some(p) if distance.is_finite() => distance + self.penalty_weight * p,
            _ => INFEASIBLE,
        }
    }

    fn param_names(&self) -> Vec<&str> {
        vec!["c", "v_tilde"]
    }
}

/// Closest SSVI slice to `jw` satisfying the Gatheral-Jacquier no-butterfly bounds.
fn project_to_ssvi(jw: &JumpWings, tenor: f64) -> RawSvi {
    let theta = jw.v * tenor;
    let sqrt_theta = theta.sqrt();
    let skew_sum = jw.p + jw.psi;
    let (rho, phi) = if skew_sum > 0.0 {
        (
            (jw.psi / skew_sum).clamp(-0.999, 0.999),
            2.0 * skew_sum / sqrt_theta,
        )
    } else {
        (-0.999, 1e-3)
    };
    let scale = 1.0 + rho.abs();
    let phi_max = (4.0 / (theta * scale)).min(2.0 / (theta * scale).sqrt()) * GJ_MARGIN;
    SsviParams {
        rho,
        theta,
        phi: phi.clamp(1e-6, phi_max),
    }
    .to_raw()
}

/// Replaces a slice that violates the butterfly condition with an arbitrage-free one.
///
/// Never fails: when the re-optimised wings still violate the condition the repicked
/// slice is returned, and when even that fails the SSVI projection is.
pub fn repair_butterfly(
    params: &RawSvi,
    slice: &MaturitySlice,
    grid: &[f64],
    config: &SliceCalibrationConfig,
    opt: &OptimizationConfig,
) -> RawSvi {
    let tenor = slice.tenor;
    let tolerance = config.repair_tolerance;
    let jw = params.to_jump_wings(tenor);
    let repicked = jw.repick();
    let repicked_raw = repicked.to_raw(tenor);

    let repick_valid = jw.p > 0.0
        && repicked.c > 0.0
        && repicked_raw.to_vec().iter().all(|v| v.is_finite())
        && check_butterfly(&repicked_raw, grid, tolerance).is_arbitrage_free();
    if !repick_valid {
        tracing::warn!(
            tenor,
            p = jw.p,
            psi = jw.psi,
            "repicked slice not arbitrage-free, projecting onto SSVI bounds"
        );
        return project_to_ssvi(&jw, tenor);
    }

    let span = |a: f64, b: f64| (a.min(b), a.max(b));
    let objective = WingObjective {
        base: jw,
        tenor,
        slice,
        weights: normalised_weights(slice),
        grid,
        epsilon: config.constraint_epsilon,
        penalty_weight: config.penalty_weight,
        bounds: vec![span(jw.c, repicked.c), span(jw.v_tilde, repicked.v_tilde)],
    };
    let (obj, x) = local_refine(&objective, opt, &[repicked.c, repicked.v_tilde]);
    let optimised = objective.raw(&x);

    if optimised.to_vec().iter().all(|v| v.is_finite())
        && check_butterfly(&optimised, grid, tolerance).is_arbitrage_free()
    {
        tracing::debug!(tenor, obj, "butterfly repair re-optimised wings");
        optimised
    } else {
        tracing::debug!(tenor, "re-optimised wings infeasible, keeping repicked slice");
        repicked_raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::config::linspace;
    use crate::models::traits::TotalVariance;

    fn arbitrageable() -> RawSvi {
        RawSvi {
            a: 0.001,
            b: 0.4,
            m: 0.1,
            rho: 0.7,
            sigma: 0.05,
        }
    }

    #[test]
    fn test_repair_removes_butterfly_arbitrage() {
        let bad = arbitrageable();
        let tenor = 0.25;
        let grid = linspace(-1.5, 1.5, 49);
        assert!(!check_butterfly(&bad, &grid, 0.0).is_arbitrage_free());

        let ks = linspace(-0.3, 0.3, 13);
        let vols = ks.iter().map(|&k| bad.implied_vol(k, tenor)).collect();
        let slice = MaturitySlice::new(tenor, ks, vols, None).unwrap();
        let fixed = repair_butterfly(
            &bad,
            &slice,
            &grid,
            &SliceCalibrationConfig::default(),
            &OptimizationConfig::fast(),
        );
        let report = check_butterfly(&fixed, &grid, 1e-10);
        assert!(report.is_arbitrage_free(), "min g {}", report.min_g);
    }

    #[test]
    fn test_repair_keeps_atm_variance_and_skew() {
        let bad = arbitrageable();
        let tenor = 0.25;
        let jw = bad.to_jump_wings(tenor);
        let repicked = jw.repick().to_raw(tenor).to_jump_wings(tenor);
        assert!((repicked.v - jw.v).abs() < 1e-10);
        assert!((repicked.psi - jw.psi).abs() < 1e-10);
        assert!((repicked.p - jw.p).abs() < 1e-10);
    }

    #[test]
    fn test_projection_respects_bounds() {
        let jw = JumpWings {
            v: 0.5,
            psi: 0.5,
            p: 3.0,
            c: 1.0,
            v_tilde: 0.3,
        };
        let raw = project_to_ssvi(&jw, 1.0);
        let report = check_butterfly(&raw, &linspace(-1.5, 1.5, 49), 1e-10);
        assert!(report.is_arbitrage_free(), "min g {}", report.min_g);
    }
}
