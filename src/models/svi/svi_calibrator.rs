// src/models/svi/svi_calibrator.rs

//! Raw SVI single-slice calibrator
//!
//! Fits `(a, b, m, ρ, σ)` to one maturity by minimising the weighted Euclidean
//! distance between model and market volatilities. The butterfly condition
//! `g(k) >= ε` on the diagnostic grid enters as a quadratic penalty; in the
//! calendar-aware mode the total variance of the preceding maturity is a second
//! penalised floor. Two search modes:
//!
//! - cold: seeded random restarts inside the bounds, `a` held at `min_vol² t`
//! - warm: refinement passes from a previous slice's parameters
//!
//! Slices still violating the butterfly condition afterwards go through
//! [`repair_butterfly`](crate::models::svi::repair::repair_butterfly). In the
//! calendar-aware mode the accepted slice must also sit above the previous
//! maturity on the grid to within `calendar_tolerance`: the calendar penalty
//! weight is escalated until it does, then `a` is lifted by the remaining
//! shortfall, and a slice that still fails is rejected.

use crate::calibration::config::{OptimizationConfig, SliceCalibrationConfig};
use crate::calibration::pipeline::{local_refine, multi_start, random_starts};
use crate::calibration::types::{MaturitySlice, ModelCalibrator};
use crate::models::ssvi::surface::Surface;
use crate::models::svi::arbitrage::{check_butterfly, g_function, ButterflyReport};
use crate::models::svi::repair::repair_butterfly;
use crate::models::svi::svi_model::RawSvi;
use crate::models::traits::TotalVariance;
use anyhow::{anyhow, bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Objective value for parameter sets that cannot be evaluated.
pub(crate) const INFEASIBLE: f64 = 1.0e12;

/// Structure to hold parameter bounds for the SVI model calibration
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SviParamBounds {
    /// Vertical shift, `[a_lower, t * max_vol²]`
    pub a: (f64, f64),
    /// Wing slope factor
    pub b: (f64, f64),
    /// Horizontal shift, `[2 k_min, 2 k_max]`
    pub m: (f64, f64),
    pub rho: (f64, f64),
    pub sigma: (f64, f64),
}

impl SviParamBounds {
    /// Bounds derived from the slice's observed range. `calendar` widens the `b`
    /// bound for the dual-constraint mode.
    pub fn for_slice(slice: &MaturitySlice, config: &SliceCalibrationConfig, calendar: bool) -> Self {
        let a_lo = config.a_lower;
        let a_hi = (slice.tenor * slice.max_vol().powi(2)).max(a_lo * 10.0);
        let b_hi = if calendar {
            config.b_upper_dual
        } else {
            config.b_bounds.1
        };
        let (mut m_lo, mut m_hi) = (2.0 * slice.k_min(), 2.0 * slice.k_max());
        if m_hi - m_lo < 1e-6 {
            m_lo -= 0.1;
            m_hi += 0.1;
        }
        Self {
            a: (a_lo, a_hi),
            b: (config.b_bounds.0, b_hi),
            m: (m_lo, m_hi),
            rho: config.rho_bounds,
            sigma: config.sigma_bounds,
        }
    }

    /// Bounds in optimiser order `[a, b, m, rho, sigma]`.
    pub fn to_vec(&self) -> Vec<(f64, f64)> {
        vec![self.a, self.b, self.m, self.rho, self.sigma]
    }
}

/// Weighted distance between model and market vols over a slice.
///
/// Weights are scaled so the largest is 1.
pub(crate) fn weighted_vol_distance<T: TotalVariance + ?Sized>(
    model: &T,
    slice: &MaturitySlice,
    weights: &[f64],
) -> f64 {
    let mut sum = 0.0;
    for (i, (&k, &vol)) in slice
        .log_moneyness
        .iter()
        .zip(slice.market_vols.iter())
        .enumerate()
    {
        let diff = weights[i] * (model.implied_vol(k, slice.tenor) - vol);
        sum += diff * diff;
    }
    sum.sqrt()
}

pub(crate) fn normalised_weights(slice: &MaturitySlice) -> Vec<f64> {
    let raw: Vec<f64> = (0..slice.len()).map(|i| slice.weight(i)).collect();
    let max = raw.iter().copied().fold(0.0, f64::max);
    if max > 0.0 {
        raw.iter().map(|w| w / max).collect()
    } else {
        vec![1.0; raw.len()]
    }
}

/// Quadratic penalty on `g < epsilon` over the grid; `None` where `w <= 0`.
pub(crate) fn butterfly_penalty<T: TotalVariance + ?Sized>(
    model: &T,
    grid: &[f64],
    epsilon: f64,
) -> Option<f64> {
    let mut penalty = 0.0;
    for &k in grid {
        let g = g_function(model, k);
        if !g.is_finite() {
            return None;
        }
        let gap = (epsilon - g).max(0.0);
        penalty += gap * gap;
    }
    Some(penalty)
}

/// Result of a single-slice calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceFit {
    pub tenor: f64,
    pub params: RawSvi,
    /// Penalised objective at `params` (before any repair)
    pub objective: f64,
    /// Weighted vol distance at the final `params`
    pub residual: f64,
    /// Whether the butterfly repair replaced the optimiser's answer
    pub repaired: bool,
    pub butterfly: ButterflyReport,
}

/// Calibrator for one maturity: 5 parameters `[a, b, m, rho, sigma]`.
#[derive(Debug, Clone)]
pub struct SviSliceCalibrator {
    slice: MaturitySlice,
    grid: Vec<f64>,
    weights: Vec<f64>,
    bounds: SviParamBounds,
    param_bounds: Vec<(f64, f64)>,
    config: SliceCalibrationConfig,
    /// Total variance of the preceding maturity on `grid`
    calendar_floor: Option<Vec<f64>>,
    calendar_weight: f64,
}

impl SviSliceCalibrator {
    pub fn new(slice: &MaturitySlice, grid: &[f64], config: &SliceCalibrationConfig) -> Result<Self> {
        if slice.len() < config.min_points {
            bail!(
                "SVI calibration at tenor {} needs at least {} points, got {}",
                slice.tenor,
                config.min_points,
                slice.len()
            );
        }
        if grid.is_empty() {
            return Err(anyhow!("SVI calibration needs a non-empty diagnostic grid"));
        }
        let bounds = SviParamBounds::for_slice(slice, config, false);
        Ok(Self {
            slice: slice.clone(),
            grid: grid.to_vec(),
            weights: normalised_weights(slice),
            param_bounds: bounds.to_vec(),
            bounds,
            config: config.clone(),
            calendar_floor: None,
            calendar_weight: config.penalty_weight,
        })
    }

    /// Adds the calendar constraint against the preceding maturity.
    pub fn with_previous<P: TotalVariance + ?Sized>(mut self, previous: &P) -> Self {
        self.calendar_floor = Some(
            self.grid
                .iter()
                .map(|&k| previous.total_variance(k))
                .collect(),
        );
        self.bounds = SviParamBounds::for_slice(&self.slice, &self.config, true);
        self.param_bounds = self.bounds.to_vec();
        self
    }

    /// Overrides the calendar penalty multiplier (defaults to `penalty_weight`).
    pub fn with_calendar_weight(mut self, weight: f64) -> Self {
        self.calendar_weight = weight;
        self
    }

    pub fn bounds(&self) -> &SviParamBounds {
        &self.bounds
    }

    pub fn slice(&self) -> &MaturitySlice {
        &self.slice
    }

    pub fn grid(&self) -> &[f64] {
        &self.grid
    }

    /// Weighted vol distance, without penalties.
    pub fn residual(&self, params: &RawSvi) -> f64 {
        weighted_vol_distance(params, &self.slice, &self.weights)
    }

    /// Largest `w_prev(k) - w(k)` over the grid; zero without a previous maturity.
    pub fn calendar_shortfall(&self, params: &RawSvi) -> f64 {
        self.calendar_floor.as_ref().map_or(0.0, |floor| {
            self.grid
                .iter()
                .zip(floor.iter())
                .map(|(&k, &w_prev)| w_prev - params.total_variance(k))
                .fold(0.0, f64::max)
        })
    }

    /// Full penalised objective at `params`, the quantity the optimiser minimises.
    pub fn evaluate(&self, params: &RawSvi) -> f64 {
        if !params.to_vec().iter().all(|v| v.is_finite()) || params.min_total_variance() <= 0.0 {
            return INFEASIBLE;
        }
        let distance = self.residual(params);
        let butterfly = match butterfly_penalty(params, &self.grid, self.config.constraint_epsilon) {
            Some(p) => p,
            None => return INFEASIBLE,
        };
        let calendar = self.calendar_floor.as_ref().map_or(0.0, |floor| {
            self.grid
                .iter()
                .zip(floor.iter())
                .map(|(&k, &w_prev)| (w_prev - params.total_variance(k)).max(0.0).powi(2))
                .sum()
        });
        let obj =
            distance + self.config.penalty_weight * butterfly + self.calendar_weight * calendar;
        if obj.is_finite() {
            obj
        } else {
            INFEASIBLE
        }
    }

    /// Multi-start search from seeded random points.
    pub fn calibrate(&self, opt: &OptimizationConfig) -> Result<(f64, RawSvi)> {
        let a_guess = self.slice.min_vol().powi(2) * self.slice.tenor;
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let starts = random_starts(
            &self.param_bounds,
            self.config.restarts.max(1),
            &[(0, a_guess)],
            &mut rng,
        );
        let (obj, x) = multi_start(self, opt, &starts)
            .ok_or_else(|| anyhow!("no restarts ran at tenor {}", self.slice.tenor))?;
        tracing::debug!(
            tenor = self.slice.tenor,
            restarts = starts.len(),
            obj,
            "SVI multi-start calibration done"
        );
        Ok((obj, RawSvi::from_slice(&x)?))
    }

    /// Refinement passes from a warm start, each pass restarting from the best so far.
    pub fn calibrate_from(&self, opt: &OptimizationConfig, warm: &RawSvi) -> Result<(f64, RawSvi)> {
        let mut best = warm.to_vec();
        let mut best_obj = self.evaluate_objective(&best);
        for pass in 0..self.config.refinement_passes.max(1) {
            let (obj, x) = local_refine(self, opt, &best);
            tracing::trace!(tenor = self.slice.tenor, pass, obj, "SVI warm refinement pass");
            if obj <= best_obj {
                best_obj = obj;
                best = x;
            }
        }
        Ok((best_obj, RawSvi::from_slice(&best)?))
    }

    fn repair_if_needed(&self, params: RawSvi, opt: &OptimizationConfig) -> (RawSvi, bool) {
        let report = check_butterfly(&params, &self.grid, self.config.repair_tolerance);
        if report.is_arbitrage_free() {
            return (params, false);
        }
        tracing::warn!(
            tenor = self.slice.tenor,
            min_g = report.min_g,
            violations = report.violations.len(),
            "butterfly arbitrage after calibration, repairing slice"
        );
        (
            repair_butterfly(&params, &self.slice, &self.grid, &self.config, opt),
            true,
        )
    }

    /// Re-solves with a growing calendar weight while the slice undercuts the
    /// previous maturity, then lifts `a` by whatever shortfall remains.
    fn enforce_calendar(
        &self,
        mut params: RawSvi,
        mut repaired: bool,
        opt: &OptimizationConfig,
    ) -> Result<(RawSvi, bool)> {
        let tolerance = self.config.calendar_tolerance;
        let growth = self.config.penalty_growth;
        let mut weight = self.calendar_weight;
        let mut shortfall = self.calendar_shortfall(&params);

        while shortfall > tolerance
            && growth > 1.0
            && weight * growth <= self.config.max_penalty_weight
        {
            weight *= growth;
            tracing::debug!(
                tenor = self.slice.tenor,
                shortfall,
                weight,
                "calendar shortfall after calibration, escalating penalty"
            );
            let escalated = self.clone().with_calendar_weight(weight);
            let (_, resolved) = escalated.calibrate_from(opt, &params)?;
            let (resolved, fixed) = self.repair_if_needed(resolved, opt);
            params = resolved;
            repaired |= fixed;
            shortfall = self.calendar_shortfall(&params);
        }
        if shortfall <= tolerance {
            return Ok((params, repaired));
        }

        let lifted = RawSvi {
            a: params.a + shortfall + tolerance,
            ..params
        };
        let butterfly = check_butterfly(&lifted, &self.grid, self.config.repair_tolerance);
        let remaining = self.calendar_shortfall(&lifted);
        if !butterfly.is_arbitrage_free() || remaining > tolerance {
            bail!(
                "calendar arbitrage against the previous maturity persists at tenor {}: shortfall {:.3e}",
                self.slice.tenor,
                remaining
            );
        }
        tracing::warn!(
            tenor = self.slice.tenor,
            shortfall,
            "lifted SVI level to clear calendar shortfall"
        );
        Ok((lifted, repaired))
    }

    /// Calibrates (cold without `warm`, warm otherwise) and repairs the result if
    /// the butterfly diagnostics fail. With a previous maturity attached the result
    /// is also held to the calendar floor, or rejected.
    pub fn fit(&self, opt: &OptimizationConfig, warm: Option<&RawSvi>) -> Result<SliceFit> {
        let (objective, params) = match warm {
            Some(w) => self.calibrate_from(opt, w)?,
            None => self.calibrate(opt)?,
        };

        let (params, repaired) = self.repair_if_needed(params, opt);
        let (params, repaired) = if self.calendar_floor.is_some() {
            self.enforce_calendar(params, repaired, opt)?
        } else {
            (params, repaired)
        };

        Ok(SliceFit {
            tenor: self.slice.tenor,
            residual: self.residual(&params),
            butterfly: check_butterfly(&params, &self.grid, self.config.repair_tolerance),
            params,
            objective,
            repaired,
        })
    }
}

impl ModelCalibrator for SviSliceCalibrator {
    fn model_name(&self) -> &str {
        "svi"
    }

    fn param_bounds(&self) -> &[(f64, f64)] {
        &self.param_bounds
    }

    fn evaluate_objective(&self, x: &[f64]) -> f64 {
        match RawSvi::from_slice(x) {
            Ok(params) => self.evaluate(&params),
            Err(_) => INFEASIBLE,
        }
    }

    fn param_names(&self) -> Vec<&str> {
        vec!["a", "b", "m", "rho", "sigma"]
    }
}

/// Raw SVI fits for a sequence of maturities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SviSurfaceFit {
    pub surface: Surface<RawSvi>,
    pub fits: Vec<SliceFit>,
    /// Tenors that could not be calibrated
    pub skipped: Vec<f64>,
}

/// Calendar-aware fold over maturities in increasing tenor order: the first
/// maturity is fitted cold, every later one warm-started from, and floored by,
/// the last accepted fit.
pub fn calibrate_svi_sequence(
    slices: &[MaturitySlice],
    grid: &[f64],
    config: &SliceCalibrationConfig,
    opt: &OptimizationConfig,
) -> Result<SviSurfaceFit> {
    let mut ordered: Vec<&MaturitySlice> = slices.iter().collect();
    ordered.sort_by(|a, b| a.tenor.total_cmp(&b.tenor));

    let mut surface = Surface::new();
    let mut fits = Vec::new();
    let mut skipped = Vec::new();
    let mut previous: Option<RawSvi> = None;

    for slice in ordered {
        if surface.slices().last().map_or(false, |s| slice.tenor <= s.tenor()) {
            tracing::warn!(tenor = slice.tenor, "duplicate SVI tenor, skipping");
            skipped.push(slice.tenor);
            continue;
        }
        let fit = SviSliceCalibrator::new(slice, grid, config).and_then(|cal| match &previous {
            Some(prev) => cal.with_previous(prev).fit(opt, Some(prev)),
            None => cal.fit(opt, None),
        });
        match fit {
            Ok(fit) => {
                previous = Some(fit.params);
                surface.push(slice.clone(), fit.params)?;
                fits.push(fit);
            }
            Err(e) => {
                tracing::warn!(tenor = slice.tenor, error = %e, "skipping maturity");
                skipped.push(slice.tenor);
            }
        }
    }

    if surface.is_empty() {
        bail!("SVI calibration: no maturity could be calibrated");
    }
    Ok(SviSurfaceFit {
        surface,
        fits,
        skipped,
    })
}
