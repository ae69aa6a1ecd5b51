// src/models/ssvi/essvi_calibrator.rs

//! Sequential eSSVI calibration with maturity-dependent correlation.
//!
//! Maturities are processed in increasing tenor order as a fold whose accumulator
//! is the [`PreviousSlice`] summary `(θ, ρ, ψ)` of the last accepted maturity. For a
//! candidate `ρ` the admissible ATM skew `ψ` is an interval:
//!
//! - butterfly: `ψ <= ψ⁺(ρ, k*, θ*)`, from `ψ(1+|ρ|) < 4` and `ψ²(1+|ρ|) <= 4θ`
//! - first maturity: `θ > 0`
//! - later maturities: `ψ >= ψ⁻` from the previous `(ψ, ρ)`, and `θ >= θ_prev`
//!
//! with `θ = θ* - ρψk*` anchored at the observed point `k*` nearest the money.
//! A golden-section search picks `ψ` inside the interval, and the result is
//! verified against the previous slice on the diagnostic grid since the interval
//! conditions alone do not rule out every calendar crossing.
//! The outer `ρ` search samples uniformly, then again in a window around the best.

use crate::calibration::config::EssviConfig;
use crate::calibration::types::MaturitySlice;
use crate::models::ssvi::surface::Surface;
use crate::models::svi::svi_calibrator::{normalised_weights, INFEASIBLE};
use crate::models::svi::svi_model::SsviParams;
use crate::models::traits::TotalVariance;
use crate::optim::{golden_section, GoldenSectionConfig};
use anyhow::{anyhow, bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Smallest admissible ATM skew.
const PSI_FLOOR: f64 = 1e-8;

/// Relative margin keeping strict inequalities strict.
const STRICT_MARGIN: f64 = 1e-9;

/// What the next maturity needs to know about the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviousSlice {
    pub theta: f64,
    pub rho: f64,
    pub psi: f64,
}

impl PreviousSlice {
    pub fn params(&self) -> SsviParams {
        SsviParams::from_psi(self.rho, self.theta, self.psi)
    }
}

impl From<&SsviParams> for PreviousSlice {
    fn from(p: &SsviParams) -> Self {
        Self {
            theta: p.theta,
            rho: p.rho,
            psi: p.psi(),
        }
    }
}

/// ATM anchor of a slice: the observed `k*` nearest 0 and `θ* = σ(k*)² t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub k_star: f64,
    pub theta_star: f64,
}

impl Anchor {
    pub fn from_slice(slice: &MaturitySlice) -> Option<Self> {
        let i = slice.atm_index()?;
        Some(Self {
            k_star: slice.log_moneyness[i],
            theta_star: slice.market_vols[i].powi(2) * slice.tenor,
        })
    }

    /// `θ = θ* - ρψk*`
    pub fn theta(&self, rho: f64, psi: f64) -> f64 {
        self.theta_star - rho * psi * self.k_star
    }
}

/// Butterfly upper bound on `ψ` for correlation `rho`.
pub fn psi_plus(rho: f64, anchor: &Anchor) -> f64 {
    let scale = 1.0 + rho.abs();
    let rk = rho * anchor.k_star;
    let quadratic = 2.0 * (-rk + (rk * rk + scale * anchor.theta_star).sqrt()) / scale;
    (4.0 / scale * (1.0 - STRICT_MARGIN)).min(quadratic)
}

/// Calendar lower bound on `ψ` implied by the previous slice.
pub fn psi_minus(rho: f64, previous: &PreviousSlice) -> f64 {
    previous.psi * ((1.0 + previous.rho) / (1.0 + rho)).max((1.0 - previous.rho) / (1.0 - rho))
}

/// Admissible `[lower, upper]` for `ψ`, or `None` when empty.
pub fn psi_bounds(rho: f64, anchor: &Anchor, previous: Option<&PreviousSlice>) -> Option<(f64, f64)> {
    let mut lower = PSI_FLOOR;
    let mut upper = psi_plus(rho, anchor);
    let rk = rho * anchor.k_star;

    match previous {
        None => {
            if rk > 0.0 {
                upper = upper.min(anchor.theta_star / rk * (1.0 - STRICT_MARGIN));
            }
        }
        Some(prev) => {
            lower = lower.max(psi_minus(rho, prev));
            let gap = anchor.theta_star - prev.theta;
            if rk > 0.0 {
                upper = upper.min(gap / rk);
            } else if rk < 0.0 {
                lower = lower.max(gap / rk);
            } else if gap < 0.0 {
                return None;
            }
        }
    }

    (lower.is_finite() && upper.is_finite() && lower <= upper).then_some((lower, upper))
}

/// Fitted eSSVI maturity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EssviSliceFit {
    pub tenor: f64,
    pub params: SsviParams,
    /// Weighted sum of squared vol residuals
    pub residual: f64,
}

/// Calibrated eSSVI surface plus per-maturity diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EssviFit {
    pub surface: Surface<SsviParams>,
    pub fits: Vec<EssviSliceFit>,
    /// Tenors that could not be calibrated
    pub skipped: Vec<f64>,
}

/// Single-maturity eSSVI problem given the previous maturity.
pub struct EssviSliceCalibrator<'a> {
    slice: &'a MaturitySlice,
    grid: &'a [f64],
    config: &'a EssviConfig,
    weights: Vec<f64>,
    anchor: Anchor,
    previous: Option<PreviousSlice>,
    previous_floor: Option<Vec<f64>>,
}

impl<'a> EssviSliceCalibrator<'a> {
    pub fn new(
        slice: &'a MaturitySlice,
        grid: &'a [f64],
        config: &'a EssviConfig,
        previous: Option<PreviousSlice>,
    ) -> Result<Self> {
        if slice.len() < config.min_points {
            bail!(
                "eSSVI calibration at tenor {} needs at least {} points, got {}",
                slice.tenor,
                config.min_points,
                slice.len()
            );
        }
        let anchor = Anchor::from_slice(slice)
            .ok_or_else(|| anyhow!("eSSVI calibration: empty slice at tenor {}", slice.tenor))?;
        let previous_floor = previous.map(|p| {
            let params = p.params();
            grid.iter().map(|&k| params.total_variance(k)).collect()
        });
        Ok(Self {
            slice,
            grid,
            config,
            weights: normalised_weights(slice),
            anchor,
            previous,
            previous_floor,
        })
    }

    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    fn params_for(&self, rho: f64, psi: f64) -> Option<SsviParams> {
        let theta = self.anchor.theta(rho, psi);
        let params = SsviParams::from_psi(rho, theta, psi);
        (theta > 0.0 && params.phi.is_finite() && params.phi > 0.0).then_some(params)
    }

    fn squared_residual(&self, params: &SsviParams) -> f64 {
        self.slice
            .log_moneyness
            .iter()
            .zip(self.slice.market_vols.iter())
            .zip(self.weights.iter())
            .map(|((&k, &vol), &w)| (w * (params.implied_vol(k, self.slice.tenor) - vol)).powi(2))
            .sum()
    }

    /// Total grid shortfall below the previous slice.
    fn calendar_shortfall(&self, params: &SsviParams) -> f64 {
        self.previous_floor.as_ref().map_or(0.0, |floor| {
            self.grid
                .iter()
                .zip(floor.iter())
                .map(|(&k, &w_prev)| (w_prev - params.total_variance(k)).max(0.0))
                .sum()
        })
    }

    fn objective(&self, rho: f64, psi: f64) -> f64 {
        match self.params_for(rho, psi) {
            Some(p) => {
                let obj = self.squared_residual(&p)
                    + self.config.calendar_penalty * self.calendar_shortfall(&p);
                if obj.is_finite() {
                    obj
                } else {
                    INFEASIBLE
                }
            }
            None => INFEASIBLE,
        }
    }

    /// Best `ψ` for a fixed `ρ`; `None` when the admissible interval is empty or the
    /// optimum crosses the previous slice.
    pub fn fit_rho(&self, rho: f64) -> Option<(f64, SsviParams)> {
        let (lower, upper) = psi_bounds(rho, &self.anchor, self.previous.as_ref())?;
        let search = GoldenSectionConfig {
            max_iter: self.config.psi_iterations,
            x_tol: self.config.psi_tolerance,
        };
        let best = golden_section(|psi| self.objective(rho, psi), lower, upper, &search);
        let params = self.params_for(rho, best.x)?;

        if let Some(floor) = &self.previous_floor {
            let crosses = self
                .grid
                .iter()
                .zip(floor.iter())
                .any(|(&k, &w_prev)| params.total_variance(k) < w_prev - self.config.calendar_tolerance);
            if crosses {
                return None;
            }
        }
        Some((self.squared_residual(&params), params))
    }

    /// Two-stage random search over `ρ`.
    pub fn calibrate<R: Rng>(&self, rng: &mut R) -> Option<EssviSliceFit> {
        let limit = self.config.rho_limit;
        let n = self.config.rho_candidates.max(1);

        let mut best: Option<(f64, f64, SsviParams)> = None;
        let consider = |rho: f64, best: &mut Option<(f64, f64, SsviParams)>| {
            if let Some((obj, params)) = self.fit_rho(rho) {
                if best.as_ref().map_or(true, |(b, _, _)| obj < *b) {
                    *best = Some((obj, rho, params));
                }
            }
        };

        for _ in 0..n {
            let rho = rng.gen_range(-limit..limit);
            consider(rho, &mut best);
        }
        let coarse_rho = best.as_ref().map(|(_, rho, _)| *rho)?;

        let lo = (coarse_rho - self.config.refine_window).max(-limit);
        let hi = (coarse_rho + self.config.refine_window).min(limit);
        for _ in 0..n {
            let rho = if hi > lo { rng.gen_range(lo..hi) } else { lo };
            consider(rho, &mut best);
        }

        best.map(|(residual, _, params)| EssviSliceFit {
            tenor: self.slice.tenor,
            params,
            residual,
        })
    }
}

/// Calibrates every maturity in increasing tenor order, skipping those that are
/// too sparse or admit no feasible `(ρ, ψ)`.
pub fn calibrate_essvi(
    slices: &[MaturitySlice],
    grid: &[f64],
    config: &EssviConfig,
) -> Result<EssviFit> {
    let mut ordered: Vec<&MaturitySlice> = slices.iter().collect();
    ordered.sort_by(|a, b| a.tenor.total_cmp(&b.tenor));

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut surface = Surface::new();
    let mut fits = Vec::new();
    let mut skipped = Vec::new();
    let mut previous: Option<PreviousSlice> = None;

    for slice in ordered {
        if surface.slices().last().map_or(false, |s| slice.tenor <= s.tenor()) {
            tracing::warn!(tenor = slice.tenor, "duplicate eSSVI tenor, skipping");
            skipped.push(slice.tenor);
            continue;
        }
        let calibrator = match EssviSliceCalibrator::new(slice, grid, config, previous) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(tenor = slice.tenor, error = %e, "skipping maturity");
                skipped.push(slice.tenor);
                continue;
            }
        };
        match calibrator.calibrate(&mut rng) {
            Some(fit) => {
                tracing::debug!(
                    tenor = fit.tenor,
                    rho = fit.params.rho,
                    theta = fit.params.theta,
                    psi = fit.params.psi(),
                    residual = fit.residual,
                    "eSSVI maturity calibrated"
                );
                previous = Some(PreviousSlice::from(&fit.params));
                surface.push(slice.clone(), fit.params)?;
                fits.push(fit);
            }
            None => {
                tracing::warn!(
                    tenor = slice.tenor,
                    "no feasible eSSVI parameters for maturity, skipping"
                );
                skipped.push(slice.tenor);
            }
        }
    }

    if surface.is_empty() {
        bail!("eSSVI calibration: no maturity could be calibrated");
    }
    Ok(EssviFit {
        surface,
        fits,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::config::linspace;

    fn anchor() -> Anchor {
        Anchor {
            k_star: 0.0,
            theta_star: 0.04,
        }
    }

    #[test]
    fn test_psi_plus_at_the_money() {
        // k* = 0 gives min(4/(1+|rho|), 2 sqrt(theta*/(1+|rho|)))
        let expected = 2.0 * (0.04f64 / 1.5).sqrt();
        assert!((psi_plus(0.5, &anchor()) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_psi_minus_symmetric_case() {
        let prev = PreviousSlice {
            theta: 0.02,
            rho: -0.3,
            psi: 0.1,
        };
        assert!((psi_minus(-0.3, &prev) - 0.1).abs() < 1e-15);
        assert!(psi_minus(0.0, &prev) > 0.1);
    }

    #[test]
    fn test_bounds_first_slice_keep_theta_positive() {
        let a = Anchor {
            k_star: 0.05,
            theta_star: 0.001,
        };
        let (_, upper) = psi_bounds(0.9, &a, None).unwrap();
        assert!(a.theta(0.9, upper) > 0.0);
    }

    #[test]
    fn test_bounds_empty_when_theta_would_decrease() {
        let prev = PreviousSlice {
            theta: 0.05,
            rho: -0.3,
            psi: 0.1,
        };
        assert!(psi_bounds(-0.3, &anchor(), Some(&prev)).is_none());
    }

    #[test]
    fn test_single_maturity_recovers_parameters() {
        let truth = SsviParams::from_psi(-0.5, 0.03, 0.12);
        let ks = linspace(-0.3, 0.3, 13);
        let vols = ks.iter().map(|&k| truth.implied_vol(k, 0.5)).collect();
        let slice = MaturitySlice::new(0.5, ks, vols, None).unwrap();
        let grid = linspace(-1.5, 1.5, 49);
        let config = EssviConfig::default();
        let cal = EssviSliceCalibrator::new(&slice, &grid, &config, None).unwrap();
        let fit = cal.calibrate(&mut StdRng::seed_from_u64(3)).unwrap();
        assert!((fit.params.rho - truth.rho).abs() < 0.02, "rho {}", fit.params.rho);
        assert!((fit.params.theta - truth.theta).abs() < 1e-6);
        assert!((fit.params.psi() - truth.psi()).abs() < 2e-3);
    }

    #[test]
    fn test_sparse_maturity_is_skipped() {
        let truth = SsviParams::from_psi(-0.5, 0.03, 0.12);
        let ks = linspace(-0.3, 0.3, 9);
        let dense_vols = ks.iter().map(|&k| truth.implied_vol(k, 0.5)).collect();
        let dense = MaturitySlice::new(0.5, ks, dense_vols, None).unwrap();
        let sparse = MaturitySlice::new(1.0, vec![-0.1, 0.1], vec![0.25, 0.24], None).unwrap();
        let fit = calibrate_essvi(
            &[sparse, dense],
            &linspace(-1.5, 1.5, 17),
            &EssviConfig::default(),
        )
        .unwrap();
        assert_eq!(fit.surface.len(), 1);
        assert_eq!(fit.skipped, vec![1.0]);
    }
}
