// src/models/ssvi/ssvi_calibrator.rs

//! Joint SSVI calibration across maturities.
//!
//! Two global scalars are fitted, a correlation `ρ` and the power-law level `η`,
//! with the ATM total variance `θ_i` of every maturity taken as given:
//!
//! ```text
//! φ(θ) = η / (θ^γ (1 + θ)^(1-γ)),   γ = 0.5
//! ```
//!
//! The no-butterfly condition `2 - φ(θ_max)(1 + |ρ|) >= 0` (tightened to also cover
//! `η(1 + |ρ|) <= 2`) enters as a quadratic penalty.

use crate::calibration::config::{OptimizationConfig, SsviConfig};
use crate::calibration::pipeline::calibrate_model;
use crate::calibration::types::{MaturitySlice, ModelCalibrator};
use crate::models::ssvi::surface::Surface;
use crate::models::svi::svi_calibrator::{normalised_weights, INFEASIBLE};
use crate::models::svi::svi_model::SsviParams;
use crate::models::traits::TotalVariance;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Power-law curvature `φ(θ)`.
pub fn power_law_phi(theta: f64, eta: f64, gamma: f64) -> f64 {
    eta / (theta.powf(gamma) * (1.0 + theta).powf(1.0 - gamma))
}

/// Outcome of a joint SSVI fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsviFit {
    pub rho: f64,
    pub eta: f64,
    pub gamma: f64,
    /// Penalised objective at the optimum
    pub objective: f64,
    pub surface: Surface<SsviParams>,
}

/// Calibrator over `[rho, eta]`.
#[derive(Debug, Clone)]
pub struct SsviCalibrator {
    slices: Vec<MaturitySlice>,
    thetas: Vec<f64>,
    weights: Vec<Vec<f64>>,
    theta_max: f64,
    param_bounds: Vec<(f64, f64)>,
    config: SsviConfig,
}

impl SsviCalibrator {
    /// `thetas[i]` is the ATM total variance of `slices[i]`.
    pub fn new(slices: &[MaturitySlice], thetas: &[f64], config: &SsviConfig) -> Result<Self> {
        if slices.is_empty() {
            bail!("SSVI calibration needs at least one maturity");
        }
        if slices.len() != thetas.len() {
            bail!(
                "SSVI calibration: {} slices but {} ATM variances",
                slices.len(),
                thetas.len()
            );
        }
        if let Some(bad) = thetas.iter().find(|t| !(**t > 0.0 && t.is_finite())) {
            bail!("SSVI calibration: ATM total variance must be > 0, got {}", bad);
        }
        let theta_max = thetas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok(Self {
            slices: slices.to_vec(),
            thetas: thetas.to_vec(),
            weights: slices.iter().map(normalised_weights).collect(),
            theta_max,
            param_bounds: vec![
                config.rho_bounds,
                (config.eta_bounds.0.max(1e-6), config.eta_bounds.1),
            ],
            config: config.clone(),
        })
    }

    pub fn slice_params(&self, i: usize, rho: f64, eta: f64) -> SsviParams {
        let theta = self.thetas[i];
        SsviParams {
            rho,
            theta,
            phi: power_law_phi(theta, eta, self.config.gamma),
        }
    }

    /// `2 - max(φ(θ_max), η)(1 + |ρ|)`; non-negative when the surface is butterfly-free.
    ///
    /// For `θ_max <= (√5 - 1)/2` this is `2 - φ(θ_max)(1 + |ρ|)`. Above that `φ(θ_max)`
    /// drops below `η` and the stricter `η(1 + |ρ|) <= 2` power-law condition applies,
    /// which also bounds the shorter, higher-`φ` slices.
    pub fn butterfly_margin(&self, rho: f64, eta: f64) -> f64 {
        let phi_max = power_law_phi(self.theta_max, eta, self.config.gamma);
        2.0 - phi_max.max(eta) * (1.0 + rho.abs())
    }

    fn squared_residuals(&self, rho: f64, eta: f64) -> f64 {
        let mut total = 0.0;
        for (i, slice) in self.slices.iter().enumerate() {
            let params = self.slice_params(i, rho, eta);
            for (j, (&k, &vol)) in slice
                .log_moneyness
                .iter()
                .zip(slice.market_vols.iter())
                .enumerate()
            {
                let diff = self.weights[i][j] * (params.implied_vol(k, slice.tenor) - vol);
                total += diff * diff;
            }
        }
        total
    }

    pub fn calibrate(&self, opt: &OptimizationConfig) -> Result<SsviFit> {
        let (objective, x) = calibrate_model(self, opt, None);
        let (rho, eta) = match x.as_slice() {
            [rho, eta] => (*rho, *eta),
            _ => bail!("SSVI optimiser returned {} parameters", x.len()),
        };
        let margin = self.butterfly_margin(rho, eta);
        if margin < 0.0 {
            tracing::warn!(rho, eta, margin, "SSVI fit violates the butterfly condition");
        }
        tracing::debug!(rho, eta, objective, "SSVI joint calibration done");

        let pairs = self
            .slices
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), self.slice_params(i, rho, eta)))
            .collect();
        Ok(SsviFit {
            rho,
            eta,
            gamma: self.config.gamma,
            objective,
            surface: Surface::from_pairs(pairs)?,
        })
    }
}

impl ModelCalibrator for SsviCalibrator {
    fn model_name(&self) -> &str {
        "ssvi"
    }

    fn param_bounds(&self) -> &[(f64, f64)] {
        &self.param_bounds
    }

    fn evaluate_objective(&self, x: &[f64]) -> f64 {
        let (rho, eta) = match x {
            [rho, eta] => (*rho, *eta),
            _ => return INFEASIBLE,
        };
        let violation = (-self.butterfly_margin(rho, eta)).max(0.0);
        let obj = self.squared_residuals(rho, eta) + self.config.penalty_weight * violation * violation;
        if obj.is_finite() {
            obj
        } else {
            INFEASIBLE
        }
    }

    fn param_names(&self) -> Vec<&str> {
        vec!["rho", "eta"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::config::linspace;

    #[test]
    fn test_power_law_phi() {
        assert!((power_law_phi(1.0, 1.0, 0.5) - 1.0 / 2f64.sqrt()).abs() < 1e-15);
        assert!(power_law_phi(0.01, 1.0, 0.5) > power_law_phi(0.1, 1.0, 0.5));
    }

    #[test]
    fn test_butterfly_margin_regimes() {
        let slice = MaturitySlice::new(0.5, vec![0.0], vec![0.2], None).unwrap();
        let cfg = SsviConfig::default();
        let (rho, eta) = (-0.4, 1.2);

        let low = SsviCalibrator::new(&[slice.clone()], &[0.3], &cfg).unwrap();
        let phi = power_law_phi(0.3, eta, 0.5);
        assert!(phi > eta);
        assert!((low.butterfly_margin(rho, eta) - (2.0 - phi * 1.4)).abs() < 1e-12);

        let high = SsviCalibrator::new(&[slice], &[1.5], &cfg).unwrap();
        assert!(power_law_phi(1.5, eta, 0.5) < eta);
        assert!((high.butterfly_margin(rho, eta) - (2.0 - eta * 1.4)).abs() < 1e-12);
    }

    #[test]
    fn test_input_validation() {
        let slice = MaturitySlice::new(0.5, vec![0.0], vec![0.2], None).unwrap();
        let cfg = SsviConfig::default();
        assert!(SsviCalibrator::new(&[], &[], &cfg).is_err());
        assert!(SsviCalibrator::new(&[slice.clone()], &[0.02, 0.03], &cfg).is_err());
        assert!(SsviCalibrator::new(&[slice], &[-0.02], &cfg).is_err());
    }

    #[test]
    fn test_recovers_generating_parameters() {
        let (rho, eta) = (-0.45, 0.25);
        let tenors = [0.25, 0.5, 1.0];
        let thetas = [0.012, 0.022, 0.04];
        let ks = linspace(-0.4, 0.4, 17);
        let slices: Vec<MaturitySlice> = tenors
            .iter()
            .zip(thetas.iter())
            .map(|(&t, &theta)| {
                let p = SsviParams {
                    rho,
                    theta,
                    phi: power_law_phi(theta, eta, 0.5),
                };
                let vols = ks.iter().map(|&k| p.implied_vol(k, t)).collect();
                MaturitySlice::new(t, ks.clone(), vols, None).unwrap()
            })
            .collect();

        let cal = SsviCalibrator::new(&slices, &thetas, &SsviConfig::default()).unwrap();
        assert!(cal.butterfly_margin(rho, eta) >= 0.0);
        let fit = cal.calibrate(&OptimizationConfig::fast()).unwrap();
        assert!((fit.rho - rho).abs() < 1e-3, "rho {}", fit.rho);
        assert!((fit.eta - eta).abs() < 1e-3, "eta {}", fit.eta);
        assert_eq!(fit.surface.len(), 3);
    }
}
