// src/models/svi/svi_model.rs

//! SVI parametrizations of a single total-variance slice
//!
//! Four equivalent representations of the same curve `w(k)`, with `k` the
//! log-forward-moneyness:
//!
//! - raw `(a, b, m, ρ, σ)`: `w(k) = a + b(ρ(k-m) + sqrt((k-m)² + σ²))`
//! - natural `(Δ, μ, ρ, ω, ζ)`: `w(k) = Δ + ω/2 (1 + ζρ(k-μ) + sqrt((ζ(k-μ)+ρ)² + 1-ρ²))`
//! - jump-wings `(v, ψ, p, c, ṽ)`: maturity-normalised quantities (ATM variance,
//!   ATM skew, put/call wing slopes, minimum variance)
//! - SSVI `(0, 0, ρ, θ, φ)`: the natural form with no shift, θ the ATM total
//!   variance and φ the curvature multiplier
//!
//! Raw is the calibration target; every other form converts to raw for pricing and
//! diagnostics. Conversions round-trip to floating-point precision away from the
//! `σ → 0` and `m = 0` loci.
//!
//! Reference: Gatheral, J. & Jacquier, A. "Arbitrage-free SVI volatility surfaces" (2014).

use crate::models::traits::TotalVariance;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Smallest `σ` used when converting raw to natural (ζ = sqrt(1-ρ²)/σ).
const MIN_SIGMA: f64 = 1e-10;

/// |β| below this is treated as the `m = 0` locus in the jump-wings inversion.
const BETA_EPSILON: f64 = 1e-14;

/// Raw SVI parameters for a single maturity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSvi {
    /// Vertical shift (overall variance level)
    pub a: f64,
    /// Wing slope factor, b >= 0
    pub b: f64,
    /// Horizontal shift
    pub m: f64,
    /// Skew / rotation, in (-1, 1)
    pub rho: f64,
    /// ATM curvature, > 0
    pub sigma: f64,
}

/// Helper function to validate raw SVI parameters for mathematical and no-arbitrage constraints.
fn validate_raw(a: f64, b: f64, m: f64, rho: f64, sigma: f64) -> Result<()> {
    if !a.is_finite() || !m.is_finite() {
        return Err(anyhow!(
            "RawSvi validation: a ({}) and m ({}) must be finite",
            a,
            m
        ));
    }
    if b < 0.0 || !b.is_finite() {
        return Err(anyhow!(
            "RawSvi validation: parameter b (b={}) must be >= 0 and finite",
            b
        ));
    }
    if rho <= -1.0 || rho >= 1.0 || !rho.is_finite() {
        return Err(anyhow!(
            "RawSvi validation: parameter rho (rho={}) must be in (-1, 1)",
            rho
        ));
    }
    if sigma <= 0.0 || !sigma.is_finite() {
        return Err(anyhow!(
            "RawSvi validation: parameter sigma (sigma={}) must be > 0 and finite",
            sigma
        ));
    }
    // The minimum of w(k) is a + b*sigma*sqrt(1-rho^2); it must not be negative.
    let min_variance = a + b * sigma * (1.0 - rho * rho).sqrt();
    if min_variance < 0.0 {
        return Err(anyhow!(
            "RawSvi validation: a + b*sigma*sqrt(1-rho^2) = {} < 0",
            min_variance
        ));
    }
    Ok(())
}

impl RawSvi {
    /// Creates raw parameters with validation.
    pub fn new(a: f64, b: f64, m: f64, rho: f64, sigma: f64) -> Result<Self> {
        validate_raw(a, b, m, rho, sigma)?;
        Ok(Self {
            a,
            b,
            m,
            rho,
            sigma,
        })
    }

    pub fn validate(&self) -> Result<()> {
        validate_raw(self.a, self.b, self.m, self.rho, self.sigma)
    }

    /// Parameter vector in optimiser order `[a, b, m, rho, sigma]`.
    pub fn to_vec(&self) -> Vec<f64> {
        vec![self.a, self.b, self.m, self.rho, self.sigma]
    }

    /// Inverse of [`RawSvi::to_vec`]; no validation.
    pub fn from_slice(x: &[f64]) -> Result<Self> {
        match x {
            [a, b, m, rho, sigma] => Ok(Self {
                a: *a,
                b: *b,
                m: *m,
                rho: *rho,
                sigma: *sigma,
            }),
            _ => Err(anyhow!("RawSvi expects 5 parameters, got {}", x.len())),
        }
    }

    /// w'(k) = b(ρ + (k-m)/sqrt((k-m)² + σ²))
    pub fn first_derivative(&self, k: f64) -> f64 {
        let dk = k - self.m;
        let r = (dk * dk + self.sigma * self.sigma).sqrt();
        if r == 0.0 {
            return self.b * self.rho;
        }
        self.b * (self.rho + dk / r)
    }

    /// w''(k) = bσ²/((k-m)² + σ²)^(3/2)
    pub fn second_derivative(&self, k: f64) -> f64 {
        let dk = k - self.m;
        let r2 = dk * dk + self.sigma * self.sigma;
        if r2 == 0.0 {
            return 0.0;
        }
        self.b * self.sigma * self.sigma / (r2 * r2.sqrt())
    }

    /// Minimum of the total-variance curve over all `k`.
    pub fn min_total_variance(&self) -> f64 {
        self.a + self.b * self.sigma * (1.0 - self.rho * self.rho).sqrt()
    }

    pub fn to_natural(&self) -> NaturalSvi {
        let rho = self.rho;
        let root = (1.0 - rho * rho).sqrt();
        let sigma = self.sigma.max(MIN_SIGMA);
        let omega = 2.0 * self.b * sigma / root;
        let zeta = root / sigma;
        let mu = self.m + rho * sigma / root;
        let delta = self.a - 0.5 * omega * (1.0 - rho * rho);
        NaturalSvi {
            delta,
            mu,
            rho,
            omega,
            zeta,
        }
    }

    /// Jump-wings representation at tenor `t`. Requires a positive ATM total variance.
    pub fn to_jump_wings(&self, t: f64) -> JumpWings {
        let RawSvi {
            a,
            b,
            m,
            rho,
            sigma,
        } = *self;
        let hyp = (m * m + sigma * sigma).sqrt();
        let w_atm = a + b * (-rho * m + hyp);
        let sqrt_w = w_atm.sqrt();
        let slope_term = if hyp > 0.0 { -m / hyp } else { 0.0 };

        JumpWings {
            v: w_atm / t,
            psi: b / (2.0 * sqrt_w) * (slope_term + rho),
            p: b * (1.0 - rho) / sqrt_w,
            c: b * (1.0 + rho) / sqrt_w,
            v_tilde: (a + b * sigma * (1.0 - rho * rho).sqrt()) / t,
        }
    }
}

/// Natural SVI parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NaturalSvi {
    pub delta: f64,
    pub mu: f64,
    pub rho: f64,
    /// omega >= 0
    pub omega: f64,
    /// zeta > 0
    pub zeta: f64,
}

impl NaturalSvi {
    pub fn new(delta: f64, mu: f64, rho: f64, omega: f64, zeta: f64) -> Result<Self> {
        if !delta.is_finite() || !mu.is_finite() {
            return Err(anyhow!(
                "NaturalSvi validation: delta ({}) and mu ({}) must be finite",
                delta,
                mu
            ));
        }
        if rho <= -1.0 || rho >= 1.0 || !rho.is_finite() {
            return Err(anyhow!("NaturalSvi validation: rho={} not in (-1, 1)", rho));
        }
        if omega < 0.0 || !omega.is_finite() {
            return Err(anyhow!("NaturalSvi validation: omega={} must be >= 0", omega));
        }
        if zeta <= 0.0 || !zeta.is_finite() {
            return Err(anyhow!("NaturalSvi validation: zeta={} must be > 0", zeta));
        }
        Ok(Self {
            delta,
            mu,
            rho,
            omega,
            zeta,
        })
    }

    pub fn to_raw(&self) -> RawSvi {
        let rho = self.rho;
        RawSvi {
            a: self.delta + 0.5 * self.omega * (1.0 - rho * rho),
            b: 0.5 * self.omega * self.zeta,
            m: self.mu - rho / self.zeta,
            rho,
            sigma: (1.0 - rho * rho).sqrt() / self.zeta,
        }
    }
}

/// Jump-wings parameters. `v` and `v_tilde` are variances, not total variances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JumpWings {
    /// ATM variance
    pub v: f64,
    /// ATM skew
    pub psi: f64,
    /// Put (left) wing slope
    pub p: f64,
    /// Call (right) wing slope
    pub c: f64,
    /// Minimum implied variance
    pub v_tilde: f64,
}

impl JumpWings {
    pub fn new(v: f64, psi: f64, p: f64, c: f64, v_tilde: f64) -> Result<Self> {
        if !(v > 0.0 && v.is_finite()) || !(v_tilde > 0.0 && v_tilde.is_finite()) {
            return Err(anyhow!(
                "JumpWings validation: v ({}) and v_tilde ({}) must be > 0",
                v,
                v_tilde
            ));
        }
        if !psi.is_finite() || !p.is_finite() || !c.is_finite() || p + c <= 0.0 {
            return Err(anyhow!(
                "JumpWings validation: psi={}, p={}, c={} must be finite with p + c > 0",
                psi,
                p,
                c
            ));
        }
        Ok(Self {
            v,
            psi,
            p,
            c,
            v_tilde,
        })
    }

    /// Raw parameters at tenor `t`.
    ///
    /// When the solved `m` is zero the usual `σ = α m` collapses, so `σ` is recovered
    /// from the ATM/minimum variance gap instead. Negative `σ` from rounding is
    /// clamped to 0.
    pub fn to_raw(&self, t: f64) -> RawSvi {
        let w = self.v * t;
        let sqrt_w = w.sqrt();
        let b = 0.5 * sqrt_w * (self.c + self.p);
        let rho = 1.0 - self.p * sqrt_w / b;
        let beta = rho - 2.0 * self.psi * sqrt_w / b;
        let root = (1.0 - rho * rho).max(0.0).sqrt();
        let variance_gap = (self.v - self.v_tilde) * t;

        let m = if beta.abs() < BETA_EPSILON {
            0.0
        } else {
            let alpha = beta.signum() * (1.0 / (beta * beta) - 1.0).max(0.0).sqrt();
            let denom = -rho + alpha.signum() * (1.0 + alpha * alpha).sqrt() - alpha * root;
            variance_gap / (b * denom)
        };

        let sigma = if m == 0.0 {
            let denom = b * (1.0 - root);
            if denom > 0.0 {
                variance_gap / denom
            } else {
                0.0
            }
        } else {
            let alpha = beta.signum() * (1.0 / (beta * beta) - 1.0).max(0.0).sqrt();
            alpha * m
        }
        .max(0.0);

        RawSvi {
            a: self.v_tilde * t - b * sigma * root,
            b,
            m,
            rho,
            sigma,
        }
    }

    /// Closest slice guaranteed free of butterfly arbitrage: keeps `(v, ψ, p)`,
    /// sets the call wing to `c' = p + 2ψ` and the minimum variance to
    /// `ṽ' = 4 v p c' / (p + c')²`.
    pub fn repick(&self) -> JumpWings {
        let c = self.p + 2.0 * self.psi;
        let v_tilde = self.v * 4.0 * self.p * c / (self.p + c).powi(2);
        JumpWings {
            c,
            v_tilde,
            ..*self
        }
    }
}

/// SSVI / eSSVI slice `(0, 0, ρ, θ, φ)` in natural coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SsviParams {
    pub rho: f64,
    /// ATM total variance
    pub theta: f64,
    /// Curvature multiplier; `ψ = φθ` is the ATM skew scale
    pub phi: f64,
}

impl SsviParams {
    pub fn new(rho: f64, theta: f64, phi: f64) -> Result<Self> {
        if rho <= -1.0 || rho >= 1.0 || !rho.is_finite() {
            return Err(anyhow!("SsviParams validation: rho={} not in (-1, 1)", rho));
        }
        if theta <= 0.0 || !theta.is_finite() {
            return Err(anyhow!("SsviParams validation: theta={} must be > 0", theta));
        }
        if phi <= 0.0 || !phi.is_finite() {
            return Err(anyhow!("SsviParams validation: phi={} must be > 0", phi));
        }
        Ok(Self { rho, theta, phi })
    }

    /// Builds a slice from `(ρ, θ, ψ)` with `φ = ψ/θ`.
    pub fn from_psi(rho: f64, theta: f64, psi: f64) -> Self {
        Self {
            rho,
            theta,
            phi: psi / theta,
        }
    }

    pub fn psi(&self) -> f64 {
        self.phi * self.theta
    }

    pub fn to_natural(&self) -> NaturalSvi {
        NaturalSvi {
            delta: 0.0,
            mu: 0.0,
            rho: self.rho,
            omega: self.theta,
            zeta: self.phi,
        }
    }

    pub fn to_raw(&self) -> RawSvi {
        self.to_natural().to_raw()
    }
}

impl TotalVariance for RawSvi {
    fn total_variance(&self, k: f64) -> f64 {
        let dk = k - self.m;
        self.a + self.b * (self.rho * dk + (dk * dk + self.sigma * self.sigma).sqrt())
    }

    fn derivatives(&self, k: f64) -> (f64, f64, f64) {
        (
            self.total_variance(k),
            self.first_derivative(k),
            self.second_derivative(k),
        )
    }
}

impl TotalVariance for NaturalSvi {
    fn total_variance(&self, k: f64) -> f64 {
        let x = self.zeta * (k - self.mu);
        let rho = self.rho;
        self.delta
            + 0.5 * self.omega * (1.0 + rho * x + ((x + rho).powi(2) + 1.0 - rho * rho).sqrt())
    }

    fn derivatives(&self, k: f64) -> (f64, f64, f64) {
        self.to_raw().derivatives(k)
    }
}

impl TotalVariance for SsviParams {
    fn total_variance(&self, k: f64) -> f64 {
        self.to_natural().total_variance(k)
    }

    fn derivatives(&self, k: f64) -> (f64, f64, f64) {
        self.to_raw().derivatives(k)
    }
}
