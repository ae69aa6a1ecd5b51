// src/models/svi/arbitrage.rs

//! Static-arbitrage diagnostics for total-variance slices.
//!
//! Butterfly arbitrage is detected through Gatheral's g-function
//!
//! ```text
//! g(k) = (1 - k w'/(2w))² - (w'²/4)(1/w + 1/4) + w''/2
//! ```
//!
//! which must be non-negative for the implied density to be non-negative.
//! Calendar-spread arbitrage is a fixed-`k` comparison of total variance between
//! consecutive maturities.

use crate::models::traits::TotalVariance;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Arbitrage indicator at `k`. Returns `-inf` where `w(k) <= 0`, since the density
/// is undefined there.
pub fn g_function<T: TotalVariance + ?Sized>(model: &T, k: f64) -> f64 {
    let (w, w1, w2) = model.derivatives(k);
    if !(w > 0.0) {
        return f64::NEG_INFINITY;
    }
    let term1 = 1.0 - k * w1 / (2.0 * w);
    term1 * term1 - 0.25 * w1 * w1 * (1.0 / w + 0.25) + 0.5 * w2
}

/// Risk-neutral density of `k` implied by the slice.
pub fn risk_neutral_density<T: TotalVariance + ?Sized>(model: &T, k: f64) -> f64 {
    let w = model.total_variance(k);
    if !(w > 0.0) {
        return 0.0;
    }
    let sqrt_w = w.sqrt();
    let d2 = -k / sqrt_w - 0.5 * sqrt_w;
    g_function(model, k) / (2.0 * PI * w).sqrt() * (-0.5 * d2 * d2).exp()
}

/// g evaluated over a grid.
pub fn g_values<T: TotalVariance + ?Sized>(model: &T, grid: &[f64]) -> Vec<f64> {
    grid.iter().map(|&k| g_function(model, k)).collect()
}

/// Result of a butterfly check over a diagnostic grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButterflyReport {
    pub min_g: f64,
    /// Grid points where `g < -tolerance`
    pub violations: Vec<f64>,
}

impl ButterflyReport {
    pub fn is_arbitrage_free(&self) -> bool {
        self.violations.is_empty()
    }
}

pub fn check_butterfly<T: TotalVariance + ?Sized>(
    model: &T,
    grid: &[f64],
    tolerance: f64,
) -> ButterflyReport {
    let mut min_g = f64::INFINITY;
    let mut violations = Vec::new();
    for &k in grid {
        let g = g_function(model, k);
        min_g = min_g.min(g);
        if !(g >= -tolerance) {
            violations.push(k);
        }
    }
    ButterflyReport { min_g, violations }
}

/// A grid point where the later maturity has less total variance than the earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalendarViolation {
    pub k: f64,
    pub earlier_tenor: f64,
    pub later_tenor: f64,
    /// `w_earlier(k) - w_later(k)`, positive
    pub shortfall: f64,
}

/// Compares two slices at every grid point, reporting shortfalls above `tolerance`.
pub fn calendar_violations<A, B>(
    earlier: &A,
    earlier_tenor: f64,
    later: &B,
    later_tenor: f64,
    grid: &[f64],
    tolerance: f64,
) -> Vec<CalendarViolation>
where
    A: TotalVariance + ?Sized,
    B: TotalVariance + ?Sized,
{
    grid.iter()
        .filter_map(|&k| {
            let shortfall = earlier.total_variance(k) - later.total_variance(k);
            (shortfall > tolerance).then_some(CalendarViolation {
                k,
                earlier_tenor,
                later_tenor,
                shortfall,
            })
        })
        .collect()
}
