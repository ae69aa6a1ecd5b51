//! Forward and discount extraction from put-call parity.
//!
//! Calls and puts are merged by strike into synthetic conversions with
//! `i = mid_call - mid_put ≈ D (F - K)`. Only the conversions with the smallest
//! `|i|` are used, which keeps far-from-the-money strikes (wide, illiquid) out of
//! the least-squares fit.

use crate::calibration::config::ForwardConfig;
use crate::calibration::types::{OptionQuote, OptionType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Strikes closer than this are merged into one conversion.
const STRIKE_MATCH_TOLERANCE: f64 = 1e-9;

/// Continuous discount factor as a function of tenor.
pub trait DiscountCurve {
    fn discount(&self, tenor: f64) -> f64;
}

/// Flat continuously compounded rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlatRate {
    pub rate: f64,
}

impl DiscountCurve for FlatRate {
    fn discount(&self, tenor: f64) -> f64 {
        (-self.rate * tenor).exp()
    }
}

/// What is solved for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ForwardModel {
    /// Discount factor known; only the forward is fitted.
    KnownDiscount(f64),
    /// Forward and discount factor fitted jointly; `spot` is used to report the
    /// implied rate and dividend yield.
    Joint { spot: f64 },
}

impl ForwardModel {
    pub fn from_curve<C: DiscountCurve + ?Sized>(curve: &C, tenor: f64) -> Self {
        ForwardModel::KnownDiscount(curve.discount(tenor))
    }
}

/// A synthetic conversion at one strike.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub strike: f64,
    /// `mid_call - mid_put`
    pub i_mid: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForwardEstimate {
    pub tenor: f64,
    pub forward: f64,
    pub discount: f64,
    /// Continuously compounded rate `-ln(D)/t`, joint model only
    pub rate: Option<f64>,
    /// `r - ln(F/S)/t`, joint model only
    pub dividend_yield: Option<f64>,
    pub conversions_used: usize,
}

/// Merges calls and puts by strike. Quotes of the wrong type in either list are ignored.
pub fn merge_conversions(calls: &[OptionQuote], puts: &[OptionQuote]) -> Vec<Conversion> {
    let mut merged: Vec<Conversion> = calls
        .iter()
        .filter(|c| c.option_type == OptionType::Call)
        .filter_map(|c| {
            puts.iter()
                .filter(|p| p.option_type == OptionType::Put)
                .find(|p| (p.strike - c.strike).abs() < STRIKE_MATCH_TOLERANCE)
                .map(|p| Conversion {
                    strike: c.strike,
                    i_mid: c.mid() - p.mid(),
                })
        })
        .collect();
    merged.sort_by(|a, b| a.strike.partial_cmp(&b.strike).unwrap_or(Ordering::Equal));
    merged.dedup_by(|a, b| (a.strike - b.strike).abs() < STRIKE_MATCH_TOLERANCE);
    merged
}

/// The `count` conversions with the smallest `|i_mid|`, in strike order.
pub fn select_conversions(mut conversions: Vec<Conversion>, count: usize) -> Vec<Conversion> {
    conversions.sort_by(|a, b| {
        a.i_mid
            .abs()
            .partial_cmp(&b.i_mid.abs())
            .unwrap_or(Ordering::Equal)
    });
    conversions.truncate(count);
    conversions.sort_by(|a, b| a.strike.partial_cmp(&b.strike).unwrap_or(Ordering::Equal));
    conversions
}

/// Least-squares forward (and discount factor in the joint model) for one maturity.
///
/// Returns `None` when fewer than `config.min_quotes` strikes carry both a call
/// and a put, or when the fit is degenerate (non-positive forward or discount).
pub fn extract_forward(
    calls: &[OptionQuote],
    puts: &[OptionQuote],
    tenor: f64,
    model: &ForwardModel,
    config: &ForwardConfig,
) -> Option<ForwardEstimate> {
    let merged = merge_conversions(calls, puts);
    if merged.len() < config.min_quotes {
        tracing::debug!(
            tenor,
            available = merged.len(),
            required = config.min_quotes,
            "not enough call/put pairs for forward extraction"
        );
        return None;
    }
    let used = select_conversions(merged, config.conversion_count.max(config.min_quotes));
    let n = used.len() as f64;

    let (forward, discount, rate, dividend_yield) = match *model {
        ForwardModel::KnownDiscount(discount) => {
            if !(discount > 0.0) {
                return None;
            }
            let forward = used.iter().map(|c| c.strike + c.i_mid / discount).sum::<f64>() / n;
            (forward, discount, None, None)
        }
        ForwardModel::Joint { spot } => {
            // i = D F - D K: ordinary least squares of i on K.
            let k_mean = used.iter().map(|c| c.strike).sum::<f64>() / n;
            let i_mean = used.iter().map(|c| c.i_mid).sum::<f64>() / n;
            let sxx: f64 = used.iter().map(|c| (c.strike - k_mean).powi(2)).sum();
            if sxx <= 0.0 {
                return None;
            }
            let sxy: f64 = used
                .iter()
                .map(|c| (c.strike - k_mean) * (c.i_mid - i_mean))
                .sum();
            let slope = sxy / sxx;
            let intercept = i_mean - slope * k_mean;
            let discount = -slope;
            if !(discount > 0.0) {
                tracing::debug!(tenor, discount, "non-positive implied discount factor");
                return None;
            }
            let forward = intercept / discount;
            let rate = -discount.ln() / tenor;
            let dividend_yield = (spot > 0.0 && forward > 0.0).then(|| rate - (forward / spot).ln() / tenor);
            (forward, discount, Some(rate), dividend_yield)
        }
    };

    if !(forward > 0.0 && forward.is_finite()) {
        return None;
    }
    Some(ForwardEstimate {
        tenor,
        forward,
        discount,
        rate,
        dividend_yield,
        conversions_used: used.len(),
    })
}
