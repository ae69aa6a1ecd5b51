use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Option right. The sign convention (+1 call, -1 put) is used throughout the pricer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// +1.0 for calls, -1.0 for puts.
    pub fn sign(self) -> f64 {
        match self {
            OptionType::Call => 1.0,
            OptionType::Put => -1.0,
        }
    }
}

impl FromStr for OptionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "call" | "c" => Ok(OptionType::Call),
            "put" | "p" => Ok(OptionType::Put),
            other => Err(anyhow!("Invalid option type: {}", other)),
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "call"),
            OptionType::Put => write!(f, "put"),
        }
    }
}

/// A single bid/ask quote as delivered by the market-data collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Strike price
    pub strike: f64,
    /// Call or put
    pub option_type: OptionType,
    /// Best bid
    pub bid: f64,
    /// Best ask
    pub ask: f64,
}

impl OptionQuote {
    pub fn new(strike: f64, option_type: OptionType, bid: f64, ask: f64) -> Self {
        Self {
            strike,
            option_type,
            bid,
            ask,
        }
    }

    /// Average of bid and ask.
    pub fn mid(&self) -> f64 {
        0.5 * (self.bid + self.ask)
    }

    /// Both sides strictly positive and the mid above the minimum tradeable price.
    pub fn is_tradeable(&self, min_mid: f64) -> bool {
        self.strike > 0.0 && self.bid > 0.0 && self.ask > 0.0 && self.mid() > min_mid
    }

    /// Percent moneyness relative to `reference` (spot or forward).
    ///
    /// Signed so that out-of-the-money quotes are `<= 0`: calls with strike above
    /// the reference and puts with strike below it.
    pub fn percent_moneyness(&self, reference: f64) -> f64 {
        100.0 * self.option_type.sign() * (reference - self.strike) / reference
    }

    pub fn is_out_of_the_money(&self, reference: f64) -> bool {
        self.percent_moneyness(reference) <= 0.0
    }
}

/// Market smile for one maturity in log-forward-moneyness coordinates.
///
/// Points are sorted ascending by `k` with duplicates merged (their vols and
/// weights are averaged), so every calibrator can rely on that ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaturitySlice {
    /// Time to maturity in years
    pub tenor: f64,
    /// Log-forward-moneyness `ln(K/F)`, strictly increasing
    pub log_moneyness: Vec<f64>,
    /// Observed implied volatilities (decimal)
    pub market_vols: Vec<f64>,
    /// Optional per-quote weights, typically Black vegas
    pub weights: Option<Vec<f64>>,
}

/// Log-moneyness values closer than this are treated as the same strike.
const DUPLICATE_K_TOLERANCE: f64 = 1e-10;

impl MaturitySlice {
    pub fn new(
        tenor: f64,
        log_moneyness: Vec<f64>,
        market_vols: Vec<f64>,
        weights: Option<Vec<f64>>,
    ) -> Result<Self> {
        if !tenor.is_finite() || tenor <= 0.0 {
            bail!("MaturitySlice: tenor must be > 0 and finite, got {}", tenor);
        }
        if log_moneyness.len() != market_vols.len() {
            bail!(
                "MaturitySlice: {} log-moneyness values but {} vols",
                log_moneyness.len(),
                market_vols.len()
            );
        }
        if let Some(w) = &weights {
            if w.len() != market_vols.len() {
                bail!(
                    "MaturitySlice: {} weights but {} vols",
                    w.len(),
                    market_vols.len()
                );
            }
        }
        for (i, (&k, &v)) in log_moneyness.iter().zip(market_vols.iter()).enumerate() {
            if !k.is_finite() || !v.is_finite() || v <= 0.0 {
                bail!(
                    "MaturitySlice: invalid point {} (k={}, vol={}) at tenor {}",
                    i,
                    k,
                    v,
                    tenor
                );
            }
        }

        let mut order: Vec<usize> = (0..log_moneyness.len()).collect();
        order.sort_by(|&a, &b| {
            log_moneyness[a]
                .partial_cmp(&log_moneyness[b])
                .unwrap_or(Ordering::Equal)
        });

        // (k, vol sum, weight sum, count)
        let mut merged: Vec<(f64, f64, f64, usize)> = Vec::with_capacity(order.len());
        for idx in order {
            let k = log_moneyness[idx];
            let v = market_vols[idx];
            let w = weights.as_ref().map_or(1.0, |w| w[idx]);
            match merged.last_mut() {
                Some(last) if (k - last.0).abs() < DUPLICATE_K_TOLERANCE => {
                    last.1 += v;
                    last.2 += w;
                    last.3 += 1;
                }
                _ => merged.push((k, v, w, 1)),
            }
        }

        let log_moneyness = merged.iter().map(|m| m.0).collect();
        let market_vols = merged.iter().map(|m| m.1 / m.3 as f64).collect();
        let weights = weights.map(|_| merged.iter().map(|m| m.2 / m.3 as f64).collect());

        Ok(Self {
            tenor,
            log_moneyness,
            market_vols,
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.log_moneyness.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_moneyness.is_empty()
    }

    /// Weight of point `i`, 1.0 when the slice carries no weights.
    pub fn weight(&self, i: usize) -> f64 {
        match &self.weights {
            Some(w) if w[i].is_finite() && w[i] > 0.0 => w[i],
            Some(_) => 0.0,
            None => 1.0,
        }
    }

    pub fn min_vol(&self) -> f64 {
        self.market_vols.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max_vol(&self) -> f64 {
        self.market_vols
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn k_min(&self) -> f64 {
        self.log_moneyness.first().copied().unwrap_or(0.0)
    }

    pub fn k_max(&self) -> f64 {
        self.log_moneyness.last().copied().unwrap_or(0.0)
    }

    /// Index of the observed point closest to at-the-money (`k = 0`).
    pub fn atm_index(&self) -> Option<usize> {
        self.log_moneyness
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.abs().partial_cmp(&b.1.abs()).unwrap_or(Ordering::Equal))
            .map(|(i, _)| i)
    }

    /// Observed total implied variances `vol^2 * t`.
    pub fn total_variances(&self) -> Vec<f64> {
        self.market_vols
            .iter()
            .map(|v| v * v * self.tenor)
            .collect()
    }
}

/// Model price and volatility for one quote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingResult {
    pub option_type: OptionType,
    pub strike: f64,
    pub tenor: f64,
    pub model_price: f64,
    pub model_iv: f64,
}

/// Objective + box bounds abstraction shared by every calibrator in the crate.
pub trait ModelCalibrator: Send + Sync {
    /// Returns the name of the model (e.g., "svi")
    fn model_name(&self) -> &str;

    /// How many parameters are in the model's optimization vector
    fn param_count(&self) -> usize {
        self.param_bounds().len()
    }

    /// Returns the vector of (min, max) bounds for each parameter
    fn param_bounds(&self) -> &[(f64, f64)];

    /// Given a parameter vector `x`, returns the objective value
    fn evaluate_objective(&self, x: &[f64]) -> f64;

    /// Returns parameter names in the order they appear in the optimization vector
    fn param_names(&self) -> Vec<&str>;
}

/// Clamp every coordinate of `x` into its box.
pub fn clamp_to_bounds(x: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    x.iter()
        .zip(bounds.iter())
        .map(|(v, (lo, hi))| v.clamp(*lo, *hi))
        .collect()
}
