// Forward-based Black pricing, vega and a vectorised Newton-Raphson implied
// volatility solver. Spot-based Black-Scholes is expressed through the forward
// form with F = S e^{(r-q)t} and D = e^{-rt}.

use crate::calibration::config::ImpliedVolConfig;
use anyhow::{bail, Result};

fn norm_cdf(x: f64) -> f64 {
    // 0.5 * [1 + erf(x / sqrt(2))]
    0.5 * (1.0 + libm::erf(x / (2.0_f64).sqrt()))
}

fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / statrs::consts::SQRT_2PI
}

fn d1_d2(forward: f64, strike: f64, tenor: f64, vol: f64) -> (f64, f64) {
    let sd = vol * tenor.sqrt();
    let d1 = ((forward / strike).ln() + 0.5 * sd * sd) / sd;
    (d1, d1 - sd)
}

/// Discounted Black price of a European option on a forward.
///
/// `sign` is +1 for calls and -1 for puts. Degenerate inputs (zero vol or tenor)
/// return the discounted intrinsic value.
pub fn black_price(
    forward: f64,
    strike: f64,
    tenor: f64,
    discount: f64,
    vol: f64,
    sign: f64,
) -> f64 {
    if tenor <= 0.0 || vol <= 0.0 {
        return discount * (sign * (forward - strike)).max(0.0);
    }
    let (d1, d2) = d1_d2(forward, strike, tenor, vol);
    discount * sign * (forward * norm_cdf(sign * d1) - strike * norm_cdf(sign * d2))
}

/// dPrice/dVol of [`black_price`]; identical for calls and puts.
pub fn black_vega(forward: f64, strike: f64, tenor: f64, discount: f64, vol: f64) -> f64 {
    if tenor <= 0.0 || vol <= 0.0 {
        return 0.0;
    }
    let (d1, _) = d1_d2(forward, strike, tenor, vol);
    discount * forward * norm_pdf(d1) * tenor.sqrt()
}

/// Price together with vega.
pub fn black_price_and_vega(
    forward: f64,
    strike: f64,
    tenor: f64,
    discount: f64,
    vol: f64,
    sign: f64,
) -> (f64, f64) {
    (
        black_price(forward, strike, tenor, discount, vol, sign),
        black_vega(forward, strike, tenor, discount, vol),
    )
}

/// Spot-based Black-Scholes price with continuous rate and dividend yield.
pub fn black_scholes_price(
    spot: f64,
    strike: f64,
    tenor: f64,
    rate: f64,
    dividend_yield: f64,
    vol: f64,
    sign: f64,
) -> f64 {
    let forward = spot * ((rate - dividend_yield) * tenor).exp();
    let discount = (-rate * tenor).exp();
    black_price(forward, strike, tenor, discount, vol, sign)
}

/// Per-quote output of [`implied_vols`].
#[derive(Debug, Clone, PartialEq)]
pub struct ImpliedVolBatch {
    /// Last Newton estimate for every quote, converged or not
    pub vols: Vec<f64>,
    pub converged: Vec<bool>,
    /// Newton iterations actually run
    pub iterations: usize,
}

impl ImpliedVolBatch {
    pub fn all_converged(&self) -> bool {
        self.converged.iter().all(|&c| c)
    }
}

/// Inverts a batch of prices sharing forward, tenor and discounting.
///
/// Every quote starts at `config.initial_vol`. Each iteration partitions the working
/// set into quotes whose price residual is already inside `config.price_tolerance`
/// (frozen) and the rest, which take one Newton step with the vega floored at
/// `config.min_vega`. Quotes that never converge keep their last estimate.
pub fn implied_vols(
    prices: &[f64],
    strikes: &[f64],
    signs: &[f64],
    forward: f64,
    tenor: f64,
    discount: f64,
    config: &ImpliedVolConfig,
) -> Result<ImpliedVolBatch> {
    if prices.len() != strikes.len() || prices.len() != signs.len() {
        bail!(
            "implied_vols: mismatched inputs ({} prices, {} strikes, {} signs)",
            prices.len(),
            strikes.len(),
            signs.len()
        );
    }
    if !(forward > 0.0 && tenor > 0.0 && discount > 0.0) {
        bail!(
            "implied_vols: forward ({}), tenor ({}) and discount ({}) must be positive",
            forward,
            tenor,
            discount
        );
    }

    let n = prices.len();
    let mut vols = vec![config.initial_vol; n];
    let mut converged = vec![false; n];
    let mut active: Vec<usize> = (0..n).collect();
    let mut iterations = 0;

    let residual =
        |i: usize, vol: f64| black_price(forward, strikes[i], tenor, discount, vol, signs[i]) - prices[i];

    while iterations < config.max_iterations && !active.is_empty() {
        iterations += 1;
        let (resolved, still_active): (Vec<usize>, Vec<usize>) = active
            .into_iter()
            .partition(|&i| residual(i, vols[i]).abs() < config.price_tolerance);

        for i in resolved {
            converged[i] = true;
        }
        for &i in &still_active {
            let diff = residual(i, vols[i]);
            let vega = black_vega(forward, strikes[i], tenor, discount, vols[i]).max(config.min_vega);
            vols[i] = (vols[i] - diff / vega).max(config.min_vol);
        }
        active = still_active;
    }

    // The last Newton step has not been checked yet.
    for i in active {
        if residual(i, vols[i]).abs() < config.price_tolerance {
            converged[i] = true;
        }
    }

    let failures = converged.iter().filter(|c| !**c).count();
    if failures > 0 {
        tracing::warn!(
            failures,
            total = n,
            tenor,
            "implied vol Newton iteration did not converge for some quotes"
        );
    }

    Ok(ImpliedVolBatch {
        vols,
        converged,
        iterations,
    })
}
