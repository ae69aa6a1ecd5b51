//! Quote tables to calibration-ready maturity slices.
//!
//! Pure transformation: tradeable quotes are selected, the forward extracted, the
//! out-of-the-money side of each strike kept, and mids inverted to implied
//! volatilities weighted by Black vega. Inputs are never mutated.

use crate::calibration::config::SurfaceConfig;
use crate::calibration::forward::{extract_forward, ForwardEstimate, ForwardModel};
use crate::calibration::types::{MaturitySlice, OptionQuote};
use crate::models::bs::{black_vega, implied_vols};
use crate::models::utils::log_moneyness;
use anyhow::{bail, Result};

/// A slice together with the market state it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSlice {
    pub slice: MaturitySlice,
    pub forward: ForwardEstimate,
    /// Quotes dropped because the Newton iteration did not converge
    pub unconverged: usize,
}

fn tradeable(quotes: &[OptionQuote], min_mid: f64) -> Vec<OptionQuote> {
    quotes
        .iter()
        .filter(|q| q.is_tradeable(min_mid))
        .copied()
        .collect()
}

/// Builds one maturity's slice from its call and put tables.
///
/// `Ok(None)` means the maturity has too little usable data and should be
/// skipped; `Err` is reserved for invalid arguments.
pub fn prepare_slice(
    calls: &[OptionQuote],
    puts: &[OptionQuote],
    tenor: f64,
    model: &ForwardModel,
    config: &SurfaceConfig,
) -> Result<Option<PreparedSlice>> {
    if !(tenor > 0.0 && tenor.is_finite()) {
        bail!("prepare_slice: tenor must be > 0, got {}", tenor);
    }
    let calls = tradeable(calls, config.quotes.min_mid);
    let puts = tradeable(puts, config.quotes.min_mid);

    let forward = match extract_forward(&calls, &puts, tenor, model, &config.forward) {
        Some(f) => f,
        None => {
            tracing::warn!(tenor, "forward extraction failed, skipping maturity");
            return Ok(None);
        }
    };
    let (fwd, discount) = (forward.forward, forward.discount);

    let otm: Vec<OptionQuote> = calls
        .iter()
        .chain(puts.iter())
        .filter(|q| q.is_out_of_the_money(fwd))
        .copied()
        .collect();

    let prices: Vec<f64> = otm.iter().map(|q| q.mid()).collect();
    let strikes: Vec<f64> = otm.iter().map(|q| q.strike).collect();
    let signs: Vec<f64> = otm.iter().map(|q| q.option_type.sign()).collect();
    let batch = implied_vols(&prices, &strikes, &signs, fwd, tenor, discount, &config.implied_vol)?;

    let mut ks = Vec::with_capacity(otm.len());
    let mut vols = Vec::with_capacity(otm.len());
    let mut vegas = Vec::with_capacity(otm.len());
    for (i, &strike) in strikes.iter().enumerate() {
        if !batch.converged[i] {
            continue;
        }
        let vol = batch.vols[i];
        ks.push(log_moneyness(strike, fwd));
        vols.push(vol);
        vegas.push(black_vega(fwd, strike, tenor, discount, vol));
    }
    let unconverged = otm.len() - ks.len();

    if ks.len() < config.quotes.min_slice_quotes {
        tracing::warn!(
            tenor,
            usable = ks.len(),
            required = config.quotes.min_slice_quotes,
            "too few out-of-the-money quotes, skipping maturity"
        );
        return Ok(None);
    }

    let slice = MaturitySlice::new(tenor, ks, vols, Some(vegas))?;
    tracing::debug!(
        tenor,
        forward = fwd,
        discount,
        points = slice.len(),
        unconverged,
        "prepared maturity slice"
    );
    Ok(Some(PreparedSlice {
        slice,
        forward,
        unconverged,
    }))
}
