#![allow(dead_code)] // Each integration test binary uses a different subset

use serde::Deserialize;
use surface_calib::{
    linspace, MaturitySlice, OptionQuote, OptionType, RawSvi, SsviParams,
    SurfaceConfig,
};
use surface_calib::models::traits::TotalVariance;

pub const CHAIN_PATH: &str = "tests/data/synthetic_chain.csv";

/// Parameters the synthetic chain was generated from.
pub const CHAIN_RATE: f64 = 0.02;
pub const CHAIN_DIVIDEND: f64 = 0.01;
pub const CHAIN_SPOT: f64 = 100.0;
pub const CHAIN_RHO: f64 = -0.4;
pub const CHAIN_ETA: f64 = 1.0;
pub const CHAIN_ATM_VOL: f64 = 0.2;

/// CSV row structure matching the fixture format
#[derive(Debug, Deserialize)]
struct CsvRow {
    tenor: f64,
    strike: f64,
    option_type: String,
    bid: f64,
    ask: f64,
}

/// One maturity of the chain, split by right.
#[derive(Debug, Clone)]
pub struct ChainSlice {
    pub tenor: f64,
    pub calls: Vec<OptionQuote>,
    pub puts: Vec<OptionQuote>,
}

/// Load the option chain and group it by maturity, earliest first.
pub fn load_chain(file_path: &str) -> Result<Vec<ChainSlice>, Box<dyn std::error::Error>> {
    let mut reader = csv::Reader::from_path(file_path)?;
    let mut chain: Vec<ChainSlice> = Vec::new();

    for result in reader.deserialize() {
        let row: CsvRow = result?;
        let option_type: OptionType = row.option_type.parse()?;
        let quote = OptionQuote::new(row.strike, option_type, row.bid, row.ask);

        let idx = match chain.iter().position(|s| (s.tenor - row.tenor).abs() < 1e-12) {
            Some(i) => i,
            None => {
                chain.push(ChainSlice {
                    tenor: row.tenor,
                    calls: Vec::new(),
                    puts: Vec::new(),
                });
                chain.len() - 1
            }
        };
        match option_type {
            OptionType::Call => chain[idx].calls.push(quote),
            OptionType::Put => chain[idx].puts.push(quote),
        }
    }

    chain.sort_by(|a, b| a.tenor.total_cmp(&b.tenor));
    Ok(chain)
}

/// Discount factor used to generate the chain.
pub fn chain_discount(tenor: f64) -> f64 {
    (-CHAIN_RATE * tenor).exp()
}

/// Forward used to generate the chain.
pub fn chain_forward(tenor: f64) -> f64 {
    CHAIN_SPOT * ((CHAIN_RATE - CHAIN_DIVIDEND) * tenor).exp()
}

/// SSVI slice the chain was priced from.
pub fn chain_params(tenor: f64) -> SsviParams {
    let theta = CHAIN_ATM_VOL * CHAIN_ATM_VOL * tenor;
    let psi = CHAIN_ETA * theta.sqrt() / (1.0 + theta).sqrt();
    SsviParams::from_psi(CHAIN_RHO, theta, psi)
}

/// Noise-free smile sampled from any total-variance model.
pub fn synthetic_slice<P: TotalVariance>(params: &P, tenor: f64, lower: f64, upper: f64, n: usize) -> MaturitySlice {
    let ks = linspace(lower, upper, n);
    let vols = ks.iter().map(|&k| params.implied_vol(k, tenor)).collect();
    MaturitySlice::new(tenor, ks, vols, None).expect("synthetic slice")
}

/// A calendar-consistent SSVI surface: constant correlation, increasing `ψ`.
pub fn synthetic_ssvi_surface(tenors: &[f64]) -> Vec<MaturitySlice> {
    tenors
        .iter()
        .map(|&t| synthetic_slice(&chain_params(t), t, -0.35, 0.3, 15))
        .collect()
}

/// Typical equity-index raw SVI slice.
pub fn equity_svi() -> RawSvi {
    RawSvi::new(0.02, 0.12, 0.03, -0.5, 0.2).expect("valid raw SVI")
}

/// Create default test configuration
pub fn create_test_config() -> SurfaceConfig {
    // Fewer restarts and rho candidates than the default
    SurfaceConfig::fast()
}
