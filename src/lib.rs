//! # Surface-Calib: Arbitrage-Free Implied Volatility Surface Calibration
//!
//! `surface-calib` fits parametric models of the implied-volatility smile and surface
//! to option quotes and makes sure the result is free of static arbitrage, both
//! butterfly (negative densities) and calendar-spread (total variance decreasing
//! in maturity).
//!
//! ## Core Features
//!
//! - **SVI parametrizations**: raw, natural, jump-wings and SSVI forms with exact conversions
//! - **Arbitrage diagnostics**: g-function, risk-neutral density, calendar checks
//! - **Single-slice calibration**: multi-start L-BFGS-B under a penalised butterfly constraint,
//!   optionally calendar-aware, with jump-wings repair of any remaining violation
//! - **Surface calibration**: SSVI (global `ρ`, power-law `φ`) and eSSVI (maturity-dependent `ρ`,
//!   fitted sequentially)
//! - **Market plumbing**: put-call parity forward extraction and a vectorised Newton implied-vol solver
//! - **Interpolation**: calendar-preserving SSVI interpolation and extrapolation in maturity
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use surface_calib::{
//!     calibrate_essvi_surface, interpolate, prepare_slice, ForwardModel, OptionQuote,
//!     SurfaceConfig,
//! };
//!
//! # fn load_chain(_t: f64) -> (Vec<OptionQuote>, Vec<OptionQuote>) { (vec![], vec![]) }
//! let config = SurfaceConfig::default();
//! let mut slices = Vec::new();
//! for tenor in [0.25_f64, 0.5, 1.0] {
//!     let (calls, puts) = load_chain(tenor);
//!     let model = ForwardModel::KnownDiscount((-0.03 * tenor).exp());
//!     if let Some(prepared) = prepare_slice(&calls, &puts, tenor, &model, &config)? {
//!         slices.push(prepared.slice);
//!     }
//! }
//!
//! let fit = calibrate_essvi_surface(&slices, &config)?;
//! let nine_months = interpolate(&fit.surface, 0.75)?;
//! println!("theta(0.75) = {}", nine_months.theta);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Configuration Presets
//!
//! The optimiser settings come in four presets:
//! - `production()`: High accuracy for live systems
//! - `fast()`: Balanced speed/accuracy for development
//! - `research()`: High-precision settings for research
//! - `minimal()`: Quick validation settings
//!
//! Everything else lives in [`SurfaceConfig`], which deserializes from partial TOML.

// ================================================================================================
// MODULES
// ================================================================================================

pub mod calibration;
pub mod models;
mod optim;

// ================================================================================================
// IMPORTS
// ================================================================================================

use anyhow::{Context, Result};
use std::cmp::Ordering;

use models::{
    ssvi::{essvi_calibrator::calibrate_essvi, ssvi_calibrator::SsviCalibrator},
    svi::svi_calibrator::{calibrate_svi_sequence, SviSliceCalibrator},
    traits::TotalVariance,
    utils::{price_option, OptionPricingResult},
};

// ================================================================================================
// PUBLIC RE-EXPORTS
// ================================================================================================

// Core types for market data and configuration
pub use calibration::{
    config::{
        linspace, CmaEsConfig, DiagnosticGrid, EssviConfig, ForwardConfig, ImpliedVolConfig,
        OptimizationConfig, QuoteFilter, SliceCalibrationConfig, SsviConfig, SurfaceConfig,
    },
    forward::{extract_forward, DiscountCurve, FlatRate, ForwardEstimate, ForwardModel},
    slices::{prepare_slice, PreparedSlice},
    types::{MaturitySlice, OptionQuote, OptionType, PricingResult},
};

// Parametrizations, diagnostics and calibrators
pub use models::bs::{black_price, black_scholes_price, black_vega, implied_vols, ImpliedVolBatch};
pub use models::ssvi::{
    essvi_calibrator::{EssviFit, EssviSliceFit, PreviousSlice},
    interp::interpolate,
    ssvi_calibrator::SsviFit,
    surface::{SmileSnapshot, Surface, SurfaceSlice},
};
pub use models::svi::{
    arbitrage::{
        calendar_violations, check_butterfly, g_function, risk_neutral_density, ButterflyReport,
        CalendarViolation,
    },
    repair::repair_butterfly,
    svi_calibrator::{SliceFit, SviParamBounds, SviSurfaceFit},
    svi_model::{JumpWings, NaturalSvi, RawSvi, SsviParams},
};

// ================================================================================================
// DEFAULT CONFIGURATIONS
// ================================================================================================

/// Pre-configured optimization settings for common use cases.
///
/// # Available Configurations
///
/// - [`production()`]: Production-grade settings
/// - [`fast()`]: Development-optimized settings
/// - [`research()`]: High-precision settings for research
/// - [`minimal()`]: Quick validation settings
pub mod default_configs {
    use crate::calibration::config::OptimizationConfig;

    /// Production-grade configuration.
    ///
    /// **Characteristics:**
    /// - L-BFGS-B tolerance 1e-10, up to 500 iterations
    /// - CMA-ES population 25 over 200 generations
    ///
    /// # Example
    ///
    /// ```rust
    /// use surface_calib::default_configs;
    ///
    /// let config = default_configs::production();
    /// assert_eq!(config.pop_size, 25);
    /// ```
    pub fn production() -> OptimizationConfig {
        OptimizationConfig::production()
    }

    /// Fast configuration for development and testing; also the default.
    ///
    /// ```rust
    /// use surface_calib::default_configs;
    ///
    /// let config = default_configs::fast();
    /// assert!(config.cmaes.lbfgsb_enabled);
    /// ```
    pub fn fast() -> OptimizationConfig {
        OptimizationConfig::fast()
    }

    /// High-precision configuration for research and backtesting.
    pub fn research() -> OptimizationConfig {
        OptimizationConfig::research()
    }

    /// Minimal configuration for quick validation and debugging.
    pub fn minimal() -> OptimizationConfig {
        OptimizationConfig::minimal()
    }
}

/// Calibrate raw SVI to every maturity, earliest first.
///
/// The first maturity uses seeded random restarts; each later maturity is
/// warm-started from the previous fit and penalised for dipping below its total
/// variance on the diagnostic grid. Slices still showing butterfly arbitrage are
/// repaired. Maturities that cannot be fitted are skipped and listed in
/// [`SviSurfaceFit::skipped`].
///
/// # Errors
///
/// Only when no maturity at all could be calibrated.
///
/// # SVI Parameters
///
/// ```text
/// w(k) = a + b * (ρ(k-m) + sqrt((k-m)² + σ²))
/// ```
pub fn calibrate_svi_surface(slices: &[MaturitySlice], config: &SurfaceConfig) -> Result<SviSurfaceFit> {
    let grid = config.grid.nodes();
    calibrate_svi_sequence(slices, &grid, &config.slice, &config.optimizer)
}

/// Calibrate SSVI jointly across maturities.
///
/// ATM total variances `θ_i` come from a raw SVI fit of each maturity
/// (`w_i(0)`); `ρ` and `η` are then fitted globally.
pub fn calibrate_ssvi_surface(slices: &[MaturitySlice], config: &SurfaceConfig) -> Result<SsviFit> {
    let svi = calibrate_svi_surface(slices, config).context("SSVI: ATM variance pre-fit failed")?;
    let fitted: Vec<MaturitySlice> = svi.surface.slices().iter().map(|s| s.slice.clone()).collect();
    let thetas: Vec<f64> = svi
        .surface
        .params()
        .map(|p| p.total_variance(0.0))
        .collect();
    SsviCalibrator::new(&fitted, &thetas, &config.ssvi)?.calibrate(&config.optimizer)
}

/// Calibrate eSSVI sequentially, maturity by maturity.
///
/// Every accepted maturity is free of butterfly arbitrage and does not cross the
/// previous one on the diagnostic grid.
pub fn calibrate_essvi_surface(slices: &[MaturitySlice], config: &SurfaceConfig) -> Result<EssviFit> {
    let grid = config.grid.nodes();
    calibrate_essvi(slices, &grid, &config.essvi)
}

/// Evaluate the single-slice calibration objective for a fixed parameter set.
///
/// This is the exact penalised loss the slice calibrator minimises, so fit quality
/// can be monitored without re-running the optimiser.
pub fn evaluate_svi(slice: &MaturitySlice, params: &RawSvi, config: &SurfaceConfig) -> Result<f64> {
    let calibrator = SviSliceCalibrator::new(slice, &config.grid.nodes(), &config.slice)?;
    Ok(calibrator.evaluate(params))
}

/// Price European options off a calibrated smile.
///
/// Results are sorted by strike. Quotes that cannot be priced (non-positive strike
/// or variance) are reported with zero price and volatility.
pub fn price_with_smile<P: TotalVariance>(
    params: &P,
    quotes: &[OptionQuote],
    forward: &ForwardEstimate,
) -> Vec<PricingResult> {
    let mut results: Vec<PricingResult> = quotes
        .iter()
        .map(|q| {
            let priced = price_option(
                q.option_type,
                q.strike,
                forward.forward,
                forward.tenor,
                forward.discount,
                params,
            )
            .unwrap_or(OptionPricingResult {
                price: 0.0,
                model_iv: 0.0,
            });
            PricingResult {
                option_type: q.option_type,
                strike: q.strike,
                tenor: forward.tenor,
                model_price: priced.price,
                model_iv: priced.model_iv,
            }
        })
        .collect();

    results.sort_by(|a, b| a.strike.partial_cmp(&b.strike).unwrap_or(Ordering::Equal));
    results
}
