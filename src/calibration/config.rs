use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// CMA-ES specific configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CmaEsConfig {
    /// Random seed for reproducibility
    pub seed: Option<u64>,
    /// Whether to evaluate the population in parallel
    pub parallel_eval: bool,
    /// Verbosity level (0=silent, 1=minimal, 2=normal)
    pub verbosity: u8,
    /// Number of IPOP restarts (0 = no IPOP)
    pub ipop_restarts: usize,
    /// Factor to increase population size in IPOP restarts
    pub ipop_increase_factor: f64,
    /// Number of BIPOP restarts (0 = no BIPOP)
    pub bipop_restarts: usize,
    /// Enable L-BFGS-B refinement after CMA-ES?
    pub lbfgsb_enabled: bool,
    /// Max iterations for L-BFGS-B
    pub lbfgsb_max_iterations: usize,
    /// Total function evaluations budget
    pub total_evals_budget: usize,
    /// Whether to use advanced sub-run budgeting logic
    pub use_subrun_budgeting: bool,
}

impl Default for CmaEsConfig {
    fn default() -> Self {
        Self {
            seed: Some(123456),
            parallel_eval: false,
            verbosity: 0,
            ipop_restarts: 0,
            ipop_increase_factor: 2.0,
            bipop_restarts: 0,
            lbfgsb_enabled: true,
            lbfgsb_max_iterations: 200,
            total_evals_budget: 20000,
            use_subrun_budgeting: false,
        }
    }
}

/// Optimiser settings shared by every calibrator (CMA-ES global stage and
/// L-BFGS-B local stage).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// L-BFGS-B convergence tolerance
    pub tolerance: f64,
    /// CMA-ES population size
    pub pop_size: usize,
    /// CMA-ES generations
    pub max_gen: usize,
    /// CMA-ES specific configuration
    pub cmaes: CmaEsConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self::fast()
    }
}

impl OptimizationConfig {
    /// High accuracy, generous iteration budgets.
    pub fn production() -> Self {
        Self {
            tolerance: 1e-10,
            pop_size: 25,
            max_gen: 200,
            cmaes: CmaEsConfig {
                lbfgsb_max_iterations: 500,
                total_evals_budget: 100000,
                ..CmaEsConfig::default()
            },
        }
    }

    /// Balanced speed/accuracy, the default.
    pub fn fast() -> Self {
        Self {
            tolerance: 1e-8,
            pop_size: 16,
            max_gen: 80,
            cmaes: CmaEsConfig::default(),
        }
    }

    /// High-precision settings for research and backtesting.
    pub fn research() -> Self {
        Self {
            tolerance: 1e-12,
            pop_size: 50,
            max_gen: 400,
            cmaes: CmaEsConfig {
                lbfgsb_max_iterations: 2000,
                total_evals_budget: 400000,
                bipop_restarts: 2,
                ..CmaEsConfig::default()
            },
        }
    }

    /// Quick validation settings.
    pub fn minimal() -> Self {
        Self {
            tolerance: 1e-6,
            pop_size: 8,
            max_gen: 25,
            cmaes: CmaEsConfig {
                lbfgsb_max_iterations: 60,
                total_evals_budget: 2000,
                ..CmaEsConfig::default()
            },
        }
    }
}

/// Evenly spaced log-moneyness grid on which arbitrage constraints are enforced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticGrid {
    pub lower: f64,
    pub upper: f64,
    pub points: usize,
}

impl Default for DiagnosticGrid {
    fn default() -> Self {
        // 49 points on [-1.5, 1.5] contain linspace(-1.5, 1.5, 17) as a subset.
        Self {
            lower: -1.5,
            upper: 1.5,
            points: 49,
        }
    }
}

impl DiagnosticGrid {
    pub fn new(lower: f64, upper: f64, points: usize) -> Self {
        Self {
            lower,
            upper,
            points,
        }
    }

    /// Grid nodes, endpoints included.
    pub fn nodes(&self) -> Vec<f64> {
        linspace(self.lower, self.upper, self.points)
    }
}

/// `n` evenly spaced values on `[lower, upper]`, endpoints included.
pub fn linspace(lower: f64, upper: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![lower],
        _ => {
            let step = (upper - lower) / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        upper
                    } else {
                        lower + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Quote validity rules applied before forward extraction and IV inversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteFilter {
    /// Minimum mid price for a quote to be considered tradeable
    pub min_mid: f64,
    /// Minimum OTM quotes required to build a slice
    pub min_slice_quotes: usize,
}

impl Default for QuoteFilter {
    fn default() -> Self {
        Self {
            min_mid: 0.5,
            min_slice_quotes: 4,
        }
    }
}

/// Put-call parity forward extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Number of merged strikes with the smallest |call - put| kept for the fit
    pub conversion_count: usize,
    /// Fewer merged strikes than this and the maturity is skipped
    pub min_quotes: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            conversion_count: 6,
            min_quotes: 4,
        }
    }
}

/// Vectorised Newton-Raphson implied volatility settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpliedVolConfig {
    pub initial_vol: f64,
    pub max_iterations: usize,
    /// Absolute price tolerance at which a quote is frozen
    pub price_tolerance: f64,
    /// Floor on the Newton denominator
    pub min_vega: f64,
    /// Floor applied to each Newton iterate so the pricer stays defined
    pub min_vol: f64,
}

impl Default for ImpliedVolConfig {
    fn default() -> Self {
        Self {
            initial_vol: 0.5,
            max_iterations: 50,
            price_tolerance: 1e-5,
            min_vega: 1e-8,
            min_vol: 1e-6,
        }
    }
}

/// Raw SVI single-slice calibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceCalibrationConfig {
    /// Random restarts when no warm start is supplied
    pub restarts: usize,
    pub seed: u64,
    /// The butterfly constraint is `g(k) >= constraint_epsilon`
    pub constraint_epsilon: f64,
    /// Quadratic penalty multiplier on constraint violations
    pub penalty_weight: f64,
    /// Warm-started re-solves in the calendar-aware mode
    pub refinement_passes: usize,
    /// Minimum points for a slice to be calibrated
    pub min_points: usize,
    pub a_lower: f64,
    pub b_bounds: (f64, f64),
    /// Upper bound on `b` when butterfly and calendar constraints are both active
    pub b_upper_dual: f64,
    pub rho_bounds: (f64, f64),
    pub sigma_bounds: (f64, f64),
    /// Tolerance below which diagnostics report a butterfly violation
    pub repair_tolerance: f64,
    /// Largest accepted `w_prev(k) - w(k)` on the grid in the calendar-aware mode
    pub calendar_tolerance: f64,
    /// Factor applied to the calendar penalty weight on each escalation
    pub penalty_growth: f64,
    /// Escalation stops once the penalty weight would exceed this
    pub max_penalty_weight: f64,
}

impl Default for SliceCalibrationConfig {
    fn default() -> Self {
        Self {
            restarts: 20,
            seed: 42,
            constraint_epsilon: 1e-8,
            penalty_weight: 1e4,
            refinement_passes: 2,
            min_points: 4,
            a_lower: 1e-5,
            b_bounds: (1e-3, 0.5),
            b_upper_dual: 1.0,
            rho_bounds: (-0.999, 0.999),
            sigma_bounds: (1e-2, 1.0),
            repair_tolerance: 1e-10,
            calendar_tolerance: 1e-9,
            penalty_growth: 10.0,
            max_penalty_weight: 1e10,
        }
    }
}

/// SSVI joint calibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsviConfig {
    pub rho_bounds: (f64, f64),
    pub eta_bounds: (f64, f64),
    /// Power-law exponent of `phi(theta)`
    pub gamma: f64,
    pub penalty_weight: f64,
}

impl Default for SsviConfig {
    fn default() -> Self {
        Self {
            rho_bounds: (-0.999, 0.999),
            eta_bounds: (0.0, 4.0),
            gamma: 0.5,
            penalty_weight: 1e4,
        }
    }
}

/// eSSVI sequential calibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EssviConfig {
    /// Random `rho` candidates per search stage
    pub rho_candidates: usize,
    /// Half-width of the second-stage window around the first-stage best `rho`
    pub refine_window: f64,
    pub rho_limit: f64,
    pub seed: u64,
    /// Golden-section iterations for the inner `psi` search
    pub psi_iterations: usize,
    pub psi_tolerance: f64,
    pub calendar_penalty: f64,
    /// Tolerance used when verifying the fitted slice against its predecessor
    pub calendar_tolerance: f64,
    pub min_points: usize,
}

impl Default for EssviConfig {
    fn default() -> Self {
        Self {
            rho_candidates: 50,
            refine_window: 0.15,
            rho_limit: 0.999,
            seed: 7,
            psi_iterations: 100,
            psi_tolerance: 1e-10,
            calendar_penalty: 1e4,
            calendar_tolerance: 1e-8,
            min_points: 3,
        }
    }
}

/// Everything the end-to-end pipeline needs, in one deserializable document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub grid: DiagnosticGrid,
    pub quotes: QuoteFilter,
    pub forward: ForwardConfig,
    pub implied_vol: ImpliedVolConfig,
    pub slice: SliceCalibrationConfig,
    pub ssvi: SsviConfig,
    pub essvi: EssviConfig,
    pub optimizer: OptimizationConfig,
}

impl SurfaceConfig {
    /// Parse a (possibly partial) TOML document; missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("failed to parse surface configuration")
    }

    /// Reduced restart counts and budgets for tests and quick checks.
    pub fn fast() -> Self {
        Self {
            slice: SliceCalibrationConfig {
                restarts: 8,
                ..SliceCalibrationConfig::default()
            },
            essvi: EssviConfig {
                rho_candidates: 30,
                psi_iterations: 80,
                ..EssviConfig::default()
            },
            optimizer: OptimizationConfig::fast(),
            ..Self::default()
        }
    }
}
