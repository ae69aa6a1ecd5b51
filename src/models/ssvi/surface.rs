// src/models/ssvi/surface.rs

//! Ordered collection of calibrated maturities.

use crate::calibration::types::MaturitySlice;
use crate::models::svi::arbitrage::{
    calendar_violations, check_butterfly, ButterflyReport, CalendarViolation,
};
use crate::models::traits::TotalVariance;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// One calibrated maturity: the market slice and the parameters fitted to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSlice<P> {
    pub slice: MaturitySlice,
    pub params: P,
}

impl<P> SurfaceSlice<P> {
    pub fn tenor(&self) -> f64 {
        self.slice.tenor
    }
}

/// Per-maturity model vs market payload for plotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmileSnapshot {
    pub label: String,
    pub tenor: f64,
    pub log_moneyness: Vec<f64>,
    pub model_vols: Vec<f64>,
    pub market_vols: Vec<f64>,
}

/// Calibrated maturities in strictly increasing tenor order.
///
/// Built incrementally as maturities calibrate; read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface<P> {
    slices: Vec<SurfaceSlice<P>>,
}

impl<P> Default for Surface<P> {
    fn default() -> Self {
        Self { slices: Vec::new() }
    }
}

impl<P> Surface<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a maturity; its tenor must exceed every tenor already present.
    pub fn push(&mut self, slice: MaturitySlice, params: P) -> Result<()> {
        if let Some(last) = self.slices.last() {
            if slice.tenor <= last.tenor() {
                bail!(
                    "Surface tenors must be strictly increasing: {} after {}",
                    slice.tenor,
                    last.tenor()
                );
            }
        }
        self.slices.push(SurfaceSlice { slice, params });
        Ok(())
    }

    /// Builds a surface from unordered pairs, rejecting duplicate tenors.
    pub fn from_pairs(mut pairs: Vec<(MaturitySlice, P)>) -> Result<Self> {
        pairs.sort_by(|a, b| a.0.tenor.total_cmp(&b.0.tenor));
        let mut surface = Self::new();
        for (slice, params) in pairs {
            surface.push(slice, params)?;
        }
        Ok(surface)
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slices(&self) -> &[SurfaceSlice<P>] {
        &self.slices
    }

    pub fn tenors(&self) -> Vec<f64> {
        self.slices.iter().map(|s| s.tenor()).collect()
    }

    pub fn params(&self) -> impl Iterator<Item = &P> {
        self.slices.iter().map(|s| &s.params)
    }

    /// Parameters stored for exactly `tenor`, if any.
    pub fn params_at(&self, tenor: f64) -> Option<&P> {
        self.slices
            .iter()
            .find(|s| s.tenor() == tenor)
            .map(|s| &s.params)
    }
}

impl<P: TotalVariance> Surface<P> {
    /// Total variance of every maturity on `grid`, one row per maturity.
    pub fn total_variance_grid(&self, grid: &[f64]) -> Vec<Vec<f64>> {
        self.slices
            .iter()
            .map(|s| grid.iter().map(|&k| s.params.total_variance(k)).collect())
            .collect()
    }

    pub fn smile_snapshots(&self) -> Vec<SmileSnapshot> {
        self.slices
            .iter()
            .map(|s| SmileSnapshot {
                label: format!("T={:.4}", s.tenor()),
                tenor: s.tenor(),
                log_moneyness: s.slice.log_moneyness.clone(),
                model_vols: s
                    .slice
                    .log_moneyness
                    .iter()
                    .map(|&k| s.params.implied_vol(k, s.tenor()))
                    .collect(),
                market_vols: s.slice.market_vols.clone(),
            })
            .collect()
    }

    /// Calendar-spread violations between every pair of adjacent maturities.
    pub fn calendar_violations(&self, grid: &[f64], tolerance: f64) -> Vec<CalendarViolation> {
        self.slices
            .windows(2)
            .flat_map(|pair| {
                calendar_violations(
                    &pair[0].params,
                    pair[0].tenor(),
                    &pair[1].params,
                    pair[1].tenor(),
                    grid,
                    tolerance,
                )
            })
            .collect()
    }

    /// Butterfly diagnostics per maturity, keyed by tenor.
    pub fn butterfly_reports(&self, grid: &[f64], tolerance: f64) -> Vec<(f64, ButterflyReport)> {
        self.slices
            .iter()
            .map(|s| (s.tenor(), check_butterfly(&s.params, grid, tolerance)))
            .collect()
    }
}
