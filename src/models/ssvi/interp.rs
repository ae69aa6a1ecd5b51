// src/models/ssvi/interp.rs

//! Cross-maturity interpolation and extrapolation of SSVI / eSSVI slices.
//!
//! Between calibrated tenors `θ` and `ψ = φθ` are linear in `t`, and `ρ` is
//! recovered as `interp(ρψ) / interp(ψ)`. Linear interpolation of `ρ` itself does
//! not preserve monotonicity of total variance; this scheme does whenever the
//! calibrated nodes are calendar-consistent.

use crate::models::ssvi::surface::Surface;
use crate::models::svi::svi_model::SsviParams;
use anyhow::{anyhow, bail, Result};

fn lerp(t: f64, t0: f64, t1: f64, y0: f64, y1: f64) -> f64 {
    y0 + (y1 - y0) * (t - t0) / (t1 - t0)
}

/// Least-squares slope of `θ(t)` through every node and the origin, constrained
/// to pass through the last node. Never negative.
fn long_theta_slope(surface: &Surface<SsviParams>, t_last: f64, theta_last: f64) -> f64 {
    let (num, den) = surface
        .slices()
        .iter()
        .map(|s| (s.tenor(), s.params.theta))
        .chain(std::iter::once((0.0, 0.0)))
        .fold((0.0, 0.0), |(num, den), (t, theta)| {
            let dt = t - t_last;
            (num + dt * (theta - theta_last), den + dt * dt)
        });
    if den > 0.0 {
        (num / den).max(0.0)
    } else {
        0.0
    }
}

/// SSVI parameters at an arbitrary tenor.
///
/// - at a calibrated tenor: the stored parameters, unchanged
/// - below the first tenor: `θ` scaled by `t/t0`, `ρ` and `φ` kept
/// - above the last tenor: `θ` continued from the last node along the
///   least-squares slope of the whole `(t, θ)` series (origin included, slope
///   floored at zero), `ψ` of the last node kept so `φ = ψ/θ`
/// - in between: linear `θ`, `ψ` and `ρψ`
pub fn interpolate(surface: &Surface<SsviParams>, t: f64) -> Result<SsviParams> {
    if !(t > 0.0 && t.is_finite()) {
        bail!("interpolation tenor must be > 0 and finite, got {}", t);
    }
    let slices = surface.slices();
    let (first, last) = match (slices.first(), slices.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return Err(anyhow!("cannot interpolate an empty surface")),
    };

    if let Some(p) = surface.params_at(t) {
        return Ok(*p);
    }

    if t < first.tenor() {
        let p = first.params;
        return Ok(SsviParams {
            theta: p.theta * t / first.tenor(),
            ..p
        });
    }

    if t > last.tenor() {
        let p = last.params;
        let slope = long_theta_slope(surface, last.tenor(), p.theta);
        let theta = p.theta + slope * (t - last.tenor());
        return Ok(SsviParams::from_psi(p.rho, theta, p.psi()));
    }

    let upper = slices
        .iter()
        .position(|s| s.tenor() > t)
        .ok_or_else(|| anyhow!("tenor {} not bracketed by the surface", t))?;
    let (lo, hi) = (&slices[upper - 1], &slices[upper]);
    let (t0, t1) = (lo.tenor(), hi.tenor());
    let (p0, p1) = (lo.params, hi.params);

    let theta = lerp(t, t0, t1, p0.theta, p1.theta);
    let psi = lerp(t, t0, t1, p0.psi(), p1.psi());
    let rho_psi = lerp(t, t0, t1, p0.rho * p0.psi(), p1.rho * p1.psi());
    let rho = if psi != 0.0 {
        rho_psi / psi
    } else {
        lerp(t, t0, t1, p0.rho, p1.rho)
    };
    Ok(SsviParams::from_psi(rho, theta, psi))
}
