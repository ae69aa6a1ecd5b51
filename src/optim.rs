//! Internal one-dimensional optimisation utilities.

/// Configuration for the bounded golden-section search.
pub(crate) struct GoldenSectionConfig {
    /// Maximum number of interval reductions.
    pub max_iter: usize,
    /// Stop once the bracket is narrower than this.
    pub x_tol: f64,
}

/// Result of a golden-section search.
pub(crate) struct GoldenSectionResult {
    /// Best abscissa found.
    pub x: f64,
    /// Objective value at `x`.
    pub fval: f64,
}

const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Minimize `objective(x)` over `[lower, upper]` by golden-section search.
///
/// Exact for unimodal objectives; otherwise returns a local minimum. The bounds
/// themselves are evaluated too, so a minimum sitting on the boundary is found.
pub(crate) fn golden_section<F>(
    objective: F,
    lower: f64,
    upper: f64,
    config: &GoldenSectionConfig,
) -> GoldenSectionResult
where
    F: Fn(f64) -> f64,
{
    if upper <= lower {
        return GoldenSectionResult {
            x: lower,
            fval: objective(lower),
        };
    }

    let (mut a, mut b) = (lower, upper);
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = objective(c);
    let mut fd = objective(d);

    for _ in 0..config.max_iter {
        if (b - a).abs() < config.x_tol {
            break;
        }
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = objective(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = objective(d);
        }
    }

    let mut best = if fc < fd {
        GoldenSectionResult { x: c, fval: fc }
    } else {
        GoldenSectionResult { x: d, fval: fd }
    };
    for x in [lower, upper] {
        let fval = objective(x);
        if fval < best.fval {
            best = GoldenSectionResult { x, fval };
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GoldenSectionConfig {
        GoldenSectionConfig {
            max_iter: 200,
            x_tol: 1e-10,
        }
    }

    #[test]
    fn interior_minimum() {
        let res = golden_section(|x| (x - 0.3).powi(2) + 1.0, -2.0, 2.0, &config());
        assert!((res.x - 0.3).abs() < 1e-6);
        assert!((res.fval - 1.0).abs() < 1e-12);
    }

    #[test]
    fn boundary_minimum() {
        let res = golden_section(|x| x, 0.5, 1.5, &config());
        assert_eq!(res.x, 0.5);
    }

    #[test]
    fn degenerate_interval() {
        let res = golden_section(|x| x * x, 1.0, 1.0, &config());
        assert_eq!(res.x, 1.0);
        assert_eq!(res.fval, 1.0);
    }
}
