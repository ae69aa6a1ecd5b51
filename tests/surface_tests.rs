mod test_utils;

use surface_calib::models::traits::TotalVariance;
use surface_calib::{
    calibrate_essvi_surface, calibrate_ssvi_surface, interpolate, linspace, prepare_slice,
    ForwardModel, MaturitySlice, SsviParams,
};
use test_utils::{
    chain_discount, chain_params, create_test_config, load_chain, synthetic_ssvi_surface,
    CHAIN_PATH, CHAIN_RHO,
};

fn chain_slices() -> Vec<MaturitySlice> {
    let config = create_test_config();
    load_chain(CHAIN_PATH)
        .expect("Failed to load test data")
        .into_iter()
        .filter_map(|c| {
            let model = ForwardModel::KnownDiscount(chain_discount(c.tenor));
            prepare_slice(&c.calls, &c.puts, c.tenor, &model, &config)
                .expect("valid tenor")
                .map(|p| p.slice)
        })
        .collect()
}

#[test]
fn test_essvi_recovers_chain_surface() {
    let slices = chain_slices();
    let config = create_test_config();
    let fit = calibrate_essvi_surface(&slices, &config).expect("eSSVI calibration");

    assert_eq!(fit.surface.len(), 3);
    assert!(fit.skipped.is_empty());
    for slice_fit in &fit.fits {
        let truth = chain_params(slice_fit.tenor);
        println!(
            "  T={:.2} rho={:.4} theta={:.5} psi={:.5} residual={:.2e}",
            slice_fit.tenor,
            slice_fit.params.rho,
            slice_fit.params.theta,
            slice_fit.params.psi(),
            slice_fit.residual
        );
        assert!(slice_fit.residual < 5e-3, "residual {}", slice_fit.residual);
        assert!(
            (slice_fit.params.theta - truth.theta).abs() < 2e-3,
            "theta {} vs {}",
            slice_fit.params.theta,
            truth.theta
        );
        assert!(slice_fit.params.rho < 0.0, "skew sign lost at T={}", slice_fit.tenor);
    }
}

#[test]
fn test_essvi_surface_is_arbitrage_free() {
    let tenors = [0.1, 0.25, 0.5, 1.0, 2.0];
    let slices = synthetic_ssvi_surface(&tenors);
    let config = create_test_config();
    let fit = calibrate_essvi_surface(&slices, &config).expect("eSSVI calibration");
    assert_eq!(fit.surface.len(), tenors.len());

    let grid = linspace(-1.5, 1.5, 17);
    let calendar = fit.surface.calendar_violations(&grid, 1e-6);
    assert!(calendar.is_empty(), "calendar violations {:?}", calendar);

    for (tenor, report) in fit.surface.butterfly_reports(&grid, 1e-8) {
        assert!(report.is_arbitrage_free(), "T={} min g {}", tenor, report.min_g);
    }

    // Correlation stays near the generating value
    for p in fit.surface.params() {
        assert!((p.rho - CHAIN_RHO).abs() < 0.15, "rho {}", p.rho);
    }
}

#[test]
fn test_essvi_unordered_input() {
    let mut slices = synthetic_ssvi_surface(&[0.25, 0.5, 1.0]);
    slices.reverse();
    let config = create_test_config();
    let fit = calibrate_essvi_surface(&slices, &config).expect("eSSVI calibration");
    assert_eq!(fit.surface.tenors(), vec![0.25, 0.5, 1.0]);
}

#[test]
fn test_interpolation_on_calibrated_surface() {
    let slices = synthetic_ssvi_surface(&[0.25, 0.5, 1.0]);
    let config = create_test_config();
    let fit = calibrate_essvi_surface(&slices, &config).expect("eSSVI calibration");
    let surface = &fit.surface;

    // Calibrated tenors are returned exactly
    for slice in surface.slices() {
        assert_eq!(interpolate(surface, slice.tenor()).unwrap(), slice.params);
    }

    // Short end: theta scales linearly to zero
    let first = surface.slices()[0].params;
    let short = interpolate(surface, 0.125).unwrap();
    assert!((short.theta - 0.5 * first.theta).abs() < 1e-14);
    assert_eq!(short.rho, first.rho);

    // Long end: theta keeps growing, psi frozen
    let last = surface.slices()[2].params;
    let long = interpolate(surface, 3.0).unwrap();
    assert!(long.theta >= last.theta);
    assert!((long.psi() - last.psi()).abs() < 1e-12);

    // Total variance is non-decreasing in maturity everywhere on the grid
    let grid = linspace(-1.5, 1.5, 31);
    let tenors = linspace(0.05, 3.0, 60);
    let params: Vec<SsviParams> = tenors
        .iter()
        .map(|&t| interpolate(surface, t).unwrap())
        .collect();
    for pair in params.windows(2) {
        for &k in &grid {
            let (w0, w1) = (pair[0].total_variance(k), pair[1].total_variance(k));
            assert!(w1 >= w0 - 1e-10, "k={} w0={} w1={}", k, w0, w1);
        }
    }

    assert!(interpolate(surface, 0.0).is_err());
    assert!(interpolate(surface, f64::NAN).is_err());
}

#[test]
fn test_ssvi_joint_fit() {
    let slices = synthetic_ssvi_surface(&[0.25, 0.5, 1.0]);
    let config = create_test_config();
    let fit = calibrate_ssvi_surface(&slices, &config).expect("SSVI calibration");

    println!("  SSVI rho={:.4} eta={:.4} objective={:.3e}", fit.rho, fit.eta, fit.objective);
    assert_eq!(fit.surface.len(), 3);
    assert_eq!(fit.gamma, 0.5);
    assert!(fit.rho > -1.0 && fit.rho < 1.0);
    assert!(fit.eta > 0.0);
    assert!(fit.objective.is_finite());

    // Common rho across maturities, ATM variance increasing
    let thetas: Vec<f64> = fit.surface.params().map(|p| p.theta).collect();
    assert!(thetas.windows(2).all(|w| w[1] > w[0]), "thetas {:?}", thetas);
    assert!(fit.surface.params().all(|p| p.rho == fit.rho));

    // Power-law SSVI with increasing theta is calendar-free
    let grid = linspace(-1.5, 1.5, 17);
    assert!(fit.surface.calendar_violations(&grid, 1e-12).is_empty());
}
