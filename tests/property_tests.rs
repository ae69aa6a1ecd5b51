//! Property-based tests using proptest.
//!
//! Parametrization round trips, the repicked jump-wings slice and the
//! arbitrage guarantees of the slice calibrator, checked over random inputs.

use proptest::prelude::*;
use surface_calib::models::svi::svi_calibrator::SviSliceCalibrator;
use surface_calib::models::traits::TotalVariance;
use surface_calib::{
    check_butterfly, linspace, repair_butterfly, JumpWings, MaturitySlice, OptimizationConfig,
    RawSvi, SliceCalibrationConfig,
};

fn grid() -> Vec<f64> {
    linspace(-1.5, 1.5, 49)
}

// --- Property Test 1: raw <-> natural ---

proptest! {
    /// Raw parameters survive a trip through the natural form.
    #[test]
    fn raw_natural_round_trip(
        a in -0.05_f64..0.2,
        b in 0.01_f64..1.0,
        m in -0.5_f64..0.5,
        rho in -0.95_f64..0.95,
        sigma in 0.01_f64..1.0,
    ) {
        let raw = RawSvi::new(a, b, m, rho, sigma);
        prop_assume!(raw.is_ok());
        let raw = raw.unwrap();
        let back = raw.to_natural().to_raw();

        for (x, y) in raw.to_vec().iter().zip(back.to_vec().iter()) {
            prop_assert!((x - y).abs() < 1e-8, "{:?} -> {:?}", raw, back);
        }
    }
}

// --- Property Test 2: raw -> jump-wings -> raw ---

proptest! {
    /// The jump-wings inversion reproduces the smile away from the `m = 0` locus.
    #[test]
    fn jump_wings_round_trip(
        a in 0.0_f64..0.1,
        b in 0.02_f64..0.5,
        m in prop_oneof![-0.4_f64..-0.01, 0.01_f64..0.4],
        rho in -0.9_f64..0.9,
        sigma in 0.05_f64..0.6,
        t in 0.05_f64..2.0,
    ) {
        let raw = RawSvi::new(a, b, m, rho, sigma).unwrap();
        let jw = raw.to_jump_wings(t);
        let back = jw.to_raw(t);

        for k in linspace(-1.0, 1.0, 21) {
            let (w0, w1) = (raw.total_variance(k), back.total_variance(k));
            prop_assert!((w0 - w1).abs() < 1e-6, "k={} w={} round trip={}", k, w0, w1);
        }

        // A second trip lands on the same jump-wings quantities
        let again = back.to_jump_wings(t);
        prop_assert!((again.v - jw.v).abs() < 1e-6);
        prop_assert!((again.psi - jw.psi).abs() < 1e-6);
        prop_assert!((again.p - jw.p).abs() < 1e-6);
        prop_assert!((again.c - jw.c).abs() < 1e-6);
        prop_assert!((again.v_tilde - jw.v_tilde).abs() < 1e-6);
    }
}

// --- Property Test 3: repicked slices are butterfly-free ---

proptest! {
    /// Keeping `(v, ψ, p)` and re-choosing the call wing and minimum variance
    /// yields a slice with `g >= 0` on the grid.
    ///
    /// This only holds inside the Gatheral-Jacquier SSVI region the repicked slice
    /// lands in, so `ψ` and `p` are drawn from moderate equity-like ranges. Steeper
    /// wings, e.g. `p = 2` with `ψ = 0.2`, can repick into a slice with `g < 0`;
    /// the repair then projects onto the SSVI bounds instead (see below).
    #[test]
    fn repicked_slice_is_butterfly_free(
        v in 0.01_f64..0.5,
        psi in prop_oneof![-0.15_f64..-0.02, 0.02_f64..0.15],
        p in 0.2_f64..0.6,
        c in 0.1_f64..1.5,
        t in 0.05_f64..2.0,
    ) {
        let jw = JumpWings::new(v, psi, p, c, 0.5 * v).unwrap();
        let repicked = jw.repick();
        prop_assume!(repicked.c > 0.0);

        prop_assert_eq!(repicked.v, jw.v);
        prop_assert_eq!(repicked.psi, jw.psi);
        prop_assert_eq!(repicked.p, jw.p);
        prop_assert!(repicked.v_tilde > 0.0 && repicked.v_tilde <= repicked.v + 1e-15);

        let raw = repicked.to_raw(t);
        let report = check_butterfly(&raw, &grid(), 1e-10);
        prop_assert!(report.is_arbitrage_free(), "min g {} for {:?}", report.min_g, raw);
    }
}

// --- Property Test 4: calibrated slices are butterfly-free ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Whatever the market smile, the calibrated (and if needed repaired) slice
    /// satisfies `g >= -1e-6` on the diagnostic grid.
    #[test]
    fn calibrated_slice_is_butterfly_free(
        level in 0.15_f64..0.6,
        skew in -0.25_f64..0.2,
        smile in 0.0_f64..2.5,
        tenor in 0.05_f64..1.5,
    ) {
        // Quadratic-in-k vol smiles, steep enough to invite arbitrage
        let ks = linspace(-0.5, 0.4, 12);
        let vols: Vec<f64> = ks.iter().map(|&k| level + skew * k + smile * k * k).collect();
        let slice = MaturitySlice::new(tenor, ks, vols, None).unwrap();

        let config = SliceCalibrationConfig {
            restarts: 3,
            ..SliceCalibrationConfig::default()
        };
        let calibrator = SviSliceCalibrator::new(&slice, &grid(), &config).unwrap();
        let fit = calibrator.fit(&OptimizationConfig::minimal(), None).unwrap();

        let report = check_butterfly(&fit.params, &grid(), 1e-6);
        prop_assert!(report.is_arbitrage_free(), "min g {} for {:?}", report.min_g, fit.params);
        prop_assert!(fit.params.min_total_variance() > 0.0);
    }
}

#[test]
fn repair_projects_when_repick_leaves_the_ssvi_region() {
    let t = 1.0;
    let jw = JumpWings::new(0.04, 0.2, 2.0, 1.0, 0.02).unwrap();
    let repicked = jw.repick().to_raw(t);
    let report = check_butterfly(&repicked, &grid(), 1e-10);
    assert!(!report.is_arbitrage_free(), "min g {}", report.min_g);

    let params = jw.to_raw(t);
    let ks = linspace(-0.3, 0.3, 13);
    let vols = ks.iter().map(|&k| params.implied_vol(k, t)).collect();
    let slice = MaturitySlice::new(t, ks, vols, None).unwrap();
    let fixed = repair_butterfly(
        &params,
        &slice,
        &grid(),
        &SliceCalibrationConfig::default(),
        &OptimizationConfig::minimal(),
    );
    let report = check_butterfly(&fixed, &grid(), 1e-10);
    assert!(report.is_arbitrage_free(), "min g {} for {:?}", report.min_g, fixed);
}
