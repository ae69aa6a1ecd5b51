mod test_utils;

use approx::assert_abs_diff_eq;

use surface_calib::models::traits::TotalVariance;
use surface_calib::{
    black_price, black_scholes_price, extract_forward, implied_vols, prepare_slice,
    price_with_smile, ForwardConfig, ForwardModel, ImpliedVolConfig, OptionQuote, OptionType,
};
use test_utils::{
    chain_discount, chain_forward, chain_params, create_test_config, load_chain, CHAIN_DIVIDEND,
    CHAIN_PATH, CHAIN_RATE, CHAIN_SPOT,
};

#[test]
fn test_implied_vol_round_trip_atm() {
    let price = black_price(100.0, 100.0, 1.0, 1.0, 0.2, 1.0);
    let batch = implied_vols(&[price], &[100.0], &[1.0], 100.0, 1.0, 1.0, &ImpliedVolConfig::default())
        .expect("valid inputs");
    assert!(batch.all_converged());
    assert_abs_diff_eq!(batch.vols[0], 0.2, epsilon = 1e-4);
}

#[test]
fn test_implied_vol_batch_mixed_rights() {
    let (forward, tenor, discount) = (105.0, 0.75, 0.97);
    let strikes = [80.0, 95.0, 105.0, 120.0, 140.0];
    let signs = [-1.0, -1.0, 1.0, 1.0, 1.0];
    let vols = [0.32, 0.27, 0.24, 0.22, 0.23];
    let prices: Vec<f64> = (0..5)
        .map(|i| black_price(forward, strikes[i], tenor, discount, vols[i], signs[i]))
        .collect();

    let batch = implied_vols(&prices, &strikes, &signs, forward, tenor, discount, &ImpliedVolConfig::default())
        .expect("valid inputs");
    assert!(batch.all_converged());
    for (got, want) in batch.vols.iter().zip(vols.iter()) {
        assert!((got - want).abs() < 1e-4, "got {} want {}", got, want);
    }

    assert!(implied_vols(&prices, &strikes[..4], &signs, forward, tenor, discount, &ImpliedVolConfig::default()).is_err());
}

#[test]
fn test_black_scholes_put_call_parity() {
    let (s, k, t, r, q, v) = (100.0, 95.0, 0.5, 0.03, 0.01, 0.25);
    let call = black_scholes_price(s, k, t, r, q, v, 1.0);
    let put = black_scholes_price(s, k, t, r, q, v, -1.0);
    let parity = s * (-q * t).exp() - k * (-r * t).exp();
    assert_abs_diff_eq!(call - put, parity, epsilon = 1e-10);
}

#[test]
fn test_joint_forward_from_chain() {
    let chain = load_chain(CHAIN_PATH).expect("Failed to load test data");
    assert_eq!(chain.len(), 3);

    for maturity in &chain {
        let est = extract_forward(
            &maturity.calls,
            &maturity.puts,
            maturity.tenor,
            &ForwardModel::Joint { spot: CHAIN_SPOT },
            &ForwardConfig::default(),
        )
        .expect("forward");
        println!(
            "  T={:.2} F={:.5} D={:.6} r={:?} q={:?}",
            maturity.tenor, est.forward, est.discount, est.rate, est.dividend_yield
        );
        assert_abs_diff_eq!(est.forward, chain_forward(maturity.tenor), epsilon = 1e-3);
        assert_abs_diff_eq!(est.discount, chain_discount(maturity.tenor), epsilon = 1e-4);
        assert_abs_diff_eq!(est.rate.expect("joint rate"), CHAIN_RATE, epsilon = 1e-3);
        assert_abs_diff_eq!(est.dividend_yield.expect("joint yield"), CHAIN_DIVIDEND, epsilon = 1e-3);
    }
}

#[test]
fn test_prepare_slice_from_chain() {
    let chain = load_chain(CHAIN_PATH).expect("Failed to load test data");
    let config = create_test_config();

    for maturity in &chain {
        let model = ForwardModel::KnownDiscount(chain_discount(maturity.tenor));
        let prepared = prepare_slice(&maturity.calls, &maturity.puts, maturity.tenor, &model, &config)
            .expect("valid tenor")
            .expect("usable maturity");
        assert!((prepared.forward.forward - chain_forward(maturity.tenor)).abs() < 1e-4);

        let slice = &prepared.slice;
        assert!(slice.len() >= config.quotes.min_slice_quotes);
        assert!(slice.log_moneyness.windows(2).all(|w| w[0] < w[1]));

        let truth = chain_params(maturity.tenor);
        for (&k, &vol) in slice.log_moneyness.iter().zip(&slice.market_vols) {
            let expected = truth.implied_vol(k, maturity.tenor);
            assert!((vol - expected).abs() < 1e-3, "T={} k={} vol={} expected={}", maturity.tenor, k, vol, expected);
        }
    }
}

#[test]
fn test_price_with_smile_matches_chain() {
    let chain = load_chain(CHAIN_PATH).expect("Failed to load test data");
    let config = create_test_config();
    let maturity = &chain[1];
    let model = ForwardModel::KnownDiscount(chain_discount(maturity.tenor));
    let prepared = prepare_slice(&maturity.calls, &maturity.puts, maturity.tenor, &model, &config)
        .expect("valid tenor")
        .expect("usable maturity");

    let mut quotes: Vec<OptionQuote> = maturity.calls.iter().rev().copied().collect();
    quotes.push(OptionQuote::new(0.0, OptionType::Put, 0.1, 0.2));
    let results = price_with_smile(&chain_params(maturity.tenor), &quotes, &prepared.forward);

    assert_eq!(results.len(), quotes.len());
    assert!(results.windows(2).all(|w| w[0].strike <= w[1].strike));

    // Unpriceable quote reported with zeros
    assert_eq!(results[0].strike, 0.0);
    assert_eq!(results[0].model_price, 0.0);
    assert_eq!(results[0].model_iv, 0.0);

    for result in &results[1..] {
        let quote = maturity
            .calls
            .iter()
            .find(|q| q.strike == result.strike)
            .expect("matching quote");
        assert!(
            (result.model_price - quote.mid()).abs() < 0.02,
            "K={} model={} mid={}",
            result.strike,
            result.model_price,
            quote.mid()
        );
        assert_eq!(result.tenor, maturity.tenor);
    }
}
