pub mod bs;
pub mod ssvi;
pub mod svi;

/// Common traits used by all surface models
pub mod traits {
    /// A single-maturity smile expressed as total implied variance `w(k)` in
    /// log-forward-moneyness.
    pub trait TotalVariance {
        fn total_variance(&self, k: f64) -> f64;

        /// `(w, w', w'')` at `k`.
        fn derivatives(&self, k: f64) -> (f64, f64, f64);

        /// Black implied volatility `sqrt(w(k)/t)`; zero where the variance is not positive.
        fn implied_vol(&self, k: f64, tenor: f64) -> f64 {
            let w = self.total_variance(k);
            if w <= 0.0 || tenor <= 0.0 {
                return 0.0;
            }
            (w / tenor).sqrt()
        }
    }
}

/// Utility functions for option pricing and calculations
pub mod utils {
    use crate::calibration::types::OptionType;
    use crate::models::bs::black_price;
    use crate::models::traits::TotalVariance;
    use anyhow::{anyhow, Result};

    /// Calculate log-moneyness: ln(K/F)
    pub fn log_moneyness(strike: f64, forward: f64) -> f64 {
        (strike / forward).ln()
    }

    /// Option pricing result
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct OptionPricingResult {
        pub price: f64,
        pub model_iv: f64,
    }

    /// Price a European option off a calibrated smile.
    pub fn price_option<T: TotalVariance>(
        option_type: OptionType,
        strike: f64,
        forward: f64,
        tenor: f64,
        discount: f64,
        model: &T,
    ) -> Result<OptionPricingResult> {
        if strike <= 0.0 || forward <= 0.0 {
            return Err(anyhow!(
                "Invalid strike ({}) or forward ({})",
                strike,
                forward
            ));
        }
        let k = log_moneyness(strike, forward);
        let total_var = model.total_variance(k);

        if total_var <= 0.0 {
            return Err(anyhow!("Non-positive total variance: {}", total_var));
        }

        let model_iv = model.implied_vol(k, tenor);
        let price = black_price(forward, strike, tenor, discount, model_iv, option_type.sign());

        Ok(OptionPricingResult { price, model_iv })
    }
}
