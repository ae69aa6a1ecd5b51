pub mod arbitrage;
pub mod repair;
pub mod svi_calibrator;
pub mod svi_model;
