pub mod essvi_calibrator;
pub mod interp;
pub mod ssvi_calibrator;
pub mod surface;
