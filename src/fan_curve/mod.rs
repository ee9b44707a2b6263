use thiserror::Error;

pub mod extended_curve;
pub mod linear_curve;

pub use extended_curve::ExtendedCurve;
pub use linear_curve::LinearCurve;

// Highest fan speed a curve can return, in percent
pub const MAX_SPEED: u8 = 100;

pub trait FanCurve {
    // Return the fan speed for the given temperature
    fn get_speed(&self, temp: i32) -> u8;

    // Return the number of points in the curve
    fn points_num(&self) -> usize;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurveError {
    #[error("A fan curve needs at least one control point")]
    Empty,
}
