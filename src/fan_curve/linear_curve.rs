use std::collections::BTreeMap;

use crate::fan_curve::{CurveError, ExtendedCurve, FanCurve, MAX_SPEED};

// Sparse temperature -> speed control points,
// interpolated linearly on every lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearCurve {
    points: BTreeMap<i32, u8>,
}

impl LinearCurve {
    // Build a curve from the given control points.
    // Speeds are clamped to 100, a later duplicate temperature
    // replaces the earlier one.
    pub fn new(points: &[(i32, u8)]) -> Result<LinearCurve, CurveError> {
        Self::from_points(points.iter().copied())
    }

    pub fn from_points(
        points: impl IntoIterator<Item = (i32, u8)>,
    ) -> Result<LinearCurve, CurveError> {
        let points: BTreeMap<i32, u8> = points
            .into_iter()
            .map(|(temp, speed)| (temp, speed.min(MAX_SPEED)))
            .collect();

        if points.is_empty() {
            return Err(CurveError::Empty);
        }

        Ok(Self { points })
    }

    // Lowest and highest control point
    pub fn bounds(&self) -> ((i32, u8), (i32, u8)) {
        // The constructor refuses empty maps so both ends exist
        let first = self.points.first_key_value().map(|(t, s)| (*t, *s));
        let last = self.points.last_key_value().map(|(t, s)| (*t, *s));

        (first.unwrap_or((0, MAX_SPEED)), last.unwrap_or((0, MAX_SPEED)))
    }

    // Precompute the speed of every integer temperature
    // between the lowest and highest control point
    pub fn build_extended(&self) -> ExtendedCurve {
        ExtendedCurve::from_linear(self)
    }
}

impl FanCurve for LinearCurve {
    fn get_speed(&self, temp: i32) -> u8 {
        // Check if temperature is the map, in that case return
        // the corresponding fan speed
        if let Some(speed) = self.points.get(&temp) {
            return *speed;
        }

        // Find the 2 points of the temperature interval
        let preceding = self.points.range(..temp).next_back();
        let succeeding = self.points.range(temp..).next();

        match (preceding, succeeding) {
            (Some(pre), Some(suc)) => linear_interpolation(pre, suc, temp),
            // Past the last point, stay on its speed
            (Some(pre), None) => *pre.1,
            // Below the first point, stay on its speed
            (None, Some(suc)) => *suc.1,
            // Unreachable for a constructed curve, run the fans at full
            // speed for safety
            (None, None) => MAX_SPEED,
        }
    }

    fn points_num(&self) -> usize {
        self.points.len()
    }
}

// Perform the linear interpolation between two points and return the
// fan speed rounded half away from zero
fn linear_interpolation(pre: (&i32, &u8), suc: (&i32, &u8), temp: i32) -> u8 {
    let t = f64::from(temp);

    let t1 = f64::from(*pre.0);
    let s1 = f64::from(*pre.1);
    let t2 = f64::from(*suc.0);
    let s2 = f64::from(*suc.1);

    let speed = (t - t1) / (t2 - t1) * (s2 - s1) + s1;

    speed.round().clamp(0., f64::from(MAX_SPEED)) as u8
}
