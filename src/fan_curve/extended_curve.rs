use crate::fan_curve::{FanCurve, LinearCurve};

// Lookup table holding one speed per integer degree between the lowest
// and the highest control point of a linear curve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedCurve {
    // Temperature of the first table entry
    base_temp: i32,
    speeds: Vec<u8>,
}

impl ExtendedCurve {
    pub fn from_linear(curve: &LinearCurve) -> Self {
        let ((low, _), (high, _)) = curve.bounds();

        let speeds = (low..=high).map(|temp| curve.get_speed(temp)).collect();

        Self {
            base_temp: low,
            speeds,
        }
    }

    // Alias used by the controllers
    pub fn target_speed(&self, temp: i32) -> u8 {
        self.get_speed(temp)
    }
}

impl FanCurve for ExtendedCurve {
    fn get_speed(&self, temp: i32) -> u8 {
        let last = self.speeds.len().saturating_sub(1);

        let index = if temp <= self.base_temp {
            0
        } else {
            // Widen before subtracting, a reading can be far off the table
            let offset = i64::from(temp) - i64::from(self.base_temp);
            usize::try_from(offset).map_or(last, |offset| offset.min(last))
        };

        self.speeds.get(index).copied().unwrap_or(0)
    }

    fn points_num(&self) -> usize {
        self.speeds.len()
    }
}
