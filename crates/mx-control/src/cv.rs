//! Control-voltage scaling

use mx_core::PortHints;

/// Map a raw 0..1 CV sample onto the target's range. Unranged targets get
/// the raw value.
#[inline]
pub fn cv_to_control(raw: f32, hints: &PortHints) -> f32 {
    if hints.ranged {
        raw * (hints.maximum - hints.minimum) + hints.minimum
    } else {
        raw
    }
}

/// Inverse of [`cv_to_control`]
#[inline]
pub fn control_to_cv(value: f32, hints: &PortHints) -> f32 {
    let span = hints.maximum - hints.minimum;
    if hints.ranged && span != 0.0 {
        (value - hints.minimum) / span
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bipolar_range() {
        let hints = PortHints::ranged(-1.0, 1.0, 0.0);
        assert_relative_eq!(cv_to_control(0.0, &hints), -1.0);
        assert_relative_eq!(cv_to_control(1.0, &hints), 1.0);
        assert_relative_eq!(cv_to_control(0.5, &hints), 0.0);
    }

    #[test]
    fn test_unranged_passes_raw() {
        let hints = PortHints::default();
        assert_relative_eq!(cv_to_control(0.37, &hints), 0.37);
        assert_relative_eq!(control_to_cv(0.37, &hints), 0.37);
    }

    #[test]
    fn test_inverse() {
        let hints = PortHints::ranged(-70.0, 6.0, 0.0);
        assert_relative_eq!(control_to_cv(cv_to_control(0.25, &hints), &hints), 0.25, epsilon = 1e-6);
    }
}
