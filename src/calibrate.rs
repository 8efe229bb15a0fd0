//! Baseline calibration from the first frames of fingertip positions.

/// Fingertip position in frame pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Frames folded into the baseline before it freezes.
pub const CALIBRATION_TARGET: u32 = 30;

/// Running-average baseline over the first [`CALIBRATION_TARGET`] observed
/// points. Once frozen the baseline stays fixed until [`Calibrator::reset`].
#[derive(Debug, Default)]
pub struct Calibrator {
    baseline: Option<Point>,
    samples: u32,
}

impl Calibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observed point into the baseline. Returns whether the
    /// baseline is ready (frozen). No-op once frozen.
    pub fn observe(&mut self, p: Point) -> bool {
        if self.samples >= CALIBRATION_TARGET {
            return true;
        }
        match self.baseline {
            None => {
                self.baseline = Some(p);
                self.samples = 1;
            }
            Some(b) => {
                // integer running average, truncating like the rest of the
                // pixel math
                let n = self.samples as i32;
                self.baseline = Some(Point {
                    x: (b.x * n + p.x) / (n + 1),
                    y: (b.y * n + p.y) / (n + 1),
                });
                self.samples += 1;
            }
        }
        self.samples >= CALIBRATION_TARGET
    }

    /// Current baseline, including a still-converging one (for overlay use).
    pub fn baseline(&self) -> Option<Point> {
        self.baseline
    }

    /// The baseline, but only once calibration has completed.
    pub fn frozen_baseline(&self) -> Option<Point> {
        if self.samples >= CALIBRATION_TARGET {
            self.baseline
        } else {
            None
        }
    }

    /// (frames observed, frames needed) for progress display.
    pub fn progress(&self) -> (u32, u32) {
        (self.samples, CALIBRATION_TARGET)
    }

    /// Drop the baseline and start calibrating from scratch.
    pub fn reset(&mut self) {
        self.baseline = None;
        self.samples = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_point_converges_exactly() {
        let mut c = Calibrator::new();
        let p = Point::new(320, 240);
        for _ in 0..CALIBRATION_TARGET {
            c.observe(p);
        }
        assert_eq!(c.frozen_baseline(), Some(p));
        assert_eq!(c.progress(), (CALIBRATION_TARGET, CALIBRATION_TARGET));
    }

    #[test]
    fn frozen_baseline_ignores_further_observations() {
        let mut c = Calibrator::new();
        let p = Point::new(320, 240);
        for _ in 0..CALIBRATION_TARGET {
            c.observe(p);
        }
        assert!(c.observe(Point::new(0, 0)));
        assert_eq!(c.frozen_baseline(), Some(p));
        assert_eq!(c.progress(), (CALIBRATION_TARGET, CALIBRATION_TARGET));
    }

    #[test]
    fn not_ready_before_target() {
        let mut c = Calibrator::new();
        for i in 0..CALIBRATION_TARGET - 1 {
            assert!(!c.observe(Point::new(100, 100)), "ready after {} frames", i + 1);
            assert!(c.frozen_baseline().is_none());
        }
        assert!(c.observe(Point::new(100, 100)));
    }

    #[test]
    fn running_average_truncates_componentwise() {
        let mut c = Calibrator::new();
        c.observe(Point::new(10, 0));
        c.observe(Point::new(13, 1));
        // (10*1 + 13) / 2 = 11 (truncated), (0 + 1) / 2 = 0
        assert_eq!(c.baseline(), Some(Point::new(11, 0)));
        assert_eq!(c.progress().0, 2);
    }

    #[test]
    fn reset_restarts_calibration() {
        let mut c = Calibrator::new();
        for _ in 0..CALIBRATION_TARGET {
            c.observe(Point::new(320, 240));
        }
        c.reset();
        assert_eq!(c.progress(), (0, CALIBRATION_TARGET));
        assert!(c.baseline().is_none());
        c.observe(Point::new(50, 60));
        assert_eq!(c.baseline(), Some(Point::new(50, 60)));
        assert_eq!(c.progress().0, 1);
    }
}
