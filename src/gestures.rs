//! Displacement classification, temporal stabilization and cooldown gating.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::calibrate::{Calibrator, Point};
use crate::config::Thresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    /// Binding key looked up in the profile, e.g. `direction.up`.
    pub fn binding_key(&self) -> &'static str {
        match self {
            Direction::Up => "direction.up",
            Direction::Down => "direction.down",
            Direction::Left => "direction.left",
            Direction::Right => "direction.right",
        }
    }

    /// Chord token for the fallback arrow-key press.
    pub fn key_token(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Left => "LEFT",
            Direction::Right => "RIGHT",
        }
    }
}

/// Dominant-axis displacement rule. Frame coordinates grow downward, so a
/// positive dy is "down". Equal magnitudes never classify.
pub fn classify(point: Point, baseline: Point, threshold: i32) -> Option<Direction> {
    let dx = point.x - baseline.x;
    let dy = point.y - baseline.y;
    if dx.abs() > dy.abs() && dx.abs() > threshold {
        Some(if dx > 0 { Direction::Right } else { Direction::Left })
    } else if dy.abs() > dx.abs() && dy.abs() > threshold {
        Some(if dy > 0 { Direction::Down } else { Direction::Up })
    } else {
        None
    }
}

/// Bounded history of classified directions; confirms a direction once the
/// most recent `window` entries agree. `None` inputs are never stored.
#[derive(Debug, Default)]
pub struct DirectionStabilizer {
    history: VecDeque<Direction>,
}

impl DirectionStabilizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: Option<Direction>, window: usize) -> Option<Direction> {
        if let Some(d) = label {
            self.history.push_back(d);
            while self.history.len() > window * 2 {
                self.history.pop_front();
            }
        }
        self.confirmed(window)
    }

    fn confirmed(&self, window: usize) -> Option<Direction> {
        if window == 0 || self.history.len() < window {
            return None;
        }
        let last = *self.history.back()?;
        if self.history.iter().rev().take(window).all(|d| *d == last) {
            Some(last)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

/// Cooldown and repeat-interval gate in front of the key-press sink.
#[derive(Debug, Default)]
pub struct CommandGate {
    current: Option<Direction>,
    last_fire: Option<Instant>,
}

impl CommandGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a confirmed direction fires now. Fires when the
    /// cooldown has elapsed and the direction changed, or when the longer
    /// repeat interval has elapsed for the same direction. State is only
    /// touched on a fire.
    pub fn consider(
        &mut self,
        confirmed: Option<Direction>,
        now: Instant,
        cooldown: Duration,
        repeat_interval: Duration,
    ) -> Option<Direction> {
        let confirmed = confirmed?;
        let cooled = match self.last_fire {
            None => true,
            Some(t) => now.duration_since(t) > cooldown,
        };
        if !cooled {
            return None;
        }
        let changed = self.current != Some(confirmed);
        let repeat_ok = match self.last_fire {
            None => true,
            Some(t) => now.duration_since(t) > repeat_interval,
        };
        if changed || repeat_ok {
            self.current = Some(confirmed);
            self.last_fire = Some(now);
            Some(confirmed)
        } else {
            None
        }
    }

    pub fn current(&self) -> Option<Direction> {
        self.current
    }
}

/// Per-frame outcome surfaced to the pipeline for dispatch and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// No usable observation this frame; all state left untouched.
    NoHand,
    Calibrating {
        frames: u32,
        target: u32,
    },
    Tracking {
        dx: i32,
        dy: i32,
        fired: Option<Direction>,
        current: Option<Direction>,
    },
}

/// The whole gesture state machine: calibrate, classify, stabilize, gate.
/// One instance per tracked hand; no globals, so a test harness or a timer
/// callback can drive it just as well as the capture loop.
#[derive(Debug, Default)]
pub struct GestureEngine {
    calibrator: Calibrator,
    stabilizer: DirectionStabilizer,
    gate: CommandGate,
}

impl GestureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_frame(
        &mut self,
        point: Option<Point>,
        now: Instant,
        th: &Thresholds,
    ) -> FrameStatus {
        let Some(p) = point else {
            return FrameStatus::NoHand;
        };
        let Some(baseline) = self.calibrator.frozen_baseline() else {
            // the frame that completes calibration still only calibrates;
            // classification starts the frame after
            self.calibrator.observe(p);
            let (frames, target) = self.calibrator.progress();
            return FrameStatus::Calibrating { frames, target };
        };

        let label = classify(p, baseline, th.direction_threshold);
        let confirmed = self.stabilizer.push(label, th.stabilization_window);
        let fired = self.gate.consider(
            confirmed,
            now,
            Duration::from_secs_f32(th.cooldown_secs),
            Duration::from_secs_f32(th.repeat_interval_secs),
        );
        FrameStatus::Tracking {
            dx: p.x - baseline.x,
            dy: p.y - baseline.y,
            fired,
            current: self.gate.current(),
        }
    }

    /// Re-enter the calibration phase. Stabilizer history and gate state
    /// survive, matching the runtime recalibrate control.
    pub fn recalibrate(&mut self) {
        self.calibrator.reset();
    }

    pub fn calibration_progress(&self) -> (u32, u32) {
        self.calibrator.progress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::CALIBRATION_TARGET;

    fn th(threshold: i32, window: usize) -> Thresholds {
        Thresholds {
            direction_threshold: threshold,
            cooldown_secs: 0.2,
            repeat_interval_secs: 0.5,
            stabilization_window: window,
        }
    }

    #[test]
    fn classify_tie_is_none() {
        let base = Point::new(100, 100);
        assert_eq!(classify(Point::new(115, 115), base, 10), None);
    }

    #[test]
    fn classify_below_threshold_is_none() {
        let base = Point::new(100, 100);
        assert_eq!(classify(Point::new(108, 102), base, 10), None);
    }

    #[test]
    fn classify_dominant_axis() {
        let base = Point::new(100, 100);
        assert_eq!(classify(Point::new(120, 105), base, 10), Some(Direction::Right));
        assert_eq!(classify(Point::new(80, 105), base, 10), Some(Direction::Left));
        assert_eq!(classify(Point::new(105, 120), base, 10), Some(Direction::Down));
        assert_eq!(classify(Point::new(105, 80), base, 10), Some(Direction::Up));
    }

    #[test]
    fn stabilizer_filters_single_frame_jitter() {
        let mut s = DirectionStabilizer::new();
        assert_eq!(s.push(Some(Direction::Left), 2), None);
        assert_eq!(s.push(Some(Direction::Right), 2), None);
    }

    #[test]
    fn stabilizer_confirms_uniform_run() {
        let mut s = DirectionStabilizer::new();
        assert_eq!(s.push(Some(Direction::Left), 2), None);
        assert_eq!(s.push(Some(Direction::Left), 2), Some(Direction::Left));
    }

    #[test]
    fn stabilizer_ignores_none_but_still_confirms() {
        let mut s = DirectionStabilizer::new();
        s.push(Some(Direction::Up), 2);
        s.push(Some(Direction::Up), 2);
        // a below-threshold frame does not disturb the confirmed run
        assert_eq!(s.push(None, 2), Some(Direction::Up));
    }

    #[test]
    fn stabilizer_history_is_bounded() {
        let mut s = DirectionStabilizer::new();
        for _ in 0..50 {
            s.push(Some(Direction::Down), 2);
        }
        assert!(s.history.len() <= 4);
    }

    #[test]
    fn gate_enforces_cooldown() {
        let mut g = CommandGate::new();
        let cd = Duration::from_millis(200);
        let rp = Duration::from_millis(500);
        let t0 = Instant::now();
        assert_eq!(g.consider(Some(Direction::Right), t0, cd, rp), Some(Direction::Right));
        let t1 = t0 + Duration::from_millis(100);
        assert_eq!(g.consider(Some(Direction::Right), t1, cd, rp), None);
    }

    #[test]
    fn gate_direction_change_bypasses_repeat_interval() {
        let mut g = CommandGate::new();
        let cd = Duration::from_millis(200);
        let rp = Duration::from_millis(500);
        let t0 = Instant::now();
        assert_eq!(g.consider(Some(Direction::Right), t0, cd, rp), Some(Direction::Right));
        let t1 = t0 + Duration::from_millis(300);
        assert_eq!(g.consider(Some(Direction::Left), t1, cd, rp), Some(Direction::Left));
    }

    #[test]
    fn gate_same_direction_waits_for_repeat_interval() {
        let mut g = CommandGate::new();
        let cd = Duration::from_millis(200);
        let rp = Duration::from_millis(500);
        let t0 = Instant::now();
        assert_eq!(g.consider(Some(Direction::Right), t0, cd, rp), Some(Direction::Right));
        let t1 = t0 + Duration::from_millis(300);
        assert_eq!(g.consider(Some(Direction::Right), t1, cd, rp), None);
        let t2 = t0 + Duration::from_millis(600);
        assert_eq!(g.consider(Some(Direction::Right), t2, cd, rp), Some(Direction::Right));
    }

    #[test]
    fn gate_none_leaves_state_untouched() {
        let mut g = CommandGate::new();
        let cd = Duration::from_millis(200);
        let rp = Duration::from_millis(500);
        let t0 = Instant::now();
        g.consider(Some(Direction::Up), t0, cd, rp);
        assert_eq!(g.consider(None, t0 + Duration::from_secs(1), cd, rp), None);
        assert_eq!(g.current(), Some(Direction::Up));
    }

    #[test]
    fn engine_calibrates_then_tracks() {
        let mut e = GestureEngine::new();
        let th = th(10, 2);
        let base = Point::new(320, 240);
        let t0 = Instant::now();
        for i in 0..CALIBRATION_TARGET {
            match e.process_frame(Some(base), t0, &th) {
                FrameStatus::Calibrating { frames, target } => {
                    assert_eq!(frames, i + 1);
                    assert_eq!(target, CALIBRATION_TARGET);
                }
                other => panic!("expected Calibrating, got {other:?}"),
            }
        }

        // two frames right of baseline: classified, stabilized, fired once
        let right = Point::new(360, 240);
        match e.process_frame(Some(right), t0, &th) {
            FrameStatus::Tracking { dx, dy, fired, .. } => {
                assert_eq!((dx, dy), (40, 0));
                assert_eq!(fired, None);
            }
            other => panic!("expected Tracking, got {other:?}"),
        }
        match e.process_frame(Some(right), t0, &th) {
            FrameStatus::Tracking { fired, current, .. } => {
                assert_eq!(fired, Some(Direction::Right));
                assert_eq!(current, Some(Direction::Right));
            }
            other => panic!("expected Tracking, got {other:?}"),
        }
    }

    #[test]
    fn engine_no_hand_skips_everything() {
        let mut e = GestureEngine::new();
        let th = th(10, 2);
        let t0 = Instant::now();
        assert_eq!(e.process_frame(None, t0, &th), FrameStatus::NoHand);
        assert_eq!(e.calibration_progress().0, 0);
    }

    #[test]
    fn engine_recalibrate_reenters_calibration() {
        let mut e = GestureEngine::new();
        let th = th(10, 2);
        let t0 = Instant::now();
        for _ in 0..CALIBRATION_TARGET {
            e.process_frame(Some(Point::new(100, 100)), t0, &th);
        }
        e.recalibrate();
        assert_eq!(e.calibration_progress(), (0, CALIBRATION_TARGET));
        match e.process_frame(Some(Point::new(200, 200)), t0, &th) {
            FrameStatus::Calibrating { frames, .. } => assert_eq!(frames, 1),
            other => panic!("expected Calibrating, got {other:?}"),
        }
    }
}
