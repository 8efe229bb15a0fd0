use anyhow::Result;
use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use std::{thread, time::Duration};

use crate::actions::UinputSink;
use crate::calibrate::CALIBRATION_TARGET;
use crate::config::Profile;
use crate::detector::{DetectorError, DetectorStream};
use crate::gestures::{FrameStatus, GestureEngine};

/// Runtime controls filtering into the frame loop.
pub enum PipelineControl {
    Recalibrate,
}

/// Per-frame feedback snapshot shared with the IPC server for `status`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub hand_visible: bool,
    pub calibrating: bool,
    pub calibration_frames: u32,
    pub calibration_target: u32,
    pub direction_threshold: i32,
    pub current_direction: Option<&'static str>,
    pub dx: i32,
    pub dy: i32,
    pub commands_fired: u64,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            hand_visible: false,
            calibrating: true,
            calibration_frames: 0,
            calibration_target: CALIBRATION_TARGET,
            direction_threshold: 0,
            current_direction: None,
            dx: 0,
            dy: 0,
            commands_fired: 0,
        }
    }
}

/// One iteration per detector frame: observe, calibrate, classify,
/// stabilize, gate, dispatch. Single-threaded by construction; the blocking
/// read on the detector stream is the only wait.
pub fn run_pipeline(
    profile: Arc<Mutex<Profile>>,
    status: Arc<Mutex<PipelineStatus>>,
    rx_ctl: Receiver<PipelineControl>,
    stop: Arc<AtomicBool>,
    detector_script: PathBuf,
) -> Result<()> {
    let mut stream = match DetectorStream::spawn(&detector_script) {
        Ok(s) => s,
        Err(e) => {
            warn!("detector unavailable ({e}); pipeline idle");
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_secs(1));
            }
            return Ok(());
        }
    };

    let mut engine = GestureEngine::new();
    let mut sink = UinputSink::new().unwrap_or_else(|_| UinputSink::noop());
    let mut fired_total: u64 = 0;
    let mut hand_was_visible = true;

    info!("pipeline: calibrating, hold your hand still");

    loop {
        if stop.load(Ordering::Relaxed) {
            info!("pipeline: stop requested");
            return Ok(());
        }

        while let Ok(msg) = rx_ctl.try_recv() {
            match msg {
                PipelineControl::Recalibrate => {
                    engine.recalibrate();
                    info!("pipeline: recalibrating, hold your hand still");
                }
            }
        }

        let point = match stream.next_frame() {
            Ok(Some(frame)) => frame.fingertip(),
            Ok(None) => {
                info!("pipeline: detector stream ended");
                return Ok(());
            }
            Err(DetectorError::Malformed(e)) => {
                // one bad line is one missed observation, not a failure
                warn!("pipeline: dropping malformed frame: {e}");
                None
            }
            Err(e) => {
                error!("pipeline: detector stream failed: {e}");
                return Err(e.into());
            }
        };

        let th = { profile.lock().unwrap().thresholds.clone() };
        let outcome = engine.process_frame(point, Instant::now(), &th);

        match outcome {
            FrameStatus::NoHand => {
                if hand_was_visible {
                    info!("pipeline: no hand detected");
                    hand_was_visible = false;
                }
            }
            FrameStatus::Calibrating { frames, target } => {
                hand_was_visible = true;
                if frames == target {
                    info!("pipeline: calibration complete ({frames}/{target}), baseline locked");
                }
            }
            FrameStatus::Tracking { fired, .. } => {
                hand_was_visible = true;
                if let Some(d) = fired {
                    info!("pipeline: fired '{}'", d.as_str());
                    if let Err(e) = super::dispatch::dispatch_direction(d, &profile, &mut sink) {
                        error!("dispatch failed: {e}");
                    } else {
                        fired_total += 1;
                    }
                }
            }
        }

        let (cal_frames, cal_target) = engine.calibration_progress();
        let mut st = status.lock().unwrap();
        st.calibration_frames = cal_frames;
        st.calibration_target = cal_target;
        st.direction_threshold = th.direction_threshold;
        st.commands_fired = fired_total;
        match outcome {
            FrameStatus::NoHand => {
                st.hand_visible = false;
            }
            FrameStatus::Calibrating { .. } => {
                st.hand_visible = true;
                st.calibrating = true;
            }
            FrameStatus::Tracking { dx, dy, current, .. } => {
                st.hand_visible = true;
                st.calibrating = false;
                st.dx = dx;
                st.dy = dy;
                st.current_direction = current.map(|d| d.as_str());
            }
        }
    }
}
