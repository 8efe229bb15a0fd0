//! Hand landmark stream from the MediaPipe helper subprocess.
//!
//! The helper script owns the camera and prints one JSON line per frame
//! after a `READY` handshake; we only consume landmark 8 (index fingertip).

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::calibrate::Point;

/// MediaPipe hand landmark index for the index fingertip.
pub const INDEX_FINGER_TIP: usize = 8;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to start detector '{script}': {source}")]
    Spawn {
        script: String,
        source: std::io::Error,
    },
    #[error("detector did not signal ready (got {0:?})")]
    NotReady(String),
    #[error("detector stream error: {0}")]
    Stream(#[from] std::io::Error),
    #[error("malformed detector frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
pub struct FrameLandmark {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Deserialize)]
pub struct FrameHand {
    #[serde(default)]
    pub landmarks: Vec<FrameLandmark>,
}

/// One detector frame: pixel dimensions plus zero or more hands in
/// normalized coordinates.
#[derive(Debug, Deserialize)]
pub struct DetectionFrame {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub hands: Vec<FrameHand>,
    #[serde(default)]
    pub error: Option<String>,
}

impl DetectionFrame {
    /// Index fingertip of the first hand, in pixel space. `None` when no
    /// hand is visible, the frame carried an error, or the landmark set is
    /// incomplete or out of range.
    pub fn fingertip(&self) -> Option<Point> {
        if self.error.is_some() || self.width == 0 || self.height == 0 {
            return None;
        }
        let lm = self.hands.first()?.landmarks.get(INDEX_FINGER_TIP)?;
        if !lm.x.is_finite() || !lm.y.is_finite() {
            return None;
        }
        Some(Point::new(
            (lm.x * self.width as f32).round() as i32,
            (lm.y * self.height as f32).round() as i32,
        ))
    }
}

/// Spawned helper process plus the buffered line reader over its stdout.
pub struct DetectorStream {
    child: Child,
    reader: BufReader<ChildStdout>,
    line: String,
}

impl DetectorStream {
    pub fn spawn(script: &Path) -> Result<Self, DetectorError> {
        let mut child = Command::new("python3")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| DetectorError::Spawn {
                script: script.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DetectorError::Spawn {
            script: script.display().to_string(),
            source: std::io::Error::other("no stdout pipe"),
        })?;
        let mut reader = BufReader::new(stdout);

        let mut ready = String::new();
        reader.read_line(&mut ready)?;
        if ready.trim() != "READY" {
            let _ = child.kill();
            return Err(DetectorError::NotReady(ready.trim().to_string()));
        }
        debug!("detector subprocess ready ({})", script.display());

        Ok(Self {
            child,
            reader,
            line: String::new(),
        })
    }

    /// Next frame from the stream. `Ok(None)` means the detector closed its
    /// end (camera released); a `Malformed` error covers just that one line
    /// and the stream stays usable.
    pub fn next_frame(&mut self) -> Result<Option<DetectionFrame>, DetectorError> {
        self.line.clear();
        let n = self.reader.read_line(&mut self.line)?;
        if n == 0 {
            return Ok(None);
        }
        let frame: DetectionFrame = serde_json::from_str(self.line.trim())?;
        if let Some(err) = &frame.error {
            warn!("detector reported frame error: {err}");
        }
        Ok(Some(frame))
    }
}

impl Drop for DetectorStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> DetectionFrame {
        serde_json::from_str(json).unwrap()
    }

    fn hand_with_tip(x: f32, y: f32) -> String {
        let mut lms: Vec<String> = (0..8).map(|_| r#"{"x":0.0,"y":0.0}"#.to_string()).collect();
        lms.push(format!(r#"{{"x":{x},"y":{y}}}"#));
        format!(
            r#"{{"width":640,"height":480,"hands":[{{"landmarks":[{}]}}]}}"#,
            lms.join(",")
        )
    }

    #[test]
    fn fingertip_converts_to_rounded_pixels() {
        let f = frame(&hand_with_tip(0.5, 0.251));
        assert_eq!(f.fingertip(), Some(Point::new(320, 120)));
    }

    #[test]
    fn no_hands_is_no_observation() {
        let f = frame(r#"{"width":640,"height":480,"hands":[]}"#);
        assert_eq!(f.fingertip(), None);
    }

    #[test]
    fn hands_key_is_optional() {
        let f = frame(r#"{"width":640,"height":480}"#);
        assert_eq!(f.fingertip(), None);
    }

    #[test]
    fn short_landmark_set_is_no_observation() {
        let f = frame(r#"{"width":640,"height":480,"hands":[{"landmarks":[{"x":0.5,"y":0.5}]}]}"#);
        assert_eq!(f.fingertip(), None);
    }

    #[test]
    fn frame_error_is_no_observation() {
        let mut f = frame(&hand_with_tip(0.5, 0.5));
        f.error = Some("camera hiccup".into());
        assert_eq!(f.fingertip(), None);
    }

    #[test]
    fn non_finite_landmark_is_no_observation() {
        let mut f = frame(&hand_with_tip(0.5, 0.5));
        f.hands[0].landmarks[INDEX_FINGER_TIP].x = f32::NAN;
        assert_eq!(f.fingertip(), None);
    }
}
