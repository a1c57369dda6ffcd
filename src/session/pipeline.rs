use std::time::{Duration, Instant};

use crate::config::Config;
use crate::mot::{filter_by_confidence, Boundary, BoundaryCrossingDetector, CalibratedBoundary, CentroidTracker, CrossingEvent};
use crate::session::{DetectionAdapter, Frame, SessionError};
use crate::utils::Resolution;

// Period of the debug timing report, in processed frames
const TIMING_REPORT_EVERY: u64 = 30;

/// Counters reported when a session ends
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub decode_failures: u64,
    pub detect_failures: u64,
    pub frames_dropped: u64,
    pub events: u64,
    pub elapsed: Duration,
}

impl SessionStats {
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_processed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Result of one frame that made it through decoding and detection
#[derive(Debug, Default)]
pub struct ProcessedFrame {
    pub resolution: Option<Resolution>,
    pub detections: usize,
    pub tracked: usize,
    pub events: Vec<CrossingEvent>,
}

/// Sequential per-frame processing of one session: decode, detect, track, classify.
///
/// Owns all per-session state; nothing here is shared with other sessions.
pub struct FramePipeline {
    detector: Box<dyn DetectionAdapter>,
    tracker: CentroidTracker,
    crossing: BoundaryCrossingDetector,
    // Boundary in calibration space, None when the device has none configured
    calibrated: Option<CalibratedBoundary>,
    // Resolution the live boundary was last rescaled for
    live_resolution: Option<Resolution>,
    confidence_threshold: f32,
    max_consecutive_decode_failures: Option<u32>,
    consecutive_decode_failures: u32,
    stats: SessionStats,
    started: Instant,
    stage_time: [Duration; 3],
}

impl FramePipeline {
    pub fn new(config: &Config, detector: Box<dyn DetectionAdapter>, boundary: Option<CalibratedBoundary>) -> Self {
        FramePipeline {
            detector,
            tracker: CentroidTracker::new(config.tracker.max_disappeared, config.tracker.max_match_distance),
            crossing: BoundaryCrossingDetector::new(config.crossing.policy, config.crossing.side_margin),
            calibrated: boundary,
            live_resolution: None,
            confidence_threshold: config.detection.confidence_threshold,
            max_consecutive_decode_failures: config.server.max_consecutive_decode_failures,
            consecutive_decode_failures: 0,
            stats: SessionStats::default(),
            started: Instant::now(),
            stage_time: [Duration::ZERO; 3],
        }
    }
    pub fn has_boundary(&self) -> bool {
        self.calibrated.is_some()
    }
    pub fn tracker(&self) -> &CentroidTracker {
        &self.tracker
    }
    /// Boundary in the resolution of the last decoded frame
    pub fn live_boundary(&self) -> Option<&Boundary> {
        self.crossing.get_boundary()
    }
    /// Swaps the calibration boundary. The live boundary is recomputed on the next frame.
    pub fn set_boundary(&mut self, boundary: Option<CalibratedBoundary>) {
        self.calibrated = boundary;
        self.live_resolution = None;
        if boundary.is_none() {
            self.crossing.set_boundary(None);
        }
    }
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            elapsed: self.started.elapsed(),
            ..self.stats
        }
    }
    fn refresh_boundary(&mut self, resolution: Resolution) {
        let Some(calibrated) = self.calibrated else {
            return;
        };
        if self.live_resolution == Some(resolution) {
            return;
        }
        if let Some(previous) = self.live_resolution {
            tracing::warn!(%previous, current = %resolution, "frame resolution changed, rescaling boundary");
        }
        let live = calibrated.rescale_to(resolution);
        tracing::info!(
            calibration = %calibrated.calibration,
            live = %resolution,
            x1 = live.p1.x, y1 = live.p1.y, x2 = live.p2.x, y2 = live.p2.y,
            "boundary rescaled"
        );
        if live.is_degenerate() {
            tracing::warn!(
                calibration = %calibrated.calibration,
                live = %resolution,
                "boundary collapsed to a point after rescaling, no crossings will be reported"
            );
        }
        self.crossing.set_boundary(Some(live));
        self.live_resolution = Some(resolution);
    }
    /// Runs one encoded frame through the pipeline.
    ///
    /// Returns `Ok(None)` when the frame was dropped (undecodable or detector failure) and an
    /// error only when decode failures exceed the configured limit.
    pub fn process(&mut self, payload: Vec<u8>) -> Result<Option<ProcessedFrame>, SessionError> {
        let decode_start = Instant::now();
        let frame = match Frame::decode(payload) {
            Ok(frame) => {
                self.consecutive_decode_failures = 0;
                frame
            }
            Err(err) => {
                self.stats.decode_failures += 1;
                self.consecutive_decode_failures += 1;
                tracing::warn!(error = %err, consecutive = self.consecutive_decode_failures, "dropping undecodable frame");
                if let Some(max) = self.max_consecutive_decode_failures {
                    if self.consecutive_decode_failures > max {
                        return Err(SessionError::TooManyDecodeFailures {
                            count: self.consecutive_decode_failures,
                        });
                    }
                }
                return Ok(None);
            }
        };
        let resolution = frame.resolution();
        self.refresh_boundary(resolution);
        self.stage_time[0] += decode_start.elapsed();

        let detect_start = Instant::now();
        let detections = match self.detector.detect(&frame) {
            Ok(detections) => filter_by_confidence(detections, self.confidence_threshold),
            Err(err) => {
                self.stats.detect_failures += 1;
                tracing::warn!(error = %err, "detection failed, skipping frame");
                return Ok(None);
            }
        };
        self.stage_time[1] += detect_start.elapsed();

        let track_start = Instant::now();
        let objects = self.tracker.update(&detections);
        let tracked = objects.len();
        let events = self.crossing.update(objects);
        self.stage_time[2] += track_start.elapsed();

        self.stats.frames_processed += 1;
        self.stats.events += events.len() as u64;
        if !self.has_boundary() && !detections.is_empty() {
            tracing::trace!(detections = detections.len(), tracked, "detections without boundary");
        }
        if self.stats.frames_processed % TIMING_REPORT_EVERY == 0 {
            let n = TIMING_REPORT_EVERY as u32;
            let stats = self.stats();
            tracing::debug!(
                fps = %format!("{:.2}", stats.fps()),
                events = stats.events,
                decode_ms = (self.stage_time[0] / n).as_secs_f64() * 1000.0,
                detect_ms = (self.stage_time[1] / n).as_secs_f64() * 1000.0,
                track_ms = (self.stage_time[2] / n).as_secs_f64() * 1000.0,
                "timing"
            );
            self.stage_time = [Duration::ZERO; 3];
        }
        Ok(Some(ProcessedFrame {
            resolution: Some(resolution),
            detections: detections.len(),
            tracked,
            events,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::{Detection, Direction};
    use crate::session::frame::test_images::png;
    use crate::session::DetectorError;
    use crate::utils::{BBox, Point};
    use std::collections::VecDeque;

    // Returns the queued detection lists in order, then nothing
    struct Scripted(VecDeque<Vec<Detection>>);

    impl DetectionAdapter for Scripted {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.0.pop_front().unwrap_or_default())
        }
    }

    fn at(cx: f32, cy: f32, confidence: f32) -> Vec<Detection> {
        vec![Detection::new(BBox::new(cx - 4.0, cy - 4.0, cx + 4.0, cy + 4.0), "pepsi_can", confidence)]
    }

    fn calibrated() -> CalibratedBoundary {
        // Horizontal line across the middle of a 64x48 calibration frame
        CalibratedBoundary::new(
            Boundary::new(Point::new(0.0, 24.0), Point::new(64.0, 24.0)),
            Resolution::new(64, 48),
        )
        .unwrap()
    }

    #[test]
    fn test_events_in_live_resolution() {
        let config = Config::default();
        // Live frames are twice the calibration size: the line sits at y=48
        let script = vec![at(64.0, 30.0, 0.9), at(64.0, 60.0, 0.9), at(64.0, 40.0, 0.9)];
        let mut pipeline = FramePipeline::new(&config, Box::new(Scripted(script.into())), Some(calibrated()));
        let mut events = vec![];
        for _ in 0..3 {
            let processed = pipeline.process(png(128, 96)).unwrap().unwrap();
            assert_eq!(processed.resolution, Some(Resolution::new(128, 96)));
            events.extend(processed.events);
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].direction, Direction::Out);
        assert_eq!(events[1].direction, Direction::In);
        assert_eq!(pipeline.stats().events, 2);
    }

    #[test]
    fn test_low_confidence_filtered() {
        let config = Config::default();
        let script = vec![at(10.0, 10.0, 0.5), at(10.0, 10.0, 0.8)];
        let mut pipeline = FramePipeline::new(&config, Box::new(Scripted(script.into())), None);
        for _ in 0..2 {
            let processed = pipeline.process(png(64, 48)).unwrap().unwrap();
            assert_eq!(processed.detections, 0);
            assert_eq!(processed.tracked, 0);
        }
    }

    #[test]
    fn test_no_boundary_no_events() {
        let config = Config::default();
        let script = vec![at(10.0, 10.0, 0.9), at(10.0, 40.0, 0.9), at(10.0, 10.0, 0.9)];
        let mut pipeline = FramePipeline::new(&config, Box::new(Scripted(script.into())), None);
        for _ in 0..3 {
            let processed = pipeline.process(png(64, 48)).unwrap().unwrap();
            assert_eq!(processed.tracked, 1);
            assert!(processed.events.is_empty());
        }
    }

    #[test]
    fn test_decode_failures() {
        let mut config = Config::default();
        config.server.max_consecutive_decode_failures = Some(2);
        let mut pipeline = FramePipeline::new(&config, Box::new(Scripted(VecDeque::new())), None);
        assert!(pipeline.process(b"junk".to_vec()).unwrap().is_none());
        assert!(pipeline.process(b"junk".to_vec()).unwrap().is_none());
        // A good frame resets the streak
        assert!(pipeline.process(png(8, 8)).unwrap().is_some());
        assert!(pipeline.process(b"junk".to_vec()).unwrap().is_none());
        assert!(pipeline.process(b"junk".to_vec()).unwrap().is_none());
        let err = pipeline.process(b"junk".to_vec()).unwrap_err();
        assert!(matches!(err, SessionError::TooManyDecodeFailures { count: 3 }));
        assert_eq!(pipeline.stats().decode_failures, 5);
    }

    #[test]
    fn test_boundary_update_keeps_tracker() {
        let config = Config::default();
        let script = vec![at(10.0, 10.0, 0.9), at(10.0, 10.0, 0.9), at(10.0, 40.0, 0.9)];
        let mut pipeline = FramePipeline::new(&config, Box::new(Scripted(script.into())), None);
        assert!(pipeline.process(png(64, 48)).unwrap().unwrap().events.is_empty());

        pipeline.set_boundary(Some(calibrated()));
        assert!(pipeline.process(png(64, 48)).unwrap().unwrap().events.is_empty());
        let processed = pipeline.process(png(64, 48)).unwrap().unwrap();
        assert_eq!(processed.events.len(), 1);
        // Same identity as before the update
        assert_eq!(processed.events[0].object_id, 0);
        assert_eq!(pipeline.tracker().objects().len(), 1);
    }

    #[test]
    fn test_collapsed_boundary_reports_nothing() {
        let config = Config::default();
        // Drawn below a 64x48 calibration frame: both ends clamp to the last row
        let outside = CalibratedBoundary::new(
            Boundary::new(Point::new(10.0, 60.0), Point::new(10.0, 90.0)),
            Resolution::new(64, 48),
        )
        .unwrap();
        let script = vec![at(5.0, 20.0, 0.9), at(30.0, 20.0, 0.9), at(5.0, 20.0, 0.9)];
        let mut pipeline = FramePipeline::new(&config, Box::new(Scripted(script.into())), Some(outside));
        for _ in 0..3 {
            let processed = pipeline.process(png(64, 48)).unwrap().unwrap();
            assert_eq!(processed.tracked, 1);
            assert!(processed.events.is_empty());
        }
        let live = pipeline.live_boundary().unwrap();
        assert!(live.is_degenerate());
        assert_eq!(live.p1, Point::new(10.0, 47.0));
    }
}
