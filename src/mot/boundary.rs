use serde::{Deserialize, Serialize};

use crate::mot::BoundaryError;
use crate::utils::{Point, Resolution};

/// Half-plane of a point relative to the boundary line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    In,
    Out,
    /// Exactly on the line (or within the configured margin)
    NoSide,
}

impl Side {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Side::NoSide)
    }
}

/// Line segment in the pixel space of one particular resolution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    pub p1: Point,
    pub p2: Point,
}

impl Boundary {
    pub fn new(p1: Point, p2: Point) -> Self {
        Boundary { p1, p2 }
    }
    /// Signed cross product `(Px-x1)*(y2-y1) - (Py-y1)*(x2-x1)`
    pub fn cross(&self, point: &Point) -> f32 {
        (point.x - self.p1.x) * (self.p2.y - self.p1.y)
            - (point.y - self.p1.y) * (self.p2.x - self.p1.x)
    }
    pub fn length(&self) -> f32 {
        crate::utils::euclidean_distance(&self.p1, &self.p2)
    }
    /// Both endpoints coincide: every point classifies `NoSide`
    pub fn is_degenerate(&self) -> bool {
        self.p1 == self.p2
    }
    /// Positive cross product is `In`, negative is `Out`, zero is `NoSide`
    ///
    /// Basic usage:
    ///
    /// ```
    /// use cabinet_watch::mot::{Boundary, Side};
    /// use cabinet_watch::utils::Point;
    /// let line = Boundary::new(Point::new(0.0, 0.0), Point::new(100.0, 0.0));
    /// assert_eq!(line.side_of(&Point::new(50.0, -10.0)), Side::In);
    /// assert_eq!(line.side_of(&Point::new(50.0, 10.0)), Side::Out);
    /// ```
    pub fn side_of(&self, point: &Point) -> Side {
        self.side_with_margin(point, 0.0)
    }
    /// Same as `side_of`, but points closer to the line than `margin` pixels are `NoSide`
    pub fn side_with_margin(&self, point: &Point, margin: f32) -> Side {
        let d = self.cross(point);
        if margin > 0.0 {
            let length = self.length();
            if length > 0.0 && (d / length).abs() <= margin {
                return Side::NoSide;
            }
        }
        if d > 0.0 {
            Side::In
        } else if d < 0.0 {
            Side::Out
        } else {
            Side::NoSide
        }
    }
}

/// Boundary as drawn during calibration, together with the resolution it was drawn at
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibratedBoundary {
    pub line: Boundary,
    pub calibration: Resolution,
}

impl CalibratedBoundary {
    pub fn new(line: Boundary, calibration: Resolution) -> Result<Self, BoundaryError> {
        let boundary = CalibratedBoundary { line, calibration };
        boundary.validate()?;
        Ok(boundary)
    }
    pub fn validate(&self) -> Result<(), BoundaryError> {
        if self.calibration.is_empty() {
            return Err(BoundaryError::InvalidResolution(self.calibration));
        }
        let coords = [self.line.p1.x, self.line.p1.y, self.line.p2.x, self.line.p2.y];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(BoundaryError::NotFinite);
        }
        if self.line.p1 == self.line.p2 {
            return Err(BoundaryError::Degenerate {
                x: self.line.p1.x,
                y: self.line.p1.y,
            });
        }
        Ok(())
    }
    /// Maps the calibration line onto a live frame of the given resolution.
    ///
    /// Each axis is scaled independently (`frame / calibration`), then every coordinate is
    /// clamped into `[0, width-1]` / `[0, height-1]`.
    ///
    /// Basic usage:
    ///
    /// ```
    /// use cabinet_watch::mot::{Boundary, CalibratedBoundary};
    /// use cabinet_watch::utils::{Point, Resolution};
    /// let calibrated = CalibratedBoundary::new(
    ///     Boundary::new(Point::new(100.0, 100.0), Point::new(500.0, 100.0)),
    ///     Resolution::new(640, 480),
    /// ).unwrap();
    /// let live = calibrated.rescale_to(Resolution::new(1280, 960));
    /// assert_eq!(live.p1, Point::new(200.0, 200.0));
    /// assert_eq!(live.p2, Point::new(1000.0, 200.0));
    /// ```
    pub fn rescale_to(&self, frame: Resolution) -> Boundary {
        let scale_x = frame.width as f32 / self.calibration.width as f32;
        let scale_y = frame.height as f32 / self.calibration.height as f32;
        let max_x = frame.width.saturating_sub(1) as f32;
        let max_y = frame.height.saturating_sub(1) as f32;
        let map = |p: Point| Point::new((p.x * scale_x).clamp(0.0, max_x), (p.y * scale_y).clamp(0.0, max_y));
        Boundary::new(map(self.line.p1), map(self.line.p2))
    }
}
