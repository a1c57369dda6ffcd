use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mot::{Boundary, Side, TrackedObject};
use crate::utils::{BBox, Point};

/// Side the object ended up on after crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
        }
    }
    fn from_side(side: Side) -> Option<Self> {
        match side {
            Side::In => Some(Direction::In),
            Side::Out => Some(Direction::Out),
            Side::NoSide => None,
        }
    }
}

/// When a tracked identity is allowed to emit crossing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingPolicy {
    /// Every side change fires once. A crossing into the side the object already crossed into
    /// fires again only after the object was seen back on the other side
    #[default]
    EveryTransition,
    /// At most one event per tracked identity
    FirstOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub object_id: u64,
    pub label: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub centroid: Point,
    pub bbox: BBox,
    pub confidence: f32,
}

// Per-object bookkeeping between frames
#[derive(Debug, Clone)]
struct SideState {
    // Last defined side; NoSide only until the object is first seen off the line
    side: Side,
    // Side of the last emitted crossing, None until the first one
    crossed_into: Option<Side>,
}

/// Emits an event once per observed side change of a tracked object
pub struct BoundaryCrossingDetector {
    boundary: Option<Boundary>,
    policy: CrossingPolicy,
    // Points within this distance (pixels) of the line are NoSide and keep the side the object
    // had before entering the band. Default 0.0
    side_margin: f32,
    states: HashMap<u64, SideState>,
}

impl Default for BoundaryCrossingDetector {
    fn default() -> Self {
        BoundaryCrossingDetector::new(CrossingPolicy::default(), 0.0)
    }
}

impl BoundaryCrossingDetector {
    pub fn new(policy: CrossingPolicy, side_margin: f32) -> Self {
        BoundaryCrossingDetector {
            boundary: None,
            policy,
            side_margin,
            states: HashMap::new(),
        }
    }
    pub fn get_boundary(&self) -> Option<&Boundary> {
        self.boundary.as_ref()
    }
    /// Replaces the live boundary. Sides recorded against the previous line are dropped.
    pub fn set_boundary(&mut self, boundary: Option<Boundary>) {
        if self.boundary != boundary {
            self.states.clear();
        }
        self.boundary = boundary;
    }
    pub fn side_of(&self, point: &Point) -> Side {
        match &self.boundary {
            Some(boundary) => boundary.side_with_margin(point, self.side_margin),
            None => Side::NoSide,
        }
    }
    /// Classifies every live object and returns the crossings observed in this frame
    pub fn update(&mut self, objects: &BTreeMap<u64, TrackedObject>) -> Vec<CrossingEvent> {
        let mut events = vec![];
        if self.boundary.is_none() {
            return events;
        }
        let now = Utc::now();
        for (id, object) in objects.iter() {
            let current = self.side_of(&object.get_centroid());
            match self.states.get_mut(id) {
                Some(state) => {
                    if !current.is_defined() {
                        // On the line or inside the margin band: keep the last defined side
                        continue;
                    }
                    let changed = state.side.is_defined() && state.side != current;
                    let allowed = match self.policy {
                        CrossingPolicy::EveryTransition => state.crossed_into != Some(current),
                        CrossingPolicy::FirstOnly => state.crossed_into.is_none(),
                    };
                    if changed && allowed {
                        if let Some(direction) = Direction::from_side(current) {
                            events.push(CrossingEvent {
                                object_id: *id,
                                label: object.get_label().to_string(),
                                direction,
                                timestamp: now,
                                centroid: object.get_centroid(),
                                bbox: object.get_bbox(),
                                confidence: object.get_confidence(),
                            });
                            state.crossed_into = Some(current);
                        }
                    } else if self.policy == CrossingPolicy::EveryTransition
                        && state.crossed_into.is_some_and(|side| side != current)
                    {
                        // Back on the side it left: the next crossing counts again
                        state.crossed_into = None;
                    }
                    state.side = current;
                }
                None => {
                    self.states.insert(
                        *id,
                        SideState {
                            side: current,
                            crossed_into: None,
                        },
                    );
                }
            }
        }
        // Deregistered objects lose their history
        self.states.retain(|id, _| objects.contains_key(id));
        events
    }
}
