use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::fmt;

use itertools::iproduct;

use crate::mot::{Detection, DistancePair, TrackedObject};
use crate::utils::{euclidean_distance, Point};

/// Multi-object tracker based on nearest-centroid association.
///
/// Matching is greedy: the globally closest (object, detection) pair is bound first,
/// then the next closest among the remaining ones, and so on. This is not an optimal
/// assignment and crossing trajectories may swap identities.
pub struct CentroidTracker {
    // Max number of consecutive frames an object may stay unmatched. Default is 30
    max_disappeared: usize,
    // Optional association cutoff in pixels. Default is None: the closest pair always wins
    max_match_distance: Option<f32>,
    next_object_id: u64,
    // Storage
    objects: BTreeMap<u64, TrackedObject>,
}

impl Default for CentroidTracker {
    /// Creates default instance of CentroidTracker
    ///
    /// Basic usage:
    ///
    /// ```
    /// use cabinet_watch::mot::CentroidTracker;
    /// let tracker = CentroidTracker::default();
    /// assert!(tracker.objects().is_empty());
    /// ```
    fn default() -> Self {
        CentroidTracker::new(30, None)
    }
}

impl CentroidTracker {
    /// Creates new instance of CentroidTracker
    ///
    /// Basic usage:
    ///
    /// ```
    /// use cabinet_watch::mot::{CentroidTracker, Detection};
    /// use cabinet_watch::utils::BBox;
    /// let max_disappeared: usize = 30;
    /// let mut tracker = CentroidTracker::new(max_disappeared, None);
    /// let objects = tracker.update(&[Detection::new(BBox::new(0.0, 0.0, 20.0, 20.0), "bottle", 0.9)]);
    /// assert_eq!(objects.len(), 1);
    /// ```
    pub fn new(max_disappeared: usize, max_match_distance: Option<f32>) -> Self {
        CentroidTracker {
            max_disappeared,
            max_match_distance,
            next_object_id: 0,
            objects: BTreeMap::new(),
        }
    }
    pub fn objects(&self) -> &BTreeMap<u64, TrackedObject> {
        &self.objects
    }
    fn register(&mut self, detection: &Detection) {
        let id = self.next_object_id;
        self.next_object_id += 1;
        self.objects.insert(id, TrackedObject::new(id, detection));
    }
    /// Associates the frame's detections with tracked objects and returns the live set
    pub fn update(&mut self, detections: &[Detection]) -> &BTreeMap<u64, TrackedObject> {
        if self.objects.is_empty() {
            for detection in detections {
                self.register(detection);
            }
            return &self.objects;
        }

        let centroids: Vec<Point> = detections.iter().map(Detection::centroid).collect();
        let max_match_distance = self.max_match_distance;
        let mut priority_queue: BinaryHeap<DistancePair> =
            iproduct!(self.objects.values(), centroids.iter().enumerate())
                .map(|(object, (detection_idx, centroid))| DistancePair {
                    distance: euclidean_distance(&object.get_centroid(), centroid),
                    object_id: object.get_id(),
                    detection_idx,
                })
                .filter(|pair| max_match_distance.map_or(true, |max| pair.distance <= max))
                .collect();

        // Both sides may be bound only once per frame
        let mut used_objects: HashSet<u64> = HashSet::new();
        let mut used_detections: HashSet<usize> = HashSet::new();
        while let Some(pair) = priority_queue.pop() {
            if used_objects.contains(&pair.object_id)
                || used_detections.contains(&pair.detection_idx)
            {
                continue;
            }
            if let Some(object) = self.objects.get_mut(&pair.object_id) {
                object.update(&detections[pair.detection_idx]);
            }
            used_objects.insert(pair.object_id);
            used_detections.insert(pair.detection_idx);
            if used_objects.len() == self.objects.len() || used_detections.len() == detections.len() {
                break;
            }
        }

        let max_disappeared = self.max_disappeared;
        self.objects.retain(|id, object| {
            if used_objects.contains(id) {
                return true;
            }
            object.inc_disappeared();
            // Ids of removed objects are never handed out again
            object.get_disappeared() <= max_disappeared
        });

        for (idx, detection) in detections.iter().enumerate() {
            if !used_detections.contains(&idx) {
                self.register(detection);
            }
        }
        &self.objects
    }
}

impl fmt::Display for CentroidTracker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Maximum disappeared: {}\n\tMaximum match distance: {:?}\n\tTracked objects: {}",
            self.max_disappeared,
            self.max_match_distance,
            self.objects.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::BBox;

    fn detection_at(cx: f32, cy: f32, label: &str) -> Detection {
        Detection::new(BBox::new(cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0), label, 0.9)
    }

    #[test]
    fn test_empty_frames_yield_empty_set() {
        let mut tracker = CentroidTracker::new(3, None);
        for _ in 0..10 {
            assert!(tracker.update(&[]).is_empty());
        }
    }

    #[test]
    fn test_nearest_centroid_keeps_identity() {
        let mut tracker = CentroidTracker::new(30, None);
        let first = tracker.update(&[detection_at(10.0, 10.0, "bottle")]);
        let first_id = *first.keys().next().unwrap();

        let second = tracker.update(&[detection_at(12.0, 11.0, "bottle")]);
        assert_eq!(second.len(), 1);
        let object = second.get(&first_id).unwrap();
        assert_eq!(object.get_centroid(), Point::new(12.0, 11.0));
    }

    #[test]
    fn test_deregister_after_threshold() {
        let max_disappeared = 3;
        let mut tracker = CentroidTracker::new(max_disappeared, None);
        tracker.update(&[detection_at(50.0, 50.0, "can")]);
        // Exactly max_disappeared missed frames: still tracked
        for missed in 1..=max_disappeared {
            let objects = tracker.update(&[]);
            assert_eq!(objects.len(), 1);
            assert_eq!(objects.values().next().unwrap().get_disappeared(), missed);
        }
        // One more: gone
        assert!(tracker.update(&[]).is_empty());
    }

    #[test]
    fn test_ids_never_reused() {
        let mut tracker = CentroidTracker::new(0, None);
        tracker.update(&[detection_at(10.0, 10.0, "can")]);
        assert!(tracker.update(&[]).is_empty());
        let objects = tracker.update(&[detection_at(10.0, 10.0, "can")]);
        assert_eq!(objects.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_greedy_global_minimum_first() {
        let mut tracker = CentroidTracker::new(30, None);
        tracker.update(&[detection_at(0.0, 0.0, "a"), detection_at(100.0, 0.0, "b")]);
        // Detection near b is processed first since its distance to b is the global minimum
        let objects = tracker.update(&[detection_at(60.0, 0.0, "a"), detection_at(98.0, 0.0, "b")]);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[&0].get_centroid(), Point::new(60.0, 0.0));
        assert_eq!(objects[&1].get_centroid(), Point::new(98.0, 0.0));
    }

    #[test]
    fn test_distant_match_without_cutoff() {
        let mut tracker = CentroidTracker::new(30, None);
        tracker.update(&[detection_at(0.0, 0.0, "can")]);
        let objects = tracker.update(&[detection_at(600.0, 400.0, "can")]);
        assert_eq!(objects.len(), 1);
        assert!(objects.contains_key(&0));
    }

    #[test]
    fn test_cutoff_registers_new_object() {
        let mut tracker = CentroidTracker::new(30, Some(50.0));
        tracker.update(&[detection_at(0.0, 0.0, "can")]);
        let objects = tracker.update(&[detection_at(600.0, 400.0, "can")]);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[&0].get_disappeared(), 1);
        assert_eq!(objects[&1].get_disappeared(), 0);
    }

    #[test]
    fn test_extra_detections_are_registered() {
        let mut tracker = CentroidTracker::new(30, None);
        tracker.update(&[detection_at(10.0, 10.0, "a")]);
        let objects = tracker.update(&[
            detection_at(11.0, 10.0, "a"),
            detection_at(200.0, 200.0, "b"),
            detection_at(300.0, 300.0, "c"),
        ]);
        assert_eq!(objects.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(objects[&0].get_centroid(), Point::new(11.0, 10.0));
        assert_eq!(objects[&1].get_label(), "b");
        assert_eq!(objects[&2].get_label(), "c");
    }
}
