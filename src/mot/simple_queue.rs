use std::cmp::Ordering;

// Candidate association between an existing object and a new detection.
// BinaryHeap is a max-heap, so ordering is reversed: the smallest distance pops first.
// Equal distances fall back to object id, then detection index, to keep matching deterministic.
#[derive(Debug, Clone, Copy)]
pub struct DistancePair {
    pub distance: f32,
    pub object_id: u64,
    pub detection_idx: usize,
}

impl PartialEq for DistancePair {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DistancePair {}

impl PartialOrd for DistancePair {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistancePair {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.object_id.cmp(&self.object_id))
            .then_with(|| other.detection_idx.cmp(&self.detection_idx))
    }
}

#[cfg(test)]
mod tests {
    use super::DistancePair;
    use std::collections::BinaryHeap;

    #[test]
    fn test_min_heap() {
        let mut priority_queue: BinaryHeap<DistancePair> = BinaryHeap::new();
        for (distance, object_id) in [(2.0, 0), (1.0, 1), (3.0, 2)] {
            priority_queue.push(DistancePair {
                distance,
                object_id,
                detection_idx: 0,
            });
        }
        let order: Vec<f32> = std::iter::from_fn(|| priority_queue.pop())
            .map(|p| p.distance)
            .collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_ties_break_on_ids() {
        let mut priority_queue: BinaryHeap<DistancePair> = BinaryHeap::new();
        priority_queue.push(DistancePair { distance: 5.0, object_id: 3, detection_idx: 1 });
        priority_queue.push(DistancePair { distance: 5.0, object_id: 1, detection_idx: 2 });
        priority_queue.push(DistancePair { distance: 5.0, object_id: 1, detection_idx: 0 });
        let first = priority_queue.pop().unwrap();
        assert_eq!((first.object_id, first.detection_idx), (1, 0));
        let second = priority_queue.pop().unwrap();
        assert_eq!((second.object_id, second.detection_idx), (1, 2));
    }
}
