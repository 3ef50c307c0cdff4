use std::collections::HashSet;

/// Run-scoped set of entity ids already turned into rows.
///
/// The set only grows; it is dropped with the run and never persisted, so a
/// second run over the same dates starts from scratch.
#[derive(Debug, Default)]
pub struct DeduplicationTracker {
    seen: HashSet<String>,
    overlap: bool,
}

impl DeduplicationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `entity_id` is seen in this run.
    /// A repeat marks the tracker exhausted.
    pub fn admit(&mut self, entity_id: &str) -> bool {
        if self.seen.contains(entity_id) {
            self.overlap = true;
            return false;
        }
        self.seen.insert(entity_id.to_string());
        true
    }

    /// Whether the API has served an entity twice (overlapping or wrapped pages).
    pub fn is_exhausted(&self) -> bool {
        self.overlap
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.seen.contains(entity_id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_once() {
        let mut tracker = DeduplicationTracker::new();
        assert!(tracker.admit("u-1"));
        assert!(tracker.admit("u-2"));
        assert!(!tracker.is_exhausted());

        assert!(!tracker.admit("u-1"));
        assert!(tracker.is_exhausted());
        assert_eq!(tracker.len(), 2);
        assert!(tracker.contains("u-2"));
    }
}
