use std::collections::HashSet;

/// Member ids not yet seen as active. Only ever shrinks.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    remaining: HashSet<String>,
    seeded: usize,
}

impl WorkingSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let remaining: HashSet<String> = ids.into_iter().map(Into::into).collect();
        Self {
            seeded: remaining.len(),
            remaining,
        }
    }

    /// Record activity by `author_id`. Returns true the first time the id is removed.
    pub fn observe(&mut self, author_id: &str) -> bool {
        self.remaining.remove(author_id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.remaining.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    pub fn len(&self) -> usize {
        self.remaining.len()
    }

    /// Size of the set when it was seeded.
    pub fn seeded(&self) -> usize {
        self.seeded
    }

    /// How many seeded members have been seen so far.
    pub fn accounted(&self) -> usize {
        self.seeded - self.remaining.len()
    }
}
