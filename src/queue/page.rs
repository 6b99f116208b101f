//! In-memory ordered page with O(1) point lookup by id.

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

/// One "hot" page of a paginated queue: an ordered sequence of entries plus a
/// uuid index over them, kept in lockstep.
///
/// A PageBuffer is not size-limited on its own; the owning queue enforces the
/// page-size bound on writes.
#[derive(Debug)]
pub struct PageBuffer<T> {
    order: VecDeque<Uuid>,
    entries: HashMap<Uuid, T>,
}

impl<T> PageBuffer<T> {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.entries.contains_key(id)
    }

    /// Append an entry. If the id is already present the payload is replaced
    /// in place and the entry keeps its position.
    pub fn push_back(&mut self, id: Uuid, payload: T) {
        if self.entries.insert(id, payload).is_none() {
            self.order.push_back(id);
        }
    }

    /// Prepend an entry, same replacement rule as `push_back`.
    pub fn push_front(&mut self, id: Uuid, payload: T) {
        if self.entries.insert(id, payload).is_none() {
            self.order.push_front(id);
        }
    }

    pub fn pop_front(&mut self) -> Option<(Uuid, T)> {
        let id = self.order.pop_front()?;
        let payload = self.entries.remove(&id)?;
        Some((id, payload))
    }

    pub fn pop_back(&mut self) -> Option<(Uuid, T)> {
        let id = self.order.pop_back()?;
        let payload = self.entries.remove(&id)?;
        Some((id, payload))
    }

    /// Remove and return the entry with the given id, wherever it sits.
    pub fn pop_by_id(&mut self, id: &Uuid) -> Option<T> {
        let payload = self.entries.remove(id)?;
        if let Some(pos) = self.order.iter().position(|o| o == id) {
            self.order.remove(pos);
        }
        Some(payload)
    }

    pub fn get(&self, id: &Uuid) -> Option<&T> {
        self.entries.get(id)
    }

    /// Up to `n` ids in buffer order, oldest first.
    pub fn first_n_ids(&self, n: usize) -> Vec<Uuid> {
        self.order.iter().take(n).copied().collect()
    }

    /// Visit every entry in buffer order without removing it.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (&Uuid, &T)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|payload| (id, payload)))
    }
}

impl<T> Default for PageBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
