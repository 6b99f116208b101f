//! Hybrid in-memory/on-disk FIFO with uuid dedup and point lookup.
//!
//! A PaginatedQueue spans three tiers: a *front* page consulted first on pop,
//! the SQLite store holding the middle of the queue, and a *back* page
//! accepting new pushes. `back: None` means the back page *is* the front page
//! (the queue has never split, or both drained empty and were realigned).
//!
//! Pop order across tiers reproduces global push order: the front page drains
//! before the store is consulted, and the store before the back page is
//! promoted.
//!
//! No locking happens here; the queue assumes single-task access, which its
//! owners enforce.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;

use super::page::PageBuffer;
use super::sqlite::QueueStore;

pub struct PaginatedQueue<T> {
    store: QueueStore,
    front: PageBuffer<T>,
    back: Option<PageBuffer<T>>,
    page_size: usize,
}

fn encode<T: Serialize>(entry: &T) -> Result<String, QueueError> {
    Ok(serde_json::to_string(entry)?)
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, QueueError> {
    Ok(serde_json::from_str(raw)?)
}

fn decode_rows<T: DeserializeOwned>(rows: &[(Uuid, String)]) -> Result<Vec<(Uuid, T)>, QueueError> {
    rows.iter()
        .map(|(id, raw)| Ok((*id, decode(raw)?)))
        .collect()
}

impl<T: Serialize + DeserializeOwned> PaginatedQueue<T> {
    /// Open the queue file and perform the initial load: one front page from
    /// the oldest rows, and a separate back page from the newest rows if the
    /// store still holds more than one page.
    pub fn open(path: &Path, config: &QueueConfig) -> Result<Self, QueueError> {
        let store = QueueStore::open(path, config)?;
        let mut queue = Self {
            store,
            front: PageBuffer::new(),
            back: None,
            page_size: config.page_size.max(1),
        };
        queue.initial_load()?;
        Ok(queue)
    }

    fn initial_load(&mut self) -> Result<(), QueueError> {
        if self.store.is_empty()? {
            return Ok(());
        }
        self.reload_front()?;
        if !self.store.is_empty()? {
            let rows = self.store.load_newest(self.page_size)?;
            match decode_rows(&rows) {
                Ok(entries) => {
                    let mut back = PageBuffer::new();
                    for (id, entry) in entries {
                        back.push_back(id, entry);
                    }
                    self.back = Some(back);
                }
                Err(e) => {
                    self.store.append(&rows)?;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Move the oldest store page into the front buffer. A row that fails to
    /// decode is restored to the store along with the rest of its page
    /// before the error propagates.
    fn reload_front(&mut self) -> Result<(), QueueError> {
        let rows = self.store.load_oldest(self.page_size)?;
        match decode_rows(&rows) {
            Ok(entries) => {
                for (id, entry) in entries {
                    self.front.push_back(id, entry);
                }
                Ok(())
            }
            Err(e) => {
                self.store.prepend(&rows)?;
                Err(e)
            }
        }
    }

    /// Append an entry under `id`.
    ///
    /// Push is idempotent on uuid collision: if `id` is resident in any tier
    /// the call is a no-op returning the existing id. The dedup check only
    /// inspects currently-resident tiers; this is exact because owners
    /// serialize all access to one queue, so a pop completes fully before any
    /// push can observe the structure.
    pub fn push(&mut self, id: Uuid, payload: T) -> Result<Uuid, QueueError> {
        if self.front.contains(&id)
            || self.back.as_ref().is_some_and(|b| b.contains(&id))
            || self.store.contains(&id)?
        {
            return Ok(id);
        }

        if let Some(back) = &mut self.back {
            if back.len() < self.page_size {
                back.push_back(id, payload);
                return Ok(id);
            }
            // Back page full: spill it to the store and start a fresh one.
            // The page stays resident until the append commits; a failed
            // spill must not lose already-acknowledged entries.
            let mut rows = Vec::with_capacity(back.len());
            for (entry_id, entry) in back.iter_ordered() {
                rows.push((*entry_id, encode(entry)?));
            }
            self.store.append(&rows)?;
            let mut fresh = PageBuffer::new();
            fresh.push_back(id, payload);
            self.back = Some(fresh);
            return Ok(id);
        }

        // Back page is the front page: fill it until it splits.
        if self.front.len() < self.page_size {
            self.front.push_back(id, payload);
        } else {
            let mut fresh = PageBuffer::new();
            fresh.push_back(id, payload);
            self.back = Some(fresh);
        }
        Ok(id)
    }

    /// Remove and return the oldest entry, or `None` when the queue is empty.
    pub fn pop(&mut self) -> Result<Option<(Uuid, T)>, QueueError> {
        if let Some(item) = self.front.pop_front() {
            return Ok(Some(item));
        }
        if !self.store.is_empty()? {
            self.reload_front()?;
            return Ok(self.front.pop_front());
        }
        if let Some(back) = self.back.take() {
            if !back.is_empty() {
                self.front = back;
                return Ok(self.front.pop_front());
            }
            // Both pages empty: realign the back page with the front.
        }
        Ok(None)
    }

    /// Remove and return the entry with the given id from whichever tier
    /// holds it.
    pub fn pop_by_id(&mut self, id: &Uuid) -> Result<Option<T>, QueueError> {
        if let Some(payload) = self.front.pop_by_id(id) {
            return Ok(Some(payload));
        }
        if let Some(back) = &mut self.back {
            if let Some(payload) = back.pop_by_id(id) {
                return Ok(Some(payload));
            }
        }
        match self.store.delete(id)? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Return a copy of the entry with the given id without mutating any tier.
    pub fn inspect_by_id(&self, id: &Uuid) -> Result<Option<T>, QueueError>
    where
        T: Clone,
    {
        if let Some(payload) = self.front.get(id) {
            return Ok(Some(payload.clone()));
        }
        if let Some(payload) = self.back.as_ref().and_then(|b| b.get(id)) {
            return Ok(Some(payload.clone()));
        }
        match self.store.get(id)? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Total entries across all three tiers.
    pub fn size(&self) -> Result<usize, QueueError> {
        let back = self.back.as_ref().map_or(0, |b| b.len());
        Ok(self.store.count()? + self.front.len() + back)
    }

    /// Up to `n` ids from the front page only. This deliberately does not
    /// consult the back page or the store; it is an inspection convenience,
    /// not a full queue scan.
    pub fn first_n_ids(&self, n: usize) -> Vec<Uuid> {
        self.front.first_n_ids(n)
    }

    /// Drop every entry in every tier and reset to a single empty page.
    pub fn clear(&mut self) -> Result<(), QueueError> {
        self.store.clear()?;
        self.front = PageBuffer::new();
        self.back = None;
        Ok(())
    }

    /// Flush both pages to the store, then close the connection.
    ///
    /// The front page is stored below the current sequence minimum and the
    /// back page above the maximum, so a later `open` reproduces the exact
    /// queue order. Each page stays resident until its flush commits; on
    /// error the store stays open and `shut_down` can be retried without
    /// losing buffered entries.
    pub fn shut_down(&mut self) -> Result<(), QueueError> {
        if !self.front.is_empty() {
            let mut rows = Vec::with_capacity(self.front.len());
            for (id, entry) in self.front.iter_ordered() {
                rows.push((*id, encode(entry)?));
            }
            self.store.prepend(&rows)?;
            self.front = PageBuffer::new();
        }
        if let Some(back) = &self.back {
            if !back.is_empty() {
                let mut rows = Vec::with_capacity(back.len());
                for (id, entry) in back.iter_ordered() {
                    rows.push((*id, encode(entry)?));
                }
                self.store.append(&rows)?;
            }
        }
        self.back = None;
        self.store.close()
    }
}
