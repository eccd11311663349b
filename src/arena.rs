//! Scan-scoped pool of source windows.
//!
//! The merge reads rows out of record batches produced by its children. Each
//! batch is pinned here once, together with its keys in row format, and
//! referred to by a [`SourceId`] afterwards, so merge cursors, the last
//! winning key and pending output rows hold plain indices instead of
//! references into the children. Windows are released in bulk: once per output
//! batch the windows nothing points into any more are dropped together, and
//! [`ScanArena::release`] drops everything at close.

use arrow::{array::Array, record_batch::RecordBatch, row::Rows};

use crate::error::AllocationError;

/// Handle to a window pinned in a [`ScanArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceId(usize);

struct Window {
    batch: RecordBatch,
    keys: Option<Rows>,
    bytes: usize,
    live: bool,
}

/// Bytes of the Arrow buffers a window actually covers.
///
/// Windows are usually slices of a larger block; only the sliced range is
/// charged, falling back to the whole buffers for layouts Arrow cannot
/// measure by slice.
pub fn window_bytes(batch: &RecordBatch) -> usize {
    batch
        .columns()
        .iter()
        .map(|column| {
            column
                .to_data()
                .get_slice_memory_size()
                .unwrap_or_else(|_| column.get_array_memory_size())
        })
        .sum()
}

/// Arena holding the record batches a merge is reading from.
#[derive(Default)]
pub struct ScanArena {
    slots: Vec<Option<Window>>,
    free: Vec<usize>,
    in_use: usize,
    peak: usize,
    memory_limit: Option<usize>,
}

impl ScanArena {
    /// Create an arena that refuses to hold more than `memory_limit` bytes.
    pub fn new(memory_limit: Option<usize>) -> Self {
        Self {
            memory_limit,
            ..Self::default()
        }
    }

    /// Pin a window, accounting its Arrow buffers against the memory limit.
    pub fn pin(&mut self, batch: RecordBatch) -> Result<SourceId, AllocationError> {
        self.insert(batch, None)
    }

    /// Pin a window together with its keys in row format.
    pub fn pin_keyed(
        &mut self,
        batch: RecordBatch,
        keys: Rows,
    ) -> Result<SourceId, AllocationError> {
        self.insert(batch, Some(keys))
    }

    fn insert(
        &mut self,
        batch: RecordBatch,
        keys: Option<Rows>,
    ) -> Result<SourceId, AllocationError> {
        let bytes = window_bytes(&batch) + keys.as_ref().map_or(0, Rows::size);
        if let Some(limit) = self.memory_limit {
            if self.in_use + bytes > limit {
                return Err(AllocationError::MemoryLimitExceeded {
                    in_use: self.in_use,
                    requested: bytes,
                    limit,
                });
            }
        }

        self.in_use += bytes;
        self.peak = self.peak.max(self.in_use);
        let window = Window {
            batch,
            keys,
            bytes,
            live: false,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(window);
                idx
            }
            None => {
                self.slots.push(Some(window));
                self.slots.len() - 1
            }
        };
        Ok(SourceId(idx))
    }

    fn window(&self, id: SourceId) -> &Window {
        match &self.slots[id.0] {
            Some(window) => window,
            None => panic!("source window {} was released while still referenced", id.0),
        }
    }

    /// Window behind a handle.
    ///
    /// # Panics
    ///
    /// Panics if the window was already swept.
    pub fn get(&self, id: SourceId) -> &RecordBatch {
        &self.window(id).batch
    }

    /// Keys pinned with a window, if any.
    ///
    /// # Panics
    ///
    /// Panics if the window was already swept.
    pub fn keys(&self, id: SourceId) -> Option<&Rows> {
        self.window(id).keys.as_ref()
    }

    /// Drop every window not listed in `retain`.
    pub fn sweep<I>(&mut self, retain: I)
    where
        I: IntoIterator<Item = SourceId>,
    {
        for id in retain {
            if let Some(window) = self.slots[id.0].as_mut() {
                window.live = true;
            }
        }
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let keep = match slot {
                Some(window) if window.live => {
                    window.live = false;
                    true
                }
                Some(_) => false,
                None => continue,
            };
            if !keep {
                if let Some(window) = slot.take() {
                    self.in_use -= window.bytes;
                }
                self.free.push(idx);
            }
        }
    }

    /// Drop every window.
    pub fn release(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.in_use = 0;
    }

    /// Bytes currently held.
    pub fn bytes_in_use(&self) -> usize {
        self.in_use
    }

    /// Largest number of bytes held at once.
    pub fn peak_bytes(&self) -> usize {
        self.peak
    }

    /// Number of windows currently held.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether the arena holds no window.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
