//! Growable buffers used by the kernels.
//!
//! All three grow by doubling through `try_reserve`, so exhausting memory shows up
//! as [`Error::AllocationFailed`] instead of an abort or a truncated list.

use crate::error::{Error, Result};

const MIN_CAPACITY: usize = 16;

fn grow_for_push<T>(buf: &mut Vec<T>, what: &'static str) -> Result<()> {
    if buf.len() == buf.capacity() {
        let extra = buf.capacity().max(MIN_CAPACITY);
        buf.try_reserve(extra).map_err(Error::allocation(what, extra))?;
    }
    Ok(())
}

/// FIFO frontier for the BFS expansion.
///
/// Popped slots are not released; the storage is reused once the queue drains.
#[derive(Debug, Clone, Default)]
pub struct Queue<T> {
    buf: Vec<T>,
    head: usize,
}

impl<T: Copy> Queue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            head: 0,
        }
    }

    /// Append to the back.
    pub fn push(&mut self, value: T) -> Result<()> {
        if self.head == self.buf.len() {
            self.buf.clear();
            self.head = 0;
        }
        grow_for_push(&mut self.buf, "bfs queue")?;
        self.buf.push(value);
        Ok(())
    }

    /// Remove from the front.
    pub fn pop(&mut self) -> Option<T> {
        let value = self.buf.get(self.head).copied()?;
        self.head += 1;
        Some(value)
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.head == self.buf.len()
    }

    /// Number of queued values.
    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }
}

/// Append-only array, used to collect a block's outgoing queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector<T> {
    buf: Vec<T>,
}

impl<T> Default for Vector<T> {
    fn default() -> Self {
        Self { buf: Vec::new() }
    }
}

impl<T> Vector<T> {
    /// Create an empty vector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value.
    pub fn push(&mut self, value: T) -> Result<()> {
        grow_for_push(&mut self.buf, "query vector")?;
        self.buf.push(value);
        Ok(())
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// View the contents.
    pub fn as_slice(&self) -> &[T] {
        &self.buf
    }

    /// Take the contents.
    pub fn into_vec(self) -> Vec<T> {
        self.buf
    }
}

/// Neighbor indices of one observation plus their total weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighborhood<T> {
    indices: Vec<usize>,
    weight: T,
}

impl<T: num_traits::Float> Default for Neighborhood<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: num_traits::Float> Neighborhood<T> {
    /// Create an empty neighborhood.
    pub fn new() -> Self {
        Self {
            indices: Vec::new(),
            weight: T::zero(),
        }
    }

    /// Append a neighbor, growing the buffer if needed.
    pub fn add(&mut self, index: usize, weight: T) -> Result<()> {
        grow_for_push(&mut self.indices, "neighborhood")?;
        self.indices.push(index);
        self.weight = self.weight + weight;
        Ok(())
    }

    /// Reserve room for `count` more neighbors so [`fast_add`](Self::fast_add)
    /// can append them without growing.
    pub fn allocate_new_entries(&mut self, count: usize) -> Result<()> {
        self.indices
            .try_reserve(count)
            .map_err(Error::allocation("neighborhood", count))
    }

    /// Append a neighbor into already reserved capacity.
    #[inline]
    pub fn fast_add(&mut self, index: usize, weight: T) {
        debug_assert!(self.indices.len() < self.indices.capacity());
        self.indices.push(index);
        self.weight = self.weight + weight;
    }

    /// Move all neighbors of `other` to the end of `self`.
    pub fn append(&mut self, other: &Neighborhood<T>) -> Result<()> {
        self.allocate_new_entries(other.indices.len())?;
        self.indices.extend_from_slice(&other.indices);
        self.weight = self.weight + other.weight;
        Ok(())
    }

    pub(crate) fn sort_indices(&mut self) {
        self.indices.sort_unstable();
    }

    /// Forget all neighbors, keeping the allocation.
    pub fn clear(&mut self) {
        self.indices.clear();
        self.weight = T::zero();
    }

    /// Neighbor indices in discovery order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Sum of neighbor weights.
    pub fn weight(&self) -> T {
        self.weight
    }

    /// Number of neighbors.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True when there are no neighbors.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
