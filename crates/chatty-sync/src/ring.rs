use std::sync::Mutex;

/// Bounded history buffer with overwrite-oldest semantics.
///
/// `push` never blocks: once the buffer holds `capacity` elements, the oldest
/// one is replaced and handed back to the caller so its payload can be
/// released. `snapshot` copies the current contents in insertion order under
/// the same lock, so a reader always observes a consistent prefix of the
/// history.
#[derive(Debug)]
pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

#[derive(Debug)]
struct Inner<T> {
    data: Vec<T>,
    // Slot that the next push fills; once `data` is full this is also the
    // index of the oldest element.
    pos: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// Capacity is fixed for the lifetime of the buffer and must be nonzero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be nonzero");
        Self {
            inner: Mutex::new(Inner { data: Vec::with_capacity(capacity), pos: 0 }),
            capacity,
        }
    }

    /// Appends `elem`, returning the evicted element when the buffer was
    /// already full.
    pub fn push(&self, elem: T) -> Option<T> {
        let mut inner = self.inner.lock().expect("ring buffer lock poisoned");
        if inner.data.len() < self.capacity {
            inner.data.push(elem);
            inner.pos = (inner.pos + 1) % self.capacity;
            None
        } else {
            let pos = inner.pos;
            let old = std::mem::replace(&mut inner.data[pos], elem);
            inner.pos = (pos + 1) % self.capacity;
            Some(old)
        }
    }

    /// Copies the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        let inner = self.inner.lock().expect("ring buffer lock poisoned");
        if inner.data.len() < self.capacity {
            inner.data.clone()
        } else {
            let mut out = Vec::with_capacity(self.capacity);
            out.extend_from_slice(&inner.data[inner.pos..]);
            out.extend_from_slice(&inner.data[..inner.pos]);
            out
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("ring buffer lock poisoned").data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
