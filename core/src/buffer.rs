/// Scratch buffer shared between pipeline stages.
///
/// `len` is the logical fill and `offset` the read position, so the unread
/// region is `offset..len`. Capacity only ever grows; the backing `Vec` aborts
/// on allocation failure, so a stage never continues with a short buffer.
#[derive(Debug, Clone)]
pub struct StagedBuffer<T> {
    data: Vec<T>,
    len: usize,
    offset: usize,
}

impl<T: Copy + Default> StagedBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity],
            len: 0,
            offset: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Items written but not yet consumed
    pub fn unread(&self) -> usize {
        self.len - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.unread() == 0
    }

    /// Grow so at least `needed` items fit; never shrinks
    pub fn reserve(&mut self, needed: usize) {
        if needed > self.data.len() {
            self.data.resize(needed, T::default());
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.offset = 0;
    }

    /// Reset and hand out the first `count` slots for writing
    pub fn fill(&mut self, count: usize) -> &mut [T] {
        self.reserve(count);
        self.len = count;
        self.offset = 0;
        &mut self.data[..count]
    }

    /// Shorten the logical fill after a producer wrote fewer items than it was given
    pub fn truncate(&mut self, len: usize) {
        self.len = len.min(self.len);
        self.offset = self.offset.min(self.len);
    }

    pub fn pending(&self) -> &[T] {
        &self.data[self.offset..self.len]
    }

    /// Mark `count` unread items as delivered
    pub fn consume(&mut self, count: usize) {
        debug_assert!(count <= self.unread());
        self.offset += count.min(self.unread());
        if self.offset == self.len {
            self.clear();
        }
    }
}
