/// Bounded buffer of items committed together.
///
/// A chunk never holds more than `size` items. [`Chunk::drain`] is the only
/// way to empty it, so every buffered item is handed to the writer exactly once.
#[derive(Debug)]
pub struct Chunk<T> {
    items: Vec<T>,
    size: usize,
}

impl<T> Chunk<T> {
    pub fn new(size: usize) -> Chunk<T> {
        Chunk {
            items: Vec::with_capacity(size),
            size,
        }
    }

    /// Buffers an item, handing it back when the chunk is already full.
    pub fn add(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push(item);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.size
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the buffered items in insertion order and resets the chunk.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.items, Vec::with_capacity(self.size))
    }
}
