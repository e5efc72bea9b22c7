//! Reusable scratch buffers for the render path.
//!
//! Buffers are handed out as [`PooledBuffer`] guards and go back to the pool
//! when the guard drops, so every exit path returns them. Once the pool has
//! warmed up to the largest block size nothing here allocates.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

pub struct BufferPool {
    buffers: Mutex<Vec<Vec<f32>>>,
}

impl BufferPool {
    /// Pre-allocates `count` buffers of `len` samples.
    pub fn new(count: usize, len: usize) -> Self {
        let buffers = (0..count).map(|_| Vec::with_capacity(len)).collect();
        Self {
            buffers: Mutex::new(buffers),
        }
    }

    /// Zeroed buffer of exactly `len` samples.
    pub fn acquire(&self, len: usize) -> PooledBuffer<'_> {
        let mut buffer = self.buffers.lock().pop().unwrap_or_default();
        buffer.clear();
        buffer.resize(len, 0.0);
        PooledBuffer { pool: self, buffer }
    }

    pub fn available(&self) -> usize {
        self.buffers.lock().len()
    }
}

pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Vec<f32>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.buffers.lock().push(buffer);
    }
}
