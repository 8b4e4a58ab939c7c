//! Lock-free SPSC ring buffer for captured audio.
//!
//! Samples are stored interleaved, exactly as the process callback writes
//! them. Wait-free for both producer and consumer; the producer side must
//! never block or allocate.

use std::sync::atomic::{AtomicUsize, Ordering};

use rt_core::Sample;

/// Cache-line padded to avoid false sharing between the RT producer and
/// the consumer thread's read/write positions.
#[repr(align(64))]
pub struct RingBuffer {
    buffer: Box<[Sample]>,
    capacity: usize,
    mask: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

impl RingBuffer {
    /// `min_capacity` is rounded up to the next power of two.
    pub fn new(min_capacity: usize) -> Self {
        let capacity = min_capacity.max(1).next_power_of_two();
        Self {
            buffer: vec![0.0; capacity].into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn available_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        self.capacity - write.wrapping_sub(read)
    }

    #[inline]
    pub fn available_read(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Relaxed);
        write.wrapping_sub(read)
    }

    /// Producer side (RT thread). Returns the number of samples actually
    /// written; excess input is dropped rather than blocking.
    #[inline]
    pub fn push(&self, samples: &[Sample]) -> usize {
        let to_write = samples.len().min(self.available_write());
        if to_write == 0 {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        for (i, &sample) in samples[..to_write].iter().enumerate() {
            let idx = write.wrapping_add(i) & self.mask;
            // SAFETY: sole producer, idx always within buffer bounds.
            unsafe {
                (self.buffer.as_ptr() as *mut Sample).add(idx).write(sample);
            }
        }
        self.write_pos.store(write.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Consumer side. Returns the number of samples actually read.
    #[inline]
    pub fn pop(&self, output: &mut [Sample]) -> usize {
        let to_read = output.len().min(self.available_read());
        if to_read == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Relaxed);
        for (i, sample) in output[..to_read].iter_mut().enumerate() {
            let idx = read.wrapping_add(i) & self.mask;
            *sample = self.buffer[idx];
        }
        self.read_pos.store(read.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    pub fn is_full(&self) -> bool {
        self.available_write() == 0
    }
}

/// Sizes the buffer to at least `max(sample_rate / 10, buffer_size)` frames,
/// converted to interleaved sample capacity.
pub fn sized_for(sample_rate: u32, buffer_size: u32, channels: usize) -> RingBuffer {
    let frames = (sample_rate / 10).max(buffer_size) as usize;
    RingBuffer::new(frames.max(1) * channels.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_roundtrips() {
        let rb = RingBuffer::new(8);
        let samples = [1.0_f32, 2.0, 3.0, 4.0];
        assert_eq!(rb.push(&samples), 4);
        assert_eq!(rb.available_read(), 4);

        let mut out = [0.0_f32; 4];
        assert_eq!(rb.pop(&mut out), 4);
        assert_eq!(out, samples);
        assert!(rb.is_empty());
    }

    #[test]
    fn push_beyond_capacity_drops_excess_without_blocking() {
        let rb = RingBuffer::new(4);
        let samples = [1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(rb.push(&samples), 4);
        assert!(rb.is_full());
    }

    #[test]
    fn wraps_around_the_capacity_boundary() {
        let rb = RingBuffer::new(4);
        rb.push(&[1.0, 2.0, 3.0, 4.0]);

        let mut first = [0.0_f32; 2];
        rb.pop(&mut first);

        rb.push(&[5.0, 6.0]);

        let mut rest = [0.0_f32; 4];
        let read = rb.pop(&mut rest);
        assert_eq!(read, 4);
        assert_eq!(rest, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn sized_for_honors_the_minimum_of_rate_over_ten_and_buffer_size() {
        let rb = sized_for(48_000, 1024, 2);
        // max(4800, 1024) = 4800 frames * 2 channels = 9600, rounded up.
        assert_eq!(rb.capacity(), 16_384);
    }

    #[test]
    fn available_read_strictly_decreases_by_at_least_requested_after_pop() {
        let rb = RingBuffer::new(16);
        rb.push(&[1.0; 10]);
        let before = rb.available_read();
        let mut out = [0.0_f32; 4];
        rb.pop(&mut out);
        assert!(rb.available_read() <= before - 4);
    }
}
