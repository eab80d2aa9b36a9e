//! Bounded sample buffer for one capture session.
//!
//! Unlike a circular buffer, [`CaptureBuffer`] never discards audio: once
//! the capacity is reached further samples are dropped and the overflow is
//! *recorded*, so `stop_capture` can fail the session with a `Process`
//! classification instead of silently truncating the recording.
//!
//! # Example
//!
//! ```rust
//! use voice_pipeline::audio::CaptureBuffer;
//!
//! let mut buf = CaptureBuffer::new(4);
//! buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]); // 5 items → capacity 4
//! assert!(buf.overflowed());
//! assert_eq!(buf.take(), vec![1.0, 2.0, 3.0, 4.0]);
//! ```

// ---------------------------------------------------------------------------
// CaptureBuffer
// ---------------------------------------------------------------------------

/// A grow-once buffer with a hard sample cap.
pub struct CaptureBuffer {
    samples: Vec<f32>,
    capacity: usize,
    overflowed: bool,
}

impl CaptureBuffer {
    /// Create a new buffer capped at `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "CaptureBuffer capacity must be > 0");
        Self {
            samples: Vec::new(),
            capacity,
            overflowed: false,
        }
    }

    /// Append `data`, keeping at most `capacity` samples in total.
    ///
    /// Samples beyond the cap are dropped and the overflow flag is set; the
    /// head of the recording is always preserved.
    pub fn push_slice(&mut self, data: &[f32]) {
        let room = self.capacity - self.samples.len();
        if data.len() > room {
            self.overflowed = true;
        }
        let take = data.len().min(room);
        self.samples.extend_from_slice(&data[..take]);
    }

    /// Remove and return all stored samples, resetting the buffer.
    pub fn take(&mut self) -> Vec<f32> {
        self.overflowed = false;
        std::mem::take(&mut self.samples)
    }

    /// Discard all samples and clear the overflow flag.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.overflowed = false;
    }

    /// Whether samples were dropped because the cap was reached.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Number of samples currently stored.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples the buffer will hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current recording duration in seconds, assuming `sample_rate` Hz mono.
    pub fn duration_secs(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / sample_rate as f32
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Basic push / take -------------------------------------------------

    #[test]
    fn push_and_take_within_capacity() {
        let mut buf = CaptureBuffer::new(8);
        buf.push_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(buf.len(), 3);
        assert!(!buf.overflowed());

        let data = buf.take();
        assert_eq!(data, vec![1.0, 2.0, 3.0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn push_exactly_capacity_does_not_overflow() {
        let mut buf = CaptureBuffer::new(4);
        buf.push_slice(&[1.0, 2.0, 3.0, 4.0]);
        assert!(!buf.overflowed());
        assert_eq!(buf.take(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    // ---- Overflow behaviour ------------------------------------------------

    #[test]
    fn overflow_keeps_head_and_sets_flag() {
        let mut buf = CaptureBuffer::new(4);
        buf.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);

        assert!(buf.overflowed());
        assert_eq!(buf.len(), 4);
        // The head of the recording survives; the tail is dropped.
        assert_eq!(buf.take(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn overflow_across_multiple_pushes() {
        let mut buf = CaptureBuffer::new(3);
        buf.push_slice(&[1.0, 2.0]);
        assert!(!buf.overflowed());
        buf.push_slice(&[3.0, 4.0]);
        assert!(buf.overflowed());
        assert_eq!(buf.take(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn push_into_full_buffer_is_dropped() {
        let mut buf = CaptureBuffer::new(2);
        buf.push_slice(&[1.0, 2.0]);
        buf.push_slice(&[3.0]);
        assert!(buf.overflowed());
        assert_eq!(buf.len(), 2);
    }

    // ---- Reset semantics ---------------------------------------------------

    #[test]
    fn take_clears_overflow_flag() {
        let mut buf = CaptureBuffer::new(2);
        buf.push_slice(&[1.0, 2.0, 3.0]);
        assert!(buf.overflowed());

        let _ = buf.take();
        assert!(!buf.overflowed());
        assert!(buf.is_empty());
    }

    #[test]
    fn clear_resets_state() {
        let mut buf = CaptureBuffer::new(2);
        buf.push_slice(&[1.0, 2.0, 3.0]);
        buf.clear();

        assert!(buf.is_empty());
        assert!(!buf.overflowed());

        // Usable again after clear
        buf.push_slice(&[9.0]);
        assert_eq!(buf.take(), vec![9.0]);
    }

    #[test]
    fn take_empty_returns_empty_vec() {
        let mut buf = CaptureBuffer::new(4);
        assert_eq!(buf.take(), Vec::<f32>::new());
    }

    // ---- Capacity / duration helpers ---------------------------------------

    #[test]
    fn capacity_reported_correctly() {
        let buf = CaptureBuffer::new(1024);
        assert_eq!(buf.capacity(), 1024);
    }

    #[test]
    fn duration_secs_calculation() {
        let mut buf = CaptureBuffer::new(16_000);
        buf.push_slice(&vec![0.0; 8_000]);
        // 8000 samples at 16kHz = 0.5 seconds
        assert!((buf.duration_secs(16_000) - 0.5).abs() < 1e-6);
    }

    // ---- Panic guard -------------------------------------------------------

    #[test]
    #[should_panic(expected = "CaptureBuffer capacity must be > 0")]
    fn zero_capacity_panics() {
        let _buf = CaptureBuffer::new(0);
    }
}
