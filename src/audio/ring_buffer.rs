//! Lock-free SPSC ring buffer for captured samples.
//!
//! Backed by the `ringbuf` crate: the producer half lives in the cpal
//! input callback, the consumer half is drained once on session stop.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Default capacity: two minutes of 16 kHz mono audio, enough for any
/// reasonable utterance. If a recording runs longer, the newest samples
/// are dropped rather than blocking the audio callback.
const DEFAULT_CAPACITY: usize = 16_000 * 120;

/// Producer half, fed by the cpal audio callback.
pub struct SampleProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Consumer half, drained by the capture worker when the session stops.
pub struct SampleConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a matched producer/consumer pair.
pub fn sample_ring_buffer(capacity: Option<usize>) -> (SampleProducer, SampleConsumer) {
    let rb = HeapRb::<f32>::new(capacity.unwrap_or(DEFAULT_CAPACITY));
    let (prod, cons) = rb.split();
    (
        SampleProducer { inner: prod },
        SampleConsumer { inner: cons },
    )
}

impl SampleProducer {
    /// Push a slice of samples. Returns how many were actually written
    /// (less than `samples.len()` when the buffer is full).
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

// The ringbuf producer is single-threaded by design; the cpal callback
// runs on one dedicated audio thread.
unsafe impl Send for SampleProducer {}

impl SampleConsumer {
    /// Number of samples currently buffered.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Drain every buffered sample into a Vec.
    pub fn drain_all(&mut self) -> Vec<f32> {
        let n = self.available();
        if n == 0 {
            return Vec::new();
        }
        let mut buf = vec![0.0f32; n];
        let read = self.inner.pop_slice(&mut buf);
        buf.truncate(read);
        buf
    }
}

unsafe impl Send for SampleConsumer {}
