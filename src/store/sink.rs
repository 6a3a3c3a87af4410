//! Read Delivery Sinks
//!
//! Batched reads complete through a caller-supplied sink rather than a
//! return value: zero or more partial batches, then exactly one terminal
//! signal. Callers choose the delivery mode explicitly when they build the
//! sink, so the store never has to inspect types to discover a capability.

use std::sync::Arc;

use crate::error::Error;

/// Terminal-only consumer of a batched read.
///
/// Exactly one of `on_success`/`on_failure` is invoked per logical call,
/// and only after every partial delivery has been accounted for.
pub trait Completion<T>: Send + Sync {
    /// The call finished; `results` holds everything not already streamed.
    fn on_success(&self, results: Vec<T>);

    /// The call failed. No further signals follow.
    fn on_failure(&self, error: Error);
}

/// Consumer that additionally accepts incremental batches.
///
/// `on_partial` may be invoked zero or more times before the terminal
/// signal, possibly from multiple concurrent delivery threads and in no
/// particular key order.
pub trait StreamingCompletion<T>: Completion<T> {
    /// A batch of results arrived. More may follow.
    fn on_partial(&self, batch: Vec<T>);
}

/// How a caller wants read results delivered.
///
/// With [`ReadSink::Buffered`] everything is accumulated and handed over in
/// the single terminal call. With [`ReadSink::Streaming`] batches are
/// forwarded as they arrive and the terminal `on_success` carries only what
/// was never streamed (in practice, nothing).
pub enum ReadSink<T> {
    /// Accumulate everything; deliver once.
    Buffered(Arc<dyn Completion<T>>),
    /// Forward batches as they arrive, then signal completion.
    Streaming(Arc<dyn StreamingCompletion<T>>),
}

impl<T> ReadSink<T> {
    /// Build a buffered sink.
    pub fn buffered(completion: Arc<dyn Completion<T>>) -> Self {
        ReadSink::Buffered(completion)
    }

    /// Build a streaming sink.
    pub fn streaming(completion: Arc<dyn StreamingCompletion<T>>) -> Self {
        ReadSink::Streaming(completion)
    }

    /// Whether partial batches should be forwarded instead of accumulated.
    #[inline]
    pub fn is_streaming(&self) -> bool {
        matches!(self, ReadSink::Streaming(_))
    }

    /// Forward a batch to a streaming sink. No-op for buffered sinks; the
    /// caller accumulates for those instead.
    pub fn forward(&self, batch: Vec<T>) {
        if let ReadSink::Streaming(sink) = self {
            sink.on_partial(batch);
        }
    }

    /// Deliver the terminal success signal.
    pub fn succeed(&self, results: Vec<T>) {
        match self {
            ReadSink::Buffered(sink) => sink.on_success(results),
            ReadSink::Streaming(sink) => sink.on_success(results),
        }
    }

    /// Deliver the terminal failure signal.
    pub fn fail(&self, error: Error) {
        match self {
            ReadSink::Buffered(sink) => sink.on_failure(error),
            ReadSink::Streaming(sink) => sink.on_failure(error),
        }
    }
}

impl<T> Clone for ReadSink<T> {
    fn clone(&self) -> Self {
        match self {
            ReadSink::Buffered(sink) => ReadSink::Buffered(Arc::clone(sink)),
            ReadSink::Streaming(sink) => ReadSink::Streaming(Arc::clone(sink)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        partials: Mutex<Vec<Vec<u32>>>,
        finished: Mutex<Option<Vec<u32>>>,
    }

    impl Completion<u32> for Recorder {
        fn on_success(&self, results: Vec<u32>) {
            *self.finished.lock() = Some(results);
        }

        fn on_failure(&self, _error: Error) {}
    }

    impl StreamingCompletion<u32> for Recorder {
        fn on_partial(&self, batch: Vec<u32>) {
            self.partials.lock().push(batch);
        }
    }

    #[test]
    fn test_buffered_ignores_forward() {
        let recorder = Arc::new(Recorder::default());
        let sink: ReadSink<u32> = ReadSink::buffered(recorder.clone());

        assert!(!sink.is_streaming());
        sink.forward(vec![1, 2]);
        sink.succeed(vec![3]);

        assert!(recorder.partials.lock().is_empty());
        assert_eq!(recorder.finished.lock().as_deref(), Some(&[3][..]));
    }

    #[test]
    fn test_streaming_forwards_batches() {
        let recorder = Arc::new(Recorder::default());
        let sink: ReadSink<u32> = ReadSink::streaming(recorder.clone());

        assert!(sink.is_streaming());
        sink.forward(vec![1]);
        sink.forward(vec![2]);
        sink.succeed(Vec::new());

        assert_eq!(*recorder.partials.lock(), vec![vec![1], vec![2]]);
        assert_eq!(recorder.finished.lock().as_deref(), Some(&[][..]));
    }
}
