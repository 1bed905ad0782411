//! Result accumulator

use parking_lot::Mutex;

/// Thread-safe, append-only collection of results
#[derive(Debug)]
pub struct ResultSink<T> {
    results: Mutex<Vec<T>>,
}

impl<T> Default for ResultSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResultSink<T> {
    /// Create an empty sink
    pub fn new() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
        }
    }

    /// Create an empty sink sized for `capacity` results
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append a result
    pub fn add(&self, result: T) {
        self.results.lock().push(result);
    }

    /// Number of results recorded so far
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    /// Whether no result has been recorded
    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Consume the sink, returning every recorded result
    pub fn into_inner(self) -> Vec<T> {
        self.results.into_inner()
    }
}

impl<T: Clone> ResultSink<T> {
    /// Copy of the results recorded so far
    pub fn snapshot(&self) -> Vec<T> {
        self.results.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_snapshot_keeps_duplicates() {
        let sink = ResultSink::new();
        sink.add(true);
        sink.add(true);
        sink.add(false);

        assert_eq!(sink.snapshot(), vec![true, true, false]);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_concurrent_adds() {
        let sink = Arc::new(ResultSink::with_capacity(400));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        sink.add(w * 100 + i);
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let mut results = Arc::try_unwrap(sink).unwrap().into_inner();
        results.sort_unstable();
        assert_eq!(results, (0..400).collect::<Vec<_>>());
    }

    #[test]
    fn test_snapshot_does_not_drain() {
        let sink = ResultSink::new();
        sink.add(1);
        let _ = sink.snapshot();
        sink.add(2);
        assert_eq!(sink.snapshot(), vec![1, 2]);
        assert!(!sink.is_empty());
    }
}
