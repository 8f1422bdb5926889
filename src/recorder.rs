use std::time::Instant;

/// Wall clock timer used to report phase durations in the logs.
///
/// Timings never influence control flow.
#[derive(Clone, Copy, Debug)]
pub struct Recorder {
    start: Instant,
}

impl Default for Recorder {
    #[inline]
    fn default() -> Self {
        Self::start()
    }
}

impl Recorder {
    /// Starts a new timer.
    #[inline]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the timer was started.
    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}
