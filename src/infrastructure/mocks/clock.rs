//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, enabling deterministic
/// testing of windows, TTLs and breaker recovery timeouts.
///
/// # Examples
///
/// ```
/// use route_guard::infrastructure::mocks::MockClock;
/// use route_guard::Clock;
/// use std::time::{Duration, UNIX_EPOCH};
///
/// let clock = MockClock::at_unix_secs(1_000);
/// assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(1_000));
///
/// // Advance time explicitly
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(1_010));
/// ```
///
/// # Thread Safety
///
/// `MockClock` is thread-safe and can be cloned to share across threads.
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<SystemTime>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific time.
    pub fn new(start: SystemTime) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a mock clock at a whole number of seconds after the Unix epoch.
    ///
    /// Window-aligned starting points keep fixed-window tests readable.
    pub fn at_unix_secs(secs: u64) -> Self {
        Self::new(UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut time = self
            .current_time
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *time += duration;
    }

    /// Set the clock to a specific time.
    pub fn set(&self, time: SystemTime) {
        let mut current = self
            .current_time
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        *current = time;
    }
}

impl Clock for MockClock {
    fn now(&self) -> SystemTime {
        *self
            .current_time
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}
