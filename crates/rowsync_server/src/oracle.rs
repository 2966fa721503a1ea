//! The sync timestamp oracle.

use std::sync::Arc;

use parking_lot::Mutex;
use rowsync_protocol::Timestamp;
use rowsync_store::Clock;

/// Issues monotonically increasing session timestamps.
///
/// Timestamps follow the wall clock but never repeat or go backwards,
/// even when the clock does or when two sessions start within the same
/// millisecond. The issued value is the authoritative version number
/// stamped onto every row the session touches.
pub struct TimestampOracle {
    clock: Arc<dyn Clock>,
    last: Mutex<Timestamp>,
}

impl TimestampOracle {
    /// Creates an oracle over a clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(0),
        }
    }

    /// Issues the next timestamp.
    pub fn next(&self) -> Timestamp {
        let mut last = self.last.lock();
        let ts = self.clock.now().max(*last + 1);
        *last = ts;
        ts
    }
}
