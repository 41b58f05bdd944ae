//! Barge-in: the student started talking while the mentor was speaking.

use tracing::debug;

use super::{PlaybackOutput, PlaybackScheduler};

impl<O: PlaybackOutput> PlaybackScheduler<O> {
    /// Stop everything scheduled or playing, clear the active set and reset
    /// the playback clock to zero.
    ///
    /// Safe to call with nothing active: only the clock reset happens.
    /// Returns the number of buffers that were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.stop_all();
        self.clock = 0.0;
        debug!(stopped, "playback interrupted; clock reset");
        stopped
    }
}
