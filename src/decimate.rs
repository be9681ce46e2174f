//! Frame decimation.

/// Countdown deciding which frames go through inference.
///
/// With interval `n`, one frame runs inference and the next `n` are skipped.
/// An interval of 0 processes every frame. A fresh decimator fires on the
/// first frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameDecimator {
    interval: u32,
    counter: u32,
}

impl FrameDecimator {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            counter: 0,
        }
    }

    /// Change the interval on a running decimator. The countdown restarts at
    /// the new interval, so the next firing is `interval + 1` frames away.
    pub fn reconfigure(&mut self, interval: u32) {
        self.interval = interval;
        self.counter = interval;
    }

    pub fn should_process(&mut self) -> bool {
        if self.counter > 0 {
            self.counter -= 1;
            false
        } else {
            self.counter = self.interval;
            true
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }
}
