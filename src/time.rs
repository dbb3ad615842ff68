use std::thread;
use std::time::{Duration, Instant};

/// Fixed-rate clock for the host tick loop.
pub struct TickClock {
    start: Instant,
    last: Instant,
    interval: Duration,
    ticks: u64,
    pub delta: Duration,
}

impl TickClock {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self { start: now, last: now, interval, ticks: 0, delta: Duration::ZERO }
    }

    /// Sleeps out the rest of the current interval, then advances.
    pub fn wait_next(&mut self) {
        let target = self.last + self.interval;
        let now = Instant::now();
        if target > now {
            thread::sleep(target - now);
        }
        self.tick();
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last;
        self.last = now;
        self.ticks += 1;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.last.duration_since(self.start).as_secs_f32()
    }
}
