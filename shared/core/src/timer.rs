//! Millisecond tick timer driven by the host clock loop. Mirrors the
//! engines' cooperative model: nothing fires asynchronously, expiry is
//! observed on the next `clock` call.

#[derive(Clone, Debug, Default)]
pub struct Timer {
    ticks_per_sec: u32,
    timeout_ticks: u64,
    timer_ticks: u64,
    running: bool,
}

impl Timer {
    /// `ticks_per_sec` is the clock granularity (1000 for millisecond
    /// ticks); `secs` the initial timeout.
    pub fn new(ticks_per_sec: u32, secs: u32) -> Self {
        let mut t = Self {
            ticks_per_sec,
            timeout_ticks: 0,
            timer_ticks: 0,
            running: false,
        };
        t.set_timeout(secs, 0);
        t
    }

    pub fn set_timeout(&mut self, secs: u32, msecs: u32) {
        self.timeout_ticks =
            u64::from(secs) * u64::from(self.ticks_per_sec) + u64::from(msecs) * u64::from(self.ticks_per_sec) / 1000;
    }

    pub fn start(&mut self) {
        if self.timeout_ticks > 0 {
            self.timer_ticks = 0;
            self.running = true;
        }
    }

    pub fn start_with(&mut self, secs: u32) {
        self.set_timeout(secs, 0);
        self.start();
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.timer_ticks = 0;
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    pub fn resume(&mut self) {
        self.running = true;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn clock(&mut self, ticks: u32) {
        if self.running && self.timeout_ticks > 0 {
            self.timer_ticks += u64::from(ticks);
        }
    }

    pub fn has_expired(&self) -> bool {
        self.timeout_ticks > 0 && self.timer_ticks >= self.timeout_ticks
    }

    /// Elapsed time in units of the tick rate (seconds for 1000 t/s).
    pub fn time_taken(&self) -> u64 {
        self.timer_ticks / u64::from(self.ticks_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_timeout() {
        let mut t = Timer::new(1000, 2);
        t.start();
        t.clock(1999);
        assert!(!t.has_expired());
        t.clock(1);
        assert!(t.has_expired());
    }

    #[test]
    fn stopped_timer_does_not_advance() {
        let mut t = Timer::new(1000, 1);
        t.start();
        t.stop();
        t.clock(5000);
        assert!(!t.has_expired());
    }

    #[test]
    fn zero_timeout_never_expires() {
        let mut t = Timer::new(1000, 0);
        t.start();
        t.clock(10_000);
        assert!(!t.has_expired());
        assert!(!t.is_running());
    }
}
