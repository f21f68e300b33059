use crate::vec::fixed;
use crate::{CLOCK_START_SECS, CLOCK_STEP_SECS};

#[derive(Debug, Clone)]
pub struct Clock {
    seconds: f64,
    carry: f64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            seconds: CLOCK_START_SECS,
            carry: 0.0,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn advance(&mut self, dt: f64) {
        self.carry += dt;
        while self.carry >= CLOCK_STEP_SECS {
            self.carry -= CLOCK_STEP_SECS;
            self.seconds = fixed(self.seconds + CLOCK_STEP_SECS, 3);
        }
    }

    pub fn set(&mut self, seconds: f64) {
        self.seconds = seconds;
        self.carry = 0.0;
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
