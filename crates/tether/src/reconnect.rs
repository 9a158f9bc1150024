//! Reconnect supervisor: a fixed-delay retry timer.
//!
//! There is no background task. The engine arms the timer when the
//! connection drops unexpectedly and checks it at the top of every
//! `poll()`; at most one attempt is made per delay.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    delay: Duration,
    next_attempt: Option<Instant>,
    attempts: u32,
}

impl ReconnectSupervisor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_attempt: None,
            attempts: 0,
        }
    }

    /// Arms the timer to fire one delay after `now`.
    pub fn schedule(&mut self, now: Instant) {
        self.next_attempt = Some(now + self.delay);
    }

    /// Cancels any pending attempt.
    pub fn disarm(&mut self) {
        self.next_attempt = None;
    }

    /// Consumes the pending attempt if it is due at `now`.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.next_attempt {
            Some(at) if now >= at => {
                self.next_attempt = None;
                self.attempts += 1;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.next_attempt.is_some()
    }

    /// Attempts since the last successful authentication.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called once authentication succeeds.
    pub fn reset(&mut self) {
        self.next_attempt = None;
        self.attempts = 0;
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}
