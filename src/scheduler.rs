//! Fixed-period measurement polling.
//!
//! The scheduler only decides *when* a poll is due; the caller performs it. At most one
//! poll is outstanding: between [`PollScheduler::take_due`] and
//! [`PollScheduler::complete`] no further poll is handed out, and periods that elapse
//! while a poll is running are dropped rather than queued.

use std::time::{Duration, Instant};

use log::debug;

#[derive(Debug, Clone)]
pub struct PollScheduler {
    period: Duration,
    next_due: Instant,
    paused: bool,
    in_flight: bool,
    skipped: u64,
}

impl PollScheduler {
    /// Creates a running scheduler whose first poll is due one `period` after `now`.
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_due: now + period,
            paused: false,
            in_flight: false,
            skipped: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Number of periods dropped because a poll overran them.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn pause(&mut self) {
        if !self.paused {
            debug!("Measurement polling paused");
        }
        self.paused = true;
    }

    /// Resumes polling with a poll due immediately.
    pub fn resume(&mut self, now: Instant) {
        if self.paused {
            debug!("Measurement polling resumed");
        }
        self.paused = false;
        self.next_due = now;
    }

    /// Returns `true`, and marks a poll outstanding, if one should start now.
    pub fn take_due(&mut self, now: Instant) -> bool {
        if self.paused || self.in_flight || now < self.next_due {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Records that the outstanding poll finished at `now`.
    pub fn complete(&mut self, now: Instant) {
        self.in_flight = false;
        let overdue = now.saturating_duration_since(self.next_due);
        let missed = (overdue.as_nanos() / self.period.as_nanos().max(1)) as u64;
        if missed > 0 {
            debug!("Poll overran {} period(s); skipping them", missed);
            self.skipped += missed;
        }
        self.next_due = now + self.period;
    }

    /// How long the caller may wait for input before the next poll is due. `None` while
    /// paused or while a poll is outstanding.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        if self.paused || self.in_flight {
            None
        } else {
            Some(self.next_due.saturating_duration_since(now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_millis(500);

    #[test]
    fn first_poll_waits_one_period() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(PERIOD, start);
        assert!(!scheduler.take_due(start));
        assert_eq!(scheduler.time_until_due(start), Some(PERIOD));
        assert!(scheduler.take_due(start + PERIOD));
    }

    #[test]
    fn no_second_poll_while_one_is_outstanding() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(PERIOD, start);
        assert!(scheduler.take_due(start + PERIOD));
        assert!(!scheduler.take_due(start + PERIOD * 2));
        assert!(!scheduler.take_due(start + PERIOD * 10));
        assert_eq!(scheduler.time_until_due(start + PERIOD * 10), None);
    }

    #[test]
    fn late_periods_are_dropped_not_queued() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(PERIOD, start);
        assert!(scheduler.take_due(start + PERIOD));

        // The poll blocked on a timeout for three and a half periods.
        let finished = start + PERIOD * 4 + PERIOD / 2;
        scheduler.complete(finished);
        assert_eq!(scheduler.skipped(), 3);

        assert!(!scheduler.take_due(finished));
        assert!(scheduler.take_due(finished + PERIOD));
    }

    #[test]
    fn paused_scheduler_hands_out_nothing() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(PERIOD, start);
        scheduler.pause();
        assert!(scheduler.is_paused());
        assert!(!scheduler.take_due(start + PERIOD * 3));
        assert_eq!(scheduler.time_until_due(start), None);
    }

    #[test]
    fn resume_polls_immediately() {
        let start = Instant::now();
        let mut scheduler = PollScheduler::new(PERIOD, start);
        scheduler.pause();
        scheduler.resume(start);
        assert!(scheduler.take_due(start));
    }
}
