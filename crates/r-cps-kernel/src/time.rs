//! ---
//! cps_section: "02-simulation-kernel"
//! cps_subsection: "module"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Cooperative discrete-event scheduler, typed event bus and virtual clock."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
//! Virtual time for the simulation kernel.
//!
//! Both types count signed 64-bit milliseconds. Time is advanced only by
//! the scheduler; no task ever observes a decreasing [`SimTime`].

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

/// A point on the virtual clock, in milliseconds from the simulation epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(i64);

impl SimTime {
    /// The simulation epoch.
    pub const ZERO: SimTime = SimTime(0);

    #[inline]
    pub const fn from_millis(ms: i64) -> Self {
        SimTime(ms)
    }

    #[inline]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Whole seconds as a float, for agent-facing maths and data files.
    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Elapsed virtual time since `earlier`.
    #[inline]
    pub fn duration_since(self, earlier: SimTime) -> SimDuration {
        SimDuration(self.0.saturating_sub(earlier.0))
    }
}

impl Add<SimDuration> for SimTime {
    type Output = SimTime;

    #[inline]
    fn add(self, rhs: SimDuration) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<SimDuration> for SimTime {
    #[inline]
    fn add_assign(&mut self, rhs: SimDuration) {
        *self = *self + rhs;
    }
}

impl Sub<SimTime> for SimTime {
    type Output = SimDuration;

    #[inline]
    fn sub(self, rhs: SimTime) -> SimDuration {
        self.duration_since(rhs)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A signed span of virtual time, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimDuration(i64);

impl SimDuration {
    pub const ZERO: SimDuration = SimDuration(0);

    #[inline]
    pub const fn from_millis(ms: i64) -> Self {
        SimDuration(ms)
    }

    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        SimDuration(secs * 1000)
    }

    #[inline]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// True for durations strictly greater than zero.
    #[inline]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Lossy conversion to a host [`std::time::Duration`] for wall-clock
    /// pacing. Non-positive spans collapse to zero.
    #[inline]
    pub fn to_std(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0.max(0) as u64)
    }
}

impl From<std::time::Duration> for SimDuration {
    /// Truncates to whole milliseconds, saturating at `i64::MAX`.
    fn from(value: std::time::Duration) -> Self {
        SimDuration(i64::try_from(value.as_millis()).unwrap_or(i64::MAX))
    }
}

impl Add for SimDuration {
    type Output = SimDuration;

    #[inline]
    fn add(self, rhs: SimDuration) -> SimDuration {
        SimDuration(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SimDuration {
    type Output = SimDuration;

    #[inline]
    fn sub(self, rhs: SimDuration) -> SimDuration {
        SimDuration(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for SimDuration {
    type Output = SimDuration;

    #[inline]
    fn neg(self) -> SimDuration {
        SimDuration(-self.0)
    }
}

impl fmt::Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_arithmetic() {
        let t = SimTime::from_millis(100);
        assert_eq!(t + SimDuration::from_millis(50), SimTime::from_millis(150));
        assert_eq!(
            SimTime::from_millis(150) - t,
            SimDuration::from_millis(50)
        );
        assert_eq!(t.as_secs_f64(), 0.1);
    }

    #[test]
    fn ordering() {
        assert!(SimTime::from_millis(10) < SimTime::from_millis(20));
        assert!(SimDuration::from_millis(-5) < SimDuration::ZERO);
        assert!(!SimDuration::from_millis(-5).is_positive());
        assert!(SimDuration::from_millis(1).is_positive());
    }

    #[test]
    fn std_conversions() {
        let d: SimDuration = std::time::Duration::from_secs(2).into();
        assert_eq!(d, SimDuration::from_secs(2));
        assert_eq!(
            SimDuration::from_millis(-1).to_std(),
            std::time::Duration::ZERO
        );
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", SimTime::from_millis(42)), "42ms");
    }
}
