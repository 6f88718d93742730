// Liveness: tells a genuinely fresh push from a replayed cached one, and declares the
// source offline when fresh pushes stop arriving.
//
// Unknown --first push--> Stale --differing push--> Live
// Live/Stale --heartbeat age > timeout--> Offline --differing push--> Live
// A push identical to the stored fingerprint never changes state and is never forwarded.

use serde::Serialize;

use crate::models::{Field, Readings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Unknown,
    Stale,
    Live,
    Offline,
}

impl ConnectionState {
    /// Only `Live` is presented as online; everything else reads as offline.
    pub fn is_online(self) -> bool {
        matches!(self, ConnectionState::Live)
    }
}

/// Bit-exact identity of a reading's eight values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u64; 8]);

impl Fingerprint {
    pub fn of(readings: &Readings) -> Self {
        let mut bits = [0u64; 8];
        for (slot, field) in bits.iter_mut().zip(Field::ALL) {
            let v = readings.get(field);
            // -0.0 and 0.0 are the same reading
            *slot = if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() };
        }
        Self(bits)
    }
}

/// Classification of one push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    /// First push after (re)initialization; may be a cached echo. Held as the baseline.
    Baseline,
    /// Same fingerprint as the previous push.
    Duplicate,
    /// Voltage, current and power all zero while `zero_reading_is_offline` is on.
    NoSupply,
    /// Genuine update; forwarded downstream.
    Fresh,
}

#[derive(Debug, Clone, Copy)]
pub struct LivenessConfig {
    pub heartbeat_timeout_ms: i64,
    pub zero_reading_is_offline: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 3_000,
            zero_reading_is_offline: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LivenessDetector {
    config: LivenessConfig,
    state: ConnectionState,
    fingerprint: Option<Fingerprint>,
    last_fresh_ms: Option<i64>,
}

impl LivenessDetector {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Unknown,
            fingerprint: None,
            last_fresh_ms: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_fresh_ms(&self) -> Option<i64> {
        self.last_fresh_ms
    }

    pub fn observe(&mut self, readings: &Readings, now_ms: i64) -> Verdict {
        let fp = Fingerprint::of(readings);
        if self.state == ConnectionState::Unknown {
            self.fingerprint = Some(fp);
            self.state = ConnectionState::Stale;
            return Verdict::Baseline;
        }
        if self.fingerprint == Some(fp) {
            return Verdict::Duplicate;
        }
        self.fingerprint = Some(fp);

        if self.config.zero_reading_is_offline
            && readings.voltage == 0.0
            && readings.current == 0.0
            && readings.power == 0.0
        {
            self.state = ConnectionState::Offline;
            return Verdict::NoSupply;
        }

        self.state = ConnectionState::Live;
        self.last_fresh_ms = Some(now_ms);
        Verdict::Fresh
    }

    /// Time-driven transition to `Offline`. Returns the new state when it changed.
    pub fn check_heartbeat(&mut self, now_ms: i64) -> Option<ConnectionState> {
        let last = self.last_fresh_ms?;
        let expired = now_ms - last > self.config.heartbeat_timeout_ms;
        if expired && matches!(self.state, ConnectionState::Live | ConnectionState::Stale) {
            self.state = ConnectionState::Offline;
            return Some(self.state);
        }
        None
    }

    /// Back to `Unknown` with no fingerprint and no heartbeat history.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Unknown;
        self.fingerprint = None;
        self.last_fresh_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(v: f64) -> Readings {
        Readings {
            voltage: v,
            current: 1.0,
            power: 100.0,
            ..Default::default()
        }
    }

    fn detector() -> LivenessDetector {
        LivenessDetector::new(LivenessConfig::default())
    }

    #[test]
    fn first_push_is_baseline_not_live() {
        let mut d = detector();
        assert_eq!(d.state(), ConnectionState::Unknown);
        assert_eq!(d.observe(&reading(230.0), 0), Verdict::Baseline);
        assert_eq!(d.state(), ConnectionState::Stale);
        assert!(!d.state().is_online());
        assert_eq!(d.last_fresh_ms(), None);
    }

    #[test]
    fn repeated_baseline_stays_stale() {
        let mut d = detector();
        d.observe(&reading(230.0), 0);
        for t in 1..5 {
            assert_eq!(d.observe(&reading(230.0), t), Verdict::Duplicate);
            assert_eq!(d.state(), ConnectionState::Stale);
        }
    }

    #[test]
    fn differing_push_goes_live() {
        let mut d = detector();
        d.observe(&reading(230.0), 0);
        d.observe(&reading(230.0), 1);
        assert_eq!(d.observe(&reading(231.0), 2), Verdict::Fresh);
        assert_eq!(d.state(), ConnectionState::Live);
        assert_eq!(d.last_fresh_ms(), Some(2));
        assert_eq!(d.observe(&reading(232.0), 3), Verdict::Fresh);
        assert_eq!(d.last_fresh_ms(), Some(3));
    }

    #[test]
    fn duplicate_while_live_is_ignored_but_stays_live() {
        let mut d = detector();
        d.observe(&reading(230.0), 0);
        d.observe(&reading(231.0), 10);
        assert_eq!(d.observe(&reading(231.0), 20), Verdict::Duplicate);
        assert_eq!(d.state(), ConnectionState::Live);
        assert_eq!(d.last_fresh_ms(), Some(10));
    }

    #[test]
    fn heartbeat_declares_offline_after_timeout_and_fresh_push_recovers() {
        let mut d = detector();
        d.observe(&reading(230.0), 0);
        d.observe(&reading(231.0), 1_000);
        assert_eq!(d.check_heartbeat(4_000), None, "age == timeout is still live");
        assert_eq!(d.state(), ConnectionState::Live);
        assert_eq!(d.check_heartbeat(4_001), Some(ConnectionState::Offline));
        assert_eq!(d.check_heartbeat(9_000), None, "no repeated transition");

        assert_eq!(d.observe(&reading(231.0), 9_100), Verdict::Duplicate);
        assert_eq!(d.state(), ConnectionState::Offline);
        assert_eq!(d.observe(&reading(229.0), 9_200), Verdict::Fresh);
        assert_eq!(d.state(), ConnectionState::Live);
    }

    #[test]
    fn heartbeat_without_any_fresh_push_is_a_no_op() {
        let mut d = detector();
        d.observe(&reading(230.0), 0);
        assert_eq!(d.check_heartbeat(1_000_000), None);
        assert_eq!(d.state(), ConnectionState::Stale);
    }

    #[test]
    fn reset_forgets_fingerprint_and_heartbeat() {
        let mut d = detector();
        d.observe(&reading(230.0), 0);
        d.observe(&reading(231.0), 1);
        d.reset();
        assert_eq!(d.state(), ConnectionState::Unknown);
        assert_eq!(d.last_fresh_ms(), None);
        assert_eq!(d.observe(&reading(231.0), 2), Verdict::Baseline);
    }

    #[test]
    fn zero_reading_rule_marks_offline_when_enabled() {
        let mut d = LivenessDetector::new(LivenessConfig {
            zero_reading_is_offline: true,
            ..Default::default()
        });
        d.observe(&reading(230.0), 0);
        d.observe(&reading(231.0), 1);
        assert_eq!(d.observe(&Readings::default(), 2), Verdict::NoSupply);
        assert_eq!(d.state(), ConnectionState::Offline);
        assert_eq!(d.observe(&reading(231.0), 3), Verdict::Fresh);
    }

    #[test]
    fn zero_reading_is_fresh_when_rule_disabled() {
        let mut d = detector();
        d.observe(&reading(230.0), 0);
        assert_eq!(d.observe(&Readings::default(), 1), Verdict::Fresh);
    }

    #[test]
    fn negative_zero_fingerprints_like_zero() {
        let a = Readings::default();
        let b = Readings {
            voltage: -0.0,
            ..Default::default()
        };
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }
}
