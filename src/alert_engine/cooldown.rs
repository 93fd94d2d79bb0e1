//! Per-signature alert cooldown
//!
//! A zero window passes every alert through, so a persisting condition re-alerts on every
//! frame. With a window, an alert whose (kind, message, subject) was emitted less than
//! `window` ago is dropped.

use super::{Alert, AlertKind};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

type Signature = (AlertKind, String, Option<String>);

/// Cooldown filter owned by one session worker
#[derive(Debug)]
pub struct AlertCooldown {
    window: Duration,
    last_emitted: HashMap<Signature, DateTime<Utc>>,
}

impl AlertCooldown {
    pub fn new(window_sec: u64) -> Self {
        Self {
            window: Duration::seconds(window_sec as i64),
            last_emitted: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window > Duration::zero()
    }

    /// Drop alerts still inside their cooldown window
    pub fn filter(&mut self, alerts: Vec<Alert>) -> Vec<Alert> {
        if !self.is_enabled() {
            return alerts;
        }

        let mut kept = Vec::with_capacity(alerts.len());
        for alert in alerts {
            let signature = (alert.kind, alert.message.clone(), alert.subject_id.clone());
            let suppressed = self
                .last_emitted
                .get(&signature)
                .map(|last| alert.timestamp - *last < self.window)
                .unwrap_or(false);

            if suppressed {
                tracing::trace!(kind = %alert.kind, message = %alert.message, "Alert suppressed by cooldown");
                continue;
            }
            self.last_emitted.insert(signature, alert.timestamp);
            kept.push(alert);
        }

        // Forget signatures whose window has passed
        if let Some(latest) = kept.iter().map(|a| a.timestamp).max() {
            let window = self.window;
            self.last_emitted.retain(|_, at| latest - *at < window);
        }

        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_engine::evaluate;
    use crate::control_state::ControlState;
    use crate::detectors::{IdentityObservation, ObjectObservation};
    use chrono::TimeZone;

    fn phone_alerts(at: DateTime<Utc>) -> Vec<Alert> {
        evaluate(
            &[IdentityObservation::new("S1", "Ana")],
            &[ObjectObservation::new("cell phone", 0.9)],
            &[],
            false,
            false,
            &ControlState::default(),
            at,
        )
    }

    fn t(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, sec).unwrap()
    }

    #[test]
    fn test_zero_window_passes_everything() {
        let mut cooldown = AlertCooldown::new(0);
        assert_eq!(cooldown.filter(phone_alerts(t(0))).len(), 1);
        assert_eq!(cooldown.filter(phone_alerts(t(0))).len(), 1);
    }

    #[test]
    fn test_repeat_suppressed_inside_window() {
        let mut cooldown = AlertCooldown::new(5);
        assert_eq!(cooldown.filter(phone_alerts(t(0))).len(), 1);
        assert!(cooldown.filter(phone_alerts(t(1))).is_empty());
        assert!(cooldown.filter(phone_alerts(t(4))).is_empty());
        assert_eq!(cooldown.filter(phone_alerts(t(5))).len(), 1);
    }

    #[test]
    fn test_distinct_subjects_not_suppressed() {
        let mut cooldown = AlertCooldown::new(5);
        cooldown.filter(phone_alerts(t(0)));
        let other = evaluate(
            &[IdentityObservation::new("S2", "Ben")],
            &[ObjectObservation::new("cell phone", 0.9)],
            &[],
            false,
            false,
            &ControlState::default(),
            t(1),
        );
        assert_eq!(cooldown.filter(other).len(), 1);
    }
}
