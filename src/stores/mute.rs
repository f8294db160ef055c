//! Mute gate for outbound sends.

use chatsync_shared::parse_timestamp;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MuteState {
    pub is_muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Tracks whether the current user may send. Expiry is evaluated lazily on
/// [`MuteGate::check`]; nothing runs in the background.
#[derive(Debug, Clone, Default)]
pub struct MuteGate {
    state: MuteState,
}

impl MuteGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &MuteState {
        &self.state
    }

    /// Last known flag, without expiring it.
    pub fn is_user_muted(&self) -> bool {
        self.state.is_muted
    }

    /// Whether sends are blocked at `now`. An elapsed mute is cleared here.
    pub fn check(&mut self, now: DateTime<Utc>) -> bool {
        if !self.state.is_muted {
            return false;
        }
        match self.state.muted_until {
            Some(until) if until <= now => {
                crate::log_info!("Mute expired at {}", until);
                self.state = MuteState::default();
                false
            }
            _ => true,
        }
    }

    /// Apply a mute/unmute update. `muted_until` accepts RFC 3339 or
    /// `YYYY-MM-DD HH:MM:SS`; an unparseable value mutes without deadline.
    pub fn update(&mut self, is_muted: bool, muted_until: Option<&str>, reason: Option<String>) {
        if !is_muted {
            self.state = MuteState::default();
            return;
        }

        let until = muted_until.and_then(|raw| {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                crate::log_warn!("Unparseable mute deadline '{}'", raw);
            }
            parsed
        });
        self.mute(until, reason);
    }

    pub fn mute(&mut self, until: Option<DateTime<Utc>>, reason: Option<String>) {
        self.state = MuteState {
            is_muted: true,
            muted_until: until,
            reason,
        };
    }

    /// Text explaining why a send was refused.
    pub fn rejection_message(&self) -> String {
        match (&self.state.muted_until, &self.state.reason) {
            (Some(until), Some(reason)) => format!(
                "You are muted until {} ({})",
                until.format("%Y-%m-%d %H:%M:%S"),
                reason
            ),
            (Some(until), None) => format!("You are muted until {}", until.format("%Y-%m-%d %H:%M:%S")),
            (None, Some(reason)) => format!("You are muted ({})", reason),
            (None, None) => "You are muted".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn past_deadline_unmutes_on_check() {
        let mut gate = MuteGate::new();
        gate.update(true, Some("2030-05-01 11:59:59"), None);
        assert!(gate.is_user_muted());

        assert!(!gate.check(now()));
        assert!(!gate.is_user_muted());
    }

    #[test]
    fn future_deadline_blocks() {
        let mut gate = MuteGate::new();
        gate.update(true, Some("2030-05-01T13:00:00Z"), Some("spam".into()));
        assert!(gate.check(now()));
        assert_eq!(gate.rejection_message(), "You are muted until 2030-05-01 13:00:00 (spam)");
    }

    #[test]
    fn mute_without_deadline_persists_until_unmuted() {
        let mut gate = MuteGate::new();
        gate.update(true, Some("whenever"), None);
        assert!(gate.check(now()));

        gate.update(false, None, None);
        assert!(!gate.check(now()));
        assert_eq!(gate.state(), &MuteState::default());
    }
}
