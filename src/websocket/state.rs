//! Connection state machine
//!
//! `disconnected -> connecting -> open -> erroring -> disconnected`, driven
//! by explicit events. Reconnect scheduling is a pure function of the
//! attempt count so it can be checked without sockets.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health of one stream subscription, as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Open,
    Erroring,
}

/// What to do after the connection closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    Reconnect { attempt: u32, delay: Duration },
    /// Attempt budget spent; terminal for this subscription
    Exhausted,
    /// Caller tore the subscription down
    Stopped,
}

/// Linear back-off: `base * (attempts + 1)`
pub fn reconnect_delay(attempts: u32, base: Duration) -> Duration {
    base.saturating_mul(attempts.saturating_add(1))
}

/// Delay before the next reconnect, or `None` once `max_attempts` reconnects have been spent
pub fn next_reconnect(attempts: u32, max_attempts: u32, base: Duration) -> Option<Duration> {
    if attempts >= max_attempts {
        None
    } else {
        Some(reconnect_delay(attempts, base))
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionState {
    status: ConnectionStatus,
    /// Reconnects scheduled since the last successful open
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
    subscribed: bool,
    exhausted: bool,
}

impl ConnectionState {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            max_attempts,
            base_delay,
            subscribed: true,
            exhausted: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn connecting(&mut self) {
        if self.subscribed && !self.exhausted {
            self.status = ConnectionStatus::Connecting;
        }
    }

    pub fn opened(&mut self) {
        if self.subscribed && !self.exhausted {
            self.attempts = 0;
            self.status = ConnectionStatus::Open;
        }
    }

    /// Errors only flag the connection; the close that follows decides what happens next
    pub fn errored(&mut self) {
        self.status = ConnectionStatus::Erroring;
    }

    pub fn closed(&mut self) -> CloseAction {
        if !self.subscribed {
            self.status = ConnectionStatus::Disconnected;
            return CloseAction::Stopped;
        }
        if self.exhausted {
            return CloseAction::Exhausted;
        }

        match next_reconnect(self.attempts, self.max_attempts, self.base_delay) {
            Some(delay) => {
                self.attempts += 1;
                self.status = ConnectionStatus::Disconnected;
                CloseAction::Reconnect {
                    attempt: self.attempts,
                    delay,
                }
            }
            None => {
                self.exhausted = true;
                self.status = ConnectionStatus::Erroring;
                CloseAction::Exhausted
            }
        }
    }

    /// Caller-side teardown; safe to repeat
    pub fn unsubscribe(&mut self) {
        self.subscribed = false;
        if !self.exhausted {
            self.status = ConnectionStatus::Disconnected;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(1000);

    #[test]
    fn test_linear_backoff() {
        assert_eq!(reconnect_delay(0, BASE), Duration::from_secs(1));
        assert_eq!(reconnect_delay(3, BASE), Duration::from_secs(4));
        assert_eq!(next_reconnect(3, 5, BASE), Some(Duration::from_secs(4)));
        assert_eq!(next_reconnect(4, 5, BASE), Some(Duration::from_secs(5)));
        assert_eq!(next_reconnect(5, 5, BASE), None);
    }

    #[test]
    fn test_sixth_consecutive_close_exhausts() {
        let mut state = ConnectionState::new(5, BASE);
        let mut delays = Vec::new();

        for _ in 0..10 {
            state.connecting();
            state.errored();
            match state.closed() {
                CloseAction::Reconnect { delay, .. } => delays.push(delay),
                CloseAction::Exhausted => break,
                CloseAction::Stopped => panic!("unexpected stop"),
            }
        }

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(4),
                Duration::from_secs(5)
            ]
        );
        assert!(state.is_exhausted());
        assert_eq!(state.attempts(), 5);
        assert_eq!(state.status(), ConnectionStatus::Erroring);

        // Terminal: nothing revives it
        state.connecting();
        state.opened();
        assert_eq!(state.status(), ConnectionStatus::Erroring);
        assert_eq!(state.closed(), CloseAction::Exhausted);
    }

    #[test]
    fn test_open_resets_attempts() {
        let mut state = ConnectionState::new(5, BASE);
        state.closed();
        state.closed();
        assert_eq!(state.attempts(), 2);

        state.connecting();
        state.opened();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.status(), ConnectionStatus::Open);
        assert_eq!(
            state.closed(),
            CloseAction::Reconnect {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_error_does_not_reconnect_by_itself() {
        let mut state = ConnectionState::new(5, BASE);
        state.connecting();
        state.opened();
        state.errored();
        assert_eq!(state.status(), ConnectionStatus::Erroring);
        assert_eq!(state.attempts(), 0);
    }

    #[test]
    fn test_unsubscribe_stops_and_is_idempotent() {
        let mut state = ConnectionState::new(5, BASE);
        state.unsubscribe();
        state.unsubscribe();
        assert_eq!(state.closed(), CloseAction::Stopped);
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
    }
}
