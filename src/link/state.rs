//! Transition table for the link lifecycle.
//!
//! ```text
//! Disconnected ──start──> Connecting ──open──> Connected ──token──> Authenticating
//!      ^                      │                    │                     │
//!      │                      └──── error ─────────┴──────> Failed <─────┤
//!      │                                                      │          │ handshake
//!      └──────────── close / stop (any state) ────────────────┼──── Authenticated
//!                                                             │
//!                          retry (attempts < max_retry) ──────┘
//! ```
//!
//! No I/O happens here. The driver in [`super::lifecycle`] feeds events in
//! and acts on the resulting state and [`RetryDecision`].

use std::time::Duration;

use crate::error::LinkError;

use super::{LinkConfig, LinkState, LinkStatus};

/// What to do after a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    /// Auto-reconnect is off; wait for an explicit request.
    Idle,
    /// The retry budget is spent; wait for an explicit request.
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: LinkState,
    attempts: u32,
    exhausted: bool,
    session_authenticated: bool,
    max_retry: u32,
    auto_reconnect: bool,
    reconnect_timeout: Duration,
}

impl Lifecycle {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            state: LinkState::Disconnected,
            attempts: 0,
            exhausted: false,
            session_authenticated: false,
            max_retry: config.max_retry,
            auto_reconnect: config.auto_reconnect,
            reconnect_timeout: config.reconnect_timeout,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            attempts: self.attempts,
            retry_budget_exhausted: self.exhausted,
        }
    }

    /// Start or automatic retry: `Disconnected`/`Failed` → `Connecting`.
    pub fn begin_connect(&mut self) -> Result<(), LinkError> {
        match self.state {
            LinkState::Disconnected | LinkState::Failed if self.exhausted => {
                Err(LinkError::ExceededRetryBudget {
                    attempts: self.attempts,
                })
            }
            LinkState::Disconnected | LinkState::Failed => {
                self.state = LinkState::Connecting;
                self.session_authenticated = false;
                Ok(())
            }
            from => Err(LinkError::InvalidTransition {
                from,
                event: "connect",
            }),
        }
    }

    pub fn transport_opened(&mut self) -> Result<(), LinkError> {
        self.advance(LinkState::Connecting, LinkState::Connected, "open")
    }

    pub fn token_sent(&mut self) -> Result<(), LinkError> {
        self.advance(LinkState::Connected, LinkState::Authenticating, "token_sent")
    }

    /// The controller confirmed the token. Clears the attempt counter.
    pub fn handshake_received(&mut self) -> Result<(), LinkError> {
        self.advance(
            LinkState::Authenticating,
            LinkState::Authenticated,
            "handshake",
        )?;
        self.attempts = 0;
        self.session_authenticated = true;
        Ok(())
    }

    /// Transport error in any active state → `Failed`.
    pub fn transport_failed(&mut self) -> Result<(), LinkError> {
        self.end_session(LinkState::Failed, "error")
    }

    /// Peer closed the connection → `Disconnected`.
    pub fn transport_closed(&mut self) -> Result<(), LinkError> {
        self.end_session(LinkState::Disconnected, "close")
    }

    /// Decide how to continue after a failed or closed session.
    pub fn next_step(&mut self) -> RetryDecision {
        if !self.auto_reconnect {
            return RetryDecision::Idle;
        }
        if self.attempts >= self.max_retry {
            self.state = LinkState::Failed;
            self.exhausted = true;
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.reconnect_timeout)
    }

    /// Explicit reconnect from outside: clears the attempt counter and the
    /// exhausted flag. The caller follows up with [`begin_connect`].
    ///
    /// [`begin_connect`]: Lifecycle::begin_connect
    pub fn request_reconnect(&mut self) -> Result<(), LinkError> {
        match self.state {
            LinkState::Disconnected | LinkState::Failed => {
                self.attempts = 0;
                self.exhausted = false;
                Ok(())
            }
            from => Err(LinkError::InvalidTransition {
                from,
                event: "reconnect",
            }),
        }
    }

    /// Explicit stop. Valid from every state.
    pub fn stop(&mut self) {
        self.state = LinkState::Disconnected;
        self.session_authenticated = false;
    }

    fn advance(
        &mut self,
        from: LinkState,
        to: LinkState,
        event: &'static str,
    ) -> Result<(), LinkError> {
        if self.state != from {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                event,
            });
        }
        self.state = to;
        Ok(())
    }

    fn end_session(&mut self, to: LinkState, event: &'static str) -> Result<(), LinkError> {
        if matches!(self.state, LinkState::Disconnected | LinkState::Failed) {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                event,
            });
        }
        if !self.session_authenticated {
            self.attempts = self.attempts.saturating_add(1);
        }
        self.session_authenticated = false;
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::DEFAULT_RECONNECT_TIMEOUT;

    fn machine(max_retry: u32, auto_reconnect: bool) -> Lifecycle {
        Lifecycle::new(
            &LinkConfig::new("token")
                .with_max_retry(max_retry)
                .with_auto_reconnect(auto_reconnect),
        )
    }

    fn authenticate(m: &mut Lifecycle) {
        m.begin_connect().unwrap();
        m.transport_opened().unwrap();
        m.token_sent().unwrap();
        m.handshake_received().unwrap();
    }

    #[test]
    fn happy_path_reaches_authenticated() {
        let mut m = machine(5, true);
        assert_eq!(m.state(), LinkState::Disconnected);

        m.begin_connect().unwrap();
        assert_eq!(m.state(), LinkState::Connecting);
        m.transport_opened().unwrap();
        assert_eq!(m.state(), LinkState::Connected);
        m.token_sent().unwrap();
        assert_eq!(m.state(), LinkState::Authenticating);
        m.handshake_received().unwrap();
        assert_eq!(m.state(), LinkState::Authenticated);
    }

    #[test]
    fn handshake_outside_authenticating_is_rejected() {
        let mut m = machine(5, true);
        m.begin_connect().unwrap();
        m.transport_opened().unwrap();

        let err = m.handshake_received().unwrap_err();
        assert!(matches!(
            err,
            LinkError::InvalidTransition {
                from: LinkState::Connected,
                event: "handshake"
            }
        ));
        assert_eq!(m.state(), LinkState::Connected);
    }

    #[test]
    fn connect_failures_consume_the_budget() {
        let mut m = machine(5, true);

        for attempt in 1..=4 {
            m.begin_connect().unwrap();
            m.transport_failed().unwrap();
            assert_eq!(m.state(), LinkState::Failed);
            assert_eq!(m.attempts(), attempt);
            assert_eq!(
                m.next_step(),
                RetryDecision::RetryAfter(DEFAULT_RECONNECT_TIMEOUT)
            );
        }

        m.begin_connect().unwrap();
        m.transport_failed().unwrap();
        assert_eq!(m.next_step(), RetryDecision::GiveUp);
        assert!(m.status().retry_budget_exhausted);
        assert!(matches!(
            m.begin_connect(),
            Err(LinkError::ExceededRetryBudget { attempts: 5 })
        ));
        assert_eq!(m.state(), LinkState::Failed);
    }

    #[test]
    fn explicit_reconnect_resets_the_counter() {
        let mut m = machine(5, true);
        for _ in 0..5 {
            m.begin_connect().unwrap();
            m.transport_failed().unwrap();
        }
        assert_eq!(m.next_step(), RetryDecision::GiveUp);

        m.request_reconnect().unwrap();
        assert_eq!(m.attempts(), 0);
        assert!(!m.status().retry_budget_exhausted);
        m.begin_connect().unwrap();
        assert_eq!(m.state(), LinkState::Connecting);
    }

    #[test]
    fn reconnect_is_refused_while_active() {
        let mut m = machine(5, true);
        authenticate(&mut m);
        assert!(m.request_reconnect().is_err());
        assert_eq!(m.state(), LinkState::Authenticated);
    }

    #[test]
    fn authentication_resets_attempts() {
        let mut m = machine(5, true);
        for _ in 0..3 {
            m.begin_connect().unwrap();
            m.transport_failed().unwrap();
        }
        assert_eq!(m.attempts(), 3);

        authenticate(&mut m);
        assert_eq!(m.attempts(), 0);

        // Losing an authenticated session does not count as a failed attempt.
        m.transport_closed().unwrap();
        assert_eq!(m.state(), LinkState::Disconnected);
        assert_eq!(m.attempts(), 0);
        assert!(matches!(m.next_step(), RetryDecision::RetryAfter(_)));
    }

    #[test]
    fn close_before_authentication_counts_as_attempt() {
        let mut m = machine(1, true);
        m.begin_connect().unwrap();
        m.transport_opened().unwrap();
        m.token_sent().unwrap();
        m.transport_closed().unwrap();

        assert_eq!(m.attempts(), 1);
        assert_eq!(m.next_step(), RetryDecision::GiveUp);
        assert_eq!(m.state(), LinkState::Failed);
    }

    #[test]
    fn without_auto_reconnect_the_machine_idles() {
        let mut m = machine(5, false);
        m.begin_connect().unwrap();
        m.transport_failed().unwrap();
        assert_eq!(m.next_step(), RetryDecision::Idle);
        assert_eq!(m.state(), LinkState::Failed);
        assert!(!m.status().retry_budget_exhausted);
    }

    #[test]
    fn stale_events_after_session_end_are_rejected() {
        let mut m = machine(5, true);
        m.begin_connect().unwrap();
        m.transport_failed().unwrap();

        assert!(m.transport_closed().is_err());
        assert!(m.transport_failed().is_err());
        assert_eq!(m.attempts(), 1);
    }

    #[test]
    fn stop_is_valid_everywhere() {
        let mut m = machine(5, true);
        m.stop();
        assert_eq!(m.state(), LinkState::Disconnected);

        authenticate(&mut m);
        m.stop();
        assert_eq!(m.state(), LinkState::Disconnected);

        m.begin_connect().unwrap();
        m.transport_failed().unwrap();
        m.stop();
        assert_eq!(m.state(), LinkState::Disconnected);
    }
}
