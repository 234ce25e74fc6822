//! Liveness timers: open/close timeouts, quiet-channel ping, pong watchdog and
//! keepalive pong.
//!
//! All timers are deadlines owned by the connection's executor; the executor
//! sleeps until [`Liveness::next_deadline`] and reports expiry back through
//! [`Liveness::expire`]. A disabled timer never has a deadline.

use bytes::Bytes;
use tokio::time::Instant;

use crate::config::{TimerSetting, Timing};

/// Which timer expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The upgrade handshake took too long.
    Open,
    /// The peer did not answer our Close in time.
    Close,
    /// The channel was quiet; a Ping is due.
    Ping,
    /// A Ping went unanswered.
    Pong,
    /// An unsolicited keepalive Pong is due.
    KeepAlive,
}

/// Deadline bookkeeping for one connection.
#[derive(Debug)]
pub struct Liveness {
    timing: Timing,
    open: Option<Instant>,
    close: Option<Instant>,
    ping: Option<Instant>,
    pong: Option<Instant>,
    keepalive: Option<Instant>,
    pings_sent: u64,
}

fn after(setting: TimerSetting, now: Instant) -> Option<Instant> {
    setting.duration().map(|d| now + d)
}

impl Liveness {
    #[must_use]
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            open: None,
            close: None,
            ping: None,
            pong: None,
            keepalive: None,
            pings_sent: 0,
        }
    }

    /// The policy in force.
    #[must_use]
    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Replace the policy. Only meaningful before the handshake starts.
    pub fn set_timing(&mut self, timing: Timing) {
        self.timing = timing;
    }

    /// Arm the open timeout as the handshake starts.
    pub fn handshake_started(&mut self, now: Instant) {
        self.open = after(self.timing.open_timeout, now);
    }

    /// Handshake done: stop the open timeout and start the quiet-channel and
    /// keepalive clocks.
    pub fn opened(&mut self, now: Instant) {
        self.open = None;
        self.ping = after(self.timing.ping_quiet_channel_period, now);
        self.keepalive = after(self.timing.pong_keepalive_period, now);
    }

    /// A frame was sent or received: the channel is not quiet.
    pub fn on_frame(&mut self, now: Instant) {
        if self.ping.is_some() {
            self.ping = after(self.timing.ping_quiet_channel_period, now);
        }
    }

    /// Returns `true` while a Ping is awaiting its Pong.
    #[must_use]
    pub fn awaiting_pong(&self) -> bool {
        self.pong.is_some()
    }

    /// A Ping was sent: arm the pong watchdog unless it is already running.
    pub fn ping_sent(&mut self, now: Instant) {
        if self.pong.is_none() {
            self.pong = after(self.timing.pong_timeout, now);
        }
    }

    /// A Pong (or the peer's Close) arrived.
    pub fn pong_received(&mut self) {
        self.pong = None;
    }

    /// Payload for the next quiet-channel Ping; never repeats on a connection.
    pub fn next_ping_payload(&mut self) -> Bytes {
        self.pings_sent += 1;
        Bytes::copy_from_slice(&self.pings_sent.to_be_bytes())
    }

    /// The connection left `Open`: stop ping, pong watchdog and keepalive.
    pub fn left_open(&mut self) {
        self.ping = None;
        self.pong = None;
        self.keepalive = None;
    }

    /// Our Close frame went out: arm the close timeout.
    pub fn close_sent(&mut self, now: Instant) {
        self.left_open();
        self.close = after(self.timing.close_timeout, now);
    }

    /// Cancel every timer.
    pub fn disarm_all(&mut self) {
        self.left_open();
        self.open = None;
        self.close = None;
    }

    /// The earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<(Instant, TimerKind)> {
        [
            (self.open, TimerKind::Open),
            (self.close, TimerKind::Close),
            (self.pong, TimerKind::Pong),
            (self.ping, TimerKind::Ping),
            (self.keepalive, TimerKind::KeepAlive),
        ]
        .into_iter()
        .filter_map(|(deadline, kind)| deadline.map(|d| (d, kind)))
        .min_by_key(|(deadline, _)| *deadline)
    }

    /// Consume the expiry of `kind` at `now`, rescheduling periodic timers.
    ///
    /// The ping and keepalive timers restart from their previous deadline so
    /// the cadence does not drift with executor latency.
    pub fn expire(&mut self, kind: TimerKind, now: Instant) {
        match kind {
            TimerKind::Open => self.open = None,
            TimerKind::Close => self.close = None,
            TimerKind::Pong => self.pong = None,
            TimerKind::Ping => {
                self.ping = after(self.timing.ping_quiet_channel_period, now);
            }
            TimerKind::KeepAlive => {
                let base = self.keepalive.unwrap_or(now);
                self.keepalive = after(self.timing.pong_keepalive_period, base);
            }
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConstant;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn timing(pairs: &[(TimingConstant, u64)]) -> Timing {
        pairs.iter().fold(Timing::disabled(), |t, &(c, v)| {
            t.with(c, TimerSetting::millis(v).unwrap())
        })
    }

    #[test]
    fn test_disabled_timers_never_fire() {
        let mut live = Liveness::new(Timing::disabled());
        let now = Instant::now();
        live.handshake_started(now);
        live.opened(now);
        live.ping_sent(now);
        live.close_sent(now);
        assert_eq!(live.next_deadline(), None);
    }

    #[test]
    fn test_open_timeout_lifecycle() {
        let mut live = Liveness::new(timing(&[(TimingConstant::OpenTimeoutMs, 500)]));
        let now = Instant::now();
        live.handshake_started(now);
        assert_eq!(live.next_deadline(), Some((now + ms(500), TimerKind::Open)));
        live.opened(now + ms(10));
        assert_eq!(live.next_deadline(), None);
    }

    #[test]
    fn test_quiet_channel_resets_on_frames() {
        let mut live = Liveness::new(timing(&[(TimingConstant::PingQuietChannelPeriodMs, 5000)]));
        let now = Instant::now();
        live.opened(now);
        live.on_frame(now + ms(1000));
        assert_eq!(
            live.next_deadline(),
            Some((now + ms(6000), TimerKind::Ping))
        );
    }

    #[test]
    fn test_frames_before_open_do_not_arm_ping() {
        let mut live = Liveness::new(timing(&[(TimingConstant::PingQuietChannelPeriodMs, 5000)]));
        live.on_frame(Instant::now());
        assert_eq!(live.next_deadline(), None);
    }

    #[test]
    fn test_pong_watchdog() {
        let mut live = Liveness::new(timing(&[
            (TimingConstant::PingQuietChannelPeriodMs, 5000),
            (TimingConstant::PongTimeoutMs, 2000),
        ]));
        let now = Instant::now();
        live.opened(now);
        live.ping_sent(now + ms(5000));
        assert!(live.awaiting_pong());
        // A second ping does not push the watchdog out
        live.ping_sent(now + ms(6000));
        assert_eq!(
            live.next_deadline(),
            Some((now + ms(7000), TimerKind::Pong))
        );
        live.pong_received();
        assert!(!live.awaiting_pong());
    }

    #[test]
    fn test_keepalive_fixed_cadence() {
        let mut live = Liveness::new(timing(&[(TimingConstant::PongKeepAlivePeriodMs, 1000)]));
        let start = Instant::now();
        live.opened(start);
        for i in 1..=3 {
            let (deadline, kind) = live.next_deadline().unwrap();
            assert_eq!(kind, TimerKind::KeepAlive);
            assert_eq!(deadline, start + ms(1000 * i));
            // Executor observes the expiry late; the cadence must not drift
            live.expire(kind, deadline + ms(7));
        }
    }

    #[test]
    fn test_close_sent_stops_liveness_and_arms_close() {
        let mut live = Liveness::new(timing(&[
            (TimingConstant::PingQuietChannelPeriodMs, 100),
            (TimingConstant::PongKeepAlivePeriodMs, 100),
            (TimingConstant::CloseTimeoutMs, 3000),
        ]));
        let now = Instant::now();
        live.opened(now);
        live.close_sent(now);
        assert_eq!(live.next_deadline(), Some((now + ms(3000), TimerKind::Close)));
        live.disarm_all();
        assert_eq!(live.next_deadline(), None);
    }

    #[test]
    fn test_earliest_deadline_wins() {
        let mut live = Liveness::new(timing(&[
            (TimingConstant::PingQuietChannelPeriodMs, 300),
            (TimingConstant::PongKeepAlivePeriodMs, 200),
        ]));
        let now = Instant::now();
        live.opened(now);
        assert_eq!(live.next_deadline().map(|(_, k)| k), Some(TimerKind::KeepAlive));
    }

    #[test]
    fn test_ping_payloads_are_fresh() {
        let mut live = Liveness::new(Timing::disabled());
        assert_ne!(live.next_ping_payload(), live.next_ping_payload());
    }
}
