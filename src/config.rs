//! Configuration, limits and timing policy for WebSocket connections.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration limits for WebSocket connections.
///
/// These limits prevent resource exhaustion and ensure bounded memory usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload of a single incoming frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a complete message in bytes.
    ///
    /// This applies to the total size after reassembling all fragments.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum size of the HTTP upgrade head in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_handshake_size,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// One timer of the [`Timing`] policy: disabled, or a positive duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimerSetting {
    /// The timer never fires.
    #[default]
    Disabled,
    /// The timer fires after this duration.
    After(Duration),
}

impl TimerSetting {
    /// A timer of `ms` milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for zero.
    pub fn millis(ms: u64) -> Result<Self> {
        if ms == 0 {
            return Err(Error::InvalidConfig(
                "timer duration must be positive; use None to disable".into(),
            ));
        }
        Ok(TimerSetting::After(Duration::from_millis(ms)))
    }

    /// The configured duration, if enabled.
    #[inline]
    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        match self {
            TimerSetting::Disabled => None,
            TimerSetting::After(d) => Some(*d),
        }
    }

    /// Returns `true` unless disabled.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, TimerSetting::After(_))
    }
}

impl FromStr for TimerSetting {
    type Err = Error;

    /// Parse an integer millisecond count, or `None` to disable.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") {
            return Ok(TimerSetting::Disabled);
        }
        let ms: u64 = s
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid timer value: {s:?}")))?;
        TimerSetting::millis(ms)
    }
}

impl std::fmt::Display for TimerSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerSetting::Disabled => write!(f, "None"),
            TimerSetting::After(d) => write!(f, "{}", d.as_millis()),
        }
    }
}

/// Names of the configurable timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimingConstant {
    /// Bound on the upgrade handshake.
    OpenTimeoutMs,
    /// Bound on the close handshake.
    CloseTimeoutMs,
    /// Quiet period after which a Ping is sent.
    PingQuietChannelPeriodMs,
    /// Time allowed for a Pong to answer a Ping.
    PongTimeoutMs,
    /// Period of unsolicited keepalive Pongs.
    PongKeepAlivePeriodMs,
}

impl TimingConstant {
    /// Every timing constant, in declaration order.
    pub const ALL: [TimingConstant; 5] = [
        TimingConstant::OpenTimeoutMs,
        TimingConstant::CloseTimeoutMs,
        TimingConstant::PingQuietChannelPeriodMs,
        TimingConstant::PongTimeoutMs,
        TimingConstant::PongKeepAlivePeriodMs,
    ];

    /// The option name recognized by [`Timing::from_options`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            TimingConstant::OpenTimeoutMs => "OpenTimeoutMs",
            TimingConstant::CloseTimeoutMs => "CloseTimeoutMs",
            TimingConstant::PingQuietChannelPeriodMs => "PingQuietChannelPeriodMs",
            TimingConstant::PongTimeoutMs => "PongTimeoutMs",
            TimingConstant::PongKeepAlivePeriodMs => "PongKeepAlivePeriodMs",
        }
    }
}

impl FromStr for TimingConstant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TimingConstant::ALL
            .into_iter()
            .find(|c| c.name() == s.trim())
            .ok_or_else(|| Error::InvalidConfig(format!("unknown timing option: {s:?}")))
    }
}

impl std::fmt::Display for TimingConstant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Timing policy of a connection.
///
/// Fixed once the connection leaves `Initial`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Bound on the upgrade handshake.
    ///
    /// Default: 30 seconds
    pub open_timeout: TimerSetting,
    /// Bound on the close handshake once the local Close frame is sent.
    ///
    /// Default: 10 seconds
    pub close_timeout: TimerSetting,
    /// A Ping is sent after this long without any frame in either direction.
    ///
    /// Default: disabled
    pub ping_quiet_channel_period: TimerSetting,
    /// A sent Ping must be answered by a Pong within this time.
    ///
    /// Default: disabled
    pub pong_timeout: TimerSetting,
    /// Period of unsolicited Pong frames.
    ///
    /// Default: disabled
    pub pong_keepalive_period: TimerSetting,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            open_timeout: TimerSetting::After(Duration::from_secs(30)),
            close_timeout: TimerSetting::After(Duration::from_secs(10)),
            ping_quiet_channel_period: TimerSetting::Disabled,
            pong_timeout: TimerSetting::Disabled,
            pong_keepalive_period: TimerSetting::Disabled,
        }
    }
}

impl Timing {
    /// A policy with every timer disabled.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            open_timeout: TimerSetting::Disabled,
            close_timeout: TimerSetting::Disabled,
            ping_quiet_channel_period: TimerSetting::Disabled,
            pong_timeout: TimerSetting::Disabled,
            pong_keepalive_period: TimerSetting::Disabled,
        }
    }

    /// Read one timer.
    #[must_use]
    pub const fn get(&self, constant: TimingConstant) -> TimerSetting {
        match constant {
            TimingConstant::OpenTimeoutMs => self.open_timeout,
            TimingConstant::CloseTimeoutMs => self.close_timeout,
            TimingConstant::PingQuietChannelPeriodMs => self.ping_quiet_channel_period,
            TimingConstant::PongTimeoutMs => self.pong_timeout,
            TimingConstant::PongKeepAlivePeriodMs => self.pong_keepalive_period,
        }
    }

    /// Replace one timer.
    pub fn set(&mut self, constant: TimingConstant, setting: TimerSetting) {
        let slot = match constant {
            TimingConstant::OpenTimeoutMs => &mut self.open_timeout,
            TimingConstant::CloseTimeoutMs => &mut self.close_timeout,
            TimingConstant::PingQuietChannelPeriodMs => &mut self.ping_quiet_channel_period,
            TimingConstant::PongTimeoutMs => &mut self.pong_timeout,
            TimingConstant::PongKeepAlivePeriodMs => &mut self.pong_keepalive_period,
        };
        *slot = setting;
    }

    /// Builder form of [`Timing::set`].
    #[must_use]
    pub fn with(mut self, constant: TimingConstant, setting: TimerSetting) -> Self {
        self.set(constant, setting);
        self
    }

    /// Apply `name = value` options on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for unknown names or malformed values.
    pub fn from_options<'a, I>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut timing = Self::default();
        for (name, value) in options {
            timing.set(name.parse()?, value.parse()?);
        }
        Ok(timing)
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Fragment size for outgoing messages (in bytes).
    ///
    /// Messages larger than this are split into multiple frames.
    ///
    /// Default: 16 KB (16 * 1024)
    pub fragment_size: usize,

    /// Transport read size (in bytes). Must hold a full control frame.
    ///
    /// Default: 4 KB (4096)
    pub read_buffer_size: usize,

    /// Undelivered inbound bytes after which the transport is no longer read
    /// until the application receives.
    ///
    /// Default: 1 MB (1024 * 1024)
    pub inbound_high_water: usize,

    /// Timer policy.
    pub timing: Timing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            read_buffer_size: 4096,
            inbound_high_water: 1024 * 1024,
            timing: Timing::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set fragment size for outgoing messages.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Set transport read size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the inbound buffering threshold.
    #[must_use]
    pub const fn with_inbound_high_water(mut self, bytes: usize) -> Self {
        self.inbound_high_water = bytes;
        self
    }

    /// Set the timing policy.
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Set one timer of the timing policy.
    #[must_use]
    pub fn with_timer(mut self, constant: TimingConstant, setting: TimerSetting) -> Self {
        self.timing.set(constant, setting);
        self
    }

    /// Defaults for the initiating end.
    #[must_use]
    pub fn initiator() -> Self {
        Self::default()
    }

    /// Defaults for the accepting end.
    #[must_use]
    pub fn acceptor() -> Self {
        Self::default()
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a size is unusable.
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size < 125 {
            return Err(Error::InvalidConfig(format!(
                "read_buffer_size {} is smaller than a control frame (125)",
                self.read_buffer_size
            )));
        }
        if self.fragment_size == 0 {
            return Err(Error::InvalidConfig("fragment_size must be positive".into()));
        }
        if self.inbound_high_water == 0 {
            return Err(Error::InvalidConfig(
                "inbound_high_water must be positive".into(),
            ));
        }
        if self.limits.max_frame_size < 125 {
            return Err(Error::InvalidConfig(
                "max_frame_size must admit a control frame".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(limits.max_message_size, 64 * 1024 * 1024);
        assert_eq!(limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_limits_checks() {
        let limits = Limits::default();
        assert!(limits.check_message_size(1024).is_ok());
        assert!(limits.check_message_size(100 * 1024 * 1024).is_err());
        assert!(limits.check_handshake_size(1024).is_ok());
        assert!(matches!(
            limits.check_handshake_size(10000),
            Err(Error::HandshakeTooLarge { size: 10000, max: 8192 })
        ));
    }

    #[test]
    fn test_timing_defaults() {
        let timing = Timing::default();
        assert_eq!(
            timing.open_timeout,
            TimerSetting::After(Duration::from_secs(30))
        );
        assert_eq!(
            timing.close_timeout,
            TimerSetting::After(Duration::from_secs(10))
        );
        assert!(!timing.ping_quiet_channel_period.is_enabled());
        assert!(!timing.pong_timeout.is_enabled());
        assert!(!timing.pong_keepalive_period.is_enabled());
    }

    #[test]
    fn test_timer_setting_parse() {
        assert_eq!("None".parse::<TimerSetting>().unwrap(), TimerSetting::Disabled);
        assert_eq!(
            " 1500 ".parse::<TimerSetting>().unwrap(),
            TimerSetting::After(Duration::from_millis(1500))
        );
        assert!("0".parse::<TimerSetting>().is_err());
        assert!("-5".parse::<TimerSetting>().is_err());
        assert!("soon".parse::<TimerSetting>().is_err());
    }

    #[test]
    fn test_timer_setting_display() {
        assert_eq!(TimerSetting::Disabled.to_string(), "None");
        assert_eq!(TimerSetting::millis(250).unwrap().to_string(), "250");
    }

    #[test]
    fn test_timing_constant_names_roundtrip() {
        for constant in TimingConstant::ALL {
            assert_eq!(constant.name().parse::<TimingConstant>().unwrap(), constant);
        }
        assert!("PingPeriod".parse::<TimingConstant>().is_err());
    }

    #[test]
    fn test_timing_get_set() {
        let mut timing = Timing::disabled();
        let ms = TimerSetting::millis(1000).unwrap();
        timing.set(TimingConstant::PongKeepAlivePeriodMs, ms);
        assert_eq!(timing.get(TimingConstant::PongKeepAlivePeriodMs), ms);
        assert_eq!(timing.pong_keepalive_period, ms);
        assert_eq!(
            timing.get(TimingConstant::OpenTimeoutMs),
            TimerSetting::Disabled
        );
    }

    #[test]
    fn test_timing_from_options() {
        let timing = Timing::from_options([
            ("PingQuietChannelPeriodMs", "5000"),
            ("PongTimeoutMs", "2000"),
            ("CloseTimeoutMs", "None"),
        ])
        .unwrap();
        assert_eq!(
            timing.ping_quiet_channel_period.duration(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(timing.pong_timeout.duration(), Some(Duration::from_secs(2)));
        assert_eq!(timing.close_timeout, TimerSetting::Disabled);
        assert_eq!(timing.open_timeout, Timing::default().open_timeout);

        assert!(Timing::from_options([("Bogus", "1")]).is_err());
        assert!(Timing::from_options([("PongTimeoutMs", "x")]).is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_fragment_size(4096)
            .with_read_buffer_size(1024)
            .with_timer(
                TimingConstant::PongKeepAlivePeriodMs,
                TimerSetting::millis(1000).unwrap(),
            );
        assert_eq!(config.fragment_size, 4096);
        assert_eq!(config.read_buffer_size, 1024);
        assert!(config.timing.pong_keepalive_period.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_rejects_tiny_read_buffer() {
        let config = Config::new().with_read_buffer_size(64);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        let config = Config::new().with_fragment_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_rejects_zero_high_water() {
        let config = Config::new().with_inbound_high_water(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        assert!(Config::new().with_inbound_high_water(1).validate().is_ok());
    }
}
