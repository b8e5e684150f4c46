//! Adaptive inter-request delay.
//!
//! The [`DelayController`] owns the spacing the scheduler enforces between
//! two dispatches. Every `429` multiplies the delay by
//! [`ThrottleConfig::backoff_factor`] up to the mode's ceiling. Once no hit
//! has been seen for [`ThrottleConfig::quiet_period`] the delay is back at
//! the mode's baseline; in between it decays linearly, so it never increases
//! without a hit and never drops below the baseline.
//!
//! ```
//! use patience::{DelayController, ThrottleConfig};
//! use std::time::Duration;
//!
//! let config = ThrottleConfig::builder()
//!     .normal_baseline(Duration::from_millis(50))
//!     .normal_ceiling(Duration::from_millis(400))
//!     .build();
//! let mut controller = DelayController::new(config);
//!
//! assert_eq!(controller.current_delay(), Duration::from_millis(50));
//! controller.record_rate_limit_hit(None);
//! assert!(controller.current_delay() >= Duration::from_millis(100));
//! ```

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::{Error, Result};

/// Client-side throttling posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Regular spacing.
    #[default]
    Normal,
    /// Raised delay floor and ceiling, used after recent throttling.
    Conservative,
}

/// Tuning knobs for the scheduler and the delay controller.
///
/// # Examples
///
/// ```
/// use patience::ThrottleConfig;
/// use std::time::Duration;
///
/// let config = ThrottleConfig::builder()
///     .normal_baseline(Duration::from_millis(50))
///     .backoff_factor(3.0)
///     .quiet_period(Duration::from_secs(30))
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Delay floor in [`Mode::Normal`].
    pub normal_baseline: Duration,
    /// Delay ceiling in [`Mode::Normal`].
    pub normal_ceiling: Duration,
    /// Delay floor in [`Mode::Conservative`].
    pub conservative_baseline: Duration,
    /// Delay ceiling in [`Mode::Conservative`].
    pub conservative_ceiling: Duration,
    /// Multiplier applied to the delay on every rate-limit hit.
    pub backoff_factor: f64,
    /// Smallest delay a hit escalates to, so a zero baseline still backs off.
    pub min_backoff: Duration,
    /// Time without hits after which the delay is back at the baseline.
    pub quiet_period: Duration,
    /// How far back a throttling event keeps the client conservative.
    ///
    /// Checked against the persisted "last rate limited" timestamp when a
    /// client is built, and used as the window for
    /// [`conservative_after_hits`](Self::conservative_after_hits).
    pub conservative_window: Duration,
    /// Number of hits inside `conservative_window` that switches the client
    /// to conservative mode on its own. `None` disables the escalation.
    pub conservative_after_hits: Option<u32>,
    /// Maximum number of outstanding network calls.
    pub max_concurrency: usize,
    /// Length of the sliding window behind `requests_in_window`.
    pub stats_window: Duration,
    /// Whether an advertised `Retry-After` raises the escalated delay.
    pub respect_retry_after: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            normal_baseline: Duration::from_millis(100),
            normal_ceiling: Duration::from_secs(2),
            conservative_baseline: Duration::from_secs(1),
            conservative_ceiling: Duration::from_secs(5),
            backoff_factor: 2.0,
            min_backoff: Duration::from_millis(250),
            quiet_period: Duration::from_secs(60),
            conservative_window: Duration::from_secs(5 * 60),
            conservative_after_hits: Some(3),
            max_concurrency: 1,
            stats_window: Duration::from_secs(60),
            respect_retry_after: true,
        }
    }
}

impl ThrottleConfig {
    /// Creates a new builder.
    pub fn builder() -> ThrottleConfigBuilder {
        ThrottleConfigBuilder::default()
    }

    /// Delay floor for `mode`.
    pub fn baseline(&self, mode: Mode) -> Duration {
        match mode {
            Mode::Normal => self.normal_baseline,
            Mode::Conservative => self.conservative_baseline,
        }
    }

    /// Delay ceiling for `mode`.
    pub fn ceiling(&self, mode: Mode) -> Duration {
        match mode {
            Mode::Normal => self.normal_ceiling,
            Mode::Conservative => self.conservative_ceiling,
        }
    }

    /// Rejects settings the controller cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.normal_ceiling < self.normal_baseline {
            return Err(Error::ConfigurationError(
                "normal_ceiling must not be below normal_baseline".to_string(),
            ));
        }
        if self.conservative_ceiling < self.conservative_baseline {
            return Err(Error::ConfigurationError(
                "conservative_ceiling must not be below conservative_baseline".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::ConfigurationError(format!(
                "backoff_factor must be a finite value >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.max_concurrency == 0 {
            return Err(Error::ConfigurationError(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.conservative_after_hits == Some(0) {
            return Err(Error::ConfigurationError(
                "conservative_after_hits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ThrottleConfig`].
#[derive(Default)]
pub struct ThrottleConfigBuilder {
    config: ThrottleConfig,
}

impl ThrottleConfigBuilder {
    /// Sets the normal-mode delay floor.
    pub fn normal_baseline(mut self, delay: Duration) -> Self {
        self.config.normal_baseline = delay;
        self
    }

    /// Sets the normal-mode delay ceiling.
    pub fn normal_ceiling(mut self, delay: Duration) -> Self {
        self.config.normal_ceiling = delay;
        self
    }

    /// Sets the conservative-mode delay floor.
    pub fn conservative_baseline(mut self, delay: Duration) -> Self {
        self.config.conservative_baseline = delay;
        self
    }

    /// Sets the conservative-mode delay ceiling.
    pub fn conservative_ceiling(mut self, delay: Duration) -> Self {
        self.config.conservative_ceiling = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    /// Sets the smallest delay a hit escalates to.
    pub fn min_backoff(mut self, delay: Duration) -> Self {
        self.config.min_backoff = delay;
        self
    }

    /// Sets the quiet period after which the delay is back at the baseline.
    pub fn quiet_period(mut self, period: Duration) -> Self {
        self.config.quiet_period = period;
        self
    }

    /// Sets the conservative window.
    pub fn conservative_window(mut self, window: Duration) -> Self {
        self.config.conservative_window = window;
        self
    }

    /// Sets the hit count that escalates to conservative mode.
    pub fn conservative_after_hits(mut self, hits: Option<u32>) -> Self {
        self.config.conservative_after_hits = hits;
        self
    }

    /// Sets the maximum number of outstanding network calls.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    /// Sets the length of the request-count window.
    pub fn stats_window(mut self, window: Duration) -> Self {
        self.config.stats_window = window;
        self
    }

    /// Sets whether `Retry-After` raises the escalated delay.
    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.config.respect_retry_after = respect;
        self
    }

    /// Builds the `ThrottleConfig`. Validation happens when a client is built.
    pub fn build(self) -> ThrottleConfig {
        self.config
    }
}

/// Delay reached by the latest hit, decaying from `at`.
#[derive(Debug, Clone, Copy)]
struct Escalation {
    peak: Duration,
    at: Instant,
}

/// Decides the inter-request delay and the current [`Mode`].
#[derive(Debug)]
pub struct DelayController {
    config: ThrottleConfig,
    mode: Mode,
    escalation: Option<Escalation>,
    recent_hits: VecDeque<Instant>,
}

impl DelayController {
    /// Creates a controller in [`Mode::Normal`] at the normal baseline.
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            mode: Mode::Normal,
            escalation: None,
            recent_hits: VecDeque::new(),
        }
    }

    /// The configuration this controller was built with.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// The current mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switches mode. Returns `true` if the mode actually changed.
    ///
    /// The new floor and ceiling apply to the next computed delay; an
    /// escalation in progress is kept and re-clamped to the new bounds.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        let changed = self.mode != mode;
        self.mode = mode;
        changed
    }

    /// The delay the scheduler must leave between two dispatches right now.
    pub fn current_delay(&self) -> Duration {
        self.delay_at(Instant::now())
    }

    fn delay_at(&self, now: Instant) -> Duration {
        let baseline = self.config.baseline(self.mode);
        let ceiling = self.config.ceiling(self.mode);

        let Some(escalation) = self.escalation else {
            return baseline;
        };

        let elapsed = now.saturating_duration_since(escalation.at);
        if elapsed >= self.config.quiet_period {
            return baseline;
        }

        let peak = escalation.peak.min(ceiling).max(baseline);
        let remaining = 1.0 - elapsed.as_secs_f64() / self.config.quiet_period.as_secs_f64();
        let span = peak - baseline;
        let decayed = Duration::try_from_secs_f64(span.as_secs_f64() * remaining.clamp(0.0, 1.0))
            .unwrap_or(span)
            .min(span);
        baseline + decayed
    }

    /// Records a successful response.
    ///
    /// Drops a fully decayed escalation so the controller returns to its
    /// resting state.
    pub fn record_success(&mut self) {
        let now = Instant::now();
        if let Some(escalation) = self.escalation {
            if now.saturating_duration_since(escalation.at) >= self.config.quiet_period {
                self.escalation = None;
            }
        }
        self.prune_hits(now);
    }

    /// Records a `429` and returns the escalated delay.
    ///
    /// `hint` is the wait the server advertised, if any; it only counts when
    /// [`ThrottleConfig::respect_retry_after`] is set. The result is never
    /// below the delay before the hit and never above the mode's ceiling.
    pub fn record_rate_limit_hit(&mut self, hint: Option<Duration>) -> Duration {
        let now = Instant::now();

        self.recent_hits.push_back(now);
        self.prune_hits(now);
        if let Some(threshold) = self.config.conservative_after_hits {
            if self.mode == Mode::Normal && self.recent_hits.len() >= threshold as usize {
                tracing::warn!(
                    hits = self.recent_hits.len(),
                    window_secs = self.config.conservative_window.as_secs(),
                    "Repeated throttling - switching to conservative mode"
                );
                self.mode = Mode::Conservative;
            }
        }

        let current = self.delay_at(now);
        let ceiling = self.config.ceiling(self.mode);
        let mut next = Duration::try_from_secs_f64(current.as_secs_f64() * self.config.backoff_factor)
            .unwrap_or(ceiling)
            .max(self.config.min_backoff);
        if self.config.respect_retry_after {
            if let Some(hint) = hint {
                next = next.max(hint);
            }
        }
        let next = next.min(ceiling).max(self.config.baseline(self.mode));

        self.escalation = Some(Escalation { peak: next, at: now });
        next
    }

    /// Hits within the conservative window.
    pub fn recent_hits(&self) -> usize {
        self.recent_hits.len()
    }

    fn prune_hits(&mut self, now: Instant) {
        let window = self.config.conservative_window;
        while let Some(front) = self.recent_hits.front() {
            if now.saturating_duration_since(*front) > window {
                self.recent_hits.pop_front();
            } else {
                break;
            }
        }
    }
}
