use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::transport::{OutboundRequest, TransportResponse};

/// Decides, given the request and the last response, whether the terminal
/// handler should retry. Transport errors always retry; the predicate is
/// only consulted when a response arrived.
pub type RetryPredicate = Arc<dyn Fn(&OutboundRequest, &TransportResponse) -> bool + Send + Sync>;

/// Retry on server errors. Combined with the engine's error handling this
/// yields the "network error OR status >= 500" default.
pub fn default_retry_predicate() -> RetryPredicate {
    Arc::new(|_, response| response.status.as_u16() >= 500)
}

/// Pure mapping from attempt number to the delay before the next attempt.
#[derive(Clone)]
pub struct BackoffStrategy {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Constant(Duration),
    Linear(Duration),
    Exponential {
        initial: Duration,
        multiplier: f64,
        cap: Duration,
    },
    Jitter {
        base: Box<BackoffStrategy>,
        fraction: f64,
    },
    Custom(Arc<dyn Fn(usize) -> Duration + Send + Sync>),
}

impl BackoffStrategy {
    /// The same delay for every attempt.
    pub fn constant(delay: Duration) -> Self {
        Self {
            inner: Inner::Constant(delay),
        }
    }

    /// `(attempt + 1) * interval`.
    pub fn linear(interval: Duration) -> Self {
        Self {
            inner: Inner::Linear(interval),
        }
    }

    /// `min(initial * multiplier^attempt, cap)`.
    pub fn exponential(initial: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            inner: Inner::Exponential {
                initial,
                multiplier,
                cap,
            },
        }
    }

    /// Wraps a base strategy with uniform jitter of `±fraction` of the base
    /// delay, clamped at zero. A non-positive fraction returns the base
    /// delay unchanged. There is no upper clamp; bound the base strategy if
    /// the sum must stay below a ceiling.
    pub fn jitter(base: BackoffStrategy, fraction: f64) -> Self {
        Self {
            inner: Inner::Jitter {
                base: Box::new(base),
                fraction,
            },
        }
    }

    /// Arbitrary attempt-to-delay function.
    pub fn custom(delay_for: impl Fn(usize) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            inner: Inner::Custom(Arc::new(delay_for)),
        }
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        match &self.inner {
            Inner::Constant(delay) => *delay,
            Inner::Linear(interval) => {
                let factor = u32::try_from(attempt.saturating_add(1)).unwrap_or(u32::MAX);
                interval.saturating_mul(factor)
            }
            Inner::Exponential {
                initial,
                multiplier,
                cap,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let scaled = initial.as_secs_f64() * multiplier.powi(exponent);
                let bounded = scaled.min(cap.as_secs_f64()).max(0.0);
                Duration::from_secs_f64(bounded)
            }
            Inner::Jitter { base, fraction } => {
                let delay = base.delay(attempt);
                if *fraction <= 0.0 {
                    return delay;
                }
                let unit: f64 = rand::rng().random_range(-1.0..=1.0);
                let jittered = delay.as_secs_f64() * (1.0 + fraction * unit);
                Duration::from_secs_f64(jittered.max(0.0))
            }
            Inner::Custom(delay_for) => delay_for(attempt),
        }
    }
}

impl std::fmt::Debug for BackoffStrategy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Inner::Constant(delay) => formatter.debug_tuple("Constant").field(delay).finish(),
            Inner::Linear(interval) => formatter.debug_tuple("Linear").field(interval).finish(),
            Inner::Exponential {
                initial,
                multiplier,
                cap,
            } => formatter
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("multiplier", multiplier)
                .field("cap", cap)
                .finish(),
            Inner::Jitter { base, fraction } => formatter
                .debug_struct("Jitter")
                .field("base", base)
                .field("fraction", fraction)
                .finish(),
            Inner::Custom(_) => formatter.write_str("Custom"),
        }
    }
}

/// Resolved retry settings for one `send()`: request-level overrides have
/// already won over the client's defaults by the time this is built.
#[derive(Clone)]
pub(crate) struct RetryConfig {
    pub(crate) max_retries: usize,
    pub(crate) backoff: BackoffStrategy,
    pub(crate) retry_if: RetryPredicate,
}
