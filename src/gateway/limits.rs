use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::GatewayError;
use crate::clock::Clock;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_max_requests() -> u32 {
    50
}

fn default_window_ms() -> u64 {
    60_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateWindow {
    pub window_start_epoch_ms: u64,
    pub count: u32,
}

/// Fixed-window counter gating calls to the data provider.
///
/// Denied callers are shed immediately; nothing is queued.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    window: Mutex<RateWindow>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("window", &self.window())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let window = RateWindow {
            window_start_epoch_ms: clock.now_epoch_millis(),
            count: 0,
        };
        Self {
            config,
            clock,
            window: Mutex::new(window),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn window(&self) -> RateWindow {
        *self
            .window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now_epoch_millis();
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if now.saturating_sub(window.window_start_epoch_ms) > self.config.window_ms {
            *window = RateWindow {
                window_start_epoch_ms: now,
                count: 0,
            };
        }

        if window.count >= self.config.max_requests {
            return false;
        }
        window.count += 1;
        true
    }

    pub fn acquire(&self) -> Result<(), GatewayError> {
        if self.try_acquire() {
            return Ok(());
        }
        Err(GatewayError::RateLimited {
            limit: format!(
                "{} requests per {}ms",
                self.config.max_requests, self.config.window_ms
            ),
        })
    }
}
