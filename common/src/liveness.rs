use std::time::Duration;

use thiserror::Error;

use crate::config::LivenessConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("indicator pin error: {0}")]
pub struct PinError(pub String);

/// Output pin driving the liveness LED, addressed by electrical level.
pub trait IndicatorPin {
    fn set_high(&mut self, high: bool) -> Result<(), PinError>;
}

/// Toggles the indicator once per half period. Polarity is handled here, so
/// `is_lit` is always the visible state of the LED.
#[derive(Debug, Clone)]
pub struct Blinker {
    config: LivenessConfig,
    lit: bool,
}

impl Blinker {
    pub fn new(config: LivenessConfig) -> Self {
        Self { config, lit: false }
    }

    pub fn half_period(&self) -> Duration {
        Duration::from_millis(self.config.half_period_ms)
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    pub fn set<P: IndicatorPin + ?Sized>(&mut self, pin: &mut P, lit: bool) -> Result<(), PinError> {
        pin.set_high(lit != self.config.active_low)?;
        self.lit = lit;
        Ok(())
    }

    pub fn toggle<P: IndicatorPin + ?Sized>(&mut self, pin: &mut P) -> Result<bool, PinError> {
        let next = !self.lit;
        self.set(pin, next)?;
        Ok(next)
    }
}
