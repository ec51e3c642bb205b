//! Foreground coloring for terminal output.
//!
//! Colors can be switched off process-wide with [`set_enabled`], in which case
//! [`WithFg`] renders its value unchanged. Width, fill and alignment flags of
//! the surrounding format string are applied to the wrapped value, so colored
//! cells still line up in tables.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turns escape sequences on or off for every [`WithFg`] rendered afterwards.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

#[must_use]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    DarkGray,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    Default,
}

impl Color {
    fn fg(self) -> u8 {
        match self {
            Self::DarkGray => 90,
            Self::Red => 31,
            Self::Green => 32,
            Self::Yellow => 33,
            Self::Blue => 34,
            Self::Magenta => 35,
            Self::Cyan => 36,
            Self::Default => 39,
        }
    }
}

pub struct WithFg<T>(Color, T);

impl<T> fmt::Display for WithFg<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !is_enabled() {
            return fmt::Display::fmt(&self.1, f);
        }
        write!(f, "\x1B[{};1m", self.0.fg())?;
        fmt::Display::fmt(&self.1, f)?;
        write!(f, "\x1B[0m")
    }
}

impl<T> WithFg<T> {
    pub fn new(color: Color, value: T) -> Self {
        Self(color, value)
    }
}
