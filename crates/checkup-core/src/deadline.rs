//! Caller-supplied deadlines.
//!
//! Every entry point takes a [`Deadline`]. Backends bound each I/O wait by
//! [`Deadline::remaining`] and call [`Deadline::check`] between pages and
//! chunks of long table walks.

use std::time::{Duration, Instant};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline {
  at: Option<Instant>,
}

impl Deadline {
  /// No deadline.
  pub fn none() -> Self { Self { at: None } }

  pub fn after(timeout: Duration) -> Self {
    Self { at: Instant::now().checked_add(timeout) }
  }

  pub fn at(instant: Instant) -> Self { Self { at: Some(instant) } }

  /// Time left, or `None` when unbounded. Zero once passed.
  pub fn remaining(&self) -> Option<Duration> {
    self.at.map(|at| at.saturating_duration_since(Instant::now()))
  }

  pub fn is_expired(&self) -> bool {
    self.remaining().is_some_and(|left| left.is_zero())
  }

  pub fn check(&self) -> Result<()> {
    if self.is_expired() { Err(Error::DeadlineExceeded) } else { Ok(()) }
  }
}
