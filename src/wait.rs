/*
    fluxemu
    A real-time MFM disk drive emulation core.

    Copyright 2025 fluxemu contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/wait.rs

    Cooperative cancellation and bounded polling waits. Hardware-facing waits
    poll shared memory rather than blocking on a signal, because they race
    ongoing coprocessor writes; this module gives those loops a cancellable,
    timeout-aware shape.
*/

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;

/// A shared cancellation flag checked between iterations of the emulator's
/// loops. Cancellation is cooperative: each loop finishes its current
/// iteration, performs bounded cleanup and exits.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("Wait cancelled by shutdown")]
    Cancelled,
    #[error("Wait timed out")]
    TimedOut,
}

/// A bounded polling wait: a fixed sleep interval and an optional overall
/// timeout. Constructed once per concern so tests can substitute fast
/// intervals for the production ones.
#[derive(Copy, Clone, Debug)]
pub struct PollWait {
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl PollWait {
    /// A wait bounded by `timeout`.
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout: Some(timeout),
        }
    }

    /// An unbounded wait, terminated only by readiness or cancellation.
    /// Used for deliberate backpressure waits that must not time out.
    pub const fn forever(interval: Duration) -> Self {
        Self { interval, timeout: None }
    }

    /// Poll `ready` at the configured interval until it returns true.
    pub fn wait_for<F>(&self, token: &CancelToken, mut ready: F) -> Result<(), WaitError>
    where
        F: FnMut() -> bool,
    {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            if ready() {
                return Ok(());
            }
            if token.is_cancelled() {
                return Err(WaitError::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(WaitError::TimedOut);
                }
            }
            thread::sleep(self.interval);
        }
    }

    /// Poll `f` until it yields a value.
    pub fn wait_value<T, F>(&self, token: &CancelToken, mut f: F) -> Result<T, WaitError>
    where
        F: FnMut() -> Option<T>,
    {
        let mut value = None;
        self.wait_for(token, || {
            value = f();
            value.is_some()
        })?;
        // wait_for only returns Ok once the closure stored a value.
        value.ok_or(WaitError::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_for_observes_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let wait = PollWait::forever(Duration::from_micros(10));
        assert_eq!(wait.wait_for(&token, || false), Err(WaitError::Cancelled));
    }

    #[test]
    fn wait_for_times_out() {
        let token = CancelToken::new();
        let wait = PollWait::new(Duration::from_micros(10), Duration::from_millis(1));
        assert_eq!(wait.wait_for(&token, || false), Err(WaitError::TimedOut));
    }

    #[test]
    fn wait_value_returns_first_value() {
        let token = CancelToken::new();
        let wait = PollWait::new(Duration::from_micros(10), Duration::from_secs(1));
        let mut polls = 0;
        let value = wait.wait_value(&token, || {
            polls += 1;
            (polls == 3).then_some(42)
        });
        assert_eq!(value, Ok(42));
        assert_eq!(polls, 3);
    }
}
