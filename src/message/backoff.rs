use std::{iter::Take, time::Duration};

/// An infinite stream of back-off durations, growing by an exponential
/// factor up to some maximum delay. Upon reaching the maximum the stream
/// keeps returning it. Used by the TCP transport to pace reconnect
/// attempts; the sleeps are blocking, so this is not for async code.
pub struct ExponentialBackoff {
    curr: Duration,
    max: Duration,
    factor: u32,
}

impl ExponentialBackoff {
    pub fn new(start: Duration, max: Duration, factor: u32) -> ExponentialBackoff {
        ExponentialBackoff {
            curr: start,
            max,
            factor,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.curr;
        let grown = self.curr * self.factor;
        self.curr = if grown > self.max { self.max } else { grown };
        Some(delay)
    }
}

/// Protocol for retrying a fallible function until it succeeds or the
/// underlying iterator of delays runs out. The `sleep` closure runs after
/// every failed attempt but the last, and sees the error so callers can log
/// it before waiting.
pub trait Retry {
    fn retry<F, S, T, E>(&mut self, mut f: F, sleep: S) -> Option<Result<T, E>>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&E, Duration),
        Self: Iterator<Item = Duration> + Sized,
    {
        let mut last_err = None;
        let mut delays = self.peekable();
        loop {
            match delays.next() {
                Some(delay) => match f() {
                    Ok(v) => return Some(Ok(v)),
                    Err(e) => {
                        if delays.peek().is_some() {
                            sleep(&e, delay);
                        }
                        last_err = Some(Err(e));
                    }
                },
                None => return last_err,
            }
        }
    }
}

impl Retry for ExponentialBackoff {}

impl Retry for Take<ExponentialBackoff> {}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{ExponentialBackoff, Retry};
    use std::time::Duration;

    #[test]
    fn delays_grow_to_the_cap() {
        let delays: Vec<_> = ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
            2,
        )
        .take(5)
        .collect();
        assert_eq!(
            delays,
            [10, 20, 40, 50, 50]
                .iter()
                .map(|&ms| Duration::from_millis(ms))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn retry_stops_on_first_success() {
        let mut attempts = 0;
        let result = ExponentialBackoff::new(
            Duration::from_millis(1),
            Duration::from_millis(1),
            2,
        )
        .take(10)
        .retry(
            || {
                attempts += 1;
                if attempts == 3 {
                    Ok(attempts)
                } else {
                    Err("not yet")
                }
            },
            |_, _| {},
        );
        assert_eq!(result, Some(Ok(3)));
    }
}
