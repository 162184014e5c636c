use std::thread;
use std::time::Duration;
use tracing::debug;

/// Runs `op` up to `retries + 1` times, sleeping `pause` between attempts.
///
/// Only errors for which `is_transient` returns true are retried. The last
/// error is returned once attempts run out.
pub fn with_retries<T, E, F, P>(
    retries: u32,
    pause: Duration,
    is_transient: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retries && is_transient(&err) => {
                attempt += 1;
                debug!(attempt, retries, "transient failure, retrying");
                if !pause.is_zero() {
                    thread::sleep(pause);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Debug, PartialEq)]
    enum Failure {
        Refused,
        Rejected,
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = with_retries(
            2,
            Duration::ZERO,
            |e| *e == Failure::Refused,
            |attempt| {
                calls += 1;
                if attempt < 2 {
                    Err(Failure::Refused)
                } else {
                    Ok(attempt)
                }
            },
        );
        assert_eq!(result, Ok(2));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_retries() {
        let mut calls = 0;
        let result: Result<(), _> = with_retries(2, Duration::ZERO, |_| true, |_| {
            calls += 1;
            Err(Failure::Refused)
        });
        assert_eq!(result, Err(Failure::Refused));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_retries(
            2,
            Duration::from_secs(5),
            |e| *e == Failure::Refused,
            |_| {
                calls += 1;
                Err(Failure::Rejected)
            },
        );
        assert_eq!(result, Err(Failure::Rejected));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_pauses_between_attempts() {
        let start = Instant::now();
        let _: Result<(), Failure> =
            with_retries(2, Duration::from_millis(20), |_| true, |_| Err(Failure::Refused));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
