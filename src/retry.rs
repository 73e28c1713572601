use crate::{
    error::{Error, Result},
    token::CancelToken,
};
use log::warn;
use std::{thread, time::Duration};

pub const MAX_ATTEMPTS: u8 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Runs `op` up to [`MAX_ATTEMPTS`] times with a fixed inter-attempt delay.
///
/// Only transient (network) failures are re-attempted; crypto and parse
/// errors are deterministic and returned immediately. The cancel token is
/// polled before every attempt, so a pending cancellation is honoured
/// without issuing another request.
pub fn retry<T>(token: &CancelToken, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut last_err = Error::Cancelled;

    for attempt in 1..=MAX_ATTEMPTS {
        token.check()?;

        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!("{} (retry {}/{})", e, attempt, MAX_ATTEMPTS);
                last_err = e;
                thread::sleep(RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn transient() -> Error {
        // reqwest errors cannot be constructed directly; a guaranteed-bad
        // builder call produces one without touching the network.
        let err = reqwest::blocking::Client::builder()
            .https_only(true)
            .build()
            .and_then(|c| c.get("ftp://invalid").send())
            .unwrap_err();
        Error::Network(err)
    }

    #[test]
    fn first_success_is_single_invocation() {
        let calls = Cell::new(0_u32);
        let token = CancelToken::new();

        let out = retry(&token, || {
            calls.set(calls.get() + 1);
            Ok(42)
        });

        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn transient_then_success_is_failures_plus_one() {
        let calls = Cell::new(0_u32);
        let token = CancelToken::new();

        let out = retry(&token, || {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(transient())
            } else {
                Ok("ok")
            }
        });

        assert_eq!(out.unwrap(), "ok");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn exhausts_at_max_attempts() {
        let calls = Cell::new(0_u32);
        let token = CancelToken::new();

        let out: Result<()> = retry(&token, || {
            calls.set(calls.get() + 1);
            Err(transient())
        });

        assert!(matches!(out, Err(Error::Network(_))));
        assert_eq!(calls.get(), u32::from(MAX_ATTEMPTS));
    }

    #[test]
    fn deterministic_errors_are_not_retried() {
        let calls = Cell::new(0_u32);
        let token = CancelToken::new();

        let out: Result<()> = retry(&token, || {
            calls.set(calls.get() + 1);
            Err(Error::Crypto("bad padding".to_owned()))
        });

        assert!(matches!(out, Err(Error::Crypto(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let token = CancelToken::new();
        token.cancel();

        let out: Result<()> = retry(&token, || panic!("must not be invoked"));
        assert!(matches!(out, Err(Error::Cancelled)));
    }
}
