//! Exponential backoff with jitter for blob store I/O (spec §4.1): base 1s,
//! doubling, cap 16s, max 5 attempts. Only `Transient`-classified errors are
//! retried.

use std::time::Duration;

use crate::error::{ErrorClass, VaultError};

pub const BASE_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(16);
pub const MAX_ATTEMPTS: u32 = 5;

fn jittered_delay(attempt: u32) -> Duration {
    let exp = BASE_DELAY.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = std::cmp::min(exp, MAX_DELAY);
    let mut byte = [0u8; 1];
    // best-effort jitter; a failure to fill it just means no jitter this round
    let _ = openssl::rand::rand_bytes(&mut byte);
    let jitter_frac = byte[0] as f64 / 255.0;
    capped.mul_f64(0.5 + 0.5 * jitter_frac)
}

/// Runs `op` up to [`MAX_ATTEMPTS`] times, sleeping with jittered exponential
/// backoff between attempts, stopping early on any non-transient error.
pub fn with_retry<T>(mut op: impl FnMut(u32) -> Result<T, VaultError>) -> Result<T, VaultError> {
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(err) if err.class() == ErrorClass::Transient && attempt + 1 < MAX_ATTEMPTS => {
                log::warn!("transient error on attempt {}: {} (retrying)", attempt + 1, err);
                std::thread::sleep(jittered_delay(attempt));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Async variant for blob store I/O driven from a tokio context.
pub async fn with_retry_async<T, F, Fut>(mut op: F) -> Result<T, VaultError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, VaultError>>,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(err) if err.class() == ErrorClass::Transient && attempt + 1 < MAX_ATTEMPTS => {
                log::warn!("transient error on attempt {}: {} (retrying)", attempt + 1, err);
                tokio::time::sleep(jittered_delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn retries_transient_then_succeeds() {
        let attempts = RefCell::new(0);
        let result = with_retry(|_| {
            *attempts.borrow_mut() += 1;
            if *attempts.borrow() < 3 {
                Err(VaultError::Transient("boom".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(*attempts.borrow(), 3);
    }

    #[test]
    fn does_not_retry_data_errors() {
        let attempts = RefCell::new(0);
        let result: Result<(), VaultError> = with_retry(|_| {
            *attempts.borrow_mut() += 1;
            Err(VaultError::Data {
                message: "bad".into(),
                chunk_id: Some(1),
            })
        });
        assert!(result.is_err());
        assert_eq!(*attempts.borrow(), 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let attempts = RefCell::new(0);
        let result: Result<(), VaultError> = with_retry(|_| {
            *attempts.borrow_mut() += 1;
            Err(VaultError::Transient("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(*attempts.borrow(), MAX_ATTEMPTS);
    }
}
