use std::time::Duration;

use log::*;

use commons_error::*;
use dkconfig::RetryConfig;

/// Exponential backoff with jitter, only transient backend errors are retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

/// The last error once every attempt has failed
#[derive(Debug)]
pub struct RetryExhausted {
    pub error: BackendError,
    pub attempts: u32,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// The delay plus a random jitter, never above the maximum delay
    fn jittered(&self, delay_ms: u64) -> u64 {
        let jitter = rand::random::<u64>() % delay_ms.max(1);
        delay_ms.saturating_add(jitter).min(self.max_delay_ms)
    }

    pub fn run<T>(
        &self,
        op_name: &str,
        backend_name: &str,
        mut f: impl FnMut() -> Result<T, BackendError>,
    ) -> Result<T, RetryExhausted> {
        let mut delay_ms = self.base_delay_ms;
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                std::thread::sleep(Duration::from_millis(self.jittered(delay_ms)));
                delay_ms = delay_ms.saturating_mul(2).min(self.max_delay_ms);
            }
            attempt += 1;
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    log_warn!(
                        "Transient error, retrying, op=[{}], backend=[{}], attempt=[{}/{}], e=[{}]",
                        op_name,
                        backend_name,
                        attempt,
                        self.max_retries + 1,
                        e
                    );
                }
                Err(e) => {
                    return Err(RetryExhausted {
                        error: e,
                        attempts: attempt,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn transient_errors_are_retried() {
        let calls = Cell::new(0);
        let r = fast(3).run("put", "gdrive", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(BackendError::transient("gdrive", "timeout"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(42, r.unwrap());
        assert_eq!(3, calls.get());
    }

    #[test]
    fn retries_are_bounded() {
        let calls = Cell::new(0);
        let r: Result<(), _> = fast(2).run("put", "gdrive", || {
            calls.set(calls.get() + 1);
            Err(BackendError::transient("gdrive", "timeout"))
        });
        let e = r.unwrap_err();
        assert_eq!(3, e.attempts);
        assert_eq!(3, calls.get());
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let r: Result<(), _> = fast(5).run("put", "gdrive", || {
            calls.set(calls.get() + 1);
            Err(BackendError::permanent("gdrive", "quota exceeded"))
        });
        assert_eq!(1, r.unwrap_err().attempts);
        assert_eq!(1, calls.get());
    }

    #[test]
    fn delay_stays_under_the_maximum() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 150,
        };
        for _ in 0..200 {
            let d = policy.jittered(100);
            assert!((100..=150).contains(&d), "{}", d);
        }

        let huge = RetryPolicy {
            max_retries: 3,
            base_delay_ms: u64::MAX / 2 + 1,
            max_delay_ms: u64::MAX,
        };
        assert!(huge.jittered(u64::MAX / 2 + 1) >= u64::MAX / 2 + 1);
        assert_eq!(u64::MAX, (u64::MAX / 2 + 1).saturating_mul(2).min(huge.max_delay_ms));
    }
}
