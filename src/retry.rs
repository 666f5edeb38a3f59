//! Failure Recovery Policy (C5): classifies one HTTP outcome into a
//! [`Disposition`] and computes the backoff delay for transient failures
//! (spec §4.3, §7).
//!
//! Classification and delay computation are both pure functions of their
//! inputs — no hidden clock reads, no jitter — so the whole policy is
//! deterministic and unit-testable without sleeping (spec's resolved design
//! decision: no jitter, for reproducible tests).

use std::time::Duration;

use crate::config::NetworkRecovery;
use crate::error::{Error, RetryStrategy};
use crate::events::parse_retry_after;
use crate::transport::RawResponse;

/// What the request pipeline should do next with one response/error.
#[derive(Debug)]
pub enum Disposition {
    /// Hand the response back to the caller as-is.
    Return,
    /// Retry after invalidating the cached token and re-acquiring one.
    RetryWithFreshToken,
    /// Retry after the given delay (rate limit or transient failure).
    RetryAfter(Duration),
    /// Give up and surface this error; retries are exhausted or the failure
    /// is not retryable at all.
    Fail(Error),
}

/// Per-call retry budgets, decremented by the pipeline as attempts are spent
/// (spec §4.3: auth gets exactly one retry; rate limit and network each get
/// their own counters).
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    pub auth_retries_remaining: u32,
    pub rate_limit_retries_remaining: u32,
    pub network_retries_remaining: u32,
}

impl RetryBudget {
    pub fn new(max_rate_limit_retries: u32, max_network_retries: u32) -> Self {
        RetryBudget {
            auth_retries_remaining: 1,
            rate_limit_retries_remaining: max_rate_limit_retries,
            network_retries_remaining: max_network_retries,
        }
    }
}

/// Classifies a successful-transport response (status + headers already
/// known) into a disposition, spending budget as it decides to retry.
pub fn classify_response(
    response: &RawResponse,
    attempt: u32,
    budget: &mut RetryBudget,
    recovery: &NetworkRecovery,
) -> Disposition {
    if response.is_success() {
        return Disposition::Return;
    }

    match response.status {
        401 => {
            if budget.auth_retries_remaining > 0 {
                budget.auth_retries_remaining -= 1;
                Disposition::RetryWithFreshToken
            } else {
                Disposition::Fail(Error::HttpError {
                    status: response.status,
                    body: String::from_utf8_lossy(&response.body).to_string(),
                })
            }
        }
        429 => {
            match response.header("retry-after").and_then(parse_retry_after) {
                Some(delay) => {
                    if budget.rate_limit_retries_remaining == 0 {
                        return Disposition::Fail(Error::RateLimited {
                            retry_after: Some(delay),
                        });
                    }
                    budget.rate_limit_retries_remaining -= 1;
                    Disposition::RetryAfter(delay)
                }
                // No Retry-After header: treated as transient, per spec §4.3.
                None => {
                    if budget.network_retries_remaining == 0 {
                        return Disposition::Fail(Error::HttpError {
                            status: response.status,
                            body: String::from_utf8_lossy(&response.body).to_string(),
                        });
                    }
                    budget.network_retries_remaining -= 1;
                    Disposition::RetryAfter(backoff_delay(attempt, recovery))
                }
            }
        }
        status if recovery.retryable_status_codes.contains(&status) => {
            if budget.network_retries_remaining == 0 {
                return Disposition::Fail(Error::HttpError {
                    status,
                    body: String::from_utf8_lossy(&response.body).to_string(),
                });
            }
            budget.network_retries_remaining -= 1;
            Disposition::RetryAfter(backoff_delay(attempt, recovery))
        }
        status => Disposition::Fail(Error::HttpError {
            status,
            body: String::from_utf8_lossy(&response.body).to_string(),
        }),
    }
}

/// Classifies a transport-level error (connection refused, timeout, DNS
/// failure) — these never carry a status code, so they always fall into the
/// transient/network bucket.
pub fn classify_transport_error(
    error: Error,
    attempt: u32,
    budget: &mut RetryBudget,
    recovery: &NetworkRecovery,
) -> Disposition {
    if !error.retryable() || error.suggested_strategy() != RetryStrategy::Transient {
        return Disposition::Fail(error);
    }
    if budget.network_retries_remaining == 0 {
        return Disposition::Fail(error);
    }
    budget.network_retries_remaining -= 1;
    Disposition::RetryAfter(backoff_delay(attempt, recovery))
}

/// `base * 2^attempt`, capped at `max_retry_delay` when set. No jitter: the
/// same `(attempt, recovery)` pair always yields the same delay.
pub fn backoff_delay(attempt: u32, recovery: &NetworkRecovery) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(20));
    let delay = recovery
        .base_retry_delay
        .saturating_mul(factor);
    match recovery.max_retry_delay {
        Some(cap) if delay > cap => cap,
        _ => delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> RawResponse {
        RawResponse {
            status,
            headers: Default::default(),
            body: bytes::Bytes::new(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let recovery = NetworkRecovery {
            max_network_retries: 5,
            base_retry_delay: Duration::from_millis(100),
            max_retry_delay: Some(Duration::from_millis(500)),
            retryable_status_codes: (500..=599).collect(),
        };
        assert_eq!(backoff_delay(0, &recovery), Duration::from_millis(100));
        assert_eq!(backoff_delay(1, &recovery), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, &recovery), Duration::from_millis(400));
        assert_eq!(backoff_delay(3, &recovery), Duration::from_millis(500));
    }

    #[test]
    fn unauthorized_spends_auth_budget_once() {
        let recovery = NetworkRecovery::default();
        let mut budget = RetryBudget::new(1, 3);
        let disposition = classify_response(&response(401), 0, &mut budget, &recovery);
        assert!(matches!(disposition, Disposition::RetryWithFreshToken));
        assert_eq!(budget.auth_retries_remaining, 0);

        let disposition = classify_response(&response(401), 1, &mut budget, &recovery);
        assert!(matches!(disposition, Disposition::Fail(Error::HttpError { status: 401, .. })));
    }

    #[test]
    fn rate_limited_without_header_is_treated_as_transient() {
        let recovery = NetworkRecovery::default();
        let mut budget = RetryBudget::new(2, 3);
        let disposition = classify_response(&response(429), 0, &mut budget, &recovery);
        assert!(matches!(disposition, Disposition::RetryAfter(_)));
        assert_eq!(budget.rate_limit_retries_remaining, 2);
        assert_eq!(budget.network_retries_remaining, 2);
    }

    #[test]
    fn rate_limited_with_header_consumes_rate_limit_budget_and_surfaces_retry_after() {
        let recovery = NetworkRecovery::default();
        let mut budget = RetryBudget::new(1, 3);
        let response = RawResponse {
            status: 429,
            headers: [("retry-after".to_string(), "1".to_string())]
                .into_iter()
                .collect(),
            body: bytes::Bytes::new(),
        };
        let disposition = classify_response(&response, 0, &mut budget, &recovery);
        assert!(matches!(disposition, Disposition::RetryAfter(d) if d == Duration::from_secs(1)));
        assert_eq!(budget.rate_limit_retries_remaining, 0);

        let disposition = classify_response(&response, 1, &mut budget, &recovery);
        assert!(matches!(
            disposition,
            Disposition::Fail(Error::RateLimited {
                retry_after: Some(d)
            }) if d == Duration::from_secs(1)
        ));
    }

    #[test]
    fn server_error_is_retryable_until_budget_exhausted() {
        let recovery = NetworkRecovery::default();
        let mut budget = RetryBudget::new(1, 1);
        let disposition = classify_response(&response(503), 0, &mut budget, &recovery);
        assert!(matches!(disposition, Disposition::RetryAfter(_)));
        let disposition = classify_response(&response(503), 1, &mut budget, &recovery);
        assert!(matches!(disposition, Disposition::Fail(_)));
    }

    #[test]
    fn client_error_is_not_retryable() {
        let recovery = NetworkRecovery::default();
        let mut budget = RetryBudget::new(1, 3);
        let disposition = classify_response(&response(404), 0, &mut budget, &recovery);
        assert!(matches!(disposition, Disposition::Fail(Error::HttpError { status: 404, .. })));
    }
}
