use std::thread;
use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use log::warn;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, header};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::error::UpstreamError;

/// One client per run, shared by reference across all worker threads.
pub fn build_client(config: &Config) -> Result<Client> {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.request_timeout())
        .build()
        .wrap_err("failed to build http client")
}

/// Sends the request and decodes a JSON body, mapping statuses onto [`UpstreamError`].
pub fn get_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, UpstreamError> {
    let response = request.send().map_err(UpstreamError::from_reqwest)?;
    match response.status() {
        status if status.is_success() => response.json().map_err(UpstreamError::from_reqwest),
        StatusCode::NOT_FOUND => Err(UpstreamError::NotFound),
        StatusCode::TOO_MANY_REQUESTS => Err(UpstreamError::Throttled {
            retry_after: response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs),
        }),
        status => Err(UpstreamError::Status(status.as_u16())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, retry: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. Returns the attempt count alongside the last error.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, UpstreamError>,
    ) -> Result<T, (u32, UpstreamError)> {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry < self.max_retries => {
                    let mut delay = self.delay(retry);
                    if let UpstreamError::Throttled {
                        retry_after: Some(after),
                    } = &err
                    {
                        delay = delay.max(*after).min(self.max);
                    }
                    retry += 1;
                    warn!(
                        "{what}: {err} (retry {retry}/{}), backing off {}ms",
                        self.max_retries,
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err((retry + 1, err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay(40), Duration::from_millis(1_000));
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let mut calls = 0;
        let result = instant().run("item", || {
            calls += 1;
            if calls < 3 {
                Err(UpstreamError::Throttled { retry_after: None })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn gives_up_after_retry_budget() {
        let mut calls = 0;
        let result: Result<(), _> = instant().run("item", || {
            calls += 1;
            Err(UpstreamError::Timeout)
        });
        assert_eq!(calls, 4);
        assert_eq!(result, Err((4, UpstreamError::Timeout)));
    }

    #[test]
    fn does_not_retry_permanent_errors() {
        let mut calls = 0;
        let result: Result<(), _> = instant().run("item", || {
            calls += 1;
            Err(UpstreamError::NotFound)
        });
        assert_eq!(calls, 1);
        assert_eq!(result, Err((1, UpstreamError::NotFound)));
    }
}
