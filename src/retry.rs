// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Retry and backoff policy for transient failures

use rand::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

/// Exponential backoff with decorrelated jitter
///
/// Each delay is drawn uniformly from `init_backoff..previous * base` and then
/// capped at `max_backoff`.
///
/// <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
#[allow(missing_copy_implementations)]
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// The initial backoff duration
    pub init_backoff: Duration,
    /// The maximum backoff duration
    pub max_backoff: Duration,
    /// The base of the exponential to use
    pub base: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(15),
            base: 2.,
        }
    }
}

/// The state of an in-progress backoff
pub(crate) struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
    rng: Option<Box<dyn RngCore + Sync + Send>>,
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("init_backoff", &self.init_backoff)
            .field("next_backoff_secs", &self.next_backoff_secs)
            .field("max_backoff_secs", &self.max_backoff_secs)
            .field("base", &self.base)
            .finish()
    }
}

impl Backoff {
    pub(crate) fn new(config: &BackoffConfig) -> Self {
        Self::new_with_rng(config, None)
    }

    pub(crate) fn new_with_rng(
        config: &BackoffConfig,
        rng: Option<Box<dyn RngCore + Sync + Send>>,
    ) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
            rng,
        }
    }

    /// Returns the next backoff duration to wait for
    pub(crate) fn next(&mut self) -> Duration {
        let upper = (self.next_backoff_secs * self.base).max(self.init_backoff);
        // Very large bases overflow, cap the range so it can still be sampled
        let upper = match upper.is_finite() {
            true => upper,
            false => self.max_backoff_secs.max(self.init_backoff),
        };
        let rand_backoff = match upper > self.init_backoff {
            false => self.init_backoff,
            true => {
                let range = self.init_backoff..upper;
                match self.rng.as_mut() {
                    Some(rng) => rng.gen_range(range),
                    None => thread_rng().gen_range(range),
                }
            }
        };

        let next_backoff = self.max_backoff_secs.min(rand_backoff);
        Duration::from_secs_f64(std::mem::replace(&mut self.next_backoff_secs, next_backoff))
    }
}

/// Contains the configuration for how to respond to transient failures
///
/// Failed sub-operations are retried up to `max_retries` times without
/// progress, using exponential backoff with jitter, see [`BackoffConfig`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// The backoff configuration
    pub backoff: BackoffConfig,

    /// The maximum number of consecutive retries without progress
    ///
    /// Set to 0 to disable retries
    pub max_retries: usize,

    /// The maximum length of time from the first failure after which no
    /// further retries will be attempted
    pub retry_timeout: Duration,

    /// An upper bound on the duration of a single underlying request, or of
    /// waiting for the next chunk of a response body
    ///
    /// An elapsed timeout is treated as a transient failure
    pub request_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: Default::default(),
            max_retries: 10,
            retry_timeout: Duration::from_secs(3 * 60),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Tracks consecutive failures of a logical operation against a [`RetryConfig`]
#[derive(Debug)]
pub(crate) struct Retry {
    backoff: Backoff,
    backoff_config: BackoffConfig,
    retries: usize,
    max_retries: usize,
    retry_timeout: Duration,
    first_failure: Option<Instant>,
}

impl Retry {
    pub(crate) fn new(config: &RetryConfig) -> Self {
        Self {
            backoff: Backoff::new(&config.backoff),
            backoff_config: config.backoff.clone(),
            retries: 0,
            max_retries: config.max_retries,
            retry_timeout: config.retry_timeout,
            first_failure: None,
        }
    }

    /// The number of retries performed since the last call to [`Self::reset`]
    pub(crate) fn retries(&self) -> usize {
        self.retries
    }

    /// The maximum number of consecutive retries
    pub(crate) fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Records a failure, returning the delay before the next attempt, or
    /// `None` if retries are exhausted
    pub(crate) fn next_attempt(&mut self) -> Option<Duration> {
        let first_failure = *self.first_failure.get_or_insert_with(Instant::now);
        if self.retries >= self.max_retries || first_failure.elapsed() > self.retry_timeout {
            return None;
        }
        self.retries += 1;
        Some(self.backoff.next())
    }

    /// Records progress, resetting the retry budget
    pub(crate) fn reset(&mut self) {
        if self.first_failure.take().is_some() {
            self.retries = 0;
            self.backoff = Backoff::new(&self.backoff_config);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_backoff() {
        let init_backoff_secs = 1.;
        let max_backoff_secs = 500.;
        let base = 3.;

        let config = BackoffConfig {
            init_backoff: Duration::from_secs_f64(init_backoff_secs),
            max_backoff: Duration::from_secs_f64(max_backoff_secs),
            base,
        };

        let assert_fuzzy_eq = |a: f64, b: f64| assert!((b - a).abs() < 0.0001, "{a} != {b}");

        // Create a static rng that takes the minimum of the range
        let rng = Box::new(StepRng::new(0, 0));
        let mut backoff = Backoff::new_with_rng(&config, Some(rng));

        for _ in 0..20 {
            assert_eq!(backoff.next().as_secs_f64(), init_backoff_secs);
        }

        // Create a static rng that takes the maximum of the range
        let rng = Box::new(StepRng::new(u64::MAX, 0));
        let mut backoff = Backoff::new_with_rng(&config, Some(rng));

        for i in 0..20 {
            let value = (base.powi(i) * init_backoff_secs).min(max_backoff_secs);
            assert_fuzzy_eq(backoff.next().as_secs_f64(), value);
        }

        // Create a static rng that takes the mid point of the range
        let rng = Box::new(StepRng::new(u64::MAX / 2, 0));
        let mut backoff = Backoff::new_with_rng(&config, Some(rng));

        let mut value = init_backoff_secs;
        for _ in 0..20 {
            assert_fuzzy_eq(backoff.next().as_secs_f64(), value);
            value =
                (init_backoff_secs + (value * base - init_backoff_secs) / 2.).min(max_backoff_secs);
        }
    }

    #[test]
    fn test_backoff_huge_base() {
        let config = BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(15),
            base: f64::MAX,
        };
        let mut backoff = Backoff::new(&config);
        for _ in 0..10 {
            let next = backoff.next();
            assert!(next >= config.init_backoff, "{next:?}");
            assert!(next <= config.max_backoff, "{next:?}");
        }
    }

    #[test]
    fn test_retry_budget() {
        let config = RetryConfig {
            max_retries: 3,
            ..Default::default()
        };
        let mut retry = Retry::new(&config);

        for expected in 1..=3 {
            assert!(retry.next_attempt().is_some());
            assert_eq!(retry.retries(), expected);
        }
        assert!(retry.next_attempt().is_none());
        assert_eq!(retry.retries(), 3);

        retry.reset();
        assert_eq!(retry.retries(), 0);
        assert!(retry.next_attempt().is_some());

        let disabled = RetryConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(Retry::new(&disabled).next_attempt().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timeout() {
        let config = RetryConfig {
            retry_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let mut retry = Retry::new(&config);
        assert!(retry.next_attempt().is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(retry.next_attempt().is_none());
    }
}
