/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::env;
use std::time::Duration;

/// Enum for supported configuration parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Config {
    LogFormat,
    QueueCapacity,
    StatusTimeout,
    RequeueDelay,
    QuotaRequeueDelay,
}

impl Config {
    /// Returns the associated environment variable for the config parameter.
    pub fn env_var(&self) -> &'static str {
        match self {
            Config::LogFormat => "FDBKUBE_LOG_FORMAT",
            Config::QueueCapacity => "FDBKUBE_QUEUE_CAPACITY",
            Config::StatusTimeout => "FDBKUBE_STATUS_TIMEOUT_SECS",
            Config::RequeueDelay => "FDBKUBE_REQUEUE_DELAY_SECS",
            Config::QuotaRequeueDelay => "FDBKUBE_QUOTA_REQUEUE_DELAY_SECS",
        }
    }

    /// Returns the value used when the environment variable is unset or blank.
    pub fn default_value(&self) -> &'static str {
        match self {
            Config::LogFormat => "text",
            Config::QueueCapacity => "256",
            Config::StatusTimeout => "10",
            Config::RequeueDelay => "2",
            Config::QuotaRequeueDelay => "60",
        }
    }

    /// Returns the effective value, either from environment or default.
    pub fn get_value(&self) -> String {
        env::var(self.env_var())
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.default_value().to_string())
    }

    /// Parses the effective value as a whole number of seconds.
    ///
    /// Values that fail to parse fall back to the default so a typo in the
    /// environment never disables a timeout.
    pub fn get_duration(&self) -> Duration {
        Duration::from_secs(self.parse_or_default::<u64>())
    }

    pub fn get_usize(&self) -> usize {
        self.parse_or_default::<usize>()
    }

    fn parse_or_default<T>(&self) -> T
    where
        T: std::str::FromStr,
    {
        match self.get_value().parse::<T>() {
            Ok(value) => value,
            Err(_) => self
                .default_value()
                .parse::<T>()
                .unwrap_or_else(|_| unreachable!("invalid default for {}", self.env_var())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = env::var(key).ok();
            env::set_var(key, value);
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match self.previous.as_ref() {
                Some(value) => env::set_var(self.key, value),
                None => env::remove_var(self.key),
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_unset() {
        env::remove_var(Config::StatusTimeout.env_var());
        assert_eq!(Config::StatusTimeout.get_duration(), Duration::from_secs(10));
        assert_eq!(Config::QueueCapacity.get_usize(), 256);
    }

    #[test]
    #[serial]
    fn environment_overrides_default() {
        let _guard = EnvGuard::set(Config::QuotaRequeueDelay.env_var(), " 5 ");
        assert_eq!(
            Config::QuotaRequeueDelay.get_duration(),
            Duration::from_secs(5)
        );
    }

    #[test]
    #[serial]
    fn unparseable_value_falls_back_to_default() {
        let _guard = EnvGuard::set(Config::RequeueDelay.env_var(), "soon");
        assert_eq!(Config::RequeueDelay.get_duration(), Duration::from_secs(2));
    }
}
