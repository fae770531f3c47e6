// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Construction parameters for an [`crate::client::facade::ExchangeClient`].
///
/// Fixes `{max_buffered_bytes, max_response_size,
/// concurrent_request_multiplier, min_error_duration, max_error_duration}`
/// for the lifetime of the client, per the façade's construction contract.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExchangeClientConfig {
    /// Buffering and concurrency knobs.
    pub buffer: BufferConfig,
    /// Per-endpoint HTTP sub-client retry envelope.
    pub retry: RetryConfig,
    /// Runtime-only settings that don't affect protocol behavior.
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Buffering and adaptive-concurrency parameters (spec §6 Configuration).
pub struct BufferConfig {
    #[serde(rename = "MaxBufferedBytes")]
    /// Backpressure threshold: total retained bytes allowed in the queue.
    pub max_buffered_bytes: u64,

    #[serde(rename = "MaxResponseSize")]
    /// Per-request cap handed to each sub-client.
    pub max_response_size: u64,

    #[serde(rename = "ConcurrentRequestMultiplier")]
    /// Integer scale on target parallelism (§4.5 step 5).
    pub concurrent_request_multiplier: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Sub-client retry envelope (bounds, not policy — the policy itself is the
/// sub-client's responsibility).
pub struct RetryConfig {
    #[serde(rename = "MinErrorDuration", with = "serde_secs")]
    /// Initial backoff after a transient per-request failure.
    pub min_error_duration: Duration,

    #[serde(rename = "MaxErrorDuration", with = "serde_secs")]
    /// Ceiling on backoff growth before the sub-client gives up and
    /// escalates via `client_failed`.
    pub max_error_duration: Duration,

    #[serde(rename = "MaxErrorRetries", default = "default_max_error_retries")]
    /// Number of per-request retries attempted before escalating.
    pub max_error_retries: u32,
}

fn default_max_error_retries() -> u32 {
    5
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings that do not map to the spec's core contract.
pub struct RuntimeConfig {
    #[serde(rename = "PollTimeout", with = "serde_millis")]
    /// Default `max_wait` used by the demo binary's polling loop.
    pub poll_timeout: Duration,
}

impl ExchangeClientConfig {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: ExchangeClientConfig =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.buffer.max_buffered_bytes > 0,
            "MaxBufferedBytes must be > 0"
        );
        ensure!(
            self.buffer.max_response_size > 0,
            "MaxResponseSize must be > 0"
        );
        ensure!(
            self.buffer.concurrent_request_multiplier > 0,
            "ConcurrentRequestMultiplier must be > 0"
        );
        ensure!(
            self.retry.min_error_duration <= self.retry.max_error_duration,
            "MinErrorDuration must be <= MaxErrorDuration"
        );
        if self.retry.max_error_retries == 0 {
            self.retry.max_error_retries = default_max_error_retries();
        }
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Serde helpers for representing `Duration` as a number of milliseconds.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
