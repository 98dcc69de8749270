// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors surfaced to callers of the channel group.
///
/// Only caller misuse and store failures propagate. Network failures are
/// absorbed by the channel and never show up here.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel '{0}' is not registered")]
    UnknownChannel(String),
    #[error("channel '{0}' is already registered")]
    DuplicateChannel(String),
    #[error("invalid channel configuration: {0}")]
    InvalidConfiguration(String),
    #[error("channel group has been shut down")]
    ShutDown,
    #[error("channel group service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors emitted by [`LogStore`](crate::store::LogStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The channel partition already holds `capacity` entries.
    #[error("storage for channel '{channel}' is full ({capacity} entries)")]
    Full { channel: String, capacity: usize },
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("corrupted record: {0}")]
    Corrupted(String),
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_into_channel_error() {
        let err: ChannelError = StoreError::Full {
            channel: "crashes".to_string(),
            capacity: 10,
        }
        .into();

        assert!(matches!(err, ChannelError::Store(StoreError::Full { .. })));
        assert_eq!(
            err.to_string(),
            "storage for channel 'crashes' is full (10 entries)"
        );
    }

    #[test]
    fn test_misuse_messages_name_the_channel() {
        assert!(ChannelError::UnknownChannel("analytics".to_string())
            .to_string()
            .contains("analytics"));
        assert!(ChannelError::DuplicateChannel("analytics".to_string())
            .to_string()
            .contains("already registered"));
    }
}
