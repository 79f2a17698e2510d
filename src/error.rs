// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Errors returned by the decode session layer.

use std::fmt;

use thiserror::Error;

use crate::backend::Status;

/// A non-zero status returned by a backend entry point, together with the backend's own
/// description of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverStatus {
    /// Name of the backend entry point that failed.
    pub call: &'static str,
    pub status: Status,
    /// Message returned by the backend's status-to-string facility, unaltered. For a malformed
    /// value returned by a successful call, a description of that value.
    pub message: String,
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {} ({:#x})", self.call, self.message, self.status.0)
    }
}

#[derive(Debug, Error)]
pub enum VaError {
    /// The API was used out of order, or on an object that has already been destroyed.
    #[error("invalid usage: {0}")]
    Usage(String),
    /// A negotiation miss. The caller can try another profile, entrypoint or format.
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("configuration rejected: {0}")]
    Configuration(DriverStatus),
    #[error("resource allocation failed: {0}")]
    ResourceExhausted(DriverStatus),
    #[error("driver error: {0}")]
    Driver(DriverStatus),
    /// The display could not be started or stopped cleanly.
    #[error("display initialization error: {0}")]
    Initialization(DriverStatus),
    /// The backend cannot perform the operation for this object, e.g. it cannot expose a direct
    /// mapping of a surface's storage.
    #[error("operation failed: {0}")]
    OperationFailed(DriverStatus),
    /// The native display handle could not be acquired.
    #[error("failed to acquire native display: {0:#}")]
    Platform(#[source] anyhow::Error),
}

impl VaError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        VaError::Usage(message.into())
    }

    /// Returns the backend status that caused this error, if any.
    pub fn status(&self) -> Option<Status> {
        self.driver_status().map(|s| s.status)
    }

    pub fn driver_status(&self) -> Option<&DriverStatus> {
        match self {
            VaError::Configuration(s)
            | VaError::ResourceExhausted(s)
            | VaError::Driver(s)
            | VaError::Initialization(s)
            | VaError::OperationFailed(s) => Some(s),
            VaError::Usage(_) | VaError::NotSupported(_) | VaError::Platform(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VaError>;
