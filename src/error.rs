// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Validation and authentication failures surfaced to the originating
/// transport as `{type:"error", message}`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid password format")]
    InvalidPasswordFormat,
    #[error("Too many attempts. Try again in {minutes} minutes")]
    LockedOut { minutes: u64 },
    #[error("Computer not found or offline")]
    ComputerNotFound,
}

/// Reasons trusted-device validation can fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrustedDeviceError {
    #[error("Device not found")]
    NotFound,
    #[error("Device trust expired")]
    Expired,
    #[error("Password changed")]
    PasswordChanged,
}

/// Reasons a session is torn down; mirrored on the wire as
/// `session_expired{reason}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionDestroyReason {
    Expired,
    Manual,
    MaxSessionsExceeded,
    Kicked,
    PasswordChanged,
}

impl SessionDestroyReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::Expired => "Your session has expired due to inactivity",
            Self::Manual => "You have logged out",
            Self::MaxSessionsExceeded => {
                "Maximum number of concurrent sessions exceeded"
            },
            Self::Kicked => "Your session was terminated by another device",
            Self::PasswordChanged => "The password for this computer has changed",
        }
    }
}
