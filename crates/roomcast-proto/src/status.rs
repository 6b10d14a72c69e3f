//! Termination categories.
//!
//! A rejected request ends the whole channel. The category tells clients
//! whether rejoining on a new connection can help (`Precondition`,
//! `NotFound`) or the request itself is wrong (`Validation`, `Conflict`).

use std::fmt;

/// Stable classification of channel-terminating failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Request is malformed or missing required data
    Validation,
    /// Request conflicts with existing state (duplicate join)
    Conflict,
    /// Target room does not exist
    NotFound,
    /// Request is out of sequence for the session state
    Precondition,
    /// Client went away or the server is shutting down
    Cancelled,
    /// Unexpected server-side failure
    Internal,
}

impl ErrorCategory {
    /// Application close code carried in the QUIC `CONNECTION_CLOSE` frame.
    ///
    /// Code 0 is reserved for normal completion.
    pub const fn code(self) -> u32 {
        match self {
            Self::Validation => 1,
            Self::Conflict => 2,
            Self::NotFound => 3,
            Self::Precondition => 4,
            Self::Cancelled => 5,
            Self::Internal => 6,
        }
    }

    /// Inverse of [`Self::code`]. `None` for 0 and unknown codes.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Validation),
            2 => Some(Self::Conflict),
            3 => Some(Self::NotFound),
            4 => Some(Self::Precondition),
            5 => Some(Self::Cancelled),
            6 => Some(Self::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not found",
            Self::Precondition => "precondition",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}
