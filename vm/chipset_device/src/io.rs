// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Result types returned by guest access handlers.

/// An error returned by a guest access handler.
///
/// None of these are fatal to the VM. Callers on the guest path degrade them
/// to the architectural "nothing there" behavior (writes dropped, reads
/// returning all-ones).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoError {
    /// The requested register (or offset) is not implemented.
    InvalidRegister,
    /// The access size is not supported by the target.
    InvalidAccessSize,
    /// The access is not naturally aligned.
    UnalignedAccess,
    /// Nothing decodes the requested address.
    NoResponse,
}

/// The result of a guest access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub enum IoResult {
    /// The access completed.
    Ok,
    /// The access failed.
    Err(IoError),
}

impl IoResult {
    /// Panics if the access failed.
    #[track_caller]
    pub fn unwrap(self) {
        if let IoResult::Err(err) = self {
            panic!("io access failed: {:?}", err);
        }
    }
}

impl From<Result<(), IoError>> for IoResult {
    fn from(value: Result<(), IoError>) -> Self {
        match value {
            Ok(()) => IoResult::Ok,
            Err(err) => IoResult::Err(err),
        }
    }
}
