// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types
//!
//! Only machine *setup* is fallible: unknown component names, missing
//! resources, controllers that refuse to initialize, malformed cart or
//! BIOS images. Once `machine_init` has returned successfully nothing in
//! the run loop produces an error: unmapped bus accesses, FIFO overruns
//! and progress violations are rate-limited warnings, because crashing on
//! guest misbehaviour would let a buggy ROM take the emulator down.

use thiserror::Error;

/// Emulator error type
///
/// Covers every failure that can abort machine setup. See the module
/// documentation for the split between errors and run-time warnings.
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// A machine, controller or CPU name was not found in its registry
    #[error("component \"{0}\" not recognized")]
    NotFound(String),

    /// A required resource is missing from an instance's resource vector
    #[error("resource \"{0}\" not found")]
    Resource(String),

    /// A controller or CPU failed to initialize
    #[error("\"{name}\" failed to initialize: {reason}")]
    InitFailure { name: String, reason: String },

    /// A cart or BIOS image has an invalid header or size
    #[error("malformed image: {0}")]
    MalformedImage(String),

    /// Underlying file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// A frontend could not be created or initialized
    #[error("frontend error: {0}")]
    Frontend(String),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, EmulatorError>;

impl EmulatorError {
    /// Wrap an error as an init failure of the named component
    ///
    /// Used by the machine when a controller's `init` hook fails, so the
    /// report carries the controller name alongside the root cause.
    pub fn init_failure(name: &str, source: &EmulatorError) -> Self {
        EmulatorError::InitFailure {
            name: name.to_string(),
            reason: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = EmulatorError::NotFound("vdp2".into());
        assert_eq!(err.to_string(), "component \"vdp2\" not recognized");
    }

    #[test]
    fn test_resource_display() {
        let err = EmulatorError::Resource("clk".into());
        assert_eq!(err.to_string(), "resource \"clk\" not found");
    }

    #[test]
    fn test_init_failure_wraps_cause() {
        let cause = EmulatorError::Resource("irq".into());
        let err = EmulatorError::init_failure("apu", &cause);
        assert!(err.to_string().contains("apu"));
        assert!(err.to_string().contains("irq"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EmulatorError = io.into();
        assert!(matches!(err, EmulatorError::Io(_)));
    }
}
