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

//! Input backends
//!
//! Only the headless `null` backend is bundled; a windowed embedder
//! supplies its own [`InputFrontend`] translating host events into the
//! core taxonomy. Tests bypass frontends entirely and report events
//! straight into the listener registry.

use crate::core::error::Result;
use crate::core::input::InputEvent;
use crate::frontend::InputFrontend;

/// Backend that never produces events
pub struct NullInput;

pub fn create_null() -> Box<dyn InputFrontend> {
    Box::new(NullInput)
}

impl InputFrontend for NullInput {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll(&mut self, _out: &mut Vec<(InputEvent, bool)>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_input_produces_nothing() {
        let mut input = NullInput;
        input.init().unwrap();
        let mut out = Vec::new();
        input.poll(&mut out);
        assert!(out.is_empty());
    }
}
