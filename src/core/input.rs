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

//! Input event taxonomy and listener registry
//!
//! Input frontends poll the host and report events; controllers register
//! an [`InputConfig`] describing the events they care about and receive a
//! callback with the matching event's index and its pressed state.
//! Listeners are dispatched in registration order. The Quit event is
//! handled here directly: it latches a flag the run loop checks.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Host input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Keyboard key identified by its host keycode
    Keyboard { key: u32 },
    /// Gamepad button press
    ButtonDown { id: u32 },
    /// Gamepad button release
    ButtonUp { id: u32 },
    /// Window close / process-level quit request
    Quit,
}

/// Callback target of an [`InputConfig`]
pub trait InputHandler {
    /// `id` is the index of the matched event inside the registered
    /// configuration; `pressed` is the key/button state.
    fn event(&mut self, id: usize, pressed: bool);
}

/// A controller's event subscriptions
pub struct InputConfig {
    pub events: Vec<InputEvent>,
    pub handler: Rc<RefCell<dyn InputHandler>>,
}

/// Handle identifying a registered configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputConfigId(u64);

/// The listener registry
pub struct InputHub {
    listeners: RefCell<Vec<(InputConfigId, Rc<InputConfig>)>>,
    next_id: Cell<u64>,
    quit: Cell<bool>,
}

impl InputHub {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            quit: Cell::new(false),
        }
    }

    pub fn register(&self, config: InputConfig) -> InputConfigId {
        let id = InputConfigId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.listeners.borrow_mut().push((id, Rc::new(config)));
        id
    }

    pub fn unregister(&self, id: InputConfigId) {
        self.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
    }

    pub fn remove_all(&self) {
        self.listeners.borrow_mut().clear();
    }

    /// Whether a Quit event has been reported
    pub fn quit_requested(&self) -> bool {
        self.quit.get()
    }

    pub fn clear_quit(&self) {
        self.quit.set(false);
    }

    /// Dispatch one reported event to every matching listener
    pub fn report(&self, event: &InputEvent, pressed: bool) {
        if matches!(event, InputEvent::Quit) {
            self.quit.set(true);
            return;
        }

        let listeners: Vec<Rc<InputConfig>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, cfg)| cfg.clone())
            .collect();
        for config in listeners {
            for (index, registered) in config.events.iter().enumerate() {
                if Self::matches(registered, event) {
                    config.handler.borrow_mut().event(index, pressed);
                }
            }
        }
    }

    fn matches(registered: &InputEvent, reported: &InputEvent) -> bool {
        match (registered, reported) {
            (InputEvent::Keyboard { key: a }, InputEvent::Keyboard { key: b }) => a == b,
            // Button subscriptions match either edge of the same button
            (InputEvent::ButtonDown { id: a }, InputEvent::ButtonDown { id: b })
            | (InputEvent::ButtonDown { id: a }, InputEvent::ButtonUp { id: b })
            | (InputEvent::ButtonUp { id: a }, InputEvent::ButtonDown { id: b })
            | (InputEvent::ButtonUp { id: a }, InputEvent::ButtonUp { id: b }) => a == b,
            _ => false,
        }
    }
}

impl Default for InputHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Rc<RefCell<Vec<(usize, bool)>>>,
    }

    impl InputHandler for Recorder {
        fn event(&mut self, id: usize, pressed: bool) {
            self.seen.borrow_mut().push((id, pressed));
        }
    }

    fn keyboard_config(keys: &[u32]) -> (InputConfig, Rc<RefCell<Vec<(usize, bool)>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let config = InputConfig {
            events: keys.iter().map(|&key| InputEvent::Keyboard { key }).collect(),
            handler: Rc::new(RefCell::new(Recorder { seen: seen.clone() })),
        };
        (config, seen)
    }

    #[test]
    fn test_keyboard_dispatch_by_index() {
        let hub = InputHub::new();
        let (config, seen) = keyboard_config(&[b'q' as u32, b'w' as u32]);
        hub.register(config);

        hub.report(&InputEvent::Keyboard { key: b'w' as u32 }, true);
        hub.report(&InputEvent::Keyboard { key: b'q' as u32 }, false);
        hub.report(&InputEvent::Keyboard { key: b'x' as u32 }, true);

        assert_eq!(*seen.borrow(), vec![(1, true), (0, false)]);
    }

    #[test]
    fn test_quit_latches_flag() {
        let hub = InputHub::new();
        assert!(!hub.quit_requested());
        hub.report(&InputEvent::Quit, true);
        assert!(hub.quit_requested());
        hub.clear_quit();
        assert!(!hub.quit_requested());
    }

    #[test]
    fn test_unregister_stops_dispatch() {
        let hub = InputHub::new();
        let (config, seen) = keyboard_config(&[b'a' as u32]);
        let id = hub.register(config);
        hub.unregister(id);
        hub.report(&InputEvent::Keyboard { key: b'a' as u32 }, true);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_button_edges_match_same_subscription() {
        let hub = InputHub::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        hub.register(InputConfig {
            events: vec![InputEvent::ButtonDown { id: 3 }],
            handler: Rc::new(RefCell::new(Recorder { seen: seen.clone() })),
        });

        hub.report(&InputEvent::ButtonDown { id: 3 }, true);
        hub.report(&InputEvent::ButtonUp { id: 3 }, false);
        assert_eq!(*seen.borrow(), vec![(0, true), (0, false)]);
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let hub = InputHub::new();
        let (first, seen_first) = keyboard_config(&[5]);
        let (second, seen_second) = keyboard_config(&[5]);
        hub.register(first);
        hub.register(second);

        hub.report(&InputEvent::Keyboard { key: 5 }, true);
        assert_eq!(seen_first.borrow().len(), 1);
        assert_eq!(seen_second.borrow().len(), 1);
    }
}
