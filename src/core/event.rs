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

//! Named event hub
//!
//! Loose coupling between controllers that share timing signals without
//! sharing state: the PSX GPU fires "hblank"/"vblank"/"dot" events and the
//! timer block listens for them to gate its counters. Listeners fire in
//! registration order; firing an event with no listeners is a no-op.

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::machine::Machine;

/// Callback registered against a named event
pub trait EventListener {
    fn fire(&mut self, m: &Machine);
}

/// Handle identifying a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventListenerId(u64);

struct Entry {
    id: EventListenerId,
    name: String,
    listener: Rc<RefCell<dyn EventListener>>,
}

/// The event hub
pub struct EventHub {
    entries: RefCell<Vec<Entry>>,
    next_id: std::cell::Cell<u64>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            next_id: std::cell::Cell::new(0),
        }
    }

    /// Register a listener for a named event
    pub fn add(&self, name: &str, listener: Rc<RefCell<dyn EventListener>>) -> EventListenerId {
        let id = EventListenerId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.entries.borrow_mut().push(Entry {
            id,
            name: name.to_string(),
            listener,
        });
        log::debug!("registered listener for event \"{name}\"");
        id
    }

    /// Unregister a listener
    pub fn remove(&self, id: EventListenerId) {
        self.entries.borrow_mut().retain(|e| e.id != id);
    }

    pub fn remove_all(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Invoke every listener of `name` in registration order
    ///
    /// The listener list is snapshotted first so a listener may register
    /// or unregister listeners without invalidating the dispatch.
    pub fn fire(&self, m: &Machine, name: &str) {
        let listeners: Vec<Rc<RefCell<dyn EventListener>>> = self
            .entries
            .borrow()
            .iter()
            .filter(|e| e.name == name)
            .map(|e| e.listener.clone())
            .collect();
        for listener in listeners {
            listener.borrow_mut().fire(m);
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EmulatorConfig;

    struct Recorder {
        log: Rc<RefCell<Vec<u32>>>,
        tag: u32,
    }

    impl EventListener for Recorder {
        fn fire(&mut self, _m: &Machine) {
            self.log.borrow_mut().push(self.tag);
        }
    }

    #[test]
    fn test_listeners_fire_in_registration_order() {
        let m = Machine::new(EmulatorConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in [1, 2, 3] {
            m.events().add(
                "hblank",
                Rc::new(RefCell::new(Recorder {
                    log: log.clone(),
                    tag,
                })),
            );
        }

        m.event_fire("hblank");
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_events_are_namespaced() {
        let m = Machine::new(EmulatorConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        m.events().add(
            "vblank",
            Rc::new(RefCell::new(Recorder {
                log: log.clone(),
                tag: 9,
            })),
        );

        m.event_fire("hblank");
        assert!(log.borrow().is_empty());
        m.event_fire("vblank");
        assert_eq!(*log.borrow(), vec![9]);
    }

    #[test]
    fn test_removed_listener_stops_firing() {
        let m = Machine::new(EmulatorConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let id = m.events().add(
            "dot",
            Rc::new(RefCell::new(Recorder {
                log: log.clone(),
                tag: 4,
            })),
        );
        m.events().remove(id);
        m.event_fire("dot");
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_fire_without_listeners_is_noop() {
        let m = Machine::new(EmulatorConfig::default());
        m.event_fire("nothing-registered");
    }
}
