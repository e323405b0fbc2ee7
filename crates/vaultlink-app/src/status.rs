//! Flow-status event synthesis.
//!
//! The device reports progress as a packed word: the low byte is the
//! operation milestone it has reached, the next byte a secondary sub-state
//! used while the core is generating key material. Host flows want ordered
//! per-event callbacks instead, and exactly once per event, even though
//! status words repeat and may skip ahead.
//!
//! The wrinkle is the seed-generation window: some host flows insert
//! events (passphrase entry, card taps) that the operation vocabulary
//! collapses into a single `SEED_GENERATED` milestone whose sub-steps are
//! reported through the core byte. The classifier below maps each host
//! event into `Before`, `In` or `After` that window and applies the
//! matching completion rule.

use std::collections::BTreeSet;

use vaultlink_proto::Status;

/// Pack an operation milestone and core sub-state into a flow-status word.
#[must_use]
pub fn pack_flow_status(operation_status: u8, core_status: u8) -> u16 {
    (u16::from(core_status) << 8) | u16::from(operation_status)
}

/// Where the seed-generation window sits in the host flow's event space.
#[derive(Debug, Clone, Copy)]
pub struct SeedOverlay {
    /// Value of the operation vocabulary's `SEED_GENERATED` milestone.
    pub seed_generated_value: u32,
    /// Number of events in the seed-generation vocabulary.
    pub seed_event_count: u32,
}

/// Position of a host event relative to the seed-generation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Before,
    In,
    After,
}

/// Ordered, fire-once event synthesis from device flow status.
pub struct FlowStatusListener<F> {
    events: Vec<u32>,
    overlay: Option<SeedOverlay>,
    delivered: BTreeSet<u32>,
    on_event: F,
}

impl<F: FnMut(u32)> FlowStatusListener<F> {
    /// Listener for `events` (any order; delivered ascending) with an
    /// optional seed-generation overlay.
    pub fn new(events: impl IntoIterator<Item = u32>, overlay: Option<SeedOverlay>, on_event: F) -> Self {
        let mut events: Vec<u32> = events.into_iter().collect();
        events.sort_unstable();
        events.dedup();
        Self { events, overlay, delivered: BTreeSet::new(), on_event }
    }

    fn classify(&self, event: u32) -> (Window, u32) {
        let Some(overlay) = self.overlay else {
            return (Window::Before, 0);
        };

        if event < overlay.seed_generated_value {
            return (Window::Before, 0);
        }

        let diff = event - overlay.seed_generated_value;
        let boundary = overlay.seed_event_count.saturating_sub(1);
        if diff < boundary {
            (Window::In, diff)
        } else {
            (Window::After, diff)
        }
    }

    /// Feed one status report; fires callbacks for every event newly
    /// completed by it, in ascending event order.
    pub fn on_status(&mut self, status: &Status) {
        let operation_status = u32::from(status.flow_status & 0xFF);
        let core_status = u32::from((status.flow_status >> 8) & 0xFF);

        for i in 0..self.events.len() {
            let event = self.events[i];
            let (window, diff) = self.classify(event);

            let completed = match window {
                Window::Before => operation_status >= event,
                Window::In => core_status > diff,
                Window::After => operation_status > diff + 1,
            };

            if completed {
                self.deliver(event);
            }
        }
    }

    /// Mark every event up to and including `event` as delivered, firing
    /// callbacks for the newly delivered ones in order.
    pub fn force_status_update(&mut self, event: u32) {
        for i in 0..self.events.len() {
            let candidate = self.events[i];
            if candidate <= event {
                self.deliver(candidate);
            }
        }
    }

    fn deliver(&mut self, event: u32) {
        if self.delivered.insert(event) {
            tracing::trace!(event, "flow event");
            (self.on_event)(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use vaultlink_proto::{CmdState, DeviceIdleState, DeviceWaitOn};

    use super::*;

    fn status_with(flow_status: u16) -> Status {
        Status {
            device_state: 0x02,
            device_idle_state: DeviceIdleState::Usb,
            device_waiting_on: DeviceWaitOn::None,
            abort_disabled: false,
            current_cmd_seq: 1,
            cmd_state: CmdState::Executing,
            flow_status,
        }
    }

    fn recording_listener(
        events: impl IntoIterator<Item = u32>,
        overlay: Option<SeedOverlay>,
    ) -> (FlowStatusListener<impl FnMut(u32)>, Rc<RefCell<Vec<u32>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let listener = FlowStatusListener::new(events, overlay, move |event| {
            sink.borrow_mut().push(event);
        });
        (listener, seen)
    }

    #[test]
    fn events_fire_in_order_without_overlay() {
        let (mut listener, seen) = recording_listener(0..4, None);

        listener.on_status(&status_with(pack_flow_status(2, 0)));
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);

        listener.on_status(&status_with(pack_flow_status(3, 0)));
        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn delivery_is_idempotent() {
        let (mut listener, seen) = recording_listener(0..4, None);

        listener.on_status(&status_with(pack_flow_status(2, 0)));
        listener.on_status(&status_with(pack_flow_status(2, 0)));

        assert_eq!(*seen.borrow(), vec![0, 1, 2], "repeat status must not re-fire");
    }

    #[test]
    fn seed_window_interleaves_core_sub_steps() {
        // Host flow: INIT, VERIFY, VERIFY_ADDRESS, PASSPHRASE, CARD, END.
        // Operation flow: INIT, VERIFY, VERIFY_ADDRESS, SEED_GENERATED, END.
        // Seed flow: INIT, PASSPHRASE, CARD.
        let overlay = SeedOverlay { seed_generated_value: 3, seed_event_count: 3 };
        let (mut listener, seen) = recording_listener(0..6, Some(overlay));

        listener.on_status(&status_with(pack_flow_status(1, 0))); // VERIFY
        listener.on_status(&status_with(pack_flow_status(2, 0))); // VERIFY_ADDRESS
        listener.on_status(&status_with(pack_flow_status(3, 2))); // SEED_GENERATED + CARD
        listener.on_status(&status_with(pack_flow_status(4, 0))); // END

        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn seed_window_events_wait_for_the_core_byte() {
        let overlay = SeedOverlay { seed_generated_value: 3, seed_event_count: 3 };
        let (mut listener, seen) = recording_listener(0..6, Some(overlay));

        // Reaching SEED_GENERATED with no core progress completes nothing
        // inside the window.
        listener.on_status(&status_with(pack_flow_status(3, 0)));
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);

        listener.on_status(&status_with(pack_flow_status(3, 1)));
        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn force_update_delivers_everything_up_to_the_event() {
        let (mut listener, seen) = recording_listener(0..6, None);

        listener.on_status(&status_with(pack_flow_status(1, 0)));
        assert_eq!(*seen.borrow(), vec![0, 1]);

        listener.force_status_update(4);
        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3, 4]);

        // Already-delivered events stay delivered.
        listener.force_status_update(4);
        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn flow_status_packing() {
        assert_eq!(pack_flow_status(3, 2), 0x0203);
        assert_eq!(pack_flow_status(0x84, 0), 132);
    }
}
