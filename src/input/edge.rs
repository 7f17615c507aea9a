use serde::Deserialize;

use super::{ControlEvent, InputSampler};

/// When a sampled control counts as fired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebouncePolicy {
    /// Fire only on the tick the sample goes false -> true.
    #[default]
    RisingEdge,
    /// Fire on every tick the sample reads true.
    Repeat,
}

#[derive(Clone, Copy, Debug)]
struct EdgeSlot {
    event: ControlEvent,
    previous: bool,
    current: bool,
}

/// Per-event edge tracking over a fixed event set.
///
/// Samples for a tick are recorded with `sample`, read back with `fired`, and
/// the previous-tick snapshot is replaced for all events at once by `commit`.
#[derive(Clone, Debug)]
pub struct EdgeDetector {
    policy: DebouncePolicy,
    slots: Vec<EdgeSlot>,
}

impl EdgeDetector {
    pub fn new(events: &[ControlEvent], policy: DebouncePolicy) -> Self {
        let mut slots: Vec<EdgeSlot> = Vec::with_capacity(events.len());
        for &event in events {
            if slots.iter().any(|slot| slot.event == event) {
                continue;
            }
            slots.push(EdgeSlot {
                event,
                previous: false,
                current: false,
            });
        }
        Self { policy, slots }
    }

    pub fn policy(&self) -> DebouncePolicy {
        self.policy
    }

    /// Registered events in sampling order.
    pub fn events(&self) -> impl Iterator<Item = ControlEvent> + '_ {
        self.slots.iter().map(|slot| slot.event)
    }

    /// Record this tick's raw state for `event` and report whether it fired.
    ///
    /// Panics when `event` was not registered: the event set is fixed at
    /// construction.
    pub fn sample(&mut self, event: ControlEvent, pressed: bool) -> bool {
        let policy = self.policy;
        let slot = self.slot_mut(event);
        slot.current = pressed;
        slot_fired(policy, slot)
    }

    /// Whether `event` fired on the current tick.
    pub fn fired(&self, event: ControlEvent) -> bool {
        slot_fired(self.policy, self.slot(event))
    }

    /// Promote the current samples to the previous-tick snapshot.
    pub fn commit(&mut self) {
        for slot in &mut self.slots {
            slot.previous = slot.current;
        }
    }

    /// Run one full tick against `sampler`: sample every event, collect the
    /// fired ones in sampling order, then commit.
    pub fn update(&mut self, sampler: &mut dyn InputSampler) -> Vec<ControlEvent> {
        let policy = self.policy;
        let mut fired = Vec::new();
        for slot in &mut self.slots {
            slot.current = sampler.sample(slot.event);
            if slot_fired(policy, slot) {
                fired.push(slot.event);
            }
        }
        self.commit();
        fired
    }

    fn slot(&self, event: ControlEvent) -> &EdgeSlot {
        match self.slots.iter().find(|slot| slot.event == event) {
            Some(slot) => slot,
            None => panic!("control event {} is not registered with the edge detector", event),
        }
    }

    fn slot_mut(&mut self, event: ControlEvent) -> &mut EdgeSlot {
        match self.slots.iter_mut().find(|slot| slot.event == event) {
            Some(slot) => slot,
            None => panic!("control event {} is not registered with the edge detector", event),
        }
    }
}

fn slot_fired(policy: DebouncePolicy, slot: &EdgeSlot) -> bool {
    match policy {
        DebouncePolicy::RisingEdge => slot.current && !slot.previous,
        DebouncePolicy::Repeat => slot.current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ScriptedSampler;

    #[test]
    fn held_event_fires_once() {
        let mut detector = EdgeDetector::new(&ControlEvent::ALL, DebouncePolicy::RisingEdge);
        let mut fired_ticks = 0;
        for _ in 0..6 {
            if detector.sample(ControlEvent::SteerRight, true) {
                fired_ticks += 1;
            }
            detector.commit();
        }
        assert_eq!(fired_ticks, 1);
    }

    #[test]
    fn release_and_press_fires_again() {
        let mut detector = EdgeDetector::new(&[ControlEvent::Go], DebouncePolicy::RisingEdge);
        assert!(detector.sample(ControlEvent::Go, true));
        detector.commit();
        assert!(!detector.sample(ControlEvent::Go, false));
        detector.commit();
        assert!(detector.sample(ControlEvent::Go, true));
        assert!(detector.fired(ControlEvent::Go));
    }

    #[test]
    fn repeat_policy_fires_while_held() {
        let mut detector = EdgeDetector::new(&[ControlEvent::SteerLeft], DebouncePolicy::Repeat);
        let mut fired_ticks = 0;
        for _ in 0..4 {
            if detector.sample(ControlEvent::SteerLeft, true) {
                fired_ticks += 1;
            }
            detector.commit();
        }
        assert_eq!(fired_ticks, 4);
    }

    #[test]
    fn snapshot_is_replaced_only_on_commit() {
        let mut detector = EdgeDetector::new(
            &[ControlEvent::Accelerate, ControlEvent::Stop],
            DebouncePolicy::RisingEdge,
        );
        detector.sample(ControlEvent::Accelerate, true);
        detector.sample(ControlEvent::Stop, true);
        // Both edges remain visible until the tick is committed.
        assert!(detector.fired(ControlEvent::Accelerate));
        assert!(detector.fired(ControlEvent::Stop));
        detector.commit();
        assert!(!detector.sample(ControlEvent::Accelerate, true));
    }

    #[test]
    fn update_reports_fired_events_in_sampling_order() {
        let mut detector = EdgeDetector::new(&ControlEvent::ALL, DebouncePolicy::RisingEdge);
        let mut sampler = ScriptedSampler::new(vec![
            vec![ControlEvent::Stop, ControlEvent::SteerRight],
            vec![ControlEvent::Stop, ControlEvent::SteerRight],
        ]);
        sampler.poll().unwrap();
        assert_eq!(
            detector.update(&mut sampler),
            vec![ControlEvent::SteerRight, ControlEvent::Stop]
        );
        sampler.poll().unwrap();
        assert!(detector.update(&mut sampler).is_empty());
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn unknown_event_is_a_programming_error() {
        let mut detector = EdgeDetector::new(&[ControlEvent::Go], DebouncePolicy::RisingEdge);
        detector.sample(ControlEvent::Quit, true);
    }
}
