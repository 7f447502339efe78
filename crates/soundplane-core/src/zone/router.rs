//! Attribution of touches to zones and per-zone message fan-out

use std::sync::Arc;

use super::{Zone, ZoneLayout, ZoneType};
use crate::touch::{Touch, TouchArray};
use crate::types::MAX_TOUCHES;

/// Zone owning each touch slot in one frame
pub type Attribution = [Option<usize>; MAX_TOUCHES];

/// A touch forwarded by a note zone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneTouch {
    /// Touch slot, stable for the touch's lifetime
    pub slot: usize,
    pub zone: usize,
    /// Zone output offset
    pub offset: i32,
    /// Output channel of the zone (0 = consumer default)
    pub channel: u8,
    pub touch: Touch,
    /// Note of the committed key
    pub key_note: i32,
    /// Continuous note following the finger
    pub note: f32,
}

/// Controller output of one zone for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMessage {
    pub zone: usize,
    pub name: Arc<str>,
    pub zone_type: ZoneType,
    /// Position normalized to the zone, 0..1
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub controllers: [u8; 3],
    pub channel: u8,
    /// Toggle state for toggle zones
    pub toggle: Option<bool>,
}

/// Edge-triggered attribution change of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteChange {
    On { slot: usize, zone: usize },
    Off { slot: usize, zone: usize },
}

impl NoteChange {
    pub fn slot(&self) -> usize {
        match *self {
            NoteChange::On { slot, .. } | NoteChange::Off { slot, .. } => slot,
        }
    }

    pub fn zone(&self) -> usize {
        match *self {
            NoteChange::On { zone, .. } | NoteChange::Off { zone, .. } => zone,
        }
    }
}

/// Transitions between two attributions
///
/// A slot that moves from zone A to zone B yields an off for A then an on
/// for B. A slot that stays in the same zone yields nothing, however many
/// frames it stays.
pub fn find_note_changes(previous: &Attribution, current: &Attribution) -> Vec<NoteChange> {
    let mut changes = Vec::new();
    for slot in 0..MAX_TOUCHES {
        if previous[slot] == current[slot] {
            continue;
        }
        if let Some(zone) = previous[slot] {
            changes.push(NoteChange::Off { slot, zone });
        }
        if let Some(zone) = current[slot] {
            changes.push(NoteChange::On { slot, zone });
        }
    }
    changes
}

/// Events of one zone in one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneEvents {
    pub zone: usize,
    pub offset: i32,
    pub touches: Vec<ZoneTouch>,
    pub controller: Option<ZoneMessage>,
}

/// Router output for one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedFrame {
    /// Zones with something to send, in zone order
    pub zones: Vec<ZoneEvents>,
    pub changes: Vec<NoteChange>,
}

impl RoutedFrame {
    pub fn has_note_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn touches(&self) -> impl Iterator<Item = &ZoneTouch> {
        self.zones.iter().flat_map(|z| z.touches.iter())
    }

    pub fn controllers(&self) -> impl Iterator<Item = &ZoneMessage> {
        self.zones.iter().filter_map(|z| z.controller.as_ref())
    }
}

/// Routes touch arrays through the active zone layout
///
/// Owned by the processing thread; a new layout arrives as an `Arc` and is
/// swapped in between frames.
pub struct ZoneRouter {
    layout: Arc<ZoneLayout>,
    previous: Attribution,
    toggles: Vec<bool>,
    /// Offs owed for touches attributed under the previous layout
    pending: Vec<NoteChange>,
}

impl ZoneRouter {
    pub fn new(layout: Arc<ZoneLayout>) -> Self {
        let toggles = vec![false; layout.len()];
        Self {
            layout,
            previous: [None; MAX_TOUCHES],
            toggles,
            pending: Vec::new(),
        }
    }

    pub fn layout(&self) -> &Arc<ZoneLayout> {
        &self.layout
    }

    /// Swap in a new layout
    ///
    /// Touches held in the old layout get their offs with the next frame.
    pub fn set_layout(&mut self, layout: Arc<ZoneLayout>) {
        for (slot, zone) in self.previous.iter().enumerate() {
            if let Some(zone) = *zone {
                self.pending.push(NoteChange::Off { slot, zone });
            }
        }
        self.previous = [None; MAX_TOUCHES];
        self.toggles = vec![false; layout.len()];
        log::info!("[ZONES] Layout swapped ({} zones)", layout.len());
        self.layout = layout;
    }

    /// Current toggle state of a zone
    pub fn toggle_state(&self, zone: usize) -> bool {
        self.toggles.get(zone).copied().unwrap_or(false)
    }

    /// Forget attribution and toggle state without emitting offs
    pub fn clear(&mut self) {
        self.previous = [None; MAX_TOUCHES];
        self.pending.clear();
        self.toggles.iter_mut().for_each(|t| *t = false);
    }

    /// Route one frame of touches
    pub fn route(&mut self, touches: &TouchArray) -> RoutedFrame {
        let layout = self.layout.clone();
        let mut current: Attribution = [None; MAX_TOUCHES];
        let mut grouped: Vec<Vec<(usize, Touch)>> = vec![Vec::new(); layout.len()];

        for (slot, touch) in touches.active() {
            let Some(zone) = layout.map().zone_at(touch.kx, touch.ky) else {
                continue;
            };
            current[slot] = Some(zone);
            grouped[zone].push((slot, *touch));
        }

        let mut changes = std::mem::take(&mut self.pending);
        changes.extend(find_note_changes(&self.previous, &current));
        self.previous = current;

        let mut flipped = vec![false; layout.len()];
        for change in &changes {
            if let NoteChange::On { zone, .. } = *change {
                if layout.zone(zone).map(|z| z.zone_type) == Some(ZoneType::Toggle) {
                    self.toggles[zone] = !self.toggles[zone];
                    flipped[zone] = true;
                }
            }
        }

        let mut zones = Vec::new();
        for zone in layout.zones() {
            let touches = &grouped[zone.id];
            let events = match zone.zone_type {
                ZoneType::NoteRow if !touches.is_empty() => Some(ZoneEvents {
                    zone: zone.id,
                    offset: zone.offset,
                    touches: touches
                        .iter()
                        .map(|&(slot, touch)| zone_touch(zone, slot, touch))
                        .collect(),
                    controller: None,
                }),
                ZoneType::NoteRow => None,
                ZoneType::Toggle if flipped[zone.id] => Some(ZoneEvents {
                    zone: zone.id,
                    offset: zone.offset,
                    touches: Vec::new(),
                    controller: Some(ZoneMessage {
                        toggle: Some(self.toggles[zone.id]),
                        ..controller_message(zone, None)
                    }),
                }),
                ZoneType::Toggle => None,
                _ => strongest(touches).map(|touch| ZoneEvents {
                    zone: zone.id,
                    offset: zone.offset,
                    touches: Vec::new(),
                    controller: Some(controller_message(zone, Some(touch))),
                }),
            };
            zones.extend(events);
        }

        RoutedFrame { zones, changes }
    }
}

fn zone_touch(zone: &Zone, slot: usize, touch: Touch) -> ZoneTouch {
    ZoneTouch {
        slot,
        zone: zone.id,
        offset: zone.offset,
        channel: zone.channel,
        touch,
        key_note: zone.key_note(touch.kx, touch.ky),
        note: zone.continuous_note(touch.x, touch.y),
    }
}

fn strongest(touches: &[(usize, Touch)]) -> Option<Touch> {
    touches
        .iter()
        .map(|&(_, t)| t)
        .max_by(|a, b| a.z.total_cmp(&b.z))
}

fn controller_message(zone: &Zone, touch: Option<Touch>) -> ZoneMessage {
    let (x, y, z) = match touch {
        Some(t) => {
            let (x, y) = zone.rect.normalize(t.x, t.y);
            (x, y, t.z)
        }
        None => (0.0, 0.0, 0.0),
    };
    ZoneMessage {
        zone: zone.id,
        name: zone.name.clone(),
        zone_type: zone.zone_type,
        x,
        y,
        z,
        controllers: zone.controllers,
        channel: zone.channel,
        toggle: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"{"zone": [
        {"type": "note_row", "name": "keys", "rect": [0, 0, 15, 5], "note": 40, "offset": 1},
        {"type": "xy_controller", "name": "pad", "rect": [15, 0, 10, 5], "ctrl1": 1, "ctrl2": 2},
        {"type": "toggle", "name": "hold", "rect": [25, 0, 5, 5], "ctrl1": 64}
    ]}"#;

    fn router() -> ZoneRouter {
        ZoneRouter::new(Arc::new(ZoneLayout::from_json_str(LAYOUT, 30, 5).unwrap()))
    }

    fn touches(list: &[(usize, f32, f32, f32)]) -> TouchArray {
        TouchArray::from_slots(list.iter().map(|&(slot, x, y, z)| (slot, Touch::new(x, y, z))))
    }

    #[test]
    fn test_touch_routes_to_single_zone() {
        let mut router = router();
        let routed = router.route(&touches(&[(0, 3.5, 0.5, 0.5)]));
        assert_eq!(routed.zones.len(), 1);
        let events = &routed.zones[0];
        assert_eq!(events.zone, 0);
        assert_eq!(events.offset, 1);
        assert_eq!(events.touches.len(), 1);
        assert_eq!(events.touches[0].key_note, 43);
        assert!((events.touches[0].note - 43.0).abs() < 1e-6);
    }

    #[test]
    fn test_touch_outside_all_zones_is_dropped() {
        let layout = ZoneLayout::from_json_str(
            r#"{"zone": [{"type": "note_row", "rect": [0, 0, 10, 5]}]}"#,
            30,
            5,
        )
        .unwrap();
        let mut router = ZoneRouter::new(Arc::new(layout));
        let routed = router.route(&touches(&[(0, 20.5, 1.5, 0.5)]));
        assert!(routed.zones.is_empty());
        assert!(routed.changes.is_empty());
    }

    #[test]
    fn test_two_zones_two_events() {
        let layout = ZoneLayout::from_json_str(
            r#"{"zone": [
                {"type": "note_row", "name": "low", "rect": [0, 0, 15, 5], "note": 30},
                {"type": "note_row", "name": "high", "rect": [15, 0, 15, 5], "note": 60}
            ]}"#,
            30,
            5,
        )
        .unwrap();
        let mut router = ZoneRouter::new(Arc::new(layout));
        let routed = router.route(&touches(&[(0, 2.5, 0.5, 0.5), (1, 20.5, 3.5, 0.5)]));
        let ids: Vec<usize> = routed.touches().map(|t| t.zone).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(routed.zones.len(), 2);
        assert_eq!(routed.zones[1].touches[0].slot, 1);
    }

    #[test]
    fn test_note_changes_are_edge_triggered() {
        let mut router = router();
        let held = touches(&[(0, 3.5, 1.5, 0.5)]);

        let first = router.route(&held);
        assert_eq!(first.changes, vec![NoteChange::On { slot: 0, zone: 0 }]);
        for _ in 0..5 {
            assert!(router.route(&held).changes.is_empty());
        }
        // moving to another key of the same zone is not a new note
        assert!(router.route(&touches(&[(0, 6.5, 1.5, 0.5)])).changes.is_empty());

        let released = router.route(&TouchArray::new());
        assert_eq!(released.changes, vec![NoteChange::Off { slot: 0, zone: 0 }]);
        assert!(router.route(&TouchArray::new()).changes.is_empty());
    }

    #[test]
    fn test_moving_between_zones_is_off_then_on() {
        let previous: Attribution = {
            let mut a = [None; MAX_TOUCHES];
            a[2] = Some(0);
            a
        };
        let mut current = [None; MAX_TOUCHES];
        current[2] = Some(1);
        assert_eq!(
            find_note_changes(&previous, &current),
            vec![
                NoteChange::Off { slot: 2, zone: 0 },
                NoteChange::On { slot: 2, zone: 1 }
            ]
        );
    }

    #[test]
    fn test_controller_uses_strongest_touch() {
        let mut router = router();
        let routed = router.route(&touches(&[(0, 16.0, 1.0, 0.2), (1, 20.0, 2.5, 0.9)]));
        let msg = routed.controllers().next().unwrap();
        assert_eq!(&*msg.name, "pad");
        assert_eq!(msg.zone, 1);
        assert!((msg.x - 0.5).abs() < 1e-6);
        assert!((msg.y - 0.5).abs() < 1e-6);
        assert_eq!(msg.z, 0.9);
        assert_eq!(routed.touches().count(), 0);
    }

    #[test]
    fn test_toggle_flips_on_each_press() {
        let mut router = router();
        let press = touches(&[(0, 27.5, 2.5, 0.5)]);

        let routed = router.route(&press);
        assert_eq!(routed.controllers().next().unwrap().toggle, Some(true));
        // held: no further messages
        assert_eq!(router.route(&press).controllers().count(), 0);
        router.route(&TouchArray::new());
        let routed = router.route(&press);
        assert_eq!(routed.controllers().next().unwrap().toggle, Some(false));
        assert!(!router.toggle_state(2));
    }

    #[test]
    fn test_layout_swap_releases_held_touches() {
        let mut router = router();
        let held = touches(&[(0, 3.5, 1.5, 0.5)]);
        router.route(&held);

        router.set_layout(Arc::new(ZoneLayout::from_json_str(LAYOUT, 30, 5).unwrap()));
        let routed = router.route(&held);
        assert_eq!(
            routed.changes,
            vec![
                NoteChange::Off { slot: 0, zone: 0 },
                NoteChange::On { slot: 0, zone: 0 }
            ]
        );
    }
}
