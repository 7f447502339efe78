//! Voice to channel assignment
//!
//! In MPE mode every sounding touch gets its own member channel so pitch
//! bend and pressure apply to that note only. Free channels are handed out
//! least recently used first, so a release tail on one channel is not cut by
//! the next note; when all are busy the oldest voice is stolen.

use soundplane_core::MAX_TOUCHES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChannelState {
    channel: u8,
    /// Touch slot sounding on this channel
    slot: Option<usize>,
    /// Allocation / release counter, for LRU order
    stamp: u64,
}

/// Result of allocating a channel for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub channel: u8,
    /// Slot whose voice had to give up the channel
    pub stolen: Option<usize>,
}

pub struct VoiceAllocator {
    channels: Vec<ChannelState>,
    by_slot: [Option<usize>; MAX_TOUCHES],
    clock: u64,
}

impl VoiceAllocator {
    /// Allocator over `count` channels starting at zero-based `first`
    pub fn new(first: u8, count: u8) -> Self {
        let count = count.clamp(1, 16);
        let channels = (0..count)
            .map(|i| ChannelState {
                channel: (first + i) & 0x0F,
                slot: None,
                stamp: 0,
            })
            .collect();
        Self {
            channels,
            by_slot: [None; MAX_TOUCHES],
            clock: 0,
        }
    }

    /// Channel for `slot`, allocating one if it has none
    pub fn allocate(&mut self, slot: usize) -> Allocation {
        if let Some(index) = self.by_slot.get(slot).copied().flatten() {
            return Allocation {
                channel: self.channels[index].channel,
                stolen: None,
            };
        }

        self.clock += 1;
        let free = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.slot.is_none())
            .min_by_key(|(_, c)| c.stamp)
            .map(|(i, _)| i);
        let index = match free {
            Some(i) => i,
            None => self
                .channels
                .iter()
                .enumerate()
                .min_by_key(|(_, c)| c.stamp)
                .map(|(i, _)| i)
                .unwrap_or(0),
        };

        let stolen = self.channels[index].slot.take();
        if let Some(previous) = stolen {
            log::debug!("[MIDI OUT] Stealing channel {} from slot {}", index, previous);
            if let Some(entry) = self.by_slot.get_mut(previous) {
                *entry = None;
            }
        }
        self.channels[index].slot = Some(slot);
        self.channels[index].stamp = self.clock;
        if let Some(entry) = self.by_slot.get_mut(slot) {
            *entry = Some(index);
        }
        Allocation {
            channel: self.channels[index].channel,
            stolen,
        }
    }

    /// Free the channel of `slot`; returns it if there was one
    pub fn release(&mut self, slot: usize) -> Option<u8> {
        let index = self.by_slot.get_mut(slot)?.take()?;
        self.clock += 1;
        let state = &mut self.channels[index];
        state.slot = None;
        state.stamp = self.clock;
        Some(state.channel)
    }

    pub fn channel_of(&self, slot: usize) -> Option<u8> {
        self.by_slot
            .get(slot)
            .copied()
            .flatten()
            .map(|i| self.channels[i].channel)
    }

    /// Every channel this allocator hands out
    pub fn channels(&self) -> impl Iterator<Item = u8> + '_ {
        self.channels.iter().map(|c| c.channel)
    }

    pub fn clear(&mut self) {
        for state in &mut self.channels {
            state.slot = None;
        }
        self.by_slot = [None; MAX_TOUCHES];
    }
}
