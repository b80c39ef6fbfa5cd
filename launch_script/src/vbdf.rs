// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::VecDeque;

use descriptor::DeviceNode;

use crate::Error;
use crate::Result;

/// Slot of the virtual host bridge.
pub const HOSTBRIDGE_SLOT: u32 = 0;
/// Slot of the virtual LPC bridge.
pub const LPC_SLOT: u32 = 1;
/// Slot reserved for a passthrough integrated GPU, physical or virtual
/// function. Slot 31 is also kept out of the pool for the LPC bridge the
/// integrated GPU requires.
pub const GPU_PASSTHROUGH_SLOT: u32 = 2;

/// PCI class code of a VGA-compatible display controller.
pub const VGA_CLASS_CODE: &str = "0x030000";

type FixedSlotRule = fn(Option<&DeviceNode>, Option<&str>) -> Option<u32>;

// A VGA-compatible controller, integrated or discrete, always lands on the
// GPU slot regardless of pool state or option hints.
fn vga_slot(device: Option<&DeviceNode>, _options: Option<&str>) -> Option<u32> {
    device
        .filter(|d| d.class_code() == Some(VGA_CLASS_CODE))
        .map(|_| GPU_PASSTHROUGH_SLOT)
}

// An explicit integrated-graphics option hint without a device descriptor.
fn igd_hint_slot(_device: Option<&DeviceNode>, options: Option<&str>) -> Option<u32> {
    options
        .filter(|o| o.contains("igd"))
        .map(|_| GPU_PASSTHROUGH_SLOT)
}

// Evaluated in order, before falling through to the sequential pool.
const FIXED_SLOT_RULES: &[FixedSlotRule] = &[vga_slot, igd_hint_slot];

/// Hands out virtual PCI slots for one VM's device-model invocation.
///
/// Slots 0, 1, 2 and 31 are reserved; the free pool 3..=29 is consumed
/// front to back, and a slot is never reused within one VM's generation.
pub struct VirtualBdfAllocator {
    free_slots: VecDeque<u32>,
}

impl VirtualBdfAllocator {
    pub fn new() -> Self {
        VirtualBdfAllocator {
            free_slots: ((GPU_PASSTHROUGH_SLOT + 1)..=29).collect(),
        }
    }

    /// Returns the virtual slot for a device, consulting the fixed-slot
    /// rules first and popping the smallest free slot otherwise. An empty
    /// pool is a configuration-capacity error, not a recoverable one.
    pub fn allocate(&mut self, device: Option<&DeviceNode>, options: Option<&str>) -> Result<u32> {
        for rule in FIXED_SLOT_RULES {
            if let Some(slot) = rule(device, options) {
                return Ok(slot);
            }
        }
        self.free_slots.pop_front().ok_or(Error::SlotsExhausted)
    }
}

impl Default for VirtualBdfAllocator {
    fn default() -> Self {
        Self::new()
    }
}
