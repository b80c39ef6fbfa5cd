// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use roxmltree::Document;
use roxmltree::Node;

use crate::child_text;
use crate::parse_hex;

/// Typed queries over the board XML: processor topology and the physical
/// PCI device inventory.
pub struct BoardInfo<'d> {
    root: Node<'d, 'd>,
}

impl<'d> BoardInfo<'d> {
    pub fn new(doc: &'d Document<'d>) -> Self {
        BoardInfo {
            root: doc.root_element(),
        }
    }

    /// Local APIC id of the physical CPU with the given logical id, as
    /// listed in the board's processor topology. APIC ids are spelled in
    /// hexadecimal in the board XML.
    pub fn lapic_id(&self, cpu_id: &str) -> Option<u32> {
        let processors = self
            .root
            .descendants()
            .find(|n| n.has_tag_name("processors"))?;
        let thread = processors
            .descendants()
            .filter(|n| n.has_tag_name("thread"))
            .find(|t| child_text(*t, "cpu_id") == Some(cpu_id))?;
        parse_hex(child_text(thread, "apic_id")?)
    }

    /// The PCI device node at the given physical bus/device/function, if
    /// the board lists one. Device nodes are keyed by a combined
    /// `(device << 16) | function` address under their bus.
    pub fn pci_device(&self, bus: u8, dev: u8, func: u8) -> Option<DeviceNode<'d>> {
        let bus_address = format!("0x{:x}", bus);
        let device_address = format!("0x{:x}", (u32::from(dev) << 16) | u32::from(func));
        let bus_node = self
            .root
            .descendants()
            .filter(|n| n.has_tag_name("bus"))
            .find(|n| {
                n.attribute("type") == Some("pci")
                    && n.attribute("address") == Some(bus_address.as_str())
            })?;
        let node = bus_node
            .children()
            .filter(|n| n.has_tag_name("device"))
            .find(|n| n.attribute("address") == Some(device_address.as_str()))?;
        Some(DeviceNode { node })
    }
}

/// One physical PCI device entry under a board bus node.
#[derive(Clone, Copy)]
pub struct DeviceNode<'d> {
    node: Node<'d, 'd>,
}

impl<'d> DeviceNode<'d> {
    /// PCI class code string, e.g. "0x030000" for a VGA-compatible
    /// controller.
    pub fn class_code(&self) -> Option<&'d str> {
        child_text(self.node, "class")
    }

    pub fn vendor(&self) -> Option<&'d str> {
        child_text(self.node, "vendor")
    }

    /// Whether the device lists a resource record of the given type
    /// (e.g. "memory").
    pub fn has_resource(&self, kind: &str) -> bool {
        self.node
            .children()
            .any(|n| n.has_tag_name("resource") && n.attribute("type") == Some(kind))
    }
}
