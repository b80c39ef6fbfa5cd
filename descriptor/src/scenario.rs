// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use roxmltree::Document;
use roxmltree::Node;

use crate::child_text;
use crate::element_text;
use crate::first_text;
use crate::Error;
use crate::Result;

/// Typed queries over the scenario XML: the hypervisor configuration plus
/// one entry per configured VM.
pub struct ScenarioInfo<'d> {
    root: Node<'d, 'd>,
}

impl<'d> ScenarioInfo<'d> {
    pub fn new(doc: &'d Document<'d>) -> Self {
        ScenarioInfo {
            root: doc.root_element(),
        }
    }

    fn vms(&self) -> impl Iterator<Item = VmConfig<'d>> + '_ {
        self.root
            .descendants()
            .filter(|n| n.has_tag_name("vm"))
            .map(|node| VmConfig { node })
    }

    /// Scenario id of the service VM, if one is configured.
    pub fn service_vm_id(&self) -> Option<u32> {
        self.vms()
            .find(|vm| child_text(vm.node, "load_order") == Some("SERVICE_VM"))
            .and_then(|vm| vm.id().ok())
    }

    pub fn post_launched_vms(&self) -> Vec<VmConfig<'d>> {
        self.vms()
            .filter(|vm| child_text(vm.node, "load_order") == Some("POST_LAUNCHED_VM"))
            .collect()
    }

    /// The hypervisor-level configuration node.
    pub fn hv(&self) -> Option<HvConfig<'d>> {
        self.root
            .descendants()
            .find(|n| n.has_tag_name("hv"))
            .map(|node| HvConfig { node })
    }

    /// Whether software SRAM passthrough is enabled. This is a
    /// scenario-wide toggle, not a per-VM one.
    pub fn ssram_enabled(&self) -> bool {
        first_text(self.root, "SSRAM_ENABLED") == Some("y")
    }

    /// Shared-memory regions backed by the device model that name the
    /// given VM as a peer.
    pub fn ivshmem_regions(&self, vm_name: &str) -> Vec<IvshmemRegion<'d>> {
        self.root
            .descendants()
            .filter(|n| n.has_tag_name("IVSHMEM_REGION"))
            .filter(|n| child_text(*n, "PROVIDED_BY") == Some("Device model"))
            .filter(|n| {
                n.descendants()
                    .filter(|m| m.has_tag_name("VM_NAME"))
                    .any(|m| element_text(m) == Some(vm_name))
            })
            .map(|node| IvshmemRegion { node })
            .collect()
    }
}

/// The `hv` node of the scenario.
pub struct HvConfig<'d> {
    node: Node<'d, 'd>,
}

impl<'d> HvConfig<'d> {
    pub fn scheduler(&self) -> Option<&'d str> {
        first_text(self.node, "SCHEDULER")
    }

    /// Inter-VM UART connections with an endpoint in the given VM, in
    /// declaration order.
    pub fn vuart_connections(&self, vm_name: &str) -> Vec<VuartConnection<'d>> {
        self.node
            .descendants()
            .filter(|n| n.has_tag_name("vuart_connection"))
            .filter(|n| {
                n.children()
                    .filter(|m| m.has_tag_name("endpoint"))
                    .any(|m| child_text(m, "vm_name") == Some(vm_name))
            })
            .map(|node| VuartConnection { node })
            .collect()
    }
}

pub struct VuartConnection<'d> {
    node: Node<'d, 'd>,
}

impl<'d> VuartConnection<'d> {
    /// Connection kind, e.g. "pci" or "legacy".
    pub fn kind(&self) -> Option<&'d str> {
        child_text(self.node, "type")
    }
}

/// A shared-memory region declaration.
pub struct IvshmemRegion<'d> {
    node: Node<'d, 'd>,
}

impl<'d> IvshmemRegion<'d> {
    pub fn name(&self) -> Option<&'d str> {
        child_text(self.node, "NAME")
    }

    pub fn size(&self) -> Option<&'d str> {
        child_text(self.node, "IVSHMEM_SIZE")
    }
}

/// One `vm` entry of the scenario.
pub struct VmConfig<'d> {
    node: Node<'d, 'd>,
}

impl<'d> VmConfig<'d> {
    /// The VM's scenario id. Unlike the optional fields below, a missing
    /// or malformed id is an error: ids key the generated output files.
    pub fn id(&self) -> Result<u32> {
        let id = self.node.attribute("id").ok_or(Error::MissingVmId)?;
        id.parse().map_err(|_| Error::InvalidVmId(id.to_string()))
    }

    pub fn name(&self) -> &'d str {
        first_text(self.node, "name").unwrap_or("ACRN Post-Launched VM")
    }

    pub fn vm_type(&self) -> &'d str {
        first_text(self.node, "vm_type").unwrap_or("STANDARD_VM")
    }

    pub fn is_rtvm(&self) -> bool {
        self.vm_type() == "RTVM"
    }

    pub fn os_type(&self) -> Option<&'d str> {
        first_text(self.node, "os_type")
    }

    /// Guest memory size in megabytes, as descriptor text.
    pub fn memory_megabytes(&self) -> Option<&'d str> {
        self.node
            .descendants()
            .find(|n| n.has_tag_name("memory"))
            .and_then(|n| first_text(n, "whole"))
    }

    /// The set of physical CPU ids configured for this VM, deduplicated.
    pub fn cpu_affinity(&self) -> Vec<&'d str> {
        let mut cpus: Vec<&str> = self
            .node
            .descendants()
            .filter(|n| n.has_tag_name("cpu_affinity"))
            .flat_map(|n| n.descendants().filter(|m| m.has_tag_name("pcpu_id")))
            .filter_map(element_text)
            .collect();
        cpus.sort_unstable();
        cpus.dedup();
        cpus
    }

    pub fn vuart0_enabled(&self) -> bool {
        first_text(self.node, "vuart0") == Some("Enable")
    }

    /// Console UART attachment, e.g. "PCI".
    pub fn console_vuart(&self) -> Option<&'d str> {
        first_text(self.node, "console_vuart")
    }

    pub fn vbootloader_enabled(&self) -> bool {
        first_text(self.node, "vbootloader") == Some("Enable")
    }

    pub fn lapic_passthrough(&self) -> bool {
        first_text(self.node, "lapic_passthrough") == Some("y")
    }

    pub fn ptm_enabled(&self) -> bool {
        first_text(self.node, "PTM") == Some("y")
    }

    pub fn usb_xhci(&self) -> Vec<&'d str> {
        self.node
            .descendants()
            .filter(|n| n.has_tag_name("usb_xhci"))
            .filter_map(element_text)
            .collect()
    }

    fn virtio_entries(&self, tag: &str) -> Vec<&'d str> {
        self.node
            .descendants()
            .filter(|n| n.has_tag_name("virtio_devices"))
            .flat_map(|n| n.children())
            .filter(|n| n.has_tag_name(tag))
            .filter_map(element_text)
            .collect()
    }

    pub fn virtio_inputs(&self) -> Vec<&'d str> {
        self.virtio_entries("input")
    }

    pub fn virtio_consoles(&self) -> Vec<&'d str> {
        self.virtio_entries("console")
    }

    pub fn virtio_networks(&self) -> Vec<&'d str> {
        self.virtio_entries("network")
    }

    pub fn virtio_blocks(&self) -> Vec<&'d str> {
        self.virtio_entries("block")
    }

    /// Raw passthrough device entries, one per `pci_devs` child, in
    /// declaration order.
    pub fn pci_devs(&self) -> Vec<&'d str> {
        self.node
            .descendants()
            .filter(|n| n.has_tag_name("pci_devs"))
            .flat_map(|n| n.children())
            .filter(|n| n.is_element())
            .filter_map(element_text)
            .collect()
    }
}
