// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-VM launch script generation: walks one VM's scenario entry,
//! queries the board as needed and populates a launch script document.

use anyhow::Result;
use descriptor::BoardInfo;
use descriptor::ScenarioInfo;
use descriptor::VmConfig;
use launch_script::LaunchScriptDocument;
use launch_script::PassthruDeviceOptions;
use launch_script::VirtualBdfAllocator;
use launch_script::GPU_PASSTHROUGH_SLOT;
use launch_script::HOSTBRIDGE_SLOT;
use launch_script::LPC_SLOT;
use launch_script::VGA_CLASS_CODE;
use log::warn;
use regex::Regex;

// Builds one VM's launch script. The allocator, the option resolver and
// the document are all owned here; nothing leaks across VMs.
struct VmScriptBuilder<'d> {
    board: &'d BoardInfo<'d>,
    vm: &'d VmConfig<'d>,
    vbdf: VirtualBdfAllocator,
    passthru: PassthruDeviceOptions,
    script: LaunchScriptDocument,
}

impl<'d> VmScriptBuilder<'d> {
    fn new(board: &'d BoardInfo<'d>, vm: &'d VmConfig<'d>) -> Self {
        VmScriptBuilder {
            board,
            vm,
            vbdf: VirtualBdfAllocator::new(),
            passthru: PassthruDeviceOptions::new(vm),
            script: LaunchScriptDocument::new(),
        }
    }

    /// Adds an emulated device, either at a fixed "bus:slot" position or
    /// at the next free virtual slot.
    fn add_virtual_device(
        &mut self,
        kind: &str,
        fixed_vbdf: Option<&str>,
        options: &str,
    ) -> Result<()> {
        if kind.contains("virtio")
            && self.vm.is_rtvm()
            && !self.script.has_parameter(|p| p.contains("--virtio_poll"))
        {
            // Real-time VMs poll virtqueues instead of waiting for
            // notifications.
            self.script.add_plain_parameter("--virtio_poll 1000000");
        }

        let vbdf = match fixed_vbdf {
            Some(fixed) => fixed.to_string(),
            None => self.vbdf.allocate(None, None)?.to_string(),
        };
        self.script.add_dynamic_parameter(
            "add_virtual_device",
            &format!("{} {} {}", vbdf, kind, options),
        );
        Ok(())
    }

    /// Adds a passthrough device by physical BDF. Options are resolved
    /// from the device's class code unless the caller forces them.
    fn add_passthru_device(
        &mut self,
        bus: u8,
        dev: u8,
        func: u8,
        forced_options: Option<&str>,
    ) -> Result<()> {
        let device = self.board.pci_device(bus, dev, func);
        let options = match forced_options {
            Some(options) => options.to_string(),
            None => self.passthru.options_for(device.as_ref()),
        };

        let vbdf = self.vbdf.allocate(device.as_ref(), Some(&options))?;
        self.script.add_dynamic_parameter(
            "add_passthrough_device",
            &format!("{} 0000:{:02x}:{:02x}.{} {}", vbdf, bus, dev, func, options),
        );

        // Any passthrough device other than the integrated GPU (whose slot
        // is fixed at 2) gets interrupt storm monitoring.
        if vbdf != GPU_PASSTHROUGH_SLOT {
            self.script
                .add_dynamic_parameter("add_interrupt_storm_monitor", "10000 10 1 100");
        }
        Ok(())
    }
}

fn lapic_ids_for(board: &BoardInfo, vm_name: &str, cpus: &[&str]) -> Vec<u32> {
    let mut ids = Vec::new();
    for cpu in cpus {
        match board.lapic_id(cpu) {
            Some(id) => ids.push(id),
            None => warn!(
                "CPU {} is not defined in the board XML, so it can't be available to VM {}",
                cpu, vm_name
            ),
        }
    }
    ids
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Populates a launch script document for one post-launched VM. The order
/// in which devices and options are added is part of the output contract.
pub fn generate_for_one_vm(
    board: &BoardInfo,
    scenario: &ScenarioInfo,
    vm: &VmConfig,
) -> Result<LaunchScriptDocument> {
    let vm_name = vm.name();
    let mut builder = VmScriptBuilder::new(board, vm);

    builder.script.add_init_command("probe_modules");

    // VM types and guest OSes.
    if vm.os_type() == Some("Windows OS") {
        builder.script.add_plain_parameter("--windows");
    }
    builder
        .script
        .set_descriptor("vm_type", &format!("'{}'", vm.vm_type()));
    let scheduler = scenario
        .hv()
        .and_then(|hv| hv.scheduler())
        .unwrap_or_default();
    builder
        .script
        .set_descriptor("scheduler", &format!("'{}'", scheduler));

    // CPU and memory resources.
    let mut lapic_ids = lapic_ids_for(board, vm_name, &vm.cpu_affinity());
    if !lapic_ids.is_empty() {
        lapic_ids.sort_unstable();
        let ids: Vec<String> = lapic_ids.iter().map(u32::to_string).collect();
        builder
            .script
            .add_dynamic_parameter("add_cpus", &ids.join(" "));
    }

    if let Some(size) = vm.memory_megabytes() {
        builder.script.add_plain_parameter(&format!("-m {}M", size));
    }

    if scenario.ssram_enabled() && vm.is_rtvm() {
        builder.script.add_plain_parameter("--ssram");
    }

    // Guest BIOS.
    if vm.vbootloader_enabled() {
        builder
            .script
            .add_plain_parameter("--ovmf /usr/share/acrn/bios/OVMF.fd");
    }

    // Emulated platform devices. The platform bridges sit at fixed
    // "bus:slot" positions.
    if !vm.is_rtvm() {
        builder.add_virtual_device("lpc", Some(&format!("{}:0", LPC_SLOT)), "")?;
    }

    if vm.vuart0_enabled() {
        builder.script.add_plain_parameter("-l com1,stdio");
    }

    // Emulated PCI devices.
    builder.add_virtual_device("hostbridge", Some(&format!("{}:0", HOSTBRIDGE_SLOT)), "")?;

    for region in scenario.ivshmem_regions(vm_name) {
        if let (Some(name), Some(size)) = (region.name(), region.size()) {
            builder.add_virtual_device("ivshmem", None, &format!("dm:/{},{}", name, size))?;
        }
    }

    if vm.console_vuart() == Some("PCI") {
        builder.add_virtual_device("uart", None, "vuart_idx:0")?;
    }
    if let Some(hv) = scenario.hv() {
        // The console UART above is index 0; connections count from 1.
        for (idx, conn) in hv.vuart_connections(vm_name).iter().enumerate() {
            if conn.kind() == Some("pci") {
                builder.add_virtual_device("uart", None, &format!("vuart_idx:{}", idx + 1))?;
            }
        }
    }

    // Mediated PCI devices, including virtio.
    for xhci in vm.usb_xhci() {
        builder.add_virtual_device("xhci", None, xhci)?;
    }

    for input in vm.virtio_inputs() {
        builder.add_virtual_device("virtio-input", None, input)?;
    }

    for console in vm.virtio_consoles() {
        builder.add_virtual_device("virtio-console", None, console)?;
    }

    for network in vm.virtio_networks() {
        // The first comma-separated segment is the tap name; the rest is
        // passed through untouched.
        let mut segments = network.splitn(2, ',');
        let tap = segments.next().unwrap_or_default();
        let mut params = vec![format!("tap={}", tap)];
        if let Some(rest) = segments.next() {
            params.push(rest.to_string());
        }
        builder
            .script
            .add_init_command("mac=$(cat /sys/class/net/e*/address)");
        params.push(format!("mac_seed=${{mac:0:17}}-{}", vm_name));
        builder.add_virtual_device("virtio-net", None, &params.join(","))?;
    }

    for block in vm.virtio_blocks() {
        match block.split_once(':') {
            // A bare entry is a block device or image path used directly.
            None => builder.add_virtual_device("virtio-blk", None, block)?,
            Some((device, image)) => {
                let var = format!("dir_{}", basename(device));
                builder
                    .script
                    .add_init_command(&format!("{}=`mount_partition {}`", var, device));
                builder.add_virtual_device(
                    "virtio-blk",
                    None,
                    &format!("${{{}}}/{}", var, image),
                )?;
                builder
                    .script
                    .add_deinit_command(&format!("unmount_partition ${{{}}}", var));
            }
        }
    }

    // Passthrough PCI devices. Entries that do not start with a
    // "bus:dev.func" hexadecimal triplet are skipped.
    let bdf_regex = Regex::new(r"^([0-9a-f]{2}):([0-1][0-9a-f])\.([0-7])").unwrap();
    for entry in vm.pci_devs() {
        let Some(caps) = bdf_regex.captures(entry) else {
            continue;
        };
        let bus = u8::from_str_radix(&caps[1], 16).unwrap();
        let dev = u8::from_str_radix(&caps[2], 16).unwrap();
        let func = u8::from_str_radix(&caps[3], 16).unwrap();

        // A VGA function with no memory resource on record is a virtual
        // function of the integrated GPU.
        let igd_vf = board.pci_device(bus, dev, func).map_or(false, |d| {
            d.class_code() == Some(VGA_CLASS_CODE) && !d.has_resource("memory")
        });
        if igd_vf {
            builder.add_passthru_device(bus, dev, func, Some("igd-vf"))?;
        } else {
            builder.add_passthru_device(bus, dev, func, None)?;
        }
    }

    // Miscellaneous.
    if vm.is_rtvm() {
        builder.script.add_plain_parameter("--rtvm");
        if vm.lapic_passthrough() {
            builder.script.add_plain_parameter("--lapic_pt");
        }
    }
    builder
        .script
        .add_dynamic_parameter("add_logger_settings", "console=4 kmsg=3 disk=5");

    // The device model treats the last bare token as the VM name, so this
    // must stay the final parameter.
    builder.script.add_plain_parameter(vm_name);

    Ok(builder.script)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD_XML: &str = r#"
        <acrn-config board="test">
            <processors>
                <die id="0">
                    <core id="0">
                        <thread id="0">
                            <cpu_id>0</cpu_id>
                            <apic_id>0x0</apic_id>
                        </thread>
                        <thread id="1">
                            <cpu_id>1</cpu_id>
                            <apic_id>0x2</apic_id>
                        </thread>
                    </core>
                </die>
            </processors>
            <devices>
                <bus type="pci" address="0x0">
                    <device address="0x20000">
                        <vendor>0x8086</vendor>
                        <class>0x030000</class>
                        <resource type="memory" min="0x60000000" max="0x60ffffff"/>
                    </device>
                    <device address="0x20001">
                        <vendor>0x8086</vendor>
                        <class>0x030000</class>
                    </device>
                    <device address="0x1f0006">
                        <vendor>0x8086</vendor>
                        <class>0x020000</class>
                    </device>
                </bus>
            </devices>
        </acrn-config>"#;

    fn scenario_doc(vm_body: &str) -> String {
        format!(
            r#"<acrn-config>
                <hv>
                    <SCHEDULER>SCHED_BVT</SCHEDULER>
                </hv>
                <vm id="0">
                    <load_order>SERVICE_VM</load_order>
                    <name>SERVICE_VM</name>
                </vm>
                <vm id="1">
                    <load_order>POST_LAUNCHED_VM</load_order>
                    <name>POST_VM_1</name>
                    {}
                </vm>
            </acrn-config>"#,
            vm_body
        )
    }

    fn dm_params(rendered: &str) -> Vec<String> {
        rendered
            .lines()
            .skip_while(|l| *l != "dm_params=(")
            .skip(1)
            .take_while(|l| *l != ")")
            .map(|l| l.trim().to_string())
            .collect()
    }

    // Renders the script for the first post-launched VM of the scenario
    // and returns (rendered text, dm_params tokens).
    fn generate_from(scenario_xml: &str) -> (String, Vec<String>) {
        let board_doc = roxmltree::Document::parse(BOARD_XML).unwrap();
        let scenario_doc = roxmltree::Document::parse(scenario_xml).unwrap();
        let board = BoardInfo::new(&board_doc);
        let scenario = ScenarioInfo::new(&scenario_doc);
        let vms = scenario.post_launched_vms();

        let script = generate_for_one_vm(&board, &scenario, &vms[0]).unwrap();
        let rendered = script.render("");
        let params = dm_params(&rendered);
        (rendered, params)
    }

    fn generate(vm_body: &str) -> (String, Vec<String>) {
        generate_from(&scenario_doc(vm_body))
    }

    #[test]
    fn cpu_affinity_maps_to_sorted_lapic_ids() {
        let (_, params) = generate(
            "<cpu_affinity><pcpu_id>1</pcpu_id><pcpu_id>0</pcpu_id></cpu_affinity>",
        );
        assert!(params.contains(&"`add_cpus 0 2`".to_string()));
    }

    #[test]
    fn unresolved_cpu_ids_are_dropped() {
        let (_, params) = generate(
            "<cpu_affinity><pcpu_id>1</pcpu_id><pcpu_id>9</pcpu_id></cpu_affinity>",
        );
        assert!(params.contains(&"`add_cpus 2`".to_string()));

        let (_, params) = generate("<cpu_affinity><pcpu_id>9</pcpu_id></cpu_affinity>");
        assert!(!params.iter().any(|p| p.starts_with("`add_cpus")));
    }

    #[test]
    fn standard_vm_gets_lpc_then_hostbridge() {
        let (rendered, params) = generate("");
        let lpc = params
            .iter()
            .position(|p| p == "`add_virtual_device 1:0 lpc`")
            .unwrap();
        let hostbridge = params
            .iter()
            .position(|p| p == "`add_virtual_device 0:0 hostbridge`")
            .unwrap();
        assert!(lpc < hostbridge);
        assert!(rendered.contains("probe_modules\n"));
    }

    #[test]
    fn rtvm_flags() {
        let (_, params) = generate(
            "<vm_type>RTVM</vm_type>\
             <lapic_passthrough>y</lapic_passthrough>\
             <virtio_devices><console>@stdio:stdio_port</console></virtio_devices>",
        );
        assert!(!params.iter().any(|p| p.contains(" lpc")));
        assert!(params.contains(&"\"--rtvm\"".to_string()));
        assert!(params.contains(&"\"--lapic_pt\"".to_string()));
        // A virtio device on an RTVM turns on virtqueue polling, once.
        assert_eq!(
            params
                .iter()
                .filter(|p| p.contains("--virtio_poll 1000000"))
                .count(),
            1
        );
    }

    #[test]
    fn windows_and_firmware_options() {
        let (_, params) = generate(
            "<os_type>Windows OS</os_type>\
             <vbootloader>Enable</vbootloader>\
             <memory><whole>4096</whole></memory>\
             <vuart0>Enable</vuart0>",
        );
        assert!(params.contains(&"\"--windows\"".to_string()));
        assert!(params.contains(&"\"--ovmf /usr/share/acrn/bios/OVMF.fd\"".to_string()));
        assert!(params.contains(&"\"-m 4096M\"".to_string()));
        assert!(params.contains(&"\"-l com1,stdio\"".to_string()));
    }

    #[test]
    fn ssram_ivshmem_and_pci_vuart() {
        let (_, params) = generate_from(
            r#"<acrn-config>
                <hv>
                    <SCHEDULER>SCHED_BVT</SCHEDULER>
                    <FEATURES>
                        <SSRAM><SSRAM_ENABLED>y</SSRAM_ENABLED></SSRAM>
                        <IVSHMEM>
                            <IVSHMEM_REGION>
                                <NAME>shm_region_0</NAME>
                                <PROVIDED_BY>Device model</PROVIDED_BY>
                                <IVSHMEM_SIZE>2</IVSHMEM_SIZE>
                                <IVSHMEM_VMS>
                                    <IVSHMEM_VM><VM_NAME>POST_VM_1</VM_NAME></IVSHMEM_VM>
                                </IVSHMEM_VMS>
                            </IVSHMEM_REGION>
                        </IVSHMEM>
                    </FEATURES>
                    <vuart_connections>
                        <vuart_connection>
                            <type>pci</type>
                            <endpoint><vm_name>POST_VM_1</vm_name></endpoint>
                            <endpoint><vm_name>SERVICE_VM</vm_name></endpoint>
                        </vuart_connection>
                    </vuart_connections>
                </hv>
                <vm id="0">
                    <load_order>SERVICE_VM</load_order>
                    <name>SERVICE_VM</name>
                </vm>
                <vm id="1">
                    <load_order>POST_LAUNCHED_VM</load_order>
                    <name>POST_VM_1</name>
                    <vm_type>RTVM</vm_type>
                </vm>
            </acrn-config>"#,
        );
        assert!(params.contains(&"\"--ssram\"".to_string()));
        // The shared-memory region takes the first pool slot, the UART
        // connection the next one, counted from index 1.
        assert!(params.contains(&"`add_virtual_device 3 ivshmem dm:/shm_region_0,2`".to_string()));
        assert!(params.contains(&"`add_virtual_device 4 uart vuart_idx:1`".to_string()));
    }

    #[test]
    fn absent_optional_fields_are_omitted() {
        let (_, params) = generate("");
        assert!(!params.iter().any(|p| p.contains("-m ")));
        assert!(!params.iter().any(|p| p.contains("--windows")));
        assert!(!params.iter().any(|p| p.contains("--ovmf")));
        assert!(!params.iter().any(|p| p.contains("--ssram")));
    }

    #[test]
    fn virtio_block_with_mounted_partition() {
        let (rendered, params) = generate(
            "<virtio_devices><block>/dev/sda3:rootfs.img</block></virtio_devices>",
        );
        assert!(rendered.contains("dir_sda3=`mount_partition /dev/sda3`\n"));
        assert!(
            params.contains(&"`add_virtual_device 3 virtio-blk ${dir_sda3}/rootfs.img`".to_string())
        );
        assert!(rendered.contains("unmount_partition ${dir_sda3}\n"));
    }

    #[test]
    fn virtio_block_direct_path() {
        let (rendered, params) =
            generate("<virtio_devices><block>nvme.img</block></virtio_devices>");
        assert!(params.contains(&"`add_virtual_device 3 virtio-blk nvme.img`".to_string()));
        assert!(!rendered.contains("mount_partition"));
    }

    #[test]
    fn virtio_net_tap_and_mac_seed() {
        let (rendered, params) = generate(
            "<virtio_devices>\
             <network>tap0,mac=aa:bb</network>\
             <network>tap1</network>\
             </virtio_devices>",
        );
        assert!(params.iter().any(|p| {
            p.starts_with("`add_virtual_device 3 virtio-net tap=tap0,mac=aa:bb,mac_seed=")
                && p.contains("mac_seed=${mac:0:17}-POST_VM_1")
        }));
        assert!(params
            .iter()
            .any(|p| p.starts_with("`add_virtual_device 4 virtio-net tap=tap1,mac_seed=")));
        // The MAC capture is deduplicated across entries.
        assert_eq!(
            rendered
                .matches("mac=$(cat /sys/class/net/e*/address)")
                .count(),
            1
        );
    }

    #[test]
    fn passthrough_devices() {
        let (_, params) = generate(
            "<pci_devs>\
             <pci_dev>00:1f.6 Ethernet controller</pci_dev>\
             <pci_dev>00:02.0 VGA compatible controller</pci_dev>\
             <pci_dev>not a bdf</pci_dev>\
             </pci_devs>",
        );
        // The NIC takes the first pool slot and triggers storm monitoring.
        assert!(params.contains(&"`add_passthrough_device 3 0000:00:1f.6`".to_string()));
        assert_eq!(
            params
                .iter()
                .filter(|p| p.contains("add_interrupt_storm_monitor 10000 10 1 100"))
                .count(),
            1
        );
        // The GPU lands on the fixed slot with no storm monitor of its own.
        assert!(params.contains(&"`add_passthrough_device 2 0000:00:02.0`".to_string()));
        // The malformed entry is skipped entirely.
        assert_eq!(
            params
                .iter()
                .filter(|p| p.starts_with("`add_passthrough_device"))
                .count(),
            2
        );
    }

    #[test]
    fn vga_without_memory_resource_is_igd_vf() {
        let (_, params) = generate(
            "<pci_devs><pci_dev>00:02.1 VGA compatible controller</pci_dev></pci_devs>",
        );
        assert!(params.contains(&"`add_passthrough_device 2 0000:00:02.1 igd-vf`".to_string()));
    }

    #[test]
    fn ptm_option_applies_to_passthrough_nic() {
        let (_, params) = generate(
            "<PTM>y</PTM>\
             <pci_devs><pci_dev>00:1f.6 Ethernet controller</pci_dev></pci_devs>",
        );
        assert!(
            params.contains(&"`add_passthrough_device 3 0000:00:1f.6 enable_ptm`".to_string())
        );
    }

    #[test]
    fn vm_name_is_last_parameter() {
        let (_, params) = generate(
            "<virtio_devices><block>nvme.img</block></virtio_devices>\
             <pci_devs><pci_dev>00:1f.6 Ethernet controller</pci_dev></pci_devs>",
        );
        assert_eq!(params.last(), Some(&"\"POST_VM_1\"".to_string()));
        let logger = params
            .iter()
            .position(|p| p == "`add_logger_settings console=4 kmsg=3 disk=5`")
            .unwrap();
        assert_eq!(logger, params.len() - 2);
    }

    #[test]
    fn device_emission_order() {
        let (_, params) = generate(
            "<console_vuart>PCI</console_vuart>\
             <usb_xhci>1-1:1-2</usb_xhci>\
             <virtio_devices>\
             <input>/dev/input/event0</input>\
             <console>@stdio:stdio_port</console>\
             <network>tap0</network>\
             <block>nvme.img</block>\
             </virtio_devices>\
             <pci_devs><pci_dev>00:1f.6 Ethernet controller</pci_dev></pci_devs>",
        );
        let kinds = [
            "lpc",
            "hostbridge",
            "uart",
            "xhci",
            "virtio-input",
            "virtio-console",
            "virtio-net",
            "virtio-blk",
        ];
        let positions: Vec<usize> = kinds
            .iter()
            .map(|k| {
                params
                    .iter()
                    .position(|p| {
                        p.starts_with("`add_virtual_device") && p.contains(&format!(" {}", k))
                    })
                    .unwrap()
            })
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        // Passthrough comes after every emulated device.
        let passthru = params
            .iter()
            .position(|p| p.starts_with("`add_passthrough_device"))
            .unwrap();
        assert!(passthru > *positions.last().unwrap());
    }
}
