// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use descriptor::DeviceNode;
use descriptor::VmConfig;

/// Class-code prefix of Ethernet controllers.
const ETHERNET_CLASS_PREFIX: &str = "0x0200";

// Class/option pairs that apply regardless of the scenario. Currently
// empty; scenario-derived entries are registered on top in new().
const SEED_OPTIONS: &[(&str, &[&str])] = &[];

/// Maps a passthrough device's PCI class code to extra device-model option
/// tokens. Built once per VM from the static seed table plus
/// scenario-derived entries.
pub struct PassthruDeviceOptions {
    // (class-code prefix, option tokens), in registration order.
    options: Vec<(String, Vec<String>)>,
}

impl PassthruDeviceOptions {
    pub fn new(vm: &VmConfig) -> Self {
        let mut resolver = PassthruDeviceOptions {
            options: SEED_OPTIONS
                .iter()
                .map(|(prefix, opts)| {
                    (
                        prefix.to_string(),
                        opts.iter().map(|o| o.to_string()).collect(),
                    )
                })
                .collect(),
        };
        if vm.ptm_enabled() {
            resolver.add_option(ETHERNET_CLASS_PREFIX, "enable_ptm");
        }
        resolver
    }

    fn add_option(&mut self, class_prefix: &str, option: &str) {
        if let Some((_, tokens)) = self
            .options
            .iter_mut()
            .find(|(prefix, _)| prefix == class_prefix)
        {
            tokens.push(option.to_string());
        } else {
            self.options
                .push((class_prefix.to_string(), vec![option.to_string()]));
        }
    }

    /// Comma-joined option tokens for the device, empty if none apply. A
    /// device matches every registered prefix its class code starts with.
    pub fn options_for(&self, device: Option<&DeviceNode>) -> String {
        let Some(class_code) = device.and_then(|d| d.class_code()) else {
            return String::new();
        };
        let mut tokens: Vec<&str> = Vec::new();
        for (prefix, opts) in &self.options {
            if class_code.starts_with(prefix.as_str()) {
                tokens.extend(opts.iter().map(String::as_str));
            }
        }
        tokens.join(",")
    }
}
