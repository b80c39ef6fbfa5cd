// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::HashSet;

// An append-if-absent list of strings preserving first-insertion order.
// The set gives constant-time duplicate detection, the vector the order.
#[derive(Default)]
struct OrderedSet {
    items: Vec<String>,
    seen: HashSet<String>,
}

impl OrderedSet {
    fn insert(&mut self, item: String) {
        if self.seen.insert(item.clone()) {
            self.items.push(item);
        }
    }

    fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.iter().map(String::as_str)
    }
}

/// Ordered, deduplicating accumulator for one VM's launch script: VM
/// descriptor variables, initialization commands, device-model parameters
/// and deinitialization commands. Created fresh per VM and rendered once
/// at the end of generation.
#[derive(Default)]
pub struct LaunchScriptDocument {
    descriptors: Vec<(String, String)>,
    init_commands: OrderedSet,
    dm_parameters: OrderedSet,
    deinit_commands: OrderedSet,
}

impl LaunchScriptDocument {
    pub fn new() -> Self {
        Default::default()
    }

    /// Upserts a shell variable assignment. Insertion order is preserved;
    /// re-adding a name overwrites its value in place.
    pub fn set_descriptor(&mut self, name: &str, value: &str) {
        if let Some((_, v)) = self.descriptors.iter_mut().find(|(n, _)| n == name) {
            *v = value.to_string();
        } else {
            self.descriptors.push((name.to_string(), value.to_string()));
        }
    }

    pub fn add_init_command(&mut self, command: &str) {
        self.init_commands.insert(command.to_string());
    }

    pub fn add_deinit_command(&mut self, command: &str) {
        self.deinit_commands.insert(command.to_string());
    }

    /// Adds a literal device-model option, quoted.
    pub fn add_plain_parameter(&mut self, opt: &str) {
        self.dm_parameters.insert(format!("\"{}\"", opt));
    }

    /// Adds a device-model option computed at script run time: "cmd args"
    /// is whitespace-normalized and wrapped for command substitution.
    pub fn add_dynamic_parameter(&mut self, cmd: &str, args: &str) {
        let full = format!("{} {}", cmd, args);
        let full = full.split_whitespace().collect::<Vec<_>>().join(" ");
        self.dm_parameters.insert(format!("`{}`", full));
    }

    /// Whether any accumulated device-model parameter satisfies the
    /// predicate.
    pub fn has_parameter(&self, predicate: impl Fn(&str) -> bool) -> bool {
        self.dm_parameters.iter().any(predicate)
    }

    /// Renders the final script: the externally supplied template body
    /// first, then the generated section in a fixed block order. Pure with
    /// respect to the accumulated state, so repeated calls yield identical
    /// text.
    pub fn render(&self, template: &str) -> String {
        let mut s = String::from(template);

        s.push_str("\n###\n# Everything below is generated by launch_cfg_gen\n###\n\n");

        s.push_str("# Defining variables that describe VM types\n");
        for (name, value) in &self.descriptors {
            s.push_str(&format!("{}={}\n", name, value));
        }
        s.push('\n');

        s.push_str("# Initializing\n");
        for command in self.init_commands.iter() {
            s.push_str(command);
            s.push('\n');
        }
        s.push('\n');

        s.push_str("# Invoking ACRN device model\n");
        s.push_str("dm_params=(\n");
        for param in self.dm_parameters.iter() {
            s.push_str(&format!("    {}\n", param));
        }
        s.push_str(")\n\n");

        s.push_str("echo \"Launch device model with parameters: ${dm_params[*]}\"\n");
        s.push_str("acrn-dm ${dm_params[*]}\n\n");

        s.push_str("# Deinitializing\n");
        for command in self.deinit_commands.iter() {
            s.push_str(command);
            s.push('\n');
        }

        s
    }
}
