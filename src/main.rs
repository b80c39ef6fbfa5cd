// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Generates one device-model launch script per post-launched VM from a
//! board XML and a scenario XML.

mod cmdline;
mod generate;

use std::fs;
use std::path::Path;
use std::process::ExitCode;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use descriptor::BoardInfo;
use descriptor::ScenarioInfo;
use log::error;
use log::info;
use log::warn;

use crate::cmdline::Args;
use crate::generate::generate_for_one_vm;

const SCRIPT_TEMPLATE: &str = include_str!("../assets/launch_script_template.sh");

fn create_output_dir(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        bail!("cannot create output directory {}: File exists", path.display());
    }
    fs::create_dir_all(path)
        .with_context(|| format!("cannot create output directory {}", path.display()))
}

fn run(args: &Args) -> Result<()> {
    let board_xml = fs::read_to_string(&args.board)
        .with_context(|| format!("failed to read board XML {}", args.board.display()))?;
    let scenario_xml = fs::read_to_string(&args.scenario)
        .with_context(|| format!("failed to read scenario XML {}", args.scenario.display()))?;

    let board_doc = roxmltree::Document::parse(&board_xml).context("malformed board XML")?;
    let scenario_doc =
        roxmltree::Document::parse(&scenario_xml).context("malformed scenario XML")?;
    let board = BoardInfo::new(&board_doc);
    let scenario = ScenarioInfo::new(&scenario_doc);

    let post_vms = scenario.post_launched_vms();
    if scenario.service_vm_id().is_none() && !post_vms.is_empty() {
        bail!(
            "the scenario does not define a service VM, so no launch scripts can be \
             generated for its post-launched VMs"
        );
    }
    let Some(service_vm_id) = scenario.service_vm_id() else {
        info!("the scenario has no post-launched VMs; nothing to generate");
        return Ok(());
    };

    create_output_dir(&args.out)?;

    // A non-zero --user-vmid selects a single VM, counted from the service
    // VM's scenario id.
    let selected_id = (args.user_vmid != 0).then(|| args.user_vmid + service_vm_id);

    let mut generated = 0;
    for vm in &post_vms {
        let vm_id = vm.id()?;
        if selected_id.is_some_and(|selected| vm_id != selected) {
            continue;
        }

        let user_vm_index = vm_id.checked_sub(service_vm_id).with_context(|| {
            format!(
                "post-launched VM '{}' has id {} below the service VM's id {}",
                vm.name(),
                vm_id,
                service_vm_id
            )
        })?;

        let script = generate_for_one_vm(&board, &scenario, vm)
            .with_context(|| format!("failed to generate a launch script for VM '{}'", vm.name()))?;
        let path = args
            .out
            .join(format!("launch_user_vm_id{}.sh", user_vm_index));
        fs::write(&path, script.render(SCRIPT_TEMPLATE))
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(
            "Successfully generated launch script {} for VM '{}'.",
            path.display(),
            vm.name()
        );
        generated += 1;
    }

    if generated == 0 && selected_id.is_some() {
        warn!(
            "VM {} is not a post-launched VM in this scenario; no launch script was generated",
            args.user_vmid
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();
    if let Err(e) = run(&args) {
        error!("{:#}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
