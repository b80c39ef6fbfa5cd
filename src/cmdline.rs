// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use argh::FromArgs;

#[derive(FromArgs, Debug)]
/// Generate device-model launch scripts for the post-launched VMs of a
/// scenario.
pub struct Args {
    /// XML file summarizing characteristics of the target board
    #[argh(option)]
    pub board: PathBuf,

    /// XML file specifying the scenario to be set up
    #[argh(option)]
    pub scenario: PathBuf,

    /// id of the post-launched VM whose launch script is to be generated,
    /// or 0 to process all post-launched VMs
    #[argh(option, default = "0")]
    pub user_vmid: u32,

    /// directory where generated scripts are placed
    #[argh(option, default = "PathBuf::from(\"output\")")]
    pub out: PathBuf,
}
