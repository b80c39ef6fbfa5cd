// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Building blocks for one VM's device-model launch script: the virtual
//! PCI slot allocator, the passthrough option resolver and the ordered,
//! deduplicating script document.
//!
//! All three are scoped to a single VM. A generation pass constructs fresh
//! instances per VM, feeds values from the allocator and the resolver into
//! the document, and renders the document exactly once at the end.

use remain::sorted;
use thiserror::Error;

pub use crate::document::LaunchScriptDocument;
pub use crate::passthru::PassthruDeviceOptions;
pub use crate::vbdf::VirtualBdfAllocator;
pub use crate::vbdf::GPU_PASSTHROUGH_SLOT;
pub use crate::vbdf::HOSTBRIDGE_SLOT;
pub use crate::vbdf::LPC_SLOT;
pub use crate::vbdf::VGA_CLASS_CODE;

mod document;
mod passthru;
mod vbdf;

#[sorted]
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    #[error("out of virtual PCI slots; the VM configures more devices than the emulated bus can hold")]
    SlotsExhausted,
}

pub type Result<T> = std::result::Result<T, Error>;
