// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Read-only query facade over the board and scenario descriptor XML files.
//!
//! Both descriptors are assumed to be schema-valid. Accessors return `None`
//! (or an empty list) for anything absent instead of validating structure;
//! only actively checked conditions, such as a VM node without an id, are
//! reported as errors.

use remain::sorted;
use roxmltree::Node;
use thiserror::Error;

pub use crate::board::BoardInfo;
pub use crate::board::DeviceNode;
pub use crate::scenario::HvConfig;
pub use crate::scenario::IvshmemRegion;
pub use crate::scenario::ScenarioInfo;
pub use crate::scenario::VmConfig;
pub use crate::scenario::VuartConnection;

mod board;
mod scenario;

#[sorted]
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    #[error("VM node carries an unparseable id: {0}")]
    InvalidVmId(String),
    #[error("VM node carries no id attribute")]
    MissingVmId,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-empty, trimmed text of the first descendant element with the given
/// tag name, at any depth.
pub(crate) fn first_text<'d>(node: Node<'d, 'd>, tag: &str) -> Option<&'d str> {
    node.descendants()
        .filter(|n| n.has_tag_name(tag))
        .find_map(element_text)
}

/// Non-empty, trimmed text of the first direct child with the given tag
/// name.
pub(crate) fn child_text<'d>(node: Node<'d, 'd>, tag: &str) -> Option<&'d str> {
    node.children()
        .filter(|n| n.has_tag_name(tag))
        .find_map(element_text)
}

pub(crate) fn element_text<'d>(node: Node<'d, 'd>) -> Option<&'d str> {
    node.text().map(str::trim).filter(|t| !t.is_empty())
}

/// Parses a hexadecimal number with or without a `0x` prefix, as the board
/// XML spells APIC ids.
pub(crate) fn parse_hex(text: &str) -> Option<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}
