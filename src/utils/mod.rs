// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 gateflow contributors

//! Utility modules
//!
//! Common utilities for the gateflow CLI.

pub mod colors;
pub mod progress;

pub use colors::*;
pub use progress::*;
