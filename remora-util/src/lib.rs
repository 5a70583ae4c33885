/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Shared plumbing for programs that embed the remora stub: command-line
//! arguments, configuration files and log set-up.

pub mod commandline;
mod config;

pub use commandline::CommonStubArguments;
pub use config::load_config;
pub use config::parse_config;
