/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fs;
use std::path::Path;

use anyhow::Context;
use remora::StubConfig;

/// Parses a TOML stub configuration. Missing keys keep their defaults.
pub fn parse_config(text: &str) -> anyhow::Result<StubConfig> {
    let config: StubConfig = toml::from_str(text)?;
    if config.packet_size < 0x100 {
        anyhow::bail!("packet_size {:#x} is too small", config.packet_size);
    }
    if config.max_agent_stack == 0 {
        anyhow::bail!("max_agent_stack must be at least 1");
    }
    Ok(config)
}

/// Reads the stub configuration from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<StubConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid configuration {}", path.display()))
}
