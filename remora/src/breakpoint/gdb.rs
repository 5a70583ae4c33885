/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Breakpoints requested by the debugger through `Z`/`z` packets, with
//! their target-side conditions and commands.

use std::sync::Arc;

use super::*;
use crate::ax::EvalContext;
use crate::regcache::RegCache;

/// Skip to the next `;`, or to the end.
fn skip_to_semicolon(buf: &[u8]) -> &[u8] {
    match buf.iter().position(|c| *c == b';') {
        Some(pos) => &buf[pos..],
        None => &[],
    }
}

impl BreakpointTable {
    /// The debugger's breakpoint of `kind` at `addr`. `size` of `None`
    /// matches any size.
    pub fn find_gdb_breakpoint(
        &self,
        kind: PointKind,
        addr: u64,
        size: Option<usize>,
    ) -> Option<BreakpointId> {
        self.breakpoints
            .iter()
            .find(|(_, bp)| {
                bp.ty == BreakpointType::Gdb(kind)
                    && self.raw.get(bp.raw).map_or(false, |raw| {
                        raw.addr == addr && size.map_or(true, |s| s == raw.size)
                    })
            })
            .map(|(id, _)| id)
    }

    /// Handle `Z<kind>,<addr>,<size>`.
    ///
    /// Code breakpoints are deduplicated per address: the debugger
    /// re-inserts a breakpoint it already has whenever its conditions
    /// change, so that must not be an error. A request with a new size
    /// replaces the old breakpoint.
    pub fn set_gdb_breakpoint(
        &mut self,
        target: &mut dyn Target,
        kind: PointKind,
        addr: u64,
        size: usize,
    ) -> Result<BreakpointId, BreakpointError> {
        if kind != PointKind::Software && !target.supports_point(kind) {
            return Err(BreakpointError::Unsupported(kind));
        }

        let existing = if kind.is_watchpoint() {
            // Watchpoints of different lengths at one address are distinct.
            self.find_gdb_breakpoint(kind, addr, Some(size))
        } else {
            match self.find_gdb_breakpoint(kind, addr, None) {
                Some(id) if self.raw_of(id).map(|raw| raw.size) != Some(size) => {
                    tracing::debug!(
                        "{:?} breakpoint at {:#x} requested with a new size",
                        kind,
                        addr
                    );
                    // Only a breakpoint still in memory gets its shadow
                    // written back.
                    if let Some(raw) = self.breakpoints.get(id).map(|bp| bp.raw) {
                        if self.raw.get(raw).map(|r| r.state) == Some(InsertState::Inserted) {
                            self.validate_inserted(target, raw);
                        }
                    }
                    self.delete_breakpoint(target, id)?;
                    None
                }
                Some(_) if kind == PointKind::Software => {
                    // The breakpoint may have vanished under us, e.g. when
                    // a library was unloaded and another mapped at the
                    // same address.
                    self.validate_breakpoints(target);
                    self.find_gdb_breakpoint(kind, addr, None)
                }
                found => found,
            }
        };

        match existing {
            Some(id) => Ok(id),
            None => self.set_breakpoint(target, BreakpointType::Gdb(kind), kind, addr, size, None),
        }
    }

    /// Handle `z<kind>,<addr>,<size>`.
    pub fn delete_gdb_breakpoint(
        &mut self,
        target: &mut dyn Target,
        kind: PointKind,
        addr: u64,
        size: usize,
    ) -> Result<(), BreakpointError> {
        if kind != PointKind::Software && !target.supports_point(kind) {
            return Err(BreakpointError::Unsupported(kind));
        }
        let id = self
            .find_gdb_breakpoint(kind, addr, Some(size))
            .ok_or(BreakpointError::NotFound)?;
        self.clear_conditions_and_commands(id);
        self.delete_breakpoint(target, id)
    }

    pub fn clear_conditions_and_commands(&mut self, id: BreakpointId) {
        if let Some(bp) = self.breakpoints.get_mut(id) {
            bp.conditions.clear();
            bp.commands.clear();
        }
    }

    pub fn add_condition(&mut self, id: BreakpointId, expr: Arc<AgentExpr>) {
        if let Some(bp) = self.breakpoints.get_mut(id) {
            bp.conditions.push(expr);
        }
    }

    pub fn add_command(&mut self, id: BreakpointId, expr: Arc<AgentExpr>, persistent: bool) {
        if let Some(bp) = self.breakpoints.get_mut(id) {
            bp.commands.push(AgentCommand { expr, persistent });
        }
    }

    /// Attach the options trailing a `Z0`/`Z1` packet:
    /// `;X<len>,<hex>` conditions and a `;cmds:<persist>,X<len>,<hex>...`
    /// command list. Expressions that do not parse or validate are dropped
    /// with a warning.
    pub fn process_point_options(&mut self, id: BreakpointId, mut options: &[u8]) {
        while let Some(&c) = options.first() {
            if c == b';' {
                options = &options[1..];
            } else if c == b'X' {
                options = match AgentExpr::parse(options) {
                    Ok((expr, rest)) => {
                        self.add_condition(id, Arc::new(expr));
                        rest
                    }
                    Err(err) => {
                        tracing::warn!(
                            "condition evaluation failed ({}), assuming unconditional",
                            err
                        );
                        skip_to_semicolon(options)
                    }
                };
            } else if let Some(rest) = options.strip_prefix(b"cmds:") {
                let persistent = rest.first() == Some(&b'1');
                let mut rest = rest.get(2..).unwrap_or_default();
                while rest.first() == Some(&b'X') {
                    match AgentExpr::parse(rest) {
                        Ok((expr, next)) => {
                            self.add_command(id, Arc::new(expr), persistent);
                            rest = next;
                        }
                        Err(err) => {
                            tracing::warn!("dropping breakpoint command: {}", err);
                            rest = skip_to_semicolon(rest);
                        }
                    }
                }
                options = rest;
            } else {
                tracing::warn!("unknown breakpoint option {:?}, ignoring", c as char);
                options = skip_to_semicolon(options);
            }
        }
    }

    /// Whether the debugger has a code breakpoint at `addr`.
    pub fn gdb_breakpoint_here(&self, addr: u64) -> bool {
        self.find_gdb_breakpoint(PointKind::Software, addr, None)
            .or_else(|| self.find_gdb_breakpoint(PointKind::Hardware, addr, None))
            .is_some()
    }

    /// Whether no code breakpoint at `addr` carries commands, i.e. a stop
    /// there must be reported to the debugger.
    pub fn gdb_no_commands_at(&self, addr: u64) -> bool {
        [PointKind::Software, PointKind::Hardware]
            .into_iter()
            .filter_map(|kind| self.find_gdb_breakpoint(kind, addr, None))
            .filter_map(|id| self.breakpoints.get(id))
            .all(|bp| bp.commands.is_empty())
    }

    /// Whether any command must keep running after the debugger leaves.
    pub fn any_persistent_commands(&self) -> bool {
        self.breakpoints
            .iter()
            .any(|(_, bp)| bp.commands.iter().any(|cmd| cmd.persistent))
    }

    /// Kind of the debugger's watchpoint covering `data_addr`.
    pub fn find_watchpoint_at(&self, data_addr: u64) -> Option<PointKind> {
        self.breakpoints.iter().find_map(|(_, bp)| match bp.ty {
            BreakpointType::Gdb(kind) if kind.is_watchpoint() => self
                .raw
                .get(bp.raw)
                .filter(|raw| raw.addr <= data_addr && data_addr < raw.end())
                .map(|_| kind),
            _ => None,
        })
    }

    /// Whether a stop at `addr` should be reported, judging by the
    /// conditions of the debugger's code breakpoints there. A breakpoint
    /// without conditions is always true. Any failure to evaluate counts as
    /// true so the debugger gets to look at the stop itself.
    pub fn evaluate_conditions(
        &mut self,
        target: &mut dyn Target,
        regcache: &RegCache,
        addr: u64,
    ) -> bool {
        let stack_limit = self.stack_limit;
        for kind in [PointKind::Software, PointKind::Hardware] {
            let conditions = match self
                .find_gdb_breakpoint(kind, addr, None)
                .and_then(|id| self.breakpoints.get(id))
            {
                Some(bp) => bp.conditions.clone(),
                None => continue,
            };
            if conditions.is_empty() {
                return true;
            }
            for cond in conditions {
                let mut memory = ShadowedMemory::new(self, target);
                let mut ctx = EvalContext::new(&mut memory)
                    .regcache(regcache)
                    .stack_limit(stack_limit);
                match cond.evaluate(&mut ctx) {
                    Ok(0) => {}
                    Ok(_) => return true,
                    Err(err) => {
                        tracing::warn!(
                            "condition at {:#x} failed to evaluate, reporting the stop: {}",
                            addr,
                            err
                        );
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Run the commands of the debugger's code breakpoints at `addr`,
    /// returning whatever they printed. The first failing command stops
    /// the rest.
    pub fn run_commands(
        &mut self,
        target: &mut dyn Target,
        regcache: &RegCache,
        addr: u64,
    ) -> Vec<String> {
        let stack_limit = self.stack_limit;
        let mut output = Vec::new();
        for kind in [PointKind::Software, PointKind::Hardware] {
            let commands: Vec<Arc<AgentExpr>> = match self
                .find_gdb_breakpoint(kind, addr, None)
                .and_then(|id| self.breakpoints.get(id))
            {
                Some(bp) => bp.commands.iter().map(|cmd| cmd.expr.clone()).collect(),
                None => continue,
            };
            for cmd in commands {
                let mut memory = ShadowedMemory::new(self, target);
                let mut ctx = EvalContext::new(&mut memory)
                    .regcache(regcache)
                    .stack_limit(stack_limit);
                let result = cmd.evaluate(&mut ctx);
                output.extend(ctx.take_output());
                if let Err(err) = result {
                    tracing::warn!("breakpoint command at {:#x} failed: {}", addr, err);
                    return output;
                }
            }
        }
        output
    }
}
