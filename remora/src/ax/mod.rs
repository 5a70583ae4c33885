/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Agent expressions: bytecode sent by the debugger to be evaluated on the
//! target, e.g. breakpoint conditions and `dprintf` commands.
//! See https://sourceware.org/gdb/current/onlinedocs/gdb/Agent-Expressions.html.

mod eval;
mod ops;
mod printf;
mod validate;

pub use eval::*;
pub use ops::*;
pub use validate::*;

use std::fmt;
use thiserror::Error;

use crate::hex::*;

/// Error parsing an expression from its wire form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentExprError {
    #[error("expression must start with 'X<len>,'")]
    Malformed,
    #[error(transparent)]
    Hex(#[from] GdbHexError),
    #[error(transparent)]
    Flaw(#[from] AgentFlaw),
}

/// An immutable bytecode expression together with the results of its static
/// analysis.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentExpr {
    bytes: Vec<u8>,
    reqs: Requirements,
    flaw: Option<AgentFlaw>,
}

impl fmt::Debug for AgentExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AgentExpr")
            .field("bytes", &encode_hex_string(&self.bytes))
            .field("max_height", &self.reqs.max_height)
            .field("flaw", &self.flaw)
            .finish()
    }
}

impl AgentExpr {
    /// Wrap `bytes`, running static analysis once.
    pub fn new(bytes: Vec<u8>) -> Self {
        let (reqs, flaw) = match analyze(&bytes) {
            Ok(reqs) => (reqs, None),
            Err(flaw) => (Requirements::default(), Some(flaw)),
        };
        AgentExpr { bytes, reqs, flaw }
    }

    /// Parse one `X<len>,<hex>` expression from the front of `buf`,
    /// returning it along with the unparsed rest. Flawed expressions are
    /// rejected.
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8]), AgentExprError> {
        let buf = buf.strip_prefix(b"X").ok_or(AgentExprError::Malformed)?;
        let comma = buf
            .iter()
            .position(|c| *c == b',')
            .ok_or(AgentExprError::Malformed)?;
        let len: usize = decode_hex(&buf[..comma])?;
        let hex = buf
            .get(comma + 1..comma + 1 + 2 * len)
            .ok_or(AgentExprError::Malformed)?;
        let expr = AgentExpr::new(decode_hex_string(hex)?);
        if let Some(flaw) = expr.flaw {
            return Err(flaw.into());
        }
        Ok((expr, &buf[comma + 1 + 2 * len..]))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn flaw(&self) -> Option<AgentFlaw> {
        self.flaw
    }

    pub fn min_height(&self) -> i32 {
        self.reqs.min_height
    }

    pub fn max_height(&self) -> i32 {
        self.reqs.max_height
    }

    pub fn reg_mask(&self) -> &[u8] {
        &self.reqs.reg_mask
    }

    pub fn uses_register(&self, reg: usize) -> bool {
        self.reqs.uses_register(reg)
    }

    pub fn evaluate(&self, ctx: &mut EvalContext) -> Result<u64, EvalError> {
        evaluate(self, ctx)
    }
}
