/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::BTreeMap;
use thiserror::Error;

use super::ops::Op;
use super::printf::format_printf;
use super::validate::read_u16;
use super::validate::AgentFlaw;
use super::AgentExpr;
use crate::regcache::RegCache;
use crate::target::TargetError;
use crate::tdesc::ByteOrder;

/// Default evaluation stack depth.
pub const STACK_MAX: usize = 100;

/// Run-time evaluation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("expression is empty")]
    EmptyExpression,
    #[error("nothing on the stack to return")]
    EmptyStack,
    #[error("evaluation stack overflow")]
    StackOverflow,
    #[error("evaluation stack underflow")]
    StackUnderflow,
    #[error("opcode {0:#04x} is not handled by this evaluator")]
    UnhandledOpcode(u8),
    #[error("unrecognized opcode {0:#04x}")]
    UnrecognizedOpcode(u8),
    #[error("division by zero")]
    DivideByZero,
    #[error("jump to invalid offset {0}")]
    InvalidGoto(usize),
    #[error("gave up after {0} instructions")]
    TooManySteps(usize),
    #[error("cannot read memory at {0:#x}")]
    MemoryRead(u64),
    #[error("cannot read register {0}")]
    RegisterRead(usize),
    #[error("expression failed validation: {0}")]
    Invalid(AgentFlaw),
    #[error("bad printf: {0}")]
    Printf(String),
}

/// Inferior memory as seen by an expression.
pub trait AgentMemory {
    fn read_memory(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, TargetError>;
}

/// Receives data recorded by the `trace*` opcodes.
pub trait TraceCollector {
    fn collect_memory(&mut self, addr: u64, data: &[u8]);
    fn collect_state_variable(&mut self, num: u16, value: i64);
}

/// Trace state variables, by number.
pub type StateVariables = BTreeMap<u16, i64>;

/// Everything an expression can touch while it runs.
pub struct EvalContext<'a> {
    regcache: Option<&'a RegCache>,
    memory: &'a mut dyn AgentMemory,
    state_variables: Option<&'a mut StateVariables>,
    collector: Option<&'a mut dyn TraceCollector>,
    byte_order: ByteOrder,
    stack_limit: usize,
    output: Vec<String>,
}

impl<'a> EvalContext<'a> {
    pub fn new(memory: &'a mut dyn AgentMemory) -> Self {
        EvalContext {
            regcache: None,
            memory,
            state_variables: None,
            collector: None,
            byte_order: ByteOrder::Little,
            stack_limit: STACK_MAX,
            output: Vec::new(),
        }
    }

    /// Registers for `reg`; also decides the byte order of memory loads.
    pub fn regcache(mut self, regcache: &'a RegCache) -> Self {
        self.byte_order = regcache.tdesc().byte_order();
        self.regcache = Some(regcache);
        self
    }

    pub fn state_variables(mut self, tsv: &'a mut StateVariables) -> Self {
        self.state_variables = Some(tsv);
        self
    }

    pub fn collector(mut self, collector: &'a mut dyn TraceCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn stack_limit(mut self, limit: usize) -> Self {
        self.stack_limit = limit;
        self
    }

    /// Lines produced by `printf`.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn read(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, EvalError> {
        self.memory
            .read_memory(addr, len)
            .map_err(|_| EvalError::MemoryRead(addr))
    }

    fn load(&mut self, addr: u64, len: usize) -> Result<u64, EvalError> {
        let bytes = self.read(addr, len)?;
        if bytes.len() != len {
            return Err(EvalError::MemoryRead(addr));
        }
        let mut buf = [0u8; 8];
        Ok(match self.byte_order {
            ByteOrder::Little => {
                buf[..len].copy_from_slice(&bytes);
                u64::from_le_bytes(buf)
            }
            ByteOrder::Big => {
                buf[8 - len..].copy_from_slice(&bytes);
                u64::from_be_bytes(buf)
            }
        })
    }

    fn trace_memory(&mut self, addr: u64, len: usize) -> Result<(), EvalError> {
        if self.collector.is_none() {
            return Ok(());
        }
        let data = self.read(addr, len)?;
        if let Some(collector) = self.collector.as_mut() {
            collector.collect_memory(addr, &data);
        }
        Ok(())
    }

    // Like `trace_memory` but stops after the first NUL byte.
    fn trace_string(&mut self, addr: u64, limit: usize) -> Result<(), EvalError> {
        if self.collector.is_none() {
            return Ok(());
        }
        let mut data = Vec::new();
        while data.len() < limit {
            let at = addr
                .checked_add(data.len() as u64)
                .ok_or(EvalError::MemoryRead(addr))?;
            let byte = self.read(at, 1)?[0];
            data.push(byte);
            if byte == 0 {
                break;
            }
        }
        if let Some(collector) = self.collector.as_mut() {
            collector.collect_memory(addr, &data);
        }
        Ok(())
    }

    pub(crate) fn read_string(&mut self, addr: u64, limit: usize) -> Result<Vec<u8>, EvalError> {
        let mut s = Vec::new();
        while s.len() < limit {
            let at = addr
                .checked_add(s.len() as u64)
                .ok_or(EvalError::MemoryRead(addr))?;
            let byte = self.read(at, 1)?[0];
            if byte == 0 {
                break;
            }
            s.push(byte);
        }
        Ok(s)
    }
}

struct Stack {
    values: Vec<u64>,
    limit: usize,
}

impl Stack {
    fn push(&mut self, v: u64) -> Result<(), EvalError> {
        if self.values.len() >= self.limit {
            return Err(EvalError::StackOverflow);
        }
        self.values.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<u64, EvalError> {
        self.values.pop().ok_or(EvalError::StackUnderflow)
    }

    fn top(&mut self) -> Result<&mut u64, EvalError> {
        self.values.last_mut().ok_or(EvalError::StackUnderflow)
    }

    // Pops `top`, then applies `f(next, top)` in place of `next`.
    fn binary<F>(&mut self, f: F) -> Result<(), EvalError>
    where
        F: FnOnce(u64, u64) -> Result<u64, EvalError>,
    {
        let top = self.pop()?;
        let next = self.top()?;
        *next = f(*next, top)?;
        Ok(())
    }
}

fn sign_extend(v: u64, bits: u8) -> u64 {
    if bits == 0 || bits >= 64 {
        return v;
    }
    let mask = 1u64 << (bits - 1);
    let v = v & ((1u64 << bits) - 1);
    (v ^ mask).wrapping_sub(mask)
}

fn zero_extend(v: u64, bits: u8) -> u64 {
    if bits >= 64 {
        v
    } else {
        v & ((1u64 << bits) - 1)
    }
}

/// Instructions one evaluation may execute.
const MAX_STEPS: usize = 100_000;

/// Run `expr` to completion and return the value on top of the stack.
pub fn evaluate(expr: &AgentExpr, ctx: &mut EvalContext) -> Result<u64, EvalError> {
    if let Some(flaw) = expr.flaw() {
        return Err(EvalError::Invalid(flaw));
    }
    let bytes = expr.bytes();
    if bytes.is_empty() {
        return Err(EvalError::EmptyExpression);
    }

    let mut stack = Stack {
        values: Vec::new(),
        limit: ctx.stack_limit,
    };
    let mut pc = 0;
    let mut steps = 0;

    while pc < bytes.len() {
        // Backward jumps can loop forever.
        steps += 1;
        if steps > MAX_STEPS {
            return Err(EvalError::TooManySteps(MAX_STEPS));
        }
        let byte = bytes[pc];
        let op = Op::from_u8(byte).ok_or(EvalError::UnrecognizedOpcode(byte))?;
        let operand = pc + 1;
        pc += 1 + op.info().op_size;

        match op {
            Op::Add => stack.binary(|a, b| Ok(a.wrapping_add(b)))?,
            Op::Sub => stack.binary(|a, b| Ok(a.wrapping_sub(b)))?,
            Op::Mul => stack.binary(|a, b| Ok(a.wrapping_mul(b)))?,
            Op::DivSigned => stack.binary(|a, b| match b {
                0 => Err(EvalError::DivideByZero),
                _ => Ok((a as i64).wrapping_div(b as i64) as u64),
            })?,
            Op::DivUnsigned => {
                stack.binary(|a, b| a.checked_div(b).ok_or(EvalError::DivideByZero))?
            }
            Op::RemSigned => stack.binary(|a, b| match b {
                0 => Err(EvalError::DivideByZero),
                _ => Ok((a as i64).wrapping_rem(b as i64) as u64),
            })?,
            Op::RemUnsigned => {
                stack.binary(|a, b| a.checked_rem(b).ok_or(EvalError::DivideByZero))?
            }
            Op::Lsh => stack.binary(|a, b| Ok(if b < 64 { a << b } else { 0 }))?,
            Op::RshSigned => stack.binary(|a, b| Ok(((a as i64) >> b.min(63)) as u64))?,
            Op::RshUnsigned => stack.binary(|a, b| Ok(if b < 64 { a >> b } else { 0 }))?,
            Op::Trace => {
                let len = stack.pop()?;
                let addr = stack.pop()?;
                ctx.trace_memory(addr, len as usize)?;
            }
            Op::TraceQuick => {
                let addr = *stack.top()?;
                ctx.trace_memory(addr, bytes[operand] as usize)?;
            }
            Op::LogNot => {
                let top = stack.top()?;
                *top = (*top == 0) as u64;
            }
            Op::BitAnd => stack.binary(|a, b| Ok(a & b))?,
            Op::BitOr => stack.binary(|a, b| Ok(a | b))?,
            Op::BitXor => stack.binary(|a, b| Ok(a ^ b))?,
            Op::BitNot => {
                let top = stack.top()?;
                *top = !*top;
            }
            Op::Equal => stack.binary(|a, b| Ok((a == b) as u64))?,
            Op::LessSigned => stack.binary(|a, b| Ok(((a as i64) < (b as i64)) as u64))?,
            Op::LessUnsigned => stack.binary(|a, b| Ok((a < b) as u64))?,
            Op::Ext => {
                let top = stack.top()?;
                *top = sign_extend(*top, bytes[operand]);
            }
            Op::ZeroExt => {
                let top = stack.top()?;
                *top = zero_extend(*top, bytes[operand]);
            }
            Op::Ref8 | Op::Ref16 | Op::Ref32 | Op::Ref64 => {
                let len = match op {
                    Op::Ref8 => 1,
                    Op::Ref16 => 2,
                    Op::Ref32 => 4,
                    _ => 8,
                };
                let addr = *stack.top()?;
                let value = ctx.load(addr, len)?;
                *stack.top()? = value;
            }
            Op::IfGoto => {
                let target = read_u16(bytes, operand);
                if stack.pop()? != 0 {
                    if target >= bytes.len() {
                        return Err(EvalError::InvalidGoto(target));
                    }
                    pc = target;
                }
            }
            Op::Goto => {
                let target = read_u16(bytes, operand);
                if target >= bytes.len() {
                    return Err(EvalError::InvalidGoto(target));
                }
                pc = target;
            }
            Op::Const8 => stack.push(bytes[operand] as u64)?,
            Op::Const16 => stack.push(read_u16(bytes, operand) as u64)?,
            Op::Const32 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(&bytes[operand..operand + 4]);
                stack.push(u32::from_be_bytes(buf) as u64)?
            }
            Op::Const64 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&bytes[operand..operand + 8]);
                stack.push(u64::from_be_bytes(buf))?
            }
            Op::Reg => {
                let regno = read_u16(bytes, operand);
                let value = ctx
                    .regcache
                    .ok_or(EvalError::RegisterRead(regno))?
                    .read_u64(regno)
                    .map_err(|_| EvalError::RegisterRead(regno))?;
                stack.push(value)?;
            }
            Op::End => break,
            Op::Dup => {
                let top = *stack.top()?;
                stack.push(top)?;
            }
            Op::Pop => {
                stack.pop()?;
            }
            Op::Swap => {
                let len = stack.values.len();
                if len < 2 {
                    return Err(EvalError::StackUnderflow);
                }
                stack.values.swap(len - 1, len - 2);
            }
            Op::Rot => {
                // (a b c -- c a b)
                let len = stack.values.len();
                if len < 3 {
                    return Err(EvalError::StackUnderflow);
                }
                stack.values[len - 3..].rotate_right(1);
            }
            Op::Pick => {
                let depth = bytes[operand] as usize;
                let len = stack.values.len();
                if depth >= len {
                    return Err(EvalError::StackUnderflow);
                }
                let value = stack.values[len - 1 - depth];
                stack.push(value)?;
            }
            Op::Getv => {
                let num = read_u16(bytes, operand) as u16;
                let value = ctx
                    .state_variables
                    .as_ref()
                    .and_then(|tsv| tsv.get(&num).copied())
                    .unwrap_or(0);
                stack.push(value as u64)?;
            }
            Op::Setv => {
                let num = read_u16(bytes, operand) as u16;
                let value = *stack.top()? as i64;
                if let Some(tsv) = ctx.state_variables.as_mut() {
                    tsv.insert(num, value);
                }
            }
            Op::Tracev => {
                let num = read_u16(bytes, operand) as u16;
                let value = ctx
                    .state_variables
                    .as_ref()
                    .and_then(|tsv| tsv.get(&num).copied())
                    .unwrap_or(0);
                if let Some(collector) = ctx.collector.as_mut() {
                    collector.collect_state_variable(num, value);
                }
            }
            Op::Tracenz => {
                let limit = stack.pop()?;
                let addr = stack.pop()?;
                ctx.trace_string(addr, limit as usize)?;
            }
            Op::Trace16 => {
                let addr = *stack.top()?;
                ctx.trace_memory(addr, read_u16(bytes, operand))?;
            }
            Op::Printf => {
                let nargs = bytes[operand] as usize;
                let slen = read_u16(bytes, operand + 1);
                let start = operand + 3;
                let format = &bytes[start..start + slen];
                pc = start + slen;

                let _function = stack.pop()?;
                let _channel = stack.pop()?;
                let mut args = Vec::with_capacity(nargs);
                for _ in 0..nargs {
                    args.push(stack.pop()?);
                }
                match format.split_last() {
                    Some((0, format)) => {
                        let line = format_printf(format, &args, ctx)?;
                        ctx.output.push(line);
                    }
                    _ => {
                        return Err(EvalError::Printf(String::from(
                            "unterminated format string",
                        )));
                    }
                }
            }
            Op::Float
            | Op::RefFloat
            | Op::RefDouble
            | Op::RefLongDouble
            | Op::LToD
            | Op::DToL => return Err(EvalError::UnhandledOpcode(byte)),
            Op::Invalid2 => return Err(EvalError::UnrecognizedOpcode(byte)),
        }
    }

    stack.values.last().copied().ok_or(EvalError::EmptyStack)
}
