/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use thiserror::Error;

use super::ops::Op;

/// Problems found by static analysis of an expression.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AgentFlaw {
    #[error("unknown opcode {op:#04x} at offset {pc}")]
    BadInstruction { pc: usize, op: u8 },
    #[error("instruction at offset {pc} runs past the end of the expression")]
    IncompleteInstruction { pc: usize },
    #[error("stack height mismatch at offset {pc}")]
    HeightMismatch { pc: usize },
    #[error("jump at offset {pc} has a bad target")]
    BadJump { pc: usize },
    #[error("unconditional jump at offset {pc} is followed by unreachable code")]
    Hole { pc: usize },
    #[error("expression pops more values than it pushes")]
    StackUnderflow,
}

/// What an expression needs from the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub min_height: i32,
    pub max_height: i32,
    pub final_height: i32,
    /// Bit `n` of byte `n / 8` is set when register `n` is read.
    pub reg_mask: Vec<u8>,
}

impl Requirements {
    fn add_register(&mut self, reg: usize) {
        let byte = reg / 8;
        if self.reg_mask.len() <= byte {
            self.reg_mask.resize(byte + 1, 0);
        }
        self.reg_mask[byte] |= 1 << (reg % 8);
    }

    pub fn uses_register(&self, reg: usize) -> bool {
        self.reg_mask
            .get(reg / 8)
            .map_or(false, |b| b & (1 << (reg % 8)) != 0)
    }
}

pub(crate) fn read_u16(bytes: &[u8], at: usize) -> usize {
    (bytes[at] as usize) << 8 | bytes[at + 1] as usize
}

// Operand size and stack effect of `op` at `pc`, accounting for the
// variable-length `printf` operand.
fn effect(bytes: &[u8], pc: usize, op: Op) -> Option<(usize, i32, i32)> {
    let info = op.info();
    if op != Op::Printf {
        return Some((info.op_size, info.consumed, info.produced));
    }
    // nargs:u8, slen:u16, then the format string.
    if pc + 3 >= bytes.len() {
        return None;
    }
    let nargs = bytes[pc + 1] as i32;
    let slen = read_u16(bytes, pc + 2);
    Some((3 + slen, nargs + 2, 0))
}

/// Walk `bytes` tracking the stack height along every path and compute the
/// expression's requirements.
pub fn analyze(bytes: &[u8]) -> Result<Requirements, AgentFlaw> {
    let len = bytes.len();
    let mut targets = vec![false; len];
    let mut boundary = vec![false; len];
    let mut heights = vec![0i32; len];
    let mut reqs = Requirements::default();
    let mut height = 0i32;

    let mut pc = 0;
    while pc < len {
        let op = Op::from_u8(bytes[pc]).ok_or(AgentFlaw::BadInstruction { pc, op: bytes[pc] })?;
        let (op_size, consumed, produced) =
            effect(bytes, pc, op).ok_or(AgentFlaw::IncompleteInstruction { pc })?;
        if pc + 1 + op_size > len {
            return Err(AgentFlaw::IncompleteInstruction { pc });
        }

        // A forward jump recorded the height it expects to find here.
        if targets[pc] && heights[pc] != height {
            return Err(AgentFlaw::HeightMismatch { pc });
        }
        boundary[pc] = true;
        heights[pc] = height;

        height -= consumed;
        reqs.min_height = reqs.min_height.min(height);
        height += produced;
        reqs.max_height = reqs.max_height.max(height);

        match op {
            Op::Goto | Op::IfGoto => {
                let target = read_u16(bytes, pc + 1);
                if target >= len {
                    return Err(AgentFlaw::BadJump { pc });
                }
                if (targets[target] || boundary[target]) && heights[target] != height {
                    return Err(AgentFlaw::HeightMismatch { pc });
                }
                targets[target] = true;
                heights[target] = height;

                // Code after an unconditional jump is only reachable as the
                // target of some other jump.
                if op == Op::Goto && pc + 3 < len {
                    if !targets[pc + 3] {
                        return Err(AgentFlaw::Hole { pc });
                    }
                    height = heights[pc + 3];
                }
            }
            Op::Reg => reqs.add_register(read_u16(bytes, pc + 1)),
            _ => {}
        }

        pc += 1 + op_size;
    }

    if let Some(pc) = (0..len).find(|&i| targets[i] && !boundary[i]) {
        return Err(AgentFlaw::BadJump { pc });
    }
    if reqs.min_height < 0 {
        return Err(AgentFlaw::StackUnderflow);
    }

    reqs.final_height = height;
    Ok(reqs)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic_heights() {
        // const8 2; const8 3; add; const8 5; equal; end
        let reqs = analyze(&[0x22, 2, 0x22, 3, 0x02, 0x22, 5, 0x13, 0x27]).unwrap();
        assert_eq!(reqs.min_height, 0);
        assert_eq!(reqs.max_height, 2);
        assert_eq!(reqs.final_height, 1);
    }

    #[test]
    fn forward_jump_height_mismatch() {
        // 0: const8 1
        // 2: if_goto 8      height 0 at target 8
        // 5: const8 7       height 1
        // 7: dup            height 2
        // 8: end            reached with height 2, expected 0
        let flaw = analyze(&[0x22, 1, 0x20, 0, 8, 0x22, 7, 0x28, 0x27]).unwrap_err();
        assert_eq!(flaw, AgentFlaw::HeightMismatch { pc: 8 });
    }

    #[test]
    fn balanced_branches() {
        // 0: const8 1
        // 2: if_goto 10
        // 5: const8 0
        // 7: goto 12
        // 10: const8 9
        // 12: end
        let reqs = analyze(&[
            0x22, 1, 0x20, 0, 10, 0x22, 0, 0x21, 0, 12, 0x22, 9, 0x27,
        ])
        .unwrap();
        assert_eq!(reqs.final_height, 1);
    }

    #[test]
    fn structural_flaws() {
        assert_eq!(
            analyze(&[0x22, 1, 0xee]),
            Err(AgentFlaw::BadInstruction { pc: 2, op: 0xee })
        );
        assert_eq!(
            analyze(&[0x24, 0, 0]),
            Err(AgentFlaw::IncompleteInstruction { pc: 0 })
        );
        // goto 0x100 in a 3 byte buffer
        assert_eq!(
            analyze(&[0x21, 1, 0]),
            Err(AgentFlaw::BadJump { pc: 0 })
        );
        // goto 4, followed by an unreachable const8
        assert_eq!(
            analyze(&[0x21, 0, 5, 0x22, 1, 0x27]),
            Err(AgentFlaw::Hole { pc: 0 })
        );
        // if_goto into the middle of a const16
        assert_eq!(
            analyze(&[0x22, 1, 0x20, 0, 6, 0x23, 0, 1, 0x27]),
            Err(AgentFlaw::BadJump { pc: 6 })
        );
        assert_eq!(analyze(&[0x02, 0x27]), Err(AgentFlaw::StackUnderflow));
    }

    #[test]
    fn register_mask() {
        // reg 16; reg 3; add; end
        let reqs = analyze(&[0x26, 0, 16, 0x26, 0, 3, 0x02, 0x27]).unwrap();
        assert!(reqs.uses_register(16));
        assert!(reqs.uses_register(3));
        assert!(!reqs.uses_register(4));
        assert_eq!(reqs.reg_mask, vec![0x08, 0x00, 0x01]);
    }

    #[test]
    fn printf_operand() {
        // const8 42; const8 0 (chan); const8 0 (fn); printf 1 "%d\0"; end
        let mut bytes = vec![0x22, 42, 0x22, 0, 0x22, 0, 0x34, 1, 0, 3];
        bytes.extend_from_slice(b"%d\0");
        bytes.push(0x27);
        let reqs = analyze(&bytes).unwrap();
        assert_eq!(reqs.max_height, 3);
        assert_eq!(reqs.final_height, 0);
    }
}
