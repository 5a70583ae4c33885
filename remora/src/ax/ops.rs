/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

/// Static properties of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    /// Number of immediate operand bytes following the opcode.
    pub op_size: usize,
    /// Stack slots popped.
    pub consumed: i32,
    /// Stack slots pushed.
    pub produced: i32,
}

macro_rules! opcodes {
    (
        $(#[$attrs:meta])*
        $vis:vis enum $Name:ident {
            $($op:ident = $value:literal, $name:literal, $size:literal, $consumed:literal, $produced:literal;)*
        }
    ) => {
        $(#[$attrs])*
        #[repr(u8)]
        $vis enum $Name {
            $($op = $value,)*
        }

        impl $Name {
            pub fn from_u8(byte: u8) -> Option<Self> {
                match byte {
                    $($value => Some($Name::$op),)*
                    _ => None,
                }
            }

            pub fn info(self) -> OpInfo {
                match self {
                    $($Name::$op => OpInfo {
                        name: $name,
                        op_size: $size,
                        consumed: $consumed,
                        produced: $produced,
                    },)*
                }
            }
        }
    };
}

opcodes! {
    /// Agent expression opcodes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        Float = 0x01, "float", 0, 0, 0;
        Add = 0x02, "add", 0, 2, 1;
        Sub = 0x03, "sub", 0, 2, 1;
        Mul = 0x04, "mul", 0, 2, 1;
        DivSigned = 0x05, "div_signed", 0, 2, 1;
        DivUnsigned = 0x06, "div_unsigned", 0, 2, 1;
        RemSigned = 0x07, "rem_signed", 0, 2, 1;
        RemUnsigned = 0x08, "rem_unsigned", 0, 2, 1;
        Lsh = 0x09, "lsh", 0, 2, 1;
        RshSigned = 0x0a, "rsh_signed", 0, 2, 1;
        RshUnsigned = 0x0b, "rsh_unsigned", 0, 2, 1;
        Trace = 0x0c, "trace", 0, 2, 0;
        TraceQuick = 0x0d, "trace_quick", 1, 1, 1;
        LogNot = 0x0e, "log_not", 0, 1, 1;
        BitAnd = 0x0f, "bit_and", 0, 2, 1;
        BitOr = 0x10, "bit_or", 0, 2, 1;
        BitXor = 0x11, "bit_xor", 0, 2, 1;
        BitNot = 0x12, "bit_not", 0, 1, 1;
        Equal = 0x13, "equal", 0, 2, 1;
        LessSigned = 0x14, "less_signed", 0, 2, 1;
        LessUnsigned = 0x15, "less_unsigned", 0, 2, 1;
        Ext = 0x16, "ext", 1, 1, 1;
        Ref8 = 0x17, "ref8", 0, 1, 1;
        Ref16 = 0x18, "ref16", 0, 1, 1;
        Ref32 = 0x19, "ref32", 0, 1, 1;
        Ref64 = 0x1a, "ref64", 0, 1, 1;
        RefFloat = 0x1b, "ref_float", 0, 1, 1;
        RefDouble = 0x1c, "ref_double", 0, 1, 1;
        RefLongDouble = 0x1d, "ref_long_double", 0, 1, 1;
        LToD = 0x1e, "l_to_d", 0, 1, 1;
        DToL = 0x1f, "d_to_l", 0, 1, 1;
        IfGoto = 0x20, "if_goto", 2, 1, 0;
        Goto = 0x21, "goto", 2, 0, 0;
        Const8 = 0x22, "const8", 1, 0, 1;
        Const16 = 0x23, "const16", 2, 0, 1;
        Const32 = 0x24, "const32", 4, 0, 1;
        Const64 = 0x25, "const64", 8, 0, 1;
        Reg = 0x26, "reg", 2, 0, 1;
        End = 0x27, "end", 0, 0, 0;
        Dup = 0x28, "dup", 0, 1, 2;
        Pop = 0x29, "pop", 0, 1, 0;
        ZeroExt = 0x2a, "zero_ext", 1, 1, 1;
        Swap = 0x2b, "swap", 0, 2, 2;
        Getv = 0x2c, "getv", 2, 0, 1;
        Setv = 0x2d, "setv", 2, 0, 0;
        Tracev = 0x2e, "tracev", 2, 0, 0;
        Tracenz = 0x2f, "tracenz", 0, 2, 0;
        Trace16 = 0x30, "trace16", 2, 1, 1;
        Invalid2 = 0x31, "invalid2", 0, 0, 0;
        Pick = 0x32, "pick", 1, 0, 1;
        Rot = 0x33, "rot", 0, 3, 3;
        Printf = 0x34, "printf", 0, 0, 0;
    }
}
