/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The formatting half of the `printf` opcode.

use super::eval::EvalContext;
use super::eval::EvalError;

/// Longest string `%s` will read from the inferior.
const MAX_STRING: usize = 4096;

#[derive(Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
    long: bool,
}

impl Spec {
    fn pad(&self, body: String, sign: &str, prefix: &str) -> String {
        let len = sign.len() + prefix.len() + body.chars().count();
        if len >= self.width {
            return format!("{}{}{}", sign, prefix, body);
        }
        let fill = self.width - len;
        if self.left {
            format!("{}{}{}{}", sign, prefix, body, " ".repeat(fill))
        } else if self.zero && self.precision.is_none() {
            format!("{}{}{}{}", sign, prefix, "0".repeat(fill), body)
        } else {
            format!("{}{}{}{}", " ".repeat(fill), sign, prefix, body)
        }
    }

    // Apply an integer precision (minimum digit count).
    fn digits(&self, digits: String) -> String {
        match self.precision {
            Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
            _ => digits,
        }
    }

    fn unsigned(&self, v: u64) -> u64 {
        if self.long { v } else { v as u32 as u64 }
    }

    fn signed(&self, v: u64) -> i64 {
        if self.long { v as i64 } else { v as i32 as i64 }
    }
}

/// Render `format` with `args`, reading `%s` strings through `ctx`.
pub(crate) fn format_printf(
    format: &[u8],
    args: &[u64],
    ctx: &mut EvalContext,
) -> Result<String, EvalError> {
    let mut out = String::new();
    let mut args = args.iter().copied();
    let mut i = 0;

    while i < format.len() {
        let c = format[i];
        i += 1;
        if c != b'%' {
            out.push(c as char);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = format.get(i) {
            match flag {
                b'-' => spec.left = true,
                b'0' => spec.zero = true,
                b'+' => spec.plus = true,
                b' ' => spec.space = true,
                b'#' => spec.alt = true,
                _ => break,
            }
            i += 1;
        }
        while let Some(d) = format.get(i).filter(|d| d.is_ascii_digit()) {
            spec.width = spec.width * 10 + (d - b'0') as usize;
            i += 1;
        }
        if format.get(i) == Some(&b'.') {
            i += 1;
            let mut p = 0;
            while let Some(d) = format.get(i).filter(|d| d.is_ascii_digit()) {
                p = p * 10 + (d - b'0') as usize;
                i += 1;
            }
            spec.precision = Some(p);
        }
        while let Some(&m) = format.get(i) {
            match m {
                b'l' | b'z' | b'j' | b't' => spec.long = true,
                b'h' => {}
                _ => break,
            }
            i += 1;
        }

        let conv = *format
            .get(i)
            .ok_or_else(|| EvalError::Printf(String::from("truncated conversion")))?;
        i += 1;

        if conv == b'%' {
            out.push('%');
            continue;
        }

        let arg = args
            .next()
            .ok_or_else(|| EvalError::Printf(String::from("not enough arguments")))?;

        let rendered = match conv {
            b'd' | b'i' => {
                let v = spec.signed(arg);
                let sign = if v < 0 {
                    "-"
                } else if spec.plus {
                    "+"
                } else if spec.space {
                    " "
                } else {
                    ""
                };
                spec.pad(spec.digits(v.unsigned_abs().to_string()), sign, "")
            }
            b'u' => spec.pad(spec.digits(spec.unsigned(arg).to_string()), "", ""),
            b'x' | b'X' => {
                let v = spec.unsigned(arg);
                let digits = if conv == b'x' {
                    format!("{:x}", v)
                } else {
                    format!("{:X}", v)
                };
                let prefix = match (spec.alt && v != 0, conv) {
                    (true, b'x') => "0x",
                    (true, _) => "0X",
                    _ => "",
                };
                spec.pad(spec.digits(digits), "", prefix)
            }
            b'o' => {
                let v = spec.unsigned(arg);
                let prefix = if spec.alt && v != 0 { "0" } else { "" };
                spec.pad(spec.digits(format!("{:o}", v)), "", prefix)
            }
            b'p' => spec.pad(format!("{:x}", arg), "", "0x"),
            b'c' => spec.pad(((arg as u8) as char).to_string(), "", ""),
            b's' => {
                let limit = spec.precision.unwrap_or(MAX_STRING).min(MAX_STRING);
                let bytes = ctx.read_string(arg, limit)?;
                spec.pad(String::from_utf8_lossy(&bytes).into_owned(), "", "")
            }
            other => {
                return Err(EvalError::Printf(format!(
                    "unsupported conversion '{}'",
                    other as char
                )));
            }
        };
        out.push_str(&rendered);
    }

    Ok(out)
}
