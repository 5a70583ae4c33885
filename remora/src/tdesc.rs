/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Target descriptions: the register layout a register cache is sized from.

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

/// One register of a target description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDesc {
    pub name: String,
    pub bitsize: usize,
    /// Byte offset in the raw register buffer.
    pub offset: usize,
    /// gdb type name, e.g. `int64`, `code_ptr` or `vec128`.
    pub reg_type: String,
    /// The gdb feature this register belongs to.
    pub feature: String,
}

impl RegisterDesc {
    pub fn size(&self) -> usize {
        (self.bitsize + 7) / 8
    }
}

/// Ordered register layout of an architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescription {
    arch: String,
    byte_order: ByteOrder,
    registers: Vec<RegisterDesc>,
    registers_size: usize,
    pc_regno: Option<usize>,
    expedite: Vec<usize>,
    feature: String,
}

impl TargetDescription {
    /// Start an empty description for `arch`, e.g. `i386:x86-64`.
    pub fn new(arch: &str, byte_order: ByteOrder) -> Self {
        TargetDescription {
            arch: arch.to_owned(),
            byte_order,
            registers: Vec::new(),
            registers_size: 0,
            pc_regno: None,
            expedite: Vec::new(),
            feature: String::from("org.gnu.gdb.core"),
        }
    }

    /// Subsequent registers belong to `feature`.
    pub fn feature(mut self, feature: &str) -> Self {
        self.feature = feature.to_owned();
        self
    }

    /// Append a register. Offsets are assigned in order.
    pub fn register(mut self, name: &str, bitsize: usize, reg_type: &str) -> Self {
        let reg = RegisterDesc {
            name: name.to_owned(),
            bitsize,
            offset: self.registers_size,
            reg_type: reg_type.to_owned(),
            feature: self.feature.clone(),
        };
        self.registers_size += reg.size();
        self.registers.push(reg);
        self
    }

    /// Mark the register called `name` as the program counter.
    pub fn pc(mut self, name: &str) -> Self {
        self.pc_regno = self.find_register(name);
        self
    }

    /// Registers sent along with every stop reply.
    pub fn expedite(mut self, names: &[&str]) -> Self {
        self.expedite = names
            .iter()
            .filter_map(|name| self.find_register(name))
            .collect();
        self
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn registers(&self) -> &[RegisterDesc] {
        &self.registers
    }

    pub fn num_registers(&self) -> usize {
        self.registers.len()
    }

    /// Size in bytes of the whole raw register buffer.
    pub fn registers_size(&self) -> usize {
        self.registers_size
    }

    pub fn pc_regno(&self) -> Option<usize> {
        self.pc_regno
    }

    pub fn expedite_regs(&self) -> &[usize] {
        &self.expedite
    }

    pub fn find_register(&self, name: &str) -> Option<usize> {
        self.registers.iter().position(|r| r.name == name)
    }

    /// Render as a gdb target description document (`target.xml`).
    pub fn to_xml(&self) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\"?>\n<!DOCTYPE target SYSTEM \"gdb-target.dtd\">\n<target>\n",
        );
        let _ = writeln!(xml, "<architecture>{}</architecture>", self.arch);

        let mut current: Option<&str> = None;
        for (regnum, reg) in self.registers.iter().enumerate() {
            if current != Some(reg.feature.as_str()) {
                if current.is_some() {
                    xml.push_str("</feature>\n");
                }
                let _ = writeln!(xml, "<feature name=\"{}\">", reg.feature);
                current = Some(reg.feature.as_str());
            }
            let _ = writeln!(
                xml,
                "<reg name=\"{}\" bitsize=\"{}\" type=\"{}\" regnum=\"{}\"/>",
                reg.name, reg.bitsize, reg.reg_type, regnum
            );
        }
        if current.is_some() {
            xml.push_str("</feature>\n");
        }
        xml.push_str("</target>\n");
        xml
    }

    /// amd64 linux layout: `64bit-core.xml`, `64bit-sse.xml`,
    /// `64bit-linux.xml` and `64bit-segments.xml`, in that order.
    pub fn amd64() -> Arc<Self> {
        let mut tdesc =
            TargetDescription::new("i386:x86-64", ByteOrder::Little).feature("org.gnu.gdb.i386.core");
        for name in [
            "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11",
            "r12", "r13", "r14", "r15",
        ] {
            let ty = match name {
                "rbp" | "rsp" => "data_ptr",
                _ => "int64",
            };
            tdesc = tdesc.register(name, 64, ty);
        }
        tdesc = tdesc
            .register("rip", 64, "code_ptr")
            .register("eflags", 32, "i386_eflags");
        for name in ["cs", "ss", "ds", "es", "fs", "gs"] {
            tdesc = tdesc.register(name, 32, "int32");
        }
        for i in 0..8 {
            tdesc = tdesc.register(&format!("st{}", i), 80, "i387_ext");
        }
        for name in [
            "fctrl", "fstat", "ftag", "fiseg", "fioff", "foseg", "fooff", "fop",
        ] {
            tdesc = tdesc.register(name, 32, "int");
        }
        tdesc = tdesc.feature("org.gnu.gdb.i386.sse");
        for i in 0..16 {
            tdesc = tdesc.register(&format!("xmm{}", i), 128, "vec128");
        }
        tdesc = tdesc
            .register("mxcsr", 32, "i386_mxcsr")
            .feature("org.gnu.gdb.i386.linux")
            .register("orig_rax", 64, "int")
            .feature("org.gnu.gdb.i386.segments")
            .register("fs_base", 64, "int")
            .register("gs_base", 64, "int")
            .pc("rip")
            .expedite(&["rbp", "rsp", "rip"]);
        Arc::new(tdesc)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn amd64_layout() {
        let tdesc = TargetDescription::amd64();
        assert_eq!(tdesc.num_registers(), 60);
        assert_eq!(tdesc.pc_regno(), Some(16));
        assert_eq!(tdesc.registers()[16].offset, 128);
        // 16 * 8 + 8 + 4 + 6 * 4 + 8 * 10 + 8 * 4 + 16 * 16 + 4 + 3 * 8
        assert_eq!(tdesc.registers_size(), 560);
        assert_eq!(tdesc.expedite_regs(), &[6, 7, 16]);
        assert_eq!(tdesc.find_register("xmm0"), Some(40));
    }

    #[test]
    fn xml_groups_features() {
        let tdesc = TargetDescription::new("test", ByteOrder::Big)
            .register("r0", 32, "int")
            .feature("org.example.extra")
            .register("r1", 16, "int");
        let xml = tdesc.to_xml();
        assert!(xml.contains("<architecture>test</architecture>"));
        assert!(xml.contains("<feature name=\"org.gnu.gdb.core\">\n<reg name=\"r0\""));
        assert!(xml.contains("<feature name=\"org.example.extra\">\n<reg name=\"r1\""));
        assert_eq!(xml.matches("</feature>").count(), 2);
    }
}
