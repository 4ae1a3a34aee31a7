use std::collections::HashSet;
use std::fmt::{self, Write};

use crate::commands::CommandTable;
use crate::opcode::Opcode;
use crate::program::render::{float_literal, quote, render_tagged};
use crate::script::{Function, Instruction, Operand, PushRole, Script};
use crate::tagged::{encode_float, encode_string, TaggedValue};

use super::stack::Labels;
use super::DisasmOptions;

/// One function block in emission order.
#[derive(Debug)]
pub struct BodyListing {
    pub function: usize,
    /// Relative offset right past the body.
    pub end: u32,
    pub notes: Vec<Option<String>>,
}

pub struct Emitter<'a> {
    pub script: &'a Script,
    pub labels: &'a Labels,
    pub commands: &'a CommandTable,
    pub code_base: u32,
    pub options: &'a DisasmOptions,
}

fn tagged_list(values: &[TaggedValue]) -> String {
    let items: Vec<String> = values.iter().map(render_tagged).collect();
    format!("[{}]", items.join(", "))
}

fn pair_list(values: &[(TaggedValue, TaggedValue)]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|(a, b)| format!("({}, {})", render_tagged(a), render_tagged(b)))
        .collect();
    format!("[{}]", items.join(", "))
}

impl Emitter<'_> {
    pub fn write(&self, out: &mut String, bodies: &[BodyListing]) -> fmt::Result {
        let s = self.script;
        writeln!(
            out,
            "create_script_header(name={}, varin={}, varout={})",
            quote(&s.name),
            pair_list(&s.vars_in),
            pair_list(&s.vars_out)
        )?;
        writeln!(out)?;
        for f in &s.functions {
            writeln!(
                out,
                "add_function(name={}, input_args={}, output_args={}, b0=0x{:02X}, b1=0x{:02X})",
                quote(&f.name),
                tagged_list(&f.input_args),
                tagged_list(&f.output_args),
                f.b0,
                f.b1
            )?;
        }

        let mut placed: HashSet<u32> = HashSet::new();
        for body in bodies {
            let f = &s.functions[body.function];
            writeln!(out)?;
            self.write_body(out, f, body, &mut placed)?;
        }

        writeln!(out)?;
        writeln!(out, "compile()")
    }

    fn write_label(&self, out: &mut String, abs: u32, placed: &mut HashSet<u32>) -> fmt::Result {
        if let Some(name) = self.labels.get(abs) {
            if placed.insert(abs) {
                writeln!(out, "Label({})", quote(name))?;
            }
        }
        Ok(())
    }

    fn write_body(
        &self,
        out: &mut String,
        f: &Function,
        body: &BodyListing,
        placed: &mut HashSet<u32>,
    ) -> fmt::Result {
        writeln!(out, "set_current_function({})", quote(&f.name))?;
        for st in &f.structs {
            writeln!(
                out,
                "add_struct(id={}, nb_sth1=0x{:04X}, params={})",
                st.id,
                st.nb_sth1,
                tagged_list(&st.params)
            )?;
        }

        for (i, inst) in f.instructions.iter().enumerate() {
            self.write_label(out, self.code_base + inst.addr, placed)?;
            if inst.opcode == Opcode::LineMarker && !self.options.markers {
                writeln!(out)?;
                continue;
            }
            out.push_str(&self.instruction(inst));
            match body.notes.get(i).and_then(|n| n.as_ref()) {
                Some(note) if self.options.decomp => writeln!(out, " # {}", note)?,
                _ => writeln!(out)?,
            }
        }
        if f.code_start().is_some() {
            self.write_label(out, self.code_base + body.end, placed)?;
        }
        Ok(())
    }

    fn operand(&self, op: &Operand) -> String {
        match op {
            Operand::Tagged(v) => render_tagged(v),
            Operand::U8(v) => v.to_string(),
            Operand::U16(v) => v.to_string(),
            Operand::I32(v) => v.to_string(),
            Operand::Address(a) => format!("0x{:X}", a),
            Operand::Label(name) => quote(name),
            Operand::Function(ix) => match self.script.functions.get(*ix as usize) {
                Some(f) => quote(&f.name),
                None => ix.to_string(),
            },
        }
    }

    /// One instruction call, without the line break.
    pub fn instruction(&self, inst: &Instruction) -> String {
        match inst.opcode {
            Opcode::Push => self.push(inst),
            Opcode::RunCmd => {
                let (id, op, argc) = (
                    inst.u8_at(0).unwrap_or(0),
                    inst.u8_at(1).unwrap_or(0),
                    inst.u8_at(2).unwrap_or(0),
                );
                match self.commands.name_of(id, op) {
                    Some(name) => format!("RUNCMD({}, {})", quote(name), argc),
                    None => format!("RUNCMD({}, {}, {})", id, op, argc),
                }
            }
            opcode => {
                let args: Vec<String> = inst.operands.iter().map(|op| self.operand(op)).collect();
                format!("{}({})", opcode.name(), args.join(", "))
            }
        }
    }

    fn push(&self, inst: &Instruction) -> String {
        match (inst.role, inst.operands.first()) {
            (Some(PushRole::CallerFunctionIndex), _) => "PUSHCALLERFUNCTIONINDEX()".into(),
            (Some(PushRole::ReturnAddress), Some(Operand::Label(name))) => {
                format!("PUSHRETURNADDRESS({})", quote(name))
            }
            (_, Some(Operand::Tagged(v))) => match v {
                TaggedValue::Undef(x) => format!("PUSHUNDEFINED(0x{:X})", x),
                TaggedValue::Int(x) => format!("PUSHINTEGER({})", x),
                TaggedValue::Float(f) if f.is_finite() => format!("PUSHFLOAT({})", float_literal(*f)),
                TaggedValue::Float(f) => format!("PUSH(0x{:08X})", encode_float(*f)),
                TaggedValue::Str(s) => format!("PUSHSTRING({})", quote(s)),
                TaggedValue::StrPtr(off) => format!("PUSH(0x{:08X})", encode_string(*off)),
            },
            (_, other) => format!(
                "PUSH({})",
                other.map(|op| self.operand(op)).unwrap_or_default()
            ),
        }
    }
}
