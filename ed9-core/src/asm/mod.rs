//! Builder program to `.dat`.
//!
//! [`Assembler`] holds the whole emit state for one file. Its methods are the
//! builder calls of the textual program; [`dispatch`] maps parsed calls onto
//! them.

pub mod dispatch;
pub mod layout;
pub mod patch;

use std::collections::HashMap;

use crate::binary::BinaryWriter;
use crate::commands::{CommandId, CommandTable};
use crate::error::{Diagnostics, Ed9Error, Position, Result};
use crate::opcode::{Opcode, OperandKind};
use crate::script::{Function, Instruction, Operand, PushRole, Script, Struct};
use crate::tagged::{
    check_int, check_payload, encode_float, encode_int, encode_string, encode_undef, TaggedValue,
};

use patch::{LabelRef, PatchTable, ReturnSiteRef, StringRef};

#[derive(Debug, Clone, Default)]
pub struct AsmOptions {
    /// Unresolved labels abort the file instead of being patched to the end
    /// of the code section.
    pub strict_labels: bool,
    /// Unknown `RUNCMD` names are written as `(0, 0)` with a warning.
    pub allow_unknown_commands: bool,
}

/// Encode an immediate. Strings have no value until the pool is laid out
/// and come back as `None`.
pub(crate) fn encode_immediate(v: &TaggedValue) -> Result<Option<u32>> {
    Ok(Some(match v {
        TaggedValue::Undef(x) => encode_undef(check_payload(*x as u64)?),
        TaggedValue::Int(x) => encode_int(check_int(*x as i64)?),
        TaggedValue::Float(f) => encode_float(*f),
        TaggedValue::StrPtr(off) => encode_string(check_payload(*off as u64)?),
        TaggedValue::Str(_) => return Ok(None),
    }))
}

pub struct Assembler<'a> {
    options: AsmOptions,
    commands: &'a CommandTable,
    script: Option<Script>,
    current: Option<usize>,
    code: BinaryWriter,
    labels: HashMap<String, u32>,
    strings: PatchTable<StringRef>,
    jumps: PatchTable<LabelRef>,
    returns: PatchTable<ReturnSiteRef>,
    /// Return sites waiting for the next call.
    pending: Vec<usize>,
    line: usize,
    diags: Diagnostics,
}

impl<'a> Assembler<'a> {
    pub fn new(commands: &'a CommandTable, options: AsmOptions) -> Self {
        Self {
            options,
            commands,
            script: None,
            current: None,
            code: BinaryWriter::new(),
            labels: HashMap::new(),
            strings: PatchTable::new(),
            jumps: PatchTable::new(),
            returns: PatchTable::new(),
            pending: Vec::new(),
            line: 0,
            diags: Diagnostics::new(),
        }
    }

    pub fn options(&self) -> &AsmOptions {
        &self.options
    }

    /// Source line reported in diagnostics raised from here on.
    pub fn set_line(&mut self, line: usize) {
        self.line = line;
    }

    fn here(&self) -> Position {
        Position::Line(self.line)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diags
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diags
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    fn script_mut(&mut self) -> Result<&mut Script> {
        self.script.as_mut().ok_or_else(|| Ed9Error::BadArgument {
            call: "add_function".into(),
            reason: "create_script_header must come first".into(),
        })
    }

    /// Start a new script, dropping everything emitted so far.
    pub fn create_script_header(
        &mut self,
        name: &str,
        vars_in: Vec<(TaggedValue, TaggedValue)>,
        vars_out: Vec<(TaggedValue, TaggedValue)>,
    ) {
        self.script = Some(Script::new(name, vars_in, vars_out));
        self.current = None;
        self.code = BinaryWriter::new();
        self.labels.clear();
        self.strings.clear();
        self.jumps.clear();
        self.returns.clear();
        self.pending.clear();
    }

    pub fn add_function(
        &mut self,
        name: &str,
        input_args: Vec<TaggedValue>,
        output_args: Vec<TaggedValue>,
        b0: u8,
        b1: u8,
    ) -> Result<u16> {
        let script = self.script_mut()?;
        if script.function_index(name).is_some() {
            return Err(Ed9Error::BadArgument {
                call: "add_function".into(),
                reason: format!("function {} declared twice", name),
            });
        }
        let id = u16::try_from(script.functions.len())
            .map_err(|_| Ed9Error::LayoutOverflow("more than 65535 functions".into()))?;
        script
            .functions
            .push(Function::new(id, name, input_args, output_args, b0, b1));
        Ok(id)
    }

    fn flush_pending(&mut self) {
        for ix in self.pending.drain(..) {
            if let Some(p) = self.returns.get_mut(ix) {
                self.diags.warn(
                    Position::Line(p.kind.line),
                    Ed9Error::UnresolvedLabel("return site without a following call".into()),
                );
            }
        }
    }

    pub fn set_current_function(&mut self, name: &str) -> Result<()> {
        self.flush_pending();
        let offset = self.code.position() as u32;
        let script = self.script_mut()?;
        let ix = script
            .function_index(name)
            .ok_or_else(|| Ed9Error::UnknownFunction(name.to_string()))?;
        script.functions[ix].set_code_start(offset)?;
        self.current = Some(ix);
        Ok(())
    }

    fn current_mut(&mut self) -> Result<&mut Function> {
        let ix = self.current.ok_or(Ed9Error::NoCurrentFunction)?;
        self.script
            .as_mut()
            .and_then(|s| s.functions.get_mut(ix))
            .ok_or(Ed9Error::NoCurrentFunction)
    }

    pub fn add_struct(&mut self, st: Struct) -> Result<()> {
        if st.params.len() % 2 != 0 {
            return Err(Ed9Error::BadArgument {
                call: "add_struct".into(),
                reason: format!("{} params, expected pairs", st.params.len()),
            });
        }
        if st.params.len() / 2 > u16::MAX as usize {
            return Err(Ed9Error::LayoutOverflow(format!("struct {} has too many params", st.id)));
        }
        self.current_mut()?.structs.push(st);
        Ok(())
    }

    pub fn label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Ed9Error::DuplicateLabel(name.to_string()));
        }
        self.labels.insert(name.to_string(), self.code.position() as u32);
        Ok(())
    }

    /// Code offset of a label defined so far.
    pub fn label_offset(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }

    pub fn function_id(&self, name: &str) -> Option<u16> {
        self.script
            .as_ref()
            .and_then(|s| s.function_by_name(name))
            .map(|f| f.id)
    }

    pub fn function_count(&self) -> usize {
        self.script.as_ref().map(|s| s.functions.len()).unwrap_or(0)
    }

    /// Append one instruction, registering patches for strings and labels.
    pub fn emit(&mut self, opcode: Opcode, operands: Vec<Operand>) -> Result<u32> {
        let role = match (opcode, operands.first()) {
            (Opcode::Push, Some(Operand::Label(_))) => Some(PushRole::ReturnAddress),
            _ => None,
        };
        self.emit_with_role(opcode, operands, role)
    }

    fn emit_with_role(
        &mut self,
        opcode: Opcode,
        operands: Vec<Operand>,
        role: Option<PushRole>,
    ) -> Result<u32> {
        let current = self.current.ok_or(Ed9Error::NoCurrentFunction)?;
        let info = opcode.info();
        if operands.len() != info.operands.len() {
            return Err(Ed9Error::BadArgument {
                call: opcode.name().into(),
                reason: format!("expected {} operands, got {}", info.operands.len(), operands.len()),
            });
        }

        let addr = self.code.position() as u32;
        self.code.write_u8(opcode as u8);
        for (kind, op) in info.operands.iter().zip(operands.iter()) {
            let at = self.code.position();
            match (kind, op) {
                (OperandKind::Tagged, Operand::Tagged(v)) => match encode_immediate(v)? {
                    Some(w) => self.code.write_u32(w),
                    None => {
                        if let TaggedValue::Str(text) = v {
                            self.strings.push(
                                at,
                                StringRef {
                                    text: text.clone(),
                                    tagged: true,
                                },
                            );
                        }
                        self.code.write_u32(0);
                    }
                },
                (OperandKind::Tagged, Operand::Label(label)) if opcode == Opcode::Push => {
                    self.jumps.push(
                        at,
                        LabelRef {
                            label: label.clone(),
                            tagged: true,
                            line: self.line,
                        },
                    );
                    self.code.write_u32(0);
                }
                (OperandKind::U8, Operand::U8(v)) => self.code.write_u8(*v),
                (OperandKind::U16, Operand::U16(v)) => self.code.write_u16(*v),
                (OperandKind::I32, Operand::I32(v)) => self.code.write_i32(*v),
                (OperandKind::Address, Operand::Address(a)) => self.code.write_u32(*a),
                (OperandKind::Address, Operand::Label(label)) => {
                    self.jumps.push(
                        at,
                        LabelRef {
                            label: label.clone(),
                            tagged: false,
                            line: self.line,
                        },
                    );
                    self.code.write_u32(0);
                }
                (OperandKind::FunctionIndex, Operand::Function(ix)) => {
                    if *ix as usize >= self.function_count() {
                        return Err(Ed9Error::UnknownFunction(format!("#{}", ix)));
                    }
                    self.code.write_u16(*ix);
                }
                (kind, op) => {
                    return Err(Ed9Error::BadArgument {
                        call: opcode.name().into(),
                        reason: format!("operand {:?} does not fit a {:?} slot", op, kind),
                    })
                }
            }
        }

        if opcode.is_call() {
            let end = self.code.position() as u32;
            for ix in self.pending.drain(..) {
                if let Some(p) = self.returns.get_mut(ix) {
                    p.kind.destination = Some(end);
                }
            }
        }

        let mut inst = Instruction::new(opcode, addr, operands);
        inst.role = role;
        if let Some(f) = self.script.as_mut().and_then(|s| s.functions.get_mut(current)) {
            f.instructions.push(inst);
        }
        Ok(addr)
    }

    /// `PUSHCALLERFUNCTIONINDEX`: an undefined word holding the current
    /// function's id.
    pub fn push_caller_function_index(&mut self) -> Result<u32> {
        let id = self.current_mut()?.id;
        self.emit_with_role(
            Opcode::Push,
            vec![Operand::Tagged(TaggedValue::Undef(id as u32))],
            Some(PushRole::CallerFunctionIndex),
        )
    }

    /// `PUSHRETURNADDRESS`, either to a label or to the site after the next
    /// call.
    pub fn push_return_address(&mut self, label: Option<&str>) -> Result<u32> {
        match label {
            Some(l) => self.emit(Opcode::Push, vec![Operand::Label(l.to_string())]),
            None => {
                let addr = self.emit_with_role(
                    Opcode::Push,
                    vec![Operand::Tagged(TaggedValue::Undef(0))],
                    Some(PushRole::ReturnAddress),
                )?;
                self.pend_return_site(addr, true);
                Ok(addr)
            }
        }
    }

    pub fn push_return_address_xscript(&mut self, label: Option<&str>) -> Result<u32> {
        match label {
            Some(l) => self.emit(
                Opcode::PushReturnAddressXScript,
                vec![Operand::Label(l.to_string())],
            ),
            None => {
                let addr = self.emit(Opcode::PushReturnAddressXScript, vec![Operand::Address(0)])?;
                self.pend_return_site(addr, false);
                Ok(addr)
            }
        }
    }

    fn pend_return_site(&mut self, addr: u32, tagged: bool) {
        let ix = self.returns.push(
            addr as usize + 1,
            ReturnSiteRef {
                destination: None,
                tagged,
                line: self.line,
            },
        );
        self.pending.push(ix);
    }

    /// Resolve a `RUNCMD` name through the command table.
    pub fn command(&mut self, name: &str) -> Result<CommandId> {
        match self.commands.lookup(name) {
            Some(id) => Ok(id),
            None if self.options.allow_unknown_commands => {
                let at = self.here();
                self.diags.warn(at, Ed9Error::UnknownCommand(name.to_string()));
                Ok(CommandId { id: 0, op: 0 })
            }
            None => Err(Ed9Error::UnknownCommand(name.to_string())),
        }
    }

    /// Lay out every section and patch all references.
    ///
    /// The output is re-read before it is returned; nothing is returned for a
    /// buffer that does not parse back.
    pub fn compile(&mut self) -> Result<Vec<u8>> {
        self.flush_pending();
        let script = self.script.as_ref().ok_or_else(|| Ed9Error::BadArgument {
            call: "compile".into(),
            reason: "no script header".into(),
        })?;
        let linker = layout::Linker {
            script,
            code: self.code.as_slice(),
            labels: &self.labels,
            strings: &self.strings,
            jumps: &self.jumps,
            returns: &self.returns,
            strict_labels: self.options.strict_labels,
        };
        let bytes = linker.link(&mut self.diags)?;
        layout::validate(&bytes)?;
        log::debug!(
            "{}: {} bytes, {} functions, {} labels",
            script.name,
            bytes.len(),
            script.functions.len(),
            self.labels.len()
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asm(commands: &CommandTable) -> Assembler<'_> {
        let mut a = Assembler::new(commands, AsmOptions::default());
        a.create_script_header("t", vec![], vec![]);
        a.add_function("main", vec![], vec![], 0, 0).unwrap();
        a
    }

    #[test]
    fn builder_state_errors() {
        let commands = CommandTable::default();
        let mut a = asm(&commands);
        assert!(matches!(a.emit(Opcode::Exit, vec![]), Err(Ed9Error::NoCurrentFunction)));
        assert!(matches!(
            a.set_current_function("nope"),
            Err(Ed9Error::UnknownFunction(_))
        ));
        a.set_current_function("main").unwrap();
        assert!(matches!(
            a.set_current_function("main"),
            Err(Ed9Error::FunctionAlreadyEmitted(_))
        ));
        a.label("Loc_0").unwrap();
        assert!(matches!(a.label("Loc_0"), Err(Ed9Error::DuplicateLabel(_))));
        assert!(matches!(
            a.emit(Opcode::Pop, vec![Operand::I32(4)]),
            Err(Ed9Error::BadArgument { .. })
        ));
        assert!(matches!(
            a.emit(Opcode::Call, vec![Operand::Function(3)]),
            Err(Ed9Error::UnknownFunction(_))
        ));
    }

    #[test]
    fn pending_return_site_binds_to_next_call() {
        let commands = CommandTable::default();
        let mut a = asm(&commands);
        a.set_current_function("main").unwrap();
        a.push_caller_function_index().unwrap();
        a.push_return_address(None).unwrap();
        a.emit(Opcode::Call, vec![Operand::Function(0)]).unwrap();
        a.emit(Opcode::Exit, vec![]).unwrap();
        assert_eq!(a.returns.iter().next().unwrap().kind.destination, Some(13));
        assert!(a.pending.is_empty());
    }

    #[test]
    fn unknown_commands_follow_the_fallback_flag() {
        let commands = CommandTable::default();
        let mut a = asm(&commands);
        assert!(matches!(a.command("nope"), Err(Ed9Error::UnknownCommand(_))));

        let mut b = Assembler::new(
            &commands,
            AsmOptions {
                allow_unknown_commands: true,
                ..AsmOptions::default()
            },
        );
        assert_eq!(b.command("nope").unwrap(), CommandId { id: 0, op: 0 });
        assert_eq!(b.diagnostics().len(), 1);
    }
}
