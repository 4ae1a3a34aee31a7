//! Runs a parsed builder program against an [`Assembler`].

use std::path::Path;

use crate::commands::CommandTable;
use crate::error::{Diagnostics, Ed9Error, Located, Position, Result};
use crate::opcode::{Opcode, OperandKind, OPCODES};
use crate::program::{Call, Program, Value};
use crate::script::{Operand, Struct};
use crate::tagged::{check_int, check_payload, TaggedValue};

use super::{AsmOptions, Assembler};

/// Output of one assembled program.
#[derive(Debug)]
pub struct Assembly {
    pub bytes: Vec<u8>,
    pub diagnostics: Diagnostics,
}

/// Parse and assemble `src`; errors carry `path` and the offending line.
pub fn assemble_source(
    src: &str,
    path: &Path,
    commands: &CommandTable,
    options: AsmOptions,
) -> std::result::Result<Assembly, Located> {
    let program = Program::parse(src).map_err(|e| Located::new(path, e.position(), e))?;
    assemble(&program, path, commands, options)
}

pub fn assemble(
    program: &Program,
    path: &Path,
    commands: &CommandTable,
    options: AsmOptions,
) -> std::result::Result<Assembly, Located> {
    let mut asm = Assembler::new(commands, options);
    let mut bytes = None;
    let mut last_line = 0;

    for (line, call) in program.calls() {
        last_line = line;
        let at = Position::Line(line);
        if bytes.is_some() {
            return Err(Located::new(
                path,
                at,
                Ed9Error::Syntax {
                    line,
                    reason: format!("{} after compile()", call.name),
                },
            ));
        }
        asm.set_line(line);
        match call.name.as_str() {
            "compile" => {
                bytes = Some(asm.compile().map_err(|e| Located::new(path, at, e))?);
            }
            _ => apply(&mut asm, call).map_err(|e| Located::new(path, at, e))?,
        }
    }

    match bytes {
        Some(bytes) => Ok(Assembly {
            bytes,
            diagnostics: asm.into_diagnostics(),
        }),
        None => Err(Located::new(
            path,
            Position::Line(last_line),
            Ed9Error::Syntax {
                line: last_line,
                reason: "program does not end with compile()".into(),
            },
        )),
    }
}

fn int_as<T: TryFrom<i64>>(call: &Call, v: &Value) -> Result<T> {
    let n = v
        .as_int()
        .ok_or_else(|| call.bad_arg(format!("expected an integer, got a {}", v.describe())))?;
    T::try_from(n).map_err(|_| call.bad_arg(format!("{} out of range", n)))
}

fn string_arg<'v>(call: &Call, v: &'v Value) -> Result<&'v str> {
    v.as_str()
        .ok_or_else(|| call.bad_arg(format!("expected a string, got a {}", v.describe())))
}

fn list_arg<'v>(call: &Call, v: &'v Value) -> Result<&'v [Value]> {
    v.as_items()
        .ok_or_else(|| call.bad_arg(format!("expected a list, got a {}", v.describe())))
}

fn tagged_list(call: &Call, name: &str, position: usize) -> Result<Vec<TaggedValue>> {
    match call.arg(name, position) {
        Some(v) => list_arg(call, v)?.iter().map(Value::to_tagged).collect(),
        None => Ok(Vec::new()),
    }
}

fn pair_list(call: &Call, name: &str, position: usize) -> Result<Vec<(TaggedValue, TaggedValue)>> {
    let Some(v) = call.arg(name, position) else {
        return Ok(Vec::new());
    };
    list_arg(call, v)?
        .iter()
        .map(|item| match item.as_items() {
            Some([a, b]) => Ok((a.to_tagged()?, b.to_tagged()?)),
            _ => Err(call.bad_arg(format!("`{}` entries must be pairs", name))),
        })
        .collect()
}

fn optional_label<'v>(call: &'v Call) -> Result<Option<&'v str>> {
    match call.arg("label", 0) {
        Some(v) => string_arg(call, v).map(Some),
        None => Ok(None),
    }
}

fn expect_arity(call: &Call, n: usize) -> Result<()> {
    if call.args.len() != n {
        return Err(call.bad_arg(format!("expected {} arguments, got {}", n, call.args.len())));
    }
    Ok(())
}

/// One builder call.
fn apply(asm: &mut Assembler<'_>, call: &Call) -> Result<()> {
    match call.name.as_str() {
        "create_script_header" => {
            let name = string_arg(call, call.required("name", 0)?)?;
            let vars_in = pair_list(call, "varin", 1)?;
            let vars_out = pair_list(call, "varout", 2)?;
            asm.create_script_header(name, vars_in, vars_out);
        }
        "add_function" => {
            let name = string_arg(call, call.required("name", 0)?)?;
            let input_args = tagged_list(call, "input_args", 1)?;
            let output_args = tagged_list(call, "output_args", 2)?;
            let b0 = match call.arg("b0", 3) {
                Some(v) => int_as(call, v)?,
                None => 0,
            };
            let b1 = match call.arg("b1", 4) {
                Some(v) => int_as(call, v)?,
                None => 0,
            };
            asm.add_function(name, input_args, output_args, b0, b1)?;
        }
        "set_current_function" => {
            let name = string_arg(call, call.required("name", 0)?)?;
            asm.set_current_function(name)?;
        }
        "add_struct" => {
            let id = int_as(call, call.required("id", 0)?)?;
            let nb_sth1 = int_as(call, call.required("nb_sth1", 1)?)?;
            let params = tagged_list(call, "params", 2)?;
            asm.add_struct(Struct { id, nb_sth1, params })?;
        }
        "Label" => {
            let name = string_arg(call, call.required("name", 0)?)?;
            asm.label(name)?;
        }
        _ => instruction(asm, call)?,
    }
    Ok(())
}

fn instruction(asm: &mut Assembler<'_>, call: &Call) -> Result<()> {
    let push = |asm: &mut Assembler<'_>, v: TaggedValue| {
        asm.emit(Opcode::Push, vec![Operand::Tagged(v)]).map(|_| ())
    };
    match call.name.as_str() {
        "PUSHUNDEFINED" => {
            expect_arity(call, 1)?;
            let v = call.required("value", 0)?;
            let n = v.as_int().ok_or_else(|| call.bad_arg("expected an integer"))?;
            if n < 0 {
                return Err(Ed9Error::BadTagWord(n as u64));
            }
            push(asm, TaggedValue::Undef(check_payload(n as u64)?))
        }
        "PUSHINTEGER" => {
            expect_arity(call, 1)?;
            let n = call
                .required("value", 0)?
                .as_int()
                .ok_or_else(|| call.bad_arg("expected an integer"))?;
            push(asm, TaggedValue::Int(check_int(n)?))
        }
        "PUSHFLOAT" => {
            expect_arity(call, 1)?;
            let f = call
                .required("value", 0)?
                .as_f32()
                .ok_or_else(|| call.bad_arg("expected a float"))?;
            push(asm, TaggedValue::Float(f))
        }
        "PUSHSTRING" => {
            expect_arity(call, 1)?;
            let s = string_arg(call, call.required("value", 0)?)?;
            push(asm, TaggedValue::Str(s.to_string()))
        }
        "PUSHCALLERFUNCTIONINDEX" | "PUSH_CALLER_FUNCTION_INDEX" => {
            expect_arity(call, 0)?;
            asm.push_caller_function_index().map(|_| ())
        }
        "PUSHRETURNADDRESS" | "PUSH_RETURN_ADDRESS" => {
            asm.push_return_address(optional_label(call)?).map(|_| ())
        }
        "PUSH_RETURN_ADDRESS_XSCRIPT" | "PUSHRETURNADDRESSFROMANOTHERSCRIPT" => {
            match call.arg("label", 0) {
                Some(Value::Int(_)) => generic(asm, call, Opcode::PushReturnAddressXScript),
                _ => asm.push_return_address_xscript(optional_label(call)?).map(|_| ()),
            }
        }
        "RUNCMD" => runcmd(asm, call),
        name => match Opcode::from_name(name) {
            Some(opcode) => generic(asm, call, opcode),
            None => Err(Ed9Error::BadArgument {
                call: name.to_string(),
                reason: "unknown builder call".into(),
            }),
        },
    }
}

fn runcmd(asm: &mut Assembler<'_>, call: &Call) -> Result<()> {
    let (id, op, argc) = match call.arg("name", 0) {
        Some(Value::Str(name)) => {
            expect_arity(call, 2)?;
            let argc = int_as(call, call.required("argc", 1)?)?;
            let cmd = asm.command(name)?;
            (cmd.id, cmd.op, argc)
        }
        _ => {
            expect_arity(call, 3)?;
            (
                int_as(call, call.required("id", 0)?)?,
                int_as(call, call.required("op", 1)?)?,
                int_as(call, call.required("argc", 2)?)?,
            )
        }
    };
    asm.emit(
        Opcode::RunCmd,
        vec![Operand::U8(id), Operand::U8(op), Operand::U8(argc)],
    )
    .map(|_| ())
}

/// Any table opcode, operands converted by their declared kind.
fn generic(asm: &mut Assembler<'_>, call: &Call, opcode: Opcode) -> Result<()> {
    let info = &OPCODES[opcode as usize];
    expect_arity(call, info.operands.len())?;
    let mut operands = Vec::with_capacity(info.operands.len());
    for (kind, arg) in info.operands.iter().zip(call.args.iter()) {
        let v = &arg.value;
        operands.push(match kind {
            OperandKind::Tagged => Operand::Tagged(v.to_tagged()?),
            OperandKind::U8 => Operand::U8(int_as(call, v)?),
            OperandKind::U16 => Operand::U16(int_as(call, v)?),
            OperandKind::I32 => Operand::I32(int_as(call, v)?),
            OperandKind::Address => match v {
                Value::Str(label) => Operand::Label(label.clone()),
                _ => Operand::Address(int_as(call, v)?),
            },
            OperandKind::FunctionIndex => match v {
                Value::Str(name) => Operand::Function(
                    asm.function_id(name)
                        .ok_or_else(|| Ed9Error::UnknownFunction(name.clone()))?,
                ),
                _ => Operand::Function(int_as(call, v)?),
            },
        });
    }
    asm.emit(opcode, operands).map(|_| ())
}
