//! Section layout and final patching.
//!
//! Sections are written in a fixed order: header, function headers, out
//! vars, in vars, struct headers, struct params, script vars, code, string
//! pool.

use std::collections::HashMap;

use crate::binary::{BinaryReader, BinaryWriter};
use crate::disasm::header::{read_image, FUNCTION_HEADER_SIZE, HEADER_SIZE, MAGIC, STRUCT_HEADER_SIZE};
use crate::error::{Diagnostics, Ed9Error, Position, Result};
use crate::script::Script;
use crate::tagged::{check_payload, encode_string, encode_undef, TaggedValue, PAYLOAD_MASK};

use super::encode_immediate;
use super::patch::{LabelRef, PatchTable, ReturnSiteRef, StringRef};

pub struct Linker<'a> {
    pub script: &'a Script,
    pub code: &'a [u8],
    pub labels: &'a HashMap<String, u32>,
    /// Code-relative.
    pub strings: &'a PatchTable<StringRef>,
    /// Code-relative.
    pub jumps: &'a PatchTable<LabelRef>,
    /// Code-relative.
    pub returns: &'a PatchTable<ReturnSiteRef>,
    pub strict_labels: bool,
}

fn to_u32(what: &str, v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| Ed9Error::LayoutOverflow(format!("{} at 0x{:X}", what, v)))
}

fn count_u8(what: &str, n: usize) -> Result<u8> {
    u8::try_from(n).map_err(|_| Ed9Error::LayoutOverflow(format!("{} {} exceeds 255", what, n)))
}

/// Write a tagged data word, deferring strings to `strings`.
fn write_word(out: &mut BinaryWriter, strings: &mut PatchTable<StringRef>, v: &TaggedValue) -> Result<()> {
    match encode_immediate(v)? {
        Some(w) => out.write_u32(w),
        None => {
            if let TaggedValue::Str(text) = v {
                strings.push(
                    out.position(),
                    StringRef {
                        text: text.clone(),
                        tagged: true,
                    },
                );
            }
            out.write_u32(0);
        }
    }
    Ok(())
}

/// Interned string pool; offsets are absolute.
#[derive(Default)]
struct Pool {
    base: usize,
    bytes: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Pool {
    fn intern(&mut self, text: &str) -> Result<u32> {
        if let Some(off) = self.offsets.get(text) {
            return Ok(*off);
        }
        let off = to_u32("string pool entry", self.base + self.bytes.len())?;
        if off > PAYLOAD_MASK {
            return Err(Ed9Error::LayoutOverflow(format!(
                "string pool offset 0x{:X} does not fit 30 bits",
                off
            )));
        }
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(text.to_string(), off);
        Ok(off)
    }
}

impl Linker<'_> {
    pub fn link(&self, diags: &mut Diagnostics) -> Result<Vec<u8>> {
        let s = self.script;
        let n = s.functions.len();

        let mut off = HEADER_SIZE + FUNCTION_HEADER_SIZE * n;
        let mut ptr_out = Vec::with_capacity(n);
        for f in &s.functions {
            ptr_out.push(off);
            off += 4 * f.output_args.len();
        }
        let mut ptr_in = Vec::with_capacity(n);
        for f in &s.functions {
            ptr_in.push(off);
            off += 4 * f.input_args.len();
        }
        let mut ptr_structs = Vec::with_capacity(n);
        for f in &s.functions {
            ptr_structs.push(off);
            off += STRUCT_HEADER_SIZE * f.structs.len();
        }
        let mut ptr_params = Vec::new();
        for f in &s.functions {
            for st in &f.structs {
                ptr_params.push(off);
                off += 4 * st.params.len();
            }
        }
        let var_count = s.vars_in.len() + s.vars_out.len();
        let ptr_script_vars = if var_count == 0 { 0 } else { off };
        off += 8 * var_count;
        let code_base = off;
        let code_end = code_base + self.code.len();

        let mut out = BinaryWriter::with_capacity(code_end + 256);
        // absolute offsets
        let mut strings: PatchTable<StringRef> = PatchTable::new();

        out.write_bytes(MAGIC);
        out.write_u32(HEADER_SIZE as u32);
        out.write_u32(to_u32("function count", n)?);
        out.write_u32(to_u32("script vars", ptr_script_vars)?);
        out.write_u32(to_u32("vars_in count", s.vars_in.len())?);
        out.write_u32(to_u32("vars_out count", s.vars_out.len())?);

        for (i, f) in s.functions.iter().enumerate() {
            let start = match f.code_start() {
                Some(rel) => code_base + rel as usize,
                None => {
                    diags.warn(
                        Position::Unknown,
                        Ed9Error::EmittedInvalid(format!(
                            "function {} has no body; pointing it at the start of the code section",
                            f.name
                        )),
                    );
                    code_base
                }
            };
            out.write_u32(to_u32("code start", start)?);
            out.write_u8(count_u8("input args of", f.input_args.len())?);
            out.write_u8(f.b0);
            out.write_u8(f.b1);
            out.write_u8(count_u8("output args of", f.output_args.len())?);
            out.write_u32(to_u32("out vars", ptr_out[i])?);
            out.write_u32(to_u32("in vars", ptr_in[i])?);
            out.write_u32(to_u32("struct count", f.structs.len())?);
            out.write_u32(to_u32("structs", ptr_structs[i])?);
            out.write_u32(f.hash());
            strings.push(
                out.position(),
                StringRef {
                    text: f.name.clone(),
                    tagged: false,
                },
            );
            out.write_u32(0);
        }

        for f in &s.functions {
            for v in &f.output_args {
                write_word(&mut out, &mut strings, v)?;
            }
        }
        for f in &s.functions {
            for v in &f.input_args {
                write_word(&mut out, &mut strings, v)?;
            }
        }
        let mut params = ptr_params.iter();
        for f in &s.functions {
            for st in &f.structs {
                out.write_i32(st.id);
                out.write_u16(st.nb_sth1);
                let pairs = u16::try_from(st.params.len() / 2)
                    .map_err(|_| Ed9Error::LayoutOverflow(format!("struct {} params", st.id)))?;
                out.write_u16(pairs);
                let ptr = params.next().copied().unwrap_or(out.position());
                out.write_u32(to_u32("struct params", ptr)?);
            }
        }
        for f in &s.functions {
            for st in &f.structs {
                for v in &st.params {
                    write_word(&mut out, &mut strings, v)?;
                }
            }
        }
        for (a, b) in s.vars_in.iter().chain(s.vars_out.iter()) {
            write_word(&mut out, &mut strings, a)?;
            write_word(&mut out, &mut strings, b)?;
        }

        if out.position() != code_base {
            return Err(Ed9Error::LayoutOverflow(format!(
                "data tables end at 0x{:X}, expected 0x{:X}",
                out.position(),
                code_base
            )));
        }
        out.write_bytes(self.code);

        self.patch_labels(&mut out, code_base, code_end, diags)?;

        let mut pool = Pool {
            base: code_end,
            ..Pool::default()
        };
        let mut intern = |r: &StringRef| -> Result<u32> {
            let off = pool.intern(&r.text)?;
            Ok(if r.tagged { encode_string(off) } else { off })
        };
        // name pointers and data words first, then code in emission order
        strings.apply(&mut out, 0, &mut intern)?;
        self.strings.apply(&mut out, code_base, &mut intern)?;
        out.write_bytes(&pool.bytes);

        Ok(out.into_inner())
    }

    fn unresolved(&self, name: String, line: usize, diags: &mut Diagnostics) -> Result<()> {
        if self.strict_labels {
            return Err(Ed9Error::UnresolvedLabel(name));
        }
        diags.warn(Position::Line(line), Ed9Error::UnresolvedLabel(name));
        Ok(())
    }

    fn patch_labels(
        &self,
        out: &mut BinaryWriter,
        code_base: usize,
        code_end: usize,
        diags: &mut Diagnostics,
    ) -> Result<()> {
        let end = to_u32("code end", code_end)?;
        self.jumps.apply(out, code_base, |r| {
            let abs = match self.labels.get(&r.label) {
                Some(rel) => to_u32("label", code_base + *rel as usize)?,
                None => {
                    self.unresolved(r.label.clone(), r.line, diags)?;
                    end
                }
            };
            Ok(if r.tagged { encode_undef(check_payload(abs as u64)?) } else { abs })
        })?;
        self.returns.apply(out, code_base, |r| {
            let abs = match r.destination {
                Some(rel) => to_u32("return site", code_base + rel as usize)?,
                None => {
                    self.unresolved("return site".into(), r.line, diags)?;
                    end
                }
            };
            Ok(if r.tagged { encode_undef(check_payload(abs as u64)?) } else { abs })
        })
    }
}

/// Re-read an emitted buffer through the header reader.
pub fn validate(bytes: &[u8]) -> Result<()> {
    let mut diags = Diagnostics::new();
    let image = read_image(&BinaryReader::new(bytes), &mut diags)
        .map_err(|e| Ed9Error::EmittedInvalid(e.to_string()))?;
    if let Some(d) = diags.iter().next() {
        return Err(Ed9Error::EmittedInvalid(d.to_string()));
    }
    for f in &image.functions {
        let start = f.header.code_start as usize;
        if start < image.code_start || start > image.code_end {
            return Err(Ed9Error::EmittedInvalid(format!(
                "function {} starts at 0x{:X}, outside 0x{:X}..0x{:X}",
                f.name.text, start, image.code_start, image.code_end
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{AsmOptions, Assembler};
    use crate::commands::CommandTable;
    use crate::opcode::Opcode;
    use crate::script::{Operand, Struct};

    #[test]
    fn minimal_script_size() {
        let commands = CommandTable::default();
        let mut a = Assembler::new(&commands, AsmOptions::default());
        a.create_script_header("main", vec![], vec![]);
        a.add_function("main", vec![], vec![], 0, 0).unwrap();
        a.set_current_function("main").unwrap();
        a.emit(Opcode::Exit, vec![]).unwrap();
        let bytes = a.compile().unwrap();
        assert_eq!(bytes.len(), 0x18 + 0x20 + 1 + "main\0".len());
        assert_eq!(&bytes[..4], b"#scp");
        assert_eq!(bytes[0x38], 0x0D);
    }

    #[test]
    fn sections_are_ordered_and_strings_interned() {
        let commands = CommandTable::default();
        let mut a = Assembler::new(&commands, AsmOptions::default());
        a.create_script_header(
            "s",
            vec![(TaggedValue::Int(1), TaggedValue::Str("v".into()))],
            vec![],
        );
        a.add_function("f", vec![TaggedValue::Int(0)], vec![TaggedValue::Undef(2)], 1, 2)
            .unwrap();
        a.set_current_function("f").unwrap();
        a.add_struct(Struct {
            id: 7,
            nb_sth1: 3,
            params: vec![TaggedValue::Int(1), TaggedValue::Str("v".into())],
        })
        .unwrap();
        a.emit(Opcode::Push, vec![Operand::Tagged(TaggedValue::Str("v".into()))])
            .unwrap();
        a.emit(Opcode::Exit, vec![]).unwrap();
        let bytes = a.compile().unwrap();

        let mut diags = Diagnostics::new();
        let r = BinaryReader::new(&bytes);
        let image = read_image(&r, &mut diags).unwrap();
        let f = &image.functions[0];
        assert!(diags.is_empty());
        assert_eq!((f.header.b0, f.header.b1), (1, 2));
        assert!(0x38 <= f.header.ptr_out_vars);
        assert!(f.header.ptr_out_vars < f.header.ptr_in_vars);
        assert!(f.header.ptr_in_vars < f.header.ptr_structs);
        assert!(f.structs[0].header.ptr_params > f.header.ptr_structs);
        assert!(image.ptr_script_vars > f.structs[0].header.ptr_params);
        assert!((image.ptr_script_vars as usize) < image.code_start);
        assert!(image.code_start < image.code_end);

        // "f" then "v", each once
        let pool = &bytes[image.code_end..];
        assert_eq!(pool, b"f\0v\0");
    }

    #[test]
    fn unresolved_labels_warn_or_fail() {
        let commands = CommandTable::default();
        let build = |strict| {
            let mut a = Assembler::new(
                &commands,
                AsmOptions {
                    strict_labels: strict,
                    ..AsmOptions::default()
                },
            );
            a.create_script_header("s", vec![], vec![]);
            a.add_function("f", vec![], vec![], 0, 0).unwrap();
            a.set_current_function("f").unwrap();
            a.emit(Opcode::Jump, vec![Operand::Label("Loc_9".into())]).unwrap();
            a.emit(Opcode::Exit, vec![]).unwrap();
            let r = a.compile();
            (r, a.into_diagnostics())
        };

        let (bytes, diags) = build(false);
        let bytes = bytes.unwrap();
        assert_eq!(diags.len(), 1);
        // patched to the end of code
        let target = u32::from_le_bytes([bytes[0x39], bytes[0x3A], bytes[0x3B], bytes[0x3C]]);
        assert_eq!(target, 0x38 + 6);

        let (bytes, _) = build(true);
        assert!(matches!(bytes, Err(Ed9Error::UnresolvedLabel(l)) if l == "Loc_9"));
    }
}
