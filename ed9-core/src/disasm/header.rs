//! Fixed header, function table and data tables of a `#scp` file.
//!
//! This is also the reader the assembler runs over its own output before
//! handing it back, so it must stay strict about bounds.

use crate::binary::{BinaryReader, PoolString};
use crate::error::{Diagnostics, Ed9Error, Position, Result};
use crate::script::name_hash;
use crate::tagged::{Tag, TaggedWord};

pub const MAGIC: &[u8; 4] = b"#scp";
pub const HEADER_SIZE: usize = 0x18;
pub const FUNCTION_HEADER_SIZE: usize = 0x20;
pub const STRUCT_HEADER_SIZE: usize = 0x0C;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionHeader {
    /// Absolute file offset of the first instruction.
    pub code_start: u32,
    pub in_count: u8,
    pub b0: u8,
    pub b1: u8,
    pub out_count: u8,
    pub ptr_out_vars: u32,
    pub ptr_in_vars: u32,
    pub struct_count: u32,
    pub ptr_structs: u32,
    pub name_hash: u32,
    pub ptr_name: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructHeader {
    pub id: i32,
    pub nb_sth1: u16,
    pub pair_count: u16,
    pub ptr_params: u32,
}

#[derive(Debug, Clone)]
pub struct RawStruct {
    pub header: StructHeader,
    pub params: Vec<TaggedWord>,
}

#[derive(Debug, Clone)]
pub struct RawFunction {
    pub header: FunctionHeader,
    pub name: PoolString,
    pub out_vars: Vec<TaggedWord>,
    pub in_vars: Vec<TaggedWord>,
    pub structs: Vec<RawStruct>,
}

/// Everything outside the code section, plus the derived code bounds.
#[derive(Debug, Clone)]
pub struct ScriptImage {
    pub ptr_functions: u32,
    pub ptr_script_vars: u32,
    pub functions: Vec<RawFunction>,
    pub vars_in: Vec<(TaggedWord, TaggedWord)>,
    pub vars_out: Vec<(TaggedWord, TaggedWord)>,
    /// Absolute offset of the code section: the end of the last data table.
    pub code_start: usize,
    /// Absolute end of the code section: the lowest pool offset referenced
    /// from the tables, or the file end.
    pub code_end: usize,
}

impl ScriptImage {
    pub fn code_len(&self) -> usize {
        self.code_end - self.code_start
    }
}

pub fn check_magic(bytes: &[u8]) -> Result<()> {
    match bytes.get(..4) {
        Some(m) if m == MAGIC => Ok(()),
        Some(m) => Err(Ed9Error::NotAScript([m[0], m[1], m[2], m[3]])),
        None => {
            let mut m = [0u8; 4];
            m[..bytes.len()].copy_from_slice(bytes);
            Err(Ed9Error::NotAScript(m))
        }
    }
}

fn table_end(what: &'static str, reader: &BinaryReader<'_>, ptr: u32, count: usize, size: usize) -> Result<usize> {
    let end = count
        .checked_mul(size)
        .and_then(|n| n.checked_add(ptr as usize))
        .ok_or(Ed9Error::TruncatedSection {
            what,
            offset: ptr as usize,
            needed: usize::MAX,
            len: reader.len(),
        })?;
    if end > reader.len() {
        return Err(Ed9Error::TruncatedSection {
            what,
            offset: ptr as usize,
            needed: count * size,
            len: reader.len(),
        });
    }
    Ok(end)
}

fn read_words(reader: &BinaryReader<'_>, what: &'static str, ptr: u32, count: usize) -> Result<Vec<TaggedWord>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    table_end(what, reader, ptr, count, 4)?;
    (0..count)
        .map(|i| reader.read_u32(ptr as usize + i * 4).map(TaggedWord))
        .collect()
}

fn read_function_header(reader: &BinaryReader<'_>, offset: usize) -> Result<FunctionHeader> {
    Ok(FunctionHeader {
        code_start: reader.read_u32(offset)?,
        in_count: reader.read_u8(offset + 4)?,
        b0: reader.read_u8(offset + 5)?,
        b1: reader.read_u8(offset + 6)?,
        out_count: reader.read_u8(offset + 7)?,
        ptr_out_vars: reader.read_u32(offset + 8)?,
        ptr_in_vars: reader.read_u32(offset + 0x0C)?,
        struct_count: reader.read_u32(offset + 0x10)?,
        ptr_structs: reader.read_u32(offset + 0x14)?,
        name_hash: reader.read_u32(offset + 0x18)?,
        ptr_name: reader.read_u32(offset + 0x1C)?,
    })
}

fn read_struct_header(reader: &BinaryReader<'_>, offset: usize) -> Result<StructHeader> {
    Ok(StructHeader {
        id: reader.read_i32(offset)?,
        nb_sth1: reader.read_u16(offset + 4)?,
        pair_count: reader.read_u16(offset + 6)?,
        ptr_params: reader.read_u32(offset + 8)?,
    })
}

/// Read every section but the code.
///
/// Hash mismatches and invalid UTF-8 in names are recorded in `diags`, while
/// anything pointing outside the file is fatal.
pub fn read_image(reader: &BinaryReader<'_>, diags: &mut Diagnostics) -> Result<ScriptImage> {
    check_magic(reader.bytes())?;
    if reader.len() < HEADER_SIZE {
        return Err(Ed9Error::TruncatedSection {
            what: "header",
            offset: 0,
            needed: HEADER_SIZE,
            len: reader.len(),
        });
    }

    let ptr_functions = reader.read_u32(0x04)?;
    let function_count = reader.read_u32(0x08)? as usize;
    let ptr_script_vars = reader.read_u32(0x0C)?;
    let vars_in_count = reader.read_u32(0x10)? as usize;
    let vars_out_count = reader.read_u32(0x14)? as usize;

    let mut data_end = table_end(
        "function headers",
        reader,
        ptr_functions,
        function_count,
        FUNCTION_HEADER_SIZE,
    )?
    .max(HEADER_SIZE);
    // raw name pointers and string words in the tables
    let mut pool_refs: Vec<usize> = Vec::new();

    let mut functions = Vec::with_capacity(function_count);
    for i in 0..function_count {
        let at = ptr_functions as usize + i * FUNCTION_HEADER_SIZE;
        let header = read_function_header(reader, at)?;

        let name = reader.read_string_at(header.ptr_name as usize)?;
        pool_refs.push(header.ptr_name as usize);
        if name.lossy {
            diags.warn(
                Position::Offset(header.ptr_name as u64),
                Ed9Error::BadEncoding(header.ptr_name as usize),
            );
        }
        let computed = name_hash(&name.text);
        if computed != header.name_hash {
            diags.warn(
                Position::Offset(at as u64 + 0x18),
                Ed9Error::HashMismatch {
                    name: name.text.clone(),
                    stored: header.name_hash,
                    computed,
                },
            );
        }

        let out_vars = read_words(reader, "function out vars", header.ptr_out_vars, header.out_count as usize)?;
        let in_vars = read_words(reader, "function in vars", header.ptr_in_vars, header.in_count as usize)?;
        if header.out_count > 0 {
            data_end = data_end.max(header.ptr_out_vars as usize + 4 * header.out_count as usize);
        }
        if header.in_count > 0 {
            data_end = data_end.max(header.ptr_in_vars as usize + 4 * header.in_count as usize);
        }

        let struct_count = header.struct_count as usize;
        let mut structs = Vec::new();
        if struct_count > 0 {
            data_end = data_end.max(table_end(
                "struct headers",
                reader,
                header.ptr_structs,
                struct_count,
                STRUCT_HEADER_SIZE,
            )?);
            for s in 0..struct_count {
                let sh = read_struct_header(reader, header.ptr_structs as usize + s * STRUCT_HEADER_SIZE)?;
                let n = sh.pair_count as usize * 2;
                let params = read_words(reader, "struct params", sh.ptr_params, n)?;
                if n > 0 {
                    data_end = data_end.max(sh.ptr_params as usize + 4 * n);
                }
                structs.push(RawStruct { header: sh, params });
            }
        }

        for w in out_vars
            .iter()
            .chain(in_vars.iter())
            .chain(structs.iter().flat_map(|s| s.params.iter()))
        {
            if w.tag() == Tag::Str {
                pool_refs.push(w.payload() as usize);
            }
        }

        functions.push(RawFunction {
            header,
            name,
            out_vars,
            in_vars,
            structs,
        });
    }

    let mut vars_in = Vec::with_capacity(vars_in_count);
    let mut vars_out = Vec::with_capacity(vars_out_count);
    let total_vars = vars_in_count + vars_out_count;
    if total_vars > 0 {
        let words = read_words(reader, "script vars", ptr_script_vars, total_vars * 2)?;
        data_end = data_end.max(ptr_script_vars as usize + 8 * total_vars);
        for (i, pair) in words.chunks_exact(2).enumerate() {
            for w in pair {
                if w.tag() == Tag::Str {
                    pool_refs.push(w.payload() as usize);
                }
            }
            let entry = (pair[0], pair[1]);
            if i < vars_in_count {
                vars_in.push(entry);
            } else {
                vars_out.push(entry);
            }
        }
    }

    let code_end = pool_refs
        .into_iter()
        .filter(|&off| off >= data_end)
        .min()
        .unwrap_or(reader.len())
        .min(reader.len());

    Ok(ScriptImage {
        ptr_functions,
        ptr_script_vars,
        functions,
        vars_in,
        vars_out,
        code_start: data_end,
        code_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::BinaryWriter;

    /// One function `main` with a single EXIT and no tables.
    fn minimal() -> Vec<u8> {
        let mut w = BinaryWriter::new();
        w.write_bytes(MAGIC);
        w.write_u32(0x18);
        w.write_u32(1);
        w.write_u32(0);
        w.write_u32(0);
        w.write_u32(0);
        let code = 0x38;
        w.write_u32(code);
        w.write_u32(0);
        w.write_u32(code);
        w.write_u32(code);
        w.write_u32(0);
        w.write_u32(code);
        w.write_u32(name_hash("main"));
        w.write_u32(code + 1);
        w.write_u8(0x0D);
        w.write_cstr("main");
        w.into_inner()
    }

    #[test]
    fn reads_minimal_image() {
        let buf = minimal();
        let mut diags = Diagnostics::new();
        let image = read_image(&BinaryReader::new(&buf), &mut diags).unwrap();
        assert!(diags.is_empty());
        assert_eq!(image.functions.len(), 1);
        assert_eq!(image.functions[0].name.text, "main");
        assert_eq!(image.code_start, 0x38);
        assert_eq!(image.code_end, 0x39);
    }

    #[test]
    fn hash_mismatch_is_a_warning() {
        let mut buf = minimal();
        buf[0x18 + 0x18] ^= 1;
        let mut diags = Diagnostics::new();
        read_image(&BinaryReader::new(&buf), &mut diags).unwrap();
        assert_eq!(diags.len(), 1);
        assert!(matches!(
            diags.iter().next().map(|d| &d.error),
            Some(Ed9Error::HashMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_and_truncation() {
        let mut buf = minimal();
        buf[0] = b'X';
        let mut diags = Diagnostics::new();
        assert!(matches!(
            read_image(&BinaryReader::new(&buf), &mut diags),
            Err(Ed9Error::NotAScript(_))
        ));
        assert!(matches!(check_magic(b"#s"), Err(Ed9Error::NotAScript(_))));

        let mut buf = minimal();
        buf[0x08] = 9;
        assert!(matches!(
            read_image(&BinaryReader::new(&buf), &mut diags),
            Err(Ed9Error::TruncatedSection { what: "function headers", .. })
        ));
    }
}
