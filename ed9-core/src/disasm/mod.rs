//! `.dat` to builder program.

pub mod decode;
pub mod emit;
pub mod header;
pub mod stack;

use std::cmp::Reverse;
use std::collections::HashSet;
use std::io;

use crate::binary::BinaryReader;
use crate::cle::{Decrypt, NoDecrypt};
use crate::commands::CommandTable;
use crate::error::{Diagnostics, Ed9Error, Position, Result};
use crate::script::{Function, Script, Struct};
use crate::tagged::{TaggedValue, TaggedWord};

use decode::{decode_body, CodeRange};
use emit::{BodyListing, Emitter};
use header::{check_magic, read_image, ScriptImage};
use stack::{Callee, Labels, Simulation};

#[derive(Debug, Clone)]
pub struct DisasmOptions {
    /// Keep `LINE_MARKER` instructions instead of rendering blank lines.
    pub markers: bool,
    /// Annotate calls and commands with their simulated arguments.
    pub decomp: bool,
}

impl Default for DisasmOptions {
    fn default() -> Self {
        Self {
            markers: false,
            decomp: true,
        }
    }
}

/// The result of disassembling one file.
#[derive(Debug)]
pub struct Disassembly {
    pub script: Script,
    pub text: String,
    pub diagnostics: Diagnostics,
}

pub struct Disassembler {
    options: DisasmOptions,
    commands: CommandTable,
    decrypt: Box<dyn Decrypt>,
}

impl Default for Disassembler {
    fn default() -> Self {
        Self::new(DisasmOptions::default())
    }
}

fn decode_word(reader: &BinaryReader<'_>, w: TaggedWord, diags: &mut Diagnostics) -> TaggedValue {
    let (v, err) = TaggedValue::decode(reader, w);
    if let Some(e) = err {
        diags.warn(Position::Unknown, e);
    }
    v
}

impl Disassembler {
    pub fn new(options: DisasmOptions) -> Self {
        Self {
            options,
            commands: CommandTable::default(),
            decrypt: Box::new(NoDecrypt),
        }
    }

    pub fn with_commands(mut self, commands: CommandTable) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_decrypt(mut self, decrypt: Box<dyn Decrypt>) -> Self {
        self.decrypt = decrypt;
        self
    }

    pub fn options(&self) -> &DisasmOptions {
        &self.options
    }

    /// Disassemble `bytes`, naming the script `name`.
    ///
    /// Per-function problems end up in [`Disassembly::diagnostics`]; only
    /// file-level failures are returned as errors.
    pub fn disassemble(&self, name: &str, bytes: &[u8]) -> Result<Disassembly> {
        let decrypted;
        let bytes = if check_magic(bytes).is_ok() {
            bytes
        } else {
            log::debug!("{}: no #scp magic, trying the decrypt hook", name);
            decrypted = self.decrypt.decrypt(bytes)?;
            check_magic(&decrypted)?;
            &decrypted[..]
        };

        let reader = BinaryReader::new(bytes);
        let mut diags = Diagnostics::new();
        let image = read_image(&reader, &mut diags)?;
        let code = CodeRange {
            start: image.code_start,
            end: image.code_end,
        };
        let mut script = self.build_ir(name, &reader, &image, &mut diags);

        let owners = Self::body_owners(&image, code, &mut diags);
        let mut bodies: Vec<(usize, u32)> = Vec::new();
        let mut targets: HashSet<u32> = HashSet::new();
        for (k, &(id, start)) in owners.iter().enumerate() {
            let f = &mut script.functions[id];
            let Some(start) = start else {
                continue;
            };
            f.set_code_start(start)?;
            // lowest id with a given start is last in `owners` and gets the body
            let shared = owners
                .get(k + 1)
                .map(|&(_, next)| next == Some(start))
                .unwrap_or(false);
            if shared {
                log::warn!(
                    "{}: function {} shares its code with another function, body left empty",
                    name,
                    f.name
                );
                bodies.push((id, start));
                continue;
            }
            let limit = owners[k + 1..]
                .iter()
                .filter_map(|&(_, s)| s)
                .find(|&s| s > start)
                .unwrap_or(code.end as u32 - code.start as u32);

            log::debug!("{}: decoding {} at 0x{:X}", name, f.name, code.start as u32 + start);
            let body = decode_body(&reader, code, start, limit, &mut diags);
            for inst in &body.instructions {
                targets.insert(code.start as u32 + inst.addr);
            }
            targets.insert(code.start as u32 + body.end);
            f.instructions = body.instructions;
            bodies.push((id, body.end));
        }
        // functions with no usable start are still emitted, after the rest
        for &(id, start) in &owners {
            if start.is_none() {
                bodies.push((id, 0));
            }
        }

        let callees: Vec<Callee> = script
            .functions
            .iter()
            .map(|f| Callee {
                name: f.name.clone(),
                argc: f.input_args.len(),
            })
            .collect();
        let mut labels = Labels::default();
        let mut listings = Vec::with_capacity(bodies.len());
        for (id, end) in bodies {
            let f = &mut script.functions[id];
            let sim = Simulation {
                code_base: code.start as u32,
                in_count: f.input_args.len(),
                callees: &callees,
                targets: &targets,
            };
            let notes = sim.run(&mut f.instructions, &mut labels, &mut diags);
            listings.push(BodyListing {
                function: id,
                end,
                notes,
            });
        }

        let mut text = String::new();
        Emitter {
            script: &script,
            labels: &labels,
            commands: &self.commands,
            code_base: code.start as u32,
            options: &self.options,
        }
        .write(&mut text, &listings)
        .map_err(|e| Ed9Error::IoFailure(io::Error::new(io::ErrorKind::Other, e)))?;

        log::info!(
            "{}: {} functions, {} labels, {} diagnostics",
            name,
            script.functions.len(),
            labels.len(),
            diags.len()
        );
        Ok(Disassembly {
            script,
            text,
            diagnostics: diags,
        })
    }

    fn build_ir(
        &self,
        name: &str,
        reader: &BinaryReader<'_>,
        image: &ScriptImage,
        diags: &mut Diagnostics,
    ) -> Script {
        let mut decode_pairs = |pairs: &[(TaggedWord, TaggedWord)]| -> Vec<(TaggedValue, TaggedValue)> {
            pairs
                .iter()
                .map(|&(a, b)| (decode_word(reader, a, diags), decode_word(reader, b, diags)))
                .collect()
        };
        let vars_in = decode_pairs(&image.vars_in);
        let vars_out = decode_pairs(&image.vars_out);
        let mut script = Script::new(name, vars_in, vars_out);

        for (id, raw) in image.functions.iter().enumerate() {
            let h = &raw.header;
            let input_args = raw.in_vars.iter().map(|&w| decode_word(reader, w, diags)).collect();
            let output_args = raw.out_vars.iter().map(|&w| decode_word(reader, w, diags)).collect();
            let mut f = Function::new(id as u16, raw.name.text.clone(), input_args, output_args, h.b0, h.b1);
            f.structs = raw
                .structs
                .iter()
                .map(|s| Struct {
                    id: s.header.id,
                    nb_sth1: s.header.nb_sth1,
                    params: s.params.iter().map(|&w| decode_word(reader, w, diags)).collect(),
                })
                .collect();
            script.functions.push(f);
        }
        script
    }

    /// Function ids with their relative code start, in emission order:
    /// by start, and among equal starts the lowest id last.
    fn body_owners(
        image: &ScriptImage,
        code: CodeRange,
        diags: &mut Diagnostics,
    ) -> Vec<(usize, Option<u32>)> {
        let mut owners: Vec<(usize, Option<u32>)> = image
            .functions
            .iter()
            .enumerate()
            .map(|(id, raw)| {
                let abs = raw.header.code_start;
                let start = code.contains(abs).then(|| abs - code.start as u32);
                if start.is_none() {
                    diags.error(
                        Position::Offset(abs as u64),
                        Ed9Error::TruncatedSection {
                            what: "function code",
                            offset: abs as usize,
                            needed: 1,
                            len: code.end,
                        },
                    );
                }
                (id, start)
            })
            .collect();
        owners.sort_by_key(|&(id, start)| (start.is_none(), start, Reverse(id)));
        owners
    }
}
