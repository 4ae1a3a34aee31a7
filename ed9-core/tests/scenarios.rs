mod common;

use std::path::Path;

use common::{cstr_at, u32_at, RawScript};
use ed9_core::cle::Decrypt;
use ed9_core::commands::CommandTable;
use ed9_core::program::Program;
use ed9_core::strings::{inject, ExtractFilter, Extraction, StringMap, XliffDoc};
use ed9_core::tagged::{encode_int, encode_string, encode_undef};
use ed9_core::{
    assemble, assemble_source, AsmOptions, DisasmOptions, Disassembler, Disassembly, Ed9Error, Result,
};
use pretty_assertions::assert_eq;

fn push(word: u32) -> Vec<u8> {
    let mut v = vec![0x00];
    v.extend_from_slice(&word.to_le_bytes());
    v
}

fn with_u32(opcode: u8, value: u32) -> Vec<u8> {
    let mut v = vec![opcode];
    v.extend_from_slice(&value.to_le_bytes());
    v
}

const EXIT: u8 = 0x0D;

fn disassemble(bytes: &[u8]) -> Disassembly {
    Disassembler::default().disassemble("test", bytes).unwrap()
}

fn reassemble(text: &str) -> Vec<u8> {
    assemble_source(text, Path::new("test.txt"), &CommandTable::default(), AsmOptions::default())
        .unwrap()
        .bytes
}

#[test]
fn minimal_script() {
    let mut raw = RawScript::new();
    raw.function("main", &[], vec![EXIT]);
    let d = disassemble(&raw.build());

    assert!(d.diagnostics.is_empty());
    assert_eq!(
        d.text,
        "create_script_header(name=\"main\", varin=[], varout=[])\n\
         \n\
         add_function(name=\"main\", input_args=[], output_args=[], b0=0x00, b1=0x00)\n\
         \n\
         set_current_function(\"main\")\n\
         EXIT()\n\
         \n\
         compile()\n"
    );

    let bytes = reassemble(&d.text);
    assert_eq!(bytes.len(), 0x18 + 0x20 + 1 + "main\0".len());
    assert_eq!(bytes, raw.build());
}

#[test]
fn single_string_round_trip() {
    let mut code = push(0);
    code.extend_from_slice(&[0x24, 1, 0, 1, 0x01, 4, EXIT]);
    let mut raw = RawScript::new();
    let main = raw.function("main", &[], code);
    raw.string("Hello");
    let at = raw.string_offset("Hello");
    raw.patch(main, 1, encode_string(at));
    let original = raw.build();

    let d = disassemble(&original);
    assert!(d.text.contains("PUSHSTRING(\"Hello\")\nRUNCMD(1, 0, 1)"));
    assert!(d.text.contains("POP(4)\nEXIT()"));

    let bytes = reassemble(&d.text);
    let word = u32_at(&bytes, 0x38 + 1);
    assert_eq!(cstr_at(&bytes, (word & 0x3FFF_FFFF) as usize), "Hello");
    assert_eq!(bytes, original);
    assert_eq!(disassemble(&bytes).text, d.text);
}

#[test]
fn forward_jump_is_relabelled() {
    let mut code = with_u32(0x0B, 0x38 + 10);
    code.extend(with_u32(0x28, 7));
    code.push(EXIT);
    let mut raw = RawScript::new();
    raw.function("main", &[], code);
    let original = raw.build();

    let d = disassemble(&original);
    assert!(d.diagnostics.is_empty());
    assert!(d.text.contains("JUMP(\"Loc_0\")\nDEBUG(7)\nLabel(\"Loc_0\")\nEXIT()"));

    let bytes = reassemble(&d.text);
    assert_eq!(u32_at(&bytes, 0x38 + 1), 0x38 + 10);
    assert_eq!(bytes, original);
}

#[test]
fn intra_script_call_recovers_both_pushes() {
    let mut raw = RawScript::new();
    raw.function("callee", &[encode_int(0)], vec![EXIT]);
    let mut code = push(encode_undef(0));
    code.extend(push(encode_undef(0)));
    code.extend(push(encode_int(42)));
    code.extend_from_slice(&[0x0C, 0, 0, EXIT]);
    raw.function("caller", &[], code);
    let base = raw.code_base();
    assert_eq!(base, 0x5C);

    let d = disassemble(&raw.build());
    assert!(d.text.contains(
        "PUSHCALLERFUNCTIONINDEX()\n\
         PUSHRETURNADDRESS(\"Loc_0\")\n\
         PUSHINTEGER(42)\n\
         CALL(\"callee\") # callee(INT(42))\n\
         Label(\"Loc_0\")\n\
         EXIT()"
    ));

    let bytes = reassemble(&d.text);
    let caller = (base + 1) as usize;
    assert_eq!(u32_at(&bytes, caller + 1), encode_undef(1));
    assert_eq!(u32_at(&bytes, caller + 6), encode_undef(base + 19));
    assert_eq!(u32_at(&bytes, caller + 11), encode_int(42));
    assert_eq!(&bytes[caller + 15..caller + 19], &[0x0C, 0, 0, EXIT]);
}

const MENU: &str = r#"create_script_header(name="menu", varin=[], varout=[])
add_function(name="menu", input_args=[], output_args=[], b0=0x00, b1=0x00)
set_current_function("menu")
PUSHSTRING("Start")
RUNCMD(1, 0, 1)
PUSHSTRING("Retry")
RUNCMD(1, 0, 1)
PUSHSTRING("Quit")
RUNCMD(1, 0, 1)
EXIT()
compile()
"#;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn partial_translation_is_injected() {
    let mut program = Program::parse(MENU).unwrap();
    let mut extraction = Extraction::new(ExtractFilter::default()).unwrap();
    assert_eq!(extraction.add_program("menu.txt", &program), 3);

    let mut doc = extraction.to_document(&XliffDoc::default(), None);
    let sources: Vec<&str> = doc.units.iter().map(|u| u.source.as_str()).collect();
    assert_eq!(sources, ["Start", "Retry", "Quit"]);
    doc.units[0].target = Some("Старт".into());

    let doc = XliffDoc::from_xml(&doc.to_xml().unwrap()).unwrap();
    let map = StringMap::from_xliff(&doc, false);
    assert_eq!(map.len(), 1);
    assert_eq!(inject(&mut program, &map), 1);

    let out = assemble(
        &program,
        Path::new("menu.txt"),
        &CommandTable::default(),
        AsmOptions::default(),
    )
    .unwrap();
    let pool = "Старт\0Retry\0Quit\0".as_bytes();
    assert!(contains(&out.bytes, pool));
    assert!(!contains(&out.bytes, b"Start\0"));
}

#[test]
fn corrupt_jump_keeps_the_literal() {
    let mut code = push(encode_int(0));
    code.extend(with_u32(0x0F, 0xFFFF));
    code.push(EXIT);
    let mut raw = RawScript::new();
    raw.function("main", &[], code);
    let original = raw.build();

    let d = disassemble(&original);
    assert!(d.text.contains("JUMP_IF_FALSE(0xFFFF)"));
    assert!(!d.text.contains("Label("));
    assert!(d
        .diagnostics
        .iter()
        .any(|x| matches!(&x.error, Ed9Error::UnresolvedLabel(l) if l == "0xFFFF")));

    assert_eq!(reassemble(&d.text), original);

    let symbolic = d.text.replace("JUMP_IF_FALSE(0xFFFF)", "JUMP_IF_FALSE(\"Loc_7\")");
    let strict = AsmOptions {
        strict_labels: true,
        ..AsmOptions::default()
    };
    let err = assemble_source(&symbolic, Path::new("test.txt"), &CommandTable::default(), strict)
        .unwrap_err();
    assert!(matches!(&err.source, Ed9Error::UnresolvedLabel(l) if l == "Loc_7"));

    let lenient = assemble_source(
        &symbolic,
        Path::new("test.txt"),
        &CommandTable::default(),
        AsmOptions::default(),
    )
    .unwrap();
    assert!(lenient
        .diagnostics
        .iter()
        .any(|x| matches!(&x.error, Ed9Error::UnresolvedLabel(l) if l == "Loc_7")));
    assert_eq!(u32_at(&lenient.bytes, 0x38 + 6), 0x38 + 11);
}

struct Xor(u8);

impl Decrypt for Xor {
    fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.iter().map(|b| b ^ self.0).collect())
    }
}

#[test]
fn decrypt_hook_runs_only_without_magic() {
    let mut raw = RawScript::new();
    raw.function("main", &[], vec![EXIT]);
    let plain = raw.build();
    let sealed: Vec<u8> = plain.iter().map(|b| b ^ 0x5A).collect();

    let d = Disassembler::default()
        .with_decrypt(Box::new(Xor(0x5A)))
        .disassemble("test", &sealed)
        .unwrap();
    assert_eq!(d.text, disassemble(&plain).text);

    // a plain image is never handed to the hook
    let again = Disassembler::default()
        .with_decrypt(Box::new(Xor(0x5A)))
        .disassemble("test", &plain)
        .unwrap();
    assert_eq!(again.text, d.text);

    let wrong = Disassembler::default()
        .with_decrypt(Box::new(Xor(0x33)))
        .disassemble("test", &sealed);
    assert!(matches!(wrong, Err(Ed9Error::NotAScript(_))));
    assert!(matches!(
        Disassembler::default().disassemble("test", &sealed),
        Err(Ed9Error::NotAScript(_))
    ));
}

#[test]
fn cross_script_call_round_trip() {
    let mut code = with_u32(0x25, 0x38 + 20);
    code.extend(push(encode_int(3)));
    code.extend_from_slice(&[0x22, 0, 0, 0, 0, 0, 0, 0, 0, 1, EXIT]);
    let mut raw = RawScript::new();
    let main = raw.function("main", &[], code);
    raw.string("ev_file");
    raw.string("ev_fn");
    let (file, func) = (raw.string_offset("ev_file"), raw.string_offset("ev_fn"));
    raw.patch(main, 11, encode_string(file));
    raw.patch(main, 15, encode_string(func));
    let original = raw.build();

    let d = disassemble(&original);
    assert!(d.diagnostics.is_empty());
    assert!(d.text.contains(
        "PUSH_RETURN_ADDRESS_XSCRIPT(\"Loc_0\")\n\
         PUSHINTEGER(3)\n\
         CALL_FROM_OTHER_SCRIPT(STR(\"ev_file\"), STR(\"ev_fn\"), 1) # args: INT(3)\n\
         Label(\"Loc_0\")\n\
         EXIT()"
    ));

    let bytes = reassemble(&d.text);
    assert_eq!(u32_at(&bytes, 0x38 + 1), 0x38 + 20);
    assert_eq!(bytes, original);
}

#[test]
fn line_markers_are_blank_unless_kept() {
    let mut raw = RawScript::new();
    raw.function("main", &[], vec![0x26, 1, 0, EXIT]);
    let original = raw.build();

    let d = disassemble(&original);
    assert!(d.text.contains("set_current_function(\"main\")\n\nEXIT()"));
    assert!(!d.text.contains("LINE_MARKER"));
    let mut bare = RawScript::new();
    bare.function("main", &[], vec![EXIT]);
    assert_eq!(reassemble(&d.text), bare.build());

    let kept = Disassembler::new(DisasmOptions {
        markers: true,
        ..DisasmOptions::default()
    })
    .disassemble("test", &original)
    .unwrap();
    assert!(kept.text.contains("set_current_function(\"main\")\nLINE_MARKER(1)\nEXIT()"));
    assert_eq!(reassemble(&kept.text), original);
}

#[test]
fn shared_code_start_goes_to_the_lowest_id() {
    let mut raw = RawScript::new();
    // no code of its own, so it starts where "main" does
    raw.function("alias", &[], vec![]);
    raw.function("main", &[], vec![EXIT]);
    assert_eq!(raw.function_start(0), raw.function_start(1));
    let original = raw.build();

    let d = disassemble(&original);
    let f = &d.script.functions;
    assert_eq!((f[0].name.as_str(), f[0].instructions.len()), ("alias", 1));
    assert!(f[1].instructions.is_empty());
    assert_eq!(f[1].code_start(), f[0].code_start());
    assert!(d.text.contains("set_current_function(\"alias\")\nEXIT()"));
    assert!(d.text.contains("set_current_function(\"main\")\n\n"));

    assert_eq!(reassemble(&d.text), original);
}
