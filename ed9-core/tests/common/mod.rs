#![allow(dead_code)]

use ed9_core::script::name_hash;

/// Hand-laid `#scp` image: header, function headers, in vars, code, pool.
pub struct RawScript {
    functions: Vec<RawFunction>,
    strings: Vec<String>,
}

struct RawFunction {
    name: String,
    in_args: Vec<u32>,
    code: Vec<u8>,
}

impl RawScript {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            strings: Vec::new(),
        }
    }

    pub fn function(&mut self, name: &str, in_args: &[u32], code: Vec<u8>) -> usize {
        self.functions.push(RawFunction {
            name: name.to_string(),
            in_args: in_args.to_vec(),
            code,
        });
        self.functions.len() - 1
    }

    /// A pool string placed after the function names.
    pub fn string(&mut self, s: &str) {
        self.strings.push(s.to_string());
    }

    pub fn code_base(&self) -> u32 {
        let in_words: usize = self.functions.iter().map(|f| f.in_args.len()).sum();
        (0x18 + 0x20 * self.functions.len() + 4 * in_words) as u32
    }

    /// Absolute start of function `ix`.
    pub fn function_start(&self, ix: usize) -> u32 {
        self.code_base()
            + self.functions[..ix]
                .iter()
                .map(|f| f.code.len() as u32)
                .sum::<u32>()
    }

    fn pool_base(&self) -> u32 {
        self.function_start(self.functions.len())
    }

    fn pool(&self) -> Vec<&str> {
        self.functions
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.strings.iter().map(String::as_str))
            .collect()
    }

    /// Absolute offset of a pool entry.
    pub fn string_offset(&self, s: &str) -> u32 {
        let mut off = self.pool_base();
        for entry in self.pool() {
            if entry == s {
                return off;
            }
            off += entry.len() as u32 + 1;
        }
        panic!("{} is not in the pool", s);
    }

    /// Overwrite a dword inside the code of function `ix`.
    pub fn patch(&mut self, ix: usize, at: usize, value: u32) {
        self.functions[ix].code[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn build(&self) -> Vec<u8> {
        let n = self.functions.len() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"#scp");
        for v in [0x18, n, 0, 0, 0] {
            out.extend_from_slice(&v.to_le_bytes());
        }

        let mut in_ptr = 0x18 + 0x20 * n;
        for (i, f) in self.functions.iter().enumerate() {
            let start = self.function_start(i);
            let dwords = [
                start,
                u32::from_le_bytes([f.in_args.len() as u8, 0, 0, 0]),
                in_ptr,
                in_ptr,
                0,
                in_ptr,
                name_hash(&f.name),
                self.string_offset(&f.name),
            ];
            for v in dwords {
                out.extend_from_slice(&v.to_le_bytes());
            }
            in_ptr += 4 * f.in_args.len() as u32;
        }
        for f in &self.functions {
            for w in &f.in_args {
                out.extend_from_slice(&w.to_le_bytes());
            }
        }
        for f in &self.functions {
            out.extend_from_slice(&f.code);
        }
        for s in self.pool() {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        out
    }
}

pub fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// NUL-terminated string at `at`.
pub fn cstr_at(bytes: &[u8], at: usize) -> String {
    let end = bytes[at..].iter().position(|&b| b == 0).unwrap() + at;
    String::from_utf8(bytes[at..end].to_vec()).unwrap()
}
