use crate::binary::BinaryWriter;
use crate::error::Result;

/// A dword left as zero until its value is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch<K> {
    /// Offset relative to the base passed to [`PatchTable::apply`].
    pub offset: usize,
    pub kind: K,
}

/// A string pointer that becomes a pool offset.
#[derive(Debug, Clone, PartialEq)]
pub struct StringRef {
    pub text: String,
    /// Written as a string-tagged word rather than a raw offset.
    pub tagged: bool,
}

/// A code address named by a label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRef {
    pub label: String,
    /// Written as an undefined-tagged word (`PUSHRETURNADDRESS`).
    pub tagged: bool,
    pub line: usize,
}

/// The address right after a call, captured when the call is emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSiteRef {
    /// Code-relative destination, unset until the call is seen.
    pub destination: Option<u32>,
    pub tagged: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchTable<K> {
    entries: Vec<Patch<K>>,
}

impl<K> Default for PatchTable<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K> PatchTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, offset: usize, kind: K) -> usize {
        self.entries.push(Patch { offset, kind });
        self.entries.len() - 1
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Patch<K>> {
        self.entries.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Patch<K>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Write `resolve(kind)` at `base + offset` for every entry.
    pub fn apply<F>(&self, out: &mut BinaryWriter, base: usize, mut resolve: F) -> Result<()>
    where
        F: FnMut(&K) -> Result<u32>,
    {
        for p in &self.entries {
            let value = resolve(&p.kind)?;
            out.patch_u32(base + p.offset, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Ed9Error;

    #[test]
    fn apply_writes_relative_to_base() {
        let mut out = BinaryWriter::new();
        out.write_bytes(&[0; 12]);
        let mut table = PatchTable::new();
        table.push(0, 7u32);
        table.push(4, 9u32);
        table.apply(&mut out, 4, |v| Ok(*v)).unwrap();
        assert_eq!(out.as_slice(), &[0, 0, 0, 0, 7, 0, 0, 0, 9, 0, 0, 0]);

        table.push(12, 1);
        assert!(matches!(
            table.apply(&mut out, 0, |v| Ok(*v)),
            Err(Ed9Error::OutOfRange { offset: 12, .. })
        ));
    }
}
