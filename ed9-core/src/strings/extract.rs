use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use flate2::Crc;
use regex::Regex;
use walkdir::WalkDir;

use crate::batch::is_injected_text;
use crate::error::{Located, Position, Result};
use crate::program::Program;

use super::pushed_string;
use super::xliff::{TransUnit, XliffDoc};

/// Which literals are worth translating.
#[derive(Debug, Clone)]
pub struct ExtractFilter {
    /// Minimum length in chars.
    pub min_len: usize,
    /// Reject ASCII strings that look like identifiers, numbers or paths.
    pub heuristics: bool,
}

impl Default for ExtractFilter {
    fn default() -> Self {
        Self {
            min_len: 1,
            heuristics: true,
        }
    }
}

struct Patterns {
    numeric: Regex,
    mixed: Regex,
    camel: Regex,
    file: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            numeric: Regex::new(r"^[-+]?[0-9]*\.?[0-9]+$|^0[xX][0-9A-Fa-f]+$")?,
            mixed: Regex::new(r"[A-Za-z][0-9]|[0-9][A-Za-z]")?,
            camel: Regex::new(r"[a-z][A-Z]")?,
            file: Regex::new(r"^[\w.-]+\.[A-Za-z0-9]{1,4}$")?,
        })
    }
}

impl ExtractFilter {
    fn accepts(&self, s: &str, patterns: &Patterns) -> bool {
        if s.is_empty() || s.chars().count() < self.min_len {
            return false;
        }
        if !self.heuristics || s.chars().any(|c| c.is_whitespace() || !c.is_ascii()) {
            return true;
        }
        !(patterns.numeric.is_match(s)
            || s.contains('_')
            || s.contains('/')
            || s.contains('\\')
            || patterns.mixed.is_match(s)
            || patterns.camel.is_match(s)
            || patterns.file.is_match(s))
    }
}

/// Content-addressed unit id: CRC-32 of the UTF-8 source in lowercase hex.
pub fn string_id(source: &str) -> String {
    let mut crc = Crc::new();
    crc.update(source.as_bytes());
    format!("{:08x}", crc.sum())
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    source: String,
    files: Vec<String>,
}

/// Unique literals in order of first appearance.
pub struct Extraction {
    filter: ExtractFilter,
    patterns: Patterns,
    entries: Vec<Entry>,
    by_source: HashMap<String, usize>,
    ids: HashSet<String>,
}

impl Extraction {
    pub fn new(filter: ExtractFilter) -> Result<Self> {
        Ok(Self {
            filter,
            patterns: Patterns::new()?,
            entries: Vec::new(),
            by_source: HashMap::new(),
            ids: HashSet::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect the literals of one program. Returns how many were new.
    pub fn add_program(&mut self, origin: &str, program: &Program) -> usize {
        let mut added = 0;
        for (_, call) in program.calls() {
            let Some(s) = pushed_string(call) else {
                continue;
            };
            if !self.filter.accepts(s, &self.patterns) {
                continue;
            }
            match self.by_source.get(s) {
                Some(&ix) => {
                    let files = &mut self.entries[ix].files;
                    if !files.iter().any(|f| f == origin) {
                        files.push(origin.to_string());
                    }
                }
                None => {
                    let id = self.fresh_id(s);
                    self.by_source.insert(s.to_string(), self.entries.len());
                    self.entries.push(Entry {
                        id,
                        source: s.to_string(),
                        files: vec![origin.to_string()],
                    });
                    added += 1;
                }
            }
        }
        added
    }

    fn fresh_id(&mut self, source: &str) -> String {
        let base = string_id(source);
        let mut id = base.clone();
        let mut n = 0;
        while self.ids.contains(&id) {
            n += 1;
            id = format!("{}-{}", base, n);
        }
        self.ids.insert(id.clone());
        id
    }

    /// Build the XLIFF body, carrying over targets from `previous` by source.
    pub fn to_document(&self, template: &XliffDoc, previous: Option<&XliffDoc>) -> XliffDoc {
        let carried: HashMap<&str, &TransUnit> = previous
            .map(|doc| doc.units.iter().map(|u| (u.source.as_str(), u)).collect())
            .unwrap_or_default();
        let units = self
            .entries
            .iter()
            .map(|e| {
                let old = carried.get(e.source.as_str());
                TransUnit {
                    id: e.id.clone(),
                    source: e.source.clone(),
                    target: old.and_then(|u| u.target.clone()),
                    approved: old.map(|u| u.approved).unwrap_or(false),
                    state: old.and_then(|u| u.state.clone()),
                    note: Some(format!("File: {}", e.files.join(", "))),
                }
            })
            .collect();
        XliffDoc {
            original: template.original.clone(),
            source_language: template.source_language.clone(),
            target_language: template.target_language.clone(),
            units,
        }
    }
}

/// The companion `{source: target_or_source}` map.
pub fn string_map_json(doc: &XliffDoc) -> Result<String> {
    let map: BTreeMap<&str, &str> = doc
        .units
        .iter()
        .map(|u| (u.source.as_str(), u.translation().unwrap_or(&u.source)))
        .collect();
    Ok(serde_json::to_string_pretty(&map)?)
}

/// Extract every `.txt` program under `dir`, walked in sorted order.
///
/// Files that cannot be read or parsed are left out and returned alongside
/// the extraction.
pub fn extract_dir(dir: &Path, filter: ExtractFilter) -> Result<(Extraction, Vec<Located>)> {
    let mut ex = Extraction::new(filter)?;
    let mut failed = Vec::new();
    for path in program_files(dir) {
        let origin = origin_name(dir, &path);
        let program = match std::fs::read_to_string(&path) {
            Ok(src) => Program::parse(&src).map_err(|e| Located::new(&path, e.position(), e)),
            Err(e) => Err(Located::new(&path, Position::Unknown, e.into())),
        };
        match program {
            Ok(program) => {
                let added = ex.add_program(&origin, &program);
                log::debug!("{}: {} new strings", origin, added);
            }
            Err(e) => {
                log::error!("{}", e);
                failed.push(e);
            }
        }
    }
    log::info!("{}: {} unique strings", dir.display(), ex.len());
    Ok((ex, failed))
}

/// `.txt` files under `dir`, sorted.
pub fn program_files(dir: &Path) -> Vec<std::path::PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|x| x == "txt").unwrap_or(false))
        .filter(|p| !is_injected_text(p))
        .collect()
}

/// Path relative to `dir` with forward slashes.
pub fn origin_name(dir: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(dir).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
