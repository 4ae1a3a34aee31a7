use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::Result;
use crate::program::{Program, Value};

use super::xliff::XliffDoc;

/// Source literal to replacement.
///
/// Identity entries are dropped, and so are chained ones (`a -> b` where `b`
/// is itself replaced), so injecting twice gives the same program as
/// injecting once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringMap {
    map: HashMap<String, String>,
}

impl StringMap {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let raw: HashMap<String, String> = pairs
            .into_iter()
            .filter(|(s, t)| s != t && !t.is_empty())
            .collect();
        let mut map = HashMap::with_capacity(raw.len());
        for (source, target) in &raw {
            if raw.contains_key(target) {
                log::warn!("dropping chained translation {:?} -> {:?}", source, target);
                continue;
            }
            map.insert(source.clone(), target.clone());
        }
        Self { map }
    }

    /// A `{source: target}` JSON object.
    pub fn from_json_str(src: &str) -> Result<Self> {
        let pairs: BTreeMap<String, String> = serde_json::from_str(src)?;
        Ok(Self::new(pairs))
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Units with a real translation; with `approved_only`, only approved
    /// ones.
    pub fn from_xliff(doc: &XliffDoc, approved_only: bool) -> Self {
        Self::new(
            doc.units
                .iter()
                .filter(|u| u.approved || !approved_only)
                .filter_map(|u| u.translation().map(|t| (u.source.clone(), t.to_string()))),
        )
    }

    /// `other` wins on conflicts.
    pub fn merged(self, other: StringMap) -> Self {
        let mut pairs = self.map;
        pairs.extend(other.map);
        Self::new(pairs)
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.map.get(source).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Replace translated `PUSHSTRING` literals in place. Returns the number of
/// replacements.
pub fn inject(program: &mut Program, map: &StringMap) -> usize {
    let mut count = 0;
    for call in program.calls_mut() {
        if call.name != "PUSHSTRING" {
            continue;
        }
        let ix = call
            .args
            .iter()
            .position(|a| a.name.as_deref() == Some("value"))
            .or_else(|| call.args.iter().position(|a| a.name.is_none()));
        let Some(ix) = ix else {
            continue;
        };
        if let Value::Str(s) = &mut call.args[ix].value {
            if let Some(target) = map.get(s) {
                *s = target.to_string();
                count += 1;
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::xliff::TransUnit;
    use pretty_assertions::assert_eq;

    fn map(pairs: &[(&str, &str)]) -> StringMap {
        StringMap::new(pairs.iter().map(|(a, b)| (a.to_string(), b.to_string())))
    }

    #[test]
    fn chained_and_identity_entries_are_dropped() {
        let m = map(&[("a", "b"), ("b", "c"), ("x", "x"), ("p", "q"), ("q", "p")]);
        assert_eq!(m.get("a"), None);
        assert_eq!(m.get("b"), Some("c"));
        assert_eq!(m.get("x"), None);
        assert_eq!(m.get("p"), None);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn inject_is_idempotent_and_counts() {
        let src = "PUSHSTRING(\"Start\")\nPUSHSTRING(value=\"Quit\")\nPUSHINTEGER(1)\nPUSHSTRING(\"Start\")\n";
        let m = map(&[("Start", "Старт"), ("Quit", "Выход")]);
        let mut p = Program::parse(src).unwrap();
        assert_eq!(inject(&mut p, &m), 3);
        let once = p.render();
        assert_eq!(inject(&mut p, &m), 0);
        assert_eq!(p.render(), once);
        assert!(once.contains("PUSHSTRING(value=\"Выход\")"));
    }

    #[test]
    fn xliff_maps_respect_approval() {
        let doc = XliffDoc {
            units: vec![
                TransUnit {
                    id: "1".into(),
                    source: "Start".into(),
                    target: Some("Старт".into()),
                    approved: true,
                    ..TransUnit::default()
                },
                TransUnit {
                    id: "2".into(),
                    source: "Quit".into(),
                    target: Some("Выход".into()),
                    ..TransUnit::default()
                },
                TransUnit {
                    id: "3".into(),
                    source: "Retry".into(),
                    target: Some("Retry".into()),
                    approved: true,
                    ..TransUnit::default()
                },
            ],
            ..XliffDoc::default()
        };
        assert_eq!(StringMap::from_xliff(&doc, false).len(), 2);
        let approved = StringMap::from_xliff(&doc, true);
        assert_eq!(approved.len(), 1);
        assert_eq!(approved.get("Start"), Some("Старт"));
    }

    #[test]
    fn json_map_loads() {
        let m = StringMap::from_json_str(r#"{"Start": "Старт", "Quit": "Quit"}"#).unwrap();
        assert_eq!(m.len(), 1);
        assert!(StringMap::from_json_str("[1]").is_err());
    }
}
