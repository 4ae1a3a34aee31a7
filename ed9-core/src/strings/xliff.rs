//! XLIFF 1.2, restricted to `file/body/trans-unit{source,target,note}`.

use std::borrow::Cow;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Ed9Error, Result};

const NAMESPACE: &str = "urn:oasis:names:tc:xliff:document:1.2";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransUnit {
    pub id: String,
    pub source: String,
    pub target: Option<String>,
    /// `approved="yes"`: confirmed by a person, not just translated.
    pub approved: bool,
    pub state: Option<String>,
    pub note: Option<String>,
}

impl TransUnit {
    /// The target when it actually changes the source.
    pub fn translation(&self) -> Option<&str> {
        self.target
            .as_deref()
            .filter(|t| !t.is_empty() && *t != self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct XliffDoc {
    pub original: String,
    pub source_language: String,
    pub target_language: String,
    pub units: Vec<TransUnit>,
}

impl Default for XliffDoc {
    fn default() -> Self {
        Self {
            original: "ed9".into(),
            source_language: "ja".into(),
            target_language: "en".into(),
            units: Vec::new(),
        }
    }
}

fn xml_err(e: impl std::fmt::Display) -> Ed9Error {
    Ed9Error::Xliff(e.to_string())
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(xml_err)?;
        if a.key.as_ref() == key {
            return Ok(Some(a.unescape_value().map_err(xml_err)?.into_owned()));
        }
    }
    Ok(None)
}

fn is_yes(v: Option<String>) -> bool {
    matches!(v.as_deref(), Some("yes") | Some("true"))
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Source,
    Target,
    Note,
}

impl XliffDoc {
    pub fn from_xml(src: &str) -> Result<Self> {
        let mut reader = Reader::from_str(src);
        let mut doc = XliffDoc {
            units: Vec::new(),
            ..XliffDoc::default()
        };
        let mut unit: Option<TransUnit> = None;
        let mut field: Option<Field> = None;
        let mut text = String::new();

        loop {
            let event = reader.read_event().map_err(xml_err)?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let empty = matches!(event, Event::Empty(_));
                    match e.name().as_ref() {
                        b"file" => {
                            if let Some(v) = attr(e, b"original")? {
                                doc.original = v;
                            }
                            if let Some(v) = attr(e, b"source-language")? {
                                doc.source_language = v;
                            }
                            if let Some(v) = attr(e, b"target-language")? {
                                doc.target_language = v;
                            }
                        }
                        b"trans-unit" => {
                            let id = attr(e, b"id")?
                                .ok_or_else(|| Ed9Error::Xliff("trans-unit without id".into()))?;
                            let u = TransUnit {
                                id,
                                approved: is_yes(attr(e, b"approved")?),
                                ..TransUnit::default()
                            };
                            if empty {
                                doc.units.push(u);
                            } else {
                                unit = Some(u);
                            }
                        }
                        name @ (b"source" | b"target" | b"note") => {
                            let f = match name {
                                b"source" => Field::Source,
                                b"target" => Field::Target,
                                _ => Field::Note,
                            };
                            if let (Some(u), Field::Target) = (unit.as_mut(), f) {
                                if is_yes(attr(e, b"approved")?) {
                                    u.approved = true;
                                }
                                u.state = attr(e, b"state")?;
                                u.target = Some(String::new());
                            }
                            text.clear();
                            field = if empty { None } else { Some(f) };
                        }
                        _ => {}
                    }
                }
                Event::Text(t) if field.is_some() => {
                    text.push_str(&t.unescape().map_err(xml_err)?);
                }
                Event::CData(c) if field.is_some() => {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
                Event::End(e) => match e.name().as_ref() {
                    b"source" | b"target" | b"note" => {
                        if let (Some(u), Some(f)) = (unit.as_mut(), field.take()) {
                            let value = std::mem::take(&mut text);
                            match f {
                                Field::Source => u.source = value,
                                Field::Target => u.target = Some(value),
                                Field::Note => u.note = Some(value),
                            }
                        }
                    }
                    b"trans-unit" => {
                        if let Some(u) = unit.take() {
                            doc.units.push(u);
                        }
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }
        Ok(doc)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_xml(&std::fs::read_to_string(path)?)
    }

    pub fn to_xml(&self) -> Result<String> {
        let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_err)?;
        w.write_event(Event::Start(
            BytesStart::new("xliff").with_attributes([("version", "1.2"), ("xmlns", NAMESPACE)]),
        ))
        .map_err(xml_err)?;
        w.write_event(Event::Start(BytesStart::new("file").with_attributes([
            ("original", self.original.as_str()),
            ("source-language", self.source_language.as_str()),
            ("target-language", self.target_language.as_str()),
            ("datatype", "plaintext"),
        ])))
        .map_err(xml_err)?;
        w.write_event(Event::Start(BytesStart::new("body")))
            .map_err(xml_err)?;

        for u in &self.units {
            w.write_event(Event::Start(
                BytesStart::new("trans-unit").with_attributes([("id", u.id.as_str())]),
            ))
            .map_err(xml_err)?;
            write_text(&mut w, BytesStart::new("source"), &u.source)?;
            if let Some(target) = &u.target {
                let mut start = BytesStart::new("target");
                if let Some(state) = &u.state {
                    start.push_attribute(("state", state.as_str()));
                }
                if u.approved {
                    start.push_attribute(("approved", "yes"));
                }
                write_text(&mut w, start, target)?;
            }
            if let Some(note) = &u.note {
                write_text(&mut w, BytesStart::new("note"), note)?;
            }
            w.write_event(Event::End(BytesEnd::new("trans-unit")))
                .map_err(xml_err)?;
        }

        for name in ["body", "file", "xliff"] {
            w.write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_err)?;
        }
        let mut out = String::from_utf8(w.into_inner()).map_err(xml_err)?;
        out.push('\n');
        Ok(out)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_xml()?)?;
        Ok(())
    }
}

fn write_text(w: &mut Writer<Vec<u8>>, start: BytesStart<'_>, text: &str) -> Result<()> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    w.write_event(Event::Start(start)).map_err(xml_err)?;
    w.write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    w.write_event(Event::End(BytesEnd::new(Cow::Owned(name))))
        .map_err(xml_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn document_survives_write_and_read() {
        let doc = XliffDoc {
            units: vec![
                TransUnit {
                    id: "a1".into(),
                    source: "Start <now> & \"go\"".into(),
                    target: Some("Старт".into()),
                    approved: true,
                    state: Some("translated".into()),
                    note: Some("File: a.txt".into()),
                },
                TransUnit {
                    id: "b2".into(),
                    source: "  padded  ".into(),
                    ..TransUnit::default()
                },
            ],
            ..XliffDoc::default()
        };
        let xml = doc.to_xml().unwrap();
        assert!(xml.contains("<target state=\"translated\" approved=\"yes\">"));
        assert_eq!(XliffDoc::from_xml(&xml).unwrap(), doc);
    }

    #[test]
    fn reads_unit_level_approval_and_empty_targets() {
        let xml = r#"<?xml version="1.0"?>
<xliff version="1.2"><file original="x" source-language="ja" target-language="fr"><body>
<trans-unit id="1" approved="yes"><source>Quit</source><target>Quitter</target></trans-unit>
<trans-unit id="2"><source>Retry</source><target/></trans-unit>
</body></file></xliff>"#;
        let doc = XliffDoc::from_xml(xml).unwrap();
        assert_eq!(doc.target_language, "fr");
        assert!(doc.units[0].approved);
        assert_eq!(doc.units[0].translation(), Some("Quitter"));
        assert_eq!(doc.units[1].target.as_deref(), Some(""));
        assert_eq!(doc.units[1].translation(), None);
    }

    #[test]
    fn unit_without_id_is_rejected() {
        let xml = "<xliff><file><body><trans-unit><source>x</source></trans-unit></body></file></xliff>";
        assert!(matches!(XliffDoc::from_xml(xml), Err(Ed9Error::Xliff(_))));
    }
}
