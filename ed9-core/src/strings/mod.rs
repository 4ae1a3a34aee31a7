//! Translatable `PUSHSTRING` literals: extraction to XLIFF and injection back
//! into builder programs.

pub mod extract;
pub mod inject;
pub mod xliff;

pub use extract::{extract_dir, string_map_json, ExtractFilter, Extraction};
pub use inject::{inject, StringMap};
pub use xliff::{TransUnit, XliffDoc};

use crate::program::{Call, Value};

/// The literal of a `PUSHSTRING("...")` call.
pub(crate) fn pushed_string(call: &Call) -> Option<&str> {
    if call.name != "PUSHSTRING" {
        return None;
    }
    call.arg("value", 0).and_then(Value::as_str)
}
