use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId {
    pub id: u8,
    pub op: u8,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CommandFile {
    #[serde(default)]
    commands: BTreeMap<String, CommandId>,
}

/// `RUNCMD` names, loaded once from YAML:
///
/// ```yaml
/// commands:
///   message_show: { id: 5, op: 0 }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    by_name: BTreeMap<String, CommandId>,
    by_id: HashMap<CommandId, String>,
}

impl CommandTable {
    pub fn from_yaml_str(src: &str) -> Result<Self> {
        let file: CommandFile = serde_yaml::from_str(src)?;
        Ok(Self::from_map(file.commands))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&src)
    }

    pub fn from_map(by_name: BTreeMap<String, CommandId>) -> Self {
        let mut by_id = HashMap::new();
        // several names for one pair: the alphabetically first one is shown
        for (name, id) in &by_name {
            by_id.entry(*id).or_insert_with(|| name.clone());
        }
        Self { by_name, by_id }
    }

    pub fn lookup(&self, name: &str) -> Option<CommandId> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, id: u8, op: u8) -> Option<&str> {
        self.by_id.get(&CommandId { id, op }).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_both_ways() {
        let table = CommandTable::from_yaml_str(
            "commands:\n  message_show: { id: 5, op: 0 }\n  show_msg: { id: 5, op: 0 }\n  wait: { id: 1, op: 3 }\n",
        )
        .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.lookup("wait"), Some(CommandId { id: 1, op: 3 }));
        assert_eq!(table.name_of(5, 0), Some("message_show"));
        assert_eq!(table.name_of(9, 9), None);
    }

    #[test]
    fn empty_and_broken_files() {
        assert!(CommandTable::from_yaml_str("{}").unwrap().is_empty());
        assert!(CommandTable::from_yaml_str("commands: [1, 2]").is_err());
    }
}
