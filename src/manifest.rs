use anyhow::{bail, Context, Result};
use log::warn;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// Output path of a transpiled entry, relative to the manifest directory.
pub const OUTPUT_FIELD: &str = "transpiledScript";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Object,
    Function,
}

impl UnitKind {
    fn collection(self) -> &'static str {
        match self {
            UnitKind::Object => "objects",
            UnitKind::Function => "functions",
        }
    }

    fn script_field(self) -> &'static str {
        match self {
            UnitKind::Object => "script",
            UnitKind::Function => "content",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEntry {
    pub kind: UnitKind,
    pub id: String,
    pub name: String,
    pub script: String,
}

// An in-memory `project.json`. Unknown fields are kept untouched so that a
// save only adds the output annotations.
#[derive(Debug, Clone)]
pub struct ProjectManifest {
    path: PathBuf,
    root: Value,
}

impl ProjectManifest {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!("Project manifest not found: '{}'.", path.display());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read '{}'.", path.display()))?;
        let root: Value = serde_json::from_str(&text)
            .with_context(|| format!("Invalid project manifest '{}'.", path.display()))?;
        if !root.is_object() {
            bail!("Project manifest '{}' is not a JSON object.", path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
            root,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    pub fn script_entries(&self) -> Vec<ScriptEntry> {
        let mut entries = self.entries_of(UnitKind::Object);
        entries.extend(self.entries_of(UnitKind::Function));
        entries
    }

    fn entries_of(&self, kind: UnitKind) -> Vec<ScriptEntry> {
        let Some(items) = self.root.get(kind.collection()).and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let id = item.get("id").and_then(Value::as_str).filter(|id| !id.is_empty());
                let script = script_text(item.get(kind.script_field())?)?;
                let Some(id) = id else {
                    warn!("Skipping a scripted {} entry without an id.", kind.collection());
                    return None;
                };
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(id)
                    .to_string();
                Some(ScriptEntry {
                    kind,
                    id: id.to_string(),
                    name,
                    script,
                })
            })
            .collect()
    }

    // `false` when no such entry exists.
    pub fn set_output_path(&mut self, kind: UnitKind, id: &str, relative: &str) -> bool {
        let Some(entry) = self.entry_mut(kind, id) else {
            return false;
        };
        entry.insert(OUTPUT_FIELD.to_string(), Value::String(relative.to_string()));
        true
    }

    pub fn clear_output_path(&mut self, kind: UnitKind, id: &str) -> bool {
        self.entry_mut(kind, id)
            .map(|entry| entry.remove(OUTPUT_FIELD).is_some())
            .unwrap_or(false)
    }

    fn entry_mut(&mut self, kind: UnitKind, id: &str) -> Option<&mut Map<String, Value>> {
        self.root
            .get_mut(kind.collection())?
            .as_array_mut()?
            .iter_mut()
            .find(|item| item.get("id").and_then(Value::as_str) == Some(id))?
            .as_object_mut()
    }

    // Persisted through a temporary sibling so readers never see a partial file.
    pub fn save(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.root)?;
        let mut temp = NamedTempFile::new_in(self.dir()).with_context(|| {
            format!(
                "Failed to create a temporary manifest next to '{}'.",
                self.path.display()
            )
        })?;
        temp.write_all(text.as_bytes())?;
        temp.write_all(b"\n")?;
        temp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to write '{}'.", self.path.display()))?;
        Ok(())
    }
}

// Scripts are stored as JSON text. An already-decoded array is accepted too.
fn script_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::String(_) | Value::Null => None,
        Value::Array(_) => Some(value.to_string()),
        other => {
            warn!("Ignoring a script stored as {}.", json_kind(other));
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::Object(_) => "an object",
        _ => "an unexpected value",
    }
}
