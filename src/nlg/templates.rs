//! Deserialized shape of `templates/dialogue.json` (spec.md §6).
//!
//! Ported from the table the original builds in
//! `examples/original_source/src/modules/dialogue/utils/_template.py`;
//! that file hardcodes the table as Python literals, this crate loads the
//! equivalent shape from JSON once at startup into a process-global
//! `Arc<TemplateTable>` per SPEC_FULL.md's configuration section.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// `(question text, TTS cache label)`, mirroring the original's
/// `prompts`/`correction` tuple shape.
pub type LabeledPrompt = (String, String);

#[derive(Debug, Clone, Deserialize)]
pub struct CommonTemplates {
    pub initial_utterance: String,
    pub filler: String,
    pub fallback: HashMap<String, String>,
    pub scene_initial: HashMap<String, String>,
    pub scene_complete: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneTemplates {
    #[serde(default)]
    pub prompts: HashMap<String, LabeledPrompt>,
    #[serde(default)]
    pub responses: HashMap<String, String>,
    #[serde(default)]
    pub implicit_confirmation: HashMap<String, String>,
    #[serde(default)]
    pub confirm: HashMap<String, String>,
    #[serde(default)]
    pub correction: HashMap<String, LabeledPrompt>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateTable {
    pub common: CommonTemplates,
    pub scenes: HashMap<String, SceneTemplates>,
}

impl TemplateTable {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading template file {}", path.display()))?;
        serde_json::from_str(&contents).context("parsing dialogue template JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_bundled_dialogue_templates() {
        let table = TemplateTable::load(Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates/dialogue.json")))
            .expect("bundled templates should parse");
        assert!(table.scenes.contains_key("new_reservation"));
        assert!(table.common.fallback.contains_key("default"));
    }
}
