//! Template catalog: id → display metadata → reference document file name.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One selectable Word style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDefinition {
    pub id: String,
    pub display_name: String,
    pub description: String,
    /// File name of the reference `.docx` inside the templates directory.
    pub renderer_filename: String,
    /// Grouping shown in the template picker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Preview image path, relative to the public asset root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl TemplateDefinition {
    fn builtin(id: &str, name: &str, description: &str, filename: &str, disabled: bool) -> Self {
        Self {
            id: id.to_string(),
            display_name: name.to_string(),
            description: description.to_string(),
            renderer_filename: filename.to_string(),
            category: None,
            preview_image: None,
            disabled,
        }
    }

    fn shown_as(mut self, category: &str, preview_image: &str) -> Self {
        self.category = Some(category.to_string());
        self.preview_image = Some(preview_image.to_string());
        self
    }
}

/// Read-only list of templates, looked up by id with fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateCatalog {
    templates: Vec<TemplateDefinition>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new(vec![
            TemplateDefinition::builtin(
                "style-default",
                "General",
                "Standard Word styles for most documents: headings, paragraphs and lists.",
                "style.docx",
                false,
            )
            .shown_as("General", "templates/previews/style-default.svg"),
            TemplateDefinition::builtin(
                "official-document",
                "Official document",
                "Formal reports, notices and memos following administrative layout conventions.",
                "official-document.docx",
                false,
            )
            .shown_as("Official", "templates/previews/official-document.svg"),
            TemplateDefinition::builtin(
                "academic-paper",
                "Academic paper",
                "Papers, research reports and proposals with numbered sections and references.",
                "academic-paper.docx",
                false,
            )
            .shown_as("Paper", "templates/previews/academic-paper.svg"),
            TemplateDefinition::builtin(
                "coming-soon",
                "More templates (coming soon)",
                "Drop a reference document into templates/ and list it here to enable it.",
                "placeholder.docx",
                true,
            ),
        ])
    }
}

impl TemplateCatalog {
    pub fn new(templates: Vec<TemplateDefinition>) -> Self {
        Self { templates }
    }

    /// Load a JSON array of [`TemplateDefinition`]s.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Catalog {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Catalog {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    pub fn templates(&self) -> &[TemplateDefinition] {
        &self.templates
    }

    pub fn get(&self, id: &str) -> Option<&TemplateDefinition> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Exact id, else the first enabled entry, else the first entry.
    ///
    /// The result may still be disabled (exact match on a disabled id, or a
    /// catalog with nothing enabled); callers must check.
    pub fn resolve(&self, id: &str) -> Option<&TemplateDefinition> {
        self.get(id)
            .or_else(|| self.templates.iter().find(|t| !t.disabled))
            .or_else(|| self.templates.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins() {
        let c = TemplateCatalog::default();
        assert_eq!(c.resolve("academic-paper").unwrap().id, "academic-paper");
    }

    #[test]
    fn unknown_id_falls_back_to_first_enabled() {
        let c = TemplateCatalog::new(vec![
            TemplateDefinition::builtin("off", "Off", "", "off.docx", true),
            TemplateDefinition::builtin("on", "On", "", "on.docx", false),
        ]);
        assert_eq!(c.resolve("missing").unwrap().id, "on");
    }

    #[test]
    fn all_disabled_falls_back_to_first() {
        let c = TemplateCatalog::new(vec![
            TemplateDefinition::builtin("a", "A", "", "a.docx", true),
            TemplateDefinition::builtin("b", "B", "", "b.docx", true),
        ]);
        let t = c.resolve("missing").unwrap();
        assert_eq!(t.id, "a");
        assert!(t.disabled);
    }

    #[test]
    fn disabled_exact_match_is_returned_as_is() {
        let c = TemplateCatalog::default();
        assert!(c.resolve("coming-soon").unwrap().disabled);
    }

    #[test]
    fn empty_catalog_resolves_to_none() {
        assert!(TemplateCatalog::new(vec![]).resolve("x").is_none());
    }

    #[test]
    fn loads_json_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        std::fs::write(
            &path,
            r#"[{"id":"memo","displayName":"Memo","description":"d","rendererFilename":"memo.docx"}]"#,
        )
        .unwrap();
        let c = TemplateCatalog::from_json_file(&path).unwrap();
        assert_eq!(c.templates().len(), 1);
        assert!(!c.templates()[0].disabled);
        assert_eq!(c.templates()[0].category, None);
        assert_eq!(c.resolve("anything").unwrap().renderer_filename, "memo.docx");
    }

    #[test]
    fn listing_carries_category_and_preview_when_set() {
        let json = serde_json::to_value(TemplateCatalog::default()).unwrap();
        assert_eq!(json[0]["category"], "General");
        assert_eq!(
            json[0]["previewImage"],
            "templates/previews/style-default.svg"
        );

        let placeholder = json
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["id"] == "coming-soon")
            .unwrap();
        assert!(placeholder.get("category").is_none());
        assert!(placeholder.get("previewImage").is_none());
    }

    #[test]
    fn bad_json_is_a_catalog_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            TemplateCatalog::from_json_file(&path),
            Err(ConfigError::Catalog { .. })
        ));
    }
}
