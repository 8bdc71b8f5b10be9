use crate::error::ValidationError;

/// Expression labels offered to the user, plus the ordered subset they picked
/// for generation. Labels are unique and compared case-sensitively.
#[derive(Debug, Clone, Default)]
pub struct ExpressionCatalog {
    defaults: Vec<String>,
    custom: Vec<String>,
    selected: Vec<String>,
}

impl ExpressionCatalog {
    pub fn new<I, S>(defaults: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut catalog = ExpressionCatalog::default();
        for label in defaults {
            let label = label.as_ref().trim();
            if !label.is_empty() && !catalog.contains(label) {
                catalog.defaults.push(label.to_string());
            }
        }
        catalog
    }

    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.defaults
            .iter()
            .chain(self.custom.iter())
            .map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.all().any(|existing| existing == label)
    }

    pub fn is_custom(&self, label: &str) -> bool {
        self.custom.iter().any(|existing| existing == label)
    }

    /// Adds a user-defined label and selects it.
    pub fn add_custom(&mut self, label: &str) -> Result<String, ValidationError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        if self.contains(label) {
            return Err(ValidationError::DuplicatePrompt(label.to_string()));
        }
        self.custom.push(label.to_string());
        self.selected.push(label.to_string());
        Ok(label.to_string())
    }

    /// Returns whether the label is selected after the toggle.
    pub fn toggle_selected(&mut self, label: &str) -> Result<bool, ValidationError> {
        if !self.contains(label) {
            return Err(ValidationError::UnknownPrompt(label.to_string()));
        }
        if let Some(index) = self.selected.iter().position(|existing| existing == label) {
            self.selected.remove(index);
            Ok(false)
        } else {
            self.selected.push(label.to_string());
            Ok(true)
        }
    }

    pub fn is_selected(&self, label: &str) -> bool {
        self.selected.iter().any(|existing| existing == label)
    }

    #[cfg(test)]
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }
}
