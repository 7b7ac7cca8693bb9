use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ContextMode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectError {
    #[error("an item named '{0}' already exists")]
    DuplicateItemName(String),
    #[error("item name cannot be empty")]
    EmptyItemName,
    #[error("item index {0} is out of range")]
    IndexOutOfRange(usize),
}

pub type ProjectResult<T> = Result<T, ProjectError>;

fn default_include_in_context() -> bool {
    true
}

/// One named unit of source and translated text, addressed by its position
/// in the project's item list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    #[serde(default)]
    pub source_text: String,
    #[serde(default)]
    pub translated_text: String,
    /// Only consulted in manual context mode. Absent keys read as true.
    #[serde(default = "default_include_in_context")]
    pub include_in_context: bool,
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_text: String::new(),
            translated_text: String::new(),
            include_in_context: true,
        }
    }

    pub fn with_source(name: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            source_text: source_text.into(),
            ..Self::new(name)
        }
    }
}

/// Per-project prompt template overrides. `None` falls through to the
/// configured defaults, then to the hardcoded fallbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
}

/// Application-level default prompt templates, the middle tier of template
/// resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
}

/// An ordered list of items plus the translation settings that apply to all
/// of them.
///
/// Items are private so every structural mutation funnels through methods
/// that enforce case-sensitive name uniqueness. Callers identify items by
/// positional index; the orchestrator layer is responsible for refusing
/// structural mutations while translation jobs hold index references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub title: String,
    pub target_language: String,
    pub model: String,
    /// Approximate token budget for context selection. Zero or negative
    /// means unlimited.
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: i64,
    #[serde(default)]
    pub context_mode: ContextMode,
    #[serde(default)]
    pub prompt_overrides: PromptOverrides,
    items: Vec<Item>,
}

fn default_context_token_budget() -> i64 {
    -1
}

impl Project {
    pub fn new(
        title: impl Into<String>,
        target_language: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            target_language: target_language.into(),
            model: model.into(),
            context_token_budget: default_context_token_budget(),
            context_mode: ContextMode::default(),
            prompt_overrides: PromptOverrides::default(),
            items: Vec::new(),
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&Item> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends an item, refusing blank or duplicate names. Returns the new
    /// item's index.
    pub fn add_item(&mut self, item: Item) -> ProjectResult<usize> {
        let index = self.items.len();
        self.insert_item(index, item)?;
        Ok(index)
    }

    pub fn insert_item(&mut self, index: usize, mut item: Item) -> ProjectResult<()> {
        if index > self.items.len() {
            return Err(ProjectError::IndexOutOfRange(index));
        }
        item.name = item.name.trim().to_owned();
        if item.name.is_empty() {
            return Err(ProjectError::EmptyItemName);
        }
        if self.name_taken(&item.name, None) {
            return Err(ProjectError::DuplicateItemName(item.name));
        }
        self.items.insert(index, item);
        Ok(())
    }

    pub fn remove_item(&mut self, index: usize) -> ProjectResult<Item> {
        if index >= self.items.len() {
            return Err(ProjectError::IndexOutOfRange(index));
        }
        Ok(self.items.remove(index))
    }

    pub fn rename_item(&mut self, index: usize, new_name: &str) -> ProjectResult<()> {
        if index >= self.items.len() {
            return Err(ProjectError::IndexOutOfRange(index));
        }
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(ProjectError::EmptyItemName);
        }
        if self.items[index].name == new_name {
            return Ok(());
        }
        if self.name_taken(new_name, Some(index)) {
            return Err(ProjectError::DuplicateItemName(new_name.to_owned()));
        }
        self.items[index].name = new_name.to_owned();
        Ok(())
    }

    /// Deep-copies the item at `index` under a `"<name> Copy"` (then
    /// `"<name> Copy 2"`, ...) name and inserts it immediately after the
    /// original. Returns the copy's index.
    pub fn duplicate_item(&mut self, index: usize) -> ProjectResult<usize> {
        let original = self
            .items
            .get(index)
            .ok_or(ProjectError::IndexOutOfRange(index))?;
        let base_name = original.name.clone();
        let mut copy = original.clone();

        let mut candidate = format!("{base_name} Copy");
        let mut suffix = 2u32;
        while self.name_taken(&candidate, None) {
            candidate = format!("{base_name} Copy {suffix}");
            suffix += 1;
        }
        copy.name = candidate;

        let insert_index = index + 1;
        self.items.insert(insert_index, copy);
        Ok(insert_index)
    }

    /// Swaps the item with its upper neighbor. Returns the item's new index;
    /// the first item stays put.
    pub fn move_item_up(&mut self, index: usize) -> ProjectResult<usize> {
        if index >= self.items.len() {
            return Err(ProjectError::IndexOutOfRange(index));
        }
        if index == 0 {
            return Ok(index);
        }
        self.items.swap(index, index - 1);
        Ok(index - 1)
    }

    /// Swaps the item with its lower neighbor. Returns the item's new index;
    /// the last item stays put.
    pub fn move_item_down(&mut self, index: usize) -> ProjectResult<usize> {
        if index >= self.items.len() {
            return Err(ProjectError::IndexOutOfRange(index));
        }
        if index + 1 == self.items.len() {
            return Ok(index);
        }
        self.items.swap(index, index + 1);
        Ok(index + 1)
    }

    pub fn set_source_text(&mut self, index: usize, text: impl Into<String>) -> ProjectResult<()> {
        let item = self
            .items
            .get_mut(index)
            .ok_or(ProjectError::IndexOutOfRange(index))?;
        item.source_text = text.into();
        Ok(())
    }

    pub fn set_translated_text(
        &mut self,
        index: usize,
        text: impl Into<String>,
    ) -> ProjectResult<()> {
        let item = self
            .items
            .get_mut(index)
            .ok_or(ProjectError::IndexOutOfRange(index))?;
        item.translated_text = text.into();
        Ok(())
    }

    pub fn set_include_in_context(&mut self, index: usize, include: bool) -> ProjectResult<()> {
        let item = self
            .items
            .get_mut(index)
            .ok_or(ProjectError::IndexOutOfRange(index))?;
        item.include_in_context = include;
        Ok(())
    }

    fn name_taken(&self, name: &str, skip_index: Option<usize>) -> bool {
        self.items
            .iter()
            .enumerate()
            .any(|(i, item)| Some(i) != skip_index && item.name == name)
    }
}
