use serde::{Deserialize, Serialize};

/// Coarse project-wide translation state, a UI-facing summary of the
/// per-item translating set. The queryable value is `Idle` exactly when that
/// set is empty; the other terminal-ish values appear transiently on the
/// event stream around specific transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationState {
    #[default]
    Idle,
    Translating,
    Stopping,
    Completed,
    Error,
}

impl TranslationState {
    /// States that revert to `Idle` on their own rather than through a
    /// dispatch or stop transition.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Stopping | Self::Completed | Self::Error)
    }
}

/// Ordered gate on project mutation. Higher levels forbid more operation
/// classes; an active translation job holds `ProjectOp`, the most
/// restrictive level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockLevel {
    #[default]
    None = 0,
    ItemSelect = 1,
    ItemModify = 2,
    TextEdit = 3,
    ProjectOp = 4,
}

impl LockLevel {
    pub fn permits_item_selection(self) -> bool {
        self <= Self::ItemSelect
    }

    pub fn permits_item_modification(self) -> bool {
        self <= Self::ItemModify
    }

    pub fn permits_text_edit(self) -> bool {
        self <= Self::TextEdit
    }

    /// Structural project operations (add/remove/reorder/rename/switch) are
    /// only allowed with no lock held at all.
    pub fn permits_structural_ops(self) -> bool {
        self == Self::None
    }
}
