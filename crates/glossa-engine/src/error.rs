use glossa_domain::ProjectError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("item index out of range: {0}")]
    IndexOutOfRange(usize),
    #[error("item {0} is already translating")]
    AlreadyTranslating(usize),
    #[error("{0}")]
    MissingInput(String),
    #[error("project is locked while translations are running")]
    ProjectLocked,
    #[error("item {0} cannot be edited while it is translating")]
    ItemBusy(usize),
    #[error("{0}")]
    Project(String),
}

impl From<ProjectError> for EngineError {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::IndexOutOfRange(index) => Self::IndexOutOfRange(index),
            other => Self::Project(other.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
