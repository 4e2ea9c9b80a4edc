use std::fmt;

use super::Collection;

#[derive(Debug)]
pub enum MorphologyError {
    Io(std::io::Error),
    Json(serde_json::Error),
    NotAnObject,
    MissingKind,
    UnknownKind(String),
    ComponentNotFound { collection: Collection, name: String },
}

impl From<serde_json::Error> for MorphologyError {
    fn from(e: serde_json::Error) -> Self {
        MorphologyError::Json(e)
    }
}

impl fmt::Display for MorphologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MorphologyError::Io(e) => write!(f, "I/O error: {e}"),
            MorphologyError::Json(e) => write!(f, "invalid morphology JSON: {e}"),
            MorphologyError::NotAnObject => write!(f, "morphology is not a JSON object"),
            MorphologyError::MissingKind => write!(f, "morphology has no \"kind\" field"),
            MorphologyError::UnknownKind(k) => write!(f, "unknown morphology kind \"{k}\""),
            MorphologyError::ComponentNotFound { collection, name } => {
                let what = match collection {
                    Collection::Strata => "Stratum",
                    Collection::Chunks => "Chunk",
                };
                write!(f, "{what} \"{name}\" not found")
            }
        }
    }
}

impl std::error::Error for MorphologyError {}
