//! The seam to the external lexer and parser.
//!
//! The core never reads source syntax itself: the driver injects a
//! [`Frontend`] and the import resolver calls it once per newly discovered
//! file. The parsed-file table guarantees each path is parsed at most once.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::ast::Statement;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },
}

/// An external lexer+parser pair. Returns the top-level statements of the
/// file at `path`.
pub trait Frontend {
    fn parse_file(&self, path: &Path) -> Result<Vec<Rc<Statement>>, FrontendError>;
}
