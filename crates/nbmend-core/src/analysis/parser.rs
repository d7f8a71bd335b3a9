//! Python parsing wrapper used by the scope analysis pass.

use tree_sitter::Tree;

use crate::errors::{Error, Result};

/// Parse Python source into a syntax tree. A tree containing syntax errors is
/// rejected: scope analysis over a broken tree would silently misattribute
/// definitions and uses.
pub fn parse(source: &str) -> Result<Tree> {
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| Error::Parse(format!("failed to load python grammar: {e}")))?;

    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| Error::Parse("parser returned no tree".to_string()))?;

    if tree.root_node().has_error() {
        return Err(Error::Parse("source contains syntax errors".to_string()));
    }
    Ok(tree)
}

/// Whether the source parses without syntax errors.
pub fn parses_cleanly(source: &str) -> bool {
    parse(source).is_ok()
}
