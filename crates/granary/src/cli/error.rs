//! CLI errors with context and suggestions

use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    // === Common error constructors ===

    pub fn catalog_not_found(db_path: &Path) -> Self {
        Self::new("Catalog not found")
            .with_context(format!("Expected database at: {}", db_path.display()))
            .with_suggestion("TRY: granary ingest --root <DIR>   # Build the catalog first")
            .with_suggestion("TRY: Set database_path in the config file")
    }

    pub fn no_sources(config_path: &Path) -> Self {
        Self::new("Nothing to ingest")
            .with_context(format!(
                "No --root given and no [[sources]] in {}",
                config_path.display()
            ))
            .with_suggestion("TRY: granary ingest --root /data/modis --layout flat-legacy")
            .with_suggestion("TRY: granary init-config   # Then add [[sources]] entries")
    }

    pub fn root_not_found(root: &Path) -> Self {
        Self::new(format!("Not a directory: {}", root.display()))
            .with_suggestion(format!("TRY: Check that the path exists: ls -la {}", root.display()))
    }

    pub fn config_exists(path: &Path) -> Self {
        Self::new(format!("Config already exists: {}", path.display()))
            .with_suggestion("TRY: Pass --force to overwrite it")
    }

    pub fn invalid_config(path: &Path, reason: impl fmt::Display) -> Self {
        Self::new("Invalid configuration")
            .with_context(format!("{}: {}", path.display(), reason))
            .with_suggestion("TRY: granary init-config --force   # Regenerate the defaults")
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Render any command error for stderr.
pub fn render(err: &anyhow::Error) -> String {
    match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => helpful.to_string(),
        None => format!("ERROR: {:#}", err),
    }
}
