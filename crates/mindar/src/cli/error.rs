//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
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

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// Input file does not exist
    pub fn file_not_found(path: &Path) -> Self {
        Self::new(format!("File not found: {}", path.display()))
            .with_context("The specified file does not exist")
            .with_suggestions([
                format!("TRY: Check if the file exists: ls -la {}", path.display()),
                format!(
                    "TRY: Look for similar files: ls {}",
                    path.parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| ".".to_string())
                ),
            ])
    }

    /// YAML input could not be parsed
    pub fn yaml_parse_error(path: &Path, expected: &str, details: &str) -> Self {
        Self::new(format!("YAML parse error: {}", details))
            .with_context(format!("Failed to parse {}", path.display()))
            .with_suggestions([
                format!("TRY: The file must contain {}", expected),
                format!("TRY: Inspect the file: head {}", path.display()),
            ])
    }

    /// Database file cannot be opened or created
    pub fn database_unavailable(path: &Path, details: &str) -> Self {
        Self::new("Failed to open database")
            .with_context(format!("Database: {}", path.display()))
            .with_suggestions([
                format!("Error: {}", details),
                "TRY: Check file permissions".to_string(),
                "TRY: Set [database] path in ~/.mindar/config.toml or MINDAR_DATABASE".to_string(),
            ])
    }

    /// Object store cannot be reached or is misconfigured
    pub fn storage_unavailable(details: &str) -> Self {
        Self::new("Failed to connect to object storage")
            .with_context(details.to_string())
            .with_suggestions([
                "TRY: Check [storage] in ~/.mindar/config.toml (mindar config)".to_string(),
                "TRY: Verify the credentials CSV has Access Key Id and Secret Access Key columns"
                    .to_string(),
            ])
    }

    /// A batch finished with failed items
    pub fn batch_failed(what: &str, failed: usize, total: usize) -> Self {
        Self::new(format!("{} of {} {} failed", failed, total, what))
            .with_context("Each failure is logged above and in ~/.mindar/logs")
            .with_suggestion("TRY: Rerun the command; completed items are skipped")
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

/// Print an error as a JSON object on stdout (for `--json` commands).
pub fn print_json_error(err: &anyhow::Error) {
    let payload = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "error": {
                "message": helpful.message,
                "context": helpful.context,
                "suggestions": helpful.suggestions,
            }
        }),
        None => serde_json::json!({
            "error": {
                "message": format!("{:#}", err),
                "context": null,
                "suggestions": [],
            }
        }),
    };
    match serde_json::to_string_pretty(&payload) {
        Ok(text) => println!("{}", text),
        Err(_) => eprintln!("{:?}", err),
    }
}
