//! JSON results on stdout, coded errors on stderr.

use keel_core::config::ConfigError;
use keel_core::{CatalogError, ErrorCode};
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};

/// A CLI-level failure that still carries a machine-readable code.
#[derive(Debug)]
pub struct CodedError {
    pub code: ErrorCode,
    pub detail: String,
}

impl CodedError {
    #[must_use]
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.message(), self.detail)
    }
}

impl std::error::Error for CodedError {}

/// Write `value` to stdout as pretty JSON.
pub fn render<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

/// The first coded error anywhere in the cause chain.
fn error_code(err: &anyhow::Error) -> Option<ErrorCode> {
    err.chain().find_map(|cause| {
        cause
            .downcast_ref::<CatalogError>()
            .map(CatalogError::code)
            .or_else(|| cause.downcast_ref::<ConfigError>().map(ConfigError::code))
            .or_else(|| cause.downcast_ref::<CodedError>().map(|e| e.code))
    })
}

fn format_error(err: &anyhow::Error) -> String {
    let mut text = match error_code(err) {
        Some(code) => format!("error[{code}]: {err:#}"),
        None => format!("error: {err:#}"),
    };
    if let Some(hint) = error_code(err).and_then(ErrorCode::hint) {
        text.push_str("\n  hint: ");
        text.push_str(hint);
    }
    text
}

/// Print `err` to stderr as `error[E####]: message` plus any hint.
pub fn render_error(err: &anyhow::Error) {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    // Nothing useful is left to do if stderr is gone.
    let _ = writeln!(out, "{}", format_error(err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::model::ItemKind;

    #[test]
    fn catalog_errors_carry_their_code() {
        let err = anyhow::Error::new(CatalogError::ItemNotFound {
            kind: ItemKind::Node,
            key: "orders".into(),
        });
        let text = format_error(&err);
        assert!(text.starts_with("error[E2001]: node item not found: orders"), "{text}");
    }

    #[test]
    fn context_keeps_the_inner_code() {
        let err = anyhow::Error::new(CodedError::new(ErrorCode::NotInitialized, "/tmp/x"))
            .context("opening catalog");
        let text = format_error(&err);
        assert!(text.starts_with("error[E1001]: opening catalog"), "{text}");
    }

    #[test]
    fn plain_errors_have_no_code() {
        let err = anyhow::anyhow!("something broke");
        assert_eq!(format_error(&err), "error: something broke");
    }
}
