use std::fmt::Display;

use tracing::warn;

/// Collects failures of side effects that must never abort an install
/// (script permissions, host registration).
///
/// Each failure is logged at `warn` and kept so it can be shown in the
/// install report.
#[derive(Debug, Default)]
pub struct NonCritical {
    warnings: Vec<String>,
}

impl NonCritical {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwrap `result`, or record the error under `effect` and return `None`.
    pub fn run<T, E: Display>(&mut self, effect: &str, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(effect, error = %e, "non-critical step failed");
                self.warnings.push(format!("{effect}: {e}"));
                None
            },
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.warnings.push(message);
    }

    /// Take over warnings already logged elsewhere.
    pub fn merge(&mut self, other: NonCritical) {
        self.warnings.extend(other.warnings);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<String> {
        self.warnings
    }
}
