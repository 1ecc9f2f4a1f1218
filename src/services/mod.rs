pub mod allocation;
pub mod audit;
pub mod backflush;
pub mod balances;
pub mod cycle_counts;
pub mod inventory_transactions;
pub mod ledger;
pub mod lots;
pub mod uom;

use serde::Serialize;

use crate::errors::ServiceError;

/// Result of one line of a batch operation. Lines are applied independently,
/// so a failure never undoes the lines before it.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LineOutcome<T> {
    Succeeded(T),
    Failed { kind: String, message: String },
}

impl<T> LineOutcome<T> {
    pub fn from_error(error: &ServiceError) -> Self {
        LineOutcome::Failed {
            kind: error.kind().to_string(),
            message: error.response_message(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LineOutcome::Succeeded(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            LineOutcome::Succeeded(value) => Some(value),
            LineOutcome::Failed { .. } => None,
        }
    }
}

impl<T> From<Result<T, ServiceError>> for LineOutcome<T> {
    fn from(result: Result<T, ServiceError>) -> Self {
        match result {
            Ok(value) => LineOutcome::Succeeded(value),
            Err(err) => LineOutcome::from_error(&err),
        }
    }
}

/// Per-line report of a batch operation, in input order.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchOutcome<T> {
    pub lines: Vec<LineOutcome<T>>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self { lines: Vec::new() }
    }
}

impl<T> BatchOutcome<T> {
    pub fn push(&mut self, result: Result<T, ServiceError>) {
        self.lines.push(result.into());
    }

    pub fn succeeded(&self) -> usize {
        self.lines.iter().filter(|line| line.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.lines.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_reports_each_line() {
        let mut batch = BatchOutcome::default();
        batch.push(Ok(1));
        batch.push(Err(ServiceError::MissingReasonCode("decrease".into())));
        batch.push(Ok(3));

        assert_eq!(batch.succeeded(), 2);
        assert_eq!(batch.failed(), 1);
        assert!(!batch.all_succeeded());
        assert_eq!(
            batch.lines[1],
            LineOutcome::Failed {
                kind: "missing_reason_code".into(),
                message: "Missing reason code: decrease".into(),
            }
        );
        assert_eq!(batch.lines[2].value(), Some(&3));
    }

    #[test]
    fn storage_failures_are_reported_without_internals() {
        let outcome: LineOutcome<()> =
            LineOutcome::from_error(&ServiceError::db_error("relation \"x\" does not exist"));
        assert_eq!(
            outcome,
            LineOutcome::Failed {
                kind: "database_error".into(),
                message: "Database error".into(),
            }
        );
    }
}
