//! Neo4j status codes for query failures

use crate::query::{ExecutionError, PlanError, QueryError};
use crate::storage::StorageErrorKind;
use serde::Serialize;

pub const SYNTAX_ERROR: &str = "Neo.ClientError.Statement.SyntaxError";
pub const PARAMETER_MISSING: &str = "Neo.ClientError.Statement.ParameterMissing";
pub const SEMANTIC_ERROR: &str = "Neo.ClientError.Statement.SemanticError";
pub const TYPE_ERROR: &str = "Neo.ClientError.Statement.TypeError";
pub const ARITHMETIC_ERROR: &str = "Neo.ClientError.Statement.ArithmeticError";
pub const ENTITY_NOT_FOUND: &str = "Neo.ClientError.Statement.EntityNotFound";
pub const CONSTRAINT_VALIDATION_FAILED: &str = "Neo.ClientError.Schema.ConstraintValidationFailed";
pub const TRANSACTION_TIMED_OUT: &str = "Neo.ClientError.Transaction.TransactionTimedOut";
pub const TERMINATED: &str = "Neo.ClientError.Transaction.Terminated";
pub const UNKNOWN_ERROR: &str = "Neo.DatabaseError.General.UnknownError";

/// An entry of a transaction response's `errors` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neo4jError {
    pub code: &'static str,
    pub message: String,
}

impl Neo4jError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Client errors are the caller's fault; everything else is ours
    pub fn is_client_error(&self) -> bool {
        self.code.starts_with("Neo.ClientError")
    }
}

fn code_for(err: &QueryError) -> &'static str {
    match err {
        QueryError::Parse(_) => SYNTAX_ERROR,
        QueryError::Plan(PlanError::UndefinedVariable(_) | PlanError::UnknownFunction(_)) => SYNTAX_ERROR,
        QueryError::Plan(PlanError::MissingParameter(_)) => PARAMETER_MISSING,
        QueryError::Plan(PlanError::Semantic(_)) => SEMANTIC_ERROR,
        QueryError::Storage(e) => match e.kind() {
            StorageErrorKind::NotFound => ENTITY_NOT_FOUND,
            StorageErrorKind::ConstraintViolation => CONSTRAINT_VALIDATION_FAILED,
            StorageErrorKind::InvalidArgument => TYPE_ERROR,
            StorageErrorKind::Backend => UNKNOWN_ERROR,
        },
        QueryError::Execution(e) => match e {
            ExecutionError::TypeError(_) | ExecutionError::InvalidProperty(_) => TYPE_ERROR,
            ExecutionError::Arithmetic(_) => ARITHMETIC_ERROR,
            ExecutionError::InvalidArgument(_) | ExecutionError::Runtime(_) => SEMANTIC_ERROR,
            ExecutionError::Timeout => TRANSACTION_TIMED_OUT,
            ExecutionError::Cancelled => TERMINATED,
            // QueryError::from lifts these into QueryError::Storage
            ExecutionError::Storage(_) => UNKNOWN_ERROR,
        },
    }
}

impl From<&QueryError> for Neo4jError {
    fn from(err: &QueryError) -> Self {
        Neo4jError::new(code_for(err), err.to_string())
    }
}

impl From<QueryError> for Neo4jError {
    fn from(err: QueryError) -> Self {
        Neo4jError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Params, QueryEngine};

    fn code(engine: &QueryEngine, query: &str) -> &'static str {
        Neo4jError::from(engine.execute(query, &Params::new()).unwrap_err()).code
    }

    #[test]
    fn test_error_codes() {
        let engine = QueryEngine::in_memory();
        assert_eq!(code(&engine, "MATCH (n RETURN n"), SYNTAX_ERROR);
        assert_eq!(code(&engine, "MATCH (n) RETURN x"), SYNTAX_ERROR);
        assert_eq!(code(&engine, "RETURN nosuchfn(1)"), SYNTAX_ERROR);
        assert_eq!(code(&engine, "RETURN $p"), PARAMETER_MISSING);
        assert_eq!(code(&engine, "RETURN 1 + 'a' * 2"), TYPE_ERROR);
        assert_eq!(code(&engine, "RETURN 5 % 0"), ARITHMETIC_ERROR);

        engine.execute("CREATE (:A)-[:R]->(:B)", &Params::new()).unwrap();
        assert_eq!(code(&engine, "MATCH (a:A) DELETE a"), CONSTRAINT_VALIDATION_FAILED);
    }

    #[test]
    fn test_client_error_classification() {
        assert!(Neo4jError::new(SYNTAX_ERROR, "x").is_client_error());
        assert!(!Neo4jError::new(UNKNOWN_ERROR, "x").is_client_error());
    }
}
