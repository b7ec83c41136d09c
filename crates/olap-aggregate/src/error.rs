#![forbid(unsafe_code)]

use crate::types::ColumnType;
use olap_sketch::SketchError;

pub type AggResult<T> = Result<T, AggError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggError {
    /// The memory budget or the allocator refused a request. The caller may retry the whole
    /// query with a different plan; the table that raised it is left unusable.
    #[error("insufficient resources: {what} needs {requested} bytes, {available} of {limit} bytes available")]
    InsufficientResources {
        what: &'static str,
        requested: usize,
        available: usize,
        limit: usize,
    },

    #[error("overflow in {target}: accumulated value does not fit {width_bytes}-byte slot")]
    Overflow { target: String, width_bytes: usize },

    #[error("{aggregate} is not supported on {column} of type {column_type}")]
    UnsupportedType {
        aggregate: &'static str,
        column: String,
        column_type: ColumnType,
    },

    #[error("unknown column index {index} (input has {columns} columns)")]
    UnknownColumn { index: usize, columns: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("value {value} of {column} lies outside the declared range [{min}, {max}]")]
    ValueOutOfRange {
        column: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("arity mismatch for {what}: expected {expected} values, got {actual}")]
    ArityMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("partition was built for a different aggregate layout")]
    LayoutMismatch,

    #[error("query was cancelled")]
    Cancelled,

    #[error("accumulator error: {0}")]
    Sketch(SketchError),
}

impl AggError {
    /// Memory budget or allocation failures.
    pub fn is_resource_error(&self) -> bool {
        matches!(self, AggError::InsufficientResources { .. })
    }

    /// Errors detected while building the layout, before any row is processed.
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            AggError::UnsupportedType { .. }
                | AggError::UnknownColumn { .. }
                | AggError::InvalidArgument(_)
        )
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, AggError::Overflow { .. })
    }
}

impl From<SketchError> for AggError {
    fn from(err: SketchError) -> Self {
        match err {
            SketchError::Allocation { what, bytes } => AggError::InsufficientResources {
                what,
                requested: bytes,
                available: 0,
                limit: 0,
            },
            other => AggError::Sketch(other),
        }
    }
}
