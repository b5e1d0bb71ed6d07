use metagraph_store::StoreError;
use thiserror::Error;

use crate::request::Operator;
use crate::taxonomy::AttributeType;

/// A request that cannot be executed as written. Surfaces to callers as a
/// bad request; nothing is read from the graph before these are raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0}: Unknown/invalid type")]
    UnknownType(String),

    #[error("{0}: Unknown/invalid classification")]
    UnknownClassification(String),

    #[error("{attribute}: Unknown/invalid attribute for type {type_name}")]
    UnknownAttribute { type_name: String, attribute: String },

    #[error("{attribute}: Unknown/invalid attribute for classification {classification}")]
    UnknownClassificationAttribute {
        classification: String,
        attribute: String,
    },

    #[error("{attribute}: attribute of type {type_name} is redeclared with another type by a subtype")]
    RetypedAttribute { type_name: String, attribute: String },

    #[error("tag filters need a concrete classification, got {0:?}")]
    TagFiltersWithoutClassification(Option<String>),

    #[error("{attribute}: operator {operator} does not apply to {attr_type} attributes")]
    UnsupportedOperator {
        attribute: String,
        operator: Operator,
        attr_type: AttributeType,
    },

    #[error("{attribute}: operator {operator} needs a value")]
    MissingOperand { attribute: String, operator: Operator },

    #[error("{attribute}: {value:?} is not a valid {attr_type} value")]
    InvalidOperand {
        attribute: String,
        attr_type: AttributeType,
        value: String,
    },

    #[error("invalid limit {0}: must be >= 0")]
    NegativeLimit(i64),

    #[error("invalid offset {0}: must be >= 0")]
    NegativeOffset(i64),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    BadRequest(#[from] ValidationError),

    #[error("search failed: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl SearchError {
    pub fn is_bad_request(&self) -> bool {
        matches!(self, SearchError::BadRequest(_))
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
