//! Bidirectional value conversion between a value's semantic type and a
//! requested representation.
//!
//! Dispatch is a matrix: the semantic type of the input selects one converter,
//! and the converter decides which requested [`ValueType`]s it can produce.
//! The same matrix serves writes (canonical value → storage representation) and
//! reads (stored value → the type the caller asked for).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

mod converters;

pub use converters::{
    BooleanConverter, BytesConverter, DateConverter, JsonConverter, NumericConverter,
    TextConverter, TimestampConverter,
};

use crate::error::SqlEngineError;
use crate::types::RowValues;

/// Canonical semantic category of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Numeric,
    Boolean,
    Text,
    Bytes,
    Date,
    Timestamp,
    Json,
}

impl SemanticType {
    /// Semantic category of a value, `None` for NULL.
    #[must_use]
    pub fn of(value: &RowValues) -> Option<Self> {
        match value {
            RowValues::Int(_) | RowValues::Float(_) => Some(SemanticType::Numeric),
            RowValues::Bool(_) => Some(SemanticType::Boolean),
            RowValues::Text(_) => Some(SemanticType::Text),
            RowValues::Blob(_) => Some(SemanticType::Bytes),
            RowValues::Date(_) => Some(SemanticType::Date),
            RowValues::Timestamp(_) => Some(SemanticType::Timestamp),
            RowValues::JSON(_) => Some(SemanticType::Json),
            RowValues::Null => None,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Requested representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Integer,
    Float,
    Text,
    Boolean,
    Bytes,
    Date,
    Timestamp,
    Json,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Converter for one semantic type.
pub trait AttributeConverter: Send + Sync {
    fn semantic_type(&self) -> SemanticType;

    fn supports(&self, target: ValueType) -> bool;

    /// Convert `value` (of this converter's semantic type) to `target`.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::UnsupportedConversion`] when the value cannot be
    /// represented as `target`.
    fn convert(&self, value: &RowValues, target: ValueType) -> Result<RowValues, SqlEngineError>;
}

pub(crate) fn unsupported(value: &RowValues, target: ValueType) -> SqlEngineError {
    let from = SemanticType::of(value).map_or_else(|| "Null".to_string(), |t| t.to_string());
    SqlEngineError::UnsupportedConversion {
        from,
        to: target.to_string(),
    }
}

/// Registry holding one converter per semantic type.
#[derive(Clone)]
pub struct AttributeConverterRegistry {
    converters: HashMap<SemanticType, Arc<dyn AttributeConverter>>,
}

impl fmt::Debug for AttributeConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.converters.keys().map(ToString::to_string).collect();
        types.sort();
        f.debug_struct("AttributeConverterRegistry")
            .field("semantic_types", &types)
            .finish()
    }
}

impl Default for AttributeConverterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl AttributeConverterRegistry {
    /// Registry with no converters; every conversion except NULL passthrough fails.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// Registry with the built-in converter for every semantic type.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry
            .register(Arc::new(NumericConverter))
            .register(Arc::new(BooleanConverter))
            .register(Arc::new(TextConverter))
            .register(Arc::new(BytesConverter))
            .register(Arc::new(DateConverter))
            .register(Arc::new(TimestampConverter))
            .register(Arc::new(JsonConverter));
        registry
    }

    /// Install `converter`, replacing any converter for the same semantic type.
    pub fn register(&mut self, converter: Arc<dyn AttributeConverter>) -> &mut Self {
        self.converters.insert(converter.semantic_type(), converter);
        self
    }

    #[must_use]
    pub fn supports(&self, semantic: SemanticType, target: ValueType) -> bool {
        self.converters
            .get(&semantic)
            .is_some_and(|c| c.supports(target))
    }

    /// Convert through the matrix. NULL converts to NULL for every target.
    ///
    /// # Errors
    /// Returns [`SqlEngineError::UnsupportedConversion`] for pairs with no converter
    /// and for values the converter cannot represent.
    pub fn convert(
        &self,
        value: &RowValues,
        target: ValueType,
    ) -> Result<RowValues, SqlEngineError> {
        let Some(semantic) = SemanticType::of(value) else {
            return Ok(RowValues::Null);
        };
        match self.converters.get(&semantic) {
            Some(converter) if converter.supports(target) => converter.convert(value, target),
            _ => Err(unsupported(value, target)),
        }
    }
}
