use super::{MetaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Hybrid timestamp: physical milliseconds in the high bits, logical counter
/// in the low bits. See [`crate::tso::compose_ts`].
pub type Timestamp = u64;

/// Identifier handed out by [`crate::tso::IdAllocator`].
pub type UniqueId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
    VectorBinary,
    VectorFloat,
}

impl DataType {
    pub fn is_vector(&self) -> bool {
        matches!(self, DataType::VectorBinary | DataType::VectorFloat)
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bool" => Ok(DataType::Bool),
            "int8" => Ok(DataType::Int8),
            "int16" => Ok(DataType::Int16),
            "int32" => Ok(DataType::Int32),
            "int64" => Ok(DataType::Int64),
            "float" => Ok(DataType::Float),
            "double" => Ok(DataType::Double),
            "string" => Ok(DataType::String),
            "vector_binary" => Ok(DataType::VectorBinary),
            "vector_float" => Ok(DataType::VectorFloat),
            other => Err(MetaError::InvalidArgument(format!(
                "unknown data type '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::VectorBinary => "vector_binary",
            DataType::VectorFloat => "vector_float",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub data_type: DataType,
    pub is_primary_key: bool,
    /// Free-form type parameters, e.g. `("dim", "128")` for vectors.
    pub type_params: Vec<(String, String)>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_primary_key: false,
            type_params: Vec::new(),
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.type_params.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub description: String,
    pub auto_id: bool,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            auto_id: true,
            fields,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("collection name", &self.name)?;

        let mut seen = HashSet::new();
        for field in &self.fields {
            validate_name("field name", &field.name)?;
            if !seen.insert(field.name.as_str()) {
                return Err(MetaError::InvalidArgument(format!(
                    "duplicate field '{}' in collection '{}'",
                    field.name, self.name
                )));
            }
        }

        if self.fields.iter().filter(|f| f.is_primary_key).count() > 1 {
            return Err(MetaError::InvalidArgument(format!(
                "collection '{}' declares more than one primary key",
                self.name
            )));
        }

        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Rejects empty or whitespace-padded names.
pub fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MetaError::InvalidArgument(format!("{} must not be empty", what)));
    }
    if name.trim() != name {
        return Err(MetaError::InvalidArgument(format!(
            "{} '{}' must not have leading or trailing whitespace",
            what, name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: UniqueId,
    pub schema: CollectionSchema,
    pub create_time: Timestamp,
}

impl CollectionRecord {
    pub fn name(&self) -> &str {
        &self.schema.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub id: UniqueId,
    pub collection_id: UniqueId,
    pub collection_name: String,
    pub tag: String,
    pub create_time: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs_schema() -> CollectionSchema {
        CollectionSchema::new(
            "docs",
            vec![
                FieldSchema::new("id", DataType::Int64).primary_key(),
                FieldSchema::new("embedding", DataType::VectorFloat).with_param("dim", "128"),
            ],
        )
    }

    #[test]
    fn test_schema_validate_ok() {
        assert!(docs_schema().validate().is_ok());
    }

    #[test]
    fn test_schema_rejects_duplicate_fields() {
        let mut schema = docs_schema();
        schema.fields.push(FieldSchema::new("id", DataType::Int32));
        assert!(matches!(schema.validate(), Err(MetaError::InvalidArgument(_))));
    }

    #[test]
    fn test_schema_rejects_blank_name() {
        let schema = CollectionSchema::new("  ", vec![]);
        assert!(matches!(schema.validate(), Err(MetaError::InvalidArgument(_))));
    }

    #[test]
    fn test_schema_encode_decode() {
        let schema = docs_schema().description("documents");
        let bytes = schema.encode().unwrap();
        assert_eq!(CollectionSchema::decode(&bytes).unwrap(), schema);
        assert!(CollectionSchema::decode(&[0xc1]).is_err());
    }

    #[test]
    fn test_data_type_parse() {
        assert_eq!(DataType::parse("VECTOR_FLOAT").unwrap(), DataType::VectorFloat);
        assert!(DataType::parse("blob").is_err());
        assert!(DataType::VectorBinary.is_vector());
    }
}
