//! Composite index definitions.
//!
//! A definition is a comma-separated, ordered list of field names
//! (`"email,password"`). Its key for a record is the record's values for
//! those fields, in order, joined by `_`, and it exists only when the record
//! carries every one of them.

use keel_core::{value_token, FieldValues, IndexError, KeelResult, KEY_SEPARATOR};

/// One parsed composite index definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeIndex {
    definition: String,
    fields: Vec<String>,
}

impl CompositeIndex {
    /// Parse `"a,b,c"`, rejecting definitions over `max_fields` long.
    pub fn parse(definition: &str, max_fields: usize) -> KeelResult<Self> {
        let fields: Vec<String> = definition
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();

        if fields.is_empty() {
            return Err(IndexError::EmptyDefinition {
                definition: definition.to_string(),
            }
            .into());
        }
        if fields.len() > max_fields {
            return Err(IndexError::TooManyCompositeFields {
                definition: definition.to_string(),
                count: fields.len(),
                max: max_fields,
            }
            .into());
        }

        Ok(Self {
            definition: definition.to_string(),
            fields,
        })
    }

    /// The definition as declared.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// `_`-joined values of this index's fields, or `None` when the record
    /// lacks any of them.
    pub fn values_key(&self, values: &FieldValues) -> Option<String> {
        let parts = self
            .fields
            .iter()
            .map(|field| values.get(field).map(value_token))
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join(KEY_SEPARATOR))
    }
}

/// Parse every definition declared for an entity.
///
/// The definition count is checked before any definition is parsed, so an
/// over-long list fails with `TooManyIndexes` regardless of its contents.
pub fn parse_definitions<D: AsRef<str>>(
    definitions: &[D],
    max_indexes: usize,
    max_fields: usize,
) -> KeelResult<Vec<CompositeIndex>> {
    if definitions.len() > max_indexes {
        return Err(IndexError::TooManyIndexes {
            count: definitions.len(),
            max: max_indexes,
        }
        .into());
    }
    definitions
        .iter()
        .map(|d| CompositeIndex::parse(d.as_ref(), max_fields))
        .collect()
}
