use std::fmt;

use super::StoreError;
use crate::extraction::ElementType;

/// Metadata columns that may appear in a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    DocumentId,
    PageNumber,
    ElementType,
    ElementId,
}

impl FilterField {
    #[inline]
    pub fn column(self) -> &'static str {
        match self {
            FilterField::DocumentId => "document_id",
            FilterField::PageNumber => "page_number",
            FilterField::ElementType => "element_type",
            FilterField::ElementId => "element_id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Text(String),
    Integer(u32),
}

impl fmt::Display for FilterValue {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Text(text) => write!(f, "'{}'", text.replace('\'', "''")),
            FilterValue::Integer(value) => write!(f, "{}", value),
        }
    }
}

/// Exact-match conjunction over element metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    clauses: Vec<(FilterField, FilterValue)>,
}

impl MetadataFilter {
    #[inline]
    pub fn document(document_id: &str) -> Self {
        Self::default().and_document(document_id)
    }

    #[inline]
    pub fn element(element_id: &str) -> Self {
        Self::default().and_element(element_id)
    }

    #[inline]
    #[must_use]
    pub fn and_document(self, document_id: &str) -> Self {
        self.with(
            FilterField::DocumentId,
            FilterValue::Text(document_id.to_string()),
        )
    }

    #[inline]
    #[must_use]
    pub fn and_page(self, page_number: u32) -> Self {
        self.with(FilterField::PageNumber, FilterValue::Integer(page_number))
    }

    #[inline]
    #[must_use]
    pub fn and_element_type(self, element_type: ElementType) -> Self {
        self.with(
            FilterField::ElementType,
            FilterValue::Text(element_type.as_str().to_string()),
        )
    }

    #[inline]
    #[must_use]
    pub fn and_element(self, element_id: &str) -> Self {
        self.with(
            FilterField::ElementId,
            FilterValue::Text(element_id.to_string()),
        )
    }

    fn with(mut self, field: FilterField, value: FilterValue) -> Self {
        self.clauses.push((field, value));
        self
    }

    #[inline]
    pub fn clauses(&self) -> &[(FilterField, FilterValue)] {
        &self.clauses
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Reject filters that would match everything or carry impossible values
    #[inline]
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.clauses.is_empty() {
            return Err(StoreError::Rejected(
                "metadata filter must contain at least one clause".to_string(),
            ));
        }

        for (field, value) in &self.clauses {
            match (field, value) {
                (FilterField::PageNumber, FilterValue::Integer(0)) => {
                    return Err(StoreError::Rejected(
                        "page_number filter must be at least 1".to_string(),
                    ));
                }
                (FilterField::PageNumber, FilterValue::Text(_)) => {
                    return Err(StoreError::Rejected(
                        "page_number filter must be an integer".to_string(),
                    ));
                }
                (_, FilterValue::Integer(_)) if *field != FilterField::PageNumber => {
                    return Err(StoreError::Rejected(format!(
                        "{} filter must be text",
                        field.column()
                    )));
                }
                (_, FilterValue::Text(text)) if text.trim().is_empty() => {
                    return Err(StoreError::Rejected(format!(
                        "{} filter must not be empty",
                        field.column()
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Validate and render as a SQL predicate for LanceDB
    #[inline]
    pub fn to_predicate(&self) -> Result<String, StoreError> {
        self.validate()?;
        Ok(self
            .clauses
            .iter()
            .map(|(field, value)| format!("{} = {}", field.column(), value))
            .collect::<Vec<_>>()
            .join(" AND "))
    }

    /// Evaluate the filter against stored metadata
    #[inline]
    pub fn matches(&self, metadata: &super::ElementMetadata) -> bool {
        self.clauses.iter().all(|(field, value)| match (field, value) {
            (FilterField::DocumentId, FilterValue::Text(v)) => metadata.document_id == *v,
            (FilterField::ElementId, FilterValue::Text(v)) => metadata.element_id == *v,
            (FilterField::ElementType, FilterValue::Text(v)) => {
                metadata.element_type.as_str() == v
            }
            (FilterField::PageNumber, FilterValue::Integer(v)) => metadata.page_number == *v,
            _ => false,
        })
    }
}
