//! Domain-error catalog declarations.
//!
//! A service using `natsapi` reserves a contiguous range of JSON-RPC error
//! codes for its own domain errors and documents the exceptions that live in
//! that range so the generated AsyncAPI description can list them under
//! `errors`. The range is documentation only: nothing here enforces that a
//! reply's `code` actually falls inside `[lower_bound, upper_bound]`.

use thiserror::Error;

/// One documented domain error: the code and message a client will observe
/// on the wire when this error occurs.
#[derive(Debug, Clone, Copy)]
pub struct DomainErrorDef {
    pub code: i64,
    pub message: &'static str,
}

impl DomainErrorDef {
    pub const fn new(code: i64, message: &'static str) -> Self {
        Self { code, message }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("domain error range is invalid: lower_bound {lower} must be < upper_bound {upper}")]
    InvalidRange { lower: i64, upper: i64 },
}

/// `{ lower_bound, upper_bound, errors: [DomainErrorDef] }`.
#[derive(Debug, Clone)]
pub struct DomainErrorCatalog {
    lower_bound: i64,
    upper_bound: i64,
    errors: Vec<DomainErrorDef>,
}

impl DomainErrorCatalog {
    pub fn new(lower_bound: i64, upper_bound: i64) -> Result<Self, CatalogError> {
        if lower_bound >= upper_bound {
            return Err(CatalogError::InvalidRange {
                lower: lower_bound,
                upper: upper_bound,
            });
        }
        Ok(Self {
            lower_bound,
            upper_bound,
            errors: Vec::new(),
        })
    }

    pub fn with_error(mut self, def: DomainErrorDef) -> Self {
        self.errors.push(def);
        self
    }

    pub fn lower_bound(&self) -> i64 {
        self.lower_bound
    }

    pub fn upper_bound(&self) -> i64 {
        self.upper_bound
    }

    pub fn errors(&self) -> &[DomainErrorDef] {
        &self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_range() {
        let err = DomainErrorCatalog::new(-3000, -27000).unwrap_err();
        assert_eq!(
            err,
            CatalogError::InvalidRange {
                lower: -3000,
                upper: -27000
            }
        );
    }

    #[test]
    fn accumulates_declared_errors() {
        let catalog = DomainErrorCatalog::new(-27000, -3000)
            .unwrap()
            .with_error(DomainErrorDef::new(-27001, "BROKER_EXISTS"));
        assert_eq!(catalog.lower_bound(), -27000);
        assert_eq!(catalog.upper_bound(), -3000);
        assert_eq!(catalog.errors().len(), 1);
        assert_eq!(catalog.errors()[0].code, -27001);
        assert_eq!(catalog.errors()[0].message, "BROKER_EXISTS");
    }
}
