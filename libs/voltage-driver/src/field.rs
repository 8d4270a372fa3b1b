//! Parsed field addresses
//!
//! Each driver parses address strings into its own field type. The engine
//! only sees them through [`PlcField`]; driver state machines downcast back
//! to the concrete type.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use errors::{PlcError, Result};

use crate::value::PlcValueType;

/// A validated, driver-specific address
pub trait PlcField: fmt::Debug + Send + Sync {
    /// Address text as given by the caller
    fn address(&self) -> &str;

    /// Element type of the field
    fn value_type(&self) -> PlcValueType;

    /// Number of elements addressed
    fn quantity(&self) -> usize {
        1
    }

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a parsed field
pub type FieldRef = Arc<dyn PlcField>;

/// Downcast a field to the driver's concrete type
pub fn downcast_field<T: 'static>(field: &dyn PlcField) -> Result<&T> {
    field.as_any().downcast_ref::<T>().ok_or_else(|| {
        PlcError::internal(format!(
            "Field '{}' was not created by this driver",
            field.address()
        ))
    })
}
