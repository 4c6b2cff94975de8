//! Raw kernel attributes as supplied at kernel creation.

use crate::{Error, Result};
use std::collections::HashMap;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    String(String),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

/// Named attributes of one graph node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: HashMap<String, AttributeValue>,
}

impl Attributes {
    /// Create an empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Insert or replace an attribute.
    pub fn insert(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.values.insert(key.into(), value);
    }

    /// Get an attribute by name.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    /// Check if an attribute exists.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get an i64 attribute.
    pub fn i64(&self, key: &str) -> Result<i64> {
        match self.get(key) {
            Some(AttributeValue::Int(v)) => Ok(*v),
            Some(_) => Err(Error::Attribute(format!("Attribute {key} is not an i64"))),
            None => Err(Error::Attribute(format!("Missing attribute: {key}"))),
        }
    }

    /// Get an f32 attribute.
    pub fn f32(&self, key: &str) -> Result<f32> {
        match self.get(key) {
            Some(AttributeValue::Float(v)) => Ok(*v),
            Some(_) => Err(Error::Attribute(format!("Attribute {key} is not an f32"))),
            None => Err(Error::Attribute(format!("Missing attribute: {key}"))),
        }
    }

    /// Get a string attribute.
    pub fn string(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(AttributeValue::String(v)) => Ok(v.as_str()),
            Some(_) => Err(Error::Attribute(format!("Attribute {key} is not a string"))),
            None => Err(Error::Attribute(format!("Missing attribute: {key}"))),
        }
    }

    /// Get an i64 array attribute.
    pub fn ints(&self, key: &str) -> Result<&[i64]> {
        match self.get(key) {
            Some(AttributeValue::Ints(v)) => Ok(v.as_slice()),
            Some(_) => Err(Error::Attribute(format!(
                "Attribute {key} is not an i64 array"
            ))),
            None => Err(Error::Attribute(format!("Missing attribute: {key}"))),
        }
    }

    /// Get an optional i64 attribute with a default value.
    ///
    /// A present attribute of the wrong type is still an error.
    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64> {
        if self.contains(key) {
            self.i64(key)
        } else {
            Ok(default)
        }
    }

    /// Get an optional f32 attribute with a default value.
    pub fn f32_or(&self, key: &str, default: f32) -> Result<f32> {
        if self.contains(key) {
            self.f32(key)
        } else {
            Ok(default)
        }
    }
}

impl FromIterator<(String, AttributeValue)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
