//! Shared primitive types used across the flag pipeline.

use crate::error::{FlagError, FlagResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable customer identifier, opaque to the pipeline.
pub type CustomerId = String;

/// The canonical run identifier.
pub type RunId = String;

/// A product tag such as `a` or `card_x`.
///
/// Tags end up inside column names (`sum_<p>`, `count_<p>`, `flag_<p>`),
/// so only lowercase ASCII letters, digits and underscores are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Product(String);

impl Product {
    pub fn parse(tag: &str) -> FlagResult<Self> {
        let valid = !tag.is_empty()
            && tag
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(FlagError::InvalidProduct { tag: tag.to_string() });
        }
        Ok(Self(tag.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn sum_column(&self) -> String {
        format!("sum_{}", self.0)
    }

    pub fn count_column(&self) -> String {
        format!("count_{}", self.0)
    }

    pub fn flag_column(&self) -> String {
        format!("flag_{}", self.0)
    }

    /// The standard ten-product layout, `a` through `j`.
    pub fn default_set() -> Vec<Product> {
        ('a'..='j').map(|c| Product(c.to_string())).collect()
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Product {
    type Error = FlagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Product::parse(&value)
    }
}

impl From<Product> for String {
    fn from(product: Product) -> Self {
        product.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_follow_product_tag() {
        let p = Product::parse("c").unwrap();
        assert_eq!(p.sum_column(), "sum_c");
        assert_eq!(p.count_column(), "count_c");
        assert_eq!(p.flag_column(), "flag_c");
    }

    #[test]
    fn rejects_tags_unsafe_for_column_names() {
        assert!(Product::parse("").is_err());
        assert!(Product::parse("A").is_err());
        assert!(Product::parse("a\"; drop").is_err());
        assert!(Product::parse("card_2").is_ok());
    }

    #[test]
    fn default_set_is_a_through_j() {
        let tags: Vec<String> = Product::default_set().into_iter().map(String::from).collect();
        assert_eq!(tags.len(), 10);
        assert_eq!(tags.first().map(String::as_str), Some("a"));
        assert_eq!(tags.last().map(String::as_str), Some("j"));
    }
}
