//! Source file to table mappings.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern"));

/// One CSV file in a batch folder and the logical table it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableMapping {
    /// File name inside the batch folder.
    pub file: String,
    /// Logical table name, used for staging and destination tables.
    pub table: String,
}

impl TableMapping {
    pub fn new(file: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            table: table.into(),
        }
    }
}

/// The nine files of the Olist public dataset.
pub fn default_tables() -> Vec<TableMapping> {
    [
        ("olist_customers_dataset.csv", "customers"),
        ("olist_geolocation_dataset.csv", "geolocation"),
        ("olist_order_items_dataset.csv", "order_items"),
        ("olist_order_payments_dataset.csv", "order_payments"),
        ("olist_order_reviews_dataset.csv", "order_reviews"),
        ("olist_orders_dataset.csv", "orders"),
        ("olist_products_dataset.csv", "products"),
        ("olist_sellers_dataset.csv", "sellers"),
        (
            "product_category_name_translation.csv",
            "product_category_name_translation",
        ),
    ]
    .into_iter()
    .map(|(file, table)| TableMapping::new(file, table))
    .collect()
}

/// Whether `name` can be used unquoted as a dataset or table identifier.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Check a mapping list, returning one message per problem.
pub fn validate_tables(tables: &[TableMapping]) -> Vec<String> {
    let mut errors = Vec::new();
    if tables.is_empty() {
        errors.push("tables must not be empty".to_string());
    }

    let mut files = HashSet::new();
    let mut names = HashSet::new();
    for mapping in tables {
        if mapping.file.trim().is_empty() {
            errors.push(format!("table '{}' has an empty file name", mapping.table));
        } else if mapping.file.contains('/') {
            errors.push(format!("file '{}' must not contain '/'", mapping.file));
        }
        if !is_identifier(&mapping.table) {
            errors.push(format!("'{}' is not a valid table name", mapping.table));
        }
        if !files.insert(mapping.file.as_str()) {
            errors.push(format!("file '{}' is mapped more than once", mapping.file));
        }
        if !names.insert(mapping.table.as_str()) {
            errors.push(format!("table '{}' is mapped more than once", mapping.table));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables() {
        let tables = default_tables();
        assert_eq!(tables.len(), 9);
        assert_eq!(tables[5], TableMapping::new("olist_orders_dataset.csv", "orders"));
        assert!(validate_tables(&tables).is_empty());
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("order_items"));
        assert!(is_identifier("_tmp1"));
        assert!(!is_identifier("1orders"));
        assert!(!is_identifier("order-items"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_validate_duplicates_and_names() {
        let tables = vec![
            TableMapping::new("a.csv", "orders"),
            TableMapping::new("a.csv", "orders"),
            TableMapping::new("", "bad-name"),
        ];
        let errors = validate_tables(&tables);
        assert!(errors.iter().any(|e| e.contains("file 'a.csv' is mapped more than once")));
        assert!(errors.iter().any(|e| e.contains("table 'orders' is mapped more than once")));
        assert!(errors.iter().any(|e| e.contains("empty file name")));
        assert!(errors.iter().any(|e| e.contains("'bad-name' is not a valid table name")));
    }

    #[test]
    fn test_validate_empty() {
        assert_eq!(validate_tables(&[]), vec!["tables must not be empty"]);
    }
}
