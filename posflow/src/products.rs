use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// A product code and how many units of it the batch adds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub code: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl Product {
    pub fn new(code: impl Into<String>, quantity: u32) -> Self {
        Self {
            code: code.into(),
            quantity,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProductListError {
    #[error("Product file not found: {0}")]
    NotFound(String),

    #[error("Failed to read product file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid quantity on line {line}: '{content}'")]
    InvalidQuantity { line: usize, content: String },
}

/// Parses `code[,quantity]` lines. Blank lines are ignored and a missing
/// quantity means one unit.
pub fn parse_product_list(text: &str) -> Result<Vec<Product>, ProductListError> {
    let mut products = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ',');
        let code = parts.next().unwrap_or_default().trim();
        if code.is_empty() {
            continue;
        }
        let quantity = match parts.next().map(str::trim) {
            None | Some("") => 1,
            Some(q) => q
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .parse::<u32>()
                .map_err(|_| ProductListError::InvalidQuantity {
                    line: index + 1,
                    content: line.to_string(),
                })?,
        };
        products.push(Product::new(code, quantity));
    }
    Ok(products)
}

pub fn load_product_file(path: impl AsRef<Path>) -> Result<Vec<Product>, ProductListError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ProductListError::NotFound(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)?;
    parse_product_list(&text)
}

/// Draws the products for one batch run.
///
/// `per_iteration` of 0, or at least the list length, selects every product
/// in list order; otherwise a random sample without repetition.
pub fn select_products(products: &[Product], per_iteration: usize) -> Vec<Product> {
    if per_iteration == 0 || per_iteration >= products.len() {
        return products.to_vec();
    }
    let mut rng = rand::thread_rng();
    products
        .choose_multiple(&mut rng, per_iteration)
        .cloned()
        .collect()
}
