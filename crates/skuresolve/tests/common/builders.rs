//! Builders for creating test data programmatically.

#![allow(dead_code)]

use skuresolve::config::{EngineConfig, RetryConfig};
use skuresolve::NewRow;

/// Builder for a submitted row.
pub struct RowBuilder {
    row: NewRow,
}

impl RowBuilder {
    pub fn new(sku: &str) -> Self {
        Self {
            row: NewRow {
                supplier_name: "Acme Medical Supply".to_string(),
                supplier_key: "acme".to_string(),
                sku: sku.to_string(),
                ndc_item_code: None,
                product_name: format!("Product {}", sku),
                brand_name: "Acme".to_string(),
            },
        }
    }

    pub fn supplier(mut self, name: &str, key: &str) -> Self {
        self.row.supplier_name = name.to_string();
        self.row.supplier_key = key.to_string();
        self
    }

    pub fn ndc(mut self, code: &str) -> Self {
        self.row.ndc_item_code = Some(code.to_string());
        self
    }

    pub fn brand(mut self, brand: &str) -> Self {
        self.row.brand_name = brand.to_string();
        self
    }

    pub fn build(self) -> NewRow {
        self.row
    }
}

/// Rows for the given SKUs with default identifying fields.
pub fn rows(skus: &[&str]) -> Vec<NewRow> {
    skus.iter().map(|sku| RowBuilder::new(sku).build()).collect()
}

/// `count` rows with SKUs `S0`, `S1`, ...
pub fn numbered_rows(count: usize) -> Vec<NewRow> {
    (0..count)
        .map(|i| RowBuilder::new(&format!("S{}", i)).build())
        .collect()
}

/// Builder for `EngineConfig` with fast retries suitable for tests.
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                worker_count: 2,
                retry: RetryConfig {
                    max_attempts: 3,
                    base_delay_ms: 1,
                    max_delay_ms: 4,
                },
                ..Default::default()
            },
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn row_concurrency(mut self, row_concurrency: usize) -> Self {
        self.config.row_concurrency = row_concurrency;
        self
    }

    pub fn max_rows_per_job(mut self, max_rows: usize) -> Self {
        self.config.max_rows_per_job = max_rows;
        self
    }

    pub fn lease_secs(mut self, lease_secs: u64) -> Self {
        self.config.lease_secs = lease_secs;
        self
    }

    pub fn retry_attempts(mut self, max_attempts: u32) -> Self {
        self.config.retry.max_attempts = max_attempts;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
