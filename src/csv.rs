use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::ledger::UsageStatistics;
use crate::model::{DiscountRule, DiscountType, ProductId, RedemptionRequest, RuleDefinition};

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open '{path}': {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: invalid {field}: {message}")]
    InvalidField {
        line: usize,
        field: &'static str,
        message: String,
    },

    #[error("failed to write csv row: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Deserialize)]
struct RuleRow {
    code: String,
    discount_type: String,
    discount_value: Amount,
    minimum_order_value: Option<Amount>,
    usage_limit: Option<u32>,
    usage_per_customer: Option<u32>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    is_active: Option<bool>,
    products: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RedemptionRow {
    code: String,
    customer: Option<String>,
    order: String,
    order_value: Amount,
    products: Option<String>,
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    code: String,
    usage_count: u32,
    total_discount: String,
    total_order_value: String,
    unique_customers: u64,
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// `;`-separated product ids. Blank means no products.
fn split_products(field: Option<String>) -> Vec<ProductId> {
    field
        .unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read rule definitions from a csv file.
///
/// An empty `products` column makes the rule apply to every product.
pub fn read_rules(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<RuleDefinition, CsvError>> + Send + 'static, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<RuleRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let discount_type = row
                .discount_type
                .parse::<DiscountType>()
                .map_err(|e| CsvError::InvalidField {
                    line,
                    field: "discount_type",
                    message: e.to_string(),
                })?;
            let applicable_products = split_products(row.products);

            Ok(RuleDefinition {
                code: row.code,
                description: None,
                discount_type,
                discount_value: row.discount_value,
                minimum_order_value: row.minimum_order_value.unwrap_or_default(),
                usage_limit: row.usage_limit,
                usage_per_customer: row.usage_per_customer,
                start_date: row.start_date,
                end_date: row.end_date,
                is_active: row.is_active.unwrap_or(true),
                all_products: applicable_products.is_empty(),
                applicable_products,
            })
        }))
}

/// Read redemption requests from a csv file
pub fn read_redemptions(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<RedemptionRequest, CsvError>> + Send + 'static, CsvError>
{
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<RedemptionRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2;
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            if row.order.is_empty() {
                return Err(CsvError::InvalidField {
                    line,
                    field: "order",
                    message: "order id is required".to_string(),
                });
            }
            let customer = row.customer.filter(|c| !c.is_empty());
            Ok(
                RedemptionRequest::new(row.code, customer, row.order, row.order_value)
                    .with_products(split_products(row.products)),
            )
        }))
}

/// Write one summary row per rule in csv format
pub fn write_summary(
    writer: impl io::Write,
    rows: impl IntoIterator<Item = (DiscountRule, UsageStatistics)>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for (rule, stats) in rows {
        writer.serialize(SummaryRow {
            code: rule.code,
            usage_count: rule.usage_count,
            total_discount: stats.total_discount.to_string(),
            total_order_value: stats.total_order_value.to_string(),
            unique_customers: stats.unique_customers,
        })?;
    }
    writer.flush().map_err(|e| CsvError::Write(e.into()))?;
    Ok(())
}
