use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::model::{Category, Container, Item, ItemPhoto, Property, Receipt, Record, Room, Tag};
use crate::AppError;

pub const VALIDATION_EMPTY_NAME: &str = "VALIDATION/EMPTY_NAME";
pub const VALIDATION_NEGATIVE_AMOUNT: &str = "VALIDATION/NEGATIVE_AMOUNT";
pub const VALIDATION_CURRENCY: &str = "VALIDATION/CURRENCY_CODE";
pub const VALIDATION_COLOR: &str = "VALIDATION/COLOR_HEX";
pub const VALIDATION_QUANTITY: &str = "VALIDATION/QUANTITY";
pub const VALIDATION_ESTIMATE_RANGE: &str = "VALIDATION/ESTIMATE_RANGE";
pub const VALIDATION_IMAGE_REF: &str = "VALIDATION/IMAGE_REF";

static CURRENCY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{3}$").expect("currency pattern to compile"));

static COLOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#(?:[0-9A-Fa-f]{6}|[0-9A-Fa-f]{8})$").expect("color pattern to compile")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    EmptyName { field: &'static str },
    #[error("{field} cannot be negative (got {value})")]
    NegativeAmount { field: &'static str, value: Decimal },
    #[error("currency code must be three uppercase letters (got {0:?})")]
    CurrencyCode(String),
    #[error("color must be a #RRGGBB or #RRGGBBAA hex value (got {0:?})")]
    ColorHex(String),
    #[error("quantity must be at least 1 (got {0})")]
    Quantity(i64),
    #[error("estimated value low {low} is above high {high}")]
    EstimateRange { low: Decimal, high: Decimal },
    #[error("photo image reference cannot be empty")]
    ImageRef,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::EmptyName { .. } => VALIDATION_EMPTY_NAME,
            ValidationError::NegativeAmount { .. } => VALIDATION_NEGATIVE_AMOUNT,
            ValidationError::CurrencyCode(_) => VALIDATION_CURRENCY,
            ValidationError::ColorHex(_) => VALIDATION_COLOR,
            ValidationError::Quantity(_) => VALIDATION_QUANTITY,
            ValidationError::EstimateRange { .. } => VALIDATION_ESTIMATE_RANGE,
            ValidationError::ImageRef => VALIDATION_IMAGE_REF,
        }
    }

    fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyName { field } | ValidationError::NegativeAmount { field, .. } => {
                *field
            }
            ValidationError::CurrencyCode(_) => "currencyCode",
            ValidationError::ColorHex(_) => "colorHex",
            ValidationError::Quantity(_) => "quantity",
            ValidationError::EstimateRange { .. } => "estimatedValueLow",
            ValidationError::ImageRef => "imageRef",
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(error: ValidationError) -> Self {
        AppError::new(error.code(), error.to_string()).with_context("field", error.field())
    }
}

pub fn validate_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyName { field });
    }
    Ok(())
}

pub fn validate_amount(field: &'static str, value: Option<Decimal>) -> Result<(), ValidationError> {
    match value {
        Some(amount) if amount.is_sign_negative() && !amount.is_zero() => {
            Err(ValidationError::NegativeAmount {
                field,
                value: amount,
            })
        }
        _ => Ok(()),
    }
}

pub fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if CURRENCY_PATTERN.is_match(code) {
        Ok(())
    } else {
        Err(ValidationError::CurrencyCode(code.to_string()))
    }
}

pub fn validate_color(hex: &str) -> Result<(), ValidationError> {
    if COLOR_PATTERN.is_match(hex) {
        Ok(())
    } else {
        Err(ValidationError::ColorHex(hex.to_string()))
    }
}

fn validate_property(property: &Property) -> Result<(), ValidationError> {
    validate_name("name", &property.name)?;
    validate_color(&property.color_hex)
}

fn validate_room(room: &Room) -> Result<(), ValidationError> {
    validate_name("name", &room.name)
}

fn validate_container(container: &Container) -> Result<(), ValidationError> {
    validate_name("name", &container.name)?;
    validate_color(&container.color_hex)
}

pub fn validate_item(item: &Item) -> Result<(), ValidationError> {
    validate_name("name", &item.name)?;
    validate_amount("purchasePrice", item.purchase_price)?;
    validate_amount("estimatedValue", item.estimated_value)?;
    validate_amount("estimatedValueLow", item.estimated_value_low)?;
    validate_amount("estimatedValueHigh", item.estimated_value_high)?;
    validate_currency(&item.currency_code)?;
    if item.quantity < 1 {
        return Err(ValidationError::Quantity(item.quantity));
    }
    if let (Some(low), Some(high)) = (item.estimated_value_low, item.estimated_value_high) {
        if low > high {
            return Err(ValidationError::EstimateRange { low, high });
        }
    }
    Ok(())
}

fn validate_category(category: &Category) -> Result<(), ValidationError> {
    validate_name("name", &category.name)?;
    validate_color(&category.color_hex)
}

fn validate_tag(tag: &Tag) -> Result<(), ValidationError> {
    validate_name("name", &tag.name)?;
    validate_color(&tag.color_hex)
}

fn validate_photo(photo: &ItemPhoto) -> Result<(), ValidationError> {
    if photo.image_ref.trim().is_empty() {
        return Err(ValidationError::ImageRef);
    }
    Ok(())
}

// Confidence is OCR-owned and deliberately left unchecked.
fn validate_receipt(receipt: &Receipt) -> Result<(), ValidationError> {
    validate_amount("total", receipt.total)?;
    validate_amount("taxAmount", receipt.tax_amount)
}

/// Run every field rule for the record. Nothing is committed on failure.
pub fn validate_record(record: &Record) -> Result<(), ValidationError> {
    match record {
        Record::Property(p) => validate_property(p),
        Record::Room(r) => validate_room(r),
        Record::Container(c) => validate_container(c),
        Record::Item(i) => validate_item(i),
        Record::Category(c) => validate_category(c),
        Record::Tag(t) => validate_tag(t),
        Record::Photo(p) => validate_photo(p),
        Record::Receipt(r) => validate_receipt(r),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OcrResult, Receipt};
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test]
    fn whitespace_only_names_are_rejected() {
        let err = validate_record(&Item::new("   \t").into()).unwrap_err();
        assert_eq!(err, ValidationError::EmptyName { field: "name" });
        assert_eq!(AppError::from(err).code(), VALIDATION_EMPTY_NAME);
    }

    #[test]
    fn negative_price_is_rejected_but_zero_is_fine() {
        let mut item = Item::new("Chair");
        item.purchase_price = Some(dec("-0.01"));
        assert!(matches!(
            validate_item(&item),
            Err(ValidationError::NegativeAmount { field: "purchasePrice", .. })
        ));
        item.purchase_price = Some(dec("0.00"));
        assert!(validate_item(&item).is_ok());
    }

    #[test]
    fn currency_codes_must_be_three_uppercase_letters() {
        for good in ["USD", "EUR", "JPY"] {
            assert!(validate_currency(good).is_ok(), "{good}");
        }
        for bad in ["usd", "US", "USDX", "U5D", ""] {
            assert!(validate_currency(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn color_hex_accepts_rgb_and_rgba() {
        assert!(validate_color("#2563EB").is_ok());
        assert!(validate_color("#2563eb80").is_ok());
        assert!(validate_color("2563EB").is_err());
        assert!(validate_color("#25G3EB").is_err());
        let mut tag = Tag::new("Fragile");
        tag.color_hex = "red".into();
        let err = AppError::from(validate_record(&tag.into()).unwrap_err());
        assert_eq!(err.code(), VALIDATION_COLOR);
    }

    #[test]
    fn estimate_range_must_be_ordered() {
        let mut item = Item::new("Painting");
        item.estimated_value_low = Some(dec("500"));
        item.estimated_value_high = Some(dec("100"));
        assert!(matches!(
            validate_item(&item),
            Err(ValidationError::EstimateRange { .. })
        ));
    }

    #[test]
    fn receipt_confidence_is_not_validated() {
        let receipt = Receipt::from_ocr(OcrResult {
            confidence: 1.5,
            ..OcrResult::default()
        });
        assert!(validate_record(&receipt.into()).is_ok());
    }
}
