//! Input validation
//! Keeps bad input out before any index or ledger is touched

use anyhow::{anyhow, Result};

/// Maximum lengths and counts
pub const MAX_TAG_LENGTH: usize = 128;
pub const MAX_TAGS_PER_MEMORY: usize = 32;
pub const MAX_STRING_ATTRIBUTE_LENGTH: usize = 1_024;
pub const MAX_RESULT_LIMIT: usize = 100_000;

/// Validate a single tag
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.trim().is_empty() {
        return Err(anyhow!("tag cannot be empty"));
    }

    if tag.len() > MAX_TAG_LENGTH {
        return Err(anyhow!(
            "tag too long: {} chars (max: {})",
            tag.len(),
            MAX_TAG_LENGTH
        ));
    }

    Ok(())
}

/// Validate the tag list supplied at ingestion
pub fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS_PER_MEMORY {
        return Err(anyhow!(
            "too many tags: {} (max: {})",
            tags.len(),
            MAX_TAGS_PER_MEMORY
        ));
    }

    for tag in tags {
        validate_tag(tag)?;
    }

    Ok(())
}

/// Validate a result limit
pub fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(anyhow!("limit must be greater than 0"));
    }

    if limit > MAX_RESULT_LIMIT {
        return Err(anyhow!(
            "limit too large: {limit} (max: {MAX_RESULT_LIMIT})"
        ));
    }

    Ok(())
}

/// Validate a redistribution rate
pub fn validate_care_rate(rate: f64) -> Result<()> {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        return Err(anyhow!("care rate must be between 0.0 and 1.0, got: {rate}"));
    }
    Ok(())
}

/// Validate a numeric amount passed to the ledger or stored in a slot
pub fn validate_finite(value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(anyhow!("value must be finite, got: {value}"));
    }
    Ok(())
}

/// Validate a string slot value. Empty strings are not values.
pub fn validate_string_attribute(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow!("string value cannot be empty"));
    }
    if value.len() > MAX_STRING_ATTRIBUTE_LENGTH {
        return Err(anyhow!(
            "string value too long: {} chars (max: {})",
            value.len(),
            MAX_STRING_ATTRIBUTE_LENGTH
        ));
    }
    Ok(())
}
