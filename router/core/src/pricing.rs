//! Token estimation and cost calculation

/// Estimate tokens for text without reported usage: one token per four
/// characters, rounded up
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

/// Cost in cents for a call, always rounded up
///
/// Prices are dollars per 1K tokens.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn compute_cost_cents(
    input_tokens: u64,
    output_tokens: u64,
    input_price_per_1k: f64,
    output_price_per_1k: f64,
) -> u64 {
    let dollars = (input_tokens as f64 / 1000.0) * input_price_per_1k
        + (output_tokens as f64 / 1000.0) * output_price_per_1k;
    let cents = (dollars * 100.0).ceil();
    if cents.is_finite() && cents > 0.0 {
        cents as u64
    } else {
        0
    }
}
