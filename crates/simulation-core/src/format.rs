use alloy::primitives::U256;

/// Human-formats a smallest-unit amount: floor-divided by `10^decimals`,
/// always six fractional digits. A zero amount renders as `0.0`.
pub fn format_units(amount: U256, decimals: u8) -> String {
    if amount.is_zero() {
        return "0.0".to_string();
    }

    let divisor = U256::from(10).pow(U256::from(decimals));
    let whole = amount / divisor;
    let remainder = amount % divisor;
    let scaled = remainder * U256::from(1_000_000u64) / divisor;

    let frac = scaled.to_string();
    format!("{whole}.{}{frac}", "0".repeat(6 - frac.len()))
}

/// Parses a decimal amount string, tolerating thousands-separators.
pub fn parse_amount(raw: &str) -> Option<U256> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_' && *c != ' ')
        .collect();
    if cleaned.is_empty() || !cleaned.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_six_fractional_digits() {
        // 21000 gwei of an 18-decimals token
        let amount = U256::from(21_000_000_000_000u64);
        assert_eq!(format_units(amount, 18), "0.000021");
    }

    #[test]
    fn formats_whole_part() {
        let amount = U256::from(10).pow(U256::from(18)) * U256::from(3)
            + U256::from(10).pow(U256::from(17));
        assert_eq!(format_units(amount, 18), "3.100000");
    }

    #[test]
    fn zero_renders_bare() {
        assert_eq!(format_units(U256::ZERO, 18), "0.0");
    }

    #[test]
    fn truncation_floors() {
        // 1.9999999 with 7 decimals floors to 1.999999
        assert_eq!(format_units(U256::from(19_999_999u64), 7), "1.999999");
    }

    #[test]
    fn zero_decimals() {
        assert_eq!(format_units(U256::from(42u64), 0), "42.000000");
    }

    #[test]
    fn parses_separator_amounts() {
        assert_eq!(
            parse_amount("1,000,000,000,000,000,000"),
            Some(U256::from(10).pow(U256::from(18)))
        );
        assert_eq!(parse_amount("123"), Some(U256::from(123u64)));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("12x3"), None);
        assert_eq!(parse_amount("-5"), None);
    }
}
