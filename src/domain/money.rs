use std::fmt;

/// Money is held as an integer count of minor units to avoid floating-point drift.
/// With two fraction digits, 1 unit = 100 minor units, so 50.00 = 5000.
pub type Cents = i64;

/// Largest precision we accept; 10^18 still fits in an `i64`.
pub const MAX_FRACTION_DIGITS: u32 = 18;

fn scale(fraction_digits: u32) -> i64 {
    10i64.pow(fraction_digits.min(MAX_FRACTION_DIGITS))
}

/// Format minor units as a plain decimal string.
/// Example with 2 digits: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_minor(amount: Cents, fraction_digits: u32) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    if fraction_digits == 0 {
        return format!("{}{}", sign, abs);
    }
    let scale = scale(fraction_digits) as u64;
    let units = abs / scale;
    let remainder = abs % scale;
    format!(
        "{}{}.{:0width$}",
        sign,
        units,
        remainder,
        width = fraction_digits as usize
    )
}

/// Parse a decimal string into minor units.
/// Example with 2 digits: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000
///
/// Inputs carrying more fraction digits than the currency allows are rejected
/// rather than rounded.
pub fn parse_minor(input: &str, fraction_digits: u32) -> Result<Cents, ParseMoneyError> {
    let input = input.trim();
    let (negative, input) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };
    if input.is_empty() {
        return Err(ParseMoneyError::InvalidFormat);
    }

    let parts: Vec<&str> = input.split('.').collect();
    let (whole, fraction) = match parts.as_slice() {
        [whole] => (*whole, ""),
        [whole, fraction] => (*whole, *fraction),
        _ => return Err(ParseMoneyError::InvalidFormat),
    };

    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ParseMoneyError::InvalidFormat);
    }
    if whole.is_empty() && fraction.is_empty() {
        return Err(ParseMoneyError::InvalidFormat);
    }
    if fraction.len() > fraction_digits as usize {
        return Err(ParseMoneyError::TooPrecise { fraction_digits });
    }

    let units: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| ParseMoneyError::Overflow)?
    };

    // Right-pad the fraction: "5" with 2 digits means 50 minor units
    let minor: i64 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = fraction_digits as usize);
        padded.parse().map_err(|_| ParseMoneyError::Overflow)?
    };

    let amount = units
        .checked_mul(scale(fraction_digits))
        .and_then(|v| v.checked_add(minor))
        .ok_or(ParseMoneyError::Overflow)?;
    Ok(if negative { -amount } else { amount })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseMoneyError {
    InvalidFormat,
    TooPrecise { fraction_digits: u32 },
    Overflow,
}

impl fmt::Display for ParseMoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseMoneyError::InvalidFormat => write!(f, "invalid money format"),
            ParseMoneyError::TooPrecise { fraction_digits } => {
                write!(f, "at most {} decimal places allowed", fraction_digits)
            }
            ParseMoneyError::Overflow => write!(f, "amount is too large"),
        }
    }
}

impl std::error::Error for ParseMoneyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_minor() {
        assert_eq!(format_minor(5000, 2), "50.00");
        assert_eq!(format_minor(1234, 2), "12.34");
        assert_eq!(format_minor(1, 2), "0.01");
        assert_eq!(format_minor(0, 2), "0.00");
        assert_eq!(format_minor(-5000, 2), "-50.00");
        assert_eq!(format_minor(-1, 2), "-0.01");
        assert_eq!(format_minor(42, 0), "42");
        assert_eq!(format_minor(1500, 3), "1.500");
    }

    #[test]
    fn test_parse_minor() {
        assert_eq!(parse_minor("50.00", 2), Ok(5000));
        assert_eq!(parse_minor("50", 2), Ok(5000));
        assert_eq!(parse_minor("12.34", 2), Ok(1234));
        assert_eq!(parse_minor("12.5", 2), Ok(1250));
        assert_eq!(parse_minor(".50", 2), Ok(50));
        assert_eq!(parse_minor("-50.00", 2), Ok(-5000));
        assert_eq!(parse_minor("7", 0), Ok(7));
    }

    #[test]
    fn test_parse_minor_rejects_excess_precision() {
        assert_eq!(
            parse_minor("100.999", 2),
            Err(ParseMoneyError::TooPrecise { fraction_digits: 2 })
        );
        assert!(parse_minor("1.5", 0).is_err());
    }

    #[test]
    fn test_parse_minor_invalid() {
        assert!(parse_minor("abc", 2).is_err());
        assert!(parse_minor("12.34.56", 2).is_err());
        assert!(parse_minor("", 2).is_err());
        assert!(parse_minor("-", 2).is_err());
        assert_eq!(parse_minor("--5", 2), Err(ParseMoneyError::InvalidFormat));
        assert_eq!(parse_minor("-.-5", 2), Err(ParseMoneyError::InvalidFormat));
        assert!(parse_minor("1e5", 2).is_err());
        assert_eq!(
            parse_minor("99999999999999999999", 2),
            Err(ParseMoneyError::Overflow)
        );
    }
}
