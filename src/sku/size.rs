//! Size token rules.
//!
//! Clothing sizes are read from the variant value alone, largest first so
//! "x-large" never stops at "large". A size word has to stand between
//! spaces, slashes, commas, hyphens or parentheses, so "men's" is not a
//! small. Capacity and length units are read from the product name and
//! variant value together; quantities longer than four digits are ignored.

use std::sync::LazyLock;

use regex::Regex;

struct ClothingRule {
    pattern: Regex,
    code: &'static str,
}

struct UnitRule {
    pattern: Regex,
    unit: &'static str,
}

static CLOTHING: LazyLock<Vec<ClothingRule>> = LazyLock::new(|| {
    [
        ("3xl|xxxl|3x-large|xxx-large", "3XL"),
        ("2xl|xxl|2x-large|xx-large", "2XL"),
        ("xl|x-large|extra large|extra-large", "XL"),
        ("l|lg|large", "L"),
        ("m|md|med|medium", "M"),
        ("s|sm|small", "S"),
    ]
    .into_iter()
    .map(|(pattern, code)| ClothingRule {
        pattern: Regex::new(&format!(r"(?:^|[\s/,(-])(?:{pattern})(?:$|[\s/,)-])"))
            .expect("clothing size pattern"),
        code,
    })
    .collect()
});

static UNITS: LazyLock<Vec<UnitRule>> = LazyLock::new(|| {
    [
        (r"\b([0-9]{1,4})\s*(?:oz|ounces?)\b", "OZ"),
        (r"\b([0-9]{1,4})\s*ml\b", "ML"),
        (r"\b([0-9]{1,4})\s*(?:l|liters?|litres?)\b", "L"),
        (r"\b([0-9]{1,4})\s*(?:inch|inches)\b", "IN"),
        (r"\b([0-9]{1,4})\s*cm\b", "CM"),
    ]
    .into_iter()
    .map(|(pattern, unit)| UnitRule {
        pattern: Regex::new(pattern).expect("unit size pattern"),
        unit,
    })
    .collect()
});

/// First size token found, or `None`. Inputs are already lowercased.
pub fn size_token(variant_value: &str, combined: &str) -> Option<String> {
    if let Some(rule) = CLOTHING
        .iter()
        .find(|rule| rule.pattern.is_match(variant_value))
    {
        return Some(rule.code.to_string());
    }

    UNITS.iter().find_map(|rule| {
        rule.pattern
            .captures(combined)
            .and_then(|caps| caps.get(1))
            .map(|number| format!("{}{}", number.as_str(), rule.unit))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn larger_clothing_sizes_win() {
        assert_eq!(size_token("x-large", ""), Some("XL".to_string()));
        assert_eq!(size_token("xxl", ""), Some("2XL".to_string()));
        assert_eq!(size_token("3xl", ""), Some("3XL".to_string()));
        assert_eq!(size_token("large", ""), Some("L".to_string()));
        assert_eq!(size_token("s", ""), Some("S".to_string()));
    }

    #[test]
    fn units_read_from_combined_text() {
        assert_eq!(size_token("", "tumbler 40oz"), Some("40OZ".to_string()));
        assert_eq!(size_token("", "bottle 500 ml"), Some("500ML".to_string()));
        assert_eq!(size_token("", "jug 2l"), Some("2L".to_string()));
        assert_eq!(size_token("", "laptop sleeve 15 inch"), Some("15IN".to_string()));
        assert_eq!(size_token("", "towel 70cm"), Some("70CM".to_string()));
    }

    #[test]
    fn clothing_checked_before_units() {
        assert_eq!(size_token("medium", "tee 20oz"), Some("M".to_string()));
    }

    #[test]
    fn possessives_and_embedded_letters_are_not_sizes() {
        assert_eq!(size_token("men's black", ""), None);
        assert_eq!(size_token("women's", ""), None);
        assert_eq!(size_token("navy-s", ""), Some("S".to_string()));
        assert_eq!(size_token("black (m)", ""), Some("M".to_string()));
    }

    #[test]
    fn oversized_quantities_are_ignored() {
        assert_eq!(size_token("", "123456789012345678901234oz"), None);
        assert_eq!(size_token("", "1500 ml"), Some("1500ML".to_string()));
    }

    #[test]
    fn no_size_yields_none() {
        assert_eq!(size_token("black", "widget thing black"), None);
    }
}
