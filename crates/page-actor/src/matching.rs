//! Predicates deciding which booking card and which vehicle option to take.

use chrono::NaiveDate;
use pilot_core_types::RunConfig;

use crate::dom::BookingCard;

/// Date layouts the booking list has been seen to render.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%a, %b %d, %Y",
    "%A, %B %d, %Y",
];

/// Parse a displayed date, tolerating a leading label such as `"Date: "`.
pub fn parse_display_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    let candidates = [
        text,
        text.rsplit_once(':').map(|(_, rest)| rest.trim()).unwrap_or(text),
    ];
    for candidate in candidates {
        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
                return Some(date);
            }
        }
    }
    text.split_whitespace()
        .find_map(|token| NaiveDate::parse_from_str(token, "%Y-%m-%d").ok())
}

/// Parse a displayed payout such as `"$1,234.50"`. Returns `None` when the
/// text carries no number.
pub fn parse_payout(raw: &str) -> Option<f64> {
    let text = raw.trim();
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let negative = text[..start].trim_end().ends_with('-');
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    let value: f64 = digits.trim_end_matches('.').parse().ok()?;
    Some(if negative { -value } else { value })
}

pub fn date_in_window(date: NaiveDate, config: &RunConfig) -> bool {
    let (start, end) = config.date_window();
    date >= start && date <= end
}

/// Exact, case-insensitive match of a card's class label against the
/// configured classes. Returns the configured label that matched.
pub fn matching_class<'a>(label: &str, config: &'a RunConfig) -> Option<&'a str> {
    let label = label.trim();
    config
        .vehicle_classes
        .iter()
        .map(|class| class.trim())
        .find(|class| class.eq_ignore_ascii_case(label))
}

/// Case-insensitive substring match used for the vehicle selector options.
pub fn option_matches(option_text: &str, config: &RunConfig) -> bool {
    let option = option_text.to_lowercase();
    config
        .vehicle_classes
        .iter()
        .map(|class| class.trim().to_lowercase())
        .any(|class| !class.is_empty() && option.contains(&class))
}

/// Why a card was passed over.
#[derive(Clone, Debug, PartialEq)]
pub enum CardVerdict {
    Accepted,
    Hidden,
    MissingField(&'static str),
    UnparsableDate(String),
    OutsideWindow(NaiveDate),
    ClassMismatch(String),
    PayoutNotNumeric(String),
    BelowMinimum { payout: f64, minimum: f64 },
}

impl CardVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CardVerdict::Accepted)
    }
}

pub fn evaluate_card(card: &BookingCard, config: &RunConfig) -> CardVerdict {
    if !card.layout.is_rendered() {
        return CardVerdict::Hidden;
    }
    let Some(date_text) = card.date_text.as_deref() else {
        return CardVerdict::MissingField("date");
    };
    let Some(label) = card.class_label.as_deref() else {
        return CardVerdict::MissingField("vehicle class");
    };

    let Some(date) = parse_display_date(date_text) else {
        return CardVerdict::UnparsableDate(date_text.to_string());
    };
    if !date_in_window(date, config) {
        return CardVerdict::OutsideWindow(date);
    }

    let Some(class) = matching_class(label, config) else {
        return CardVerdict::ClassMismatch(label.trim().to_string());
    };

    if let Some(minimum) = config.min_price_for(class) {
        let raw = card.payout_text.as_deref().unwrap_or_default();
        let Some(payout) = parse_payout(raw) else {
            return CardVerdict::PayoutNotNumeric(raw.to_string());
        };
        if payout < minimum {
            return CardVerdict::BelowMinimum { payout, minimum };
        }
    }

    CardVerdict::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::LayoutBox;

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
    }

    fn config(date: &str, tolerance: u32, classes: &[&str]) -> RunConfig {
        let mut config = RunConfig::new(day(date), classes.iter().map(|c| c.to_string()).collect());
        config.tolerance_days = tolerance;
        config
    }

    fn card(date: &str, class: &str, payout: Option<&str>) -> BookingCard {
        BookingCard {
            index: 0,
            layout: LayoutBox::new(320.0, 80.0),
            date_text: Some(date.into()),
            class_label: Some(class.into()),
            payout_text: payout.map(str::to_string),
        }
    }

    #[test]
    fn parses_known_date_layouts() {
        let expected = day("2025-06-01");
        for raw in [
            "2025-06-01",
            " 06/01/2025 ",
            "01.06.2025",
            "Jun 01, 2025",
            "June 1, 2025",
            "Sun, Jun 01, 2025",
            "Date: 2025-06-01",
            "Pickup 2025-06-01 09:00",
        ] {
            assert_eq!(parse_display_date(raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_display_date("tomorrow"), None);
    }

    #[test]
    fn parses_payouts() {
        assert_eq!(parse_payout("$1,234.50"), Some(1234.5));
        assert_eq!(parse_payout(" 45 "), Some(45.0));
        assert_eq!(parse_payout("€ 19.99 est."), Some(19.99));
        assert_eq!(parse_payout("TBD"), None);
        assert_eq!(parse_payout(""), None);
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        let config = config("2025-06-10", 2, &["Sedan"]);
        assert!(date_in_window(day("2025-06-08"), &config));
        assert!(date_in_window(day("2025-06-12"), &config));
        assert!(!date_in_window(day("2025-06-07"), &config));
        assert!(!date_in_window(day("2025-06-13"), &config));
    }

    #[test]
    fn exact_date_without_range() {
        let config = config("2025-06-01", 0, &["Sedan"]);
        assert!(date_in_window(day("2025-06-01"), &config));
        assert!(!date_in_window(day("2025-06-02"), &config));
        assert!(!date_in_window(day("2025-05-31"), &config));
    }

    #[test]
    fn inclusive_range() {
        let mut config = config("2025-06-01", 0, &["Sedan"]);
        config.end_date = Some(day("2025-06-05"));
        assert!(date_in_window(day("2025-06-01"), &config));
        assert!(date_in_window(day("2025-06-05"), &config));
        assert!(!date_in_window(day("2025-06-06"), &config));
    }

    #[test]
    fn class_match_is_case_insensitive_and_exact() {
        let config = config("2025-06-01", 0, &["Sedan", "Cargo Van"]);
        assert_eq!(matching_class("sedan", &config), Some("Sedan"));
        assert_eq!(matching_class(" SEDAN ", &config), Some("Sedan"));
        assert_eq!(matching_class("cargo van", &config), Some("Cargo Van"));
        assert_eq!(matching_class("Sedan XL", &config), None);
        assert_eq!(matching_class("Truck", &config), None);
    }

    #[test]
    fn option_match_is_case_insensitive_substring() {
        let config = config("2025-06-01", 0, &["sedan"]);
        assert!(option_matches("Standard Sedan (4 seats)", &config));
        assert!(option_matches("SEDAN", &config));
        assert!(!option_matches("Minivan", &config));
    }

    #[test]
    fn evaluate_card_applies_every_predicate() {
        let mut config = config("2025-06-01", 0, &["Sedan"]);
        assert_eq!(evaluate_card(&card("2025-06-01", "sedan", None), &config), CardVerdict::Accepted);

        let mut hidden = card("2025-06-01", "sedan", None);
        hidden.layout = LayoutBox::default();
        assert_eq!(evaluate_card(&hidden, &config), CardVerdict::Hidden);

        assert_eq!(
            evaluate_card(&card("2025-06-02", "sedan", None), &config),
            CardVerdict::OutsideWindow(day("2025-06-02"))
        );
        assert_eq!(
            evaluate_card(&card("2025-06-01", "van", None), &config),
            CardVerdict::ClassMismatch("van".into())
        );

        config.min_prices.insert("sedan".into(), 50.0);
        assert_eq!(
            evaluate_card(&card("2025-06-01", "Sedan", Some("$49.99")), &config),
            CardVerdict::BelowMinimum { payout: 49.99, minimum: 50.0 }
        );
        assert_eq!(
            evaluate_card(&card("2025-06-01", "Sedan", Some("n/a")), &config),
            CardVerdict::PayoutNotNumeric("n/a".into())
        );
        assert_eq!(
            evaluate_card(&card("2025-06-01", "Sedan", Some("$50")), &config),
            CardVerdict::Accepted
        );
    }
}
