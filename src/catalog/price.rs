use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

const CURRENCY_SYMBOLS: [(&str, &str); 4] = [("€", "EUR"), ("EUR", "EUR"), ("£", "GBP"), ("$", "USD")];

/// Reads shop-formatted amounts such as `€ 1,29`, `1.29` or `1.299,00`.
///
/// A comma or dot followed by one or two digits is the decimal separator; a dot
/// followed by exactly three digits groups thousands.
#[derive(Debug, Clone)]
pub struct PriceParser {
    amount_regex: Regex,
    default_currency: String,
}

impl PriceParser {
    pub fn new(default_currency: &str) -> Self {
        PriceParser {
            amount_regex: Regex::new(r"(?P<int>\d+(?:\.\d{3})*)(?:[.,](?P<frac>\d{1,2}))?\b")
                .expect("static price pattern"),
            default_currency: default_currency.to_string(),
        }
    }

    pub fn parse(&self, text: &str) -> Option<Decimal> {
        self.parse_with_currency(text).map(|(amount, _)| amount)
    }

    /// Amount and ISO currency. When a currency symbol is present the first number
    /// after it wins, so labels like "2 artikelen, totaal €21,70" read correctly.
    pub fn parse_with_currency(&self, text: &str) -> Option<(Decimal, String)> {
        let (haystack, currency) = match self.find_currency(text) {
            Some((position, code)) => (&text[position..], code.to_string()),
            None => (text, self.default_currency.clone()),
        };

        let captures = self.amount_regex.captures(haystack)?;
        let integer = captures.name("int")?.as_str().replace('.', "");
        let amount = match captures.name("frac") {
            Some(fraction) => Self::from_parts(&integer, fraction.as_str())?,
            None => Decimal::from_str(&integer).ok()?,
        };
        Some((amount, currency))
    }

    /// Combine split markup like `<span>1</span><span>29</span>`.
    pub fn from_parts(integer: &str, fraction: &str) -> Option<Decimal> {
        let integer = integer.trim().trim_end_matches(['.', ',']);
        let fraction = fraction.trim().trim_start_matches(['.', ',']);
        if integer.is_empty() || !integer.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if fraction.is_empty() {
            return Decimal::from_str(integer).ok();
        }
        if !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Decimal::from_str(&format!("{}.{}", integer, fraction)).ok()
    }

    fn find_currency(&self, text: &str) -> Option<(usize, &'static str)> {
        CURRENCY_SYMBOLS
            .iter()
            .filter_map(|(symbol, code)| text.find(symbol).map(|pos| (pos, *code)))
            .min_by_key(|(pos, _)| *pos)
    }
}
