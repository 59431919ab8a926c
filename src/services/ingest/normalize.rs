use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use csv::StringRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern compiles"));
static NON_ADDRESS_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s#/-]").expect("address pattern compiles"));
static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D+").expect("digit pattern compiles"));
static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number pattern compiles"));

pub fn norm_ws(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// Lowercase, keep word characters, whitespace and `# / -`, collapse whitespace
pub fn normalize_text(s: &str) -> String {
    let lowered = s.trim().to_lowercase();
    norm_ws(&NON_ADDRESS_CHARS.replace_all(&lowered, ""))
}

/// Digits only; an 11-digit number with a leading US `1` loses it
pub fn normalize_phone(s: &str) -> String {
    let digits = NON_DIGITS.replace_all(s, "").into_owned();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

pub fn address_key(raw: &str) -> String {
    format!("addr:{}", normalize_text(raw))
}

/// `place:[<name>|]addr:<address>`; `None` when both are blank
pub fn place_key(place_name: &str, raw_address: &str) -> Option<String> {
    if place_name.trim().is_empty() && raw_address.trim().is_empty() {
        return None;
    }
    let base = if raw_address.trim().is_empty() {
        "addr:unknown".to_string()
    } else {
        address_key(raw_address)
    };
    let name = normalize_text(place_name);
    Some(if name.is_empty() { format!("place:{}", base) } else { format!("place:{}|{}", name, base) })
}

/// Email beats phone beats name
pub fn person_key(first: &str, last: &str, email: &str, phone: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    if !email.is_empty() {
        return Some(format!("email:{}", email));
    }
    let phone = normalize_phone(phone);
    if !phone.is_empty() {
        return Some(format!("phone:{}", phone));
    }
    let name = normalize_text(&format!("{} {}", first, last));
    (!name.is_empty()).then(|| format!("name:{}", name))
}

/// First 32 hex characters of SHA-256
pub fn sha256_hex32(input: &str) -> String {
    let mut hex = format!("{:x}", Sha256::digest(input.as_bytes()));
    hex.truncate(32);
    hex
}

pub fn parse_float(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Leading integer of strings like `0-5` or `2 - Medium`
pub fn parse_leading_int(s: &str) -> Option<i32> {
    let s = s.trim();
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

pub fn first_number(s: &str) -> Option<i32> {
    FIRST_NUMBER.find(s).and_then(|m| m.as_str().parse().ok())
}

const DATETIME_FORMATS: &[&str] = &["%m/%d/%Y %I:%M%p", "%m/%d/%Y %H:%M", "%Y-%m-%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date()))
        .or_else(|| DATE_FORMATS.iter().find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok()))
}

/// Trimmed header name to column index
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    index: HashMap<String, usize>,
    names: Vec<String>,
}

impl HeaderMap {
    pub fn from_headers(headers: &StringRecord) -> Self {
        let mut index = HashMap::new();
        let mut names = Vec::with_capacity(headers.len());
        for (i, h) in headers.iter().enumerate() {
            let cleaned = h.trim_start_matches('\u{feff}').trim().to_string();
            index.entry(cleaned.clone()).or_insert(i);
            names.push(cleaned);
        }
        Self { index, names }
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// First non-blank value among `keys`, trimmed; empty string when none
    pub fn get_field(&self, record: &StringRecord, keys: &[&str]) -> String {
        keys.iter()
            .filter_map(|k| self.index.get(k.trim()))
            .filter_map(|&i| record.get(i))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    /// Header/value pairs for raw JSON storage
    pub fn to_json(&self, record: &StringRecord) -> serde_json::Value {
        let map = self
            .names
            .iter()
            .zip(record.iter())
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, value)| (name.clone(), serde_json::Value::String(value.to_string())))
            .collect();
        serde_json::Value::Object(map)
    }
}

pub fn is_blank_row(record: &StringRecord) -> bool {
    record.iter().all(|v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_normalization() {
        assert_eq!(norm_ws("  a \t b\n c "), "a b c");
        assert_eq!(normalize_text("  123 Main St., Apt #4/B "), "123 main st apt #4/b");
        assert_eq!(normalize_text("O'Brien-Smith"), "obrien-smith");
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("+1 (707) 555-0100"), "7075550100");
        assert_eq!(normalize_phone("707.555.0100"), "7075550100");
        assert_eq!(normalize_phone("21234567890"), "21234567890");
        assert_eq!(normalize_phone("n/a"), "");
    }

    #[test]
    fn natural_keys() {
        assert_eq!(address_key("12 Oak  Ln."), "addr:12 oak ln");
        assert_eq!(place_key("Barn Colony", "12 Oak Ln").as_deref(), Some("place:barn colony|addr:12 oak ln"));
        assert_eq!(place_key("", "12 Oak Ln").as_deref(), Some("place:addr:12 oak ln"));
        assert_eq!(place_key("Barn", "").as_deref(), Some("place:barn|addr:unknown"));
        assert_eq!(place_key(" ", ""), None);

        assert_eq!(person_key("A", "B", " Ann@X.org ", "707-555-0100").as_deref(), Some("email:ann@x.org"));
        assert_eq!(person_key("A", "B", "", "1-707-555-0100").as_deref(), Some("phone:7075550100"));
        assert_eq!(person_key("Ann", "Lee", "", "").as_deref(), Some("name:ann lee"));
        assert_eq!(person_key("", "", "", ""), None);
    }

    #[test]
    fn number_parsing() {
        assert_eq!(parse_leading_int("0-5"), Some(0));
        assert_eq!(parse_leading_int("12 cats"), Some(12));
        assert_eq!(parse_leading_int("about 5"), None);
        assert_eq!(first_number("Priority 3 - High"), Some(3));
        assert_eq!(parse_float(" 38.44 "), Some(38.44));
        assert_eq!(parse_float("NaN"), None);
    }

    #[test]
    fn date_parsing() {
        let dt = parse_datetime("03/14/2024 9:05AM").unwrap();
        assert_eq!(dt.to_string(), "2024-03-14 09:05:00");
        assert_eq!(parse_datetime("03/14/2024").unwrap().to_string(), "2024-03-14 00:00:00");
        assert_eq!(parse_date("2024-03-14").unwrap().to_string(), "2024-03-14");
        assert_eq!(parse_date("03/14/2024 17:30").unwrap().to_string(), "2024-03-14");
        assert_eq!(parse_date("March 14"), None);
    }

    #[test]
    fn header_map_trims_and_falls_through() {
        let headers = StringRecord::from(vec!["\u{feff}Record ID ", "Clean Email", "Email"]);
        let map = HeaderMap::from_headers(&headers);
        let row = StringRecord::from(vec!["rec1", "  ", "ann@x.org"]);
        assert_eq!(map.get_field(&row, &["Record ID"]), "rec1");
        assert_eq!(map.get_field(&row, &["Clean Email", "Email"]), "ann@x.org");
        assert_eq!(map.get_field(&row, &["Missing"]), "");
        assert!(is_blank_row(&StringRecord::from(vec![" ", ""])));
    }

    #[test]
    fn hash_prefix() {
        let h = sha256_hex32("abc");
        assert_eq!(h, "ba7816bf8f01cfea414140de5dae2223");
    }
}
