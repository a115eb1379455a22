//! Indicator value validation and type detection.

use crate::traits::IndicatorType;
use regex::Regex;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;

/// Maximum length of a fully qualified domain name.
const MAX_FQDN_LENGTH: usize = 255;

/// Maximum length of a single label.
const MAX_LABEL_LENGTH: usize = 63;

pub fn is_valid_ipv4(value: &str) -> bool {
    value.parse::<Ipv4Addr>().is_ok()
}

pub fn is_valid_ipv6(value: &str) -> bool {
    value.parse::<Ipv6Addr>().is_ok()
}

pub fn is_valid_ip(value: &str) -> bool {
    is_valid_ipv4(value) || is_valid_ipv6(value)
}

fn domain_label_regex() -> Option<&'static Regex> {
    static LABEL: OnceLock<Option<Regex>> = OnceLock::new();
    LABEL
        .get_or_init(|| Regex::new(r"^(xn--)?[a-z0-9]+(-[a-z0-9]+)*$").ok())
        .as_ref()
}

/// Validates a lowercase domain name such as `evil.example.com`.
///
/// Labels may carry a punycode prefix; the top-level label is 2-63 letters.
pub fn is_valid_domain(value: &str) -> bool {
    let Some(label_re) = domain_label_regex() else {
        return false;
    };
    let labels: Vec<&str> = value.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let (tld, rest) = match labels.split_last() {
        Some(parts) => parts,
        None => return false,
    };
    if !(2..=MAX_LABEL_LENGTH).contains(&tld.len())
        || !tld.chars().all(|c| c.is_ascii_lowercase())
    {
        return false;
    }
    rest.iter()
        .all(|label| (1..=MAX_LABEL_LENGTH).contains(&label.len()) && label_re.is_match(label))
}

fn is_valid_label(label: &str) -> bool {
    (1..=MAX_LABEL_LENGTH).contains(&label.len())
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Validates an absolute domain name. A single trailing dot is allowed.
pub fn is_valid_fqdn(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_FQDN_LENGTH {
        return false;
    }
    let name = value.strip_suffix('.').unwrap_or(value);
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    match labels.split_last() {
        Some((tld, rest)) => {
            tld.len() >= 2
                && tld.chars().all(|c| c.is_ascii_alphabetic())
                && rest.iter().all(|label| is_valid_label(label))
        }
        None => false,
    }
}

/// Validates a single-label hostname.
pub fn is_valid_hostname(value: &str) -> bool {
    is_valid_label(value)
}

/// Detects the indicator type of a value that may be an IP, a domain, or a URL.
pub fn ioc_type_from_value(value: &str) -> IndicatorType {
    if is_valid_ipv4(value) {
        IndicatorType::Ipv4
    } else if is_valid_ipv6(value) {
        IndicatorType::Ipv6
    } else if is_valid_domain(value) {
        IndicatorType::Domain
    } else {
        IndicatorType::Url
    }
}

/// Basic `local@domain` email check.
pub fn is_valid_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !local.contains(char::is_whitespace)
                && !domain.contains('@')
                && is_valid_fqdn(domain)
        }
        None => false,
    }
}
