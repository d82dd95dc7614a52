/*!
 * Normalisation of contact keys before comparison.
 */

use once_cell::sync::Lazy;
use regex::Regex;

/// Legal-form suffixes dropped from company names
const LEGAL_SUFFIXES: &[&str] = &[
    "bv", "nv", "bvba", "srl", "sa", "sarl", "gmbh", "ltd", "llc", "inc", "co", "sprl", "limited", "plc", "ag",
];

/// Mailbox providers whose domain says nothing about the company
const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "hotmail.com",
    "hotmail.be",
    "hotmail.fr",
    "outlook.com",
    "live.com",
    "live.be",
    "msn.com",
    "yahoo.com",
    "yahoo.fr",
    "yahoo.co.uk",
    "aol.com",
    "icloud.com",
    "me.com",
    "gmx.de",
    "gmx.net",
    "web.de",
    "mail.com",
    "proton.me",
    "protonmail.com",
    "skynet.be",
    "telenet.be",
];

/// Phones are compared on this many trailing digits
pub const PHONE_SUFFIX_DIGITS: usize = 9;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercase and trim; `mailto:` and angle brackets removed
pub fn normalize_email(email: &str) -> Option<String> {
    let trimmed = email.trim().trim_start_matches('<').trim_end_matches('>');
    let trimmed = trimmed
        .strip_prefix("mailto:")
        .or_else(|| trimmed.strip_prefix("MAILTO:"))
        .unwrap_or(trimmed)
        .trim()
        .to_lowercase();
    let (local, domain) = trimmed.split_once('@')?;
    (!local.is_empty() && domain.contains('.')).then_some(trimmed)
}

/// Domain part of an address, if it is not a free-mail provider
pub fn company_domain(email: &str) -> Option<String> {
    let normalized = normalize_email(email)?;
    let (_, domain) = normalized.split_once('@')?;
    (!FREE_MAIL_DOMAINS.contains(&domain)).then(|| domain.to_string())
}

/// Host of a website without scheme, `www.` or path
pub fn website_domain(website: &str) -> Option<String> {
    let lower = website.trim().to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let host = without_scheme.split(['/', '?', '#']).next()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    host.contains('.').then(|| host.to_string())
}

/// Digits only, `00` international prefix turned into `+`
///
/// Returns `None` for fewer than 6 digits.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let plus = phone.trim_start().starts_with('+');
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 6 {
        return None;
    }
    if plus {
        Some(format!("+{}", digits))
    } else if let Some(rest) = digits.strip_prefix("00") {
        Some(format!("+{}", rest))
    } else {
        Some(digits)
    }
}

/// Key used for phone comparison: the trailing digits
///
/// Makes `+32 470 12 34 56` and `0470 12 34 56` equal.
pub fn phone_key(phone: &str) -> Option<String> {
    let normalized = normalize_phone(phone)?;
    let digits = normalized.trim_start_matches('+');
    let start = digits.len().saturating_sub(PHONE_SUFFIX_DIGITS);
    Some(digits[start..].to_string())
}

/// Lowercase, accents folded, punctuation and legal suffixes removed
pub fn normalize_name(name: &str) -> String {
    let folded: String = name
        .chars()
        .flat_map(|c| c.to_lowercase())
        .map(fold_accent)
        // B.V. and S.A. must collapse to a single word
        .filter(|c| !matches!(c, '.' | '\''))
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();

    let words: Vec<&str> = WHITESPACE
        .split(folded.trim())
        .filter(|w| !w.is_empty())
        .collect();

    // Drop legal forms at the end, but never the whole name
    let mut end = words.len();
    while end > 1 && LEGAL_SUFFIXES.contains(&words[end - 1]) {
        end -= 1;
    }
    words[..end].join(" ")
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ß' => 's',
        _ => c,
    }
}
