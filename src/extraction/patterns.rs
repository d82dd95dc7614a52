/*!
 * Deterministic, regex-based extraction.
 *
 * Runs on every intake before (or instead of) the LLM. Each found field
 * gets a fixed confidence; the overall confidence is their mean.
 */

use once_cell::sync::Lazy;
use regex::Regex;

use super::model::{Dimensions, ExtractionData};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").unwrap());

static LABELLED_PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:tel|phone|mobile|mob|gsm|cell|whatsapp)\.?[ \t]*[:.]?[ \t]*(\+?[0-9][0-9 ()./-]{6,20}[0-9])")
        .unwrap()
});

static INTL_PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\+|\b00)[1-9][0-9 ()./-]{6,20}[0-9]").unwrap());

static VIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-HJ-NPR-Z0-9]{17}\b").unwrap());

/// Known makes and how they are written on the quotation
const KNOWN_MAKES: &[(&str, &str)] = &[
    ("mercedes-benz", "Mercedes-Benz"),
    ("mercedes", "Mercedes-Benz"),
    ("land rover", "Land Rover"),
    ("range rover", "Land Rover"),
    ("volkswagen", "Volkswagen"),
    ("vw", "Volkswagen"),
    ("toyota", "Toyota"),
    ("bmw", "BMW"),
    ("audi", "Audi"),
    ("ford", "Ford"),
    ("nissan", "Nissan"),
    ("honda", "Honda"),
    ("hyundai", "Hyundai"),
    ("kia", "Kia"),
    ("peugeot", "Peugeot"),
    ("renault", "Renault"),
    ("citroen", "Citroen"),
    ("volvo", "Volvo"),
    ("mazda", "Mazda"),
    ("mitsubishi", "Mitsubishi"),
    ("jeep", "Jeep"),
    ("lexus", "Lexus"),
    ("porsche", "Porsche"),
    ("tesla", "Tesla"),
    ("chevrolet", "Chevrolet"),
    ("dodge", "Dodge"),
    ("fiat", "Fiat"),
    ("opel", "Opel"),
    ("skoda", "Skoda"),
    ("suzuki", "Suzuki"),
    ("subaru", "Subaru"),
    ("iveco", "Iveco"),
    ("scania", "Scania"),
    ("daf", "DAF"),
    ("man", "MAN"),
    ("caterpillar", "Caterpillar"),
    ("komatsu", "Komatsu"),
    ("jcb", "JCB"),
];

static VEHICLE_RE: Lazy<Regex> = Lazy::new(|| {
    let makes: Vec<String> = KNOWN_MAKES
        .iter()
        .map(|(needle, _)| regex::escape(needle).replace(' ', r"\s+"))
        .collect();
    Regex::new(&format!(
        r"\b(?:((?:19|20)[0-9]{{2}})\s+)?(?i:({}))\s+([A-Z0-9][A-Za-z0-9-]*(?:[ \t]+[A-Z0-9][A-Za-z0-9-]*)?)",
        makes.join("|")
    ))
    .unwrap()
});

static YEAR_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:year|model year|build year|bouwjaar)\s*[:=-]?\s*((?:19|20)[0-9]{2})\b").unwrap()
});

static DIMENSIONS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)([0-9]+(?:[.,][0-9]+)?)\s*(mm|cm|m)?\s*[x×*]\s*([0-9]+(?:[.,][0-9]+)?)\s*(mm|cm|m)?\s*[x×*]\s*([0-9]+(?:[.,][0-9]+)?)\s*(mm|cm|m)?\b",
    )
    .unwrap()
});

static WEIGHT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([0-9]+(?:[.,][0-9]+)*)\s*(kgs?|kilos?|kilograms?|tonnes?|tons?|t|lbs?|pounds?)\b").unwrap()
});

static POL_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:pol|port of loading|loading port)[ \t]*[:=-][ \t]*([^\r\n]+?)[ \t]*\r?$").unwrap()
});

static POD_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:pod|port of discharge|discharge port|destination port)[ \t]*[:=-][ \t]*([^\r\n]+?)[ \t]*\r?$")
        .unwrap()
});

static POR_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:por|place of receipt|pick[ -]?up|collection)[ \t]*[:=-][ \t]*([^\r\n]+?)[ \t]*\r?$").unwrap()
});

static DEST_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:fdest|final destination|delivery)[ \t]*[:=-][ \t]*([^\r\n]+?)[ \t]*\r?$").unwrap()
});

static FROM_TO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bfrom[ \t]+([a-z][a-z .'-]{1,40}?)[ \t]+to[ \t]+([a-z][a-z .'-]{1,40}?)(?:[ \t]*[.,;:!?()\r\n]|[ \t]+(?:by|via|on|in|for|with|asap|please)\b|$)",
    )
    .unwrap()
});

static ARROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z .'-]{1,40}?)[ \t]*(?:→|->|=>)[ \t]*([A-Za-z][A-Za-z .'-]{0,40}[A-Za-z])").unwrap()
});

static CONTAINER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(20|40|45)[ \t]*(?:ft|foot|feet|'|’)[ \t]*(hc|hq|high[ \t-]*cube|dv|gp|reefer|rf|open[ \t-]*top|ot|flat[ \t-]*rack|fr)?\b",
    )
    .unwrap()
});

static CONTAINER_SHORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(20|40|45)[ \t]*(hc|hq|dv|gp)\b").unwrap());

static NON_RUNNER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:non[ -]?runn(?:er|ing)|not running|does not start|doesn't start)\b").unwrap());

static USED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:used|second[ -]?hand|pre-owned)\b").unwrap());

static NEW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:brand[ -]?new|new[ \t]+(?:car|vehicle|truck|van|machine|unit)s?)\b").unwrap()
});

static SIGNATURE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?i:kind regards|best regards|warm regards|regards|best|thanks|thank you|cheers|sincerely|met vriendelijke groet(?:en)?|mvg|cordialement|mit freundlichen grüßen)[ \t]*,?[ \t]*\r?\n(?:[ \t]*\r?\n)*[ \t]*(\p{Lu}[\p{L}'.-]+(?:[ \t]+\p{Lu}[\p{L}'.-]+){0,3})[ \t]*\r?$",
    )
    .unwrap()
});

static COMPANY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(\p{Lu}[\p{L}0-9&'.,-]*(?:[ \t]+[\p{L}0-9&'.,-]+){0,5}[ \t]+(?:B\.?V\.?|N\.?V\.?|BVBA|SRL|SARL|S\.A\.|SA|GmbH|Ltd\.?|LLC|Inc\.?|SPRL))[ \t]*\r?$",
    )
    .unwrap()
});

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:your ref(?:erence)?|our ref(?:erence)?|ref(?:erence)?(?:[ \t]*(?:no|nr|number))?|po(?:[ \t]*(?:no|nr|number)))\.?[ \t]*[:#][ \t]*([a-z0-9][a-z0-9/_-]{2,30})")
        .unwrap()
});

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([0-9]{1,3})[ \t]*(?:x[ \t]*)?(?:units?|vehicles?|cars?|trucks?|vans?|pcs|pieces|machines?)\b").unwrap()
});

/// Fixed confidences per field
const CONF_EMAIL: f64 = 0.95;
const CONF_PHONE: f64 = 0.8;
const CONF_VIN: f64 = 0.95;
const CONF_VEHICLE: f64 = 0.8;
const CONF_YEAR: f64 = 0.7;
const CONF_DIMENSIONS: f64 = 0.85;
const CONF_WEIGHT: f64 = 0.8;
const CONF_ROUTE_LABEL: f64 = 0.9;
const CONF_ROUTE_PROSE: f64 = 0.7;
const CONF_CONTAINER: f64 = 0.85;
const CONF_CONDITION: f64 = 0.7;
const CONF_SIGNATURE: f64 = 0.6;
const CONF_REFERENCE: f64 = 0.7;
const CONF_QUANTITY: f64 = 0.6;

/// Regex extractor
#[derive(Debug, Clone, Default)]
pub struct PatternExtractor {
    /// Lowercased domains whose addresses are never the customer
    own_domains: Vec<String>,
}

impl PatternExtractor {
    /// Create an extractor that ignores addresses on `own_domains`
    pub fn new(own_domains: &[String]) -> Self {
        Self {
            own_domains: own_domains
                .iter()
                .map(|d| d.trim().trim_start_matches('@').to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }

    /// Extract everything the patterns can find in `text`
    pub fn extract(&self, text: &str) -> ExtractionData {
        let mut data = ExtractionData::default();
        let mut found: Vec<(&str, f64)> = Vec::new();

        if let Some(email) = self.find_email(text) {
            data.contact.email = Some(email);
            found.push(("contact.email", CONF_EMAIL));
        }
        if let Some(phone) = find_phone(text) {
            data.contact.phone = Some(phone);
            found.push(("contact.phone", CONF_PHONE));
        }
        if let Some(name) = capture(&SIGNATURE_RE, text, 1) {
            data.contact.name = Some(name);
            found.push(("contact.name", CONF_SIGNATURE));
        }
        if let Some(company) = capture(&COMPANY_RE, text, 1) {
            data.contact.company = Some(company);
            found.push(("contact.company", CONF_SIGNATURE));
        }

        if let Some(vin) = find_vin(text) {
            data.vehicle.vin = Some(vin);
            found.push(("vehicle.vin", CONF_VIN));
        }
        if let Some((year, make, model)) = find_vehicle(text) {
            data.vehicle.make = Some(make);
            data.vehicle.model = Some(model);
            found.push(("vehicle.make", CONF_VEHICLE));
            found.push(("vehicle.model", CONF_VEHICLE));
            if let Some(year) = year {
                data.vehicle.year = Some(year);
                found.push(("vehicle.year", CONF_VEHICLE));
            }
        }
        if data.vehicle.year.is_none() {
            if let Some(year) = capture(&YEAR_LABEL_RE, text, 1).and_then(|y| y.parse().ok()) {
                data.vehicle.year = Some(year);
                found.push(("vehicle.year", CONF_YEAR));
            }
        }
        if let Some(dimensions) = find_dimensions(text) {
            data.vehicle.dimensions = Some(dimensions);
            found.push(("vehicle.dimensions", CONF_DIMENSIONS));
        }
        if let Some(weight) = find_weight(text) {
            data.vehicle.weight_kg = Some(weight);
            found.push(("vehicle.weight_kg", CONF_WEIGHT));
        }
        if let Some(condition) = find_condition(text) {
            data.vehicle.condition = Some(condition.to_string());
            found.push(("vehicle.condition", CONF_CONDITION));
        }
        if let Some(quantity) = capture(&QUANTITY_RE, text, 1).and_then(|q| q.parse().ok()) {
            if quantity > 0 {
                data.vehicle.quantity = Some(quantity);
                found.push(("vehicle.quantity", CONF_QUANTITY));
            }
        }

        self.extract_route(text, &mut data, &mut found);

        if let Some(container) = find_container(text) {
            data.shipment.container_type = Some(container);
            found.push(("shipment.container_type", CONF_CONTAINER));
        }
        if let Some(reference) = capture(&REFERENCE_RE, text, 1) {
            data.shipment.customer_reference = Some(reference);
            found.push(("shipment.customer_reference", CONF_REFERENCE));
        }

        if !found.is_empty() {
            data.metadata.confidence = found.iter().map(|(_, c)| c).sum::<f64>() / found.len() as f64;
        }
        data.metadata.field_confidence = found
            .into_iter()
            .map(|(field, confidence)| (field.to_string(), confidence))
            .collect();
        data
    }

    fn extract_route(&self, text: &str, data: &mut ExtractionData, found: &mut Vec<(&'static str, f64)>) {
        let labelled = [
            (&*POR_LABEL_RE, "shipment.origin"),
            (&*POL_LABEL_RE, "shipment.pol"),
            (&*POD_LABEL_RE, "shipment.pod"),
            (&*DEST_LABEL_RE, "shipment.destination"),
        ];
        for (re, field) in labelled {
            if let Some(place) = capture(re, text, 1).map(|p| clean_place(&p)).filter(|p| !p.is_empty()) {
                let slot = match field {
                    "shipment.origin" => &mut data.shipment.origin,
                    "shipment.pol" => &mut data.shipment.pol,
                    "shipment.pod" => &mut data.shipment.pod,
                    _ => &mut data.shipment.destination,
                };
                *slot = Some(place);
                found.push((field, CONF_ROUTE_LABEL));
            }
        }

        if data.shipment.pol.is_some() && data.shipment.pod.is_some() {
            return;
        }

        let prose = FROM_TO_RE
            .captures(text)
            .or_else(|| ARROW_RE.captures(text))
            .map(|caps| (clean_place(&caps[1]), clean_place(&caps[2])));
        if let Some((from, to)) = prose {
            if data.shipment.pol.is_none() && !from.is_empty() {
                data.shipment.pol = Some(from);
                found.push(("shipment.pol", CONF_ROUTE_PROSE));
            }
            if data.shipment.pod.is_none() && !to.is_empty() {
                data.shipment.pod = Some(to);
                found.push(("shipment.pod", CONF_ROUTE_PROSE));
            }
        }
    }

    /// Whether an address can never be the customer (ours, or automated)
    pub fn is_excluded_address(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        let (local, domain) = email.split_once('@').unwrap_or((email.as_str(), ""));
        let automated = local.contains("noreply") || local.contains("no-reply") || local == "mailer-daemon";
        automated
            || self
                .own_domains
                .iter()
                .any(|own| domain == own || domain.ends_with(&format!(".{}", own)))
    }

    fn find_email(&self, text: &str) -> Option<String> {
        EMAIL_RE
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
            .find(|email| !self.is_excluded_address(email))
    }
}

fn capture(re: &Regex, text: &str, group: usize) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(group))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn clean_place(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii_digit()).count()
}

fn find_phone(text: &str) -> Option<String> {
    let plausible = |s: &str| (8..=15).contains(&digit_count(s));
    LABELLED_PHONE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .find(|s| plausible(s))
        .or_else(|| {
            INTL_PHONE_RE
                .find_iter(text)
                .map(|m| m.as_str().trim().to_string())
                .find(|s| plausible(s))
        })
}

fn find_vin(text: &str) -> Option<String> {
    VIN_RE
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|vin| vin.chars().any(|c| c.is_ascii_digit()) && vin.chars().any(|c| c.is_ascii_alphabetic()))
        .map(str::to_string)
}

fn find_vehicle(text: &str) -> Option<(Option<u32>, String, String)> {
    let caps = VEHICLE_RE.captures(text)?;
    let needle = caps.get(2)?.as_str().to_lowercase();
    let needle = needle.split_whitespace().collect::<Vec<_>>().join(" ");
    let make = KNOWN_MAKES
        .iter()
        .find(|(n, _)| *n == needle)
        .map(|(_, canonical)| canonical.to_string())?;

    let mut model_tokens: Vec<&str> = caps.get(3)?.as_str().split_whitespace().collect();
    if model_tokens.len() > 1 && is_year(model_tokens[1]) {
        model_tokens.truncate(1);
    }
    let model = model_tokens.join(" ");
    let year = caps.get(1).and_then(|y| y.as_str().parse().ok());
    Some((year, make, model))
}

fn is_year(token: &str) -> bool {
    token.len() == 4 && (token.starts_with("19") || token.starts_with("20")) && digit_count(token) == 4
}

/// Parse `1.500`, `1,500`, `1.5` or `1,5`
fn parse_number(raw: &str) -> Option<f64> {
    let groups: Vec<&str> = raw.split(['.', ',']).collect();
    let thousands = groups.len() > 1 && groups[1..].iter().all(|g| g.len() == 3) && groups[0].len() <= 3;
    if thousands {
        groups.concat().parse().ok()
    } else if groups.len() == 2 {
        format!("{}.{}", groups[0], groups[1]).parse().ok()
    } else {
        raw.parse().ok()
    }
}

fn to_metres(value: f64, unit: &str) -> f64 {
    let metres = match unit {
        "mm" => value / 1000.0,
        "cm" => value / 100.0,
        _ => value,
    };
    (metres * 1000.0).round() / 1000.0
}

fn find_dimensions(text: &str) -> Option<Dimensions> {
    let caps = DIMENSIONS_RE.captures(text)?;
    let values: Vec<f64> = [1, 3, 5]
        .iter()
        .map(|i| caps.get(*i).and_then(|m| parse_number(m.as_str())))
        .collect::<Option<Vec<_>>>()?;
    let units: Vec<Option<String>> = [2, 4, 6]
        .iter()
        .map(|i| caps.get(*i).map(|m| m.as_str().to_lowercase()))
        .collect();

    let fallback_unit = units.iter().rev().flatten().next().cloned().unwrap_or_else(|| {
        let largest = values.iter().cloned().fold(0.0, f64::max);
        if largest >= 1000.0 {
            "mm".to_string()
        } else if largest >= 30.0 {
            "cm".to_string()
        } else {
            "m".to_string()
        }
    });
    let unit_at = |i: usize| units[i].clone().unwrap_or_else(|| fallback_unit.clone());

    Some(Dimensions {
        length_m: Some(to_metres(values[0], &unit_at(0))),
        width_m: Some(to_metres(values[1], &unit_at(1))),
        height_m: Some(to_metres(values[2], &unit_at(2))),
    })
}

fn find_weight(text: &str) -> Option<f64> {
    let caps = WEIGHT_RE.captures(text)?;
    let value = parse_number(caps.get(1)?.as_str())?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    let kg = if unit.starts_with('t') {
        value * 1000.0
    } else if unit.starts_with("lb") || unit.starts_with("pound") {
        value * 0.453_592
    } else {
        value
    };
    Some((kg * 10.0).round() / 10.0)
}

fn find_condition(text: &str) -> Option<&'static str> {
    if NON_RUNNER_RE.is_match(text) {
        Some("non-runner")
    } else if USED_RE.is_match(text) {
        Some("used")
    } else if NEW_RE.is_match(text) {
        Some("new")
    } else {
        None
    }
}

fn find_container(text: &str) -> Option<String> {
    let caps = CONTAINER_RE.captures(text).or_else(|| CONTAINER_SHORT_RE.captures(text))?;
    let size = caps.get(1)?.as_str();
    let suffix = caps.get(2).map(|m| {
        let kind: String = m.as_str().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
        match kind.as_str() {
            "hc" | "hq" => "HC",
            k if k.starts_with("high") => "HC",
            "dv" | "gp" => "DV",
            "reefer" | "rf" => "Reefer",
            "ot" => "Open Top",
            k if k.starts_with("open") => "Open Top",
            _ => "Flat Rack",
        }
    });
    Some(match suffix {
        Some(suffix) => format!("{}ft {}", size, suffix),
        None => format!("{}ft", size),
    })
}
