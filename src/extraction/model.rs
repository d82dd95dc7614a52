/*!
 * Extraction data model and the pattern/LLM merge.
 *
 * `ExtractionData` is what both extractors produce and what gets stored as
 * JSON on the extraction row. Deserialization is lenient: models answer
 * with strings where numbers are expected, and omit whole sections.
 */

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::database::models::ExtractionMethod;

/// Who is asking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactInfo {
    /// Person name
    pub name: Option<String>,
    /// Company name
    pub company: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Phone number as written
    pub phone: Option<String>,
}

/// Outer dimensions in metres
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dimensions {
    #[serde(deserialize_with = "lenient_f64")]
    pub length_m: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub width_m: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub height_m: Option<f64>,
}

impl Dimensions {
    /// All three sides known
    pub fn is_complete(&self) -> bool {
        self.length_m.is_some() && self.width_m.is_some() && self.height_m.is_some()
    }

    /// `L x W x H m`, with unknown sides as `?`
    pub fn display(&self) -> String {
        let side = |v: Option<f64>| v.map(format_metres).unwrap_or_else(|| "?".to_string());
        format!(
            "{} x {} x {} m",
            side(self.length_m),
            side(self.width_m),
            side(self.height_m)
        )
    }
}

fn format_metres(value: f64) -> String {
    let s = format!("{:.2}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// The cargo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleInfo {
    pub make: Option<String>,
    pub model: Option<String>,
    #[serde(deserialize_with = "lenient_u32")]
    pub year: Option<u32>,
    /// 17-character vehicle identification number
    pub vin: Option<String>,
    /// `new`, `used` or `non-runner`
    pub condition: Option<String>,
    #[serde(deserialize_with = "lenient_u32")]
    pub quantity: Option<u32>,
    pub dimensions: Option<Dimensions>,
    #[serde(deserialize_with = "lenient_f64")]
    pub weight_kg: Option<f64>,
    /// Free-text cargo description when it is not a vehicle
    pub description: Option<String>,
}

/// Routing and commercial details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipmentInfo {
    /// Place of receipt
    pub origin: Option<String>,
    /// Port of loading
    pub pol: Option<String>,
    /// Port of discharge
    pub pod: Option<String>,
    /// Final destination
    pub destination: Option<String>,
    /// e.g. `40ft HC`
    pub container_type: Option<String>,
    pub customer_reference: Option<String>,
}

/// How the data was found
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionMetadata {
    /// Overall confidence (0.0-1.0)
    #[serde(deserialize_with = "lenient_f64_zero")]
    pub confidence: f64,
    /// Confidence per found field, keyed by dotted path
    pub field_confidence: BTreeMap<String, f64>,
    /// Files that contributed
    pub sources: Vec<String>,
}

/// Structured result of an extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionData {
    pub contact: ContactInfo,
    pub vehicle: VehicleInfo,
    pub shipment: ShipmentInfo,
    pub metadata: ExtractionMetadata,
}

impl ExtractionData {
    /// Number of populated fields, metadata excluded
    pub fn field_count(&self) -> usize {
        let c = &self.contact;
        let v = &self.vehicle;
        let s = &self.shipment;
        [
            c.name.is_some(),
            c.company.is_some(),
            c.email.is_some(),
            c.phone.is_some(),
            v.make.is_some(),
            v.model.is_some(),
            v.year.is_some(),
            v.vin.is_some(),
            v.condition.is_some(),
            v.quantity.is_some(),
            v.dimensions.is_some(),
            v.weight_kg.is_some(),
            v.description.is_some(),
            s.origin.is_some(),
            s.pol.is_some(),
            s.pod.is_some(),
            s.destination.is_some(),
            s.container_type.is_some(),
            s.customer_reference.is_some(),
        ]
        .iter()
        .filter(|found| **found)
        .count()
    }

    /// Force every confidence into `0.0..=1.0`
    pub fn clamp_confidence(&mut self) {
        let m = &mut self.metadata;
        m.confidence = unit_interval(m.confidence);
        for confidence in m.field_confidence.values_mut() {
            *confidence = unit_interval(*confidence);
        }
    }

    /// Nothing found
    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }

    /// Drop blank strings that models like to send instead of null
    pub fn normalize_blanks(&mut self) {
        fn blank(field: &mut Option<String>) {
            let cleaned = field.as_deref().map(str::trim).and_then(|trimmed| {
                let placeholder = trimmed.is_empty()
                    || trimmed.eq_ignore_ascii_case("null")
                    || trimmed.eq_ignore_ascii_case("n/a");
                (!placeholder).then(|| trimmed.to_string())
            });
            *field = cleaned;
        }
        let c = &mut self.contact;
        for field in [&mut c.name, &mut c.company, &mut c.email, &mut c.phone] {
            blank(field);
        }
        let v = &mut self.vehicle;
        for field in [
            &mut v.make,
            &mut v.model,
            &mut v.vin,
            &mut v.condition,
            &mut v.description,
        ] {
            blank(field);
        }
        let s = &mut self.shipment;
        for field in [
            &mut s.origin,
            &mut s.pol,
            &mut s.pod,
            &mut s.destination,
            &mut s.container_type,
            &mut s.customer_reference,
        ] {
            blank(field);
        }
        if self
            .vehicle
            .dimensions
            .is_some_and(|d| d.length_m.is_none() && d.width_m.is_none() && d.height_m.is_none())
        {
            self.vehicle.dimensions = None;
        }
    }

    /// One-line cargo description: `{qty} x {year} {make} {model}`
    pub fn cargo_line(&self) -> Option<String> {
        let v = &self.vehicle;
        let mut parts: Vec<String> = Vec::new();
        if let Some(year) = v.year {
            parts.push(year.to_string());
        }
        if let Some(make) = &v.make {
            parts.push(make.clone());
        }
        if let Some(model) = &v.model {
            parts.push(model.clone());
        }
        if parts.is_empty() {
            parts.extend(v.description.clone());
        }
        if parts.is_empty() {
            return None;
        }
        Some(format!("{} x {}", v.quantity.unwrap_or(1), parts.join(" ")))
    }
}

fn unit_interval(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Take `preferred` when set, else `fallback`
fn pick<T: Clone>(preferred: &Option<T>, fallback: &Option<T>) -> Option<T> {
    preferred.clone().or_else(|| fallback.clone())
}

/// Combine pattern and LLM results
///
/// Exact tokens (email, phone, VIN) come from the patterns, descriptive
/// fields from the LLM; each side fills the other's gaps. The method is
/// `hybrid` only when both sides found something.
pub fn merge(pattern: &ExtractionData, llm: Option<&ExtractionData>) -> (ExtractionData, ExtractionMethod) {
    let (mut merged, method) = merge_fields(pattern, llm);
    merged.clamp_confidence();
    (merged, method)
}

fn merge_fields(pattern: &ExtractionData, llm: Option<&ExtractionData>) -> (ExtractionData, ExtractionMethod) {
    let Some(llm) = llm.filter(|l| !l.is_empty()) else {
        return (pattern.clone(), ExtractionMethod::Pattern);
    };
    if pattern.is_empty() {
        return (llm.clone(), ExtractionMethod::Llm);
    }

    let (p, l) = (pattern, llm);
    let dimensions = match (&l.vehicle.dimensions, &p.vehicle.dimensions) {
        (Some(ld), Some(pd)) if !ld.is_complete() && pd.is_complete() => Some(*pd),
        (ld, pd) => pick(ld, pd),
    };

    let mut field_confidence = p.metadata.field_confidence.clone();
    for (field, confidence) in &l.metadata.field_confidence {
        let entry = field_confidence.entry(field.clone()).or_insert(0.0);
        *entry = entry.max(*confidence);
    }
    let mut sources = p.metadata.sources.clone();
    for source in &l.metadata.sources {
        if !sources.contains(source) {
            sources.push(source.clone());
        }
    }

    let merged = ExtractionData {
        contact: ContactInfo {
            name: pick(&l.contact.name, &p.contact.name),
            company: pick(&l.contact.company, &p.contact.company),
            email: pick(&p.contact.email, &l.contact.email),
            phone: pick(&p.contact.phone, &l.contact.phone),
        },
        vehicle: VehicleInfo {
            make: pick(&l.vehicle.make, &p.vehicle.make),
            model: pick(&l.vehicle.model, &p.vehicle.model),
            year: pick(&l.vehicle.year, &p.vehicle.year),
            vin: pick(&p.vehicle.vin, &l.vehicle.vin),
            condition: pick(&l.vehicle.condition, &p.vehicle.condition),
            quantity: pick(&l.vehicle.quantity, &p.vehicle.quantity),
            dimensions,
            weight_kg: pick(&l.vehicle.weight_kg, &p.vehicle.weight_kg),
            description: pick(&l.vehicle.description, &p.vehicle.description),
        },
        shipment: ShipmentInfo {
            origin: pick(&l.shipment.origin, &p.shipment.origin),
            pol: pick(&l.shipment.pol, &p.shipment.pol),
            pod: pick(&l.shipment.pod, &p.shipment.pod),
            destination: pick(&l.shipment.destination, &p.shipment.destination),
            container_type: pick(&l.shipment.container_type, &p.shipment.container_type),
            customer_reference: pick(&l.shipment.customer_reference, &p.shipment.customer_reference),
        },
        metadata: ExtractionMetadata {
            confidence: p.metadata.confidence.max(l.metadata.confidence),
            field_confidence,
            sources,
        },
    };

    (merged, ExtractionMethod::Hybrid)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn parse_loose_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
        .collect();
    cleaned.replace(',', ".").parse().ok()
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::Text(s)) => parse_loose_number(&s),
        None => None,
    })
}

fn lenient_f64_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(lenient_f64(deserializer)?.unwrap_or(0.0).clamp(0.0, 1.0))
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    Ok(lenient_f64(deserializer)?
        .filter(|n| *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n.round() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_side() -> ExtractionData {
        let mut data = ExtractionData::default();
        data.contact.email = Some("jan@acme.be".to_string());
        data.contact.name = Some("Jan".to_string());
        data.vehicle.vin = Some("WDB12345678901234".to_string());
        data.vehicle.make = Some("Mercedes".to_string());
        data.shipment.pol = Some("Antwerp".to_string());
        data.metadata.confidence = 0.6;
        data
    }

    fn llm_side() -> ExtractionData {
        let mut data = ExtractionData::default();
        data.contact.email = Some("JAN@ACME.BE ".to_string());
        data.contact.name = Some("Jan Peeters".to_string());
        data.vehicle.vin = Some("WDB1234567890123X".to_string());
        data.vehicle.make = Some("Mercedes-Benz".to_string());
        data.vehicle.model = Some("Sprinter".to_string());
        data.metadata.confidence = 0.8;
        data
    }

    #[test]
    fn test_merge_shouldPreferPatternForExactTokens() {
        let (merged, method) = merge(&pattern_side(), Some(&llm_side()));

        assert_eq!(method, ExtractionMethod::Hybrid);
        assert_eq!(merged.contact.email.as_deref(), Some("jan@acme.be"));
        assert_eq!(merged.vehicle.vin.as_deref(), Some("WDB12345678901234"));
    }

    #[test]
    fn test_merge_shouldPreferLlmForDescriptiveFields() {
        let (merged, _) = merge(&pattern_side(), Some(&llm_side()));

        assert_eq!(merged.contact.name.as_deref(), Some("Jan Peeters"));
        assert_eq!(merged.vehicle.make.as_deref(), Some("Mercedes-Benz"));
        // Gaps are filled from the other side
        assert_eq!(merged.shipment.pol.as_deref(), Some("Antwerp"));
        assert!((merged.metadata.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_merge_withOneEmptySide_shouldKeepSingleMethod() {
        let (_, method) = merge(&pattern_side(), None);
        assert_eq!(method, ExtractionMethod::Pattern);

        let (merged, method) = merge(&ExtractionData::default(), Some(&llm_side()));
        assert_eq!(method, ExtractionMethod::Llm);
        assert_eq!(merged.vehicle.model.as_deref(), Some("Sprinter"));

        let (_, method) = merge(&pattern_side(), Some(&ExtractionData::default()));
        assert_eq!(method, ExtractionMethod::Pattern);
    }

    #[test]
    fn test_merge_outOfRangeConfidence_shouldBeCappedOnEveryPath() {
        let mut llm = llm_side();
        llm.metadata.confidence = 85.0;
        llm.metadata.field_confidence.insert("vehicle.model".to_string(), 90.0);
        llm.metadata.field_confidence.insert("vehicle.make".to_string(), -0.5);

        let (merged, method) = merge(&ExtractionData::default(), Some(&llm));
        assert_eq!(method, ExtractionMethod::Llm);
        assert_eq!(merged.metadata.confidence, 1.0);
        assert_eq!(merged.metadata.field_confidence["vehicle.model"], 1.0);
        assert_eq!(merged.metadata.field_confidence["vehicle.make"], 0.0);

        let (merged, method) = merge(&pattern_side(), Some(&llm));
        assert_eq!(method, ExtractionMethod::Hybrid);
        assert_eq!(merged.metadata.confidence, 1.0);
        assert!(merged.metadata.field_confidence.values().all(|c| (0.0..=1.0).contains(c)));

        let mut pattern = pattern_side();
        pattern.metadata.confidence = f64::NAN;
        let (merged, _) = merge(&pattern, None);
        assert_eq!(merged.metadata.confidence, 0.0);
    }

    #[test]
    fn test_deserialize_shouldAcceptStringsForNumbers() {
        let data: ExtractionData = serde_json::from_str(
            r#"{"vehicle":{"year":"2019","quantity":"2 units","weight_kg":"1850,5",
                "dimensions":{"length_m":"4.5","width_m":1.8,"height_m":null}},
                "metadata":{"confidence":"0.9"},"unexpected":true}"#,
        )
        .unwrap();

        assert_eq!(data.vehicle.year, Some(2019));
        assert_eq!(data.vehicle.quantity, Some(2));
        assert_eq!(data.vehicle.weight_kg, Some(1850.5));
        assert_eq!(data.vehicle.dimensions.unwrap().length_m, Some(4.5));
        assert!((data.metadata.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_normalizeBlanks_shouldDropPlaceholders() {
        let mut data = ExtractionData::default();
        data.contact.name = Some("  ".to_string());
        data.contact.company = Some("null".to_string());
        data.shipment.pod = Some(" Lagos ".to_string());
        data.vehicle.dimensions = Some(Dimensions::default());

        data.normalize_blanks();

        assert!(data.contact.name.is_none());
        assert!(data.contact.company.is_none());
        assert_eq!(data.shipment.pod.as_deref(), Some("Lagos"));
        assert!(data.vehicle.dimensions.is_none());
    }

    #[test]
    fn test_cargoLine_shouldIncludeQuantityAndVehicle() {
        let mut data = ExtractionData::default();
        assert!(data.cargo_line().is_none());

        data.vehicle.year = Some(2018);
        data.vehicle.make = Some("Toyota".to_string());
        data.vehicle.model = Some("Hilux".to_string());
        assert_eq!(data.cargo_line().as_deref(), Some("1 x 2018 Toyota Hilux"));

        data.vehicle.quantity = Some(3);
        assert_eq!(data.cargo_line().as_deref(), Some("3 x 2018 Toyota Hilux"));
    }

    #[test]
    fn test_dimensions_display_shouldTrimZeros() {
        let dims = Dimensions {
            length_m: Some(4.5),
            width_m: Some(1.8),
            height_m: Some(2.0),
        };
        assert_eq!(dims.display(), "4.5 x 1.8 x 2 m");
    }
}
