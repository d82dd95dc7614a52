/*!
 * Extraction data to Robaws offer payload.
 */

use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

use crate::app_config::ExportConfig;
use crate::database::models::IntakeRecord;
use crate::errors::ExportError;
use crate::extraction::ExtractionData;

pub use crate::robaws::models::{ExtraFieldValue, OfferPayload};

/// Placeholder used for unknown title parts
const UNKNOWN: &str = "?";

/// Cargo description with dimensions and weight when known
///
/// `1 x 2018 Toyota Hilux, 5.33 x 1.86 x 1.8 m, 2100 kg`
pub fn cargo_description(data: &ExtractionData) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    parts.extend(data.cargo_line());
    if let Some(container) = &data.shipment.container_type {
        parts.push(container.clone());
    }
    if let Some(dims) = data.vehicle.dimensions.filter(|d| d.is_complete()) {
        parts.push(dims.display());
    }
    if let Some(weight) = data.vehicle.weight_kg {
        parts.push(format!("{} kg", weight));
    }
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Customer shown in the title
fn customer_label(data: &ExtractionData, intake: &IntakeRecord) -> Option<String> {
    data.contact
        .company
        .clone()
        .or_else(|| data.contact.name.clone())
        .or_else(|| intake.customer_name.clone())
        .or_else(|| intake.sender_name.clone())
}

/// Fill the title template
pub fn render_title(template: &str, data: &ExtractionData, intake: &IntakeRecord) -> String {
    let value = |v: Option<String>| v.unwrap_or_else(|| UNKNOWN.to_string());
    let pol = data.shipment.pol.clone().or_else(|| data.shipment.origin.clone());
    let pod = data.shipment.pod.clone().or_else(|| data.shipment.destination.clone());
    let cargo = data.cargo_line().map(|line| line.trim_start_matches("1 x ").to_string());

    let title = template
        .replace("{pol}", &value(pol))
        .replace("{pod}", &value(pod))
        .replace("{cargo}", &value(cargo))
        .replace("{customer}", &value(customer_label(data, intake)));
    title.trim().to_string()
}

/// Contact line: `Name <email> phone`
fn contact_line(data: &ExtractionData) -> Option<String> {
    let c = &data.contact;
    let mut parts = Vec::new();
    parts.extend(c.name.clone());
    parts.extend(c.email.as_ref().map(|e| format!("<{}>", e)));
    parts.extend(c.phone.clone());
    (!parts.is_empty()).then(|| parts.join(" "))
}

/// Build the offer body for an intake
pub fn build_offer_payload(
    data: &ExtractionData,
    intake: &IntakeRecord,
    config: &ExportConfig,
    today: NaiveDate,
) -> Result<OfferPayload, ExportError> {
    let client_id = intake
        .robaws_client_id
        .ok_or_else(|| ExportError::MissingClient(intake.id.clone()))?;

    let shipment = &data.shipment;
    let values: [(&str, Option<String>); 9] = [
        ("por", shipment.origin.clone()),
        ("pol", shipment.pol.clone()),
        ("pod", shipment.pod.clone()),
        ("destination", shipment.destination.clone()),
        ("cargo", cargo_description(data)),
        ("dimensions", data.vehicle.dimensions.map(|d| d.display())),
        ("customer_reference", shipment.customer_reference.clone()),
        ("contact", contact_line(data)),
        ("raw_json", serde_json::to_string(data).ok()),
    ];

    let mut extra_fields = BTreeMap::new();
    for (logical, value) in values {
        let (Some(code), Some(value)) = (config.field_code(logical), value) else {
            continue;
        };
        if value.trim().is_empty() {
            continue;
        }
        extra_fields.insert(code.to_string(), ExtraFieldValue { string_value: value });
    }

    let validity_date = Duration::try_days(config.validity_days)
        .and_then(|days| today.checked_add_signed(days))
        .ok_or(ExportError::InvalidValidity(config.validity_days))?;

    Ok(OfferPayload {
        client_id,
        contact_id: intake.robaws_contact_id,
        title: render_title(&config.title_template, data, intake),
        date: today.format("%Y-%m-%d").to_string(),
        validity_date: validity_date.format("%Y-%m-%d").to_string(),
        client_reference: shipment.customer_reference.clone(),
        extra_fields,
    })
}
