//! Field reconciliation.
//!
//! The extractor returns a loosely-structured JSON object whose keys may be
//! German (`Rechnungsnummer`), English (`invoice_number`), a synonym
//! (`invoice_id`), or buried in a nested sub-object. `reconcile` folds all
//! of that into one [`CanonicalInvoiceRecord`], which is the only shape the
//! rest of the pipeline ever sees. The record serializes with BOTH key
//! vocabularies populated so older consumers reading German keys and newer
//! ones reading English keys always agree.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// The untrusted field bag produced by the extractor. Never passes the
/// reconciliation boundary; persisted only as an audit blob.
pub type RawExtraction = Map<String, Value>;

/// One canonical concept with its paired keys and the ordered list of
/// source-field names accepted for it. The first name in `sources` is the
/// canonical English key, the second the German one; the rest are synonyms
/// in decreasing priority.
struct Concept {
    english: &'static str,
    german: &'static str,
    sources: &'static [&'static str],
}

const CONCEPTS: [Concept; 7] = [
    Concept {
        english: "supplier_name",
        german: "Lieferantename",
        sources: &["supplier_name", "Lieferantename", "vendor_name", "supplier", "vendor"],
    },
    Concept {
        english: "company_name",
        german: "Empfängerfirma",
        sources: &["company_name", "Empfängerfirma", "recipient", "company"],
    },
    Concept {
        english: "invoice_number",
        german: "Rechnungsnummer",
        sources: &["invoice_number", "Rechnungsnummer", "invoice_id", "invoice #", "invoice_no"],
    },
    Concept {
        english: "invoice_date",
        german: "Rechnungsdatum",
        sources: &["invoice_date", "Rechnungsdatum", "date", "invoice_dt"],
    },
    Concept {
        english: "amount",
        german: "Gesamtbetrag",
        sources: &["amount", "Gesamtbetrag", "total_amount", "total", "invoice_amount", "gross_amount"],
    },
    Concept {
        english: "vat_amount",
        german: "Mehrwertsteuerbetrag",
        sources: &["vat_amount", "Mehrwertsteuerbetrag", "tax_amount", "vat", "tax", "sales_tax"],
    },
    Concept {
        english: "description",
        german: "Leistungsbeschreibung",
        sources: &["description", "Leistungsbeschreibung", "details", "service_description", "invoice_description"],
    },
];

/// Keys under which extractors conventionally nest their payload.
const NESTED_KEYS: [&str; 2] = ["invoice_data", "data"];

/// The reconciled invoice. One field per concept; the German mirror keys
/// exist only in the serialized form, so the bidirectional-sync invariant
/// holds structurally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalInvoiceRecord {
    pub supplier_name: String,
    pub company_name: String,
    pub invoice_number: String,
    pub invoice_date: String,
    /// Locale amount string as extracted (e.g. `"1.234,56 EUR"`), not yet
    /// numeric.
    pub amount: String,
    pub vat_amount: String,
    pub description: String,
}

impl CanonicalInvoiceRecord {
    fn field(&self, english: &str) -> &str {
        match english {
            "supplier_name" => &self.supplier_name,
            "company_name" => &self.company_name,
            "invoice_number" => &self.invoice_number,
            "invoice_date" => &self.invoice_date,
            "amount" => &self.amount,
            "vat_amount" => &self.vat_amount,
            "description" => &self.description,
            _ => "",
        }
    }

    fn set_field(&mut self, english: &str, value: String) {
        match english {
            "supplier_name" => self.supplier_name = value,
            "company_name" => self.company_name = value,
            "invoice_number" => self.invoice_number = value,
            "invoice_date" => self.invoice_date = value,
            "amount" => self.amount = value,
            "vat_amount" => self.vat_amount = value,
            "description" => self.description = value,
            _ => {}
        }
    }

    /// The record as a JSON object carrying both key vocabularies, the
    /// wire form consumed by the web layer and the validation UI.
    pub fn to_field_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for concept in &CONCEPTS {
            let value = Value::String(self.field(concept.english).to_string());
            map.insert(concept.english.to_string(), value.clone());
            map.insert(concept.german.to_string(), value);
        }
        map
    }
}

impl Serialize for CanonicalInvoiceRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(CONCEPTS.len() * 2))?;
        for concept in &CONCEPTS {
            let value = self.field(concept.english);
            map.serialize_entry(concept.english, value)?;
            map.serialize_entry(concept.german, value)?;
        }
        map.end()
    }
}

/// A scalar usable as a field value. Objects are handled as nested
/// sources, everything else (arrays, booleans, null) is ignored, so the
/// extractor's `success`/`error` bookkeeping can never become a field.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Candidate data sources in priority order: the raw object itself, then
/// any nested payload objects.
fn candidate_sources(raw: &RawExtraction) -> Vec<&RawExtraction> {
    let mut sources = vec![raw];
    for key in NESTED_KEYS {
        if let Some(Value::Object(nested)) = raw.get(key) {
            sources.push(nested);
        }
    }
    sources
}

fn flatten_into(map: &RawExtraction, prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, value) in map {
        match value {
            Value::Object(nested) => flatten_into(nested, &format!("{prefix}{key}_"), out),
            other => {
                if let Some(s) = scalar(other) {
                    out.push((format!("{prefix}{key}"), s));
                }
            }
        }
    }
}

/// Merge a raw extraction into one canonical record.
///
/// Pass 1 scans candidate sources in priority order, and within each
/// source the synonym list in priority order; the first non-empty value
/// wins and is never overwritten. Pass 2, only for concepts still empty,
/// flattens all sources (nested keys joined with `_`) and matches each
/// synonym case-insensitively as a substring of the flattened key names.
///
/// Sentinel strings ("Nicht gefunden", "Unknown", ...) count as resolved
/// values and are preserved verbatim; downstream consumers decide how to
/// treat them.
pub fn reconcile(raw: &RawExtraction) -> CanonicalInvoiceRecord {
    let sources = candidate_sources(raw);
    let mut record = CanonicalInvoiceRecord::default();

    for concept in &CONCEPTS {
        'resolved: for source in &sources {
            for name in concept.sources {
                if let Some(value) = source.get(*name).and_then(scalar) {
                    if !value.is_empty() {
                        record.set_field(concept.english, value);
                        break 'resolved;
                    }
                }
            }
        }
    }

    // Lower-precision fallback over flattened keys, only for what pass 1
    // left empty.
    let mut flat = Vec::new();
    for source in &sources {
        flatten_into(source, "", &mut flat);
    }

    for concept in &CONCEPTS {
        if !record.field(concept.english).is_empty() {
            continue;
        }
        'resolved: for (key, value) in &flat {
            let key_lower = key.to_lowercase();
            for name in concept.sources {
                if key_lower.contains(&name.to_lowercase()) && !value.is_empty() {
                    record.set_field(concept.english, value.clone());
                    break 'resolved;
                }
            }
        }
    }

    record
}
