// FHIR resources → flattened summaries returned by the tools
//
// Absent source fields are omitted from the summary rather than emitted as null,
// except where a null carries meaning (no address, no observation value).

use serde_json::{json, Map, Value};

/// Build an object from `(key, value)` pairs, dropping `None`
fn object(fields: Vec<(&str, Option<Value>)>) -> Value {
    let map: Map<String, Value> = fields
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect();
    Value::Object(map)
}

fn field(resource: &Value, key: &str) -> Option<Value> {
    resource.get(key).filter(|v| !v.is_null()).cloned()
}

/// Non-empty string at a JSON pointer
fn text_at<'a>(resource: &'a Value, pointer: &str) -> Option<&'a str> {
    resource
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn text_value(value: Option<&str>) -> Option<Value> {
    value.map(|s| Value::String(s.to_string()))
}

/// Resources of a search Bundle, in entry order
pub fn bundle_resources(bundle: &Value) -> Vec<&Value> {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(|e| e.get("resource")).collect())
        .unwrap_or_default()
}

/// Bundle `total` when present and non-zero, otherwise `fallback`
pub fn bundle_total(bundle: &Value, fallback: usize) -> u64 {
    bundle
        .get("total")
        .and_then(Value::as_u64)
        .filter(|t| *t > 0)
        .unwrap_or(fallback as u64)
}

// ==================================================================================================
// Patient helpers
// ==================================================================================================

/// `"given1 given2 family"` from the first HumanName, or `Unknown` when there is none
pub fn format_patient_name(names: Option<&Value>) -> String {
    let first = match names.and_then(Value::as_array).and_then(|n| n.first()) {
        Some(first) => first,
        None => return "Unknown".to_string(),
    };

    let given = first
        .get("given")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let family = first.get("family").and_then(Value::as_str).unwrap_or("");

    format!("{} {}", given, family).trim().to_string()
}

/// Value of the first contact point with the given system
pub fn extract_telecom<'a>(telecom: Option<&'a Value>, system: &str) -> Option<&'a str> {
    telecom
        .and_then(Value::as_array)?
        .iter()
        .find(|t| t.get("system").and_then(Value::as_str) == Some(system))
        .and_then(|t| t.get("value"))
        .and_then(Value::as_str)
}

/// First address flattened, or `null`
pub fn format_address(addresses: Option<&Value>) -> Value {
    let addr = match addresses.and_then(Value::as_array).and_then(|a| a.first()) {
        Some(addr) => addr,
        None => return Value::Null,
    };

    let line = addr.get("line").and_then(Value::as_array).map(|lines| {
        Value::String(
            lines
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        )
    });

    object(vec![
        ("line", line),
        ("city", field(addr, "city")),
        ("state", field(addr, "state")),
        ("postalCode", field(addr, "postalCode")),
        ("country", field(addr, "country")),
    ])
}

pub fn extract_identifiers(identifiers: Option<&Value>) -> Value {
    let list = identifiers
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .map(|id| {
                    object(vec![
                        ("system", field(id, "system")),
                        ("value", field(id, "value")),
                        ("type", text_value(text_at(id, "/type/text"))),
                    ])
                })
                .collect()
        })
        .unwrap_or_default();
    Value::Array(list)
}

fn telecom_fields(patient: &Value) -> (Option<Value>, Option<Value>) {
    let telecom = patient.get("telecom");
    (
        text_value(extract_telecom(telecom, "phone")),
        text_value(extract_telecom(telecom, "email")),
    )
}

/// Row returned by patient search
pub fn summarize_patient(patient: &Value) -> Value {
    let (phone, email) = telecom_fields(patient);
    object(vec![
        ("id", field(patient, "id")),
        ("name", Some(json!(format_patient_name(patient.get("name"))))),
        ("birthDate", field(patient, "birthDate")),
        ("gender", field(patient, "gender")),
        ("phone", phone),
        ("email", email),
        ("address", Some(format_address(patient.get("address")))),
        ("identifier", Some(extract_identifiers(patient.get("identifier")))),
    ])
}

/// Full patient view returned by getPatientDetails
pub fn patient_details(patient: &Value) -> Value {
    let (phone, email) = telecom_fields(patient);

    let general_practitioner = patient
        .get("generalPractitioner")
        .and_then(Value::as_array)
        .map(|gps| {
            Value::Array(
                gps.iter()
                    .map(|gp| {
                        json!(text_at(gp, "/display").or_else(|| text_at(gp, "/reference")))
                    })
                    .collect(),
            )
        });

    let communication = patient
        .get("communication")
        .and_then(Value::as_array)
        .map(|comms| {
            Value::Array(
                comms
                    .iter()
                    .map(|c| {
                        json!(text_at(c, "/language/text")
                            .or_else(|| text_at(c, "/language/coding/0/display")))
                    })
                    .collect(),
            )
        });

    object(vec![
        ("id", field(patient, "id")),
        ("name", Some(json!(format_patient_name(patient.get("name"))))),
        ("birthDate", field(patient, "birthDate")),
        ("gender", field(patient, "gender")),
        ("maritalStatus", field(patient.get("maritalStatus").unwrap_or(&Value::Null), "text")),
        ("phone", phone),
        ("email", email),
        ("address", Some(format_address(patient.get("address")))),
        ("identifier", Some(extract_identifiers(patient.get("identifier")))),
        ("active", Some(json!(patient.get("active") != Some(&Value::Bool(false))))),
        ("generalPractitioner", general_practitioner),
        ("communication", communication),
    ])
}

// ==================================================================================================
// Clinical summaries
// ==================================================================================================

/// Quantity, string, boolean, coded text or components, in that order; `null` otherwise
pub fn format_observation_value(observation: &Value) -> Value {
    if let Some(quantity) = observation.get("valueQuantity").filter(|q| q.is_object()) {
        return object(vec![
            ("value", field(quantity, "value")),
            ("unit", field(quantity, "unit")),
        ]);
    }
    if let Some(text) = text_at(observation, "/valueString") {
        return json!(text);
    }
    if let Some(flag) = observation.get("valueBoolean").and_then(Value::as_bool) {
        return json!(flag);
    }
    if observation
        .get("valueCodeableConcept")
        .map_or(false, Value::is_object)
    {
        return field(&observation["valueCodeableConcept"], "text").unwrap_or(Value::Null);
    }

    let components = observation
        .get("component")
        .or_else(|| observation.get("components"))
        .and_then(Value::as_array);
    if let Some(components) = components {
        return Value::Array(
            components
                .iter()
                .map(|c| {
                    object(vec![
                        ("code", field(c.get("code").unwrap_or(&Value::Null), "text")),
                        ("value", c.pointer("/valueQuantity/value").cloned()),
                        ("unit", c.pointer("/valueQuantity/unit").cloned()),
                    ])
                })
                .collect(),
        );
    }

    Value::Null
}

fn display_or_reference(items: Option<&Value>) -> Option<Value> {
    items.and_then(Value::as_array).map(|list| {
        Value::Array(
            list.iter()
                .map(|p| json!(text_at(p, "/display").or_else(|| text_at(p, "/reference"))))
                .collect(),
        )
    })
}

fn code_summary(resource: &Value) -> Value {
    object(vec![
        ("text", resource.pointer("/code/text").cloned()),
        ("coding", resource.pointer("/code/coding/0").cloned()),
    ])
}

pub fn summarize_observation(observation: &Value) -> Value {
    let category = text_at(observation, "/category/0/coding/0/display")
        .or_else(|| text_at(observation, "/category/0/text"));

    object(vec![
        ("id", field(observation, "id")),
        ("status", field(observation, "status")),
        ("category", text_value(category)),
        ("code", Some(code_summary(observation))),
        ("value", Some(format_observation_value(observation))),
        ("effectiveDateTime", field(observation, "effectiveDateTime")),
        ("issued", field(observation, "issued")),
        ("performer", display_or_reference(observation.get("performer"))),
    ])
}

/// Medication name from the coded concept text, its first coding, or a reference display
pub fn medication_name(request: &Value) -> Option<&str> {
    text_at(request, "/medicationCodeableConcept/text")
        .or_else(|| text_at(request, "/medicationCodeableConcept/coding/0/display"))
        .or_else(|| text_at(request, "/medicationReference/display"))
}

pub fn summarize_medication_request(request: &Value) -> Value {
    let dosage = request
        .get("dosageInstruction")
        .and_then(Value::as_array)
        .map(|doses| {
            Value::Array(
                doses
                    .iter()
                    .map(|dose| {
                        object(vec![
                            ("text", field(dose, "text")),
                            ("route", dose.pointer("/route/text").cloned()),
                            ("timing", dose.pointer("/timing/repeat").cloned()),
                        ])
                    })
                    .collect(),
            )
        });

    object(vec![
        ("id", field(request, "id")),
        ("status", field(request, "status")),
        ("medication", text_value(medication_name(request))),
        ("dosage", dosage),
        ("authoredOn", field(request, "authoredOn")),
        ("requester", request.pointer("/requester/display").cloned()),
    ])
}

pub fn summarize_condition(condition: &Value) -> Value {
    object(vec![
        ("id", field(condition, "id")),
        ("clinicalStatus", condition.pointer("/clinicalStatus/coding/0/code").cloned()),
        (
            "verificationStatus",
            condition.pointer("/verificationStatus/coding/0/code").cloned(),
        ),
        ("code", Some(code_summary(condition))),
        ("onsetDateTime", field(condition, "onsetDateTime")),
        ("recordedDate", field(condition, "recordedDate")),
        ("recorder", condition.pointer("/recorder/display").cloned()),
    ])
}

pub fn summarize_encounter(encounter: &Value) -> Value {
    let class = text_at(encounter, "/class/display").or_else(|| text_at(encounter, "/class/code"));
    let kind = text_at(encounter, "/type/0/text")
        .or_else(|| text_at(encounter, "/type/0/coding/0/display"));

    let participant = encounter
        .get("participant")
        .and_then(Value::as_array)
        .map(|list| {
            Value::Array(
                list.iter()
                    .map(|p| {
                        object(vec![
                            ("type", p.pointer("/type/0/text").cloned()),
                            ("individual", p.pointer("/individual/display").cloned()),
                        ])
                    })
                    .collect(),
            )
        });

    object(vec![
        ("id", field(encounter, "id")),
        ("status", field(encounter, "status")),
        ("class", text_value(class)),
        ("type", text_value(kind)),
        (
            "period",
            Some(object(vec![
                ("start", encounter.pointer("/period/start").cloned()),
                ("end", encounter.pointer("/period/end").cloned()),
            ])),
        ),
        ("reasonCode", encounter.pointer("/reasonCode/0/text").cloned()),
        ("participant", participant),
    ])
}
