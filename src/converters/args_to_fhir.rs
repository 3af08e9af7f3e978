// Tool arguments → FHIR resources and search parameters
//
// Optional string arguments are only applied when non-empty, so an empty
// field in a tool call never clears or filters anything upstream.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use crate::error::{FhirError, Result};
use crate::models::tools::{
    ConditionSearchArgs, CreateConditionArgs, CreateEncounterArgs, CreateMedicationRequestArgs,
    CreateObservationArgs, CreatePatientArgs, EncounterSearchArgs, MedicationSearchArgs,
    ObservationSearchArgs, SearchPatientsArgs, UpdatePatientArgs,
};

/// Page size used when a search omits `_count` (or passes 0)
pub const DEFAULT_SEARCH_COUNT: u32 = 20;

pub const MRN_SYSTEM: &str = "http://hospital.local/mrn";
pub const LOINC_SYSTEM: &str = "http://loinc.org";
pub const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";
pub const OBSERVATION_CATEGORY_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/observation-category";
pub const CONDITION_CLINICAL_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/condition-clinical";
pub const ICD10_SYSTEM: &str = "http://hl7.org/fhir/sid/icd-10";
pub const ACT_CODE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActCode";

/// ISO-8601 UTC timestamp with millisecond precision (`2024-01-01T00:00:00.000Z`)
pub fn fhir_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn patient_reference(patient_id: &str) -> Value {
    json!({ "reference": format!("Patient/{}", patient_id) })
}

// ==================================================================================================
// Search parameters
// ==================================================================================================

/// Ordered FHIR search query pairs
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SearchParams(Vec<(String, String)>);

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.push((key.to_string(), value.into()));
        self
    }

    pub fn push_opt(self, key: &str, value: &Option<String>) -> Self {
        match non_empty(value) {
            Some(v) => self.push(key, v),
            None => self,
        }
    }

    pub fn count(self, count: Option<u32>) -> Self {
        let count = count.filter(|c| *c > 0).unwrap_or(DEFAULT_SEARCH_COUNT);
        self.push("_count", count.to_string())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }
}

pub fn patient_search_params(args: &SearchPatientsArgs) -> SearchParams {
    SearchParams::new()
        .push_opt("name", &args.name)
        .push_opt("given", &args.given)
        .push_opt("family", &args.family)
        .push_opt("birthdate", &args.birthdate)
        .push_opt("gender", &args.gender)
        .push_opt("identifier", &args.identifier)
        .push_opt("phone", &args.phone)
        .push_opt("email", &args.email)
        .count(args.count)
}

pub fn observation_search_params(args: &ObservationSearchArgs) -> SearchParams {
    SearchParams::new()
        .push("patient", args.patient_id.as_str())
        .push("_sort", "-date")
        .count(args.count)
        .push_opt("category", &args.category)
        .push_opt("code", &args.code)
        .push_opt("date", &args.date)
}

pub fn medication_search_params(args: &MedicationSearchArgs) -> SearchParams {
    SearchParams::new()
        .push("patient", args.patient_id.as_str())
        .push("_sort", "-_lastUpdated")
        .count(args.count)
        .push_opt("status", &args.status)
}

pub fn condition_search_params(args: &ConditionSearchArgs) -> SearchParams {
    SearchParams::new()
        .push("patient", args.patient_id.as_str())
        .push("_sort", "-onset-date")
        .count(args.count)
        .push_opt("clinical-status", &args.clinical_status)
}

pub fn encounter_search_params(args: &EncounterSearchArgs) -> SearchParams {
    SearchParams::new()
        .push("patient", args.patient_id.as_str())
        .push("_sort", "-date")
        .count(args.count)
        .push_opt("status", &args.status)
        .push_opt("type", &args.encounter_type)
}

// ==================================================================================================
// Patient
// ==================================================================================================

pub fn build_patient(args: &CreatePatientArgs) -> Value {
    let mut patient = json!({
        "resourceType": "Patient",
        "active": true,
        "name": [{
            "given": [args.given],
            "family": args.family,
        }],
    });

    if let Some(birth_date) = non_empty(&args.birth_date) {
        patient["birthDate"] = json!(birth_date);
    }
    if let Some(gender) = non_empty(&args.gender) {
        patient["gender"] = json!(gender);
    }

    let mut telecom = Vec::new();
    if let Some(phone) = non_empty(&args.phone) {
        telecom.push(json!({ "system": "phone", "value": phone, "use": "home" }));
    }
    if let Some(email) = non_empty(&args.email) {
        telecom.push(json!({ "system": "email", "value": email }));
    }
    if !telecom.is_empty() {
        patient["telecom"] = Value::Array(telecom);
    }

    if let Some(address) = &args.address {
        let mut addr = Map::new();
        if let Some(line) = non_empty(&address.line) {
            addr.insert("line".to_string(), json!([line]));
        }
        for (key, value) in [
            ("city", &address.city),
            ("state", &address.state),
            ("postalCode", &address.postal_code),
            ("country", &address.country),
        ] {
            if let Some(v) = value {
                addr.insert(key.to_string(), json!(v));
            }
        }
        patient["address"] = json!([addr]);
    }

    if let Some(identifier) = non_empty(&args.identifier) {
        patient["identifier"] = json!([{ "system": MRN_SYSTEM, "value": identifier }]);
    }

    patient
}

/// Merge an update into a fetched Patient. Phone and email replace the first
/// contact point with the same system, or are appended when none exists.
pub fn apply_patient_update(existing: &mut Value, args: &UpdatePatientArgs) -> Result<()> {
    let patient = existing.as_object_mut().ok_or_else(|| {
        FhirError::Internal(anyhow::anyhow!(
            "Patient/{} is not a JSON object",
            args.patient_id
        ))
    })?;

    let given = non_empty(&args.given);
    let family = non_empty(&args.family);
    if given.is_some() || family.is_some() {
        let names = patient
            .entry("name")
            .or_insert_with(|| json!([{}]));
        if !names.is_array() {
            *names = json!([{}]);
        }
        if let Some(list) = names.as_array_mut() {
            if list.is_empty() || !list[0].is_object() {
                list.insert(0, json!({}));
            }
            if let Some(first) = list[0].as_object_mut() {
                if let Some(given) = given {
                    first.insert("given".to_string(), json!([given]));
                }
                if let Some(family) = family {
                    first.insert("family".to_string(), json!(family));
                }
            }
        }
    }

    if let Some(birth_date) = &args.birth_date {
        patient.insert("birthDate".to_string(), json!(birth_date));
    }
    if let Some(gender) = &args.gender {
        patient.insert("gender".to_string(), json!(gender));
    }
    if let Some(active) = args.active {
        patient.insert("active".to_string(), json!(active));
    }

    let phone = non_empty(&args.phone);
    let email = non_empty(&args.email);
    if phone.is_some() || email.is_some() {
        let telecom = patient.entry("telecom").or_insert_with(|| json!([]));
        if !telecom.is_array() {
            *telecom = json!([]);
        }
        if let Some(list) = telecom.as_array_mut() {
            if let Some(phone) = phone {
                upsert_contact_point(list, "phone", phone);
            }
            if let Some(email) = email {
                upsert_contact_point(list, "email", email);
            }
        }
    }

    Ok(())
}

fn upsert_contact_point(telecom: &mut Vec<Value>, system: &str, value: &str) {
    match telecom
        .iter_mut()
        .find(|t| t.get("system").and_then(Value::as_str) == Some(system))
    {
        Some(existing) => existing["value"] = json!(value),
        None => telecom.push(json!({ "system": system, "value": value })),
    }
}

// ==================================================================================================
// Clinical resources
// ==================================================================================================

pub fn build_observation(args: &CreateObservationArgs, now: DateTime<Utc>) -> Value {
    let mut observation = json!({
        "resourceType": "Observation",
        "status": "final",
        "subject": patient_reference(&args.patient_id),
        "code": {
            "coding": [{
                "system": LOINC_SYSTEM,
                "code": args.code,
                "display": args.display,
            }],
            "text": args.display,
        },
    });

    if let Some(category) = non_empty(&args.category) {
        observation["category"] = json!([{
            "coding": [{
                "system": OBSERVATION_CATEGORY_SYSTEM,
                "code": category,
                "display": category,
            }]
        }]);
    }

    if let Some(unit) = non_empty(&args.unit) {
        observation["valueQuantity"] = json!({
            "value": args.value,
            "unit": unit,
            "system": UCUM_SYSTEM,
            "code": unit,
        });
    }

    observation["effectiveDateTime"] = json!(non_empty(&args.effective_date_time)
        .map(str::to_string)
        .unwrap_or_else(|| fhir_timestamp(now)));

    observation
}

pub fn build_medication_request(args: &CreateMedicationRequestArgs, now: DateTime<Utc>) -> Value {
    let mut request = json!({
        "resourceType": "MedicationRequest",
        "status": non_empty(&args.status).unwrap_or("active"),
        "intent": "order",
        "subject": patient_reference(&args.patient_id),
        "medicationCodeableConcept": { "text": args.medication },
        "dosageInstruction": [{ "text": args.dosage_text }],
        "authoredOn": fhir_timestamp(now),
    });

    let quantity = args
        .quantity
        .as_ref()
        .filter(|q| q.as_f64().map_or(false, |v| v != 0.0));
    if let Some(quantity) = quantity {
        let mut dispense = json!({ "quantity": { "value": quantity } });
        if let Some(refills) = args.refills {
            dispense["numberOfRepeatsAllowed"] = json!(refills);
        }
        request["dispenseRequest"] = dispense;
    }

    request
}

pub fn build_condition(args: &CreateConditionArgs, now: DateTime<Utc>) -> Value {
    let mut condition = json!({
        "resourceType": "Condition",
        "subject": patient_reference(&args.patient_id),
        "code": { "text": args.display },
        "clinicalStatus": {
            "coding": [{
                "system": CONDITION_CLINICAL_SYSTEM,
                "code": non_empty(&args.clinical_status).unwrap_or("active"),
            }]
        },
        "recordedDate": fhir_timestamp(now),
    });

    if let Some(code) = non_empty(&args.code) {
        condition["code"]["coding"] = json!([{
            "system": ICD10_SYSTEM,
            "code": code,
            "display": args.display,
        }]);
    }

    if let Some(onset) = non_empty(&args.onset_date_time) {
        condition["onsetDateTime"] = json!(onset);
    }

    condition
}

pub fn build_encounter(args: &CreateEncounterArgs) -> Value {
    let mut encounter = json!({
        "resourceType": "Encounter",
        "status": args.status,
        "class": {
            "system": ACT_CODE_SYSTEM,
            "code": args.class,
            "display": args.class,
        },
        "subject": patient_reference(&args.patient_id),
    });

    if let Some(kind) = non_empty(&args.encounter_type) {
        encounter["type"] = json!([{ "text": kind }]);
    }

    if let Some(period) = encounter_period(args) {
        encounter["period"] = period;
    }

    if let Some(reason) = non_empty(&args.reason_code) {
        encounter["reasonCode"] = json!([{ "text": reason }]);
    }

    encounter
}

/// `period` for a new Encounter, present only when a start or end was given
pub fn encounter_period(args: &CreateEncounterArgs) -> Option<Value> {
    let start = non_empty(&args.start_date_time);
    let end = non_empty(&args.end_date_time);
    if start.is_none() && end.is_none() {
        return None;
    }

    let mut period = Map::new();
    if let Some(start) = start {
        period.insert("start".to_string(), json!(start));
    }
    if let Some(end) = end {
        period.insert("end".to_string(), json!(end));
    }
    Some(Value::Object(period))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tools::AddressArgs;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    fn update_args(patient_id: &str) -> UpdatePatientArgs {
        UpdatePatientArgs {
            patient_id: patient_id.to_string(),
            given: None,
            family: None,
            birth_date: None,
            gender: None,
            phone: None,
            email: None,
            active: None,
        }
    }

    #[test]
    fn test_fhir_timestamp_format() {
        assert_eq!(fhir_timestamp(now()), "2024-03-01T09:30:00.000Z");
    }

    #[test]
    fn test_patient_search_defaults_count_and_skips_empty() {
        let args = SearchPatientsArgs {
            family: Some("Smith".to_string()),
            given: Some(String::new()),
            ..Default::default()
        };
        let params = patient_search_params(&args);
        assert_eq!(params.get("family"), Some("Smith"));
        assert_eq!(params.get("given"), None);
        assert_eq!(params.get("_count"), Some("20"));

        let args = SearchPatientsArgs {
            count: Some(0),
            ..Default::default()
        };
        assert_eq!(patient_search_params(&args).get("_count"), Some("20"));
    }

    #[test]
    fn test_clinical_search_params() {
        let params = condition_search_params(&ConditionSearchArgs {
            patient_id: "pt-1".to_string(),
            clinical_status: Some("active".to_string()),
            count: Some(5),
        });
        assert_eq!(params.get("patient"), Some("pt-1"));
        assert_eq!(params.get("_sort"), Some("-onset-date"));
        assert_eq!(params.get("clinical-status"), Some("active"));
        assert_eq!(params.get("_count"), Some("5"));

        let params = medication_search_params(&MedicationSearchArgs {
            patient_id: "pt-1".to_string(),
            status: None,
            count: None,
        });
        assert_eq!(params.get("_sort"), Some("-_lastUpdated"));
        assert_eq!(params.get("status"), None);
    }

    #[test]
    fn test_build_patient_full() {
        let args = CreatePatientArgs {
            given: "John".to_string(),
            family: "Doe".to_string(),
            birth_date: Some("1980-05-17".to_string()),
            gender: Some("male".to_string()),
            phone: Some("555-0100".to_string()),
            email: Some("john@example.com".to_string()),
            address: Some(AddressArgs {
                line: Some("1 Main St".to_string()),
                city: Some("Springfield".to_string()),
                ..Default::default()
            }),
            identifier: Some("MRN-42".to_string()),
        };

        let patient = build_patient(&args);
        assert_eq!(patient["resourceType"], "Patient");
        assert_eq!(patient["active"], true);
        assert_eq!(patient["name"][0]["given"], json!(["John"]));
        assert_eq!(patient["telecom"][0], json!({"system": "phone", "value": "555-0100", "use": "home"}));
        assert_eq!(patient["telecom"][1], json!({"system": "email", "value": "john@example.com"}));
        assert_eq!(patient["address"][0], json!({"line": ["1 Main St"], "city": "Springfield"}));
        assert_eq!(patient["identifier"][0]["system"], MRN_SYSTEM);
    }

    #[test]
    fn test_build_patient_minimal_omits_optional_sections() {
        let args = CreatePatientArgs {
            given: "Jane".to_string(),
            family: "Roe".to_string(),
            birth_date: None,
            gender: None,
            phone: None,
            email: None,
            address: None,
            identifier: None,
        };
        let patient = build_patient(&args);
        assert!(patient.get("telecom").is_none());
        assert!(patient.get("address").is_none());
        assert!(patient.get("identifier").is_none());
    }

    #[test]
    fn test_apply_patient_update_upserts_telecom() {
        let mut existing = json!({
            "resourceType": "Patient",
            "id": "pt-1",
            "name": [{"given": ["John"], "family": "Doe"}],
            "telecom": [{"system": "phone", "value": "old", "use": "home"}]
        });
        let mut args = update_args("pt-1");
        args.family = Some("Smith".to_string());
        args.phone = Some("555-0199".to_string());
        args.email = Some("j@example.com".to_string());
        args.active = Some(false);

        apply_patient_update(&mut existing, &args).unwrap();

        assert_eq!(existing["name"][0]["given"], json!(["John"]));
        assert_eq!(existing["name"][0]["family"], "Smith");
        assert_eq!(existing["telecom"][0], json!({"system": "phone", "value": "555-0199", "use": "home"}));
        assert_eq!(existing["telecom"][1], json!({"system": "email", "value": "j@example.com"}));
        assert_eq!(existing["active"], false);
    }

    #[test]
    fn test_apply_patient_update_creates_missing_name() {
        let mut existing = json!({"resourceType": "Patient", "id": "pt-1", "name": []});
        let mut args = update_args("pt-1");
        args.given = Some("Ann".to_string());

        apply_patient_update(&mut existing, &args).unwrap();
        assert_eq!(existing["name"][0], json!({"given": ["Ann"]}));
    }

    #[test]
    fn test_build_observation_with_quantity() {
        let args = CreateObservationArgs {
            patient_id: "pt-1".to_string(),
            code: "8867-4".to_string(),
            display: "Heart rate".to_string(),
            value: serde_json::Number::from(72),
            unit: Some("beats/min".to_string()),
            category: Some("vital-signs".to_string()),
            effective_date_time: None,
        };
        let obs = build_observation(&args, now());

        assert_eq!(obs["subject"]["reference"], "Patient/pt-1");
        assert_eq!(obs["code"]["coding"][0]["system"], LOINC_SYSTEM);
        assert_eq!(obs["category"][0]["coding"][0]["code"], "vital-signs");
        assert_eq!(obs["valueQuantity"]["value"], 72);
        assert_eq!(obs["valueQuantity"]["code"], "beats/min");
        assert_eq!(obs["effectiveDateTime"], "2024-03-01T09:30:00.000Z");
    }

    #[test]
    fn test_build_observation_without_unit_has_no_value() {
        let args = CreateObservationArgs {
            patient_id: "pt-1".to_string(),
            code: "72166-2".to_string(),
            display: "Smoking status".to_string(),
            value: serde_json::Number::from(1),
            unit: None,
            category: None,
            effective_date_time: Some("2024-01-01T00:00:00Z".to_string()),
        };
        let obs = build_observation(&args, now());
        assert!(obs.get("valueQuantity").is_none());
        assert!(obs.get("category").is_none());
        assert_eq!(obs["effectiveDateTime"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_build_medication_request_dispense() {
        let mut args = CreateMedicationRequestArgs {
            patient_id: "pt-1".to_string(),
            medication: "Lisinopril 10mg".to_string(),
            dosage_text: "Take 1 tablet by mouth daily".to_string(),
            quantity: Some(serde_json::Number::from(30)),
            refills: Some(2),
            status: None,
        };
        let request = build_medication_request(&args, now());
        assert_eq!(request["status"], "active");
        assert_eq!(request["intent"], "order");
        assert_eq!(request["dispenseRequest"]["quantity"]["value"], 30);
        assert_eq!(request["dispenseRequest"]["numberOfRepeatsAllowed"], 2);

        args.quantity = Some(serde_json::Number::from(0));
        let request = build_medication_request(&args, now());
        assert!(request.get("dispenseRequest").is_none());
    }

    #[test]
    fn test_build_condition_coding() {
        let args = CreateConditionArgs {
            patient_id: "pt-1".to_string(),
            code: Some("E11.9".to_string()),
            display: "Type 2 diabetes".to_string(),
            clinical_status: None,
            onset_date_time: Some("2020-06-01".to_string()),
        };
        let condition = build_condition(&args, now());
        assert_eq!(condition["clinicalStatus"]["coding"][0]["code"], "active");
        assert_eq!(condition["code"]["coding"][0]["system"], ICD10_SYSTEM);
        assert_eq!(condition["code"]["text"], "Type 2 diabetes");
        assert_eq!(condition["onsetDateTime"], "2020-06-01");
        assert_eq!(condition["recordedDate"], "2024-03-01T09:30:00.000Z");
    }

    #[test]
    fn test_build_encounter_period() {
        let args = CreateEncounterArgs {
            patient_id: "pt-1".to_string(),
            status: "finished".to_string(),
            class: "ambulatory".to_string(),
            encounter_type: Some("Routine checkup".to_string()),
            start_date_time: Some("2024-03-01T09:00:00Z".to_string()),
            end_date_time: None,
            reason_code: Some("Annual physical".to_string()),
        };
        let encounter = build_encounter(&args);
        assert_eq!(encounter["class"]["system"], ACT_CODE_SYSTEM);
        assert_eq!(encounter["class"]["code"], "ambulatory");
        assert_eq!(encounter["period"], json!({"start": "2024-03-01T09:00:00Z"}));
        assert_eq!(encounter["type"][0]["text"], "Routine checkup");
        assert_eq!(encounter["reasonCode"][0]["text"], "Annual physical");
    }
}
