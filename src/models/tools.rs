// Typed arguments for each FHIR tool
//
// Field names follow the JSON schemas advertised by tools/list. FHIR search
// parameters that start with an underscore keep their wire name.

use serde::{Deserialize, Deserializer};
use serde_json::{Number, Value};

/// Accept `_count` as a number or numeric string. Anything that is not a
/// positive count becomes `None` so the search falls back to its default.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(count_from_value))
}

fn count_from_value(value: &Value) -> Option<u32> {
    let count = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (count.is_finite() && count >= 1.0).then(|| count.min(u32::MAX as f64) as u32)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPatientsArgs {
    pub name: Option<String>,
    pub given: Option<String>,
    pub family: Option<String>,
    pub birthdate: Option<String>,
    pub gender: Option<String>,
    pub identifier: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "_count", default, deserialize_with = "lenient_count")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientIdArgs {
    pub patient_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressArgs {
    pub line: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePatientArgs {
    pub given: String,
    pub family: String,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<AddressArgs>,
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientArgs {
    pub patient_id: String,
    pub given: Option<String>,
    pub family: Option<String>,
    pub birth_date: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationSearchArgs {
    pub patient_id: String,
    pub category: Option<String>,
    pub code: Option<String>,
    pub date: Option<String>,
    #[serde(rename = "_count", default, deserialize_with = "lenient_count")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateObservationArgs {
    pub patient_id: String,
    pub code: String,
    pub display: String,
    pub value: Number,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub effective_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationSearchArgs {
    pub patient_id: String,
    pub status: Option<String>,
    #[serde(rename = "_count", default, deserialize_with = "lenient_count")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMedicationRequestArgs {
    pub patient_id: String,
    pub medication: String,
    pub dosage_text: String,
    pub quantity: Option<Number>,
    pub refills: Option<u32>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSearchArgs {
    pub patient_id: String,
    pub clinical_status: Option<String>,
    #[serde(rename = "_count", default, deserialize_with = "lenient_count")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConditionArgs {
    pub patient_id: String,
    pub code: Option<String>,
    pub display: String,
    pub clinical_status: Option<String>,
    pub onset_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterSearchArgs {
    pub patient_id: String,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub encounter_type: Option<String>,
    #[serde(rename = "_count", default, deserialize_with = "lenient_count")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEncounterArgs {
    pub patient_id: String,
    pub status: String,
    pub class: String,
    #[serde(rename = "type")]
    pub encounter_type: Option<String>,
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
    pub reason_code: Option<String>,
}

/// Arguments that name a patient
pub trait PatientScoped {
    fn patient_id(&self) -> &str;
}

macro_rules! patient_scoped {
    ($($ty:ty),* $(,)?) => {
        $(impl PatientScoped for $ty {
            fn patient_id(&self) -> &str {
                &self.patient_id
            }
        })*
    };
}

patient_scoped!(
    PatientIdArgs,
    UpdatePatientArgs,
    ObservationSearchArgs,
    CreateObservationArgs,
    MedicationSearchArgs,
    CreateMedicationRequestArgs,
    ConditionSearchArgs,
    CreateConditionArgs,
    EncounterSearchArgs,
    CreateEncounterArgs,
);
