// Tool catalogue advertised by tools/list

use serde_json::{json, Value};

use super::FhirTool;
use crate::models::mcp::Tool;

const GENDERS: [&str; 4] = ["male", "female", "other", "unknown"];
const ENCOUNTER_STATUSES: [&str; 4] = ["planned", "arrived", "in-progress", "finished"];

fn patient_id_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn count_property() -> Value {
    json!({ "type": "integer", "description": "Maximum number of results (default: 20)" })
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    let mut schema = json!({ "type": "object", "properties": properties });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// Description and input schema for a tool
pub fn tool_definition(tool: FhirTool) -> Tool {
    let (description, input_schema) = match tool {
        FhirTool::SearchPatients => (
            "Search for patients in Aidbox by name, birthdate, identifier, or other criteria",
            object_schema(
                json!({
                    "name": { "type": "string", "description": "Patient name (first and/or last name)" },
                    "given": { "type": "string", "description": "Patient first/given name" },
                    "family": { "type": "string", "description": "Patient last/family name" },
                    "birthdate": { "type": "string", "description": "Patient birth date (YYYY-MM-DD)" },
                    "gender": { "type": "string", "enum": GENDERS },
                    "identifier": { "type": "string", "description": "Patient identifier (MRN, SSN, etc.)" },
                    "phone": { "type": "string", "description": "Patient phone number" },
                    "email": { "type": "string", "description": "Patient email address" },
                    "_count": count_property()
                }),
                &[],
            ),
        ),
        FhirTool::GetPatientDetails => (
            "Get detailed information for a specific patient by ID",
            object_schema(
                json!({ "patientId": patient_id_property("Aidbox Patient ID") }),
                &["patientId"],
            ),
        ),
        FhirTool::CreatePatient => (
            "Create a new patient in Aidbox",
            object_schema(
                json!({
                    "given": { "type": "string", "description": "Patient first/given name" },
                    "family": { "type": "string", "description": "Patient last/family name" },
                    "birthDate": { "type": "string", "description": "Birth date (YYYY-MM-DD)" },
                    "gender": { "type": "string", "enum": GENDERS },
                    "phone": { "type": "string", "description": "Phone number" },
                    "email": { "type": "string", "description": "Email address" },
                    "address": {
                        "type": "object",
                        "properties": {
                            "line": { "type": "string" },
                            "city": { "type": "string" },
                            "state": { "type": "string" },
                            "postalCode": { "type": "string" },
                            "country": { "type": "string" }
                        }
                    },
                    "identifier": { "type": "string", "description": "Patient identifier (MRN, etc.)" }
                }),
                &["given", "family"],
            ),
        ),
        FhirTool::UpdatePatient => (
            "Update existing patient information",
            object_schema(
                json!({
                    "patientId": patient_id_property("Patient ID to update"),
                    "given": { "type": "string" },
                    "family": { "type": "string" },
                    "birthDate": { "type": "string" },
                    "gender": { "type": "string", "enum": GENDERS },
                    "phone": { "type": "string" },
                    "email": { "type": "string" },
                    "active": { "type": "boolean" }
                }),
                &["patientId"],
            ),
        ),
        FhirTool::GetPatientObservations => (
            "Get lab results, vital signs, and other observations for a patient",
            object_schema(
                json!({
                    "patientId": patient_id_property("Patient ID"),
                    "category": {
                        "type": "string",
                        "enum": ["vital-signs", "laboratory", "exam", "survey", "imaging"],
                        "description": "Type of observations to retrieve"
                    },
                    "code": { "type": "string", "description": "Specific observation code (LOINC)" },
                    "date": { "type": "string", "description": "Date range (e.g., ge2023-01-01)" },
                    "_count": count_property()
                }),
                &["patientId"],
            ),
        ),
        FhirTool::CreateObservation => (
            "Create a new observation (lab result, vital sign, etc.)",
            object_schema(
                json!({
                    "patientId": patient_id_property("Patient ID"),
                    "code": { "type": "string", "description": "LOINC code for the observation" },
                    "display": { "type": "string", "description": "Display name for the observation" },
                    "value": { "type": "number", "description": "Numeric value" },
                    "unit": { "type": "string", "description": "Unit of measurement" },
                    "category": {
                        "type": "string",
                        "enum": ["vital-signs", "laboratory", "exam", "survey"],
                        "description": "Observation category"
                    },
                    "effectiveDateTime": {
                        "type": "string",
                        "description": "When the observation was taken (ISO datetime)"
                    }
                }),
                &["patientId", "code", "display", "value"],
            ),
        ),
        FhirTool::GetPatientMedications => (
            "Get current and past medications for a patient",
            object_schema(
                json!({
                    "patientId": patient_id_property("Patient ID"),
                    "status": {
                        "type": "string",
                        "enum": ["active", "completed", "stopped", "on-hold"],
                        "description": "Medication status filter"
                    },
                    "_count": count_property()
                }),
                &["patientId"],
            ),
        ),
        FhirTool::CreateMedicationRequest => (
            "Create a new medication request/prescription",
            object_schema(
                json!({
                    "patientId": patient_id_property("Patient ID"),
                    "medication": { "type": "string", "description": "Medication name" },
                    "dosageText": {
                        "type": "string",
                        "description": "Dosage instructions (e.g., \"Take 1 tablet by mouth daily\")"
                    },
                    "quantity": { "type": "number", "description": "Quantity to dispense" },
                    "refills": { "type": "integer", "description": "Number of refills" },
                    "status": {
                        "type": "string",
                        "enum": ["active", "on-hold", "cancelled", "completed"],
                        "description": "Status (default: active)"
                    }
                }),
                &["patientId", "medication", "dosageText"],
            ),
        ),
        FhirTool::GetPatientConditions => (
            "Get diagnoses and medical conditions for a patient",
            object_schema(
                json!({
                    "patientId": patient_id_property("Patient ID"),
                    "clinicalStatus": {
                        "type": "string",
                        "enum": ["active", "resolved", "inactive"],
                        "description": "Filter by clinical status"
                    },
                    "_count": count_property()
                }),
                &["patientId"],
            ),
        ),
        FhirTool::CreateCondition => (
            "Create a new condition/diagnosis",
            object_schema(
                json!({
                    "patientId": patient_id_property("Patient ID"),
                    "code": { "type": "string", "description": "ICD-10 or SNOMED code" },
                    "display": { "type": "string", "description": "Condition name/display" },
                    "clinicalStatus": {
                        "type": "string",
                        "enum": ["active", "resolved", "inactive"],
                        "description": "Clinical status (default: active)"
                    },
                    "onsetDateTime": {
                        "type": "string",
                        "description": "When the condition started (ISO datetime)"
                    }
                }),
                &["patientId", "display"],
            ),
        ),
        FhirTool::GetPatientEncounters => (
            "Get healthcare encounters/visits for a patient",
            object_schema(
                json!({
                    "patientId": patient_id_property("Patient ID"),
                    "status": {
                        "type": "string",
                        "enum": ENCOUNTER_STATUSES,
                        "description": "Encounter status filter"
                    },
                    "type": {
                        "type": "string",
                        "description": "Encounter type (e.g., ambulatory, inpatient)"
                    },
                    "_count": count_property()
                }),
                &["patientId"],
            ),
        ),
        FhirTool::CreateEncounter => (
            "Create a new encounter/visit",
            object_schema(
                json!({
                    "patientId": patient_id_property("Patient ID"),
                    "status": {
                        "type": "string",
                        "enum": ENCOUNTER_STATUSES,
                        "description": "Encounter status"
                    },
                    "class": {
                        "type": "string",
                        "enum": ["ambulatory", "emergency", "inpatient", "virtual"],
                        "description": "Encounter class"
                    },
                    "type": { "type": "string", "description": "Type of encounter (e.g., \"Routine checkup\")" },
                    "startDateTime": { "type": "string", "description": "Start date/time (ISO datetime)" },
                    "endDateTime": { "type": "string", "description": "End date/time (ISO datetime)" },
                    "reasonCode": { "type": "string", "description": "Reason for visit" }
                }),
                &["patientId", "status", "class"],
            ),
        ),
    };

    Tool {
        name: tool.name().to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Every tool, in catalogue order
pub fn all_tools() -> Vec<Tool> {
    FhirTool::ALL.iter().copied().map(tool_definition).collect()
}
