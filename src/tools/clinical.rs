// Clinical tools: observations, medication requests, conditions, encounters

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::converters::args_to_fhir::{
    build_condition, build_encounter, build_medication_request, build_observation,
    condition_search_params, encounter_search_params, medication_search_params,
    observation_search_params, SearchParams,
};
use crate::converters::fhir_to_summary::{
    bundle_resources, summarize_condition, summarize_encounter, summarize_medication_request,
    summarize_observation,
};
use crate::error::Result;
use crate::fhir_client::FhirClient;
use crate::models::tools::{
    ConditionSearchArgs, CreateConditionArgs, CreateEncounterArgs, CreateMedicationRequestArgs,
    CreateObservationArgs, EncounterSearchArgs, MedicationSearchArgs, ObservationSearchArgs,
};

/// Search `resource_type` for one patient and flatten every match.
///
/// The result carries `{found_key: n, patientId, list_key: [...]}`.
async fn search_for_patient(
    client: &FhirClient,
    resource_type: &str,
    params: SearchParams,
    patient_id: &str,
    (found_key, list_key): (&str, &str),
    summarize: fn(&Value) -> Value,
) -> Result<Value> {
    let bundle = client.search(resource_type, params.as_slice()).await?;
    let items: Vec<Value> = bundle_resources(&bundle).into_iter().map(summarize).collect();

    let mut result = json!({ "success": true });
    result[found_key] = json!(items.len());
    result["patientId"] = json!(patient_id);
    result[list_key] = Value::Array(items);
    Ok(result)
}

// ==================================================================================================
// Observations
// ==================================================================================================

pub async fn get_patient_observations(
    client: &FhirClient,
    args: ObservationSearchArgs,
) -> Result<Value> {
    search_for_patient(
        client,
        "Observation",
        observation_search_params(&args),
        &args.patient_id,
        ("observationsFound", "observations"),
        summarize_observation,
    )
    .await
}

pub async fn create_observation(client: &FhirClient, args: CreateObservationArgs) -> Result<Value> {
    let observation = build_observation(&args, Utc::now());
    let created = client.create("Observation", &observation).await?;
    info!(patient_id = %args.patient_id, code = %args.code, "Observation created");

    Ok(json!({
        "success": true,
        "message": "Observation created successfully",
        "observationId": created.get("id"),
        "observation": {
            "id": created.get("id"),
            "code": args.display,
            "value": args.value,
            "unit": args.unit,
            "effectiveDateTime": observation.get("effectiveDateTime"),
        },
    }))
}

// ==================================================================================================
// Medication requests
// ==================================================================================================

pub async fn get_patient_medications(
    client: &FhirClient,
    args: MedicationSearchArgs,
) -> Result<Value> {
    search_for_patient(
        client,
        "MedicationRequest",
        medication_search_params(&args),
        &args.patient_id,
        ("medicationsFound", "medications"),
        summarize_medication_request,
    )
    .await
}

pub async fn create_medication_request(
    client: &FhirClient,
    args: CreateMedicationRequestArgs,
) -> Result<Value> {
    let request = build_medication_request(&args, Utc::now());
    let created = client.create("MedicationRequest", &request).await?;
    info!(patient_id = %args.patient_id, "Medication request created");

    Ok(json!({
        "success": true,
        "message": "Medication request created successfully",
        "medicationRequestId": created.get("id"),
        "medicationRequest": {
            "id": created.get("id"),
            "medication": args.medication,
            "dosage": args.dosage_text,
            "status": request.get("status"),
        },
    }))
}

// ==================================================================================================
// Conditions
// ==================================================================================================

pub async fn get_patient_conditions(
    client: &FhirClient,
    args: ConditionSearchArgs,
) -> Result<Value> {
    search_for_patient(
        client,
        "Condition",
        condition_search_params(&args),
        &args.patient_id,
        ("conditionsFound", "conditions"),
        summarize_condition,
    )
    .await
}

pub async fn create_condition(client: &FhirClient, args: CreateConditionArgs) -> Result<Value> {
    let condition = build_condition(&args, Utc::now());
    let created = client.create("Condition", &condition).await?;
    info!(patient_id = %args.patient_id, "Condition created");

    Ok(json!({
        "success": true,
        "message": "Condition created successfully",
        "conditionId": created.get("id"),
        "condition": {
            "id": created.get("id"),
            "code": args.display,
            "clinicalStatus": condition.pointer("/clinicalStatus/coding/0/code"),
            "recordedDate": condition.get("recordedDate"),
        },
    }))
}

// ==================================================================================================
// Encounters
// ==================================================================================================

pub async fn get_patient_encounters(
    client: &FhirClient,
    args: EncounterSearchArgs,
) -> Result<Value> {
    search_for_patient(
        client,
        "Encounter",
        encounter_search_params(&args),
        &args.patient_id,
        ("encountersFound", "encounters"),
        summarize_encounter,
    )
    .await
}

pub async fn create_encounter(client: &FhirClient, args: CreateEncounterArgs) -> Result<Value> {
    let encounter = build_encounter(&args);
    let created = client.create("Encounter", &encounter).await?;
    info!(patient_id = %args.patient_id, status = %args.status, "Encounter created");

    Ok(json!({
        "success": true,
        "message": "Encounter created successfully",
        "encounterId": created.get("id"),
        "encounter": {
            "id": created.get("id"),
            "status": args.status,
            "class": args.class,
            "type": args.encounter_type,
            "period": encounter.get("period"),
        },
    }))
}
