// Patient tools: search, read, create, update

use serde_json::{json, Value};
use tracing::info;

use crate::converters::args_to_fhir::{apply_patient_update, build_patient, patient_search_params};
use crate::converters::fhir_to_summary::{
    bundle_resources, bundle_total, format_patient_name, patient_details, summarize_patient,
};
use crate::error::Result;
use crate::fhir_client::FhirClient;
use crate::models::tools::{CreatePatientArgs, PatientIdArgs, SearchPatientsArgs, UpdatePatientArgs};

pub async fn search_patients(client: &FhirClient, args: SearchPatientsArgs) -> Result<Value> {
    let params = patient_search_params(&args);
    let bundle = client.search("Patient", params.as_slice()).await?;

    let patients: Vec<Value> = bundle_resources(&bundle)
        .into_iter()
        .map(summarize_patient)
        .collect();

    Ok(json!({
        "success": true,
        "patientsFound": patients.len(),
        "total": bundle_total(&bundle, patients.len()),
        "patients": patients,
    }))
}

pub async fn get_patient_details(client: &FhirClient, args: PatientIdArgs) -> Result<Value> {
    let patient = client.get("Patient", &args.patient_id).await?;
    Ok(json!({
        "success": true,
        "patient": patient_details(&patient),
    }))
}

pub async fn create_patient(client: &FhirClient, args: CreatePatientArgs) -> Result<Value> {
    let created = client.create("Patient", &build_patient(&args)).await?;
    info!(patient_id = ?created.get("id"), "Patient created");

    Ok(json!({
        "success": true,
        "message": "Patient created successfully",
        "patientId": created.get("id"),
        "patient": {
            "id": created.get("id"),
            "name": format_patient_name(created.get("name")),
            "birthDate": created.get("birthDate"),
            "gender": created.get("gender"),
        },
    }))
}

/// Read-modify-write: only the supplied fields change on the stored patient
pub async fn update_patient(client: &FhirClient, args: UpdatePatientArgs) -> Result<Value> {
    let mut existing = client.get("Patient", &args.patient_id).await?;
    apply_patient_update(&mut existing, &args)?;

    let updated = client.update("Patient", &args.patient_id, existing).await?;
    info!(patient_id = %args.patient_id, "Patient updated");

    Ok(json!({
        "success": true,
        "message": "Patient updated successfully",
        "patient": {
            "id": updated.get("id"),
            "name": format_patient_name(updated.get("name")),
            "birthDate": updated.get("birthDate"),
            "gender": updated.get("gender"),
            "active": updated.get("active"),
        },
    }))
}
