// FHIR tools exposed over MCP
//
// - definitions: names, descriptions and input schemas for tools/list
// - patient: Patient search/read/create/update
// - clinical: Observation, MedicationRequest, Condition and Encounter tools

mod clinical;
mod definitions;
mod patient;

pub use definitions::{all_tools, tool_definition};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::converters::args_to_fhir::fhir_timestamp;
use crate::error::{FhirError, Result};
use crate::fhir_client::FhirClient;
use crate::models::mcp::{CallToolResult, Tool};
use crate::models::tools::PatientScoped;

/// Prefix accepted in front of any tool name (`aidboxSearchPatients`)
pub const TOOL_ALIAS_PREFIX: &str = "aidbox";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FhirTool {
    SearchPatients,
    GetPatientDetails,
    CreatePatient,
    UpdatePatient,
    GetPatientObservations,
    CreateObservation,
    GetPatientMedications,
    CreateMedicationRequest,
    GetPatientConditions,
    CreateCondition,
    GetPatientEncounters,
    CreateEncounter,
}

impl FhirTool {
    pub const ALL: [FhirTool; 12] = [
        FhirTool::SearchPatients,
        FhirTool::GetPatientDetails,
        FhirTool::CreatePatient,
        FhirTool::UpdatePatient,
        FhirTool::GetPatientObservations,
        FhirTool::CreateObservation,
        FhirTool::GetPatientMedications,
        FhirTool::CreateMedicationRequest,
        FhirTool::GetPatientConditions,
        FhirTool::CreateCondition,
        FhirTool::GetPatientEncounters,
        FhirTool::CreateEncounter,
    ];

    /// Name advertised by tools/list
    pub fn name(&self) -> &'static str {
        match self {
            FhirTool::SearchPatients => "searchPatients",
            FhirTool::GetPatientDetails => "getPatientDetails",
            FhirTool::CreatePatient => "createPatient",
            FhirTool::UpdatePatient => "updatePatient",
            FhirTool::GetPatientObservations => "getPatientObservations",
            FhirTool::CreateObservation => "createObservation",
            FhirTool::GetPatientMedications => "getPatientMedications",
            FhirTool::CreateMedicationRequest => "createMedicationRequest",
            FhirTool::GetPatientConditions => "getPatientConditions",
            FhirTool::CreateCondition => "createCondition",
            FhirTool::GetPatientEncounters => "getPatientEncounters",
            FhirTool::CreateEncounter => "createEncounter",
        }
    }

    /// Resolve an advertised name or its `aidbox`-prefixed alias
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(tool) = Self::ALL.iter().find(|t| t.name() == name) {
            return Some(*tool);
        }

        let rest = name.strip_prefix(TOOL_ALIAS_PREFIX)?;
        let mut chars = rest.chars();
        let first = chars.next()?;
        if !first.is_ascii_uppercase() {
            return None;
        }
        let canonical = format!("{}{}", first.to_ascii_lowercase(), chars.as_str());
        Self::ALL.iter().find(|t| t.name() == canonical).copied()
    }
}

/// Deserialize tool arguments; a missing `arguments` object counts as `{}`
fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| FhirError::InvalidArguments(e.to_string()))
}

fn parse_scoped<T: DeserializeOwned + PatientScoped>(arguments: Value) -> Result<T> {
    let args: T = parse_args(arguments)?;
    if args.patient_id().trim().is_empty() {
        return Err(FhirError::InvalidArguments(
            "patientId must not be empty".to_string(),
        ));
    }
    Ok(args)
}

/// Payload returned with `isError: true` when a tool fails
pub fn error_payload(tool: &str, message: &str) -> Value {
    json!({
        "success": false,
        "error": message,
        "tool": tool,
        "timestamp": fhir_timestamp(Utc::now()),
    })
}

/// Dispatches tools/call requests to the FHIR tool handlers
#[derive(Clone)]
pub struct ToolRegistry {
    client: Arc<FhirClient>,
}

impl ToolRegistry {
    pub fn new(client: Arc<FhirClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<FhirClient> {
        &self.client
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        all_tools()
    }

    /// Run a tool and wrap the outcome as an MCP tool result.
    ///
    /// Failures never escape as errors: they become an `isError` result whose
    /// text is the error payload.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> CallToolResult {
        let tool = match FhirTool::from_name(name) {
            Some(tool) => tool,
            None => {
                let err = FhirError::UnknownTool(name.to_string());
                error!(tool = %name, "Unknown tool requested");
                return CallToolResult::json_error(&error_payload(name, &err.to_string()));
            }
        };

        info!(tool = tool.name(), "Tool called");
        debug!(tool = tool.name(), arguments = %arguments, "Tool arguments");

        match self.dispatch(tool, arguments).await {
            Ok(payload) => CallToolResult::json(&payload),
            Err(e) => {
                error!(tool = tool.name(), error_kind = e.kind(), error = %e, "Tool failed");
                CallToolResult::json_error(&error_payload(tool.name(), &e.to_string()))
            }
        }
    }

    async fn dispatch(&self, tool: FhirTool, arguments: Value) -> Result<Value> {
        let client = self.client.as_ref();
        match tool {
            FhirTool::SearchPatients => patient::search_patients(client, parse_args(arguments)?).await,
            FhirTool::GetPatientDetails => {
                patient::get_patient_details(client, parse_scoped(arguments)?).await
            }
            FhirTool::CreatePatient => patient::create_patient(client, parse_args(arguments)?).await,
            FhirTool::UpdatePatient => patient::update_patient(client, parse_scoped(arguments)?).await,
            FhirTool::GetPatientObservations => {
                clinical::get_patient_observations(client, parse_scoped(arguments)?).await
            }
            FhirTool::CreateObservation => {
                clinical::create_observation(client, parse_scoped(arguments)?).await
            }
            FhirTool::GetPatientMedications => {
                clinical::get_patient_medications(client, parse_scoped(arguments)?).await
            }
            FhirTool::CreateMedicationRequest => {
                clinical::create_medication_request(client, parse_scoped(arguments)?).await
            }
            FhirTool::GetPatientConditions => {
                clinical::get_patient_conditions(client, parse_scoped(arguments)?).await
            }
            FhirTool::CreateCondition => {
                clinical::create_condition(client, parse_scoped(arguments)?).await
            }
            FhirTool::GetPatientEncounters => {
                clinical::get_patient_encounters(client, parse_scoped(arguments)?).await
            }
            FhirTool::CreateEncounter => {
                clinical::create_encounter(client, parse_scoped(arguments)?).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::fhir_client::FhirClientConfig;
    use mockito::Matcher;

    fn registry(base_url: &str) -> ToolRegistry {
        let config = FhirClientConfig::new(
            base_url,
            AuthConfig::Basic {
                username: Some("root".to_string()),
                password: Some("secret".to_string()),
            },
        );
        ToolRegistry::new(Arc::new(FhirClient::new(config).unwrap()))
    }

    fn payload(result: &CallToolResult) -> Value {
        serde_json::from_str(result.text().unwrap()).unwrap()
    }

    #[test]
    fn test_from_name_accepts_aliases() {
        assert_eq!(
            FhirTool::from_name("searchPatients"),
            Some(FhirTool::SearchPatients)
        );
        assert_eq!(
            FhirTool::from_name("aidboxSearchPatients"),
            Some(FhirTool::SearchPatients)
        );
        assert_eq!(
            FhirTool::from_name("aidboxCreateMedicationRequest"),
            Some(FhirTool::CreateMedicationRequest)
        );
        assert_eq!(FhirTool::from_name("aidbox"), None);
        assert_eq!(FhirTool::from_name("aidboxsearchPatients"), None);
        assert_eq!(FhirTool::from_name("deletePatient"), None);
    }

    #[test]
    fn test_every_tool_round_trips_by_name() {
        for tool in FhirTool::ALL {
            assert_eq!(FhirTool::from_name(tool.name()), Some(tool));
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let registry = registry("http://127.0.0.1:1");
        let result = registry.call_tool("deletePatient", json!({})).await;

        assert!(result.is_error());
        let body = payload(&result);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Unknown tool: deletePatient");
        assert_eq!(body["tool"], "deletePatient");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_missing_required_argument_never_reaches_upstream() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fhir/Observation")
            .expect(0)
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry
            .call_tool("createObservation", json!({"patientId": "pt-1", "code": "8867-4"}))
            .await;

        assert!(result.is_error());
        let body = payload(&result);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid arguments:"));
        assert_eq!(body["tool"], "createObservation");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_patient_id_is_rejected() {
        let registry = registry("http://127.0.0.1:1");
        let result = registry
            .call_tool("getPatientDetails", json!({"patientId": "  "}))
            .await;
        assert!(result.is_error());
        assert_eq!(
            payload(&result)["error"],
            "Invalid arguments: patientId must not be empty"
        );
    }

    #[tokio::test]
    async fn test_search_patients_flattens_bundle() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fhir/Patient")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("family".into(), "Smith".into()),
                Matcher::UrlEncoded("_count".into(), "20".into()),
            ]))
            .match_header("authorization", "Basic cm9vdDpzZWNyZXQ=")
            .with_status(200)
            .with_body(
                json!({
                    "resourceType": "Bundle",
                    "total": 3,
                    "entry": [{"resource": {
                        "resourceType": "Patient",
                        "id": "pt-1",
                        "name": [{"given": ["Jane"], "family": "Smith"}],
                        "telecom": [{"system": "phone", "value": "555-0100"}]
                    }}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let registry = registry(&server.url());
        let result = registry
            .call_tool("aidboxSearchPatients", json!({"family": "Smith"}))
            .await;

        assert!(!result.is_error());
        let body = payload(&result);
        assert_eq!(body["patientsFound"], 1);
        assert_eq!(body["total"], 3);
        assert_eq!(body["patients"][0]["name"], "Jane Smith");
        assert_eq!(body["patients"][0]["phone"], "555-0100");
        assert_eq!(body["patients"][0]["address"], Value::Null);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_with_null_arguments_uses_defaults() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fhir/Patient")
            .match_query(Matcher::UrlEncoded("_count".into(), "20".into()))
            .with_status(200)
            .with_body(r#"{"resourceType":"Bundle"}"#)
            .create_async()
            .await;

        let result = registry(&server.url())
            .call_tool("searchPatients", Value::Null)
            .await;

        let body = payload(&result);
        assert_eq!(body["patientsFound"], 0);
        assert_eq!(body["total"], 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upstream_error_becomes_error_payload() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fhir/Patient/missing")
            .with_status(404)
            .with_body(
                json!({
                    "resourceType": "OperationOutcome",
                    "issue": [{"severity": "error", "diagnostics": "Resource Patient/missing not found"}]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let result = registry(&server.url())
            .call_tool("getPatientDetails", json!({"patientId": "missing"}))
            .await;

        assert!(result.is_error());
        let body = payload(&result);
        assert_eq!(body["error"], "Resource Patient/missing not found");
        assert_eq!(body["tool"], "getPatientDetails");
    }

    #[tokio::test]
    async fn test_update_patient_reads_then_writes() {
        let mut server = mockito::Server::new_async().await;
        let read = server
            .mock("GET", "/fhir/Patient/pt-1")
            .with_status(200)
            .with_body(
                json!({
                    "resourceType": "Patient",
                    "id": "pt-1",
                    "name": [{"given": ["Jane"], "family": "Smith"}],
                    "telecom": [{"system": "phone", "value": "555-0100"}]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let write = server
            .mock("PUT", "/fhir/Patient/pt-1")
            .match_body(Matcher::PartialJson(json!({
                "id": "pt-1",
                "name": [{"given": ["Jane"], "family": "Doe"}],
                "telecom": [{"system": "phone", "value": "555-0199"}]
            })))
            .with_status(200)
            .with_body(
                json!({
                    "resourceType": "Patient",
                    "id": "pt-1",
                    "name": [{"given": ["Jane"], "family": "Doe"}],
                    "active": true
                })
                .to_string(),
            )
            .create_async()
            .await;

        let result = registry(&server.url())
            .call_tool(
                "updatePatient",
                json!({"patientId": "pt-1", "family": "Doe", "phone": "555-0199"}),
            )
            .await;

        assert!(!result.is_error(), "{:?}", result.text());
        let body = payload(&result);
        assert_eq!(body["message"], "Patient updated successfully");
        assert_eq!(body["patient"]["name"], "Jane Doe");
        assert_eq!(body["patient"]["active"], true);
        read.assert_async().await;
        write.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_observation_posts_loinc_coding() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fhir/Observation")
            .match_body(Matcher::PartialJson(json!({
                "resourceType": "Observation",
                "subject": {"reference": "Patient/pt-1"},
                "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4", "display": "Heart rate"}]},
                "valueQuantity": {"value": 72, "unit": "beats/min"}
            })))
            .with_status(201)
            .with_body(r#"{"resourceType":"Observation","id":"obs-9"}"#)
            .create_async()
            .await;

        let result = registry(&server.url())
            .call_tool(
                "createObservation",
                json!({
                    "patientId": "pt-1",
                    "code": "8867-4",
                    "display": "Heart rate",
                    "value": 72,
                    "unit": "beats/min",
                    "effectiveDateTime": "2024-03-01T09:00:00Z"
                }),
            )
            .await;

        let body = payload(&result);
        assert_eq!(body["observationId"], "obs-9");
        assert_eq!(body["observation"]["code"], "Heart rate");
        assert_eq!(body["observation"]["value"], 72);
        assert_eq!(body["observation"]["effectiveDateTime"], "2024-03-01T09:00:00Z");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_clinical_search_reports_found_count() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fhir/Condition")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("patient".into(), "pt-1".into()),
                Matcher::UrlEncoded("clinical-status".into(), "active".into()),
                Matcher::UrlEncoded("_sort".into(), "-onset-date".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "resourceType": "Bundle",
                    "entry": [
                        {"resource": {"resourceType": "Condition", "id": "c-1", "code": {"text": "Asthma"}}},
                        {"resource": {"resourceType": "Condition", "id": "c-2", "code": {"text": "Hypertension"}}}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let result = registry(&server.url())
            .call_tool(
                "getPatientConditions",
                json!({"patientId": "pt-1", "clinicalStatus": "active"}),
            )
            .await;

        let body = payload(&result);
        assert_eq!(body["conditionsFound"], 2);
        assert_eq!(body["patientId"], "pt-1");
        assert_eq!(body["conditions"][1]["code"]["text"], "Hypertension");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_numeric_count_falls_back_to_default() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fhir/Encounter")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("patient".into(), "pt-1".into()),
                Matcher::UrlEncoded("_count".into(), "20".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"resourceType":"Bundle"}"#)
            .create_async()
            .await;

        let result = registry(&server.url())
            .call_tool(
                "getPatientEncounters",
                json!({"patientId": "pt-1", "_count": -3}),
            )
            .await;

        assert!(!result.is_error());
        assert_eq!(payload(&result)["encountersFound"], 0);
        mock.assert_async().await;
    }
}
