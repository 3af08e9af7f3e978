// Converters module - translation between tool calls and FHIR resources
//
// - args_to_fhir: tool arguments → FHIR resources and search parameters
// - fhir_to_summary: FHIR resources → flattened summaries for tool results

pub mod args_to_fhir;
pub mod fhir_to_summary;
