use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct HelloResponse {
    pub ok: bool,
    /// Endpoint selected by the server for subsequent operations.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InsertRequest<'a, D: Serialize> {
    pub document: &'a D,
}

#[derive(Debug, Deserialize)]
pub struct InsertResponse {
    pub inserted_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FindOneResponse {
    #[serde(default)]
    pub document: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct FindRequest<'a> {
    pub filter: &'a Value,
}

#[derive(Debug, Deserialize)]
pub struct FindResponse {
    #[serde(default)]
    pub documents: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct UpdateManyRequest<'a> {
    pub filter: &'a Value,
    pub update: &'a Value,
}

#[derive(Debug, Deserialize)]
pub struct UpdateResponse {
    #[serde(default)]
    pub matched_count: u64,
    #[serde(default)]
    pub modified_count: u64,
}
