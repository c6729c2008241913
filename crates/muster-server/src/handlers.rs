use crate::{ApiError, AppState};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::rejection::BytesRejection;
use axum::http::Uri;
use muster::{Auditor, FixResult, Remediator, VerificationReport};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FixTableRequest {
    table_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CustomFixRequest {
    sql: Option<String>,
}

/// Decode a JSON body, treating an empty or malformed body as having no fields.
fn body_or_default<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    serde_json::from_slice(body).unwrap_or_default()
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::BadRequest(format!("{} is required", field))),
    }
}

pub(crate) async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

pub(crate) async fn verify(State(state): State<AppState>) -> Json<VerificationReport> {
    let report = Auditor::new(state.channel.as_ref(), &state.rules)
        .in_schema(&state.schema)
        .run()
        .await;
    Json(report)
}

pub(crate) async fn fix_all(State(state): State<AppState>) -> Json<FixResult> {
    let report = Auditor::new(state.channel.as_ref(), &state.rules)
        .in_schema(&state.schema)
        .run()
        .await;
    if !report.success {
        let message = report
            .error
            .unwrap_or_else(|| "schema inspection failed".to_string());
        return Json(FixResult::failed(message));
    }

    let result = Remediator::new(state.channel.as_ref(), &state.rules)
        .fix_all(&report.all_issues())
        .await;
    tracing::info!(
        fixed = result.fixed.len(),
        errors = result.errors.len(),
        "fix-all finished"
    );
    Json(result)
}

pub(crate) async fn fix_table(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<FixResult>, ApiError> {
    let request: FixTableRequest = body_or_default(&body?);
    let table = required(request.table_name, "tableName")?;

    let result = Remediator::new(state.channel.as_ref(), &state.rules)
        .in_schema(&state.schema)
        .fix_table(table.trim())
        .await?;
    tracing::info!(
        table = table.trim(),
        fixed = result.fixed.len(),
        errors = result.errors.len(),
        "fix-table finished"
    );
    Ok(Json(result))
}

pub(crate) async fn custom_fix(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<FixResult>, ApiError> {
    let request: CustomFixRequest = body_or_default(&body?);
    let sql = required(request.sql, "sql")?;

    let result = Remediator::new(state.channel.as_ref(), &state.rules)
        .run_custom_fix(&sql)
        .await;
    Ok(Json(result))
}

pub(crate) async fn rules(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"tables": state.rules}))
}

pub(crate) async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_or_default() {
        let request: FixTableRequest = body_or_default(&Bytes::from_static(b"{\"tableName\":\"profiles\"}"));
        assert_eq!(request.table_name.as_deref(), Some("profiles"));

        let request: FixTableRequest = body_or_default(&Bytes::from_static(b"{not json"));
        assert!(request.table_name.is_none());

        let request: CustomFixRequest = body_or_default(&Bytes::new());
        assert!(request.sql.is_none());
    }

    #[test]
    fn test_required_rejects_blank() {
        assert!(required(Some("  ".into()), "sql").is_err());
        assert!(required(None, "sql").is_err());
        assert_eq!(required(Some("SELECT 1".into()), "sql").unwrap(), "SELECT 1");
    }
}
