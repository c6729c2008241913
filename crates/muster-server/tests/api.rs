use std::sync::Arc;

use muster::testing::MemoryChannel;
use muster::{BoxFuture, Channel, ChannelError, JsonRow, RuleSet};
use muster_server::{AppState, build_router};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn serve(channel: Arc<MemoryChannel>) -> std::net::SocketAddr {
    let dyn_channel: Arc<dyn Channel> = channel;
    serve_state(AppState::new(dyn_channel, RuleSet::application())).await
}

async fn serve_state(state: AppState) -> std::net::SocketAddr {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
    addr
}

async fn send_raw(
    addr: std::net::SocketAddr,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> (u16, String, String) {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let body = body.unwrap_or("");
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    stream
        .write_all(req.as_bytes())
        .await
        .expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("http response separator");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("status");
    (status, head.to_string(), body.to_string())
}

fn json_body(body: &str) -> Value {
    serde_json::from_str(body).expect("json body")
}

fn matching() -> Arc<MemoryChannel> {
    Arc::new(MemoryChannel::matching(RuleSet::application()))
}

#[tokio::test]
async fn healthz_reports_ok() {
    let addr = serve(matching()).await;
    let (status, head, body) = send_raw(addr, "GET", "/healthz", None).await;
    assert_eq!(status, 200);
    assert!(head.to_ascii_lowercase().contains("x-request-id: req-"));
    assert_eq!(json_body(&body)["status"], json!("ok"));
}

#[tokio::test]
async fn verify_returns_report_in_rule_order() {
    let channel = matching();
    channel.drop_column("user_roles", "assigned_at");
    channel.drop_column("user_roles", "is_active");
    let addr = serve(channel).await;

    let (status, _, body) = send_raw(addr, "GET", "/api/admin/schema/verify", None).await;
    assert_eq!(status, 200);
    let report = json_body(&body);
    assert_eq!(report["success"], json!(true));
    assert_eq!(report["tables"].as_array().unwrap().len(), 12);
    assert_eq!(report["tables"][0]["tableName"], json!("profiles"));
    assert_eq!(report["tables"][1]["tableName"], json!("user_roles"));
    assert_eq!(
        report["tables"][1]["issues"],
        json!([
            {
                "type": "missing_column",
                "tableName": "user_roles",
                "columnName": "assigned_at",
                "description": "Column user_roles.assigned_at (TIMESTAMPTZ) is missing",
                "severity": "high"
            },
            {
                "type": "missing_column",
                "tableName": "user_roles",
                "columnName": "is_active",
                "description": "Column user_roles.is_active (BOOLEAN) is missing",
                "severity": "high"
            }
        ])
    );
    assert!(report.get("error").is_none());
}

#[tokio::test]
async fn verify_without_rpc_is_a_global_issue() {
    let channel = Arc::new(MemoryChannel::matching(RuleSet::application()).without_rpc());
    let addr = serve(channel).await;

    let (status, _, body) = send_raw(addr, "GET", "/api/admin/schema/verify", None).await;
    assert_eq!(status, 200);
    let report = json_body(&body);
    assert_eq!(report["success"], json!(false));
    assert_eq!(report["tables"], json!([]));
    assert_eq!(report["globalIssues"][0]["type"], json!("other"));
    assert_eq!(report["globalIssues"][0]["severity"], json!("high"));
    assert_eq!(report["error"], json!("exec_sql RPC not available"));
}

#[tokio::test]
async fn fix_table_requires_table_name() {
    let addr = serve(matching()).await;

    for body in [None, Some("{}"), Some("{\"tableName\": \"  \"}"), Some("{oops")] {
        let (status, _, response) =
            send_raw(addr, "POST", "/api/admin/schema/fix-table", body).await;
        assert_eq!(status, 400, "body {:?}", body);
        assert_eq!(
            json_body(&response),
            json!({"success": false, "error": "tableName is required"})
        );
    }
}

#[tokio::test]
async fn fix_table_unknown_table_is_not_found() {
    let addr = serve(matching()).await;
    let (status, _, body) = send_raw(
        addr,
        "POST",
        "/api/admin/schema/fix-table",
        Some("{\"tableName\": \"users\"}"),
    )
    .await;
    assert_eq!(status, 404);
    assert_eq!(json_body(&body)["success"], json!(false));
}

#[tokio::test]
async fn fix_table_adds_missing_columns() {
    let channel = matching();
    channel.drop_column("user_roles", "assigned_at");
    channel.drop_column("user_roles", "is_active");
    let addr = serve(channel.clone()).await;

    let (status, _, body) = send_raw(
        addr,
        "POST",
        "/api/admin/schema/fix-table",
        Some("{\"tableName\": \"user_roles\"}"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        json_body(&body),
        json!({
            "success": true,
            "fixed": [
                "Added column user_roles.assigned_at (TIMESTAMPTZ)",
                "Added column user_roles.is_active (BOOLEAN)"
            ],
            "errors": []
        })
    );
    assert_eq!(channel.executed().len(), 2);

    let (_, _, body) = send_raw(addr, "GET", "/api/admin/schema/verify", None).await;
    assert_eq!(json_body(&body)["tables"][1]["issues"], json!([]));
}

#[tokio::test]
async fn fix_all_verifies_then_fixes() {
    let channel = matching();
    channel.drop_table("challenges");
    channel.drop_index("donations", "idx_donations_created_at");
    let addr = serve(channel.clone()).await;

    let (status, _, body) = send_raw(addr, "POST", "/api/admin/schema/fix-all", None).await;
    assert_eq!(status, 200);
    let result = json_body(&body);
    assert_eq!(result["success"], json!(true));
    assert_eq!(result["fixed"].as_array().unwrap().len(), 2);
    assert_eq!(result["errors"], json!([]));

    let (_, _, body) = send_raw(addr, "GET", "/api/admin/schema/verify", None).await;
    let report = json_body(&body);
    let total: usize = report["tables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["issues"].as_array().unwrap().len())
        .sum();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn fix_all_on_clean_database_changes_nothing() {
    let channel = matching();
    let addr = serve(channel.clone()).await;
    let (status, _, body) = send_raw(addr, "POST", "/api/admin/schema/fix-all", None).await;
    assert_eq!(status, 200);
    assert_eq!(
        json_body(&body),
        json!({"success": true, "fixed": [], "errors": []})
    );
    assert!(channel.executed().is_empty());
}

#[tokio::test]
async fn fix_all_offline_reports_failure() {
    let channel = Arc::new(MemoryChannel::matching(RuleSet::application()).offline());
    let addr = serve(channel).await;
    let (status, _, body) = send_raw(addr, "POST", "/api/admin/schema/fix-all", None).await;
    assert_eq!(status, 200);
    let result = json_body(&body);
    assert_eq!(result["success"], json!(false));
    assert_eq!(result["errors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn custom_fix_runs_sql_verbatim() {
    let channel = matching();
    let addr = serve(channel.clone()).await;

    let (status, _, body) =
        send_raw(addr, "POST", "/api/admin/schema/custom-fix", Some("{}")).await;
    assert_eq!(status, 400);
    assert_eq!(json_body(&body)["error"], json!("sql is required"));

    let (status, _, body) = send_raw(
        addr,
        "POST",
        "/api/admin/schema/custom-fix",
        Some("{\"sql\": \"DROP TABLE referrals\"}"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        json_body(&body),
        json!({
            "success": true,
            "fixed": ["Executed custom SQL: DROP TABLE referrals"],
            "errors": []
        })
    );
    assert!(channel.observed().table("referrals").is_none());

    let (status, _, body) = send_raw(
        addr,
        "POST",
        "/api/admin/schema/custom-fix",
        Some("{\"sql\": \"DROP TABLE referrals\"}"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        json_body(&body),
        json!({
            "success": false,
            "fixed": [],
            "errors": ["relation \"referrals\" does not exist"]
        })
    );
}

#[tokio::test]
async fn rules_lists_compiled_tables() {
    let addr = serve(matching()).await;
    let (status, _, body) = send_raw(addr, "GET", "/api/admin/schema/rules", None).await;
    assert_eq!(status, 200);
    let rules = json_body(&body);
    let tables = rules["tables"].as_array().unwrap();
    assert_eq!(tables.len(), 12);
    assert_eq!(tables[1]["tableName"], json!("user_roles"));
    assert_eq!(tables[1]["columns"][3]["name"], json!("assigned_at"));
    assert_eq!(tables[1]["columns"][3]["expectedType"], json!("TIMESTAMPTZ"));
    assert_eq!(tables[1]["requiredIndexes"][0]["columns"], json!(["user_id"]));
}

#[tokio::test]
async fn unknown_route_is_json_not_found() {
    let addr = serve(matching()).await;
    let (status, _, body) = send_raw(addr, "GET", "/api/admin/nope", None).await;
    assert_eq!(status, 404);
    assert_eq!(json_body(&body)["success"], json!(false));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let addr = serve(matching()).await;
    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let req = format!(
        "GET /healthz HTTP/1.1\r\nHost: {addr}\r\nx-request-id: req-test-1\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(req.as_bytes()).await.expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    assert!(response.to_ascii_lowercase().contains("x-request-id: req-test-1"));
}

/// A channel whose catalog decoding blows up.
struct ExplodingChannel;

impl Channel for ExplodingChannel {
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<JsonRow>, ChannelError>> {
        Box::pin(async move {
            if sql.contains("information_schema") {
                panic!("catalog decoder exploded");
            }
            Ok(Vec::new())
        })
    }

    fn execute<'a>(&'a self, _sql: &'a str) -> BoxFuture<'a, Result<(), ChannelError>> {
        Box::pin(async { Ok(()) })
    }
}

#[tokio::test]
async fn handler_panic_is_json_internal_error() {
    let addr = serve_state(AppState::new(
        Arc::new(ExplodingChannel),
        RuleSet::application(),
    ))
    .await;

    let (status, head, body) = send_raw(addr, "GET", "/api/admin/schema/verify", None).await;
    assert_eq!(status, 500);
    assert!(head.to_ascii_lowercase().contains("x-request-id: req-"));
    assert_eq!(
        json_body(&body),
        json!({"success": false, "error": "internal error: catalog decoder exploded"})
    );

    let (status, _, _) = send_raw(addr, "GET", "/healthz", None).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn oversized_body_is_json_payload_too_large() {
    let channel = matching();
    let dyn_channel: Arc<dyn Channel> = channel.clone();
    let mut state = AppState::new(dyn_channel, RuleSet::application());
    state.max_body_bytes = 32;
    let addr = serve_state(state).await;

    let body = format!("{{\"sql\": \"DROP TABLE referrals -- {}\"}}", "x".repeat(64));
    let (status, _, response) =
        send_raw(addr, "POST", "/api/admin/schema/custom-fix", Some(&body)).await;
    assert_eq!(status, 413);
    let response = json_body(&response);
    assert_eq!(response["success"], json!(false));
    assert!(response["error"].is_string());
    assert!(channel.executed().is_empty());

    let (status, _, _) = send_raw(
        addr,
        "POST",
        "/api/admin/schema/fix-table",
        Some("{\"tableName\": \"profiles\"}"),
    )
    .await;
    assert_eq!(status, 200);
}
