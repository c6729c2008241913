//! End-to-end checks against a real Postgres.
//!
//! Run with `cargo test -p muster -- --ignored` on a machine with Docker.

use muster::{Auditor, Channel, IssueKind, PgChannel, Remediator, RuleSet, Severity};
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::testcontainers::runners::AsyncRunner;

const EXEC_SQL: &str = r#"
CREATE OR REPLACE FUNCTION exec_sql(sql text) RETURNS json
LANGUAGE plpgsql AS $$
DECLARE
    result json;
BEGIN
    IF sql ~* '^\s*select' THEN
        EXECUTE sql INTO result;
        RETURN result;
    END IF;
    EXECUTE sql;
    RETURN NULL;
END
$$;
"#;

async fn start() -> (ContainerAsync<Postgres>, String) {
    // gen_random_uuid() is built in from Postgres 13
    let container = Postgres::default()
        .with_tag("16-alpine")
        .start()
        .await
        .unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
    (container, url)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_verify_and_fix_user_roles() {
    let (_container, url) = start().await;
    let channel = PgChannel::connect(&url, 2).unwrap();
    channel
        .execute("CREATE TABLE user_roles (id UUID PRIMARY KEY DEFAULT gen_random_uuid(), user_id UUID NOT NULL, role TEXT NOT NULL)")
        .await
        .unwrap();
    channel
        .execute("INSERT INTO user_roles (user_id, role) VALUES (gen_random_uuid(), 'recruiter')")
        .await
        .unwrap();

    let rules = RuleSet::application();
    let report = Auditor::new(&channel, &rules).run().await;
    assert!(report.success, "{}", report);

    let roles = report.table("user_roles").unwrap();
    let kinds: Vec<IssueKind> = roles.issues.iter().map(|i| i.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            IssueKind::MissingColumn,
            IssueKind::MissingColumn,
            IssueKind::MissingIndex
        ]
    );

    let remediator = Remediator::new(&channel, &rules);
    let result = remediator.fix_table("user_roles").await.unwrap();
    assert!(result.success, "{:?}", result);
    assert_eq!(result.fixed.len(), 3);

    let again = remediator.fix_table("user_roles").await.unwrap();
    assert!(again.fixed.is_empty());

    let report = Auditor::new(&channel, &rules).run().await;
    assert!(report.table("user_roles").unwrap().issues.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_fix_table_with_rows_converges() {
    let (_container, url) = start().await;
    let channel = PgChannel::connect(&url, 2).unwrap();
    channel
        .execute("CREATE TABLE user_roles (id UUID PRIMARY KEY DEFAULT gen_random_uuid(), user_id UUID NOT NULL)")
        .await
        .unwrap();
    channel
        .execute("INSERT INTO user_roles (user_id) VALUES (gen_random_uuid()), (gen_random_uuid())")
        .await
        .unwrap();

    let rules = RuleSet::application();
    let remediator = Remediator::new(&channel, &rules);
    let first = remediator.fix_table("user_roles").await.unwrap();
    assert!(first.success, "{:?}", first);
    assert!(first.errors.is_empty(), "{:?}", first.errors);
    assert_eq!(first.fixed.len(), 4);

    let report = Auditor::new(&channel, &rules).run().await;
    let issues = &report.table("user_roles").unwrap().issues;
    assert_eq!(issues.len(), 1, "{}", report);
    assert_eq!(issues[0].column_name(), Some("role"));
    assert_eq!(issues[0].severity(), Severity::Low);

    let second = remediator.fix_table("user_roles").await.unwrap();
    assert!(second.success);
    assert!(second.fixed.is_empty());
    assert!(second.errors.is_empty(), "{:?}", second.errors);
    assert_eq!(second.skipped.len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unique_constraint_counts_as_index() {
    let (_container, url) = start().await;
    let channel = PgChannel::connect(&url, 2).unwrap();
    channel
        .execute(
            "CREATE TABLE profiles (id UUID PRIMARY KEY, email TEXT NOT NULL UNIQUE, \
             full_name TEXT, avatar_url TEXT, is_admin BOOLEAN NOT NULL DEFAULT false, \
             created_at TIMESTAMPTZ NOT NULL DEFAULT now(), updated_at TIMESTAMPTZ)",
        )
        .await
        .unwrap();

    let rules = RuleSet::application();
    let report = Auditor::new(&channel, &rules).run().await;
    assert!(report.table("profiles").unwrap().issues.is_empty(), "{}", report);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_fix_all_from_empty_database() {
    let (_container, url) = start().await;
    let channel = PgChannel::connect(&url, 2).unwrap();
    let rules = RuleSet::application();

    let report = Auditor::new(&channel, &rules).run().await;
    assert_eq!(report.issue_count(), rules.len());

    let result = Remediator::new(&channel, &rules)
        .fix_all(&report.all_issues())
        .await;
    assert!(result.success, "{:?}", result);
    assert!(result.errors.is_empty(), "{:?}", result.errors);

    let report = Auditor::new(&channel, &rules).run().await;
    assert!(report.is_clean(), "{}", report);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_rpc_mode() {
    let (_container, url) = start().await;
    let rules = RuleSet::application();

    let missing = PgChannel::connect(&url, 2).unwrap().with_rpc("exec_sql");
    let report = Auditor::new(&missing, &rules).run().await;
    assert!(!report.success);
    assert_eq!(report.error.as_deref(), Some("exec_sql RPC not available"));

    let direct = PgChannel::connect(&url, 2).unwrap();
    direct.execute(EXEC_SQL).await.unwrap();

    let rpc = direct.clone().with_rpc("exec_sql");
    let result = Remediator::new(&rpc, &rules)
        .fix_table("profiles")
        .await
        .unwrap();
    assert!(result.success, "{:?}", result);

    let report = Auditor::new(&rpc, &rules).run().await;
    assert!(report.success);
    assert!(report.table("profiles").unwrap().issues.is_empty());

    let custom = Remediator::new(&rpc, &rules)
        .run_custom_fix("DROP TABLE users")
        .await;
    assert!(!custom.success);
    assert!(custom.errors[0].contains("does not exist"));
}
