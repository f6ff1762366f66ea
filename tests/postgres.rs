use actiongen::config::{DbConfig, PipelineConfig};
use actiongen::engine::RuleEngine;
use actiongen::facts::postgres::PgCatalog;
use actiongen::facts::{CatalogFacts, ParamType};
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

const SCHEMA: &str = r#"
    CREATE TABLE customers (id serial PRIMARY KEY, name text, region text);
    CREATE TABLE orders (
        id serial PRIMARY KEY,
        customer_id int REFERENCES customers (id),
        status text,
        created_at timestamptz
    );
    CREATE INDEX orders_status_hash ON orders USING hash (status);
"#;

#[tokio::test]
#[ignore = "requires docker"]
async fn reads_catalog_and_runs_pipeline() {
    let container = Postgres::default().start().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let config = DbConfig::from_connection_params(
        "127.0.0.1".into(),
        port,
        "postgres".into(),
        "postgres".into(),
        "postgres".into(),
    );

    let pool = sqlx::PgPool::connect(&config.connection_string())
        .await
        .unwrap();
    sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();

    let catalog = PgCatalog::connect(&config).await.unwrap();
    catalog.refresh_stats().await.unwrap();
    let snapshot = catalog.fetch_snapshot().await.unwrap();

    assert_eq!(
        snapshot.table_columns()["orders"],
        vec!["id", "customer_id", "status", "created_at"]
    );
    let hash = snapshot
        .indexes()
        .iter()
        .find(|index| index.name == "orders_status_hash")
        .unwrap();
    assert_eq!(hash.access_method.as_deref(), Some("hash"));
    assert_eq!(
        snapshot.parameter_info("work_mem").unwrap().vartype,
        ParamType::Integer
    );

    let pipeline = PipelineConfig::from_yaml(
        r#"
generators:
  - { name: drop, generator: DropIndexGenerator }
  - { name: seqscan, generator: CategoricalKnobGenerator, args: { parameter: enable_seqscan, values: [off] } }
"#,
    )
    .unwrap();
    let report = RuleEngine::new(&pipeline, snapshot.into_handle())
        .unwrap()
        .run()
        .unwrap();
    let sql: Vec<String> = report.catalog.actions().map(|a| a.to_string()).collect();
    assert!(sql.contains(&"DROP INDEX IF EXISTS orders_status_hash;".to_string()));
    assert!(sql.contains(&"SET enable_seqscan TO 'off';".to_string()));
}
