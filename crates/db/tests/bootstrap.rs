#![cfg(feature = "db-tests")]

use sqlx::PgPool;

/// Connect, migrate, verify lookup seeds.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_full_bootstrap(pool: PgPool) {
    strata_db::health_check(&pool).await.unwrap();

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM import_statuses")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(count.0 > 0, "import_statuses should have seed data, got 0 rows");
}

/// Seeded status ids must line up with `ImportStatus`.
#[sqlx::test(migrations = "../../db/migrations")]
async fn test_import_status_ids_match_seed(pool: PgPool) {
    use strata_db::models::status::ImportStatus;

    let rows: Vec<(i16, String)> = sqlx::query_as("SELECT id, name FROM import_statuses ORDER BY id")
        .fetch_all(&pool)
        .await
        .unwrap();

    for (id, name) in rows {
        let status = ImportStatus::from_id(id).unwrap_or_else(|| panic!("no variant for id {id}"));
        let state: strata_core::import_status::ImportState = status.into();
        assert_eq!(state.as_str(), name);
    }
}
