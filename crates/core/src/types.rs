/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// A JSON object, the shape of every property bag on nodes and edges.
pub type PropertyMap = serde_json::Map<String, serde_json::Value>;
