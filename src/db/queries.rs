pub const CREATE_REALTIME_STORE: &str = r#"
CREATE TABLE IF NOT EXISTS realtime_store (
    key TEXT PRIMARY KEY,
    value JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

pub const SELECT_VALUE: &str = r#"
SELECT value FROM realtime_store WHERE key = $1;
"#;

pub const UPSERT_VALUE: &str = r#"
INSERT INTO realtime_store (key, value, updated_at)
VALUES ($1, $2, NOW())
ON CONFLICT (key) DO UPDATE
SET value = $2,
    updated_at = NOW();
"#;

pub const NOTIFY_CHANGE: &str = r#"
SELECT pg_notify($1, $2);
"#;
