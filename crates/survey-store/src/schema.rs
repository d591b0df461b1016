use rusqlite::Connection;

use survey_core::SurveyError;

pub fn init_db(conn: &Connection) -> Result<(), SurveyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS models (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            context_length INTEGER,
            prompt_price REAL NOT NULL DEFAULT 0,
            completion_price REAL NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS prompts (
            id TEXT PRIMARY KEY,
            prompt TEXT NOT NULL,
            marking_scheme TEXT NOT NULL DEFAULT '',
            evaluation_model TEXT,
            updated_at TEXT NOT NULL
        );

        -- Append-only. No unique constraint: the cache looks up before inserting.
        CREATE TABLE IF NOT EXISTS request_log (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            resource TEXT NOT NULL,
            request_hash TEXT NOT NULL,
            request TEXT NOT NULL,
            response TEXT NOT NULL -- JSON
        );

        CREATE INDEX IF NOT EXISTS idx_request_log_key ON request_log(resource, request_hash);

        CREATE TABLE IF NOT EXISTS model_outputs (
            id TEXT PRIMARY KEY,
            prompt_id TEXT NOT NULL REFERENCES prompts(id) ON DELETE CASCADE,
            model TEXT NOT NULL,
            content TEXT NOT NULL,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            total_cost REAL,
            request_id TEXT REFERENCES request_log(id),
            created_at TEXT NOT NULL,
            sample INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_model_outputs_prompt ON model_outputs(prompt_id, model);

        CREATE TABLE IF NOT EXISTS embeddings (
            id TEXT PRIMARY KEY,
            output_id TEXT NOT NULL REFERENCES model_outputs(id) ON DELETE CASCADE,
            model TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            vector BLOB NOT NULL, -- f32, native byte order
            request_id TEXT REFERENCES request_log(id),
            created_at TEXT NOT NULL,
            UNIQUE(output_id, model)
        );

        CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model);

        CREATE TABLE IF NOT EXISTS evaluations (
            id TEXT PRIMARY KEY,
            output_id TEXT NOT NULL REFERENCES model_outputs(id) ON DELETE CASCADE,
            model TEXT NOT NULL,
            content TEXT NOT NULL,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            total_cost REAL,
            request_id TEXT REFERENCES request_log(id),
            created_at TEXT NOT NULL,
            UNIQUE(output_id, model)
        );
        ",
    )
    .map_err(|e| SurveyError::Database(e.to_string()))?;

    // Migration: databases created before judges could be pinned per prompt
    let has_evaluation_model: bool = conn
        .prepare("SELECT COUNT(*) FROM pragma_table_info('prompts') WHERE name='evaluation_model'")
        .and_then(|mut s| s.query_row([], |row| row.get(0)))
        .map_err(|e| SurveyError::Database(e.to_string()))?;

    if !has_evaluation_model {
        conn.execute_batch("ALTER TABLE prompts ADD COLUMN evaluation_model TEXT")
            .map_err(|e| SurveyError::Database(e.to_string()))?;
    }

    // Migration: outputs stored before replicate indices were recorded
    let has_sample: bool = conn
        .prepare("SELECT COUNT(*) FROM pragma_table_info('model_outputs') WHERE name='sample'")
        .and_then(|mut s| s.query_row([], |row| row.get(0)))
        .map_err(|e| SurveyError::Database(e.to_string()))?;

    if !has_sample {
        conn.execute_batch("ALTER TABLE model_outputs ADD COLUMN sample INTEGER")
            .map_err(|e| SurveyError::Database(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_db() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        // Second call should be idempotent
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };

        for table in [
            "embeddings",
            "evaluations",
            "model_outputs",
            "models",
            "prompts",
            "request_log",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn test_migrates_prompts_without_evaluation_model() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE prompts (
                id TEXT PRIMARY KEY,
                prompt TEXT NOT NULL,
                marking_scheme TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            );
            INSERT INTO prompts (id, prompt, updated_at) VALUES ('p', 'text', '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        init_db(&conn).unwrap();

        let judge: Option<String> = conn
            .query_row("SELECT evaluation_model FROM prompts WHERE id = 'p'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(judge, None);
    }

    #[test]
    fn test_migrates_outputs_without_sample() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE model_outputs (
                id TEXT PRIMARY KEY,
                prompt_id TEXT NOT NULL,
                model TEXT NOT NULL,
                content TEXT NOT NULL,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER,
                total_cost REAL,
                request_id TEXT,
                created_at TEXT NOT NULL
            );
            INSERT INTO model_outputs (id, prompt_id, model, content, created_at)
            VALUES ('o', 'p', 'm/a', 'answer', '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        init_db(&conn).unwrap();

        let sample: Option<u32> = conn
            .query_row("SELECT sample FROM model_outputs WHERE id = 'o'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sample, None);
    }

    #[test]
    fn test_duplicate_embedding_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO prompts (id, prompt, updated_at) VALUES ('p', 'text', 'now');
             INSERT INTO model_outputs (id, prompt_id, model, content, created_at)
             VALUES ('o', 'p', 'm/a', 'answer', 'now');
             INSERT INTO embeddings (id, output_id, model, dimensions, vector, created_at)
             VALUES ('e1', 'o', 'emb', 1, x'00000000', 'now');",
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO embeddings (id, output_id, model, dimensions, vector, created_at)
             VALUES ('e2', 'o', 'emb', 1, x'00000000', 'now')",
            [],
        );
        assert!(dup.is_err());
    }
}
