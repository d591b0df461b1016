use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::debug;
use zerocopy::{FromBytes, IntoBytes};

use survey_core::{
    group_by, Embedding, Evaluation, Model, ModelOutput, OutputBundle, OutputFilter, Pricing,
    Prompt, RequestLog, RequestLogStore, StoreStats, SurveyError, SurveyResult, SurveyStore,
    Usage,
};

use crate::schema::init_db;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(path: &Path) -> SurveyResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SurveyError::Database(format!("cannot create db directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| SurveyError::Database(format!("cannot open database: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| SurveyError::Database(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> SurveyResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SurveyError::Database(format!("cannot open in-memory db: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| SurveyError::Database(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    fn count(&self, table: &str) -> SurveyResult<usize> {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, usize>(0)
            })
            .map_err(|e| SurveyError::Database(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn parse_dt(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn request_hash(request: &str) -> String {
    let mut h = Sha256::new();
    h.update(request.as_bytes());
    format!("{:x}", h.finalize())
}

fn encode_vector(vector: &[f32]) -> &[u8] {
    vector.as_bytes()
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::read_from_bytes(chunk).ok())
        .collect()
}

fn blob_to_vector(idx: usize, bytes: &[u8]) -> rusqlite::Result<Vec<f32>> {
    decode_vector(bytes).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("invalid embedding blob of {} bytes", bytes.len()).into(),
        )
    })
}

/// Usage columns start at `idx`: prompt_tokens, completion_tokens,
/// total_tokens, total_cost. All four are null when no usage was recorded.
fn usage_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<Usage>> {
    let prompt_tokens: Option<u32> = row.get(idx)?;
    let completion_tokens: Option<u32> = row.get(idx + 1)?;
    let total_tokens: Option<u32> = row.get(idx + 2)?;
    let total_cost: Option<f64> = row.get(idx + 3)?;
    Ok(match (prompt_tokens, completion_tokens, total_tokens, total_cost) {
        (Some(prompt_tokens), Some(completion_tokens), Some(total_tokens), Some(total_cost)) => {
            Some(Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
                total_cost,
            })
        }
        _ => None,
    })
}

fn row_to_model(row: &rusqlite::Row) -> rusqlite::Result<Model> {
    Ok(Model {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        context_length: row.get::<_, Option<i64>>(3)?.map(|n| n.max(0) as u64),
        pricing: Pricing::new(row.get(4)?, row.get(5)?),
    })
}

const MODEL_COLS: &str = "id, name, description, context_length, prompt_price, completion_price";

fn row_to_prompt(row: &rusqlite::Row) -> rusqlite::Result<Prompt> {
    Ok(Prompt {
        id: row.get(0)?,
        prompt: row.get(1)?,
        marking_scheme: row.get(2)?,
        evaluation_model: row.get(3)?,
    })
}

const PROMPT_COLS: &str = "id, prompt, marking_scheme, evaluation_model";

fn row_to_output(row: &rusqlite::Row) -> rusqlite::Result<ModelOutput> {
    let created_at: String = row.get(9)?;
    Ok(ModelOutput {
        id: row.get(0)?,
        prompt_id: row.get(1)?,
        model: row.get(2)?,
        content: row.get(3)?,
        usage: usage_at(row, 4)?,
        request_id: row.get(8)?,
        sample: row.get(10)?,
        created_at: parse_dt(&created_at),
    })
}

const OUTPUT_COLS: &str = "o.id, o.prompt_id, o.model, o.content, \
                           o.prompt_tokens, o.completion_tokens, o.total_tokens, o.total_cost, \
                           o.request_id, o.created_at, o.sample";

fn row_to_embedding(row: &rusqlite::Row) -> rusqlite::Result<Embedding> {
    let blob: Vec<u8> = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(Embedding {
        id: row.get(0)?,
        output_id: row.get(1)?,
        model: row.get(2)?,
        vector: blob_to_vector(3, &blob)?,
        request_id: row.get(4)?,
        created_at: parse_dt(&created_at),
    })
}

const EMBEDDING_COLS: &str = "id, output_id, model, vector, request_id, created_at";

fn row_to_evaluation(row: &rusqlite::Row) -> rusqlite::Result<Evaluation> {
    let created_at: String = row.get(9)?;
    Ok(Evaluation {
        id: row.get(0)?,
        output_id: row.get(1)?,
        model: row.get(2)?,
        content: row.get(3)?,
        usage: usage_at(row, 4)?,
        request_id: row.get(8)?,
        created_at: parse_dt(&created_at),
    })
}

const EVALUATION_COLS: &str = "v.id, v.output_id, v.model, v.content, \
                               v.prompt_tokens, v.completion_tokens, v.total_tokens, v.total_cost, \
                               v.request_id, v.created_at";

fn row_to_request_log(row: &rusqlite::Row) -> rusqlite::Result<RequestLog> {
    let created_at: String = row.get(1)?;
    let response: String = row.get(4)?;
    Ok(RequestLog {
        id: row.get(0)?,
        created_at: parse_dt(&created_at),
        resource: row.get(2)?,
        request: row.get(3)?,
        response: serde_json::from_str(&response)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
    })
}

const REQUEST_LOG_COLS: &str = "id, created_at, resource, request, response";

// ---------------------------------------------------------------------------
// SurveyStore impl
// ---------------------------------------------------------------------------

impl SurveyStore for SqliteStore {
    fn upsert_model(&self, model: &Model) -> SurveyResult<()> {
        self.conn
            .execute(
                "INSERT INTO models (id, name, description, context_length,
                 prompt_price, completion_price, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name, description = excluded.description,
                 context_length = excluded.context_length,
                 prompt_price = excluded.prompt_price,
                 completion_price = excluded.completion_price,
                 updated_at = excluded.updated_at",
                params![
                    model.id,
                    model.name,
                    model.description,
                    model.context_length.map(|n| n as i64),
                    model.pricing.prompt,
                    model.pricing.completion,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| SurveyError::Database(e.to_string()))?;
        Ok(())
    }

    fn get_model(&self, id: &str) -> SurveyResult<Option<Model>> {
        self.conn
            .query_row(
                &format!("SELECT {MODEL_COLS} FROM models WHERE id = ?1"),
                params![id],
                row_to_model,
            )
            .optional()
            .map_err(|e| SurveyError::Database(e.to_string()))
    }

    fn list_models(&self) -> SurveyResult<Vec<Model>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {MODEL_COLS} FROM models ORDER BY id"))
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], row_to_model)
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| SurveyError::Database(e.to_string()))?);
        }
        Ok(results)
    }

    fn save_prompt(&self, prompt: &Prompt) -> SurveyResult<()> {
        self.conn
            .execute(
                "INSERT INTO prompts (id, prompt, marking_scheme, evaluation_model, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                 prompt = excluded.prompt, marking_scheme = excluded.marking_scheme,
                 evaluation_model = excluded.evaluation_model, updated_at = excluded.updated_at",
                params![
                    prompt.id,
                    prompt.prompt,
                    prompt.marking_scheme,
                    prompt.evaluation_model,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| SurveyError::Database(e.to_string()))?;
        Ok(())
    }

    fn get_prompt(&self, id: &str) -> SurveyResult<Option<Prompt>> {
        self.conn
            .query_row(
                &format!("SELECT {PROMPT_COLS} FROM prompts WHERE id = ?1"),
                params![id],
                row_to_prompt,
            )
            .optional()
            .map_err(|e| SurveyError::Database(e.to_string()))
    }

    fn list_prompts(&self) -> SurveyResult<Vec<Prompt>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PROMPT_COLS} FROM prompts ORDER BY id"))
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], row_to_prompt)
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| SurveyError::Database(e.to_string()))?);
        }
        Ok(results)
    }

    fn insert_output(&self, output: ModelOutput) -> SurveyResult<String> {
        let usage = output.usage;
        self.conn
            .execute(
                "INSERT INTO model_outputs (id, prompt_id, model, content,
                 prompt_tokens, completion_tokens, total_tokens, total_cost,
                 request_id, created_at, sample)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    output.id,
                    output.prompt_id,
                    output.model,
                    output.content,
                    usage.map(|u| u.prompt_tokens),
                    usage.map(|u| u.completion_tokens),
                    usage.map(|u| u.total_tokens),
                    usage.map(|u| u.total_cost),
                    output.request_id,
                    output.created_at.to_rfc3339(),
                    output.sample,
                ],
            )
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        Ok(output.id)
    }

    fn get_output(&self, id: &str) -> SurveyResult<Option<ModelOutput>> {
        self.conn
            .query_row(
                &format!("SELECT {OUTPUT_COLS} FROM model_outputs o WHERE o.id = ?1"),
                params![id],
                row_to_output,
            )
            .optional()
            .map_err(|e| SurveyError::Database(e.to_string()))
    }

    fn list_outputs(&self, filter: &OutputFilter) -> SurveyResult<Vec<ModelOutput>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        // Each clause binds exactly one parameter, in push order.
        if let Some(prompt_id) = &filter.prompt_id {
            clauses.push("o.prompt_id = ?");
            param_values.push(Box::new(prompt_id.clone()));
        }
        if let Some(model) = &filter.model {
            clauses.push("o.model = ?");
            param_values.push(Box::new(model.clone()));
        }
        if let Some(needle) = &filter.model_contains {
            clauses.push("instr(o.model, ?) > 0");
            param_values.push(Box::new(needle.clone()));
        }
        if let Some(model) = &filter.missing_embedding {
            clauses.push(
                "NOT EXISTS (SELECT 1 FROM embeddings e WHERE e.output_id = o.id AND e.model = ?)",
            );
            param_values.push(Box::new(model.clone()));
        }
        if let Some(model) = &filter.missing_evaluation {
            clauses.push(
                "NOT EXISTS (SELECT 1 FROM evaluations v WHERE v.output_id = o.id AND v.model = ?)",
            );
            param_values.push(Box::new(model.clone()));
        }

        let mut sql = format!("SELECT {OUTPUT_COLS} FROM model_outputs o");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY o.model, o.rowid");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            param_values.push(Box::new(limit as i64));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(params_ref.as_slice(), row_to_output)
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| SurveyError::Database(e.to_string()))?);
        }
        Ok(results)
    }

    fn insert_embedding(&self, embedding: Embedding) -> SurveyResult<String> {
        self.conn
            .execute(
                "INSERT INTO embeddings (id, output_id, model, dimensions, vector,
                 request_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    embedding.id,
                    embedding.output_id,
                    embedding.model,
                    embedding.dimensions() as i64,
                    encode_vector(&embedding.vector),
                    embedding.request_id,
                    embedding.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        Ok(embedding.id)
    }

    fn get_embedding(&self, output_id: &str, model: &str) -> SurveyResult<Option<Embedding>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {EMBEDDING_COLS} FROM embeddings WHERE output_id = ?1 AND model = ?2"
                ),
                params![output_id, model],
                row_to_embedding,
            )
            .optional()
            .map_err(|e| SurveyError::Database(e.to_string()))
    }

    fn embedding_dimensions(&self, model: &str) -> SurveyResult<Option<usize>> {
        self.conn
            .query_row(
                "SELECT dimensions FROM embeddings WHERE model = ?1 ORDER BY rowid LIMIT 1",
                params![model],
                |row| row.get::<_, usize>(0),
            )
            .optional()
            .map_err(|e| SurveyError::Database(e.to_string()))
    }

    fn insert_evaluation(&self, evaluation: Evaluation) -> SurveyResult<String> {
        let usage = evaluation.usage;
        self.conn
            .execute(
                "INSERT INTO evaluations (id, output_id, model, content,
                 prompt_tokens, completion_tokens, total_tokens, total_cost,
                 request_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    evaluation.id,
                    evaluation.output_id,
                    evaluation.model,
                    evaluation.content,
                    usage.map(|u| u.prompt_tokens),
                    usage.map(|u| u.completion_tokens),
                    usage.map(|u| u.total_tokens),
                    usage.map(|u| u.total_cost),
                    evaluation.request_id,
                    evaluation.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        Ok(evaluation.id)
    }

    fn list_evaluations(&self, output_id: &str) -> SurveyResult<Vec<Evaluation>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {EVALUATION_COLS} FROM evaluations v WHERE v.output_id = ?1 ORDER BY v.model"
            ))
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![output_id], row_to_evaluation)
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| SurveyError::Database(e.to_string()))?);
        }
        Ok(results)
    }

    fn evaluation_models(&self) -> SurveyResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT model FROM evaluations ORDER BY model")
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| SurveyError::Database(e.to_string()))?);
        }
        Ok(results)
    }

    fn load_bundles(
        &self,
        prompt_id: &str,
        embedding_model: &str,
    ) -> SurveyResult<Vec<OutputBundle>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {OUTPUT_COLS}, e.vector FROM model_outputs o
                 LEFT JOIN embeddings e ON e.output_id = o.id AND e.model = ?2
                 WHERE o.prompt_id = ?1
                 ORDER BY o.model, o.rowid"
            ))
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![prompt_id, embedding_model], |row| {
                let output = row_to_output(row)?;
                let vector = match row.get::<_, Option<Vec<u8>>>(11)? {
                    Some(blob) => Some(blob_to_vector(11, &blob)?),
                    None => None,
                };
                Ok((output, vector))
            })
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let mut bundles = Vec::new();
        for row in rows {
            let (output, vector) = row.map_err(|e| SurveyError::Database(e.to_string()))?;
            let mut bundle = OutputBundle::new(output);
            bundle.embedding = vector.map(|v| v.into_iter().map(f64::from).collect());
            bundles.push(bundle);
        }

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {EVALUATION_COLS} FROM evaluations v
                 JOIN model_outputs o ON o.id = v.output_id
                 WHERE o.prompt_id = ?1
                 ORDER BY v.rowid"
            ))
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![prompt_id], row_to_evaluation)
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        let mut evaluations = Vec::new();
        for row in rows {
            evaluations.push(row.map_err(|e| SurveyError::Database(e.to_string()))?);
        }

        let by_output = group_by(evaluations, |e| e.output_id.clone());
        for bundle in &mut bundles {
            if let Some(found) = by_output.get(&bundle.output.id) {
                bundle.evaluations = found.to_vec();
            }
        }

        debug!(prompt_id, embedding_model, outputs = bundles.len(), "bundles loaded");
        Ok(bundles)
    }

    fn stats(&self) -> SurveyResult<StoreStats> {
        Ok(StoreStats {
            models: self.count("models")?,
            prompts: self.count("prompts")?,
            outputs: self.count("model_outputs")?,
            embeddings: self.count("embeddings")?,
            evaluations: self.count("evaluations")?,
            requests: self.count("request_log")?,
        })
    }
}

// ---------------------------------------------------------------------------
// RequestLogStore impl
// ---------------------------------------------------------------------------

impl RequestLogStore for SqliteStore {
    fn get_logged_request(&self, resource: &str, request: &str) -> SurveyResult<Option<RequestLog>> {
        // Earliest row wins when a race left duplicates behind.
        self.conn
            .query_row(
                &format!(
                    "SELECT {REQUEST_LOG_COLS} FROM request_log
                     WHERE resource = ?1 AND request_hash = ?2 AND request = ?3
                     ORDER BY rowid LIMIT 1"
                ),
                params![resource, request_hash(request), request],
                row_to_request_log,
            )
            .optional()
            .map_err(|e| SurveyError::Database(e.to_string()))
    }

    fn log_request(
        &self,
        resource: &str,
        request: &str,
        response: &serde_json::Value,
    ) -> SurveyResult<String> {
        let id = ulid::Ulid::new().to_string();
        let response_json = serde_json::to_string(response)?;
        self.conn
            .execute(
                "INSERT INTO request_log (id, created_at, resource, request_hash, request, response)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    Utc::now().to_rfc3339(),
                    resource,
                    request_hash(request),
                    request,
                    response_json,
                ],
            )
            .map_err(|e| SurveyError::Database(e.to_string()))?;

        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    fn seeded_store() -> SqliteStore {
        let store = test_store();
        store
            .save_prompt(&Prompt::new("marshmallow", "How many marshmallows fit in a car?"))
            .unwrap();
        store
    }

    fn usage(cost: f64) -> Usage {
        Usage {
            prompt_tokens: 10,
            completion_tokens: 20,
            total_tokens: 30,
            total_cost: cost,
        }
    }

    #[test]
    fn test_model_upsert_and_get() {
        let store = test_store();
        let mut model = Model::new("openai/gpt-4-turbo", Pricing::new(0.00001, 0.00003));
        model.context_length = Some(128_000);
        store.upsert_model(&model).unwrap();

        let got = store.get_model("openai/gpt-4-turbo").unwrap().unwrap();
        assert_eq!(got.name, "gpt-4-turbo");
        assert_eq!(got.context_length, Some(128_000));
        assert_eq!(got.pricing, model.pricing);

        model.pricing = Pricing::new(0.00002, 0.00004);
        model.description = "updated".into();
        store.upsert_model(&model).unwrap();

        let models = store.list_models().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].pricing.prompt, 0.00002);
        assert_eq!(models[0].description, "updated");
    }

    #[test]
    fn test_get_not_found() {
        let store = test_store();
        assert!(store.get_model("nope").unwrap().is_none());
        assert!(store.get_prompt("nope").unwrap().is_none());
        assert!(store.get_output("nope").unwrap().is_none());
        assert!(store.get_embedding("nope", "emb").unwrap().is_none());
    }

    #[test]
    fn test_prompt_upsert() {
        let store = seeded_store();
        let mut prompt = store.get_prompt("marshmallow").unwrap().unwrap();
        assert!(prompt.marking_scheme.is_empty());
        assert_eq!(prompt.evaluation_model, None);

        prompt.marking_scheme = "1 mark for an estimate".into();
        prompt.evaluation_model = Some("openai/gpt-4o".into());
        store.save_prompt(&prompt).unwrap();

        assert_eq!(store.get_prompt("marshmallow").unwrap().unwrap(), prompt);
        assert_eq!(store.list_prompts().unwrap().len(), 1);
    }

    #[test]
    fn test_output_requires_prompt() {
        let store = test_store();
        let result = store.insert_output(ModelOutput::new("missing", "m/a", "text"));
        assert!(matches!(result, Err(SurveyError::Database(_))));
    }

    #[test]
    fn test_output_roundtrip_with_and_without_usage() {
        let store = seeded_store();
        let paid = ModelOutput::new("marshmallow", "m/a", "About 20,000")
            .with_usage(usage(0.5))
            .with_sample(2);
        let human = ModelOutput::new("marshmallow", "human/human", "Roughly 30,000");

        let paid_id = store.insert_output(paid.clone()).unwrap();
        let human_id = store.insert_output(human).unwrap();

        let got = store.get_output(&paid_id).unwrap().unwrap();
        assert_eq!(got.content, "About 20,000");
        assert_eq!(got.usage, Some(usage(0.5)));
        assert_eq!(got.sample, Some(2));
        assert_eq!(got.created_at.timestamp(), paid.created_at.timestamp());

        let got = store.get_output(&human_id).unwrap().unwrap();
        assert_eq!(got.usage, None);
        assert_eq!(got.request_id, None);
        assert_eq!(got.sample, None);
    }

    #[test]
    fn test_list_outputs_order_and_filters() {
        let store = seeded_store();
        store.save_prompt(&Prompt::new("other", "Other")).unwrap();
        for (prompt, model) in [
            ("marshmallow", "z/model"),
            ("marshmallow", "a/model"),
            ("other", "a/model"),
            ("marshmallow", "z/model"),
            ("marshmallow", "a/model-large"),
        ] {
            store
                .insert_output(ModelOutput::new(prompt, model, format!("{prompt} {model}")))
                .unwrap();
        }

        let all = store
            .list_outputs(&OutputFilter::for_prompt("marshmallow"))
            .unwrap();
        let models: Vec<&str> = all.iter().map(|o| o.model.as_str()).collect();
        assert_eq!(models, vec!["a/model", "a/model-large", "z/model", "z/model"]);

        let exact = store
            .list_outputs(&OutputFilter {
                model: Some("a/model".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(exact.len(), 2);

        let contains = store
            .list_outputs(&OutputFilter {
                prompt_id: Some("marshmallow".into()),
                model_contains: Some("a/".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(contains.len(), 2);

        let limited = store
            .list_outputs(&OutputFilter {
                limit: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[test]
    fn test_missing_embedding_and_evaluation_filters() {
        let store = seeded_store();
        let a = store
            .insert_output(ModelOutput::new("marshmallow", "m/a", "one"))
            .unwrap();
        let b = store
            .insert_output(ModelOutput::new("marshmallow", "m/b", "two"))
            .unwrap();

        store
            .insert_embedding(Embedding::new(&a, "emb-small", vec![0.1, 0.2]))
            .unwrap();
        store
            .insert_evaluation(Evaluation::new(&b, "judge", "Score: 4"))
            .unwrap();

        let unembedded = store
            .list_outputs(&OutputFilter {
                missing_embedding: Some("emb-small".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(unembedded.len(), 1);
        assert_eq!(unembedded[0].id, b);

        // Another embedding model still needs both.
        let other = store
            .list_outputs(&OutputFilter {
                missing_embedding: Some("emb-large".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(other.len(), 2);

        let unjudged = store
            .list_outputs(&OutputFilter {
                missing_evaluation: Some("judge".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(unjudged.len(), 1);
        assert_eq!(unjudged[0].id, a);
    }

    #[test]
    fn test_embedding_roundtrip_and_dimensions() {
        let store = seeded_store();
        let out = store
            .insert_output(ModelOutput::new("marshmallow", "m/a", "one"))
            .unwrap();
        assert_eq!(store.embedding_dimensions("emb").unwrap(), None);

        let vector = vec![0.25_f32, -1.5, 3.0];
        store
            .insert_embedding(Embedding::new(&out, "emb", vector.clone()))
            .unwrap();

        let got = store.get_embedding(&out, "emb").unwrap().unwrap();
        assert_eq!(got.vector, vector);
        assert_eq!(store.embedding_dimensions("emb").unwrap(), Some(3));
    }

    #[test]
    fn test_one_embedding_per_output_and_model() {
        let store = seeded_store();
        let out = store
            .insert_output(ModelOutput::new("marshmallow", "m/a", "one"))
            .unwrap();
        store
            .insert_embedding(Embedding::new(&out, "emb", vec![1.0]))
            .unwrap();
        let dup = store.insert_embedding(Embedding::new(&out, "emb", vec![2.0]));
        assert!(matches!(dup, Err(SurveyError::Database(_))));
    }

    #[test]
    fn test_decode_vector_rejects_partial_blob() {
        assert_eq!(decode_vector(&[0, 0, 0]), None);
        assert_eq!(decode_vector(&[]), Some(Vec::new()));
        let bytes = encode_vector(&[1.0, 2.0]).to_vec();
        assert_eq!(decode_vector(&bytes), Some(vec![1.0, 2.0]));
    }

    #[test]
    fn test_evaluations_and_models() {
        let store = seeded_store();
        let out = store
            .insert_output(ModelOutput::new("marshmallow", "m/a", "one"))
            .unwrap();
        let mut eval = Evaluation::new(&out, "openai/gpt-4o", "Score: 7");
        eval.usage = Some(usage(0.01));
        store.insert_evaluation(eval).unwrap();
        store
            .insert_evaluation(Evaluation::new(&out, "anthropic/claude-3-opus", "Score: 6"))
            .unwrap();

        let evals = store.list_evaluations(&out).unwrap();
        assert_eq!(evals.len(), 2);
        assert_eq!(evals[1].usage, Some(usage(0.01)));
        assert_eq!(
            store.evaluation_models().unwrap(),
            vec!["anthropic/claude-3-opus", "openai/gpt-4o"]
        );
    }

    #[test]
    fn test_load_bundles() {
        let store = seeded_store();
        let a1 = store
            .insert_output(ModelOutput::new("marshmallow", "m/a", "a1").with_usage(usage(1.0)))
            .unwrap();
        let a2 = store
            .insert_output(ModelOutput::new("marshmallow", "m/a", "a2"))
            .unwrap();
        let b1 = store
            .insert_output(ModelOutput::new("marshmallow", "m/b", "b1"))
            .unwrap();

        store
            .insert_embedding(Embedding::new(&a1, "emb", vec![1.0, 0.0]))
            .unwrap();
        store
            .insert_embedding(Embedding::new(&a2, "other-emb", vec![0.0, 1.0]))
            .unwrap();
        store
            .insert_evaluation(Evaluation::new(&b1, "judge", "Score: 5"))
            .unwrap();

        let bundles = store.load_bundles("marshmallow", "emb").unwrap();
        assert_eq!(bundles.len(), 3);
        assert_eq!(bundles[0].output.id, a1);
        assert_eq!(bundles[0].embedding, Some(vec![1.0, 0.0]));
        assert_eq!(bundles[0].total_cost(), Some(1.0));
        assert_eq!(bundles[1].embedding, None);
        assert!(bundles[1].evaluations.is_empty());
        assert_eq!(bundles[2].score("judge"), Some(5.0));

        assert!(store.load_bundles("unknown", "emb").unwrap().is_empty());
    }

    #[test]
    fn test_request_log_lookup() {
        let store = test_store();
        assert!(store
            .get_logged_request("completion", r#"{"model":"m"}"#)
            .unwrap()
            .is_none());

        let response = json!({"model": "m", "content": "hello"});
        let id = store
            .log_request("completion", r#"{"model":"m"}"#, &response)
            .unwrap();

        let logged = store
            .get_logged_request("completion", r#"{"model":"m"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(logged.id, id);
        assert_eq!(logged.response, response);

        assert!(store
            .get_logged_request("embedding", r#"{"model":"m"}"#)
            .unwrap()
            .is_none());
        assert!(store
            .get_logged_request("completion", r#"{"model":"n"}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_request_log_duplicates_return_earliest() {
        let store = test_store();
        let first = store
            .log_request("models", "{}", &json!({"data": [1]}))
            .unwrap();
        store
            .log_request("models", "{}", &json!({"data": [2]}))
            .unwrap();

        let logged = store.get_logged_request("models", "{}").unwrap().unwrap();
        assert_eq!(logged.id, first);
        assert_eq!(store.stats().unwrap().requests, 2);
    }

    #[test]
    fn test_stats() {
        let store = seeded_store();
        store
            .upsert_model(&Model::new("m/a", Pricing::default()))
            .unwrap();
        let out = store
            .insert_output(ModelOutput::new("marshmallow", "m/a", "one"))
            .unwrap();
        store
            .insert_embedding(Embedding::new(&out, "emb", vec![1.0]))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.models, 1);
        assert_eq!(stats.prompts, 1);
        assert_eq!(stats.outputs, 1);
        assert_eq!(stats.embeddings, 1);
        assert_eq!(stats.evaluations, 0);
        assert_eq!(stats.requests, 0);
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("survey.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.save_prompt(&Prompt::new("p", "text")).unwrap();
            store.log_request("models", "{}", &json!([])).unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert!(store.get_prompt("p").unwrap().is_some());
        assert!(store.get_logged_request("models", "{}").unwrap().is_some());
    }
}
