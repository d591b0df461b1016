//! Content-addressed request cache over the request log.
//!
//! Every paid call goes through [`RequestCache::invoke`]. A call whose
//! `(resource, request)` pair is already logged is answered from the log and
//! never reaches the provider, which is what makes reruns free. Nothing is
//! logged for a failed call.
//!
//! The lookup and the insert are not atomic. Two processes racing on the same
//! key can both miss and both pay; the sequential runner never does this.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::SurveyResult;
use crate::store::RequestLogStore;

pub const COMPLETION: &str = "completion";
pub const EMBEDDING: &str = "embedding";
pub const MODELS: &str = "models";

/// Logical identity of an external call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource: String,
    /// Canonical JSON of the call arguments.
    pub request: String,
}

#[derive(Serialize)]
struct CompletionArgs<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sample: Option<u32>,
}

#[derive(Serialize)]
struct EmbeddingArgs<'a> {
    model: &'a str,
    content: &'a str,
}

impl CacheKey {
    pub fn new<A: Serialize + ?Sized>(resource: &str, args: &A) -> SurveyResult<Self> {
        let value = serde_json::to_value(args)?;
        Ok(Self {
            resource: resource.to_string(),
            request: canonical_json(&value),
        })
    }

    /// Key for a chat completion. Generations pass their replicate index as
    /// `sample` so that each replicate is its own call; judgements pass `None`.
    pub fn completion(model: &str, prompt: &str, sample: Option<u32>) -> SurveyResult<Self> {
        Self::new(
            COMPLETION,
            &CompletionArgs {
                model,
                prompt,
                sample,
            },
        )
    }

    pub fn embedding(model: &str, content: &str) -> SurveyResult<Self> {
        Self::new(EMBEDDING, &EmbeddingArgs { model, content })
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Result of [`RequestCache::invoke`].
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub log_id: String,
    pub response: T,
    /// True when the response came from the log and no call was made.
    pub reused: bool,
}

pub struct RequestCache<'a, S: RequestLogStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RequestLogStore + ?Sized> RequestCache<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn invoke<T, F>(&self, key: &CacheKey, call: F) -> SurveyResult<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> SurveyResult<T>,
    {
        if let Some(logged) = self.store.get_logged_request(&key.resource, &key.request)? {
            debug!(resource = %key.resource, log_id = %logged.id, "request cache hit");
            return Ok(Cached {
                log_id: logged.id,
                response: serde_json::from_value(logged.response)?,
                reused: true,
            });
        }

        debug!(resource = %key.resource, "request cache miss");
        let response = call()?;
        let payload = serde_json::to_value(&response)?;
        let log_id = self
            .store
            .log_request(&key.resource, &key.request, &payload)?;

        Ok(Cached {
            log_id,
            response,
            reused: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::error::SurveyError;
    use crate::model::RequestLog;

    #[derive(Default)]
    struct LogOnly {
        rows: RefCell<Vec<RequestLog>>,
    }

    impl RequestLogStore for LogOnly {
        fn get_logged_request(
            &self,
            resource: &str,
            request: &str,
        ) -> SurveyResult<Option<RequestLog>> {
            Ok(self
                .rows
                .borrow()
                .iter()
                .find(|r| r.resource == resource && r.request == request)
                .cloned())
        }

        fn log_request(&self, resource: &str, request: &str, response: &Value) -> SurveyResult<String> {
            let mut rows = self.rows.borrow_mut();
            let id = format!("log-{}", rows.len() + 1);
            rows.push(RequestLog {
                id: id.clone(),
                created_at: Utc::now(),
                resource: resource.into(),
                request: request.into(),
                response: response.clone(),
            });
            Ok(id)
        }
    }

    #[test]
    fn test_same_key_calls_once() {
        let store = LogOnly::default();
        let cache = RequestCache::new(&store);
        let calls = Cell::new(0);
        let key = CacheKey::completion("test-model", "Hi", None).unwrap();

        let call = || {
            calls.set(calls.get() + 1);
            Ok(json!({"model": "test-model", "result": "hello, world"}))
        };
        let first: Cached<Value> = cache.invoke(&key, call).unwrap();
        let second: Cached<Value> = cache.invoke(&key, call).unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(first.log_id, second.log_id);
        assert_eq!(first.response, second.response);
        assert!(!first.reused);
        assert!(second.reused);
    }

    #[test]
    fn test_different_args_call_twice() {
        let store = LogOnly::default();
        let cache = RequestCache::new(&store);
        let calls = Cell::new(0);
        let call = || {
            calls.set(calls.get() + 1);
            Ok("hello".to_string())
        };

        let a = cache
            .invoke(&CacheKey::completion("test-model-1", "Hi", None).unwrap(), call)
            .unwrap();
        let b = cache
            .invoke(&CacheKey::completion("test-model-2", "Hi", None).unwrap(), call)
            .unwrap();

        assert_eq!(calls.get(), 2);
        assert_ne!(a.log_id, b.log_id);
    }

    #[test]
    fn test_failure_logs_nothing() {
        let store = LogOnly::default();
        let cache = RequestCache::new(&store);
        let key = CacheKey::embedding("text-embedding-3-small", "text").unwrap();

        let result: SurveyResult<Cached<Vec<f32>>> =
            cache.invoke(&key, || Err(SurveyError::Provider("rate limited".into())));
        assert!(matches!(result, Err(SurveyError::Provider(_))));
        assert!(store.rows.borrow().is_empty());

        let retried = cache.invoke(&key, || Ok(vec![0.2_f32, 0.3])).unwrap();
        assert!(!retried.reused);
        assert_eq!(store.rows.borrow().len(), 1);
    }

    #[test]
    fn test_canonical_json_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": "s"}});
        let b = json!({"a": {"x": "s", "y": [1, 2]}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":"s","y":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_sample_is_part_of_the_key() {
        let first = CacheKey::completion("m", "p", Some(0)).unwrap();
        let second = CacheKey::completion("m", "p", Some(1)).unwrap();
        let judge = CacheKey::completion("m", "p", None).unwrap();
        assert_ne!(first, second);
        assert_ne!(first, judge);
        assert_eq!(judge.request, r#"{"model":"m","prompt":"p"}"#);
    }

    #[test]
    fn test_resources_do_not_collide() {
        let completion = CacheKey::new(COMPLETION, &json!({"model": "m"})).unwrap();
        let embedding = CacheKey::new(EMBEDDING, &json!({"model": "m"})).unwrap();
        assert_eq!(completion.request, embedding.request);
        assert_ne!(completion, embedding);
    }
}
