use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use survey_core::{SurveyError, SurveyResult};

use crate::wire::status_error;

/// Blocking JSON client bound to one API base URL and key.
#[derive(Debug, Clone)]
pub(crate) struct JsonClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl JsonClient {
    pub(crate) fn new(api_key: String, base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    pub(crate) fn get<T: DeserializeOwned>(&self, path: &str) -> SurveyResult<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let request = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key));
        read_json(request.call())
    }

    pub(crate) fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> SurveyResult<T> {
        let url = self.url(path);
        debug!(%url, "POST");
        let request = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.api_key));
        read_json(request.send_json(body))
    }
}

fn read_json<T: DeserializeOwned>(result: Result<ureq::Response, ureq::Error>) -> SurveyResult<T> {
    match result {
        Ok(response) => response
            .into_json()
            .map_err(|e| SurveyError::Provider(format!("invalid response body: {e}"))),
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Err(status_error(status, &body))
        }
        Err(ureq::Error::Transport(transport)) => Err(SurveyError::Transport(transport.to_string())),
    }
}

/// API key from the environment. A missing key is a configuration error.
pub(crate) fn env_key(var: &str) -> SurveyResult<String> {
    std::env::var(var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| SurveyError::Config(format!("{var} not set")))
}
