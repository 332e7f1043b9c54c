use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::config;

/// One page of provider-native key payloads.
#[derive(Debug, Default, Deserialize)]
pub struct KeyPage {
    #[serde(default)]
    pub keys: Vec<Value>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// key: provider-adapter
/// Uniform capability set of one external key backend. Reconciliation consumes only
/// `list_keys`; the remaining operations serve the direct CRUD proxy path.
#[async_trait]
pub trait KeyProviderAdapter: Send + Sync {
    async fn list_keys(&self, page_size: usize, page_token: Option<&str>) -> Result<KeyPage>;
    async fn get_key(&self, key_id: &str) -> Result<Value>;
    async fn create_key(&self, spec: Value) -> Result<Value>;
    async fn set_key_enabled(&self, key_id: &str, enabled: bool) -> Result<Value>;
    async fn set_rotation(&self, key_id: &str, enabled: bool) -> Result<Value>;
    async fn schedule_deletion(&self, key_id: &str, days: u32) -> Result<Value>;
    async fn encrypt(&self, key_id: &str, plaintext: &str) -> Result<Value>;
    async fn decrypt(&self, key_id: &str, ciphertext: &str) -> Result<Value>;

    /// Drains the paginated listing into one vector. Pagination stays an adapter
    /// concern; callers see the full live key set or a single failure.
    async fn list_all_keys(&self) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_keys(100, token.as_deref()).await?;
            items.extend(page.keys);
            match page.next_token {
                Some(next) => {
                    if token.as_deref() == Some(next.as_str()) {
                        return Err(anyhow!("provider listing did not advance past page token"));
                    }
                    token = Some(next);
                }
                None => return Ok(items),
            }
        }
    }
}

/// key: provider-adapter-http
/// Forwards every operation to a per-provider key module service over HTTP with a
/// bounded timeout. Module wire errors surface as adapter failures.
pub struct HttpKeyModuleAdapter {
    provider: String,
    base: Url,
    client: reqwest::Client,
}

impl HttpKeyModuleAdapter {
    pub fn new(provider: &str, base: Url) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(*config::PROVIDER_MODULE_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            provider: provider.to_string(),
            base,
            client,
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), action)
    }

    async fn post_json(&self, action: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.endpoint(action))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} module unreachable for {action}", self.provider))?
            .error_for_status()
            .with_context(|| format!("{} module rejected {action}", self.provider))?;
        response
            .json::<Value>()
            .await
            .with_context(|| format!("{} module returned malformed {action} payload", self.provider))
    }
}

#[async_trait]
impl KeyProviderAdapter for HttpKeyModuleAdapter {
    async fn list_keys(&self, page_size: usize, page_token: Option<&str>) -> Result<KeyPage> {
        let mut request = self
            .client
            .get(self.endpoint("list-keys"))
            .query(&[("page_size", page_size.to_string())]);
        if let Some(token) = page_token {
            request = request.query(&[("page_token", token)]);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("{} module unreachable for list-keys", self.provider))?
            .error_for_status()
            .with_context(|| format!("{} module rejected list-keys", self.provider))?;
        response
            .json::<KeyPage>()
            .await
            .with_context(|| format!("{} module returned malformed listing", self.provider))
    }

    async fn get_key(&self, key_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.endpoint("get-key"))
            .query(&[("key_id", key_id)])
            .send()
            .await
            .with_context(|| format!("{} module unreachable for get-key", self.provider))?
            .error_for_status()
            .with_context(|| format!("{} module rejected get-key", self.provider))?;
        response
            .json::<Value>()
            .await
            .with_context(|| format!("{} module returned malformed key payload", self.provider))
    }

    async fn create_key(&self, spec: Value) -> Result<Value> {
        self.post_json("create-key", spec).await
    }

    async fn set_key_enabled(&self, key_id: &str, enabled: bool) -> Result<Value> {
        let action = if enabled { "enable-key" } else { "disable-key" };
        self.post_json(action, json!({ "key_id": key_id })).await
    }

    async fn set_rotation(&self, key_id: &str, enabled: bool) -> Result<Value> {
        let action = if enabled {
            "enable-rotation"
        } else {
            "disable-rotation"
        };
        self.post_json(action, json!({ "key_id": key_id })).await
    }

    async fn schedule_deletion(&self, key_id: &str, days: u32) -> Result<Value> {
        self.post_json(
            "schedule-deletion",
            json!({ "key_id": key_id, "days": days }),
        )
        .await
    }

    async fn encrypt(&self, key_id: &str, plaintext: &str) -> Result<Value> {
        self.post_json("encrypt", json!({ "key_id": key_id, "plaintext": plaintext }))
            .await
    }

    async fn decrypt(&self, key_id: &str, ciphertext: &str) -> Result<Value> {
        self.post_json("decrypt", json!({ "key_id": key_id, "ciphertext": ciphertext }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    struct ScriptedAdapter {
        pages: Mutex<VecDeque<KeyPage>>,
    }

    #[async_trait]
    impl KeyProviderAdapter for ScriptedAdapter {
        async fn list_keys(&self, _page_size: usize, _page_token: Option<&str>) -> Result<KeyPage> {
            self.pages
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow!("listing exhausted"))
        }

        async fn get_key(&self, _key_id: &str) -> Result<Value> {
            Err(anyhow!("not supported"))
        }
        async fn create_key(&self, _spec: Value) -> Result<Value> {
            Err(anyhow!("not supported"))
        }
        async fn set_key_enabled(&self, _key_id: &str, _enabled: bool) -> Result<Value> {
            Err(anyhow!("not supported"))
        }
        async fn set_rotation(&self, _key_id: &str, _enabled: bool) -> Result<Value> {
            Err(anyhow!("not supported"))
        }
        async fn schedule_deletion(&self, _key_id: &str, _days: u32) -> Result<Value> {
            Err(anyhow!("not supported"))
        }
        async fn encrypt(&self, _key_id: &str, _plaintext: &str) -> Result<Value> {
            Err(anyhow!("not supported"))
        }
        async fn decrypt(&self, _key_id: &str, _ciphertext: &str) -> Result<Value> {
            Err(anyhow!("not supported"))
        }
    }

    #[tokio::test]
    async fn list_all_keys_drains_pagination() {
        let adapter = ScriptedAdapter {
            pages: Mutex::new(VecDeque::from(vec![
                KeyPage {
                    keys: vec![serde_json::json!({"KeyId": "a"})],
                    next_token: Some("p2".into()),
                },
                KeyPage {
                    keys: vec![serde_json::json!({"KeyId": "b"})],
                    next_token: None,
                },
            ])),
        };
        let keys = adapter.list_all_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn list_all_keys_rejects_stuck_page_token() {
        let stuck = || KeyPage {
            keys: vec![],
            next_token: Some("same".into()),
        };
        let adapter = ScriptedAdapter {
            pages: Mutex::new(VecDeque::from(vec![stuck(), stuck()])),
        };
        assert!(adapter.list_all_keys().await.is_err());
    }

    #[tokio::test]
    async fn http_listing_sends_pagination_params() {
        let server = MockServer::start();
        let listing = server.mock(|when, then| {
            when.method(GET)
                .path("/list-keys")
                .query_param("page_size", "100");
            then.status(200)
                .json_body(serde_json::json!({"keys": [{"KeyId": "a"}], "next_token": null}));
        });

        let adapter = HttpKeyModuleAdapter::new("aws", Url::parse(&server.base_url()).unwrap());
        let keys = adapter.list_all_keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        listing.assert();
    }

    #[tokio::test]
    async fn module_error_surfaces_as_adapter_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/list-keys");
            then.status(500);
        });

        let adapter = HttpKeyModuleAdapter::new("aws", Url::parse(&server.base_url()).unwrap());
        assert!(adapter.list_all_keys().await.is_err());
    }
}
