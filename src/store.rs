use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use reqwest::{header, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    wire::{
        FindOneResponse, FindRequest, FindResponse, InsertRequest, InsertResponse,
        UpdateManyRequest, UpdateResponse,
    },
    FaultNotifier, InsertResult, StoreError, StoreHandle, UpdateResult,
};

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Handle to an established document store connection.
///
/// Clones share the underlying HTTP pool and readiness flag. There is no
/// `close`: the coordinator owns the connection and callers only borrow it.
#[derive(Clone)]
pub struct StoreConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    http: reqwest::Client,
    base: Url,
    authorization: Option<String>,
    server: Option<String>,
    ready: AtomicBool,
    on_fault: OnceLock<FaultNotifier>,
}

impl fmt::Debug for StoreConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConnection")
            .field("base", &self.inner.base.as_str())
            .field(
                "authorization",
                &self.inner.authorization.as_ref().map(|_| "<redacted>"),
            )
            .field("server", &self.inner.server)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl StoreHandle for StoreConnection {
    fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    fn on_fault(&self, notifier: FaultNotifier) {
        if self.inner.on_fault.set(notifier).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("fault notifier already registered");
        }
    }
}

impl StoreConnection {
    pub(crate) fn new(
        http: reqwest::Client,
        base: Url,
        authorization: Option<String>,
        server: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                http,
                base,
                authorization,
                server,
                ready: AtomicBool::new(true),
                on_fault: OnceLock::new(),
            }),
        }
    }

    /// Endpoint operations are sent to.
    pub fn endpoint(&self) -> &Url {
        &self.inner.base
    }

    /// Server identification reported by the handshake, if any.
    pub fn server(&self) -> Option<&str> {
        self.inner.server.as_deref()
    }

    /// Inserts one document and returns its id.
    pub async fn insert_one<D: Serialize>(
        &self,
        collection: &str,
        document: &D,
    ) -> StoreResult<InsertResult> {
        let url = self.endpoint_url(&["v1", "collections", collection, "documents"])?;
        let response: InsertResponse = self
            .send_json(Method::POST, url, Some(&InsertRequest { document }))
            .await?
            .ok_or_else(|| StoreError::Decode("insert returned no body".to_owned()))?;
        Ok(InsertResult {
            inserted_id: response.inserted_id,
        })
    }

    /// Looks a document up by id. `Ok(None)` when it does not exist.
    pub async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Value>> {
        let url = self.endpoint_url(&["v1", "collections", collection, "documents", id])?;
        let response: Option<FindOneResponse> =
            self.send_json::<(), _>(Method::GET, url, None).await?;
        Ok(response.and_then(|found| found.document))
    }

    /// Returns every document matching `filter`.
    pub async fn find(&self, collection: &str, filter: &Value) -> StoreResult<Vec<Value>> {
        let url = self.endpoint_url(&["v1", "collections", collection, "find"])?;
        let response: Option<FindResponse> = self
            .send_json(Method::POST, url, Some(&FindRequest { filter }))
            .await?;
        Ok(response.map(|found| found.documents).unwrap_or_default())
    }

    /// Applies `update` to every document matching `filter`.
    pub async fn update_many(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> StoreResult<UpdateResult> {
        let url = self.endpoint_url(&["v1", "collections", collection, "update_many"])?;
        let response: UpdateResponse = self
            .send_json(Method::POST, url, Some(&UpdateManyRequest { filter, update }))
            .await?
            .ok_or_else(|| StoreError::Decode("update_many returned no body".to_owned()))?;
        Ok(UpdateResult {
            matched_count: response.matched_count,
            modified_count: response.modified_count,
        })
    }

    /// Round-trip health check. Meant for confirming a suspected fault, not
    /// for gating every acquisition.
    pub async fn ping(&self) -> StoreResult<()> {
        let url = self.endpoint_url(&["v1", "hello"])?;
        let _: Option<Value> = self.send_json::<(), _>(Method::GET, url, None).await?;
        Ok(())
    }

    /// Appends `segments` to the endpoint, each one percent-encoded, so a
    /// name containing `/`, `?` or `#` stays inside its own segment.
    fn endpoint_url(&self, segments: &[&str]) -> StoreResult<Url> {
        if let Some(name) = segments
            .iter()
            .find(|segment| matches!(**segment, "" | "." | ".."))
        {
            return Err(StoreError::InvalidName(format!(
                "{name:?} is not a usable collection or document name"
            )));
        }
        let mut url = self.inner.base.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::InvalidName(format!("{} cannot take a path", self.inner.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a request; `Ok(None)` on 404.
    async fn send_json<B, T>(&self, method: Method, url: Url, body: Option<&B>) -> StoreResult<Option<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        if !self.is_ready() {
            return Err(StoreError::NotReady);
        }

        let mut request = self.inner.http.request(method, url);
        if let Some(authorization) = &self.inner.authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Err(self.transport_error(err)),
        };
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| self.transport_error(err))?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(StoreError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| StoreError::Decode(format!("invalid response JSON: {err}; body: {text}")))
    }

    fn transport_error(&self, err: reqwest::Error) -> StoreError {
        let err = StoreError::Transport(Arc::new(err));
        if err.is_connection_fault() {
            self.mark_faulted();
        }
        err
    }

    /// Flips readiness off and fires the fault notifier, once.
    fn mark_faulted(&self) {
        if self.inner.ready.swap(false, Ordering::AcqRel) {
            #[cfg(feature = "tracing")]
            tracing::warn!(endpoint = %self.inner.base, "store connection faulted");
            if let Some(notifier) = self.inner.on_fault.get() {
                notifier.notify_lost();
            }
        }
    }
}

/// Normalizes a token into an `Authorization` header value.
pub(crate) fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
