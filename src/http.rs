use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use reqwest::{header, Url};

use crate::{
    store::normalize_bearer_authorization, wire::HelloResponse, ConnectFailure, ConnectOptions,
    ConnectionFactory, StoreConfig, StoreConnection, TimeoutBudget,
};

const HELLO_PATH: &str = "v1/hello";

/// Opens [`StoreConnection`]s over HTTP.
///
/// Each open builds a bounded reqwest pool and runs a discovery handshake
/// (`GET v1/hello`) within the discovery budget before handing out a handle.
#[derive(Clone)]
pub struct HttpConnectionFactory {
    authorization: Option<String>,
    options: ConnectOptions,
}

impl std::fmt::Debug for HttpConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnectionFactory")
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("options", &self.options)
            .finish()
    }
}

impl HttpConnectionFactory {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            authorization: None,
            options,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        let factory = Self::new(config.options.clone());
        match config.token() {
            Some(token) => factory.with_bearer(token),
            None => factory,
        }
    }

    /// Sends `Authorization: Bearer <token>`; the prefix is added if missing.
    pub fn with_bearer(mut self, token: impl AsRef<str>) -> Self {
        self.authorization = Some(normalize_bearer_authorization(token.as_ref()));
        self
    }

    fn build_client(&self, budget: TimeoutBudget) -> Result<reqwest::Client, ConnectFailure> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(budget.connect)
            .timeout(budget.operation)
            .pool_max_idle_per_host(self.options.max_pool_size)
            .pool_idle_timeout(self.options.max_idle_time());
        if self.options.ipv4_only {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }
        builder
            .build()
            .map_err(|err| ConnectFailure::Transport(Arc::new(err)))
    }

    async fn handshake(
        &self,
        http: &reqwest::Client,
        base: &Url,
        budget: TimeoutBudget,
    ) -> Result<HelloResponse, ConnectFailure> {
        let url = base
            .join(HELLO_PATH)
            .map_err(|err| ConnectFailure::InvalidUri(err.to_string()))?;
        let mut request = http.get(url).timeout(budget.discovery);
        if let Some(authorization) = &self.authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ConnectFailure::Discovery {
                    timeout: budget.discovery,
                }
            } else {
                ConnectFailure::Transport(Arc::new(err))
            }
        })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ConnectFailure::Transport(Arc::new(err)))?;

        if !status.is_success() {
            return Err(ConnectFailure::Handshake {
                status: status.as_u16(),
                body,
            });
        }
        let hello: HelloResponse = serde_json::from_str(&body).map_err(|err| {
            ConnectFailure::Protocol(format!("invalid hello response JSON: {err}; body: {body}"))
        })?;
        if !hello.ok {
            // A server that answers but is not serving yet is worth retrying.
            return Err(ConnectFailure::Handshake {
                status: 503,
                body: hello.message.unwrap_or_else(|| "server not ready".to_owned()),
            });
        }
        Ok(hello)
    }

    /// Fires best-effort hello requests so `min_pool_size` sockets are open.
    fn warm_pool(&self, http: &reqwest::Client, base: &Url) {
        let extra = self.options.min_pool_size.saturating_sub(1);
        let Ok(url) = base.join(HELLO_PATH) else {
            return;
        };
        for _ in 0..extra {
            let mut request = http.get(url.clone());
            if let Some(authorization) = &self.authorization {
                request = request.header(header::AUTHORIZATION, authorization);
            }
            tokio::spawn(async move {
                let _ = request.send().await;
            });
        }
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    type Handle = StoreConnection;

    fn open(
        &self,
        uri: &str,
        budget: TimeoutBudget,
    ) -> impl Future<Output = Result<StoreConnection, ConnectFailure>> + Send {
        let parsed = parse_store_uri(uri);
        async move {
            let base = parsed?;
            let http = self.build_client(budget)?;
            let hello = self.handshake(&http, &base, budget).await?;

            let endpoint = match hello.endpoint.as_deref() {
                Some(endpoint) => parse_store_uri(endpoint)?,
                None => base,
            };
            self.warm_pool(&http, &endpoint);

            #[cfg(feature = "tracing")]
            tracing::info!(endpoint = %endpoint, server = ?hello.server, "store handshake complete");
            Ok(StoreConnection::new(
                http,
                endpoint,
                self.authorization.clone(),
                hello.server,
            ))
        }
    }
}

/// Parses a connection URI into a base URL ending in `/`.
///
/// `docstore://host/path` is shorthand for `https://host/path`.
pub(crate) fn parse_store_uri(uri: &str) -> Result<Url, ConnectFailure> {
    let trimmed = uri.trim();
    let normalized = match trimmed.strip_prefix("docstore://") {
        Some(rest) => format!("https://{rest}"),
        None => trimmed.to_owned(),
    };
    let mut url = Url::parse(&normalized)
        .map_err(|err| ConnectFailure::InvalidUri(format!("{trimmed}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConnectFailure::InvalidUri(format!(
            "{trimmed}: unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
