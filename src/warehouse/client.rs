use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Client, IntoUrl, Url,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::trace;
use uuid::Uuid;

use super::errors::{Result, WarehouseError};

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const BODY_CONTENT_TYPE: &str = "application/json";
const REQ_ACCEPT: &str = "application/snowflake";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMethod {
    Get,
    Post,
}

/// Serializes as `{}`; used as the body of requests that carry none.
#[derive(Debug, Default, Serialize)]
pub struct EmptySerde {}

impl EmptySerde {
    pub fn new() -> Self {
        Self {}
    }
}

#[derive(Debug)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut buf = Uuid::encode_buffer();
        serializer.serialize_str(self.0.hyphenated().encode_lower(&mut buf))
    }
}

#[derive(Debug, Default)]
pub struct SnowflakeClientBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl SnowflakeClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }

    pub fn build<U: IntoUrl>(self, base_url: U) -> Result<SnowflakeClient> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static(BODY_CONTENT_TYPE));
        default_headers.insert(ACCEPT, HeaderValue::from_static(REQ_ACCEPT));

        let mut builder = Client::builder()
            .user_agent(APP_USER_AGENT)
            .default_headers(default_headers);

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(connect_timeout) = self.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        let client = builder.build()?;
        Ok(SnowflakeClient {
            base_url: base_url.into_url()?,
            inner: client,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SnowflakeClient {
    base_url: Url,
    inner: Client,
}

impl SnowflakeClient {
    pub fn builder() -> SnowflakeClientBuilder {
        SnowflakeClientBuilder::default()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn execute<P, B, R>(
        &self,
        method: ExecMethod,
        url: &str,
        params: Option<&P>,
        body: B,
        token: Option<&str>,
    ) -> Result<R>
    where
        P: Serialize,
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(url)
            .map_err(|e| WarehouseError::UrlParseError(format!("{e}")))?;

        let mut req = match method {
            ExecMethod::Get => self.inner.get(url),
            ExecMethod::Post => self.inner.post(url).json(&body),
        };
        if let Some(params) = params {
            req = req.query(params);
        }
        if let Some(token) = token {
            let val = format!("Snowflake Token=\"{}\"", token);
            let val = HeaderValue::from_str(&val).map_err(|_| {
                WarehouseError::InvalidResponse("session token is not a valid header value".to_string())
            })?;
            req = req.header(AUTHORIZATION, val);
        }

        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(WarehouseError::HttpError { status, body: text });
        }
        trace!(%text, "response");

        let res: R = serde_json::from_str(&text)?;
        Ok(res)
    }
}
