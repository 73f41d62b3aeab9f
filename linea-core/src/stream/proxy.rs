use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::ProxySection;

use super::{StreamError, StreamResult};

/// Origin response headers forwarded to the client. Everything else is
/// dropped: the proxy re-frames the body itself, so hop-by-hop and
/// transfer/encoding headers from origin would be lies.
pub const PASSTHROUGH_HEADERS: [&str; 3] = ["content-type", "content-length", "accept-ranges"];

/// An open origin response ready to relay: the origin's status code, the
/// allow-listed response headers and a chunked byte stream. Dropping the
/// stream cancels the origin request and releases its connection.
pub struct ProxiedStream {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: BoxStream<'static, StreamResult<Bytes>>,
}

/// Relays upstream media bytes without buffering whole responses. The
/// connect and per-read timeouts are bounded; total stream lifetime is
/// not, since live content never ends.
pub struct StreamProxy {
    client: Client,
    user_agent: String,
    read_timeout: Duration,
}

impl StreamProxy {
    pub fn new(config: &ProxySection) -> StreamResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            read_timeout: config.read_timeout(),
        })
    }

    /// Opens the origin URL and hands back status, filtered headers and
    /// the body stream. The origin's status code is propagated as-is; a
    /// connection-level failure surfaces as `StreamError::Upstream` so
    /// the caller can answer with a gateway failure before any byte has
    /// been sent.
    pub async fn open(
        &self,
        origin_url: &str,
        extra_headers: Option<HeaderMap>,
    ) -> StreamResult<ProxiedStream> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, value);
        }
        if let Some(extra) = extra_headers {
            for (name, value) in extra.iter() {
                headers.insert(name.clone(), value.clone());
            }
        }

        let response = self
            .client
            .get(origin_url)
            .headers(headers)
            .send()
            .await?;
        let status = response.status();
        let forwarded = filter_headers(response.headers());
        debug!(url = origin_url, status = %status, "origin stream opened");

        let read_timeout = self.read_timeout;
        let body = futures::stream::try_unfold(response, move |mut response| async move {
            match tokio::time::timeout(read_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => Ok(Some((chunk, response))),
                Ok(Ok(None)) => Ok(None),
                Ok(Err(err)) => Err(StreamError::Upstream(err)),
                Err(_) => Err(StreamError::ReadTimeout),
            }
        })
        .boxed();

        Ok(ProxiedStream {
            status,
            headers: forwarded,
            body,
        })
    }
}

/// Keeps only the allow-listed subset of origin response headers.
pub fn filter_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    PASSTHROUGH_HEADERS
        .iter()
        .filter_map(|name| {
            headers
                .get(*name)
                .and_then(|value| value.to_str().ok())
                .map(|value| (name.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_and_encoding_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("content-length", HeaderValue::from_static("1024"));
        headers.insert("content-type", HeaderValue::from_static("video/mp2t"));

        let forwarded = filter_headers(&headers);
        assert_eq!(
            forwarded,
            vec![
                ("content-type".to_string(), "video/mp2t".to_string()),
                ("content-length".to_string(), "1024".to_string()),
            ]
        );
    }

    #[test]
    fn accept_ranges_passes_when_present() {
        let mut headers = HeaderMap::new();
        headers.insert("accept-ranges", HeaderValue::from_static("bytes"));
        headers.insert("set-cookie", HeaderValue::from_static("sid=1"));

        let forwarded = filter_headers(&headers);
        assert_eq!(
            forwarded,
            vec![("accept-ranges".to_string(), "bytes".to_string())]
        );
    }
}
