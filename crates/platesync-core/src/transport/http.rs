//! reqwest-backed transport

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{Method, Request, Response, Transport, TransportError};

/// Transport that sends requests to a JSON HTTP API
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport rooted at `base_url`
    ///
    /// `timeout` bounds each request end to end.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid API base URL '{}': {}", base_url, e))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a request's endpoint and query against the base URL
    pub fn build_url(&self, request: &Request) -> Result<Url, TransportError> {
        let mut url = self
            .base_url
            .join(request.endpoint.trim_start_matches('/'))
            .map_err(|e| TransportError::Client {
                status: 0,
                message: format!("invalid endpoint '{}': {}", request.endpoint, e),
            })?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }

    /// Map a failed send onto the failure taxonomy
    ///
    /// Only a failure to reach the server at all is `NetworkUnavailable`;
    /// everything that got an answer consumes a retry.
    fn classify_send_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if error.is_builder() {
            // Never left the client; retrying cannot help
            TransportError::Client {
                status: 0,
                message: error.to_string(),
            }
        } else if error.is_connect() {
            TransportError::NetworkUnavailable(error.to_string())
        } else if error.is_redirect() {
            TransportError::Server {
                status: error.status().map_or(0, |s| s.as_u16()),
                message: error.to_string(),
            }
        } else if error.is_decode() || error.is_body() {
            TransportError::Serialization(error.to_string())
        } else if error.is_request() {
            // Connection dropped before a response arrived
            TransportError::NetworkUnavailable(error.to_string())
        } else {
            TransportError::Server {
                status: error.status().map_or(0, |s| s.as_u16()),
                message: error.to_string(),
            }
        }
    }

    fn classify_body_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Serialization(format!("failed to read response body: {}", error))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        let url = self.build_url(request)?;
        debug!("{} {}", request.method, url);

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.classify_body_error(e))?;

        if !(200..300).contains(&status) {
            let message = String::from_utf8_lossy(&bytes).chars().take(200).collect::<String>();
            return Err(TransportError::from_status(status, message));
        }

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| TransportError::Serialization(e.to_string()))?
        };

        Ok(Response { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FailureDisposition;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_build_url_joins_endpoint_and_query() {
        let transport =
            HttpTransport::new("https://api.example.com/v1", Duration::from_secs(5)).unwrap();
        let request = Request::get("/meals").with_query(vec![
            ("date".to_string(), "2024-05-01".to_string()),
            ("user".to_string(), "a b".to_string()),
        ]);

        let url = transport.build_url(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/meals?date=2024-05-01&user=a+b"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(HttpTransport::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            HttpTransport::new(&format!("http://{}/", addr), Duration::from_secs(2)).unwrap();
        let err = transport
            .execute(&Request::get("/ping"))
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                TransportError::NetworkUnavailable(_) | TransportError::Timeout(_)
            ),
            "unexpected error: {:?}",
            err
        );
    }

    /// Serve every request on a local port with the same canned response
    async fn serve_forever(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if read_request(&mut socket).await.is_ok() {
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                });
            }
        });

        format!("http://{}/", addr)
    }

    /// Read one request, headers and `Content-Length` body
    async fn read_request(socket: &mut TcpStream) -> std::io::Result<()> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        let body_len: usize = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        let mut have = buf.len() - header_end;
        while have < body_len {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            have += n;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_redirect_loop_is_retryable_not_offline() {
        let base = serve_forever(
            "HTTP/1.1 302 Found\r\nLocation: /loop\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let transport = HttpTransport::new(&base, Duration::from_secs(5)).unwrap();
        let request = Request::new(Method::Post, "/meals").with_body(serde_json::json!({"kcal": 300}));

        let err = transport.execute(&request).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Server { .. }),
            "unexpected error: {:?}",
            err
        );
        assert_eq!(err.disposition(), FailureDisposition::Retry);
    }

    #[tokio::test]
    async fn test_non_json_body_is_serialization_error() {
        let base = serve_forever(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 9\r\nConnection: close\r\n\r\n<html/>\r\n",
        )
        .await;
        let transport = HttpTransport::new(&base, Duration::from_secs(5)).unwrap();

        let err = transport.execute(&Request::get("/goals")).await.unwrap_err();
        assert!(
            matches!(err, TransportError::Serialization(_)),
            "unexpected error: {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_error_status_is_classified() {
        let base = serve_forever(
            "HTTP/1.1 422 Unprocessable Entity\r\nContent-Length: 7\r\nConnection: close\r\n\r\ninvalid",
        )
        .await;
        let transport = HttpTransport::new(&base, Duration::from_secs(5)).unwrap();

        let err = transport.execute(&Request::get("/meals")).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Client {
                status: 422,
                message: "invalid".to_string()
            }
        );
    }
}
