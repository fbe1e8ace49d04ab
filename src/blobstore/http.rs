//! `BlobTransport` over HTTP: `PUT|GET|HEAD|DELETE {base}/blobs/{id}`.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::header::CONTENT_TYPE;

use super::transport::{BlobOp, BlobRequest, BlobResponse, BlobTransport, TransportError};
use crate::error::{CoreError, CoreResult};

#[derive(Clone)]
pub struct HttpBlobTransport {
    client: reqwest::Client,
}

impl HttpBlobTransport {
    pub fn new() -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("carecore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::config(format!("http client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn blob_url(base: &str, id: &str) -> String {
        format!("{}/blobs/{}", base.trim_end_matches('/'), urlencoding::encode(id))
    }
}

fn map_err(e: reqwest::Error, req: &BlobRequest) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(req.timeout)
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

impl BlobTransport for HttpBlobTransport {
    fn send(&self, req: BlobRequest) -> BoxFuture<'static, Result<BlobResponse, TransportError>> {
        let client = self.client.clone();
        async move {
            let url = Self::blob_url(&req.endpoint.url, &req.id);
            let mut rb = match req.op {
                BlobOp::Put => {
                    let body = req.body.as_ref().map(|b| b.as_ref().clone()).unwrap_or_default();
                    client.put(&url).header(CONTENT_TYPE, "application/octet-stream").body(body)
                }
                BlobOp::Get => client.get(&url),
                BlobOp::Head => client.head(&url),
                BlobOp::Delete => client.delete(&url),
            };
            if let Some(token) = req.endpoint.token.as_deref() {
                rb = rb.bearer_auth(token);
            }
            let resp = rb.timeout(req.timeout).send().await.map_err(|e| map_err(e, &req))?;
            let status = resp.status();
            let body = if req.op == BlobOp::Get && status.is_success() {
                resp.bytes().await.map_err(|e| map_err(e, &req))?.to_vec()
            } else {
                Vec::new()
            };
            Ok(BlobResponse { status: status.as_u16(), body: Arc::new(body) })
        }
        .boxed()
    }
}
