//! Plain HTTP listener that sends every request to the HTTPS endpoint

use crate::error::Result;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, HOST, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Strip an optional `:port` suffix, keeping IPv6 brackets intact
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// `https://<host>:<port><path-and-query>`
pub fn redirect_location(host: &str, path_and_query: &str, https_port: u16) -> String {
    let path_and_query = if path_and_query.is_empty() {
        "/"
    } else {
        path_and_query
    };
    format!("https://{}:{}{}", strip_port(host), https_port, path_and_query)
}

fn redirect_response(req: &Request<Incoming>, https_port: u16) -> Response<Full<Bytes>> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri().host())
        .filter(|host| !host.is_empty());

    let Some(host) = host else {
        debug!(uri = %req.uri(), "Redirect request without host");
        let mut response = Response::new(Full::new(Bytes::from_static(b"missing Host header\n")));
        *response.status_mut() = StatusCode::BAD_REQUEST;
        return response;
    };

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let location = redirect_location(host, path_and_query, https_port);

    let mut response = Response::new(Full::new(Bytes::new()));
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            debug!(location = %location, "Redirecting to HTTPS");
            *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
            response.headers_mut().insert(LOCATION, value);
        }
        Err(_) => {
            *response.status_mut() = StatusCode::BAD_REQUEST;
        }
    }
    response
}

/// Answer every request on `tcp` with a permanent redirect to HTTPS
pub async fn run(tcp: TcpListener, https_port: u16) -> Result<()> {
    info!(addr = %tcp.local_addr()?, https_port, "HTTP redirect listening");

    loop {
        let (stream, peer) = match tcp.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Redirect accept failed");
                continue;
            }
        };

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| async move {
                Ok::<_, Infallible>(redirect_response(&req, https_port))
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(peer = %peer, error = %e, "Redirect connection closed with error");
            }
        });
    }
}
