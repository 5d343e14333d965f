use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    Extension, Router,
    body::{self, Body},
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderName, HeaderValue, Response, Uri, header},
};
use http_body_util::LengthLimitError;
use reqwest::{Client, Url};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::ProxyError;
use crate::load_balancer::{LoadBalancer, SelectError};
use crate::metrics::UPSTREAM_COUNTER;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

// 逐跳头，不向上下游透传
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// 所有后端共享的 HTTP 客户端
pub fn build_client(settings: &Settings) -> reqwest::Result<Client> {
    Client::builder().timeout(settings.request_timeout()).build()
}

// 代理服务路由：所有路径都按 Host 转发
pub fn router(lb: Arc<LoadBalancer>) -> Router {
    Router::new().fallback(proxy_handler).layer(Extension(lb))
}

// 代理处理器
async fn proxy_handler(
    Extension(lb): Extension<Arc<LoadBalancer>>,
    req: Request,
) -> Result<Response<Body>, ProxyError> {
    let host = request_host(&req);
    if host.is_empty() {
        return Err(ProxyError::MissingHost);
    }

    let service = lb
        .service(&host)
        .ok_or_else(|| ProxyError::UnknownDomain(host.clone()))?;

    let peer = match lb.next_peer(&service.pool) {
        Ok(peer) => peer,
        Err(err @ SelectError::InvalidPolicy(_)) => {
            error!(domain = %host, policy = lb.policy_id(), "invalid load balancing policy");
            UPSTREAM_COUNTER.with_label_values(&[host.as_str(), "invalid_policy"]).inc();
            return Err(ProxyError::InvalidPolicy(err.to_string()));
        }
        Err(SelectError::NoPeer) => {
            warn!(domain = %host, "no live server available");
            UPSTREAM_COUNTER.with_label_values(&[host.as_str(), "no_peer"]).inc();
            return Err(ProxyError::NoPeer(host));
        }
    };

    info!(domain = %host, server = %peer.url(), "Proxying request");
    match peer.forwarder().forward(req).await {
        Ok(resp) => {
            UPSTREAM_COUNTER.with_label_values(&[host.as_str(), "forwarded"]).inc();
            Ok(resp)
        }
        Err(err) => {
            warn!(domain = %host, server = %peer.url(), error = %err, "forwarding failed");
            UPSTREAM_COUNTER.with_label_values(&[host.as_str(), "upstream_error"]).inc();
            Err(err)
        }
    }
}

/// Host 头原样取出，不做端口剥离；HTTP/2 没有 Host 头时取 authority
fn request_host(req: &Request) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// 请求 body 默认上限 10 MiB
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// 绑定到单个后端地址的转发器，构造后不再改变
#[derive(Debug)]
pub struct Forwarder {
    base: Url,
    client: Client,
    max_body_bytes: usize,
}

impl Forwarder {
    pub fn new(base: Url, client: Client) -> Self {
        Self {
            base,
            client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_body_limit(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn target(&self, uri: &Uri) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}{}", base, path_and_query)
    }

    /// 转发请求，透传上游的状态码、响应头；响应 body 以流的方式回传
    pub async fn forward(&self, req: Request) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let client_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip());

        let uri = self.target(&parts.uri);
        debug!("Forwarding {} {}", parts.method, uri);

        let headers = forward_headers(&parts.headers, client_ip);
        let body_bytes = body::to_bytes(body, self.max_body_bytes)
            .await
            .map_err(|err| body_error(err, self.max_body_bytes))?;

        let upstream = self
            .client
            .request(parts.method, &uri)
            .headers(headers)
            .body(body_bytes)
            .send()
            .await?;

        let status = upstream.status();
        let mut resp_headers = HeaderMap::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) {
                resp_headers.append(name.clone(), value.clone());
            }
        }

        let mut resp = Response::new(Body::from_stream(upstream.bytes_stream()));
        *resp.status_mut() = status;
        *resp.headers_mut() = resp_headers;
        Ok(resp)
    }
}

fn body_error(err: axum::Error, limit: usize) -> ProxyError {
    let inner = err.into_inner();
    if inner.downcast_ref::<LengthLimitError>().is_some() {
        ProxyError::PayloadTooLarge(limit)
    } else {
        ProxyError::Body(axum::Error::new(inner))
    }
}

/// 原样保留客户端的 Host，后端按虚拟主机路由时需要它
fn forward_headers(inbound: &HeaderMap, client_ip: Option<IpAddr>) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len() + 3);
    for (name, value) in inbound {
        if is_hop_by_hop(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    if let Some(ip) = client_ip {
        let chain = match inbound.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, ip),
            None => ip.to_string(),
        };
        if let Ok(v) = HeaderValue::from_str(&chain) {
            out.insert(X_FORWARDED_FOR, v);
        }
    }
    if let Some(host) = inbound.get(header::HOST) {
        out.insert(X_FORWARDED_HOST, host.clone());
    }
    out.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    out
}
