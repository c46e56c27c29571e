use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use alloy::{
    network::Ethereum,
    providers::{DynProvider, RootProvider},
    rpc::{
        client::ClientBuilder,
        json_rpc::{RequestPacket, ResponsePacket},
    },
    transports::TransportError,
};
use tower::{Layer, Service};
use tracing::debug;
use url::Url;

use crate::{
    chain::{Endpoints, RaceProvider, RpcEndpoint},
    error::ConfigError,
};

/// A layer to be used with `ClientBuilder::layer` that logs the latency of every
/// `eth_sendRawTransaction` call made through one endpoint.
#[derive(Clone, Debug)]
pub struct SendLatencyLayer {
    endpoint: Arc<str>,
}

impl SendLatencyLayer {
    pub fn new(endpoint: impl Into<Arc<str>>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl<S> Layer<S> for SendLatencyLayer {
    type Service = SendLatencyService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SendLatencyService {
            inner,
            endpoint: self.endpoint.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendLatencyService<S> {
    inner: S,
    endpoint: Arc<str>,
}

impl<S> Service<RequestPacket> for SendLatencyService<S>
where
    S: Service<RequestPacket, Response = ResponsePacket, Error = TransportError>,
    S::Future: Send + 'static,
    S::Response: Send + 'static + Debug,
    S::Error: Send + 'static + Debug,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: RequestPacket) -> Self::Future {
        let id = match &req {
            RequestPacket::Single(inner_req) if inner_req.method() == "eth_sendRawTransaction" => {
                Some(inner_req.id().as_number().unwrap_or_default())
            }
            _ => None,
        };

        let endpoint = self.endpoint.clone();
        let start_time = tokio::time::Instant::now();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let res = fut.await;
            if let (Some(id), Ok(ResponsePacket::Single(inner_res))) = (id, &res) {
                let elapsed_ms = start_time.elapsed().as_millis() as u64;
                match inner_res.payload.as_success() {
                    Some(payload) => debug!(
                        endpoint = %endpoint,
                        id,
                        elapsed_ms,
                        "tx delivered, hash: {}",
                        payload.get()
                    ),
                    None => debug!(endpoint = %endpoint, id, elapsed_ms, "tx refused"),
                }
            }
            res
        })
    }
}

/// Builds one HTTP provider per url, each wrapped in a [`SendLatencyLayer`].
pub fn connect_endpoints(urls: &[Url]) -> Result<Endpoints, ConfigError> {
    if urls.is_empty() {
        return Err(ConfigError::EndpointsEmpty);
    }
    let endpoints = urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            let label = format!("{}#{i}", url.host_str().unwrap_or("endpoint"));
            let client = ClientBuilder::default()
                .layer(SendLatencyLayer::new(label.as_str()))
                .http(url.to_owned());
            let provider = DynProvider::new(RootProvider::<Ethereum>::new(client));
            Arc::new(RpcEndpoint::new(label, provider)) as Arc<dyn RaceProvider>
        })
        .collect::<Vec<_>>();
    Ok(endpoints.into())
}
