//! tonic glue: connection params, lazy channels and per-call metadata.
//!
//! Requires the `grpc` feature. The stores are transport agnostic; this
//! module supplies a ready-made client factory for tonic-generated clients.
//!
//! ```ignore
//! use grpc_store::grpc::{self, GrpcParams};
//! use grpc_store::SingleMethodStore;
//!
//! let store = SingleMethodStore::builder(grpc::connect, |conn, _params, id: String| async move {
//!     let mut client = GoalsClient::with_interceptor(conn.channel, conn.interceptor);
//!     let reply = client.get_goal(GetGoalRequest { id }).await?;
//!     Ok(reply.into_inner())
//! })
//! .build();
//!
//! store.set_params(GrpcParams::new("http://[::1]:50051").with_metadata("authorization", "Bearer t"))?;
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tonic::metadata::{Ascii, MetadataKey, MetadataValue};
use tonic::service::Interceptor;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};
use tracing::debug;

use crate::connection::Blank;
use crate::error::{Result, StoreError};

/// Where to reach the backend and which headers to send with every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcParams {
    pub endpoint: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl GrpcParams {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl Blank for GrpcParams {
    fn is_blank(&self) -> bool {
        self.endpoint.trim().is_empty()
    }
}

/// Attaches the configured metadata to every outgoing request.
#[derive(Debug, Clone, Default)]
pub struct MetadataInterceptor {
    headers: Vec<(MetadataKey<Ascii>, MetadataValue<Ascii>)>,
}

impl MetadataInterceptor {
    pub fn from_map(metadata: &HashMap<String, String>) -> Result<Self> {
        let mut headers = Vec::with_capacity(metadata.len());
        for (key, value) in metadata {
            let name = MetadataKey::from_bytes(key.to_ascii_lowercase().as_bytes())
                .map_err(|_| StoreError::ClientFactory(format!("invalid metadata key `{key}`")))?;
            let value = value
                .parse::<MetadataValue<Ascii>>()
                .map_err(|_| StoreError::ClientFactory(format!("invalid metadata value for `{key}`")))?;
            headers.push((name, value));
        }
        Ok(Self { headers })
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl Interceptor for MetadataInterceptor {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        let metadata = request.metadata_mut();
        for (key, value) in &self.headers {
            metadata.insert(key.clone(), value.clone());
        }
        Ok(request)
    }
}

/// A lazily connected channel plus the interceptor for its metadata.
///
/// Pass both to a generated client's `with_interceptor`.
#[derive(Debug, Clone)]
pub struct GrpcConnection {
    pub channel: Channel,
    pub interceptor: MetadataInterceptor,
}

/// Client factory for the stores.
///
/// The channel connects on first use, so this never blocks. Must be called
/// from within a tokio runtime.
pub fn connect(params: &GrpcParams) -> Result<GrpcConnection> {
    if params.is_blank() {
        return Err(StoreError::BlankParams);
    }
    let endpoint = Endpoint::from_shared(params.endpoint.clone())
        .map_err(|err| StoreError::ClientFactory(format!("{}: {err}", params.endpoint)))?;
    let interceptor = MetadataInterceptor::from_map(&params.metadata)?;
    debug!(endpoint = %params.endpoint, headers = interceptor.len(), "grpc channel created");

    Ok(GrpcConnection {
        channel: endpoint.connect_lazy(),
        interceptor,
    })
}

impl From<Status> for StoreError {
    fn from(status: Status) -> Self {
        StoreError::Backend(status.message().to_string())
    }
}
