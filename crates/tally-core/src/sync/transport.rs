//! Transport selection.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::{EndpointTransport, RpcTransport, SyncResponse, SyncTransport};
use crate::error::{Error, Result};
use crate::models::{CollectionName, SyncRecord};

/// Wire style spoken by the remote collection store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// `POST /v1/sync` and `POST /v1/pull`
    #[default]
    Rpc,
    /// `POST /sync?endpoint=` and `GET /get?endpoint=`
    Endpoint,
}

impl TransportKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Endpoint => "endpoint",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rpc" => Ok(Self::Rpc),
            "endpoint" | "endpoints" => Ok(Self::Endpoint),
            other => Err(Error::InvalidInput(format!(
                "Unknown transport '{other}' (expected 'rpc' or 'endpoint')"
            ))),
        }
    }
}

/// Either HTTP transport, chosen at runtime.
#[derive(Clone)]
pub enum AnyTransport {
    Rpc(RpcTransport),
    Endpoint(EndpointTransport),
}

impl AnyTransport {
    pub fn new(kind: TransportKind, base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(match kind {
            TransportKind::Rpc => Self::Rpc(RpcTransport::new(base_url, timeout)?),
            TransportKind::Endpoint => Self::Endpoint(EndpointTransport::new(base_url, timeout)?),
        })
    }

    pub const fn kind(&self) -> TransportKind {
        match self {
            Self::Rpc(_) => TransportKind::Rpc,
            Self::Endpoint(_) => TransportKind::Endpoint,
        }
    }
}

impl SyncTransport for AnyTransport {
    async fn push<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        records: &[T],
        since: Option<i64>,
    ) -> Result<SyncResponse<T>> {
        match self {
            Self::Rpc(transport) => transport.push(collection, records, since).await,
            Self::Endpoint(transport) => transport.push(collection, records, since).await,
        }
    }

    async fn pull<T: SyncRecord>(
        &self,
        collection: &CollectionName,
        since: Option<i64>,
    ) -> Result<SyncResponse<T>> {
        match self {
            Self::Rpc(transport) => transport.pull(collection, since).await,
            Self::Endpoint(transport) => transport.pull(collection, since).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transport_kind() {
        assert_eq!("rpc".parse::<TransportKind>().unwrap(), TransportKind::Rpc);
        assert_eq!(
            " Endpoint ".parse::<TransportKind>().unwrap(),
            TransportKind::Endpoint
        );
        assert!("grpc".parse::<TransportKind>().is_err());
    }

    #[test]
    fn builds_requested_transport() {
        let transport = AnyTransport::new(
            TransportKind::Endpoint,
            "https://sync.example.com",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(transport.kind(), TransportKind::Endpoint);
        assert!(AnyTransport::new(TransportKind::Rpc, "nope", Duration::from_secs(5)).is_err());
    }
}
