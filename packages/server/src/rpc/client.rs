//! Outbound RPC: one connection, one round trip, one deadline.
//!
//! Every outbound call is bounded by a caller-supplied deadline; any
//! connect, framing, or decode failure collapses into
//! [`CoreError::Unreachable`] so fan-outs can treat targets uniformly.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use steward_core::messages::{
    requests, Action, ControlReply, ControlRequest, DataRequest, DataResponse, Ping,
    ServiceUpdate, SummaryReceipt,
};
use steward_core::{wire, Envelope, Meta};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::error::CoreError;

async fn round_trip<Req, Resp>(addr: &str, env: Envelope<Req>) -> Option<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let stream = TcpStream::connect(addr).await.ok()?;
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    let bytes = wire::encode(&env).ok()?;
    framed.send(Bytes::from(bytes)).await.ok()?;
    let frame = framed.next().await?.ok()?;
    wire::decode(&frame).ok()
}

/// Single data-plane round trip under `deadline`.
///
/// # Errors
///
/// Returns [`CoreError::Unreachable`] when the peer cannot be dialed,
/// the deadline expires, or the reply frame cannot be decoded.
pub async fn call_data(
    addr: &str,
    meta: Meta,
    body: DataRequest,
    deadline: Duration,
) -> Result<DataResponse, CoreError> {
    tokio::time::timeout(deadline, round_trip(addr, Envelope::new(meta, body)))
        .await
        .ok()
        .flatten()
        .ok_or_else(|| CoreError::Unreachable {
            addr: addr.to_string(),
        })
}

/// Single control-plane round trip under `deadline`.
///
/// # Errors
///
/// Returns [`CoreError::Unreachable`] on any transport failure or
/// deadline expiry.
pub async fn call_control(
    addr: &str,
    body: ControlRequest,
    deadline: Duration,
) -> Result<ControlReply, CoreError> {
    tokio::time::timeout(deadline, round_trip(addr, Envelope::bare(body)))
        .await
        .ok()
        .flatten()
        .ok_or_else(|| CoreError::Unreachable {
            addr: addr.to_string(),
        })
}

/// Probes a peer with an `Alive` ping; true iff it answered in time.
pub async fn check_alive(addr: &str, deadline: Duration) -> bool {
    let ping = DataRequest::Alive(Ping {
        time: now_stamp(),
    });
    match call_data(addr, Meta::default(), ping, deadline).await {
        Ok(DataResponse::Pong(_)) => true,
        Ok(_) | Err(_) => false,
    }
}

/// Best-effort `core.shutdown` notice; failures are logged and dropped.
pub async fn send_shutdown_notice(addr: &str, name: &str, deadline: Duration) {
    let update = DataRequest::Update(ServiceUpdate {
        request: requests::CORE_SHUTDOWN.to_string(),
        message: Some(name.to_string()),
    });
    if let Err(err) = call_data(addr, Meta::from_sender("core"), update, deadline).await {
        debug!(%name, %err, "shutdown notice not delivered");
    }
}

/// Asks one service for its self-summary.
///
/// # Errors
///
/// Returns [`CoreError::Unreachable`] when the service does not answer
/// a summary within the deadline.
pub async fn request_summary(
    addr: &str,
    meta: Meta,
    deadline: Duration,
) -> Result<SummaryReceipt, CoreError> {
    let action = DataRequest::Summary(Action::request(requests::INFO_ALL));
    match call_data(addr, meta, action, deadline).await? {
        DataResponse::Summary(receipt) => Ok(receipt),
        DataResponse::Error { error } => Ok(SummaryReceipt {
            services: Vec::new(),
            error: Some(error),
        }),
        _ => Err(CoreError::Unreachable {
            addr: addr.to_string(),
        }),
    }
}

/// Wall-clock stamp carried in liveness probes and pongs.
#[must_use]
pub fn now_stamp() -> String {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => format!("{}.{:03}", d.as_secs(), d.subsec_millis()),
        Err(_) => "0.000".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_peer_is_reported_as_such() {
        // Nothing listens on this port.
        let err = call_data(
            "localhost:1",
            Meta::default(),
            DataRequest::Alive(Ping {
                time: now_stamp(),
            }),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn check_alive_false_for_dead_peer() {
        assert!(!check_alive("localhost:1", Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn deadline_bounds_a_silent_peer() {
        // A listener that accepts but never replies.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("localhost:{}", listener.local_addr().unwrap().port());
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let started = std::time::Instant::now();
        let err = call_data(
            &addr,
            Meta::default(),
            DataRequest::Alive(Ping {
                time: now_stamp(),
            }),
            Duration::from_millis(300),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Unreachable { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
