//! RPC servers for both planes.
//!
//! Each plane is a TCP listener accepting length-delimited `MsgPack`
//! frames; every connection gets its own task, and a connection may
//! carry any number of sequential request/reply exchanges. Accept loops
//! exit when the lifecycle controller announces shutdown.

pub mod client;
pub(crate) mod control;
pub(crate) mod data;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use steward_core::messages::{ControlRequest, DataRequest, DataResponse};
use steward_core::{wire, Envelope};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::core::Core;

/// Binds both planes and starts their accept loops.
///
/// Returns the actual bound addresses, which differ from the configured
/// ones when port 0 was requested. A bind failure here is a fatal
/// initialization error for the daemon.
///
/// # Errors
///
/// Returns the underlying I/O error when either address cannot be bound.
pub async fn serve(core: &Arc<Core>) -> std::io::Result<(SocketAddr, SocketAddr)> {
    let data_listener = TcpListener::bind(&core.config().data_address).await?;
    let control_listener = TcpListener::bind(&core.config().control_address).await?;
    let data_addr = data_listener.local_addr()?;
    let control_addr = control_listener.local_addr()?;

    info!(%data_addr, %control_addr, "rpc endpoints bound");

    tokio::spawn(accept_loop(
        Arc::clone(core),
        data_listener,
        handle_data_connection,
    ));
    tokio::spawn(accept_loop(
        Arc::clone(core),
        control_listener,
        handle_control_connection,
    ));

    core.lifecycle().set_ready();
    Ok((data_addr, control_addr))
}

async fn accept_loop<F, Fut>(core: Arc<Core>, listener: TcpListener, handler: F)
where
    F: Fn(Arc<Core>, TcpStream) -> Fut + Copy + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut shutdown = core.lifecycle().subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("accept loop stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    tokio::spawn(handler(Arc::clone(&core), stream));
                }
                Err(err) => {
                    warn!(%err, "accept failed");
                }
            }
        }
    }
}

async fn handle_data_connection(core: Arc<Core>, stream: TcpStream) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    while let Some(frame) = framed.next().await {
        let Ok(bytes) = frame else { break };
        let response = match wire::decode::<Envelope<DataRequest>>(&bytes) {
            Ok(envelope) => data::dispatch(&core, envelope.meta, envelope.body).await,
            Err(err) => {
                debug!(%err, "undecodable data frame");
                DataResponse::Error {
                    error: "request.invalid".to_string(),
                }
            }
        };
        let Ok(out) = wire::encode(&response) else { break };
        if framed.send(Bytes::from(out)).await.is_err() {
            break;
        }
    }
}

async fn handle_control_connection(core: Arc<Core>, stream: TcpStream) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    while let Some(frame) = framed.next().await {
        let Ok(bytes) = frame else { break };
        let response = match wire::decode::<Envelope<ControlRequest>>(&bytes) {
            Ok(envelope) => control::dispatch(&core, envelope.body).await,
            Err(err) => {
                debug!(%err, "undecodable control frame");
                steward_core::messages::ControlReply::Error {
                    error: "request.invalid".to_string(),
                }
            }
        };
        let Ok(out) = wire::encode(&response) else { break };
        if framed.send(Bytes::from(out)).await.is_err() {
            break;
        }
    }
}
