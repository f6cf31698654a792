//! Data-plane dispatch: the RPC surface workers and containers call.

use std::sync::Arc;

use steward_core::messages::{
    requests, Action, DataPayload, DataReply, DataRequest, DataResponse, Pong, Receipt,
    RegisterReply, RegisterRequest, ServiceUpdate, SummaryReceipt,
};
use steward_core::{Meta, ServiceMode, ServiceState};
use tracing::{debug, info};

use crate::core::Core;
use crate::rpc::client;

/// Routes one data-plane request to its handler.
pub(crate) async fn dispatch(core: &Arc<Core>, meta: Meta, request: DataRequest) -> DataResponse {
    match request {
        DataRequest::Register(req) => register(core, req).await,
        DataRequest::Update(update) => update_registration(core, &meta, update),
        DataRequest::Data(payload) => broker_data(core, &payload),
        DataRequest::Summary(action) => summary(core, &action).await,
        DataRequest::Alive(_) => alive(core, &meta),
        DataRequest::WhoIs(req) => who_is(core, &meta, &req.name),
    }
}

async fn register(core: &Arc<Core>, req: RegisterRequest) -> DataResponse {
    // A name the supervisor launched is managed regardless of what the
    // caller claims; self-registered services default to planetary.
    let mode = if core.supervisor().is_managed(&req.name) {
        ServiceMode::Managed
    } else {
        req.mode
            .as_deref()
            .and_then(|m| m.parse().ok())
            .unwrap_or(ServiceMode::Planetary)
    };

    match core
        .registry()
        .add_service(
            &req.name,
            &req.aliases,
            &req.peer_groups,
            &req.env,
            &req.address,
            mode,
        )
        .await
    {
        Ok(service) => DataResponse::Register(RegisterReply {
            address: Some(service.address.clone()),
            fingerprint: Some(service.fingerprint.clone()),
            id: Some(service.id.clone()),
            error: None,
        }),
        Err(err) => {
            debug!(name = %req.name, %err, "registration rejected");
            DataResponse::Register(RegisterReply {
                error: Some(err.code().to_string()),
                ..RegisterReply::default()
            })
        }
    }
}

fn update_registration(core: &Arc<Core>, meta: &Meta, update: ServiceUpdate) -> DataResponse {
    match update.request.as_str() {
        requests::CONTAINER_REGISTER => {
            let services = update.message.unwrap_or_default();
            match core.broker().add_container(&services) {
                Ok(container) => DataResponse::Receipt(Receipt {
                    message: Some("added container".to_string()),
                    address: Some(container.address.clone()),
                    id: Some(container.id.clone()),
                    error: None,
                }),
                Err(err) => DataResponse::Receipt(Receipt::error(err.code())),
            }
        }
        requests::CORE_SHUTDOWN => {
            // A worker announcing its own shutdown names itself in the
            // message (or, failing that, in the sender metadata).
            let name = update
                .message
                .or_else(|| meta.sender.clone())
                .unwrap_or_default();
            match core.registry().lookup(&name) {
                Some(service) => {
                    service.update_state(ServiceState::Shutdown);
                    DataResponse::Receipt(Receipt::ack("ack"))
                }
                None => DataResponse::Receipt(Receipt::error("registry.notFound")),
            }
        }
        other => {
            debug!(request = %other, "unknown registration update");
            DataResponse::Receipt(Receipt::error("unknown.request"))
        }
    }
}

fn broker_data(core: &Arc<Core>, payload: &DataPayload) -> DataResponse {
    let msg_id = core.next_msg_id();
    if core.config().log_data_plane {
        info!(
            msg = msg_id,
            from = %payload.tport.sender,
            to = %payload.tport.target,
            method = %payload.tport.method,
            "data request"
        );
    }

    // Broker-only: hand the sender the target's address, never the payload.
    match core
        .registry()
        .grant_permissions(&payload.tport.sender, &payload.tport.target)
    {
        Ok(address) => DataResponse::Data(DataReply {
            target_address: Some(address),
            error: None,
        }),
        Err(err) => DataResponse::Data(DataReply {
            target_address: None,
            error: Some(err.code().to_string()),
        }),
    }
}

async fn summary(core: &Arc<Core>, action: &Action) -> DataResponse {
    match action.request.as_str() {
        requests::INFO_ALL | requests::SUMMARY_ALL => {
            let services = core
                .registry()
                .core_service_data(core.core_summary())
                .await;
            DataResponse::Summary(SummaryReceipt {
                services,
                error: None,
            })
        }
        _ => DataResponse::Summary(SummaryReceipt {
            services: Vec::new(),
            error: Some("unknown.request".to_string()),
        }),
    }
}

fn alive(core: &Arc<Core>, meta: &Meta) -> DataResponse {
    // A ping carrying identity doubles as a verification: it refreshes
    // the caller's liveness or reports why it cannot.
    let status = match (meta.sender.as_deref(), meta.fingerprint.as_deref()) {
        (Some(sender), Some(fingerprint)) => match core.registry().verify(sender, fingerprint) {
            Ok(()) => "ok".to_string(),
            Err(err) => err.code().to_string(),
        },
        _ => "ok".to_string(),
    };
    DataResponse::Pong(Pong {
        time: client::now_stamp(),
        status: Some(status),
    })
}

fn who_is(core: &Arc<Core>, meta: &Meta, name: &str) -> DataResponse {
    let from = meta.sender.as_deref().unwrap_or_default();
    match core.registry().grant_permissions(from, name) {
        Ok(address) => DataResponse::WhoIs(steward_core::messages::WhoIsReply {
            address: Some(address),
            error: None,
        }),
        Err(err) => DataResponse::WhoIs(steward_core::messages::WhoIsReply {
            address: None,
            error: Some(err.code().to_string()),
        }),
    }
}
