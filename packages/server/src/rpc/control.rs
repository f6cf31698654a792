//! Control-plane dispatch: the operator surface of the Core.

use std::sync::Arc;

use steward_core::messages::{requests, Action, ControlReply, ControlRequest};
use tracing::debug;

use crate::config::defaults;
use crate::core::Core;

/// Routes one operator request to its handler.
pub(crate) async fn dispatch(core: &Arc<Core>, request: ControlRequest) -> ControlReply {
    match request {
        ControlRequest::Summary(action) => summary(core, &action).await,
        ControlRequest::Restart(action) => restart(core, &action).await,
        ControlRequest::Stop => {
            // Reply immediately; the procedure runs behind the reply.
            let core = Arc::clone(core);
            tokio::spawn(async move {
                core.shutdown(true, "operator").await;
            });
            ControlReply::Status {
                status: "shutdown procedure started".to_string(),
            }
        }
        ControlRequest::Status => ControlReply::Status {
            status: "ok".to_string(),
        },
        ControlRequest::Start(_) | ControlRequest::Kill(_) | ControlRequest::KillAll => {
            ControlReply::Error {
                error: "unimplemented".to_string(),
            }
        }
    }
}

async fn summary(core: &Arc<Core>, action: &Action) -> ControlReply {
    match action.request.as_str() {
        requests::SUMMARY_ALL => ControlReply::Summary {
            remotes: core.summary_all().await,
            error: None,
        },
        requests::SUMMARY_ONE => {
            let remote_id = action
                .remote_id
                .as_deref()
                .unwrap_or(defaults::CORE_REMOTE_ID);
            let Some(target) = action.target.as_deref() else {
                return ControlReply::Error {
                    error: "request.invalid".to_string(),
                };
            };
            let summary = core.summary_one(remote_id, target).await;
            let error = summary.error.clone();
            ControlReply::Summary {
                remotes: vec![summary],
                error,
            }
        }
        other => {
            debug!(request = %other, "unknown summary request");
            ControlReply::Error {
                error: "unknown.request".to_string(),
            }
        }
    }
}

async fn restart(core: &Arc<Core>, action: &Action) -> ControlReply {
    match action.request.as_str() {
        requests::RESTART_ALL => {
            // Fire the sweep asynchronously and acknowledge at once.
            let core = Arc::clone(core);
            tokio::spawn(async move {
                core.restart_all().await;
            });
            ControlReply::Status {
                status: "success".to_string(),
            }
        }
        requests::RESTART_ONE => {
            let remote_id = action
                .remote_id
                .as_deref()
                .unwrap_or(defaults::CORE_REMOTE_ID);
            let Some(target) = action.target.as_deref() else {
                return ControlReply::Error {
                    error: "request.invalid".to_string(),
                };
            };

            if remote_id == defaults::CORE_REMOTE_ID {
                match core.restart_one_local(target).await {
                    Ok(status) => ControlReply::Status { status },
                    Err(err) => ControlReply::Error {
                        error: err.code().to_string(),
                    },
                }
            } else {
                match core.broker().get(remote_id) {
                    Some(container) => {
                        let status = core
                            .broker()
                            .restart_remote(
                                &container,
                                target,
                                core.config().deadlines.remote_restart,
                            )
                            .await;
                        ControlReply::Status { status }
                    }
                    None => ControlReply::Error {
                        error: "registry.notFound".to_string(),
                    },
                }
            }
        }
        other => {
            debug!(request = %other, "unknown restart request");
            ControlReply::Error {
                error: "unknown.request".to_string(),
            }
        }
    }
}
