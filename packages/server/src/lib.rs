//! steward server — the control-plane Core: service registry, address
//! allocation, process supervision, remote federation, and the two RPC
//! planes workers and operators call.

pub mod config;
pub mod core;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod remote;
pub mod rpc;
pub mod supervisor;

pub use config::{CoreConfig, Deadlines, EnvMode, ServiceSpec};
pub use self::core::Core;
pub use error::CoreError;
pub use lifecycle::{HealthState, LifecycleController};
pub use registry::{AddressHandler, Registry, Service};
pub use remote::{Container, RemoteBroker};
pub use supervisor::{ManagerConfig, ProcessManager, Supervisor, SupervisorEvent};


/// Integration tests for the full RPC pipeline over real sockets.
///
/// Each test boots an independent Core on OS-assigned ports and drives
/// it with the outbound client, end to end.
#[cfg(test)]
mod integration_tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use steward_core::messages::{
        requests, Action, ControlReply, ControlRequest, DataRequest, DataResponse, Ping,
        RegisterRequest, ServiceUpdate,
    };
    use steward_core::{Meta, ServiceState};

    use crate::config::{CoreConfig, Deadlines};
    use crate::core::Core;
    use crate::rpc::{self, client};

    fn test_config() -> CoreConfig {
        CoreConfig {
            data_address: "localhost:0".to_string(),
            control_address: "localhost:0".to_string(),
            deadlines: Deadlines {
                probe: Duration::from_millis(250),
                summary: Duration::from_millis(250),
                shutdown_notice: Duration::from_millis(500),
                ..Deadlines::default()
            },
            ..CoreConfig::default()
        }
    }

    async fn boot() -> (Arc<Core>, String, String) {
        let core = Core::new(test_config());
        let (data_addr, control_addr): (SocketAddr, SocketAddr) =
            rpc::serve(&core).await.expect("bind failed");
        (
            core,
            format!("localhost:{}", data_addr.port()),
            format!("localhost:{}", control_addr.port()),
        )
    }

    fn register_request(name: &str, aliases: &[&str], groups: &[&str]) -> DataRequest {
        DataRequest::Register(RegisterRequest {
            name: name.to_string(),
            aliases: aliases.iter().map(|s| (*s).to_string()).collect(),
            peer_groups: groups.iter().map(|s| (*s).to_string()).collect(),
            mode: None,
            env: String::new(),
            address: String::new(),
        })
    }

    async fn register(data_addr: &str, name: &str, aliases: &[&str], groups: &[&str]) -> DataResponse {
        client::call_data(
            data_addr,
            Meta::default(),
            register_request(name, aliases, groups),
            Duration::from_secs(2),
        )
        .await
        .expect("core unreachable")
    }

    #[tokio::test]
    async fn single_registration_assigns_first_pool_address() {
        let (core, data_addr, _) = boot().await;

        let response = register(&data_addr, "svc-a", &[], &["g1"]).await;
        let DataResponse::Register(reply) = response else {
            panic!("wrong response variant");
        };
        assert_eq!(reply.address.as_deref(), Some("localhost:49500"));
        assert!(reply.fingerprint.is_some());
        assert!(reply.error.is_none());

        let service = core.registry().lookup("svc-a").unwrap();
        assert_eq!(service.state(), ServiceState::Running);
    }

    #[tokio::test]
    async fn alias_collision_is_rejected_without_side_effects() {
        let (core, data_addr, _) = boot().await;
        register(&data_addr, "svc-a", &[], &["g1"]).await;

        let response = register(&data_addr, "svc-b", &["svc-a"], &["g1"]).await;
        let DataResponse::Register(reply) = response else {
            panic!("wrong response variant");
        };
        assert_eq!(reply.error.as_deref(), Some("registry.duplicateAlias"));
        assert_eq!(core.registry().len(), 1);
        assert!(core.registry().lookup("svc-b").is_none());
    }

    #[tokio::test]
    async fn reattach_after_declared_shutdown_keeps_identity() {
        let (core, data_addr, _) = boot().await;

        let DataResponse::Register(first) = register(&data_addr, "svc-a", &[], &["g1"]).await
        else {
            panic!("wrong response variant");
        };

        // The worker announces its own shutdown.
        let notice = DataRequest::Update(ServiceUpdate {
            request: requests::CORE_SHUTDOWN.to_string(),
            message: Some("svc-a".to_string()),
        });
        client::call_data(&data_addr, Meta::default(), notice, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(
            core.registry().lookup("svc-a").unwrap().state(),
            ServiceState::Shutdown
        );

        // Registering again within the same Core lifetime re-attaches.
        let DataResponse::Register(second) = register(&data_addr, "svc-a", &[], &["g1"]).await
        else {
            panic!("wrong response variant");
        };
        assert_eq!(second.id, first.id);
        assert_eq!(second.fingerprint, first.fingerprint);
        assert_eq!(
            core.registry().lookup("svc-a").unwrap().state(),
            ServiceState::Running
        );
    }

    #[tokio::test]
    async fn who_is_is_gated_by_peer_groups() {
        let (_core, data_addr, _) = boot().await;
        register(&data_addr, "svc-a", &[], &["g1"]).await;
        register(&data_addr, "svc-b", &[], &["g2"]).await;

        let who_is = |from: &str, name: &str| {
            let data_addr = data_addr.clone();
            let from = from.to_string();
            let name = name.to_string();
            async move {
                client::call_data(
                    &data_addr,
                    Meta::from_sender(from),
                    DataRequest::WhoIs(steward_core::messages::WhoIsRequest { name }),
                    Duration::from_secs(2),
                )
                .await
                .unwrap()
            }
        };

        let DataResponse::WhoIs(denied) = who_is("svc-a", "svc-b").await else {
            panic!("wrong response variant");
        };
        assert_eq!(denied.error.as_deref(), Some("permission.denied"));

        // Re-register b with an overlapping group; nothing listens on
        // b's address, so the liveness probe fails and the record
        // re-attaches with the widened groups.
        register(&data_addr, "svc-b", &[], &["g1", "g2"]).await;

        let DataResponse::WhoIs(granted) = who_is("svc-a", "svc-b").await else {
            panic!("wrong response variant");
        };
        assert_eq!(granted.address.as_deref(), Some("localhost:49501"));
        assert!(granted.error.is_none());
    }

    #[tokio::test]
    async fn alive_with_identity_refreshes_liveness() {
        let (core, data_addr, _) = boot().await;
        let DataResponse::Register(reply) = register(&data_addr, "svc-a", &[], &[]).await else {
            panic!("wrong response variant");
        };

        let before = core.registry().lookup("svc-a").unwrap().last_ping();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let ping = DataRequest::Alive(Ping {
            time: client::now_stamp(),
        });
        let meta = Meta {
            sender: Some("svc-a".to_string()),
            target: None,
            fingerprint: reply.fingerprint.clone(),
        };
        let DataResponse::Pong(pong) =
            client::call_data(&data_addr, meta, ping, Duration::from_secs(2))
                .await
                .unwrap()
        else {
            panic!("wrong response variant");
        };
        assert_eq!(pong.status.as_deref(), Some("ok"));
        assert!(core.registry().lookup("svc-a").unwrap().last_ping() > before);

        // A wrong fingerprint is reported in the pong status.
        let bad_meta = Meta {
            sender: Some("svc-a".to_string()),
            target: None,
            fingerprint: Some("forged".to_string()),
        };
        let ping = DataRequest::Alive(Ping {
            time: client::now_stamp(),
        });
        let DataResponse::Pong(pong) =
            client::call_data(&data_addr, bad_meta, ping, Duration::from_secs(2))
                .await
                .unwrap()
        else {
            panic!("wrong response variant");
        };
        assert_eq!(pong.status.as_deref(), Some("verify.fingerprintMismatch"));
    }

    #[tokio::test]
    async fn container_registration_assigns_address_and_id() {
        let (_core, data_addr, _) = boot().await;

        let update = DataRequest::Update(ServiceUpdate {
            request: requests::CONTAINER_REGISTER.to_string(),
            message: Some("svc-x,svc-y".to_string()),
        });
        let DataResponse::Receipt(receipt) =
            client::call_data(&data_addr, Meta::default(), update, Duration::from_secs(2))
                .await
                .unwrap()
        else {
            panic!("wrong response variant");
        };
        assert_eq!(receipt.message.as_deref(), Some("added container"));
        assert_eq!(receipt.id.as_deref(), Some("r1"));
        assert!(receipt.address.is_some());
    }

    #[tokio::test]
    async fn unknown_update_request_is_answered_not_dropped() {
        let (_core, data_addr, _) = boot().await;

        let update = DataRequest::Update(ServiceUpdate {
            request: "sing.a.song".to_string(),
            message: None,
        });
        let DataResponse::Receipt(receipt) =
            client::call_data(&data_addr, Meta::default(), update, Duration::from_secs(2))
                .await
                .unwrap()
        else {
            panic!("wrong response variant");
        };
        assert_eq!(receipt.error.as_deref(), Some("unknown.request"));
    }

    #[tokio::test]
    async fn control_summary_all_reports_core_remote() {
        let (_core, data_addr, control_addr) = boot().await;
        register(&data_addr, "svc-a", &[], &["g1"]).await;

        let reply = client::call_control(
            &control_addr,
            ControlRequest::Summary(Action::request(requests::SUMMARY_ALL)),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        let ControlReply::Summary { remotes, error } = reply else {
            panic!("wrong reply variant");
        };
        assert!(error.is_none());
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].id, "core");
        assert_eq!(remotes[0].services.len(), 1);
        assert_eq!(remotes[0].services[0].name, "svc-a");
    }

    #[tokio::test]
    async fn control_stubs_answer_unimplemented() {
        let (_core, _data, control_addr) = boot().await;
        for request in [
            ControlRequest::Start(Action::request("start.one")),
            ControlRequest::Kill(Action::request("kill.one")),
            ControlRequest::KillAll,
        ] {
            let reply = client::call_control(&control_addr, request, Duration::from_secs(2))
                .await
                .unwrap();
            assert_eq!(
                reply,
                ControlReply::Error {
                    error: "unimplemented".to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn shutdown_broadcast_tolerates_unreachable_targets() {
        let (core, data_addr, _) = boot().await;

        // Two targets fail fast (connection refused); the third accepts
        // and stays silent, pinning the fan-out to the 500 ms deadline.
        register(&data_addr, "svc-a", &[], &[]).await;
        register(&data_addr, "svc-b", &[], &[]).await;

        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = format!("localhost:{}", silent.local_addr().unwrap().port());
        tokio::spawn(async move {
            loop {
                let Ok((_sock, _)) = silent.accept().await else {
                    break;
                };
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
        });
        let hung = DataRequest::Register(RegisterRequest {
            name: "svc-c".to_string(),
            aliases: vec![],
            peer_groups: vec![],
            mode: None,
            env: "C".to_string(),
            address: silent_addr,
        });
        client::call_data(&data_addr, Meta::default(), hung, Duration::from_secs(2))
            .await
            .unwrap();

        let started = std::time::Instant::now();
        core.shutdown(false, "test").await;
        let elapsed = started.elapsed();

        // Concurrent fan-out: two fast failures plus one 500 ms timeout.
        assert!(elapsed < Duration::from_millis(1200), "took {elapsed:?}");
        assert_eq!(
            core.lifecycle().health_state(),
            crate::lifecycle::HealthState::Stopped
        );
    }

    #[tokio::test]
    async fn malformed_frames_get_a_protocol_error() {
        use bytes::Bytes;
        use futures_util::{SinkExt, StreamExt};
        use tokio_util::codec::{Framed, LengthDelimitedCodec};

        let (_core, data_addr, _) = boot().await;
        let stream = tokio::net::TcpStream::connect(&data_addr).await.unwrap();
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        framed
            .send(Bytes::from_static(b"\xC1 this is not msgpack"))
            .await
            .unwrap();
        let frame = framed.next().await.unwrap().unwrap();
        let response: DataResponse = steward_core::wire::decode(&frame).unwrap();
        assert_eq!(
            response,
            DataResponse::Error {
                error: "request.invalid".to_string()
            }
        );
    }

    #[tokio::test]
    async fn managed_service_restart_via_control_plane() {
        let dir = tempfile::tempdir().unwrap();
        let (core, data_addr, control_addr) = boot().await;

        // The Core launches the child, then the child registers itself.
        let spec = crate::config::ServiceSpec {
            name: "svc-m".to_string(),
            path: "/bin/sh".into(),
            dir: dir.path().to_path_buf(),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            env: vec![],
            language: "binary".to_string(),
        };
        let first_pid = core.supervisor().launch(&spec).unwrap();

        let DataResponse::Register(reply) = register(&data_addr, "svc-m", &[], &[]).await else {
            panic!("wrong response variant");
        };
        let id = reply.id.unwrap();
        assert_eq!(
            core.registry().lookup("svc-m").unwrap().mode,
            steward_core::ServiceMode::Managed
        );

        let mut action = Action::request(requests::RESTART_ONE);
        action.target = Some(id);
        action.remote_id = Some("core".to_string());
        let reply = client::call_control(
            &control_addr,
            ControlRequest::Restart(action),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        let ControlReply::Status { status } = reply else {
            panic!("wrong reply variant");
        };
        assert!(status.starts_with("pid="), "unexpected status: {status}");
        let new_pid: i32 = status.trim_start_matches("pid=").parse().unwrap();
        assert_ne!(new_pid, first_pid);

        let manager = core.supervisor().manager("svc-m").unwrap();
        let state = manager.status();
        assert!(state.running);
        assert_eq!(state.num_restarts, 1);
        assert!(dir.path().join("steward").join("core.log").exists());

        core.supervisor().stop_all();
    }
}
