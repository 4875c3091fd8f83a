//! Process composition, boot errors, and termination signals.

pub mod bootstrap;
pub mod error;
pub mod signals;

pub use bootstrap::{App, AppParts};
pub use error::BootError;
pub use signals::termination;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::ErrorKind;
    use std::process::ExitCode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use duplex_core::{Component, GraphState, Logger, StartError, StopContext};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::tests::test_config;
    use crate::config::Config;
    use crate::network::ServerState;
    use crate::observability::Telemetry;
    use crate::rpc::RpcClient;
    use crate::service::ping::tests::StaticStore;
    use crate::storage::Storage;

    /// Storage stand-in with no-op hooks.
    struct NullStorage;

    #[async_trait]
    impl Component for NullStorage {}

    /// Storage whose start takes a while and which records its stop.
    #[derive(Default)]
    struct SlowStorage {
        stopped: AtomicBool,
    }

    #[async_trait]
    impl Component for SlowStorage {
        async fn start(&self) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }

        async fn stop(&self, _ctx: &StopContext) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::Release);
            Ok(())
        }
    }

    fn local_config(rpc_port: &'static str) -> Config {
        test_config(&[
            "--rpc-host",
            "127.0.0.1",
            "--rpc-port",
            rpc_port,
            "--http-host",
            "127.0.0.1",
            "--http-port",
            "0",
            "--stop-timeout-secs",
            "2",
            "--ready-timeout-secs",
            "2",
        ])
    }

    fn app_with(config: Config, storage: Arc<dyn Component>) -> App {
        let telemetry = Arc::new(Telemetry::new(&config.tracing));
        App::from_parts(AppParts {
            config,
            logger: Logger::new("duplex-test"),
            telemetry,
            storage,
            store: Arc::new(StaticStore(Ok("pong"))),
        })
        .unwrap()
    }

    fn listening_address(state: ServerState) -> std::net::SocketAddr {
        match state {
            ServerState::Listening(address) => address,
            other => panic!("server is not listening: {other:?}"),
        }
    }

    async fn http_get(address: std::net::SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[test]
    fn graph_orders_servers_after_their_dependencies() {
        let app = app_with(local_config("0"), Arc::new(NullStorage));

        assert_eq!(
            app.graph().levels(),
            vec![
                vec!["config", "logger"],
                vec!["tracer", "storage"],
                vec!["services", "interceptor"],
                vec!["rpc_server", "http_server"],
            ]
        );
    }

    #[tokio::test]
    async fn serves_both_transports_then_stops_cleanly() {
        let app = app_with(local_config("0"), Arc::new(NullStorage));

        app.start().await.unwrap();
        assert!(app.wait_ready().await);
        assert!(app.readiness().is_ready());

        let rpc = listening_address(app.rpc_server().state());
        let http = listening_address(app.http_server().state());

        let mut client = RpcClient::connect(rpc).await.unwrap();
        assert_eq!(client.ping_with_metadata(HashMap::new()).await.unwrap(), "pong");
        drop(client);

        let reply = http_get(http, "/api/ping").await;
        assert!(reply.starts_with("HTTP/1.1 200"), "unexpected reply: {reply}");
        assert!(reply.contains(r#"{"message":"pong"}"#));

        assert!(app.stop().await.is_empty());
        assert_eq!(app.graph().state(), GraphState::Stopped);
        assert_eq!(app.rpc_server().state(), ServerState::Stopped);
        assert_eq!(app.http_server().state(), ServerState::Stopped);

        // A second stop finds nothing to do.
        assert!(app.stop().await.is_empty());
    }

    #[tokio::test]
    async fn occupied_rpc_port_fails_only_the_rpc_server() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = local_config("0");
        config.rpc_server.port = occupied.local_addr().unwrap().port();
        let app = app_with(config, Arc::new(NullStorage));

        app.start().await.unwrap();

        assert!(!app.wait_ready().await);
        let err = app.rpc_server().ready().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AddrInUse);
        assert_eq!(app.rpc_server().state(), ServerState::Stopped);

        let http = listening_address(app.http_server().state());
        let reply = http_get(http, "/health/ready").await;
        assert!(reply.starts_with("HTTP/1.1 503"), "unexpected reply: {reply}");

        assert!(app.stop().await.is_empty());
    }

    #[tokio::test]
    async fn database_timeout_aborts_boot_before_any_listener() {
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let held = tokio::spawn(async move {
            let mut streams = Vec::new();
            while let Ok((stream, _)) = silent.accept().await {
                streams.push(stream);
            }
        });

        let mut config = local_config("0");
        config.database.port = port;
        config.database.probe_timeout_secs = 1;
        let storage = Arc::new(Storage::new(config.database.clone()));
        let app = app_with(config, storage);

        let err = app.start().await.unwrap_err();

        match err {
            BootError::Start(StartError::ComponentFailed { component, .. }) => {
                assert_eq!(component, "storage");
            }
            other => panic!("unexpected boot error: {other}"),
        }
        assert_eq!(app.rpc_server().state(), ServerState::Created);
        assert_eq!(app.http_server().state(), ServerState::Created);
        assert!(!app.readiness().is_ready());
        assert!(app.stop().await.is_empty());
        held.abort();
    }

    #[tokio::test]
    async fn run_exits_successfully_on_clean_shutdown() {
        let app = app_with(local_config("0"), Arc::new(NullStorage));

        let code = app.run(std::future::ready(())).await.unwrap();

        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::SUCCESS));
        assert_eq!(app.graph().state(), GraphState::Stopped);
    }

    #[tokio::test]
    #[traced_test]
    async fn termination_during_startup_stops_the_graph() {
        let storage = Arc::new(SlowStorage::default());
        let app = app_with(local_config("0"), Arc::clone(&storage) as Arc<dyn Component>);
        let (signal, received) = tokio::sync::oneshot::channel::<()>();

        let run = app.run(async move {
            let _ = received.await;
        });
        let (code, ()) = tokio::join!(run, async move {
            // Fires while the storage start hook is still sleeping.
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = signal.send(());
        });

        assert_eq!(format!("{:?}", code.unwrap()), format!("{:?}", ExitCode::SUCCESS));
        assert!(logs_contain("termination requested during startup"));
        assert!(storage.stopped.load(Ordering::Acquire));
        assert_eq!(app.graph().state(), GraphState::Stopped);
        assert_eq!(app.http_server().state(), ServerState::Stopped);
    }

    #[test]
    fn build_rejects_invalid_configuration() {
        let mut config = local_config("0");
        config.database.probe_timeout_secs = 0;

        let err = App::build(config, Logger::detached()).unwrap_err();
        assert!(matches!(err, BootError::Config(_)));
    }
}
