//! End-to-end run against a real OpenSSH server
//!
//! Needs Docker. Run with `cargo test --test openssh_container -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{GenericImage, ImageExt};

use ssh_shell_mcp::session::{SessionManager, SessionRegistry};
use ssh_shell_mcp::ssh::{ShellTimings, SshConfig, SshConnector};

const SSH_PORT: u16 = 2222;
const USER: &str = "tester";
const PASSWORD: &str = "tester-pw";

#[tokio::test]
#[ignore = "requires docker"]
async fn test_persistent_shell_over_ssh() {
    let container = GenericImage::new("linuxserver/openssh-server", "latest")
        .with_exposed_port(SSH_PORT.tcp())
        .with_wait_for(WaitFor::message_on_stdout("[ls.io-init] done."))
        .with_env_var("PASSWORD_ACCESS", "true")
        .with_env_var("USER_NAME", USER)
        .with_env_var("USER_PASSWORD", PASSWORD)
        .start()
        .await
        .unwrap();

    let host = container.get_host().await.unwrap().to_string();
    let port = container.get_host_port_ipv4(SSH_PORT.tcp()).await.unwrap();

    let connector = SshConnector::new().with_connect_timeout(Duration::from_secs(10));
    let registry = SessionRegistry::with_options(
        Arc::new(connector),
        ShellTimings::default(),
        Duration::from_secs(60),
    );
    let config = SshConfig::new(host, USER)
        .with_port(port)
        .with_password(PASSWORD);
    let session = SessionManager::new(config, registry.clone());
    session.initialize().await.unwrap();

    let result = session.execute("echo hello", 30).await.unwrap();
    assert!(result.output.contains("hello"));
    assert_eq!(result.exit_code, 0);

    let result = session.execute("sh -c 'exit 7'", 30).await.unwrap();
    assert_eq!(result.exit_code, 7);

    session.execute("cd /tmp", 30).await.unwrap();
    assert_eq!(session.execute("pwd", 30).await.unwrap().output, "/tmp");

    session.execute("touch /tmp/x.zip", 30).await.unwrap();
    session.track_remote_file("/tmp/x.zip").unwrap();

    let started = std::time::Instant::now();
    let err = session.execute("sleep 120", 2).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(10));

    session.close().await.unwrap();

    let checker = SessionManager::new(
        SshConfig::new(container.get_host().await.unwrap().to_string(), USER)
            .with_port(port)
            .with_password(PASSWORD),
        registry.clone(),
    );
    checker.initialize().await.unwrap();
    let result = checker.execute("test -e /tmp/x.zip", 30).await.unwrap();
    assert_ne!(result.exit_code, 0);

    registry.close_all_sessions().await;
}
