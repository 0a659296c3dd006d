//! End-to-end tests over loopback: real server, real client.

use jrcp_client::{ConnectionConfig, JrcpClient};
use jrcp_core::Controller;
use jrcp_protocol::message::ResetKind;
use jrcp_protocol::{JrcpError, NAD_CONTROLLER, PROTOCOL_VERSION};
use jrcp_server::demo::{install_demo_device, DEMO_ATR};
use jrcp_server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn spawn_server() -> (SocketAddr, Arc<Server>) {
    let mut controller = Controller::new("e2e", PROTOCOL_VERSION).unwrap();
    install_demo_device(&mut controller, 0x20, "virtual card").unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(ServerConfig::new(addr), controller));
    let runner = server.clone();
    tokio::spawn(async move { runner.run_on(listener).await });
    (addr, server)
}

fn client_config(addr: SocketAddr) -> ConnectionConfig {
    ConnectionConfig::new(addr)
        .with_connect_timeout(Duration::from_secs(5))
        .with_request_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn full_session_lifecycle() {
    let (addr, server) = spawn_server().await;
    let mut client = JrcpClient::new(client_config(addr));
    client.connect().await.unwrap();

    // Directory lists the demo card; the smallest non-controller address
    // becomes the default target.
    let nodes = client.retrieve_nodes_list().await.unwrap();
    assert!(nodes.iter().any(|n| n.description == "virtual card"));
    assert!(nodes.iter().any(|n| n.description == "e2e"));

    // By name, with WaitForCard handshake.
    client.connect_to_node("virtual card").await.unwrap();
    assert_eq!(client.current_nad(), Some(0x20));
    assert_eq!(client.current_atr().unwrap().as_ref(), DEMO_ATR);

    // Terminal info reflects the registered description.
    let info = client.retrieve_terminal_info().await.unwrap();
    assert_eq!(info, "virtual card");

    // Echo through the data channel.
    let echoed = client.echo("ping pong").await.unwrap();
    assert_eq!(echoed, "ping pong");

    // Reset renews the ATR.
    let atr = client.reset(ResetKind::Warm).await.unwrap();
    assert_eq!(atr.as_ref(), DEMO_ATR);

    // Tearing is acknowledged.
    client.prepare_reset(ResetKind::Cold, 3).await.unwrap();

    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
    server.shutdown();
}

#[tokio::test]
async fn unknown_node_name_is_invalid_device() {
    let (addr, server) = spawn_server().await;
    let mut client = JrcpClient::new(client_config(addr));
    client.connect().await.unwrap();

    let err = client.connect_to_node("no such reader").await;
    assert!(matches!(err, Err(JrcpError::InvalidDevice(name)) if name == "no such reader"));

    server.shutdown();
}

#[tokio::test]
async fn send_and_receive_respects_buffer_bounds() {
    let (addr, server) = spawn_server().await;
    let mut client = JrcpClient::new(client_config(addr));
    client.connect().await.unwrap();
    client.connect_to_node("virtual card").await.unwrap();

    let request = [0x00, 0xA4, 0x04, 0x00, 0x02, 0x3F, 0x00];

    let mut big = [0u8; 64];
    let n = client.send_and_receive(&request, &mut big).await.unwrap();
    assert_eq!(&big[..n], &request);

    let mut tiny = [0u8; 2];
    let err = client.send_and_receive(&request, &mut tiny).await;
    assert!(matches!(
        err,
        Err(JrcpError::InsufficientBuffer {
            needed: 7,
            available: 2
        })
    ));

    server.shutdown();
}

#[tokio::test]
async fn timing_options_and_selection() {
    let (addr, server) = spawn_server().await;
    let mut client = JrcpClient::new(client_config(addr));
    client.connect().await.unwrap();
    client.connect_to_node("virtual card").await.unwrap();

    let options = client.timing_options().await.unwrap();
    assert_eq!(options, vec![0x00, 0x08, 0x10]);

    client.set_timing_option(0x08).await.unwrap();

    let err = client.set_timing_option(0x05).await;
    assert!(matches!(err, Err(JrcpError::TimingOptionUnsupported(0x05))));

    client.set_io_pin(4, true).await.unwrap();

    server.shutdown();
}

#[tokio::test]
async fn operations_without_selected_node_fail() {
    let (addr, server) = spawn_server().await;
    let mut client = JrcpClient::new(client_config(addr));
    client.connect().await.unwrap();

    // No directory retrieved, no node selected.
    let err = client.echo("hello").await;
    assert!(matches!(err, Err(JrcpError::NoActiveConnection)));

    server.shutdown();
}

#[tokio::test]
async fn second_client_cannot_steal_bound_device() {
    let (addr, server) = spawn_server().await;

    let mut first = JrcpClient::new(client_config(addr));
    first.connect().await.unwrap();
    first.connect_to_node("virtual card").await.unwrap();

    let mut second = JrcpClient::new(client_config(addr));
    second.connect().await.unwrap();
    // Listing goes to the controller address, which is shared.
    second.retrieve_nodes_list().await.unwrap();
    let err = second.connect_to_node("virtual card").await;
    assert!(matches!(err, Err(JrcpError::ClientSocketMismatch)));

    // Releasing the first session frees the device.
    first.disconnect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    second.connect_to_node("virtual card").await.unwrap();

    server.shutdown();
}

#[tokio::test]
async fn controller_identity_is_listed() {
    let (addr, server) = spawn_server().await;
    let mut client = JrcpClient::new(client_config(addr));
    client.connect().await.unwrap();

    let nodes = client.retrieve_nodes_list().await.unwrap();
    let controller_entry = nodes
        .iter()
        .find(|n| n.nad == NAD_CONTROLLER && n.description == "e2e");
    assert!(controller_entry.is_some());

    server.shutdown();
}
