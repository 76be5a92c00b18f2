//! The TCP server: accept loop and per-connection dispatch.
//!
//! One inbound connection carries one message; the sender closes its write
//! side to delimit it. Each connection is handled on its own task, and a
//! handler failure never stops the accept loop.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use ember_core::constants::MAX_MESSAGE_SIZE;
use ember_core::error::{EmberError, NetError};

use crate::handlers::handle_message;
use crate::node::Node;
use crate::protocol::Message;

/// Bind the node's address and run the server.
pub async fn serve(node: Arc<Node>) -> Result<(), EmberError> {
    let listener = TcpListener::bind(node.addr()).await.map_err(NetError::Io)?;
    run(node, listener).await
}

/// Run the server on an already-bound listener.
///
/// A non-central node opens with a `version` handshake toward the central
/// node before accepting traffic.
pub async fn run(node: Arc<Node>, listener: TcpListener) -> Result<(), EmberError> {
    info!(addr = %node.addr(), central = node.is_central(), "node listening");

    if !node.is_central() {
        let central = node.peers().central().to_string();
        node.send_version(&central).await;
    }

    loop {
        let (stream, remote) = listener.accept().await.map_err(NetError::Io)?;
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(node, stream).await {
                warn!(remote = %remote, error = %e, "dropping connection");
            }
        });
    }
}

/// Read one framed message off the stream and dispatch it.
async fn handle_connection(node: Arc<Node>, mut stream: TcpStream) -> Result<(), EmberError> {
    let mut buf = Vec::new();
    let mut limited = (&mut stream).take((MAX_MESSAGE_SIZE + 1) as u64);
    limited.read_to_end(&mut buf).await.map_err(NetError::Io)?;

    let msg = Message::decode(&buf)?;
    debug!(command = msg.command(), "received command");
    handle_message(node, msg).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;

    use ember_chain::Blockchain;
    use ember_core::address;
    use ember_core::crypto::KeyPair;
    use ember_core::types::Transaction;

    use crate::protocol::TxPayload;

    async fn listening_node() -> (Arc<Node>, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let owner = address::from_pubkey(&KeyPair::generate().public_key_bytes());
        let chain =
            Arc::new(Blockchain::create(dir.path().join("chaindata"), &owner).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // Central is itself, so no handshake fires at startup.
        let node = Node::new(addr.clone(), None, chain, addr.clone());
        tokio::spawn(run(node.clone(), listener));
        (node, addr, dir)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivered_tx_lands_in_mempool() {
        let (node, addr, _dir) = listening_node().await;
        let to = address::from_pubkey(&KeyPair::generate().public_key_bytes());
        let tx = Transaction::new_coinbase(&to, None).unwrap();

        crate::node::submit_tx(&addr, "127.0.0.1:9", &tx).await.unwrap();

        let id = tx.hex_id();
        for _ in 0..50 {
            if node.mempool_contains(&id) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("transaction never reached the mempool");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn garbage_connection_is_survived() {
        let (node, addr, _dir) = listening_node().await;

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        stream.write_all(b"definitely not a frame").await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        // The server is still alive and processing afterwards.
        let to = address::from_pubkey(&KeyPair::generate().public_key_bytes());
        let tx = Transaction::new_coinbase(&to, None).unwrap();
        crate::node::submit_tx(&addr, "127.0.0.1:9", &tx).await.unwrap();

        let id = tx.hex_id();
        for _ in 0..50 {
            if node.mempool_contains(&id) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("server stopped handling after a malformed frame");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tx_payload_roundtrips_through_wire() {
        let (node, addr, _dir) = listening_node().await;
        let to = address::from_pubkey(&KeyPair::generate().public_key_bytes());
        let tx = Transaction::new_coinbase(&to, None).unwrap();

        let msg = Message::Tx(TxPayload {
            from: "127.0.0.1:9".into(),
            tx: tx.serialize().unwrap(),
        });
        let mut stream = TcpStream::connect(&addr).await.unwrap();
        stream.write_all(&msg.encode().unwrap()).await.unwrap();
        stream.shutdown().await.unwrap();

        let id = tx.hex_id();
        for _ in 0..50 {
            if let Some(received) = node.mempool_get(&id) {
                assert_eq!(received, tx);
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        panic!("transaction never arrived");
    }
}
