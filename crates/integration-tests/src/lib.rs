//! Shared helpers for the end-to-end gateway tests.

use std::sync::OnceLock;

/// One multi-threaded runtime for the whole test binary.
pub fn runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to build the test runtime")
    })
}

/// Reserve a free localhost port by binding and immediately releasing it,
/// for tests that bring a service up on an address the gateway already
/// knows.
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}
