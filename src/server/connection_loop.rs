// src/server/connection_loop.rs

//! The RPC accept loop: one task per connection, bounded by a semaphore,
//! each running frames through the dispatcher.

use crate::core::LatticeError;
use crate::core::metrics;
use crate::core::rpc::dispatcher::Dispatcher;
use crate::core::rpc::frame::FrameCodec;
use crate::core::rpc::ratelimit::NoopLimiter;
use crate::core::state::ControllerState;
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Upper bound on concurrently served connections.
const MAX_CONNECTIONS: usize = 256;

/// Binds the controller port.
pub async fn bind(state: &Arc<ControllerState>) -> Result<TcpListener> {
    let conf = state.config();
    let addr = format!("0.0.0.0:{}", conf.controller_port);
    Ok(TcpListener::bind(&addr).await?)
}

/// Accepts connections until the listener fails.
pub async fn serve(state: Arc<ControllerState>, listener: TcpListener) -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::new(state.clone(), Arc::new(NoopLimiter)));
    let permits = Arc::new(Semaphore::new(MAX_CONNECTIONS));
    loop {
        let (socket, peer) = listener.accept().await?;
        let Ok(permit) = permits.clone().acquire_owned().await else {
            continue;
        };
        metrics::CONNECTED_PEERS.inc();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            debug!(%peer, "connection opened");
            if let Err(e) = handle_connection(dispatcher, socket).await {
                warn!(%peer, error = %e, "connection closed with error");
            }
            metrics::CONNECTED_PEERS.dec();
            drop(permit);
        });
    }
}

async fn handle_connection(
    dispatcher: Arc<Dispatcher>,
    socket: TcpStream,
) -> Result<(), LatticeError> {
    let mut framed = Framed::new(socket, FrameCodec);
    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let response = dispatcher.dispatch(frame).await;
        framed.send(response).await?;
    }
    Ok(())
}
