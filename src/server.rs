//! TCP listener spawning one [`Connection`] task per accepted peer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::events::EventSink;
use crate::registers::RegisterStore;
use crate::types::Asdu;

/// Capacity of the spontaneous data channel.
const SPONTANEOUS_CAPACITY: usize = 256;

/// IEC 104 outstation.
///
/// Connections are independent: each owns its session state and shares only
/// the register store, the event sink and the spontaneous data channel.
pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
    sink: Arc<dyn EventSink>,
    spontaneous: broadcast::Sender<Asdu>,
}

impl Server {
    /// Create a server after validating `config`.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn RegisterStore>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::new(store, config.common_address, config.max_frame_size);
        let (spontaneous, _) = broadcast::channel(SPONTANEOUS_CAPACITY);

        Ok(Self {
            config,
            dispatcher,
            sink,
            spontaneous,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sender for ASDUs reported spontaneously to every connected peer.
    ///
    /// Peers that have not started data transfer get them on STARTDT, up to
    /// the pre-DT capacity.
    pub fn spontaneous(&self) -> broadcast::Sender<Asdu> {
        self.spontaneous.clone()
    }

    /// Bind the configured address and serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        self.serve(listener, cancel).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// On cancellation every live connection is cancelled too and awaited.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(%local, common_address = self.config.common_address, "IEC 104 outstation listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("outstation shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::warn!(error = %e, %peer, "set TCP_NODELAY failed");
                        }
                        self.spawn(&mut connections, stream, peer, cancel.child_token());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "connection task panicked");
                    }
                }
            }
        }

        while connections.join_next().await.is_some() {}
        Ok(())
    }

    fn spawn<S>(
        &self,
        connections: &mut JoinSet<()>,
        stream: S,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let connection = Connection::new(
            stream,
            peer,
            &self.config,
            self.dispatcher.clone(),
            Arc::clone(&self.sink),
        )
        .with_spontaneous(self.spontaneous.subscribe());

        let span = tracing::info_span!("iec104", %peer);
        connections.spawn(
            async move {
                // Errors are already logged and reported to the sink
                let _ = connection.run(cancel).await;
            }
            .instrument(span),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopSink;
    use crate::registers::RegisterTable;

    fn store() -> Arc<dyn RegisterStore> {
        Arc::new(RegisterTable::from_registers(Vec::new()).unwrap())
    }

    #[test]
    fn test_new_validates_config() {
        let bad = ServerConfig::default().w(0);
        assert!(Server::new(bad, store(), Arc::new(NoopSink)).is_err());

        let server = Server::new(ServerConfig::default(), store(), Arc::new(NoopSink)).unwrap();
        assert_eq!(server.config().common_address, 7720);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let server = Server::new(ServerConfig::default(), store(), Arc::new(NoopSink)).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(server.serve(listener, cancel.clone()));
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
