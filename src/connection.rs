//! Async driver for one accepted connection.
//!
//! Bytes flow from the socket through [`Iec104Codec`] into the [`Session`];
//! the actions it returns are carried out here: frames are written (each
//! write bounded by T0), delivered ASDUs go through the [`Dispatcher`] and
//! the replies are fed back into the session for sequencing.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::codec::Iec104Codec;
use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Iec104Error, Result};
use crate::events::{EventSink, SessionEvent};
use crate::frame::Frame;
use crate::session::{Action, LinkState, Session};
use crate::types::Asdu;

/// One outstation connection over any byte stream.
pub struct Connection<S> {
    framed: Framed<S, Iec104Codec>,
    peer: SocketAddr,
    session: Session,
    dispatcher: Dispatcher,
    sink: Arc<dyn EventSink>,
    spontaneous: Option<broadcast::Receiver<Asdu>>,
    t0: Duration,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        config: &ServerConfig,
        dispatcher: Dispatcher,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            framed: Framed::new(stream, Iec104Codec::new()),
            peer,
            session: Session::new(config, Instant::now()),
            dispatcher,
            sink,
            spontaneous: None,
            t0: config.t0_timeout,
        }
    }

    /// Subscribe this connection to spontaneously reported ASDUs.
    pub fn with_spontaneous(mut self, rx: broadcast::Receiver<Asdu>) -> Self {
        self.spontaneous = Some(rx);
        self
    }

    /// Serve the connection until the peer leaves, a fatal protocol error
    /// occurs or `cancel` fires.
    ///
    /// Peer close and shutdown return `Ok(())`; sequence errors, T1 expiry and
    /// transport failures return the error that ended the connection.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.sink.emit(SessionEvent::NewConnection { peer: self.peer });
        tracing::info!("connection established");

        let result = self.serve(cancel).await;
        self.session.close();

        match &result {
            Ok(()) => tracing::info!("connection closed"),
            Err(e) => tracing::warn!(error = %e, "connection ended"),
        }

        let _ = self.framed.close().await;
        result
    }

    async fn serve(&mut self, cancel: CancellationToken) -> Result<()> {
        loop {
            let deadline = self.session.next_deadline();

            let actions = tokio::select! {
                _ = cancel.cancelled() => {
                    self.lost("shutdown");
                    return Ok(());
                }
                maybe_raw = self.framed.next() => match maybe_raw {
                    Some(Ok(raw)) => self.session.on_raw(&raw, Instant::now()),
                    Some(Err(e)) => {
                        self.lost(&e.to_string());
                        return Err(e);
                    }
                    None => {
                        self.lost(&Iec104Error::ConnectionClosed.to_string());
                        return Ok(());
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.session.on_timeout(Instant::now())
                }
                msg = next_spontaneous(&mut self.spontaneous) => match msg {
                    Ok(asdu) => self
                        .session
                        .send_asdu(asdu, Instant::now())
                        .into_iter()
                        .collect(),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "spontaneous data lagged");
                        Vec::new()
                    }
                    Err(RecvError::Closed) => {
                        self.spontaneous = None;
                        Vec::new()
                    }
                },
            };

            self.apply(actions).await?;
        }
    }

    /// Carry out session actions in order.
    async fn apply(&mut self, actions: Vec<Action>) -> Result<()> {
        let mut queue: VecDeque<Action> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Received(frame) => {
                    tracing::debug!(%frame, "rx");
                    self.sink.emit(SessionEvent::FrameReceived {
                        peer: self.peer,
                        frame,
                    });
                }
                Action::Send(frame) => self.send(frame).await?,
                Action::Deliver(asdu) => {
                    for reply in self.dispatcher.handle(&asdu) {
                        queue.extend(self.session.send_asdu(reply, Instant::now()));
                    }
                }
                Action::Close(reason) => {
                    let err = Iec104Error::from(reason);
                    self.sink.emit(SessionEvent::ConnectionTerminated {
                        peer: self.peer,
                        reason: err.to_string(),
                    });
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        match timeout(self.t0, self.framed.send(frame.clone())).await {
            Ok(Ok(())) => {
                tracing::debug!(%frame, "tx");
                self.sink.emit(SessionEvent::FrameSent {
                    peer: self.peer,
                    frame,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, %frame, "send failed");
                self.lost(&e.to_string());
                Err(e)
            }
            Err(_) => {
                tracing::warn!(%frame, "T0 expired while writing");
                self.lost("T0 write timeout");
                Err(io::Error::new(io::ErrorKind::TimedOut, "T0 write timeout").into())
            }
        }
    }

    fn lost(&self, reason: &str) {
        self.sink.emit(SessionEvent::ConnectionLost {
            peer: self.peer,
            reason: reason.to_string(),
        });
    }

    pub fn state(&self) -> LinkState {
        self.session.state()
    }
}

async fn next_spontaneous(
    rx: &mut Option<broadcast::Receiver<Asdu>>,
) -> std::result::Result<Asdu, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopSink;
    use crate::registers::{Register, RegisterTable};
    use crate::types::{Cot, Element, InformationObject, Ioa, PointValue, TypeId};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    const STARTDT_ACT: [u8; 6] = [0x68, 0x04, 0x07, 0x00, 0x00, 0x00];
    const STARTDT_CON: [u8; 6] = [0x68, 0x04, 0x0B, 0x00, 0x00, 0x00];

    fn peer() -> SocketAddr {
        "192.0.2.10:50000".parse().unwrap()
    }

    fn dispatcher(config: &ServerConfig) -> Dispatcher {
        let table = RegisterTable::from_registers(vec![Register::new(
            Ioa(100).into(),
            TypeId::SinglePoint,
            PointValue::Bool(true),
        )])
        .unwrap();
        Dispatcher::new(Arc::new(table), config.common_address, config.max_frame_size)
    }

    fn spawn(
        config: ServerConfig,
    ) -> (
        DuplexStream,
        mpsc::UnboundedReceiver<SessionEvent>,
        broadcast::Sender<Asdu>,
        CancellationToken,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let dispatcher = dispatcher(&config);
        let (client, server) = duplex(4096);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (spont_tx, spont_rx) = broadcast::channel(16);
        let cancel = CancellationToken::new();

        let conn = Connection::new(server, peer(), &config, dispatcher, Arc::new(events_tx))
            .with_spontaneous(spont_rx);
        let handle = tokio::spawn(conn.run(cancel.clone()));
        (client, events_rx, spont_tx, cancel, handle)
    }

    async fn read_frame(client: &mut DuplexStream) -> Vec<u8> {
        let mut head = [0u8; 2];
        client.read_exact(&mut head).await.unwrap();
        let mut rest = vec![0u8; head[1] as usize];
        client.read_exact(&mut rest).await.unwrap();
        let mut frame = head.to_vec();
        frame.extend(rest);
        frame
    }

    #[tokio::test]
    async fn test_scripted_startdt() {
        let config = ServerConfig::default();
        let mock = tokio_test::io::Builder::new()
            .read(&STARTDT_ACT)
            .write(&STARTDT_CON)
            .build();

        let conn = Connection::new(mock, peer(), &config, dispatcher(&config), Arc::new(NoopSink));
        assert_ok!(conn.run(CancellationToken::new()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startdt_and_events() {
        let (mut client, mut events, _spont, cancel, handle) = spawn(ServerConfig::default());

        client.write_all(&STARTDT_ACT).await.unwrap();
        assert_eq!(read_frame(&mut client).await, STARTDT_CON);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());

        assert_eq!(events.recv().await, Some(SessionEvent::NewConnection { peer: peer() }));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::FrameReceived { frame: Frame::U(_), .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::FrameSent { frame: Frame::U(_), .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::ConnectionLost { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spontaneous_held_until_startdt() {
        let (mut client, _events, spont, _cancel, _handle) = spawn(ServerConfig::default());

        let asdu = Asdu::single(
            TypeId::SinglePoint,
            Cot::Spontaneous,
            7720,
            InformationObject::new(Ioa(100), Element::SinglePoint {
                value: false,
                quality: Default::default(),
            }),
        );
        spont.send(asdu.clone()).unwrap();
        tokio::task::yield_now().await;

        client.write_all(&STARTDT_ACT).await.unwrap();
        assert_eq!(read_frame(&mut client).await, STARTDT_CON);

        let raw = read_frame(&mut client).await;
        assert_eq!(
            Frame::decode(&raw).unwrap(),
            Frame::I {
                send_seq: 0,
                recv_seq: 0,
                asdu
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_is_clean() {
        let (client, _events, _spont, _cancel, handle) = spawn(ServerConfig::default());
        drop(client);
        assert!(handle.await.unwrap().is_ok());
    }
}
