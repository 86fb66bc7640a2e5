//! Per-connection link state machine.
//!
//! `Session` owns the sequence counters, the pending-acknowledgement queue,
//! the pre-DT buffer and the T1/T2/T3 deadlines of one connection. It does no
//! I/O: every input (received bytes, outbound ASDU, elapsed deadline) returns
//! the [`Action`]s the connection must perform, in order. Only the owning
//! connection task calls into it, so no locking is involved.
//!
//! Sequence numbers are kept as raw control-field values (even, step 2).

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::ServerConfig;
use crate::error::Iec104Error;
use crate::frame::Frame;
use crate::types::{next_seq, seq_before, Apci, Asdu, UFunction};

/// Link state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Closed; terminal
    Disconnected,
    /// Accepted, data transfer not yet started
    Connected,
    /// Data transfer allowed (after STARTDT)
    Started,
    /// Data transfer stopped again (after STOPDT)
    Stopped,
}

/// What the connection must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A complete frame was decoded from the peer
    Received(Frame),
    /// Write a frame to the peer
    Send(Frame),
    /// Hand an inbound ASDU to the command dispatcher
    Deliver(Asdu),
    /// Tear the connection down
    Close(CloseReason),
}

/// Why the session asked for the connection to be closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Inbound I-frame with an unexpected send sequence number
    SequenceMismatch { expected: u16, actual: u16 },
    /// T1 expired on an unacknowledged I-frame or TESTFR act
    AckTimeout,
}

impl From<CloseReason> for Iec104Error {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::SequenceMismatch { expected, actual } => {
                Iec104Error::SequenceMismatch { expected, actual }
            }
            CloseReason::AckTimeout => Iec104Error::AckTimeout,
        }
    }
}

/// Sent I-frame waiting for acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAck {
    pub seq: u16,
    pub deadline: Instant,
}

/// Link state machine of one connection.
#[derive(Debug)]
pub struct Session {
    state: LinkState,
    ssn: u16,
    rsn: u16,
    ack: u16,
    /// Ordered by sequence; T1 is constant so this is also deadline order.
    pending: VecDeque<PendingAck>,
    telegram_count: u16,
    pre_dt: VecDeque<Asdu>,

    t1_deadline_test: Option<Instant>,
    t2_deadline: Option<Instant>,
    t3_deadline: Option<Instant>,

    t1: Duration,
    t2: Duration,
    t3: Duration,
    w: u16,
    pre_dt_capacity: usize,
}

impl Session {
    /// Create the state of a freshly accepted connection.
    pub fn new(config: &ServerConfig, now: Instant) -> Self {
        Self {
            state: LinkState::Connected,
            ssn: 0,
            rsn: 0,
            ack: 0,
            pending: VecDeque::new(),
            telegram_count: 0,
            pre_dt: VecDeque::new(),
            t1_deadline_test: None,
            t2_deadline: None,
            t3_deadline: Some(now + config.t3_timeout),
            t1: config.t1_timeout,
            t2: config.t2_timeout,
            t3: config.t3_timeout,
            w: config.w.max(1),
            pre_dt_capacity: config.pre_dt_capacity,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether outbound I-frames may be sent right now.
    pub fn is_dt_allowed(&self) -> bool {
        self.state == LinkState::Started
    }

    /// Next send sequence number.
    pub fn ssn(&self) -> u16 {
        self.ssn
    }

    /// Next expected receive sequence number.
    pub fn rsn(&self) -> u16 {
        self.rsn
    }

    /// Last sequence number acknowledged by the peer.
    pub fn ack(&self) -> u16 {
        self.ack
    }

    /// I-frames received since the last acknowledgement was sent.
    pub fn telegram_count(&self) -> u16 {
        self.telegram_count
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingAck> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pre_dt_len(&self) -> usize {
        self.pre_dt.len()
    }

    /// Earliest armed deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.pending.front().map(|p| p.deadline),
            self.t1_deadline_test,
            self.t2_deadline,
            self.t3_deadline,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Process one raw APDU from the reassembler.
    ///
    /// Frames with a malformed APCI are dropped without touching any state.
    /// An I-frame whose ASDU does not decode is still sequenced and
    /// acknowledged, it just is not delivered.
    pub fn on_raw(&mut self, raw: &[u8], now: Instant) -> Vec<Action> {
        if self.state == LinkState::Disconnected {
            return Vec::new();
        }

        let (apci, payload) = match Frame::split(raw) {
            Ok(parts) => parts,
            Err(e) => {
                if raw.len() > 2 && raw[2] & 0x03 == 0x03 {
                    tracing::warn!(error = %e, "malformed U-frame dropped");
                } else {
                    tracing::warn!(error = %e, "malformed frame dropped");
                }
                return Vec::new();
            }
        };

        let asdu = match apci {
            Apci::IFrame { send_seq, .. } => match Asdu::decode(payload) {
                Ok(asdu) => Some(asdu),
                Err(e) => {
                    tracing::warn!(error = %e, seq = send_seq, "undecodable ASDU");
                    None
                }
            },
            _ => None,
        };

        self.on_frame(apci, asdu, now)
    }

    /// Process one frame whose APCI parsed successfully.
    pub fn on_frame(&mut self, apci: Apci, asdu: Option<Asdu>, now: Instant) -> Vec<Action> {
        if self.state == LinkState::Disconnected {
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.t3_deadline = Some(now + self.t3);

        match apci {
            Apci::UFrame { function } => {
                actions.push(Action::Received(Frame::U(function)));
                self.on_u_frame(function, now, &mut actions);
            }
            Apci::SFrame { recv_seq } => {
                actions.push(Action::Received(Frame::S { recv_seq }));
                self.acknowledge(recv_seq);
            }
            Apci::IFrame { send_seq, recv_seq } => {
                if let Some(asdu) = &asdu {
                    actions.push(Action::Received(Frame::I {
                        send_seq,
                        recv_seq,
                        asdu: asdu.clone(),
                    }));
                }
                self.on_i_frame(send_seq, recv_seq, asdu, now, &mut actions);
            }
        }

        actions
    }

    fn on_u_frame(&mut self, function: UFunction, now: Instant, actions: &mut Vec<Action>) {
        match function {
            UFunction::StartDtAct => {
                actions.push(Action::Send(Frame::U(UFunction::StartDtCon)));
                self.state = LinkState::Started;
                tracing::info!(buffered = self.pre_dt.len(), "data transfer started");

                while let Some(asdu) = self.pre_dt.pop_front() {
                    actions.push(self.send_i_frame(asdu, now));
                }
            }
            UFunction::StopDtAct => {
                actions.push(self.send_s_frame());
                actions.push(Action::Send(Frame::U(UFunction::StopDtCon)));
                self.state = LinkState::Stopped;
                tracing::info!("data transfer stopped");
            }
            UFunction::TestFrAct => {
                actions.push(Action::Send(Frame::U(UFunction::TestFrCon)));
                if self.t1_deadline_test.take().is_some() {
                    tracing::debug!("TESTFR collision, local test cleared");
                }
            }
            UFunction::TestFrCon => {
                if self.t1_deadline_test.take().is_none() {
                    tracing::debug!("unsolicited TESTFR con");
                }
            }
            UFunction::StartDtCon | UFunction::StopDtCon => {
                // Only a controlling station sends STARTDT/STOPDT act
                tracing::debug!(function = function.name(), "unexpected confirmation ignored");
            }
        }
    }

    fn on_i_frame(
        &mut self,
        send_seq: u16,
        recv_seq: u16,
        asdu: Option<Asdu>,
        now: Instant,
        actions: &mut Vec<Action>,
    ) {
        if send_seq != self.rsn {
            tracing::warn!(expected = self.rsn, actual = send_seq, "sequence error");
            let reason = CloseReason::SequenceMismatch {
                expected: self.rsn,
                actual: send_seq,
            };
            actions.push(Action::Send(Frame::S { recv_seq: self.rsn }));
            actions.push(Action::Close(reason));
            self.close();
            return;
        }

        self.acknowledge(recv_seq);

        self.rsn = next_seq(self.rsn);
        self.telegram_count += 1;
        if self.telegram_count >= self.w {
            actions.push(self.send_s_frame());
        } else if self.t2_deadline.is_none() {
            self.t2_deadline = Some(now + self.t2);
        }

        match asdu {
            Some(asdu) if self.is_dt_allowed() => actions.push(Action::Deliver(asdu)),
            Some(asdu) => {
                tracing::debug!(type_id = %asdu.type_id(), "I-frame while data transfer is stopped");
            }
            None => {}
        }
    }

    /// Drop every pending entry sent before `recv_seq`.
    fn acknowledge(&mut self, recv_seq: u16) {
        if seq_before(self.ssn, recv_seq) {
            tracing::warn!(ack = recv_seq, ssn = self.ssn, "acknowledgement beyond last sent frame ignored");
            return;
        }

        self.ack = recv_seq;
        while let Some(front) = self.pending.front() {
            if seq_before(front.seq, recv_seq) {
                self.pending.pop_front();
            } else {
                break;
            }
        }
    }

    /// Queue an outbound ASDU.
    ///
    /// Sent right away while data transfer is allowed, otherwise held in the
    /// pre-DT buffer until the next STARTDT. A full buffer drops the ASDU.
    pub fn send_asdu(&mut self, asdu: Asdu, now: Instant) -> Option<Action> {
        match self.state {
            LinkState::Started => Some(self.send_i_frame(asdu, now)),
            LinkState::Disconnected => None,
            LinkState::Connected | LinkState::Stopped => {
                if self.pre_dt.len() >= self.pre_dt_capacity {
                    tracing::warn!(
                        capacity = self.pre_dt_capacity,
                        type_id = %asdu.type_id(),
                        "pre-DT buffer full, ASDU dropped"
                    );
                } else {
                    self.pre_dt.push_back(asdu);
                }
                None
            }
        }
    }

    fn send_i_frame(&mut self, asdu: Asdu, now: Instant) -> Action {
        let frame = Frame::I {
            send_seq: self.ssn,
            recv_seq: self.rsn,
            asdu,
        };
        self.pending.push_back(PendingAck {
            seq: self.ssn,
            deadline: now + self.t1,
        });
        self.ssn = next_seq(self.ssn);

        // The I-frame carries our receive acknowledgement
        self.telegram_count = 0;
        self.t2_deadline = None;

        Action::Send(frame)
    }

    fn send_s_frame(&mut self) -> Action {
        self.telegram_count = 0;
        self.t2_deadline = None;
        Action::Send(Frame::S { recv_seq: self.rsn })
    }

    /// Handle every deadline that has passed at `now`.
    pub fn on_timeout(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state == LinkState::Disconnected {
            return actions;
        }

        let data_expired = self.pending.front().is_some_and(|p| p.deadline <= now);
        let test_expired = self.t1_deadline_test.is_some_and(|d| d <= now);
        if data_expired || test_expired {
            if let Some(front) = self.pending.front() {
                tracing::warn!(seq = front.seq, unacked = self.pending.len(), "T1 expired");
            } else {
                tracing::warn!("T1 expired waiting for TESTFR con");
            }
            actions.push(Action::Close(CloseReason::AckTimeout));
            self.close();
            return actions;
        }

        if self.t2_deadline.is_some_and(|d| d <= now) {
            tracing::trace!(rsn = self.rsn, "T2 expired, acknowledging");
            actions.push(self.send_s_frame());
        }

        if self.t3_deadline.is_some_and(|d| d <= now) {
            tracing::debug!("T3 expired, sending TESTFR act");
            actions.push(Action::Send(Frame::U(UFunction::TestFrAct)));
            if self.t1_deadline_test.is_none() {
                self.t1_deadline_test = Some(now + self.t1);
            }
            self.t3_deadline = Some(now + self.t3);
        }

        actions
    }

    /// Enter the terminal state and disarm every timer.
    pub fn close(&mut self) {
        self.state = LinkState::Disconnected;
        self.pending.clear();
        self.pre_dt.clear();
        self.t1_deadline_test = None;
        self.t2_deadline = None;
        self.t3_deadline = None;
    }
}
