//! SyncController.
//!
//! One state machine per side, driving the `Adapter` and producing
//! outgoing wire `Action`s for the session layer to actually send. Kept
//! decoupled from `Session`/`Transport` so the state table can be
//! exercised with a fake `Adapter` and no real socket.

use crate::adapter::Adapter;
use crate::accumulator;
use crate::diff::Diff;
use crate::differ::{Differ, Tolerances};
use crate::error::SyncError;
use crate::merger;
use crate::model::{Board, BoardModel};
use crate::updater;
use crate::wire::HeaderTag;

/// Which side of the bridge this controller drives. Which side listens vs. connects is a configuration choice,
/// not a correctness property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Peer,
}

/// States of the per-side state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Listening,
    Connecting,
    Connected,
    /// Peer only: sent `REQPCB`, waiting for `PCB`.
    AwaitingPcb,
    HasModel,
    /// Between sending `REQDIF` and receiving the `REP`.
    InSyncCycle,
}

/// A message to be sent over the session, produced by a transition.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub tag: HeaderTag,
    pub payload: String,
}

impl Outgoing {
    fn new(tag: HeaderTag, payload: impl Into<String>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }
}

/// Per-side state machine orchestrating the `Adapter` and the
/// differ/accumulator/merger/updater pipeline.
pub struct SyncController<A: Adapter> {
    role: Role,
    state: ControllerState,
    adapter: A,
    model: Option<BoardModel>,
    pending_diff: Diff,
    differ: Differ,
}

impl<A: Adapter> SyncController<A> {
    pub fn new(role: Role, adapter: A, tolerances: Tolerances) -> Self {
        Self {
            role,
            state: ControllerState::Disconnected,
            adapter,
            model: None,
            pending_diff: Diff::default(),
            differ: Differ::new(tolerances),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn model(&self) -> Option<&BoardModel> {
        self.model.as_ref()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn begin_listening(&mut self) {
        self.state = ControllerState::Listening;
    }

    pub fn begin_connecting(&mut self) {
        self.state = ControllerState::Connecting;
    }

    /// `Disconnected -> Connect OK -> Connected`.
    pub fn on_connected(&mut self) {
        tracing::info!(role = ?self.role, "connected");
        self.state = ControllerState::Connected;
    }

    pub fn on_transport_failed(&mut self) {
        self.state = ControllerState::Disconnected;
    }

    /// `Connected -> user "sync" and no model -> AwaitingPcb` (Peer), or
    /// `HasModel -> user "sync" -> InSyncCycle` (Peer). Returns the
    /// message to send, if the transition applies in the current state.
    pub fn request_sync(&mut self) -> Option<Outgoing> {
        if self.role != Role::Peer {
            return None;
        }
        match self.state {
            ControllerState::Connected if self.model.is_none() => {
                self.state = ControllerState::AwaitingPcb;
                Some(Outgoing::new(HeaderTag::ReqPcb, ""))
            }
            ControllerState::HasModel => {
                self.state = ControllerState::InSyncCycle;
                Some(Outgoing::new(HeaderTag::ReqDif, ""))
            }
            _ => None,
        }
    }

    /// Host side: `REQPCB` received -> scan and send `PCB`.
    pub async fn on_reqpcb_received(&mut self) -> Result<Outgoing, SyncError> {
        let board = self.adapter.scan().await?;
        let json = serde_json::to_string(&board)?;
        self.model = Some(BoardModel::new(board));
        self.state = ControllerState::HasModel;
        Ok(Outgoing::new(HeaderTag::Pcb, json))
    }

    /// Peer side: `AwaitingPcb -> PCB received -> HasModel`,
    /// `adapter.draw_initial(board)`.
    pub async fn on_pcb_received(&mut self, payload: &str) -> Result<(), SyncError> {
        let board: Board = serde_json::from_str(payload)?;
        self.adapter.draw_initial(&board).await?;
        self.model = Some(BoardModel::new(board));
        self.state = ControllerState::HasModel;
        Ok(())
    }

    /// Host side: "on REQDIF -> accumulate-and-send current pending Diff,
    /// then clear".
    pub async fn on_reqdif_received(&mut self) -> Result<Outgoing, SyncError> {
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| SyncError::BadFrame("REQDIF received with no BoardModel".to_string()))?;
        let fresh = self.adapter.scan().await?;
        let scoped = self.differ.diff(model, fresh.drawings, fresh.footprints, fresh.vias);
        accumulator::accumulate(&mut self.pending_diff, scoped);
        let to_send = accumulator::take(&mut self.pending_diff);
        let json = serde_json::to_string(&to_send)?;
        Ok(Outgoing::new(HeaderTag::Dif, json))
    }

    /// Peer side: `InSyncCycle -> DIF received -> InSyncCycle`: scan,
    /// diff, merge with the Host's diff, send the merged `DIF`.
    pub async fn on_dif_received_as_peer(&mut self, payload: &str) -> Result<Outgoing, SyncError> {
        let host_diff: Diff = serde_json::from_str(payload)?;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| SyncError::BadFrame("DIF received with no BoardModel".to_string()))?;
        let fresh = self.adapter.scan().await?;
        let peer_diff = self.differ.diff(model, fresh.drawings, fresh.footprints, fresh.vias);
        let merged = merger::merge(host_diff, peer_diff);
        let json = serde_json::to_string(&merged)?;
        self.state = ControllerState::InSyncCycle;
        Ok(Outgoing::new(HeaderTag::Dif, json))
    }

    /// Host side: `DIF` received -> apply the merged diff, perform
    /// identity repair, reply with `REP` carrying the repair diff and
    /// the post-update hash. The hash is computed after `updater::apply`
    /// returns, so it covers identity-repaired entities.
    pub async fn on_dif_received_as_host(&mut self, payload: &str) -> Result<Outgoing, SyncError> {
        let merged: Diff = serde_json::from_str(payload)?;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| SyncError::BadFrame("DIF received with no BoardModel".to_string()))?;
        let follow_up = updater::apply(&self.adapter, &merged, model).await?;
        let post_hash = model.hash_board();
        let reply_diff = follow_up.unwrap_or_default();
        let reply_json = serde_json::to_string(&reply_diff)?;
        let payload = crate::wire::join_rep_payload(&reply_json, &post_hash);
        self.state = ControllerState::HasModel;
        Ok(Outgoing::new(HeaderTag::Rep, payload))
    }

    /// Peer side: `InSyncCycle -> REP received -> HasModel`: apply the
    /// repair diff, verify the carried hash, clear the pending diff.
    /// A hash mismatch is a hard failure: the state moves to
    /// `Disconnected` and `SyncError::HashMismatch` is returned so the
    /// caller can send `!DIS` and close the connection.
    pub async fn on_rep_received(&mut self, diff_json: &str, expected_hash: &str) -> Result<(), SyncError> {
        let repair_diff: Diff = serde_json::from_str(diff_json)?;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| SyncError::BadFrame("REP received with no BoardModel".to_string()))?;
        updater::apply(&self.adapter, &repair_diff, model).await?;
        self.pending_diff = Diff::default();
        let actual_hash = model.hash_board();
        if actual_hash != expected_hash {
            self.state = ControllerState::Disconnected;
            tracing::error!(expected = %expected_hash, actual = %actual_hash, "hash mismatch after sync reply");
            return Err(SyncError::HashMismatch {
                expected: expected_hash.to_string(),
                actual: actual_hash,
            });
        }
        self.state = ControllerState::HasModel;
        Ok(())
    }

    /// `any -> !DIS sent/recv -> Disconnected`.
    pub fn on_disconnect(&mut self) {
        self.state = ControllerState::Disconnected;
        self.model = None;
        self.pending_diff = Diff::default();
    }
}
