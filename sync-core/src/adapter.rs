//! Back-end adapter interface.
//!
//! Everything ECAD-specific or MCAD-specific — reading native board
//! objects, drawing shapes in a sketch, importing 3D STEP models,
//! refreshing the viewport — lives behind this trait. The core never
//! touches a native-object handle; all cross-side references go through
//! `Kiid`.

use async_trait::async_trait;

use crate::diff::Diff;
use crate::error::SyncError;
use crate::model::{Board, Kiid};

/// A permanent-kiid remapping returned by `apply_diff` for any entity it
/// drew that had carried a provisional kiid.
pub type KiidRemap = (Kiid, Kiid);

/// The back-end adapter interface consumed by the core.
///
/// Implementations are ECAD- or MCAD-specific and are expected to be
/// thin wrappers around the host tool's scripting API; none of that is
/// in scope here.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Produce a fresh `Board` from the native document (a full scan).
    async fn scan(&self) -> Result<Board, SyncError>;

    /// Produce a scoped `Diff` against `prior`, folding it into
    /// `accumulator` in place.
    async fn differential_scan(&self, prior: &Board, accumulator: &mut Diff) -> Result<(), SyncError>;

    /// Render an entire `Board` (used once, on `AwaitingPcb -> HasModel`).
    async fn draw_initial(&self, board: &Board) -> Result<(), SyncError>;

    /// Mutate the native document and `into` according to `diff`. Returns
    /// the permanent kiids assigned to any entity that had carried a
    /// provisional kiid, so the `Updater` can build the identity-repair
    /// follow-up diff.
    async fn apply_diff(&self, diff: &Diff, into: &mut Board) -> Result<Vec<KiidRemap>, SyncError>;
}
