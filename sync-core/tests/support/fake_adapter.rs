//! In-memory `Adapter` stand-in for integration tests: no native tool
//! behind it, just a `Board` guarded by a `std::sync::Mutex` and a
//! counter minting permanent kiids for provisional ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sync_core::adapter::{Adapter, KiidRemap};
use sync_core::diff::Diff;
use sync_core::error::SyncError;
use sync_core::model::{Board, Kiid};
use sync_core::updater;

pub struct FakeAdapter {
    pub board: Mutex<Board>,
    minted: AtomicU64,
}

impl FakeAdapter {
    pub fn new(board: Board) -> Self {
        Self {
            board: Mutex::new(board),
            minted: AtomicU64::new(0),
        }
    }

    /// Directly mutate the adapter's native-side board (as if a user had
    /// edited the design), bypassing the sync pipeline.
    pub fn mutate(&self, f: impl FnOnce(&mut Board)) {
        f(&mut self.board.lock().unwrap());
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    async fn scan(&self) -> Result<Board, SyncError> {
        Ok(self.board.lock().unwrap().clone())
    }

    async fn differential_scan(&self, _prior: &Board, _accumulator: &mut Diff) -> Result<(), SyncError> {
        Ok(())
    }

    async fn draw_initial(&self, board: &Board) -> Result<(), SyncError> {
        *self.board.lock().unwrap() = board.clone();
        Ok(())
    }

    async fn apply_diff(&self, diff: &Diff, into: &mut Board) -> Result<Vec<KiidRemap>, SyncError> {
        let remaps = updater::apply_bookkeeping(diff, into, |_provisional| {
            let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
            Kiid::new(format!("kc-uuid-{n}"))
        });
        *self.board.lock().unwrap() = into.clone();
        Ok(remaps)
    }
}
