pub mod fake_adapter;

pub use fake_adapter::FakeAdapter;

use sync_core::model::{Board, General, Kiid};

pub fn empty_board(pcb_id: &str) -> Board {
    Board {
        general: General {
            pcb_name: "demo".into(),
            pcb_id: pcb_id.into(),
            thickness: 1600,
            kiid: Kiid::new("gen-1"),
            file_directory: String::new(),
        },
        drawings: vec![],
        footprints: vec![],
        vias: vec![],
    }
}
