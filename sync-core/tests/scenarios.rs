//! End-to-end scenario tests, driving two `SyncController`s over a real
//! loopback TCP pair via `Session`.

mod support;

use sync_core::controller::{ControllerState, Role, SyncController};
use sync_core::differ::Tolerances;
use sync_core::error::SyncError;
use sync_core::model::{Drawing, Entity, Footprint, Kiid, Layer, Rotation};
use sync_core::session::{Received, Session};
use support::{empty_board, FakeAdapter};
use tokio::net::{TcpListener, TcpStream};

async fn connected_sessions() -> (Session, Session) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (Session::new(server, 64), Session::new(client, 64))
}

fn circle(kiid: &str, cx: i64, cy: i64, radius: i64) -> Drawing {
    let mut d = Drawing::Circle {
        center: [cx, cy],
        radius,
        id: 0,
        kiid: Kiid::new(kiid),
        hash: String::new(),
    };
    d.recompute_hash();
    d
}

fn footprint(kiid: &str, pos: [i64; 2], rot_deg: f64) -> Footprint {
    let mut f = Footprint {
        reference: "R1".into(),
        pos,
        rot: Rotation::new(rot_deg),
        layer: Layer::Top,
        pads_pth: None,
        models_3d: None,
        id: 0,
        kiid: Kiid::new(kiid),
        hash: String::new(),
    };
    f.recompute_hash();
    f
}

/// Drive one full Peer-initiated sync cycle over `host_session`/
/// `peer_session`, returning the Peer's `on_rep_received` result so
/// callers can assert on a hash mismatch.
async fn run_sync_cycle<H: sync_core::Adapter, P: sync_core::Adapter>(
    host: &mut SyncController<H>,
    host_session: &Session,
    peer: &mut SyncController<P>,
    peer_session: &Session,
) -> Result<(), SyncError> {
    let req = peer.request_sync().expect("peer should be able to request a diff");
    peer_session.send(req.tag, &req.payload).await.unwrap();

    let Received::ReqDif = host_session.recv_one().await.unwrap().unwrap() else {
        panic!("expected REQDIF");
    };
    let host_dif = host.on_reqdif_received().await.unwrap();
    host_session.send(host_dif.tag, &host_dif.payload).await.unwrap();

    let Received::Dif(host_payload) = peer_session.recv_one().await.unwrap().unwrap() else {
        panic!("expected DIF");
    };
    let peer_dif = peer.on_dif_received_as_peer(&host_payload).await.unwrap();
    peer_session.send(peer_dif.tag, &peer_dif.payload).await.unwrap();

    let Received::Dif(merged_payload) = host_session.recv_one().await.unwrap().unwrap() else {
        panic!("expected merged DIF");
    };
    let rep = host.on_dif_received_as_host(&merged_payload).await.unwrap();
    host_session.send(rep.tag, &rep.payload).await.unwrap();

    let Received::Rep { diff_json, hash } = peer_session.recv_one().await.unwrap().unwrap() else {
        panic!("expected REP");
    };
    peer.on_rep_received(&diff_json, &hash).await
}

async fn cold_sync<H: sync_core::Adapter, P: sync_core::Adapter>(
    host: &mut SyncController<H>,
    host_session: &Session,
    peer: &mut SyncController<P>,
    peer_session: &Session,
) {
    host.on_connected();
    peer.on_connected();

    let req = peer.request_sync().expect("peer should request PCB");
    peer_session.send(req.tag, &req.payload).await.unwrap();

    let Received::ReqPcb = host_session.recv_one().await.unwrap().unwrap() else {
        panic!("expected REQPCB");
    };
    let reply = host.on_reqpcb_received().await.unwrap();
    host_session.send(reply.tag, &reply.payload).await.unwrap();

    let Received::Pcb(payload) = peer_session.recv_one().await.unwrap().unwrap() else {
        panic!("expected PCB");
    };
    peer.on_pcb_received(&payload).await.unwrap();
}

#[tokio::test]
async fn cold_sync_converges_peer_to_host_state() {
    let mut board = empty_board("ab12");
    board.drawings.push(circle("k1", 10_000, 20_000, 500));
    let host_adapter = FakeAdapter::new(board);
    let mut host = SyncController::new(Role::Host, host_adapter, Tolerances::default());
    let peer_adapter = FakeAdapter::new(empty_board("0000"));
    let mut peer = SyncController::new(Role::Peer, peer_adapter, Tolerances::default());

    let (host_session, peer_session) = connected_sessions().await;
    cold_sync(&mut host, &host_session, &mut peer, &peer_session).await;

    assert_eq!(peer.state(), ControllerState::HasModel);
    assert_eq!(peer.model().unwrap().hash_board(), host.model().unwrap().hash_board());
}

#[tokio::test]
async fn host_side_move_propagates_to_peer() {
    let mut board = empty_board("ab12");
    board.drawings.push(circle("k1", 10_000, 20_000, 500));
    let host_adapter = FakeAdapter::new(board);
    let mut host = SyncController::new(Role::Host, host_adapter, Tolerances::default());
    let peer_adapter = FakeAdapter::new(empty_board("0000"));
    let mut peer = SyncController::new(Role::Peer, peer_adapter, Tolerances::default());
    let (host_session, peer_session) = connected_sessions().await;
    cold_sync(&mut host, &host_session, &mut peer, &peer_session).await;

    host.adapter().mutate(|b| {
        if let Drawing::Circle { center, .. } = &mut b.drawings[0] {
            *center = [12_000, 20_000];
        }
    });

    run_sync_cycle(&mut host, &host_session, &mut peer, &peer_session).await.unwrap();

    assert_eq!(peer.state(), ControllerState::HasModel);
    assert_eq!(peer.model().unwrap().hash_board(), host.model().unwrap().hash_board());
    let Drawing::Circle { center, .. } = &peer.model().unwrap().board.drawings[0] else {
        panic!("expected circle");
    };
    assert_eq!(*center, [12_000, 20_000]);
}

#[tokio::test]
async fn peer_side_add_repairs_identity() {
    let board = empty_board("ab12");
    let host_adapter = FakeAdapter::new(board);
    let mut host = SyncController::new(Role::Host, host_adapter, Tolerances::default());
    let peer_adapter = FakeAdapter::new(empty_board("0000"));
    let mut peer = SyncController::new(Role::Peer, peer_adapter, Tolerances::default());
    let (host_session, peer_session) = connected_sessions().await;
    cold_sync(&mut host, &host_session, &mut peer, &peer_session).await;

    let provisional = Kiid::provisional("abc123");
    peer.adapter().mutate(|b| {
        b.drawings.push(Drawing::Line {
            start: [0, 0],
            end: [1_000, 1_000],
            id: 0,
            kiid: provisional.clone(),
            hash: String::new(),
        });
    });

    run_sync_cycle(&mut host, &host_session, &mut peer, &peer_session).await.unwrap();

    assert_eq!(peer.model().unwrap().hash_board(), host.model().unwrap().hash_board());
    assert!(peer.model().unwrap().board.drawings.iter().all(|d| !d.kiid().is_provisional()));
    assert!(host.model().unwrap().board.drawings.iter().all(|d| !d.kiid().is_provisional()));
}

#[tokio::test]
async fn concurrent_change_merges_distinct_keys() {
    let mut board = empty_board("ab12");
    board.footprints.push(footprint("f1", [0, 0], 0.0));
    let host_adapter = FakeAdapter::new(board);
    let mut host = SyncController::new(Role::Host, host_adapter, Tolerances::default());
    let peer_adapter = FakeAdapter::new(empty_board("0000"));
    let mut peer = SyncController::new(Role::Peer, peer_adapter, Tolerances::default());
    let (host_session, peer_session) = connected_sessions().await;
    cold_sync(&mut host, &host_session, &mut peer, &peer_session).await;

    host.adapter().mutate(|b| {
        b.footprints[0].rot = Rotation::new(90.0);
    });
    peer.adapter().mutate(|b| {
        b.footprints[0].pos = [50_000, 50_000];
    });

    run_sync_cycle(&mut host, &host_session, &mut peer, &peer_session).await.unwrap();

    assert_eq!(peer.model().unwrap().hash_board(), host.model().unwrap().hash_board());
    let converged = &peer.model().unwrap().board.footprints[0];
    assert_eq!(converged.rot.degrees(), 90.0);
    assert_eq!(converged.pos, [50_000, 50_000]);
}

#[tokio::test]
async fn deletion_converges() {
    let mut board = empty_board("ab12");
    board.drawings.push(circle("k1", 10_000, 20_000, 500));
    let host_adapter = FakeAdapter::new(board);
    let mut host = SyncController::new(Role::Host, host_adapter, Tolerances::default());
    let peer_adapter = FakeAdapter::new(empty_board("0000"));
    let mut peer = SyncController::new(Role::Peer, peer_adapter, Tolerances::default());
    let (host_session, peer_session) = connected_sessions().await;
    cold_sync(&mut host, &host_session, &mut peer, &peer_session).await;

    peer.adapter().mutate(|b| b.drawings.clear());

    run_sync_cycle(&mut host, &host_session, &mut peer, &peer_session).await.unwrap();

    assert_eq!(peer.model().unwrap().hash_board(), host.model().unwrap().hash_board());
    assert!(host.model().unwrap().board.drawings.is_empty());
}

#[tokio::test]
async fn hash_mismatch_disconnects_peer() {
    let board = empty_board("ab12");
    let host_adapter = FakeAdapter::new(board);
    let mut host = SyncController::new(Role::Host, host_adapter, Tolerances::default());
    let peer_adapter = FakeAdapter::new(empty_board("0000"));
    let mut peer = SyncController::new(Role::Peer, peer_adapter, Tolerances::default());
    let (host_session, peer_session) = connected_sessions().await;
    cold_sync(&mut host, &host_session, &mut peer, &peer_session).await;

    // Drive the cycle up through REP, then feed the Peer a corrupted
    // expected hash directly, simulating the Peer's BoardModel having
    // diverged behind the protocol's back.
    let req = peer.request_sync().unwrap();
    peer_session.send(req.tag, &req.payload).await.unwrap();
    host_session.recv_one().await.unwrap().unwrap();
    let host_dif = host.on_reqdif_received().await.unwrap();
    host_session.send(host_dif.tag, &host_dif.payload).await.unwrap();
    let Received::Dif(host_payload) = peer_session.recv_one().await.unwrap().unwrap() else {
        panic!("expected DIF");
    };
    let peer_dif = peer.on_dif_received_as_peer(&host_payload).await.unwrap();
    peer_session.send(peer_dif.tag, &peer_dif.payload).await.unwrap();
    let Received::Dif(merged_payload) = host_session.recv_one().await.unwrap().unwrap() else {
        panic!("expected merged DIF");
    };
    let rep = host.on_dif_received_as_host(&merged_payload).await.unwrap();
    let Received::Rep { diff_json, .. } = {
        host_session.send(rep.tag, &rep.payload).await.unwrap();
        peer_session.recv_one().await.unwrap().unwrap()
    } else {
        panic!("expected REP");
    };

    let corrupted_hash = "f".repeat(32);
    let err = peer.on_rep_received(&diff_json, &corrupted_hash).await.unwrap_err();
    assert!(matches!(err, SyncError::HashMismatch { .. }));
    assert_eq!(peer.state(), ControllerState::Disconnected);
}
