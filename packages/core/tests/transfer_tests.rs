//! End-to-end tests for the transfer state machine
//!
//! Engines talk through in-memory `mpsc` channels standing in for the
//! peer-to-peer transport. Some tests drive one side by hand with crafted
//! protocol messages to pin down ordering and failure behavior.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;
use zerohub_core::crypto::session_key::KeyExchange;
use zerohub_core::protocol::messages::{
    CancelData, ChunkData, CompleteData, FileRefData, OfferData, TransferMessage,
};
use zerohub_core::protocol::wire::{pack_message, unpack_message};
use zerohub_core::utils::logging::init_logging;
use zerohub_core::{
    AsymmetricKeyPair, AuthenticatedCipher, Config, CryptoConfig, CryptoError, Direction,
    FileStatus, KeyManager, KeyProtection, OutboundBlob, PeerIdentity, SendProtection,
    SessionKey, ShareError, TransferConfig, TransferEngine, TransferKey, TransferSnapshot,
};

static ALICE: Lazy<Arc<AsymmetricKeyPair>> = Lazy::new(|| identity());
static BOB: Lazy<Arc<AsymmetricKeyPair>> = Lazy::new(|| identity());
static CAROL: Lazy<Arc<AsymmetricKeyPair>> = Lazy::new(|| identity());

const WAIT: Duration = Duration::from_secs(30);

fn identity() -> Arc<AsymmetricKeyPair> {
    Arc::new(AsymmetricKeyPair::generate(2048).expect("RSA key generation failed"))
}

fn test_config() -> Config {
    Config {
        crypto: CryptoConfig {
            // Тестам не нужна стойкость PBKDF2
            pbkdf2_iterations: 1_000,
            rsa_modulus_bits: 2048,
        },
        transfer: TransferConfig {
            chunk_size: 1024,
            ..TransferConfig::default()
        },
    }
}

fn engine(
    identity: &Arc<AsymmetricKeyPair>,
    config: Config,
) -> (TransferEngine, mpsc::Receiver<OutboundBlob>) {
    init_logging("warn");
    let (tx, rx) = mpsc::channel(256);
    let keys = KeyManager::from_shared(Arc::clone(identity));
    (TransferEngine::new(config, keys, tx).unwrap(), rx)
}

fn peer(id: &str, identity: &Arc<AsymmetricKeyPair>) -> PeerIdentity {
    PeerIdentity::new(id, id.to_uppercase(), identity.public_key())
}

/// Forward everything `from` emits to the engines in `peers`
fn spawn_pump(
    from: &str,
    mut rx: mpsc::Receiver<OutboundBlob>,
    peers: Arc<HashMap<String, TransferEngine>>,
) {
    let from = from.to_string();
    tokio::spawn(async move {
        while let Some(blob) = rx.recv().await {
            if let Some(target) = peers.get(&blob.peer_id) {
                let _ = target.deliver(&from, &blob.bytes).await;
            }
        }
    });
}

/// Wire a set of engines into a full mesh
fn connect(nodes: Vec<(&str, TransferEngine, mpsc::Receiver<OutboundBlob>)>) {
    let peers: Arc<HashMap<String, TransferEngine>> = Arc::new(
        nodes
            .iter()
            .map(|(id, engine, _)| (id.to_string(), engine.clone()))
            .collect(),
    );
    for (id, _, rx) in nodes {
        spawn_pump(id, rx, Arc::clone(&peers));
    }
}

async fn wait_for_record(engine: &TransferEngine, key: &TransferKey) -> TransferSnapshot {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(snapshot) = engine.snapshot(key).await {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("record never appeared")
}

async fn wait_for_status(engine: &TransferEngine, key: &TransferKey, status: FileStatus) -> TransferSnapshot {
    wait_for_record(engine, key).await;
    let mut updates = engine.subscribe(key).await.unwrap();
    let snapshot = tokio::time::timeout(WAIT, updates.wait_for(|s| s.status == status))
        .await
        .expect("status never reached")
        .expect("engine dropped")
        .clone();
    snapshot
}

fn pseudo_random_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

async fn next_message(rx: &mut mpsc::Receiver<OutboundBlob>) -> TransferMessage {
    let blob = tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no outbound message")
        .expect("channel closed");
    unpack_message(&blob.bytes).unwrap()
}

/// Receiver side driven by hand: an offer wrapped for BOB, delivered as if from alice
async fn offer_to_bob(
    bob: &TransferEngine,
    size: u64,
) -> (TransferKey, SessionKey) {
    let exchange = KeyExchange::new(&test_config().crypto);
    let session_key = exchange.generate_session_key().unwrap();
    let wrapped = exchange
        .wrap_key_with_public_key(&BOB.public_key(), &session_key)
        .unwrap();

    let file_id = Uuid::new_v4();
    let offer = TransferMessage::Offer(OfferData {
        file_id,
        name: "abc.txt".to_string(),
        size,
        mime_type: Some("text/plain".to_string()),
        chunk_size: 3,
        protection: wrapped.protection(),
        wrapped_key: wrapped.into_bytes(),
    });
    bob.deliver("alice", &pack_message(&offer).unwrap()).await.unwrap();

    (TransferKey::new(file_id, "alice"), session_key)
}

async fn deliver_chunk(
    bob: &TransferEngine,
    key: &TransferKey,
    session_key: &SessionKey,
    index: u64,
    plaintext: &[u8],
) -> zerohub_core::Result<()> {
    let ciphertext = AuthenticatedCipher::new().encrypt(session_key, plaintext).unwrap();
    let chunk = TransferMessage::Chunk(ChunkData {
        file_id: key.file_id,
        sequence_index: index,
        ciphertext,
    });
    bob.deliver("alice", &pack_message(&chunk).unwrap()).await
}

async fn deliver_complete(bob: &TransferEngine, key: &TransferKey, chunk_count: u64, total_size: u64) -> zerohub_core::Result<()> {
    let complete = TransferMessage::Complete(CompleteData {
        file_id: key.file_id,
        chunk_count,
        total_size,
    });
    bob.deliver("alice", &pack_message(&complete).unwrap()).await
}

#[tokio::test]
async fn test_public_key_transfer_end_to_end() {
    let (alice, alice_rx) = engine(&ALICE, test_config());
    let (bob, bob_rx) = engine(&BOB, test_config());
    connect(vec![("alice", alice.clone(), alice_rx), ("bob", bob.clone(), bob_rx)]);

    let content = pseudo_random_content(10_000);
    let keys = alice
        .send_file(
            &[peer("bob", &BOB)],
            "photo.jpg",
            Some("image/jpeg".to_string()),
            content.clone(),
            SendProtection::PublicKey,
        )
        .await
        .unwrap();
    assert_eq!(keys.len(), 1);

    let sent = wait_for_status(&alice, &keys[0], FileStatus::Success).await;
    assert_eq!(sent.progress_percent, 100.0);
    assert_eq!(sent.direction, Direction::Outgoing);

    let bob_key = TransferKey::new(keys[0].file_id, "alice");
    let received = wait_for_status(&bob, &bob_key, FileStatus::Success).await;
    assert_eq!(received.progress_percent, 100.0);
    assert_eq!(received.bytes_transferred, 10_000);
    assert!(received.bitrate_bytes_per_sec > 0.0);
    assert_eq!(received.metadata.name, "photo.jpg");

    assert_eq!(bob.take_received(&bob_key).await.unwrap(), Some(content));
    // Файл забирают один раз
    assert_eq!(bob.take_received(&bob_key).await.unwrap(), None);
}

#[tokio::test]
async fn test_password_transfer_requires_password() {
    let (alice, alice_rx) = engine(&ALICE, test_config());
    let (bob, bob_rx) = engine(&BOB, test_config());
    connect(vec![("alice", alice.clone(), alice_rx), ("bob", bob.clone(), bob_rx)]);

    let content = pseudo_random_content(4_000);
    let keys = alice
        .send_file(
            &[peer("bob", &BOB)],
            "secret.txt",
            None,
            content.clone(),
            SendProtection::password("strongpassword"),
        )
        .await
        .unwrap();

    let bob_key = TransferKey::new(keys[0].file_id, "alice");
    let waiting = wait_for_status(&bob, &bob_key, FileStatus::WaitingAccept).await;
    assert_eq!(waiting.error, None);

    // Пароль не подобран: запись ждёт дальше
    let wrong = bob.accept(&bob_key, Some("wrongpassword")).await;
    assert!(matches!(
        wrong,
        Err(ShareError::CryptoError(CryptoError::IntegrityError))
    ));
    let still_waiting = bob.snapshot(&bob_key).await.unwrap();
    assert_eq!(still_waiting.status, FileStatus::WaitingAccept);
    assert!(still_waiting.error.is_some());

    bob.accept(&bob_key, Some("strongpassword")).await.unwrap();

    wait_for_status(&alice, &keys[0], FileStatus::Success).await;
    let done = wait_for_status(&bob, &bob_key, FileStatus::Success).await;
    assert_eq!(done.error, None);
    assert_eq!(bob.take_received(&bob_key).await.unwrap(), Some(content));
}

#[tokio::test]
async fn test_fan_out_uses_distinct_session_keys() {
    let (alice, mut alice_rx) = engine(&ALICE, test_config());

    let keys = alice
        .send_file(
            &[peer("bob", &BOB), peer("carol", &CAROL)],
            "slides.pdf",
            None,
            pseudo_random_content(2_048),
            SendProtection::PublicKey,
        )
        .await
        .unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].file_id, keys[1].file_id);

    let mut offers = HashMap::new();
    for _ in 0..2 {
        let blob = alice_rx.recv().await.unwrap();
        match unpack_message(&blob.bytes).unwrap() {
            TransferMessage::Offer(offer) => {
                offers.insert(blob.peer_id, offer);
            }
            other => panic!("expected offer, got {:?}", other),
        }
    }

    let to_bob = &offers["bob"];
    let to_carol = &offers["carol"];
    assert_ne!(to_bob.wrapped_key, to_carol.wrapped_key);

    // Каждый получатель разворачивает только свой ключ
    let exchange = KeyExchange::new(&test_config().crypto);
    let bob_key = exchange
        .unwrap_key_with_private_key(&BOB, &to_bob.wrapped_key)
        .unwrap();
    let carol_key = exchange
        .unwrap_key_with_private_key(&CAROL, &to_carol.wrapped_key)
        .unwrap();
    assert_ne!(bob_key.export_raw(), carol_key.export_raw());
    assert!(exchange
        .unwrap_key_with_private_key(&BOB, &to_carol.wrapped_key)
        .is_err());

    for key in &keys {
        let snapshot = alice.snapshot(key).await.unwrap();
        assert_eq!(snapshot.status, FileStatus::WaitingAccept);
    }
}

#[tokio::test]
async fn test_fan_out_end_to_end() {
    let (alice, alice_rx) = engine(&ALICE, test_config());
    let (bob, bob_rx) = engine(&BOB, test_config());
    let (carol, carol_rx) = engine(&CAROL, test_config());
    connect(vec![
        ("alice", alice.clone(), alice_rx),
        ("bob", bob.clone(), bob_rx),
        ("carol", carol.clone(), carol_rx),
    ]);

    let content = pseudo_random_content(5_000);
    let keys = alice
        .send_file(
            &[peer("bob", &BOB), peer("carol", &CAROL)],
            "notes.md",
            None,
            content.clone(),
            SendProtection::PublicKey,
        )
        .await
        .unwrap();

    for (receiver, key) in [(&bob, &keys[0]), (&carol, &keys[1])] {
        let incoming = TransferKey::new(key.file_id, "alice");
        wait_for_status(receiver, &incoming, FileStatus::Success).await;
        assert_eq!(receiver.take_received(&incoming).await.unwrap(), Some(content.clone()));
        wait_for_status(&alice, key, FileStatus::Success).await;
    }
}

/// Scenario: 10 MB offer against a 5 MB receiver limit
#[tokio::test]
async fn test_oversized_offer_is_refused() {
    let mut config = test_config();
    config.transfer.max_accept_size = 5 * 1024 * 1024;
    let (bob, mut bob_rx) = engine(&BOB, config);

    let file_id = Uuid::new_v4();
    let offer = TransferMessage::Offer(OfferData {
        file_id,
        name: "huge.iso".to_string(),
        size: 10 * 1024 * 1024,
        mime_type: None,
        chunk_size: 65_536,
        protection: KeyProtection::PublicKey,
        wrapped_key: vec![0u8; 256],
    });

    let result = bob.deliver("alice", &pack_message(&offer).unwrap()).await;
    assert!(matches!(
        result,
        Err(ShareError::SizeExceededError {
            declared: 10_485_760,
            max: 5_242_880
        })
    ));

    let key = TransferKey::new(file_id, "alice");
    let snapshot = bob.snapshot(&key).await.unwrap();
    assert_eq!(snapshot.status, FileStatus::Error);
    assert!(snapshot.error.is_some());

    match next_message(&mut bob_rx).await {
        TransferMessage::Cancel(CancelData { reason, .. }) => assert!(reason.is_some()),
        other => panic!("expected cancel, got {:?}", other),
    }
}

/// Scenario: chunks arrive as [0, 2, 1] and are reassembled in order
#[tokio::test]
async fn test_out_of_order_chunks_are_reassembled() {
    let (bob, mut bob_rx) = engine(&BOB, test_config());
    let (key, session_key) = offer_to_bob(&bob, 9).await;

    // Автоприём: публичный ключ и маленький файл
    assert!(matches!(
        next_message(&mut bob_rx).await,
        TransferMessage::Accept(FileRefData { .. })
    ));
    assert_eq!(bob.snapshot(&key).await.unwrap().status, FileStatus::Processing);

    deliver_chunk(&bob, &key, &session_key, 0, b"AAA").await.unwrap();
    deliver_chunk(&bob, &key, &session_key, 2, b"CCC").await.unwrap();

    let partial = bob.snapshot(&key).await.unwrap();
    assert_eq!(partial.bytes_transferred, 3);

    deliver_chunk(&bob, &key, &session_key, 1, b"BBB").await.unwrap();
    assert_eq!(bob.snapshot(&key).await.unwrap().bytes_transferred, 9);

    deliver_complete(&bob, &key, 3, 9).await.unwrap();

    let done = bob.snapshot(&key).await.unwrap();
    assert_eq!(done.status, FileStatus::Success);
    assert_eq!(done.progress_percent, 100.0);
    assert_eq!(
        bob.take_received(&key).await.unwrap(),
        Some(b"AAABBBCCC".to_vec())
    );
}

#[tokio::test]
async fn test_complete_before_last_chunk_waits() {
    let (bob, _bob_rx) = engine(&BOB, test_config());
    let (key, session_key) = offer_to_bob(&bob, 6).await;

    deliver_chunk(&bob, &key, &session_key, 0, b"abc").await.unwrap();
    deliver_complete(&bob, &key, 2, 6).await.unwrap();
    assert_eq!(bob.snapshot(&key).await.unwrap().status, FileStatus::Processing);

    deliver_chunk(&bob, &key, &session_key, 1, b"def").await.unwrap();
    assert_eq!(bob.snapshot(&key).await.unwrap().status, FileStatus::Success);
}

#[tokio::test]
async fn test_chunk_outside_window_fails_transfer() {
    let mut config = test_config();
    config.transfer.reorder_window = 4;
    let (bob, mut bob_rx) = engine(&BOB, config);
    let (key, session_key) = offer_to_bob(&bob, 30).await;
    next_message(&mut bob_rx).await; // accept

    let result = deliver_chunk(&bob, &key, &session_key, 10, b"lat").await;
    assert!(matches!(
        result,
        Err(ShareError::SequenceError {
            expected: 0,
            got: 10,
            window: 4
        })
    ));

    let snapshot = bob.snapshot(&key).await.unwrap();
    assert_eq!(snapshot.status, FileStatus::Error);
    assert_eq!(bob.take_received(&key).await.unwrap(), None);

    match next_message(&mut bob_rx).await {
        TransferMessage::Cancel(CancelData { reason, .. }) => assert!(reason.is_some()),
        other => panic!("expected cancel, got {:?}", other),
    }

    // Поздние чанки завершённой передачи молча отбрасываются
    deliver_chunk(&bob, &key, &session_key, 0, b"abc").await.unwrap();
    assert_eq!(bob.snapshot(&key).await.unwrap().status, FileStatus::Error);
}

#[tokio::test]
async fn test_replayed_chunk_fails_transfer() {
    let (bob, _bob_rx) = engine(&BOB, test_config());
    let (key, session_key) = offer_to_bob(&bob, 6).await;

    deliver_chunk(&bob, &key, &session_key, 0, b"abc").await.unwrap();
    let result = deliver_chunk(&bob, &key, &session_key, 0, b"abc").await;
    assert!(matches!(result, Err(ShareError::SequenceError { .. })));
    assert_eq!(bob.snapshot(&key).await.unwrap().status, FileStatus::Error);
}

#[tokio::test]
async fn test_tampered_chunk_fails_transfer() {
    let (bob, _bob_rx) = engine(&BOB, test_config());
    let (key, session_key) = offer_to_bob(&bob, 3).await;

    let mut ciphertext = AuthenticatedCipher::new().encrypt(&session_key, b"xyz").unwrap();
    ciphertext[14] ^= 0x01;
    let chunk = TransferMessage::Chunk(ChunkData {
        file_id: key.file_id,
        sequence_index: 0,
        ciphertext,
    });

    let result = bob.deliver("alice", &pack_message(&chunk).unwrap()).await;
    assert!(matches!(
        result,
        Err(ShareError::CryptoError(CryptoError::IntegrityError))
    ));

    let snapshot = bob.snapshot(&key).await.unwrap();
    assert_eq!(snapshot.status, FileStatus::Error);
    assert_eq!(snapshot.error.as_deref(), Some("Cryptography error: Integrity check failed"));
    assert_eq!(bob.take_received(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_overrun_beyond_declared_size_fails_transfer() {
    let (bob, _bob_rx) = engine(&BOB, test_config());
    let (key, session_key) = offer_to_bob(&bob, 4).await;

    deliver_chunk(&bob, &key, &session_key, 0, b"abc").await.unwrap();
    let result = deliver_chunk(&bob, &key, &session_key, 1, b"def").await;
    assert!(matches!(result, Err(ShareError::SizeExceededError { .. })));
    assert_eq!(bob.snapshot(&key).await.unwrap().status, FileStatus::Error);
}

#[tokio::test]
async fn test_short_transfer_never_succeeds() {
    let (bob, _bob_rx) = engine(&BOB, test_config());
    let (key, session_key) = offer_to_bob(&bob, 6).await;

    deliver_chunk(&bob, &key, &session_key, 0, b"abc").await.unwrap();
    let result = deliver_complete(&bob, &key, 1, 3).await;
    assert!(matches!(
        result,
        Err(ShareError::IncompleteTransfer {
            received: 3,
            declared: 6
        })
    ));
    assert_eq!(bob.snapshot(&key).await.unwrap().status, FileStatus::Error);
}

#[tokio::test]
async fn test_cancel_mid_stream() {
    let (tx, mut alice_rx) = mpsc::channel(4);
    let alice = TransferEngine::new(
        test_config(),
        KeyManager::from_shared(Arc::clone(&ALICE)),
        tx,
    )
    .unwrap();

    let keys = alice
        .send_file(
            &[peer("bob", &BOB)],
            "big.bin",
            None,
            pseudo_random_content(64 * 1024),
            SendProtection::PublicKey,
        )
        .await
        .unwrap();
    let key = keys[0].clone();

    assert!(matches!(next_message(&mut alice_rx).await, TransferMessage::Offer(_)));
    let accept = TransferMessage::Accept(FileRefData { file_id: key.file_id });
    alice.deliver("bob", &pack_message(&accept).unwrap()).await.unwrap();

    assert!(matches!(next_message(&mut alice_rx).await, TransferMessage::Chunk(_)));

    let canceller = {
        let alice = alice.clone();
        let key = key.clone();
        tokio::spawn(async move { alice.cancel(&key).await })
    };

    let mut chunks = 1;
    loop {
        match next_message(&mut alice_rx).await {
            TransferMessage::Chunk(_) => chunks += 1,
            TransferMessage::Cancel(CancelData { reason, .. }) => {
                assert_eq!(reason, None);
                break;
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
    canceller.await.unwrap().unwrap();

    assert!(chunks < 64, "stream should stop early, sent {}", chunks);
    let snapshot = alice.snapshot(&key).await.unwrap();
    assert_eq!(snapshot.status, FileStatus::Cancelled);
    assert!(snapshot.progress_percent < 100.0);

    // Повторная отмена
    assert!(matches!(
        alice.cancel(&key).await,
        Err(ShareError::CancelledError)
    ));
    // Прогресс после отмены не растёт
    let after = alice.snapshot(&key).await.unwrap();
    assert_eq!(after.bytes_transferred, snapshot.bytes_transferred);
}

#[tokio::test]
async fn test_receiver_cancel_reaches_sender() {
    let mut bob_config = test_config();
    bob_config.transfer.auto_accept = false;

    let (alice, alice_rx) = engine(&ALICE, test_config());
    let (bob, bob_rx) = engine(&BOB, bob_config);
    connect(vec![("alice", alice.clone(), alice_rx), ("bob", bob.clone(), bob_rx)]);

    let keys = alice
        .send_file(
            &[peer("bob", &BOB)],
            "draft.docx",
            None,
            pseudo_random_content(1_000),
            SendProtection::PublicKey,
        )
        .await
        .unwrap();

    let bob_key = TransferKey::new(keys[0].file_id, "alice");
    wait_for_status(&bob, &bob_key, FileStatus::WaitingAccept).await;

    bob.cancel(&bob_key).await.unwrap();
    assert_eq!(bob.snapshot(&bob_key).await.unwrap().status, FileStatus::Cancelled);

    let sender = wait_for_status(&alice, &keys[0], FileStatus::Cancelled).await;
    assert_eq!(sender.error, None);
}

#[tokio::test]
async fn test_reject_cancels_both_sides() {
    let mut bob_config = test_config();
    bob_config.transfer.auto_accept = false;

    let (alice, alice_rx) = engine(&ALICE, test_config());
    let (bob, bob_rx) = engine(&BOB, bob_config);
    connect(vec![("alice", alice.clone(), alice_rx), ("bob", bob.clone(), bob_rx)]);

    let keys = alice
        .send_file(
            &[peer("bob", &BOB)],
            "spam.exe",
            None,
            pseudo_random_content(100),
            SendProtection::PublicKey,
        )
        .await
        .unwrap();

    let bob_key = TransferKey::new(keys[0].file_id, "alice");
    wait_for_status(&bob, &bob_key, FileStatus::WaitingAccept).await;

    bob.reject(&bob_key).await.unwrap();
    assert_eq!(bob.snapshot(&bob_key).await.unwrap().status, FileStatus::Cancelled);
    wait_for_status(&alice, &keys[0], FileStatus::Cancelled).await;

    // После отказа принять уже нельзя
    assert!(matches!(
        bob.accept(&bob_key, None).await,
        Err(ShareError::CancelledError)
    ));
}

#[tokio::test]
async fn test_peer_abort_with_reason_is_error() {
    let (bob, _bob_rx) = engine(&BOB, test_config());
    let (key, _session_key) = offer_to_bob(&bob, 6).await;

    let abort = TransferMessage::Cancel(CancelData {
        file_id: key.file_id,
        reason: Some("disk full".to_string()),
    });
    bob.deliver("alice", &pack_message(&abort).unwrap()).await.unwrap();

    let snapshot = bob.snapshot(&key).await.unwrap();
    assert_eq!(snapshot.status, FileStatus::Error);
    assert_eq!(snapshot.error.as_deref(), Some("Peer aborted: disk full"));
}

#[tokio::test]
async fn test_empty_file_transfer() {
    let (alice, alice_rx) = engine(&ALICE, test_config());
    let (bob, bob_rx) = engine(&BOB, test_config());
    connect(vec![("alice", alice.clone(), alice_rx), ("bob", bob.clone(), bob_rx)]);

    let keys = alice
        .send_file(&[peer("bob", &BOB)], "empty.txt", None, Vec::new(), SendProtection::PublicKey)
        .await
        .unwrap();

    let sent = wait_for_status(&alice, &keys[0], FileStatus::Success).await;
    assert_eq!(sent.progress_percent, 100.0);

    let bob_key = TransferKey::new(keys[0].file_id, "alice");
    wait_for_status(&bob, &bob_key, FileStatus::Success).await;
    assert_eq!(bob.take_received(&bob_key).await.unwrap(), Some(Vec::new()));
}

#[tokio::test]
async fn test_malformed_and_unknown_messages() {
    let (bob, _bob_rx) = engine(&BOB, test_config());

    let result = bob.deliver("alice", b"\xc1\xc1\xc1").await;
    assert!(matches!(result, Err(ShareError::SerializationError(_))));

    let stray = TransferMessage::Chunk(ChunkData {
        file_id: Uuid::new_v4(),
        sequence_index: 0,
        ciphertext: vec![0u8; 40],
    });
    let result = bob.deliver("alice", &pack_message(&stray).unwrap()).await;
    assert!(matches!(result, Err(ShareError::NotFound(_))));
}

#[tokio::test]
async fn test_snapshot_json_has_no_key_material() {
    let (bob, _bob_rx) = engine(&BOB, test_config());
    let (key, _session_key) = offer_to_bob(&bob, 6).await;

    let snapshot = bob.snapshot(&key).await.unwrap();
    let json = serde_json::to_value(&snapshot).unwrap();

    assert_eq!(json["status"], "Processing");
    assert_eq!(json["direction"], "incoming");
    assert_eq!(json["peerId"], "alice");
    assert_eq!(json["metadata"]["mimeType"], "text/plain");
    assert!(json.get("progressPercent").is_some());
    assert!(json.get("bitrateBytesPerSec").is_some());
    assert!(json.get("sessionKey").is_none());
    assert!(json.get("wrappedKey").is_none());
}

#[tokio::test]
async fn test_forget_only_finished_records() {
    let (bob, _bob_rx) = engine(&BOB, test_config());
    let (key, _session_key) = offer_to_bob(&bob, 6).await;

    assert!(matches!(
        bob.forget(&key).await,
        Err(ShareError::InvalidRequest(_))
    ));

    bob.cancel(&key).await.unwrap();
    bob.forget(&key).await.unwrap();
    assert!(matches!(bob.snapshot(&key).await, Err(ShareError::NotFound(_))));
    assert!(bob.snapshots().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_recipients_are_refused() {
    let (alice, _alice_rx) = engine(&ALICE, test_config());

    let result = alice
        .send_file(
            &[peer("bob", &BOB), peer("bob", &BOB)],
            "twice.txt",
            None,
            vec![1u8, 2, 3],
            SendProtection::PublicKey,
        )
        .await;
    assert!(matches!(result, Err(ShareError::InvalidRequest(_))));
    assert!(alice.snapshots().await.is_empty());
}

#[tokio::test]
async fn test_chunk_larger_than_offered_size_fails_transfer() {
    let (bob, mut bob_rx) = engine(&BOB, test_config());
    let (key, session_key) = offer_to_bob(&bob, 6).await;
    next_message(&mut bob_rx).await; // accept

    // chunk_size в offer равен 3: 1 KiB не должен попасть в буфер
    let result = deliver_chunk(&bob, &key, &session_key, 1, &[0u8; 1024]).await;
    assert!(matches!(
        result,
        Err(ShareError::SizeExceededError {
            declared: 1052,
            max: 31
        })
    ));

    let snapshot = bob.snapshot(&key).await.unwrap();
    assert_eq!(snapshot.status, FileStatus::Error);
    assert_eq!(snapshot.bytes_transferred, 0);
    assert!(matches!(
        next_message(&mut bob_rx).await,
        TransferMessage::Cancel(CancelData { reason: Some(_), .. })
    ));
}

#[tokio::test]
async fn test_offer_with_oversized_chunks_is_refused() {
    let (bob, mut bob_rx) = engine(&BOB, test_config());

    let file_id = Uuid::new_v4();
    let offer = TransferMessage::Offer(OfferData {
        file_id,
        name: "movie.mkv".to_string(),
        size: 1024,
        mime_type: None,
        chunk_size: 64 * 1024 * 1024,
        protection: KeyProtection::PublicKey,
        wrapped_key: vec![0u8; 256],
    });

    let result = bob.deliver("alice", &pack_message(&offer).unwrap()).await;
    assert!(matches!(result, Err(ShareError::InvalidRequest(_))));

    let key = TransferKey::new(file_id, "alice");
    assert_eq!(bob.snapshot(&key).await.unwrap().status, FileStatus::Error);
    assert!(matches!(
        next_message(&mut bob_rx).await,
        TransferMessage::Cancel(CancelData { reason: Some(_), .. })
    ));
}

#[tokio::test]
async fn test_peer_cancel_with_full_outbound_queue() {
    let (tx, mut alice_rx) = mpsc::channel(1);
    let alice = TransferEngine::new(
        test_config(),
        KeyManager::from_shared(Arc::clone(&ALICE)),
        tx,
    )
    .unwrap();

    let keys = alice
        .send_file(
            &[peer("bob", &BOB)],
            "video.mp4",
            None,
            pseudo_random_content(100 * 1024),
            SendProtection::PublicKey,
        )
        .await
        .unwrap();
    let key = keys[0].clone();

    // Offer занял единственное место в очереди; поток чанков встанет на отправке
    let accept = TransferMessage::Accept(FileRefData { file_id: key.file_id });
    alice.deliver("bob", &pack_message(&accept).unwrap()).await.unwrap();
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    let cancel = TransferMessage::Cancel(CancelData {
        file_id: key.file_id,
        reason: None,
    });
    tokio::time::timeout(
        Duration::from_secs(5),
        alice.deliver("bob", &pack_message(&cancel).unwrap()),
    )
    .await
    .expect("deliver blocked behind the outbound queue")
    .unwrap();

    let snapshot = alice.snapshot(&key).await.unwrap();
    assert_eq!(snapshot.status, FileStatus::Cancelled);

    // Очередь освобождается: уходит не больше одного уже зашифрованного чанка
    assert!(matches!(next_message(&mut alice_rx).await, TransferMessage::Offer(_)));
    assert!(matches!(
        next_message(&mut alice_rx).await,
        TransferMessage::Chunk(ChunkData { sequence_index: 0, .. })
    ));
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    assert!(alice_rx.try_recv().is_err());
    assert_eq!(alice.snapshot(&key).await.unwrap().bytes_transferred, 0);
}

#[tokio::test]
async fn test_commands_on_cancelled_transfer() {
    let mut config = test_config();
    config.transfer.auto_accept = false;
    let (bob, _bob_rx) = engine(&BOB, config);
    let (key, _session_key) = offer_to_bob(&bob, 6).await;
    assert_eq!(bob.snapshot(&key).await.unwrap().status, FileStatus::WaitingAccept);

    bob.cancel(&key).await.unwrap();

    assert!(matches!(
        bob.accept(&key, None).await,
        Err(ShareError::CancelledError)
    ));
    assert!(matches!(bob.reject(&key).await, Err(ShareError::CancelledError)));
    assert!(matches!(bob.cancel(&key).await, Err(ShareError::CancelledError)));
    assert!(matches!(
        bob.take_received(&key).await,
        Err(ShareError::CancelledError)
    ));
}

#[tokio::test]
async fn test_misdirected_reject_leaves_incoming_transfer_running() {
    let (bob, _bob_rx) = engine(&BOB, test_config());
    let (key, session_key) = offer_to_bob(&bob, 6).await;

    // Reject имеет смысл только для исходящей передачи
    let reject = TransferMessage::Reject(FileRefData { file_id: key.file_id });
    let result = bob.deliver("alice", &pack_message(&reject).unwrap()).await;
    assert!(matches!(result, Err(ShareError::InvalidRequest(_))));

    deliver_chunk(&bob, &key, &session_key, 0, b"abc").await.unwrap();
    let snapshot = bob.snapshot(&key).await.unwrap();
    assert_eq!(snapshot.status, FileStatus::Processing);
    assert_eq!(snapshot.bytes_transferred, 3);
}

#[tokio::test]
async fn test_misdirected_chunk_leaves_outgoing_transfer_running() {
    let (tx, mut alice_rx) = mpsc::channel(1);
    let alice = TransferEngine::new(
        test_config(),
        KeyManager::from_shared(Arc::clone(&ALICE)),
        tx,
    )
    .unwrap();

    let keys = alice
        .send_file(
            &[peer("bob", &BOB)],
            "slides.pdf",
            None,
            pseudo_random_content(8 * 1024),
            SendProtection::PublicKey,
        )
        .await
        .unwrap();
    let key = keys[0].clone();

    // Очередь занята offer'ом, поток чанков стоит в Processing
    let accept = TransferMessage::Accept(FileRefData { file_id: key.file_id });
    alice.deliver("bob", &pack_message(&accept).unwrap()).await.unwrap();

    let chunk = TransferMessage::Chunk(ChunkData {
        file_id: key.file_id,
        sequence_index: 0,
        ciphertext: vec![0u8; 64],
    });
    let result = alice.deliver("bob", &pack_message(&chunk).unwrap()).await;
    assert!(matches!(result, Err(ShareError::InvalidRequest(_))));
    assert_eq!(alice.snapshot(&key).await.unwrap().status, FileStatus::Processing);

    // Поток продолжается до конца
    let mut chunks = 0;
    loop {
        match next_message(&mut alice_rx).await {
            TransferMessage::Offer(_) => {}
            TransferMessage::Chunk(_) => chunks += 1,
            TransferMessage::Complete(done) => {
                assert_eq!(done.chunk_count, 8);
                break;
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
    assert_eq!(chunks, 8);
    wait_for_status(&alice, &key, FileStatus::Success).await;
}
