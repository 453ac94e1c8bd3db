//! End-to-end disbursement scenarios against a sled ledger and a mock chain.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use drip_common::traits::DBInterface;
use drip_common::types::{Address, Hash};
use drip_common::utils::db_keys::{address_counter_key, GLOBAL_COUNTER_KEY};
use drip_common::utils::logging::init_test_logging;
use drip_crypto::SigningAccount;
use drip_faucet::api::{router, AppState};
use drip_faucet::rpc::{BlockHeader, CallRequest, ChainClient, RpcError, RpcResult};
use drip_faucet::{
    CapExceeded, CapPolicy, Counter, CounterRecord, FaucetError, FaucetService, FeePolicy, Ledger,
    LedgerError, TransferBuilder, TransferError,
};
use drip_storage::SledDB;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

const TEST_ADDR1: &str = "0xFFcf8FDEE72ac11b5c542428B35EEF5769C409f0";
const TEST_ADDR2: &str = "0x22d491Bde2303f2f43325b2108D26f1eAbA1e32b";
const FAUCET_KEY: &str = "4f3edf983ac636a65a842ce7c78d9aa706d3b113bce9c46f30d7d21715b23b1d";

/// In-memory chain: hands out sequential nonces and accepts every transaction
/// unless told otherwise.
#[derive(Default)]
struct MockChain {
    next_nonce: AtomicU64,
    handed_out: Mutex<Vec<u64>>,
    sent: Mutex<Vec<Vec<u8>>>,
    reject_sends: AtomicBool,
    offline: AtomicBool,
    /// Stall before answering the nonce query (ms)
    nonce_delay_ms: AtomicU64,
    /// Stall after accepting a transaction (ms)
    send_delay_ms: AtomicU64,
}

impl MockChain {
    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn check_online(&self) -> RpcResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn chain_id(&self) -> RpcResult<u64> {
        Ok(314159)
    }

    async fn pending_nonce(&self, _address: &Address) -> RpcResult<u64> {
        self.check_online()?;
        let delay = self.nonce_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let nonce = self.next_nonce.load(Ordering::SeqCst);
        self.handed_out.lock().unwrap().push(nonce);
        Ok(nonce)
    }

    async fn suggest_gas_tip_cap(&self) -> RpcResult<u128> {
        Ok(100_000)
    }

    async fn suggest_gas_price(&self) -> RpcResult<u128> {
        Ok(1_000_000_000)
    }

    async fn latest_block(&self) -> RpcResult<BlockHeader> {
        self.check_online()?;
        Ok(BlockHeader {
            number: 100,
            base_fee_per_gas: Some(100),
            timestamp: 1_700_000_000,
        })
    }

    async fn estimate_gas(&self, _call: &CallRequest) -> RpcResult<u64> {
        Ok(1_500_000)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> RpcResult<Hash> {
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(RpcError::Node {
                code: -32000,
                message: "insufficient funds for gas * price + value".to_string(),
            });
        }
        // yield so concurrent callers get a chance to interleave
        tokio::task::yield_now().await;
        self.sent.lock().unwrap().push(raw.to_vec());
        self.next_nonce.fetch_add(1, Ordering::SeqCst);
        let delay = self.send_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(Hash::keccak(raw))
    }
}

/// Sled store whose reads or batch writes can be made to fail.
struct FlakyStore {
    inner: SledDB,
    fail_reads: AtomicBool,
    fail_batches: AtomicBool,
}

#[async_trait]
impl DBInterface for FlakyStore {
    async fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("Input/output error");
        }
        self.inner.get(key).await
    }

    async fn insert(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.inner.insert(key, value).await
    }

    async fn batch_insert(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> anyhow::Result<()> {
        if self.fail_batches.load(Ordering::SeqCst) {
            anyhow::bail!("No space left on device");
        }
        self.inner.batch_insert(keys, values).await
    }
}

struct Harness {
    store: Arc<FlakyStore>,
    chain: Arc<MockChain>,
    ledger: Ledger,
    faucet: Arc<FaucetService>,
    app: Router,
}

fn harness(total_cap: u64, address_cap: u64) -> Harness {
    harness_with_timeout(total_cap, address_cap, Duration::from_secs(5))
}

fn harness_with_timeout(total_cap: u64, address_cap: u64, transfer_timeout: Duration) -> Harness {
    init_test_logging();

    let store = Arc::new(FlakyStore {
        inner: SledDB::temporary().unwrap(),
        fail_reads: AtomicBool::new(false),
        fail_batches: AtomicBool::new(false),
    });
    let chain = Arc::new(MockChain::default());
    let ledger = Ledger::new(store.clone());

    let account = Arc::new(SigningAccount::from_private_key_hex(FAUCET_KEY).unwrap());
    let transfers = TransferBuilder::new(chain.clone(), account, 314159, FeePolicy::default());
    let policy = CapPolicy {
        total_cap,
        address_cap,
        disbursement: 10,
    };
    let faucet = Arc::new(FaucetService::new(
        ledger.clone(),
        transfers,
        policy,
        transfer_timeout,
    ));

    let state = AppState {
        faucet: faucet.clone(),
        chain: chain.clone(),
        build: "test".to_string(),
    };
    let app = router(state, &["*".to_string()]);

    Harness {
        store,
        chain,
        ledger,
        faucet,
        app,
    }
}

fn addr(s: &str) -> Address {
    Address::from_hex(s).unwrap()
}

async fn post_fund(app: &Router, body: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri("/fund")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn raw_counters(store: &FlakyStore, address: &Address) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    (
        store.get(&address_counter_key(address)).await.unwrap(),
        store.get(GLOBAL_COUNTER_KEY).await.unwrap(),
    )
}

#[tokio::test]
async fn test_fund_returns_created() {
    let h = harness(1000, 20);

    let (status, body) = post_fund(&h.app, &format!(r#"{{"address":"{}"}}"#, TEST_ADDR1)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.is_empty());
    assert_eq!(h.chain.sent_count(), 1);

    let address_counter = h.ledger.address_counter(&addr(TEST_ADDR1)).await.unwrap().resolve();
    let global_counter = h.ledger.global_counter().await.unwrap().resolve();
    assert_eq!(address_counter.amount, 10);
    assert_eq!(global_counter.amount, 10);
    assert!(!address_counter.is_unset());
}

#[tokio::test]
async fn test_filecoin_recipient_is_converted() {
    let h = harness(1000, 20);

    let (status, _) = post_fund(
        &h.app,
        r#"{"address":"t410f77hy7xxhflarwxcuequlgxxpk5u4icpqb4cl5ha"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let counter = h.ledger.address_counter(&addr(TEST_ADDR1)).await.unwrap().resolve();
    assert_eq!(counter.amount, 10);
}

#[tokio::test]
async fn test_bad_requests_are_rejected() {
    let h = harness(1000, 20);

    let (status, body) = post_fund(&h.app, r#"{"address":""}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "INVALID_ADDRESS");

    let (status, _) = post_fund(&h.app, r#"{"address":"0x1234"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_fund(&h.app, "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "INVALID_REQUEST");

    assert_eq!(h.chain.sent_count(), 0);
    assert_eq!(h.ledger.global_counter().await.unwrap().resolve().amount, 0);
}

#[tokio::test]
async fn test_address_cap_reached_on_third_request() {
    let h = harness(1000, 20);
    let target = addr(TEST_ADDR1);

    h.faucet.fund_address(target).await.unwrap();
    let second = h.faucet.fund_address(target).await.unwrap();
    assert_eq!(second.address_total, 20);

    let err = h.faucet.fund_address(target).await.unwrap_err();
    assert!(matches!(err, FaucetError::CapExceeded(CapExceeded::Address)));
    assert_eq!(
        err.to_string(),
        "transaction exceeds daily allowed funds per address"
    );

    assert_eq!(h.chain.sent_count(), 2);
    assert_eq!(h.ledger.global_counter().await.unwrap().resolve().amount, 20);

    // the HTTP surface reports the rejection as a server error
    let (status, body) = post_fund(&h.app, &format!(r#"{{"address":"{}"}}"#, TEST_ADDR1)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "ADDRESS_CAP_EXCEEDED");
    assert!(body["timestamp"].is_string());

    // another address is still served
    h.faucet.fund_address(addr(TEST_ADDR2)).await.unwrap();
    assert_eq!(h.ledger.global_counter().await.unwrap().resolve().amount, 30);
}

#[tokio::test]
async fn test_total_cap_checked_first() {
    let h = harness(1000, 20);
    let exhausted = Counter {
        amount: 1000,
        window_start: Utc::now() - ChronoDuration::hours(1),
    };
    h.ledger.put_global_counter(&exhausted).await.unwrap();

    let err = h.faucet.fund_address(addr(TEST_ADDR2)).await.unwrap_err();
    assert!(matches!(err, FaucetError::CapExceeded(CapExceeded::Total)));
    assert_eq!(err.to_string(), "transaction exceeds total allowed funds per day");
    assert_eq!(h.chain.sent_count(), 0);

    // rejection persists nothing for the address
    assert_eq!(
        h.store.get(&address_counter_key(&addr(TEST_ADDR2))).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_failed_submission_leaves_counters_untouched() {
    let h = harness(1000, 20);
    let target = addr(TEST_ADDR1);
    h.faucet.fund_address(target).await.unwrap();

    let before = raw_counters(&h.store, &target).await;
    h.chain.reject_sends.store(true, Ordering::SeqCst);

    let err = h.faucet.fund_address(target).await.unwrap_err();
    assert!(matches!(
        err,
        FaucetError::Transfer(TransferError::Submission { .. })
    ));
    assert!(err.to_string().starts_with("fail to send tx"));

    assert_eq!(raw_counters(&h.store, &target).await, before);
}

#[tokio::test]
async fn test_unreachable_chain_leaves_counters_untouched() {
    let h = harness(1000, 20);
    let target = addr(TEST_ADDR1);
    h.chain.offline.store(true, Ordering::SeqCst);

    let (status, body) = post_fund(&h.app, &format!(r#"{{"address":"{}"}}"#, TEST_ADDR1)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "TRANSFER_FAILED");

    assert_eq!(raw_counters(&h.store, &target).await, (None, None));
}

#[tokio::test]
async fn test_failed_commit_reports_partial_commit() {
    let h = harness(1000, 20);
    let target = addr(TEST_ADDR1);
    h.store.fail_batches.store(true, Ordering::SeqCst);

    let err = h.faucet.fund_address(target).await.unwrap_err();
    match &err {
        FaucetError::PartialCommit { address, tx_hash, .. } => {
            assert_eq!(*address, target);
            let sent = h.chain.sent.lock().unwrap();
            assert_eq!(*tx_hash, Hash::keccak(&sent[0]));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.code(), "PARTIAL_COMMIT");

    // neither counter was written
    assert_eq!(raw_counters(&h.store, &target).await, (None, None));
}

#[tokio::test]
async fn test_expired_window_resets() {
    let h = harness(1000, 20);
    let target = addr(TEST_ADDR1);
    let stale = Counter {
        amount: 20,
        window_start: Utc::now() - ChronoDuration::hours(25),
    };
    h.ledger.put_address_counter(&target, &stale).await.unwrap();
    h.ledger.put_global_counter(&Counter { amount: 1000, ..stale }).await.unwrap();

    let before = Utc::now();
    let disbursement = h.faucet.fund_address(target).await.unwrap();
    assert_eq!(disbursement.address_total, 10);
    assert_eq!(disbursement.global_total, 10);

    let counter = h.ledger.address_counter(&target).await.unwrap().resolve();
    assert_eq!(counter.amount, 10);
    assert!(counter.window_start >= before);
}

#[tokio::test]
async fn test_window_start_kept_within_window() {
    let h = harness(1000, 30);
    let target = addr(TEST_ADDR1);

    h.faucet.fund_address(target).await.unwrap();
    let first = h.ledger.address_counter(&target).await.unwrap().resolve();
    h.faucet.fund_address(target).await.unwrap();
    let second = h.ledger.address_counter(&target).await.unwrap().resolve();

    assert_eq!(second.amount, 20);
    assert_eq!(second.window_start, first.window_start);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_respect_address_cap() {
    let h = harness(1000, 30);
    let target = addr(TEST_ADDR1);

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let faucet = h.faucet.clone();
            tokio::spawn(async move { faucet.fund_address(target).await })
        })
        .collect();

    let mut successes = 0;
    let mut rejections = 0;
    for result in futures::future::join_all(tasks).await {
        match result.unwrap() {
            Ok(_) => successes += 1,
            Err(FaucetError::CapExceeded(CapExceeded::Address)) => rejections += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(successes, 3);
    assert_eq!(rejections, 7);
    assert_eq!(h.chain.sent_count(), 3);
    assert_eq!(h.ledger.address_counter(&target).await.unwrap().resolve().amount, 30);
    assert_eq!(h.ledger.global_counter().await.unwrap().resolve().amount, 30);

    let nonces = h.chain.handed_out.lock().unwrap().clone();
    let unique: HashSet<u64> = nonces.iter().copied().collect();
    assert_eq!(unique.len(), nonces.len());
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = harness(1000, 20);

    let (status, body) = get(&h.app, "/liveness").await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["n"], 100);
    assert_eq!(body["build"], "test");
    assert!(body["host"].is_string());

    let (status, body) = get(&h.app, "/readiness").await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");

    h.chain.offline.store(true, Ordering::SeqCst);
    let (status, _) = get(&h.app, "/liveness").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let (status, body) = get(&h.app, "/readiness").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "CHAIN_UNAVAILABLE");
}

#[tokio::test]
async fn test_slow_chain_times_out_before_submission() {
    let h = harness_with_timeout(1000, 20, Duration::from_millis(200));
    let target = addr(TEST_ADDR1);
    h.chain.nonce_delay_ms.store(3_000, Ordering::SeqCst);

    let err = h.faucet.fund_address(target).await.unwrap_err();
    assert!(matches!(err, FaucetError::Transfer(TransferError::Timeout(_))));
    assert_eq!(err.code(), "TRANSFER_FAILED");

    assert_eq!(h.chain.sent_count(), 0);
    assert_eq!(raw_counters(&h.store, &target).await, (None, None));
}

#[tokio::test]
async fn test_stalled_submission_is_charged_and_reported() {
    let h = harness_with_timeout(1000, 20, Duration::from_millis(200));
    let target = addr(TEST_ADDR1);
    h.chain.send_delay_ms.store(3_000, Ordering::SeqCst);

    let err = h.faucet.fund_address(target).await.unwrap_err();
    match &err {
        FaucetError::SubmissionUnconfirmed { address, tx_hash } => {
            assert_eq!(*address, target);
            let sent = h.chain.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(*tx_hash, Hash::keccak(&sent[0]));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.code(), "SUBMISSION_UNCONFIRMED");

    // the node may hold the tx, so the caps count it
    let address_counter = h.ledger.address_counter(&target).await.unwrap().resolve();
    assert_eq!(address_counter.amount, 10);
    assert_eq!(h.ledger.global_counter().await.unwrap().resolve().amount, 10);

    // a retry cannot push the address past its cap
    h.chain.send_delay_ms.store(0, Ordering::SeqCst);
    h.faucet.fund_address(target).await.unwrap();
    let err = h.faucet.fund_address(target).await.unwrap_err();
    assert!(matches!(err, FaucetError::CapExceeded(CapExceeded::Address)));
    assert_eq!(h.chain.sent_count(), 2);
}

#[tokio::test]
async fn test_ledger_read_failure_sends_nothing() {
    let h = harness(1000, 20);
    h.store.fail_reads.store(true, Ordering::SeqCst);

    let err = h.faucet.fund_address(addr(TEST_ADDR1)).await.unwrap_err();
    assert!(matches!(err, FaucetError::Ledger(LedgerError::Read { .. })));
    assert_eq!(err.code(), "LEDGER_ERROR");
    assert_eq!(h.chain.sent_count(), 0);
    assert!(h.chain.handed_out.lock().unwrap().is_empty());

    let (status, body) = post_fund(&h.app, &format!(r#"{{"address":"{}"}}"#, TEST_ADDR1)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "LEDGER_ERROR");

    h.store.fail_reads.store(false, Ordering::SeqCst);
    assert_eq!(
        h.ledger.address_counter(&addr(TEST_ADDR1)).await.unwrap(),
        CounterRecord::Absent
    );
}
