//! End-to-end quote flow: source, signer, and verifier working together.

use std::sync::Arc;

use stopquote::config::OracleConfig;
use stopquote::crypto;
use stopquote::fetch::SimulatedFetcher;
use stopquote::oracle::PriceOracle;
use stopquote::quote::{verify_quote, QuoteSigner};
use stopquote::sim::{PriceGenConfig, PriceSimulator};

const START: u64 = 1_700_000_000;

fn signer() -> QuoteSigner {
    QuoteSigner::new(b"integration-hmac-secret".to_vec(), [0x42u8; 32]).unwrap()
}

fn simulator() -> PriceSimulator {
    PriceSimulator::new(PriceGenConfig {
        initial_stamp: START,
        ..PriceGenConfig::default()
    })
    .unwrap()
}

/// Oracle over an in-memory store, seeded with a known descending window.
fn seeded_oracle(points: &[(u64, u64)]) -> PriceOracle {
    let config = OracleConfig::for_tests();
    let fetcher = Arc::new(SimulatedFetcher::new(simulator(), config.price_ival));
    let oracle = PriceOracle::open_memory(config, fetcher).unwrap();
    for &(price, stamp) in points {
        oracle.store().insert(price, stamp).unwrap();
    }
    oracle
}

#[tokio::test]
async fn test_simulator_backed_quote_roundtrip() {
    let signer = signer();
    let sim = simulator();

    // Threshold below the simulator's price floor: the quote stays active
    // and the key stays hidden.
    let quote = signer
        .issue_quote(&sim, 1_000, START + 300, Some(START + 86_400))
        .await
        .unwrap();
    assert!(!quote.is_expired);
    assert_eq!(quote.thold_key, None);
    verify_quote(&quote).unwrap();

    // Threshold above the ceiling: crossed on the first step after start,
    // key revealed and consistent with the commitment.
    let quote = signer
        .issue_quote(&sim, 1_000_000, START + 300, Some(START + 86_400))
        .await
        .unwrap();
    assert!(quote.is_expired);
    let key = hex::decode(quote.thold_key.as_ref().unwrap()).unwrap();
    assert_eq!(hex::encode(crypto::hash160(&key)), quote.thold_hash);
    verify_quote(&quote).unwrap();
}

#[tokio::test]
async fn test_store_backed_quote_reports_crossing() {
    let oracle = seeded_oracle(&[
        (50_000, START),
        (47_000, START + 300),
        (44_000, START + 600),
        (46_000, START + 900),
    ]);
    let signer = signer();

    let quote = signer
        .issue_quote(&oracle, 45_000, START, Some(START + 900))
        .await
        .unwrap();

    assert_eq!(quote.quote_price, 50_000);
    assert_eq!(quote.quote_stamp, START);
    assert_eq!(quote.curr_price, 46_000);
    assert!(quote.is_expired);
    // Earliest stored sample strictly below the threshold.
    assert_eq!(quote.stop_price, Some(44_000));
    assert_eq!(quote.stop_stamp, Some(START + 600));
    verify_quote(&quote).unwrap();
}

#[tokio::test]
async fn test_store_backed_quote_stays_active_above_threshold() {
    let oracle = seeded_oracle(&[
        (50_000, START),
        (49_000, START + 300),
        (51_000, START + 600),
    ]);
    let signer = signer();

    let quote = signer
        .issue_quote(&oracle, 45_000, START, Some(START + 600))
        .await
        .unwrap();

    assert!(!quote.is_expired);
    assert_eq!(quote.stop_price, None);
    assert_eq!(quote.thold_key, None);
    verify_quote(&quote).unwrap();
}

#[tokio::test]
async fn test_repeated_quotes_share_commitment_until_expiry() {
    let oracle = seeded_oracle(&[
        (50_000, START),
        (49_000, START + 300),
        (44_000, START + 600),
    ]);
    let signer = signer();

    // Two active quotes over different close stamps commit to the same key,
    // since the derivation depends only on the start point and threshold.
    let first = signer
        .issue_quote(&oracle, 45_000, START, Some(START + 300))
        .await
        .unwrap();
    let second = signer
        .issue_quote(&oracle, 45_000, START, Some(START + 300))
        .await
        .unwrap();
    assert_eq!(first.thold_hash, second.thold_hash);
    assert!(!first.is_expired);

    // Once the window covers the crossing, the revealed key matches the
    // commitment published while the quote was still active.
    let expired = signer
        .issue_quote(&oracle, 45_000, START, Some(START + 600))
        .await
        .unwrap();
    assert!(expired.is_expired);
    assert_eq!(expired.thold_hash, first.thold_hash);
    let key = hex::decode(expired.thold_key.as_ref().unwrap()).unwrap();
    assert_eq!(hex::encode(crypto::hash160(&key)), first.thold_hash);
    verify_quote(&expired).unwrap();
}

#[tokio::test]
async fn test_tampered_quote_fails_verification() {
    let signer = signer();
    let sim = simulator();

    let quote = signer
        .issue_quote(&sim, 1_000, START + 300, Some(START + 3_600))
        .await
        .unwrap();

    let mut tampered = quote.clone();
    tampered.stop_price = Some(1);
    tampered.stop_stamp = Some(START + 600);
    assert!(verify_quote(&tampered).is_err());

    // Corrupt the DER header byte of the signature.
    let mut tampered = quote.clone();
    tampered.req_sig = format!("00{}", &quote.req_sig[2..]);
    assert!(verify_quote(&tampered).is_err());
}
