//! Commitment/reveal quote protocol.
//!
//! Each quote commits to a per-request threshold key derived with HMAC-SHA256
//! from the query triple (start price, start stamp, threshold). The key is
//! published as a hash160 commitment while the quote is active, and revealed
//! once the threshold has been crossed. The whole quote is bound to the
//! oracle's identity by an ECDSA signature over a canonical request digest.

use serde_json::json;
use tracing::{debug, info};

use crate::config::OracleConfig;
use crate::crypto;
use crate::error::{OracleError, Result};
use crate::models::{now, Quote, StopPriceData, StopPriceQuery, StopPriceSource};

/// Domain separation label for key derivation and request digests.
pub const QUOTE_DOMAIN: &str = "exchange/quote";

/// Holds the oracle's secrets and issues signed quotes. Secrets never leave
/// this struct except as the threshold-key reveal of an expired quote.
pub struct QuoteSigner {
    hmac_secret: Vec<u8>,
    sign_secret: [u8; 32],
    oracle_pk: String,
}

impl QuoteSigner {
    pub fn new(hmac_secret: Vec<u8>, sign_secret: [u8; 32]) -> Result<Self> {
        let oracle_pk = crypto::derive_pubkey(&sign_secret)?;
        info!(%oracle_pk, "quote signer initialized");
        Ok(Self {
            hmac_secret,
            sign_secret,
            oracle_pk,
        })
    }

    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        Self::new(config.hmac_secret.clone(), config.sign_secret)
    }

    /// The oracle's compressed public key, hex-encoded.
    pub fn oracle_pk(&self) -> &str {
        &self.oracle_pk
    }

    /// Issue a signed quote for a threshold watch over `[req_stamp, curr]`.
    ///
    /// The observation window is anchored at the smaller of the requested
    /// stamp and the current stamp, so an inverted request degenerates to a
    /// single-point window instead of failing.
    pub async fn issue_quote(
        &self,
        source: &dyn StopPriceSource,
        thold_price: u64,
        req_stamp: u64,
        curr_stamp: Option<u64>,
    ) -> Result<Quote> {
        let curr = curr_stamp.unwrap_or_else(now);
        let query = StopPriceQuery {
            start_stamp: req_stamp.min(curr),
            curr_stamp: Some(curr),
            thold_price,
        };
        let data = source.get_stop_price(&query).await?;

        let secret = self.threshold_key(data.start_price, data.start_stamp, thold_price)?;
        let thold_hash = hex::encode(crypto::hash160(&secret));

        let is_expired = data.stop_price.is_some();
        let thold_key = is_expired.then(|| hex::encode(secret));

        let req_id = request_digest(&self.oracle_pk, &data, &thold_hash, &thold_key, thold_price)?;
        let req_sig = crypto::sign_digest(&self.sign_secret, &req_id)?;

        debug!(
            thold_price,
            is_expired,
            req_id = %hex::encode(req_id),
            "quote issued"
        );

        Ok(Quote {
            oracle_pk: self.oracle_pk.clone(),
            curr_price: data.close_price,
            curr_stamp: data.close_stamp,
            quote_price: data.start_price,
            quote_stamp: data.start_stamp,
            stop_price: data.stop_price,
            stop_stamp: data.stop_stamp,
            thold_price,
            thold_hash,
            thold_key,
            is_expired,
            req_id: hex::encode(req_id),
            req_sig,
        })
    }

    /// Derive the per-request threshold key. Deterministic in the query
    /// triple, so repeated requests share one commitment.
    fn threshold_key(
        &self,
        start_price: u64,
        start_stamp: u64,
        thold_price: u64,
    ) -> Result<[u8; 32]> {
        crypto::hmac256(
            &self.hmac_secret,
            &[
                QUOTE_DOMAIN.as_bytes(),
                &be4(start_price),
                &be4(start_stamp),
                &be4(thold_price),
            ],
        )
    }
}

/// Verify a quote's internal consistency: the request digest matches its
/// fields, the signature checks against the embedded public key, and the
/// key reveal follows the expiry rules.
pub fn verify_quote(quote: &Quote) -> Result<()> {
    let data = StopPriceData {
        close_price: quote.curr_price,
        close_stamp: quote.curr_stamp,
        start_price: quote.quote_price,
        start_stamp: quote.quote_stamp,
        stop_price: quote.stop_price,
        stop_stamp: quote.stop_stamp,
    };
    let digest = request_digest(
        &quote.oracle_pk,
        &data,
        &quote.thold_hash,
        &quote.thold_key,
        quote.thold_price,
    )?;
    if hex::encode(digest) != quote.req_id {
        return Err(OracleError::Quote("request id does not match fields".into()));
    }

    if !crypto::verify_digest(&quote.oracle_pk, &digest, &quote.req_sig)? {
        return Err(OracleError::Quote("signature verification failed".into()));
    }

    if quote.is_expired != quote.stop_price.is_some() {
        return Err(OracleError::Quote(
            "expiry flag inconsistent with stop price".into(),
        ));
    }

    match &quote.thold_key {
        Some(key_hex) => {
            if !quote.is_expired {
                return Err(OracleError::Quote("key revealed on an active quote".into()));
            }
            let key =
                hex::decode(key_hex).map_err(|err| OracleError::Quote(err.to_string()))?;
            if hex::encode(crypto::hash160(&key)) != quote.thold_hash {
                return Err(OracleError::Quote(
                    "revealed key does not match commitment".into(),
                ));
            }
        }
        None => {
            if quote.is_expired {
                return Err(OracleError::Quote("expired quote is missing its key".into()));
            }
        }
    }

    Ok(())
}

/// Canonical request digest: SHA-256 over the compact JSON array of the
/// quote's commitment-relevant fields, in fixed order.
fn request_digest(
    oracle_pk: &str,
    data: &StopPriceData,
    thold_hash: &str,
    thold_key: &Option<String>,
    thold_price: u64,
) -> Result<[u8; 32]> {
    let preimage = json!([
        QUOTE_DOMAIN,
        oracle_pk,
        data.close_price,
        data.close_stamp,
        data.start_price,
        data.start_stamp,
        data.stop_price,
        data.stop_stamp,
        thold_hash,
        thold_key,
        thold_price,
    ]);
    let bytes =
        serde_json::to_vec(&preimage).map_err(|err| OracleError::Internal(err.to_string()))?;
    Ok(crypto::sha256(&bytes))
}

/// Big-endian 4-byte encoding of the low 32 bits.
fn be4(value: u64) -> [u8; 4] {
    (value as u32).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Source that replays a fixed answer.
    struct FixedSource {
        data: StopPriceData,
    }

    #[async_trait]
    impl StopPriceSource for FixedSource {
        async fn get_stop_price(&self, _query: &StopPriceQuery) -> Result<StopPriceData> {
            Ok(self.data)
        }
    }

    fn signer() -> QuoteSigner {
        QuoteSigner::new(b"test-hmac-secret".to_vec(), [0x42u8; 32]).unwrap()
    }

    fn active_source() -> FixedSource {
        FixedSource {
            data: StopPriceData {
                close_price: 48_000,
                close_stamp: 1_700_086_400,
                start_price: 50_000,
                start_stamp: 1_700_000_000,
                stop_price: None,
                stop_stamp: None,
            },
        }
    }

    fn expired_source() -> FixedSource {
        FixedSource {
            data: StopPriceData {
                close_price: 38_000,
                close_stamp: 1_700_086_400,
                start_price: 50_000,
                start_stamp: 1_700_000_000,
                stop_price: Some(39_500),
                stop_stamp: Some(1_700_040_000),
            },
        }
    }

    #[tokio::test]
    async fn test_active_quote_verifies_and_hides_key() {
        let signer = signer();
        let quote = signer
            .issue_quote(&active_source(), 40_000, 1_700_000_000, Some(1_700_086_400))
            .await
            .unwrap();

        assert!(!quote.is_expired);
        assert_eq!(quote.thold_key, None);
        assert_eq!(quote.quote_price, 50_000);
        assert_eq!(quote.curr_price, 48_000);
        verify_quote(&quote).unwrap();
    }

    #[tokio::test]
    async fn test_expired_quote_reveals_matching_key() {
        let signer = signer();
        let quote = signer
            .issue_quote(&expired_source(), 40_000, 1_700_000_000, Some(1_700_086_400))
            .await
            .unwrap();

        assert!(quote.is_expired);
        let key = hex::decode(quote.thold_key.as_ref().unwrap()).unwrap();
        assert_eq!(hex::encode(crypto::hash160(&key)), quote.thold_hash);
        verify_quote(&quote).unwrap();
    }

    #[tokio::test]
    async fn test_commitment_is_deterministic_per_triple() {
        let signer = signer();
        let a = signer
            .issue_quote(&active_source(), 40_000, 1_700_000_000, Some(1_700_086_400))
            .await
            .unwrap();
        let b = signer
            .issue_quote(&active_source(), 40_000, 1_700_000_000, Some(1_700_086_400))
            .await
            .unwrap();
        assert_eq!(a.thold_hash, b.thold_hash);

        // A different threshold derives a different commitment.
        let c = signer
            .issue_quote(&active_source(), 41_000, 1_700_000_000, Some(1_700_086_400))
            .await
            .unwrap();
        assert_ne!(a.thold_hash, c.thold_hash);
    }

    #[tokio::test]
    async fn test_field_mutation_breaks_verification() {
        let signer = signer();
        let quote = signer
            .issue_quote(&active_source(), 40_000, 1_700_000_000, Some(1_700_086_400))
            .await
            .unwrap();

        let mut tampered = quote.clone();
        tampered.curr_price += 1;
        assert!(verify_quote(&tampered).is_err());

        let mut tampered = quote.clone();
        tampered.thold_price -= 1;
        assert!(verify_quote(&tampered).is_err());

        let mut tampered = quote.clone();
        tampered.thold_hash = hex::encode([0u8; 20]);
        assert!(verify_quote(&tampered).is_err());
    }

    #[tokio::test]
    async fn test_premature_key_reveal_is_rejected() {
        let signer = signer();
        let expired = signer
            .issue_quote(&expired_source(), 40_000, 1_700_000_000, Some(1_700_086_400))
            .await
            .unwrap();

        // Graft the revealed key onto an active quote.
        let mut active = signer
            .issue_quote(&active_source(), 40_000, 1_700_000_000, Some(1_700_086_400))
            .await
            .unwrap();
        active.thold_key = expired.thold_key.clone();
        assert!(verify_quote(&active).is_err());

        // Strip the key from an expired quote.
        let mut stripped = expired.clone();
        stripped.thold_key = None;
        assert!(verify_quote(&stripped).is_err());
    }

    #[tokio::test]
    async fn test_inverted_request_window_degenerates() {
        let signer = signer();
        // req_stamp after curr_stamp: the query window collapses to curr.
        let quote = signer
            .issue_quote(&active_source(), 40_000, 1_700_086_400, Some(1_700_000_000))
            .await
            .unwrap();
        verify_quote(&quote).unwrap();
    }
}
