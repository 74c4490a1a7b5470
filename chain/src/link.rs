// Chain <-> Swarm Link
// Block offers arriving over the swarm are admitted only when their
// Ed25519 signature and HMAC tag check out against the staged block spec

use crate::block::Formula;
use crate::chain::{BlockSpec, Chain};
use kolibri_core::crypto::{hmac_sha256_verify, Ed25519Signature, PublicKey};
use kolibri_core::{BlockId, NodeId};
use kolibri_swarm::codec::BlockOfferPayload;
use kolibri_swarm::node::{BlockOfferHandler, BlockValidation};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Verification material for the link
#[derive(Clone, Debug)]
pub struct LinkConfig {
    pub public_key: PublicKey,
    pub hmac_key: Vec<u8>,
}

/// Out-of-band block content staged ahead of the BLOCK_OFFER frame
#[derive(Clone, Debug)]
pub struct StagedOffer {
    pub formulas: Vec<Formula>,
    pub prev_hash: Option<String>,
    pub signature: Ed25519Signature,
    pub hmac_tag: [u8; 32],
}

/// Verifies signed block offers and feeds accepted ones to the chain.
pub struct ChainLink {
    chain: Arc<Chain>,
    config: LinkConfig,
    staged: Mutex<HashMap<BlockId, StagedOffer>>,
}

impl ChainLink {
    pub fn new(chain: Arc<Chain>, config: LinkConfig) -> Self {
        ChainLink {
            chain,
            config,
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// Deposit the block spec and its authentication material under the
    /// offer's block id. The next BLOCK_OFFER frame with this id consumes
    /// it.
    pub fn stage_offer(&self, block_id: BlockId, offer: StagedOffer) {
        if let Ok(mut staged) = self.staged.lock() {
            staged.insert(block_id, offer);
        }
    }

    /// The string both the signature and the HMAC must cover.
    pub fn canonical_message(offer: &BlockOfferPayload) -> String {
        format!(
            "{}|{}|{}|{}",
            offer.block_id, offer.height, offer.poe_milli, offer.program_count
        )
    }

    fn admit(&self, offer: &BlockOfferPayload) -> BlockValidation {
        let staged = match self
            .staged
            .lock()
            .ok()
            .and_then(|mut staged| staged.remove(&offer.block_id))
        {
            Some(staged) => staged,
            None => {
                warn!(block = %offer.block_id, "no staged spec for block offer");
                return BlockValidation::Rejected;
            }
        };

        let message = Self::canonical_message(offer);
        if !self
            .config
            .public_key
            .verify(message.as_bytes(), &staged.signature)
        {
            warn!(block = %offer.block_id, "block offer signature invalid");
            return BlockValidation::Rejected;
        }
        if !hmac_sha256_verify(&self.config.hmac_key, message.as_bytes(), &staged.hmac_tag) {
            warn!(block = %offer.block_id, "block offer HMAC invalid");
            return BlockValidation::Rejected;
        }

        let spec = BlockSpec {
            formulas: staged.formulas,
            prev_hash: staged.prev_hash,
        };
        match self.chain.add_block(spec) {
            Ok(handle) => {
                debug!(block = %offer.block_id, hash = %handle.hash, "block offer admitted");
                BlockValidation::Accepted
            }
            Err(error) => {
                warn!(block = %offer.block_id, %error, "chain rejected block offer");
                BlockValidation::Rejected
            }
        }
    }
}

impl BlockOfferHandler for ChainLink {
    fn on_block_offer(&self, _peer_id: &NodeId, offer: &BlockOfferPayload) -> BlockValidation {
        self.admit(offer)
    }
}

/// Wraps a shared `ChainLink` so it can be handed to a swarm node as a
/// `Box<dyn BlockOfferHandler>` (the orphan rules don't allow implementing
/// the foreign `BlockOfferHandler` trait directly on `Arc<ChainLink>`).
pub struct SharedChainLink(pub Arc<ChainLink>);

impl BlockOfferHandler for SharedChainLink {
    fn on_block_offer(&self, peer_id: &NodeId, offer: &BlockOfferPayload) -> BlockValidation {
        self.0.as_ref().on_block_offer(peer_id, offer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainPolicy;
    use kolibri_core::crypto::{hmac_sha256, KeyPair};

    const HMAC_KEY: &[u8] = b"kolibri-link-test-key";

    fn setup() -> (Arc<Chain>, ChainLink, KeyPair) {
        let keys = KeyPair::generate();
        let chain = Arc::new(Chain::with_policy(ChainPolicy {
            min_pou_threshold: 0.5,
            max_mdl_delta: None,
        }));
        let link = ChainLink::new(
            Arc::clone(&chain),
            LinkConfig {
                public_key: keys.public_key(),
                hmac_key: HMAC_KEY.to_vec(),
            },
        );
        (chain, link, keys)
    }

    fn offer(block_id: &str) -> BlockOfferPayload {
        BlockOfferPayload {
            block_id: BlockId::parse(block_id).unwrap(),
            height: 1,
            poe_milli: 900,
            program_count: 1,
        }
    }

    fn signed(keys: &KeyPair, offer: &BlockOfferPayload) -> StagedOffer {
        let message = ChainLink::canonical_message(offer);
        StagedOffer {
            formulas: vec![Formula::text("f", 0.9, "x")],
            prev_hash: None,
            signature: keys.sign(message.as_bytes()),
            hmac_tag: hmac_sha256(HMAC_KEY, message.as_bytes()),
        }
    }

    #[test]
    fn test_valid_offer_is_admitted() {
        let (chain, link, keys) = setup();
        let offer = offer("0000000000000001");
        link.stage_offer(offer.block_id, signed(&keys, &offer));

        let peer = NodeId::zero();
        assert_eq!(
            link.on_block_offer(&peer, &offer),
            BlockValidation::Accepted
        );
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_bad_signature_is_rejected() {
        let (chain, link, keys) = setup();
        let offer = offer("0000000000000002");
        let mut staged = signed(&keys, &offer);
        staged.signature = keys.sign(b"something else entirely");
        link.stage_offer(offer.block_id, staged);

        assert_eq!(
            link.on_block_offer(&NodeId::zero(), &offer),
            BlockValidation::Rejected
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn test_bad_hmac_is_rejected() {
        let (chain, link, keys) = setup();
        let offer = offer("0000000000000003");
        let mut staged = signed(&keys, &offer);
        staged.hmac_tag = hmac_sha256(b"wrong key", b"wrong message");
        link.stage_offer(offer.block_id, staged);

        assert_eq!(
            link.on_block_offer(&NodeId::zero(), &offer),
            BlockValidation::Rejected
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn test_unstaged_offer_is_rejected() {
        let (chain, link, _) = setup();
        assert_eq!(
            link.on_block_offer(&NodeId::zero(), &offer("0000000000000004")),
            BlockValidation::Rejected
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn test_policy_failure_surfaces_as_rejection() {
        let (chain, link, keys) = setup();
        let offer = offer("0000000000000005");
        let mut staged = signed(&keys, &offer);
        staged.formulas = vec![Formula::text("weak", 0.1, "x")];
        link.stage_offer(offer.block_id, staged);

        assert_eq!(
            link.on_block_offer(&NodeId::zero(), &offer),
            BlockValidation::Rejected
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn test_offers_are_consumed_once() {
        let (_, link, keys) = setup();
        let offer = offer("0000000000000006");
        link.stage_offer(offer.block_id, signed(&keys, &offer));
        assert_eq!(
            link.on_block_offer(&NodeId::zero(), &offer),
            BlockValidation::Accepted
        );
        // Replayed frame finds nothing staged
        assert_eq!(
            link.on_block_offer(&NodeId::zero(), &offer),
            BlockValidation::Rejected
        );
    }
}
