// Node Service
// Wires store, chain, link, swarm node and gossip together

use crate::config::NodeConfig;
use crate::keys;
use anyhow::Context;
use kolibri_chain::{Chain, ChainLink, ChainPolicy, LinkConfig, SharedChainLink};
use kolibri_core::crypto::KeyPair;
use kolibri_core::ProgramId;
use kolibri_fkv::{EntryType, Fkv, PersistenceConfig};
use kolibri_swarm::gossip::{GossipNetwork, Transport};
use kolibri_swarm::node::{NodeOptions, SwarmNode};
use kolibri_swarm::{Frame, ProgramOfferPayload};
use kolibri_vm::{Trace, Vm, VmLimits};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A running Kolibri node
pub struct KolibriNode {
    config: NodeConfig,
    fkv: Arc<Fkv>,
    chain: Arc<Chain>,
    link: Arc<ChainLink>,
    swarm: Arc<SwarmNode>,
    gossip: Arc<GossipNetwork>,
}

impl KolibriNode {
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let persistence = PersistenceConfig::new(config.wal_path(), config.snapshot_dir())
            .with_interval(config.persistence.snapshot_interval);
        let fkv = Arc::new(
            Fkv::open(persistence).context("opening the persistent store")?,
        );
        fkv.set_top_k(config.fkv.top_k);
        info!(sequence = fkv.current_sequence(), "store recovered");

        let chain = Arc::new(Chain::with_policy(ChainPolicy {
            min_pou_threshold: config.chain.min_pou_threshold,
            max_mdl_delta: config.chain.max_mdl_delta,
        }));

        let link_config = match (
            &config.swarm.ed25519_public_key_path,
            &config.swarm.hmac_key_path,
        ) {
            (Some(public_key_path), Some(hmac_key_path)) => LinkConfig {
                public_key: keys::load_public_key(public_key_path)?,
                hmac_key: keys::load_hmac_key(hmac_key_path)?,
            },
            _ => {
                // No configured keys: run with an ephemeral keypair, which
                // admits only offers this process signs itself
                warn!("swarm key paths not configured, using an ephemeral keypair");
                let ephemeral = KeyPair::generate();
                LinkConfig {
                    public_key: ephemeral.public_key(),
                    hmac_key: ephemeral.public_key().as_bytes().to_vec(),
                }
            }
        };
        let link = Arc::new(ChainLink::new(Arc::clone(&chain), link_config));

        let swarm = Arc::new(SwarmNode::with_handler(
            NodeOptions::new(config.node_id, config.swarm.version, config.swarm.services),
            Some(Box::new(SharedChainLink(Arc::clone(&link)))),
        ));

        let gossip = Arc::new(GossipNetwork::new());
        gossip
            .add_peer(Arc::clone(&swarm))
            .context("registering self in the gossip address book")?;

        Ok(KolibriNode {
            config,
            fkv,
            chain,
            link,
            swarm,
            gossip,
        })
    }

    pub fn start(&self) {
        self.swarm.start();
        info!(node_id = %self.config.node_id, "swarm node started");
    }

    /// Drain one outbound frame, if any arrives within `timeout_ms`.
    pub fn pump_once(&self, timeout_ms: u64) -> Option<Frame> {
        let outbound = self.swarm.poll_outbound(timeout_ms)?;
        debug!(peer = %outbound.peer_id, frame = ?outbound.frame.frame_type(),
               "outbound frame");
        Some(outbound.frame)
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        self.swarm.stop();
        self.fkv
            .force_checkpoint()
            .context("final checkpoint on shutdown")?;
        self.fkv
            .save_base_snapshot()
            .context("writing base snapshot on shutdown")?;
        info!("node stopped");
        Ok(())
    }

    /// Compile and evaluate an expression, store the program under its
    /// id, and announce it to the swarm as a PROGRAM_OFFER.
    pub fn publish_program(
        &self,
        program_id: ProgramId,
        expression: &str,
    ) -> anyhow::Result<ProgramOfferPayload> {
        let code = kolibri_vm::compile_expression(expression)?;
        let mut vm = self.new_vm();
        let evaluation =
            kolibri_vm::evaluate_expression(&mut vm, expression, Some(self.fkv.as_ref()))?;

        let key: Vec<u8> = program_id.as_bytes().iter().map(|&b| b - b'0').collect();
        self.fkv
            .put(&key, &code, EntryType::Program)
            .context("storing program bytecode")?;

        let offer = ProgramOfferPayload {
            program_id,
            poe_milli: (evaluation.poe * 1000.0).round() as u16,
            mdl_score: (evaluation.mdl * 1000.0).round() as u16,
            gas_used: evaluation.result.steps,
        };
        let delivered = self
            .gossip
            .broadcast(
                &self.config.node_id,
                &Frame::ProgramOffer(offer.clone()),
                Transport::Udp,
            )
            .context("broadcasting program offer")?;
        info!(program = %offer.program_id, poe_milli = offer.poe_milli, delivered,
              "program published");
        Ok(offer)
    }

    /// Export every entry under `prefix` as a replication delta and
    /// broadcast it.
    pub fn publish_delta(&self, prefix: &[u8]) -> anyhow::Result<Frame> {
        let frame = kolibri_fkv::build_delta(self.fkv.as_ref(), prefix)
            .context("building replication delta")?;
        let delivered = self
            .gossip
            .broadcast(&self.config.node_id, &frame, Transport::Udp)
            .context("broadcasting replication delta")?;
        debug!(delivered, "replication delta published");
        Ok(frame)
    }

    pub fn vm_limits(&self) -> VmLimits {
        VmLimits::new(self.config.vm.max_steps, self.config.vm.max_stack)
    }

    pub fn new_vm(&self) -> Vm {
        Vm::new()
    }

    /// A trace ring sized by `vm.trace_depth`.
    pub fn new_trace(&self) -> Trace {
        Trace::new(self.config.vm.trace_depth as usize)
    }

    pub fn fkv(&self) -> &Arc<Fkv> {
        &self.fkv
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn link(&self) -> &Arc<ChainLink> {
        &self.link
    }

    pub fn swarm(&self) -> &Arc<SwarmNode> {
        &self.swarm
    }

    pub fn gossip(&self) -> &Arc<GossipNetwork> {
        &self.gossip
    }
}
