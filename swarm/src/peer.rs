// Peer Admission State
// Token buckets per frame type plus a clamped reputation score

use crate::codec::{FrameType, FRAME_TYPE_COUNT};

pub const REPUTATION_MAX: i32 = 1000;
pub const REPUTATION_MIN: i32 = 0;
pub const REPUTATION_START: i32 = 600;
pub const REPUTATION_BLOCK_THRESHOLD: i32 = 200;

const REWARD_CAP: u16 = 200;
const PENALTY_CAP: u16 = 400;
const RATE_LIMIT_PENALTY: u16 = 20;
const VIOLATION_PENALTY: u16 = 80;

/// (refill per second, burst capacity) per frame type
const RATE_CONFIG: [(f64, f64); FRAME_TYPE_COUNT] = [
    (0.1, 1.0), // HELLO: 1 every 10 seconds
    (1.0, 3.0), // PING: burst of 3, 1/s refill
    (0.5, 5.0), // PROGRAM_OFFER: up to 5, new token every 2 seconds
    (0.2, 2.0), // BLOCK_OFFER: 2 burst, 1 every 5 seconds
    (0.3, 3.0), // FKV_DELTA: 3 burst, ~1 every 3 seconds
];

/// Decision for an inbound frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcceptDecision {
    Accept,
    RateLimited,
    ReputationBlocked,
}

#[derive(Clone, Copy, Debug)]
pub struct TokenBucket {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_per_sec: f64,
    pub last_refill_ms: u64,
}

impl TokenBucket {
    fn new(refill_per_sec: f64, capacity: f64, now_ms: u64) -> Self {
        TokenBucket {
            tokens: capacity,
            capacity,
            refill_per_sec,
            last_refill_ms: now_ms,
        }
    }

    fn refill(&mut self, now_ms: u64) {
        if now_ms < self.last_refill_ms {
            // Clock rewound; re-anchor without minting tokens
            self.last_refill_ms = now_ms;
            return;
        }
        let delta_ms = now_ms - self.last_refill_ms;
        if delta_ms == 0 {
            return;
        }
        self.tokens += self.refill_per_sec * (delta_ms as f64 / 1000.0);
        if self.tokens > self.capacity {
            self.tokens = self.capacity;
        }
        self.last_refill_ms = now_ms;
    }

    fn try_consume(&mut self, now_ms: u64) -> bool {
        self.refill(now_ms);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return true;
        }
        false
    }
}

/// One bucket per frame type
#[derive(Clone, Debug)]
pub struct RateLimiter {
    buckets: [TokenBucket; FRAME_TYPE_COUNT],
}

impl RateLimiter {
    pub fn new(now_ms: u64) -> Self {
        let buckets = std::array::from_fn(|i| {
            let (refill, burst) = RATE_CONFIG[i];
            TokenBucket::new(refill, burst, now_ms)
        });
        RateLimiter { buckets }
    }

    pub fn allow(&mut self, frame_type: FrameType, now_ms: u64) -> bool {
        self.buckets[frame_type.index()].try_consume(now_ms)
    }

    pub fn bucket(&self, frame_type: FrameType) -> &TokenBucket {
        &self.buckets[frame_type.index()]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReputationClass {
    Trusted,
    Stable,
    Neutral,
    Suspect,
    Blocked,
}

impl ReputationClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ReputationClass::Trusted => "trusted",
            ReputationClass::Stable => "stable",
            ReputationClass::Neutral => "neutral",
            ReputationClass::Suspect => "suspect",
            ReputationClass::Blocked => "blocked",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Reputation {
    pub score: i32,
    pub infractions: u32,
    pub successes: u32,
    pub last_update_ms: u64,
}

impl Reputation {
    pub fn new() -> Self {
        Reputation {
            score: REPUTATION_START,
            infractions: 0,
            successes: 0,
            last_update_ms: 0,
        }
    }

    pub fn reward(&mut self, reward: u16) {
        let reward = reward.min(REWARD_CAP);
        self.score = (self.score + i32::from(reward)).min(REPUTATION_MAX);
        self.successes += 1;
    }

    pub fn penalize(&mut self, penalty: u16) {
        let penalty = penalty.min(PENALTY_CAP);
        self.score = (self.score - i32::from(penalty)).max(REPUTATION_MIN);
        self.infractions += 1;
    }

    pub fn class(&self) -> ReputationClass {
        if self.score >= 850 {
            ReputationClass::Trusted
        } else if self.score >= 600 {
            ReputationClass::Stable
        } else if self.score >= 400 {
            ReputationClass::Neutral
        } else if self.score >= REPUTATION_BLOCK_THRESHOLD {
            ReputationClass::Suspect
        } else {
            ReputationClass::Blocked
        }
    }
}

impl Default for Reputation {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_reward(frame_type: FrameType) -> u16 {
    match frame_type {
        FrameType::Hello => 10,
        FrameType::Ping => 5,
        FrameType::ProgramOffer => 25,
        FrameType::BlockOffer => 40,
        FrameType::FkvDelta => 15,
    }
}

/// Rate limiter + reputation for one peer
#[derive(Clone, Debug)]
pub struct PeerState {
    pub limiter: RateLimiter,
    pub reputation: Reputation,
}

impl PeerState {
    pub fn new(now_ms: u64) -> Self {
        PeerState {
            limiter: RateLimiter::new(now_ms),
            reputation: Reputation::new(),
        }
    }

    /// Gate an inbound frame: reputation first, then the token bucket.
    pub fn should_accept(&mut self, frame_type: FrameType, now_ms: u64) -> AcceptDecision {
        self.reputation.last_update_ms = now_ms;
        if self.reputation.score < REPUTATION_BLOCK_THRESHOLD {
            return AcceptDecision::ReputationBlocked;
        }
        if !self.limiter.allow(frame_type, now_ms) {
            self.reputation.penalize(RATE_LIMIT_PENALTY);
            return AcceptDecision::RateLimited;
        }
        AcceptDecision::Accept
    }

    pub fn report_success(&mut self, frame_type: FrameType) {
        self.reputation.reward(frame_reward(frame_type));
    }

    pub fn report_violation(&mut self) {
        self.reputation.penalize(VIOLATION_PENALTY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_burst_then_rate_limit() {
        let mut peer = PeerState::new(0);

        for _ in 0..3 {
            assert_eq!(
                peer.should_accept(FrameType::Ping, 0),
                AcceptDecision::Accept
            );
            peer.report_success(FrameType::Ping);
        }

        assert_eq!(
            peer.should_accept(FrameType::Ping, 0),
            AcceptDecision::RateLimited
        );
        assert!(peer.reputation.score < 600 + 3 * 5);

        // Tokens refill after five seconds
        assert_eq!(
            peer.should_accept(FrameType::Ping, 5000),
            AcceptDecision::Accept
        );
    }

    #[test]
    fn test_rate_limit_penalty_is_twenty() {
        let mut peer = PeerState::new(0);
        for _ in 0..3 {
            assert_eq!(
                peer.should_accept(FrameType::Ping, 0),
                AcceptDecision::Accept
            );
        }
        assert_eq!(peer.reputation.score, 600);
        assert_eq!(
            peer.should_accept(FrameType::Ping, 0),
            AcceptDecision::RateLimited
        );
        assert_eq!(peer.reputation.score, 580);
        assert_eq!(peer.reputation.infractions, 1);
    }

    #[test]
    fn test_violations_lead_to_block() {
        let mut peer = PeerState::new(0);
        // 600 -> below 200 takes six violations of 80
        for _ in 0..6 {
            peer.report_violation();
        }
        assert_eq!(peer.reputation.class(), ReputationClass::Blocked);
        assert_eq!(
            peer.should_accept(FrameType::ProgramOffer, 1000),
            AcceptDecision::ReputationBlocked
        );
    }

    #[test]
    fn test_reputation_clamps() {
        let mut rep = Reputation::new();
        for _ in 0..50 {
            rep.reward(40);
        }
        assert_eq!(rep.score, REPUTATION_MAX);
        for _ in 0..50 {
            rep.penalize(400);
        }
        assert_eq!(rep.score, REPUTATION_MIN);
    }

    #[test]
    fn test_clock_rewind_does_not_mint_tokens() {
        let mut limiter = RateLimiter::new(10_000);
        assert!(limiter.allow(FrameType::Hello, 10_000));
        // HELLO burst is 1; going back in time must not refill
        assert!(!limiter.allow(FrameType::Hello, 5_000));
        assert!(limiter.bucket(FrameType::Hello).tokens < 1.0);
    }

    #[test]
    fn test_reputation_classes() {
        let mut rep = Reputation::new();
        assert_eq!(rep.class(), ReputationClass::Stable);
        rep.score = 850;
        assert_eq!(rep.class(), ReputationClass::Trusted);
        rep.score = 400;
        assert_eq!(rep.class(), ReputationClass::Neutral);
        rep.score = 200;
        assert_eq!(rep.class(), ReputationClass::Suspect);
        rep.score = 199;
        assert_eq!(rep.class(), ReputationClass::Blocked);
    }
}
