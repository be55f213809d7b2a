//! Synthetic request generation.
//!
//! Requests model chat traffic behind a handful of shared system prompts:
//! each prompt is one of `num_prefixes` fixed token sequences followed by a
//! random suffix. Generation is fully determined by the configured seed.

use crate::config::SimulationSection;
use kvroute_algorithms::TokenId;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Token ids below this value are reserved for random suffixes; shared
/// prefixes live above it so the two never collide.
const PREFIX_TOKEN_BASE: TokenId = 1 << 20;
const SUFFIX_VOCAB: TokenId = 32_000;

/// One synthetic inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimRequest {
    pub id: u64,
    pub arrival_time_ms: u64,
    /// Which shared prefix the prompt starts with.
    pub prefix_id: u32,
    pub tokens: Vec<TokenId>,
    pub output_tokens: usize,
    pub model: String,
}

impl SimRequest {
    pub fn request_id(&self) -> String {
        format!("req-{}", self.id)
    }
}

/// The fixed token sequence of shared prefix `prefix_id`.
pub fn prefix_tokens(prefix_id: u32, len: usize) -> Vec<TokenId> {
    let start = PREFIX_TOKEN_BASE.wrapping_add(prefix_id.wrapping_mul(len as TokenId));
    (0..len as TokenId).map(|i| start.wrapping_add(i)).collect()
}

/// Draw from `[mean - spread, mean + spread]`, floored at `min`.
pub(crate) fn sample_around(rng: &mut ChaCha8Rng, mean: f64, spread: f64, min: f64) -> f64 {
    (mean + rng.gen::<f64>() * spread * 2.0 - spread).max(min)
}

/// Generate the request stream described by `config`, ordered by arrival.
///
/// Inter-arrival times are exponential with rate `arrival_rate_per_sec`.
pub fn generate_workload(config: &SimulationSection) -> Vec<SimRequest> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let num_prefixes = config.num_prefixes.max(1);
    let prefixes: Vec<Vec<TokenId>> = (0..num_prefixes)
        .map(|p| prefix_tokens(p, config.prefix_len))
        .collect();

    let mut arrival_ms = 0.0f64;
    let mut requests = Vec::with_capacity(config.num_requests as usize);
    for id in 0..config.num_requests {
        let u: f64 = rng.gen();
        arrival_ms += -(1.0 - u).ln() / config.arrival_rate_per_sec * 1000.0;

        let prefix_id = rng.gen_range(0..num_prefixes);
        let suffix_len =
            sample_around(&mut rng, config.suffix_len_mean, config.suffix_len_std, 1.0) as usize;
        let mut tokens = prefixes[prefix_id as usize].clone();
        tokens.extend((0..suffix_len).map(|_| rng.gen_range(0..SUFFIX_VOCAB)));

        let output_tokens = sample_around(
            &mut rng,
            config.output_tokens_mean,
            config.output_tokens_std,
            1.0,
        ) as usize;
        let model = config.models[rng.gen_range(0..config.models.len())].clone();

        requests.push(SimRequest {
            id,
            arrival_time_ms: arrival_ms as u64,
            prefix_id,
            tokens,
            output_tokens,
            model,
        });
    }
    requests
}
