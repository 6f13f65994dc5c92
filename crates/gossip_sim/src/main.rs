mod cli;

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::Parser;
use fleet_gossip::test_utils::{pattern_fixture, MemNetwork};
use fleet_gossip::{GossipStats, GossipTuningParams, ItemId, PatternGossip, TestPattern};
use serde::Serialize;

use crate::cli::Args;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoundLine {
    round: usize,
    /// Fraction of agents holding each item.
    coverage: BTreeMap<ItemId, f64>,
    converged: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    agents: usize,
    rounds_run: usize,
    converged_after: Option<usize>,
    messages_delivered: u64,
    origin: GossipStats,
    fleet_items_received: u64,
    fleet_duplicates_filtered: u64,
    fleet_bytes_transferred: u64,
}

fn coverage(fleet: &[Arc<PatternGossip>], ids: &[ItemId]) -> BTreeMap<ItemId, f64> {
    ids.iter()
        .map(|id| {
            let holders = fleet.iter().filter(|n| n.get_item(id).is_some()).count();
            (id.clone(), holders as f64 / fleet.len() as f64)
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    args.validate()?;

    if std::env::var_os("RUST_LOG").is_some() {
        fleet_trace::init_fmt(args.structured).ok();
    }

    let mut tuning = GossipTuningParams::default();
    tuning.fanout = args.fanout;
    let ae_every = (tuning.anti_entropy_interval_ms / tuning.gossip_interval_ms).max(1) as usize;

    let net = MemNetwork::<TestPattern>::new();
    let fleet = net.spawn_fleet(args.agents, tuning)?;
    if let Some(seed) = args.seed {
        for (i, node) in fleet.iter().enumerate() {
            node.reseed(seed.wrapping_add(i as u64));
        }
    }

    let origin = &fleet[0];
    let mut ids = Vec::with_capacity(args.items);
    for i in 0..args.items {
        let mut pattern = pattern_fixture(&format!("pattern-{}", i), 0.9, 0.95);
        pattern.tags = vec!["simulated".to_string()];
        ids.push(origin.share(pattern, Some(0.9))?);
    }
    tracing::info!(agents = args.agents, items = ids.len(), "fleet ready");

    let mut converged_after = None;
    for round in 1..=args.rounds {
        for node in fleet.iter() {
            node.run_gossip_round().await;
        }
        if args.anti_entropy && round % ae_every == 0 {
            for node in fleet.iter() {
                node.run_anti_entropy_round().await;
            }
        }

        let coverage = coverage(&fleet, &ids);
        let converged = coverage.values().all(|c| *c >= 1.0);
        if converged && converged_after.is_none() {
            converged_after = Some(round);
        }
        println!(
            "{}",
            serde_json::to_string(&RoundLine {
                round,
                coverage,
                converged,
            })?
        );
    }

    let stats: Vec<GossipStats> = fleet.iter().map(|n| n.get_stats()).collect();
    let summary = Summary {
        agents: args.agents,
        rounds_run: args.rounds,
        converged_after,
        messages_delivered: net.messages_delivered(),
        origin: origin.get_stats(),
        fleet_items_received: stats.iter().map(|s| s.items_received).sum(),
        fleet_duplicates_filtered: stats.iter().map(|s| s.duplicates_filtered).sum(),
        fleet_bytes_transferred: stats.iter().map(|s| s.bytes_transferred).sum(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
