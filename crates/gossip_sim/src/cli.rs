use anyhow::anyhow;
use clap::Parser;
use fleet_trace::Output;

/// Run gossip rounds over an in-memory, fully meshed fleet and report how
/// far the shared knowledge spread.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of agents in the fleet.
    #[arg(long, default_value_t = 16)]
    pub agents: usize,

    /// Number of patterns agent-0 shares before the first round.
    #[arg(long, default_value_t = 5)]
    pub items: usize,

    /// Number of gossip rounds to run. Each round every agent gossips once.
    #[arg(long, default_value_t = 10)]
    pub rounds: usize,

    /// Peers contacted by each agent per round.
    #[arg(long, default_value_t = 3)]
    pub fanout: u32,

    /// Also run anti-entropy, at the configured ratio of its interval to
    /// the gossip interval.
    #[arg(long)]
    pub anti_entropy: bool,

    /// Seed for peer selection. Agent `i` uses `seed + i`.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log output format: Log, LogTimed, Compact, Json or None.
    /// Only takes effect when RUST_LOG is set.
    #[arg(long, default_value = "Log")]
    pub structured: Output,
}

impl Args {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agents < 2 {
            return Err(anyhow!("A fleet needs at least 2 agents"));
        }
        if self.fanout == 0 {
            return Err(anyhow!("Fanout must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["fleet-gossip-sim"]).unwrap();
        assert_eq!(args.agents, 16);
        assert_eq!(args.rounds, 10);
        assert_eq!(args.structured, Output::Log);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn rejects_tiny_fleet() {
        let args = Args::try_parse_from(["fleet-gossip-sim", "--agents", "1"]).unwrap();
        assert!(args.validate().is_err());
    }

    #[test]
    fn parses_output() {
        let args =
            Args::try_parse_from(["fleet-gossip-sim", "--structured", "Json", "--seed", "9"])
                .unwrap();
        assert_eq!(args.structured, Output::Json);
        assert_eq!(args.seed, Some(9));
    }
}
