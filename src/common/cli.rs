//! CLI argument parsing for the acquisition binary
//!
//! Common arguments are shared via `#[command(flatten)]`; every override is
//! optional so the config file (or the built-in defaults) stays authoritative.

use clap::Parser;

/// Common arguments shared across binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file
    #[arg(short = 'f', long = "config", default_value = "config.toml")]
    pub config_file: String,
}

/// Arguments for the acquisition session (emulator -> store -> sink)
#[derive(Parser, Debug, Clone)]
#[command(name = "acquire", about = "Run a synthetic acquisition session")]
pub struct AcquireArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Emit N packets, drain the store and exit
    #[arg(short = 'n', long)]
    pub packets: Option<u64>,

    /// Packet interval in milliseconds (0 = full speed)
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Events per packet
    #[arg(short, long)]
    pub events: Option<usize>,

    /// Events requested per pop
    #[arg(short, long)]
    pub chunk: Option<usize>,

    /// Seed for the synthetic pulse generator
    #[arg(long)]
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_args_default() {
        let args = CommonArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.config_file, "config.toml");
    }

    #[test]
    fn test_common_args_custom_config() {
        let args = CommonArgs::try_parse_from(["test", "-f", "custom.toml"]).unwrap();
        assert_eq!(args.config_file, "custom.toml");
    }

    #[test]
    fn test_acquire_args_default() {
        let args = AcquireArgs::try_parse_from(["acquire"]).unwrap();
        assert_eq!(args.common.config_file, "config.toml");
        assert!(args.packets.is_none());
        assert!(args.interval.is_none());
        assert!(args.events.is_none());
        assert!(args.chunk.is_none());
        assert!(args.seed.is_none());
    }

    #[test]
    fn test_acquire_args_overrides() {
        let args = AcquireArgs::try_parse_from([
            "acquire",
            "--config",
            "run.toml",
            "-n",
            "20",
            "--interval",
            "0",
            "--events",
            "64",
            "--chunk",
            "32",
            "--seed",
            "7",
        ])
        .unwrap();
        assert_eq!(args.common.config_file, "run.toml");
        assert_eq!(args.packets, Some(20));
        assert_eq!(args.interval, Some(0));
        assert_eq!(args.events, Some(64));
        assert_eq!(args.chunk, Some(32));
        assert_eq!(args.seed, Some(7));
    }

    #[test]
    fn test_acquire_args_rejects_garbage() {
        assert!(AcquireArgs::try_parse_from(["acquire", "--packets", "many"]).is_err());
    }
}
