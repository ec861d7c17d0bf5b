use {std::time::Duration, tracing::level_filters::LevelFilter};

#[derive(clap::Parser)]
pub struct Arguments {
    #[clap(long, env, default_value = "warn,auctioneer=debug,model=debug")]
    pub log_filter: String,

    #[clap(long, env, default_value = "error")]
    pub log_stderr_threshold: LevelFilter,

    /// How often the closing sweeper scans for due auctions.
    #[clap(long, env, default_value = "1s", value_parser = humantime::parse_duration)]
    pub sweep_interval: Duration,

    /// How long a bid may wait for the per-item critical section before the
    /// caller is asked to retry.
    #[clap(long, env, default_value = "2s", value_parser = humantime::parse_duration)]
    pub bid_lock_timeout: Duration,

    /// Capacity of the domain event broadcast channel. Slow consumers that
    /// lag behind by more than this many events miss the oldest ones.
    #[clap(long, env, default_value = "1024")]
    pub event_buffer_size: usize,
}

impl std::fmt::Display for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "log_filter: {}", self.log_filter)?;
        writeln!(f, "log_stderr_threshold: {}", self.log_stderr_threshold)?;
        writeln!(f, "sweep_interval: {:?}", self.sweep_interval)?;
        writeln!(f, "bid_lock_timeout: {:?}", self.bid_lock_timeout)?;
        writeln!(f, "event_buffer_size: {}", self.event_buffer_size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::Parser};

    #[test]
    fn defaults_parse() {
        let args = Arguments::parse_from(["auctioneer"]);
        assert_eq!(args.sweep_interval, Duration::from_secs(1));
        assert_eq!(args.bid_lock_timeout, Duration::from_secs(2));
        assert_eq!(args.event_buffer_size, 1024);
    }

    #[test]
    fn durations_use_humantime() {
        let args = Arguments::parse_from(["auctioneer", "--sweep-interval", "250ms"]);
        assert_eq!(args.sweep_interval, Duration::from_millis(250));
    }
}
