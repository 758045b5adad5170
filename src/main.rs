fn main() {
    #[cfg(feature = "cli")]
    recdelta::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("recdelta: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
