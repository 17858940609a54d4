pub const DEFAULT_CONFIG_FILE_PATH: &str = "/etc/meshgate/meshgated.toml";
