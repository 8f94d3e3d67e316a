use clap::Subcommand;
use gatehouse_core::GatehouseConfig;
use gatehouse_store::VaultPaths;

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Print the effective configuration (file values over defaults)
    Show,
    /// Print where the configuration is read from
    Path,
}

pub fn run(cmd: ConfigCmd, paths: &VaultPaths) -> anyhow::Result<()> {
    match cmd {
        ConfigCmd::Show => {
            let config = GatehouseConfig::load(&paths.config_json)?;
            if !paths.config_json.exists() {
                eprintln!("{} not found, showing defaults", paths.config_json.display());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCmd::Path => println!("{}", paths.config_json.display()),
    }
    Ok(())
}
