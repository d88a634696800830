//! tripup-keys: user key management for the TripUp sync client.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tripup_crypto::{
    base64_encode, load_user_keypair, open_sealed_key, save_user_keypair, UserKeypair,
};

#[derive(Parser)]
#[command(name = "tripup-keys")]
#[command(author, version, about = "User key management for TripUp")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new user keypair
    Keygen {
        /// Output key file
        #[arg(short, long, default_value = "user.key")]
        output: PathBuf,

        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },

    /// Print the public half of a key file
    Public {
        /// Path to the user key file
        #[arg(short, long)]
        key: PathBuf,
    },

    /// Open a sealed asset key and print its fingerprint
    Fingerprint {
        /// Path to the user key file
        #[arg(short, long)]
        key: PathBuf,

        /// Sealed asset key (base64)
        sealed: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Keygen { output, force } => cmd_keygen(&output, force),
        Commands::Public { key } => cmd_public(&key),
        Commands::Fingerprint { key, sealed } => cmd_fingerprint(&key, &sealed),
    }
}

fn cmd_keygen(output: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if output.exists() && !force {
        return Err(format!("{} already exists (use --force)", output.display()).into());
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let keypair = UserKeypair::generate();
    save_user_keypair(&keypair, output)?;

    let out = serde_json::json!({
        "public_key": base64_encode(keypair.public.as_bytes()),
        "key_path": output.to_string_lossy(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn cmd_public(key: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let keypair = load_user_keypair(key)?;
    println!("{}", base64_encode(keypair.public.as_bytes()));
    Ok(())
}

fn cmd_fingerprint(key: &Path, sealed: &str) -> Result<(), Box<dyn std::error::Error>> {
    let keypair = load_user_keypair(key)?;
    let asset_key = open_sealed_key(sealed, &keypair.private)?;
    println!("{}", asset_key.fingerprint());
    Ok(())
}
