use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use tessera::{EngineConfig, TesseraError};
use tessera_claim::{
    resolve_type, to_core_claim, CoreClaimOptions, InMemoryContextLoader, W3CCredential,
};
use tessera_core::field::{fr_from_decimal, fr_to_decimal};
use tessera_core::{Did, SchemaHash};

/// Tessera: DID credential engine
///
/// Offline helpers around the identity engine: schema hashes, genesis DIDs
/// and the core claims credentials bind to.
#[derive(Parser, Debug)]
#[command(name = "tessera", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default configuration file
    Init,

    /// Print the schema hash of a credential type IRI
    SchemaHash {
        /// Full type IRI, e.g. https://example.com/kyc-v1#KYCCredential
        #[arg(long)]
        type_iri: String,
    },

    /// Derive the genesis DID of an identity state
    GenesisDid {
        /// Identity state as a decimal field element
        #[arg(long)]
        state: String,
    },

    /// Print the core claim a credential binds to
    CoreClaim {
        /// Credential JSON file
        #[arg(long)]
        credential: PathBuf,

        /// JSON-LD context document of the credential's type
        #[arg(long)]
        context: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("tessera=debug,tessera_proof=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tessera=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, TesseraError> {
    match path {
        Some(p) => EngineConfig::load(p),
        None => {
            let default_path = EngineConfig::default_config_path();
            EngineConfig::load(&default_path)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli).await;
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), TesseraError> {
    match cli.command {
        Commands::Init => cmd_init(cli.config.as_ref()),
        Commands::SchemaHash { type_iri } => cmd_schema_hash(&type_iri),
        Commands::GenesisDid { state } => cmd_genesis_did(cli.config.as_ref(), &state),
        Commands::CoreClaim {
            credential,
            context,
        } => cmd_core_claim(&credential, &context),
    }
}

fn cmd_init(config_path: Option<&PathBuf>) -> Result<(), TesseraError> {
    let config = load_config(config_path)?;
    let path = config_path
        .cloned()
        .unwrap_or_else(EngineConfig::default_config_path);
    config.save(&path)?;
    info!(path = %path.display(), "configuration written");
    println!("Configuration: {}", path.display());
    let did_type = config.did_type()?;
    println!(
        "DID type:      {:?}/{:?}/{:?}",
        did_type.method, did_type.blockchain, did_type.network
    );
    println!("Tree depth:    {}", config.identity.tree_depth);
    Ok(())
}

fn cmd_schema_hash(type_iri: &str) -> Result<(), TesseraError> {
    let hash = SchemaHash::from_type_iri(type_iri);
    println!("Hex:     {}", hash.to_hex());
    println!("Decimal: {}", fr_to_decimal(&hash.to_fr()));
    Ok(())
}

fn cmd_genesis_did(config_path: Option<&PathBuf>, state: &str) -> Result<(), TesseraError> {
    let config = load_config(config_path)?;
    let state = fr_from_decimal(state)?;
    let did = Did::genesis_from_state(config.did_type()?, &state)?;
    println!("{}", did);
    println!("ID: {}", fr_to_decimal(&did.id.to_fr()));
    Ok(())
}

fn cmd_core_claim(credential_path: &Path, context_path: &Path) -> Result<(), TesseraError> {
    let credential: W3CCredential =
        serde_json::from_str(&std::fs::read_to_string(credential_path)?)?;
    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(context_path)?)?;

    let loader = InMemoryContextLoader::new();
    for url in &credential.context {
        loader.insert(url.clone(), document.clone());
    }
    let type_name = credential.credential_type()?;
    let def = resolve_type(&loader, &credential.context, type_name)?;
    let claim = to_core_claim(&credential, &loader, &CoreClaimOptions::default())?;
    let (hi, hv) = claim.hi_hv()?;

    println!("Type:      {} ({})", def.name, def.iri);
    println!("Merklized: {}", def.is_merklized());
    println!("Claim:     {}", claim.to_hex());
    println!("hi:        {}", fr_to_decimal(&hi));
    println!("hv:        {}", fr_to_decimal(&hv));
    Ok(())
}
