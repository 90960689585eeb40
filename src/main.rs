use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use sh_workflow::backend::http::{MspConfig, MspHttpClient};
use sh_workflow::backend::ProviderBackend;
use sh_workflow::chain::evm::{EvmConfig, EvmStorageChain};
use sh_workflow::chain::substrate::SubstrateState;
use sh_workflow::config::Settings;
use sh_workflow::crypto::{derive_bucket_id, Blake3Fingerprinter, FileMetadata, Fingerprinter};
use sh_workflow::pipeline::{self, RunRequest};
use sh_workflow::poll::PollPolicy;
use sh_workflow::telemetry;
use sh_workflow::workflow::{verify_download, FirstAvailable, Workflow, WorkflowConfig};

#[derive(Parser)]
#[command(name = "sh-workflow")]
#[command(about = "End-to-end storage round trip against a StorageHub network")]
#[command(long_about = "End-to-end storage round trip against a StorageHub network.\n\n\
Files are fingerprinted with BLAKE3 over their raw bytes. This is not the \
network's Merkle-trie fingerprint, so a real MSP rejects the upload (the \
file key it derives differs). Use `run` against backends that accept the \
BLAKE3 scheme, or embed the library with a matching `Fingerprinter`.")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a bucket, store a file, download it back and compare
    ///
    /// The file key is derived from a BLAKE3 fingerprint, which a real MSP
    /// expecting Merkle-trie fingerprints will not accept.
    Run {
        /// Bucket to create (must not exist yet for this account)
        #[arg(long, default_value = "test-bucket-001")]
        bucket: String,
        /// Local file to store
        #[arg(long)]
        file: PathBuf,
        /// Name inside the bucket (defaults to the file's name)
        #[arg(long)]
        name: Option<String>,
        /// Where to write the downloaded copy (defaults to `<file>.downloaded`)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Query MSP backend health and provider info
    Health,
    /// Compute fingerprint, bucket id and file key offline
    ///
    /// Uses the BLAKE3 fingerprint, not the network's Merkle-trie root.
    FileKey {
        #[arg(long)]
        bucket: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// Compare two local files byte for byte
    Verify {
        original: PathBuf,
        downloaded: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            bucket,
            file,
            name,
            output,
        } => {
            let location = location_for(&file, name)?;
            let download_path = output.unwrap_or_else(|| {
                let mut path = file.clone().into_os_string();
                path.push(".downloaded");
                PathBuf::from(path)
            });
            run(
                &cli.settings,
                RunRequest {
                    bucket_name: bucket,
                    file_path: file,
                    location,
                    download_path,
                },
            )
            .await
        }
        Commands::Health => health(&cli.settings).await,
        Commands::FileKey { bucket, file, name } => {
            let location = location_for(&file, name)?;
            file_key(&cli.settings, &bucket, &file, &location).await
        }
        Commands::Verify {
            original,
            downloaded,
        } => {
            let matches = verify_download(&original, &downloaded)
                .await
                .context("Failed to compare files")?;
            if !matches {
                bail!(
                    "{} and {} differ",
                    original.display(),
                    downloaded.display()
                );
            }
            println!("Files match");
            Ok(())
        }
    }
}

fn location_for(file: &Path, name: Option<String>) -> anyhow::Result<String> {
    match name {
        Some(name) => Ok(name),
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", file.display())),
    }
}

async fn run(settings: &Settings, request: RunRequest) -> anyhow::Result<()> {
    let config = settings.validate().context("Invalid configuration")?;

    let chain = EvmStorageChain::connect(
        EvmConfig {
            rpc_url: config.chain_rpc_url.to_string(),
            file_system_address: config.file_system_address,
            chain_id: config.chain_id,
            receipt_policy: PollPolicy::transaction_receipt(),
        },
        config.identity.clone(),
    )
    .await
    .context("Failed to connect to chain RPC")?;
    let state = SubstrateState::new(config.chain_state_url.as_str())?;
    let backend = MspHttpClient::new(MspConfig {
        base_url: config.msp_backend_url.to_string(),
        timeout: config.msp_timeout,
    })?;

    let workflow = Workflow {
        chain: &chain,
        state: &state,
        backend: &backend,
        identity: &config.identity,
        fingerprinter: &Blake3Fingerprinter,
        selector: &FirstAvailable,
        config: WorkflowConfig {
            replicas: config.replicas,
            ..WorkflowConfig::default()
        },
    };

    let report = pipeline::run(&workflow, &request)
        .await
        .context("Workflow run failed")?;

    println!("Run:          {}", report.run_id);
    println!("Bucket:       {} ({})", request.bucket_name, report.bucket_id);
    println!("File key:     {}", report.file_key);
    println!("Fingerprint:  {}", report.fingerprint);
    println!("Size:         {} bytes", report.size);
    println!(
        "Downloaded:   {} bytes ({})",
        report.downloaded_size,
        report.content_type.as_deref().unwrap_or("unknown type")
    );
    println!(
        "Duration:     {}s",
        (report.finished_at - report.started_at).num_seconds()
    );

    if !report.passed() {
        println!("Result:       FAIL");
        bail!("downloaded file does not match the original");
    }
    println!("Result:       PASS");
    Ok(())
}

async fn health(settings: &Settings) -> anyhow::Result<()> {
    let backend = MspHttpClient::new(MspConfig::new(settings.msp_backend_url()?.to_string()))?;

    let report = pipeline::check_health(&backend).await?;
    let info = backend.info().await.context("Failed to fetch provider info")?;

    println!("Status:          {:?}", report.status);
    println!("Version:         {}", report.version.as_deref().unwrap_or("unknown"));
    println!("MSP id:          {}", info.msp_id);
    for addr in &info.multiaddresses {
        println!("Multiaddress:    {addr}");
    }
    Ok(())
}

async fn file_key(
    settings: &Settings,
    bucket: &str,
    file: &Path,
    location: &str,
) -> anyhow::Result<()> {
    let identity = settings.identity()?;
    let fingerprinter = Blake3Fingerprinter;
    let digest = fingerprinter
        .fingerprint_file(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let bucket_id = derive_bucket_id(&identity.address(), bucket);
    let metadata = FileMetadata {
        owner: identity.address(),
        bucket_id,
        location: location.to_string(),
        size: digest.size,
        fingerprint: digest.fingerprint,
    };

    println!("Owner:        {}", identity.address());
    println!("Bucket id:    {bucket_id}");
    println!("Location:     {location}");
    println!("Size:         {} bytes", digest.size);
    println!(
        "Fingerprint:  0x{} ({})",
        hex::encode(digest.fingerprint),
        fingerprinter.scheme()
    );
    println!("File key:     {}", metadata.file_key());
    Ok(())
}
