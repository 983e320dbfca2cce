//! Carousel - CA chain generation and rotation for Kafka clusters

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use futures::future::try_join_all;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use carousel::bundle::{export_to, Bundle};
use carousel::ca::{self, CaKind, IssuedCa};
use carousel::config::{CaSpec, RotationConfig};
use carousel::kube_utils::create_client;
use carousel::pki::CaChainBuilder;
use carousel::rotation::{legacy_name, GenerationTracker, RotationCoordinator};
use carousel::store::{InMemorySecretStore, KubeSecretStore, SecretStore};
use carousel::{ANNO_CA_CERT_GENERATION, CA_CERT_KEY};

/// Carousel - build CA chains and roll them into Kafka CA secrets
#[derive(Parser, Debug)]
#[command(name = "carousel", version, about, long_about = None)]
struct Cli {
    /// Path to kubeconfig (inferred when unset)
    #[arg(long, global = true)]
    kubeconfig: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a root → intermediate → operational chain and export it
    Generate(GenerateArgs),

    /// Roll new CA material into the cluster CA and/or clients CA secrets
    ///
    /// Each secret is deleted and recreated, then annotated with the
    /// baseline generation. Rerun with the same inputs to recover from a
    /// partial rollout.
    Rotate(RotateArgs),

    /// Increment the generation annotation on a secret
    Bump(BumpArgs),

    /// Print the archival name of the certificate in a secret
    LegacyName(LegacyNameArgs),

    /// Show expiry, renewal need and generation of a CA certificate secret
    Status(SecretArgs),
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Directory to write the bundle into
    #[arg(long)]
    out: PathBuf,

    /// Operational CA subject
    #[arg(long, default_value = "O=Carousel, CN=cluster-ca")]
    subject: String,

    /// Root CA subject
    #[arg(long)]
    root_subject: Option<String>,

    /// Intermediate CA subject
    #[arg(long)]
    intermediate_subject: Option<String>,
}

/// Which CAs to rotate
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CaSelection {
    Cluster,
    Clients,
    Both,
}

impl CaSelection {
    fn kinds(self) -> Vec<CaKind> {
        match self {
            CaSelection::Cluster => vec![CaKind::Cluster],
            CaSelection::Clients => vec![CaKind::Clients],
            CaSelection::Both => CaKind::ALL.to_vec(),
        }
    }
}

#[derive(Parser, Debug)]
struct RotateArgs {
    /// JSON configuration file; flags below override it
    #[arg(short = 'f', long = "config")]
    config_file: Option<PathBuf>,

    /// Namespace holding the CA secrets
    #[arg(long, env = "CAROUSEL_NAMESPACE")]
    namespace: Option<String>,

    /// Kafka cluster name
    #[arg(long, env = "CAROUSEL_CLUSTER")]
    cluster: Option<String>,

    /// Which CA to rotate
    #[arg(long, value_enum, default_value = "both")]
    ca: CaSelection,

    /// Roll out an existing bundle instead of generating one (single CA only)
    #[arg(long)]
    bundle_dir: Option<PathBuf>,

    /// Keep the superseded certificate under its legacy name
    #[arg(long)]
    retain_superseded: bool,

    /// Generation to annotate the new secrets with
    #[arg(long)]
    baseline_generation: Option<u64>,

    /// Bound on each wait for deletion or readiness, in seconds
    #[arg(long)]
    wait_timeout_secs: Option<u64>,

    /// Run against an in-memory store instead of the cluster
    #[arg(long)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct SecretArgs {
    /// Secret name
    #[arg(long)]
    secret: String,

    /// Namespace of the secret
    #[arg(long, env = "CAROUSEL_NAMESPACE")]
    namespace: String,
}

#[derive(Parser, Debug)]
struct BumpArgs {
    #[command(flatten)]
    target: SecretArgs,

    /// Annotation holding the generation
    #[arg(long, default_value = ANNO_CA_CERT_GENERATION)]
    annotation: String,
}

#[derive(Parser, Debug)]
struct LegacyNameArgs {
    #[command(flatten)]
    target: SecretArgs,

    /// Data key holding the certificate
    #[arg(long, default_value = CA_CERT_KEY)]
    key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube's rustls client needs a process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(args) => run_generate(args),
        Commands::Rotate(args) => run_rotate(args, cli.kubeconfig).await,
        Commands::Bump(args) => run_bump(args, cli.kubeconfig).await,
        Commands::LegacyName(args) => run_legacy_name(args, cli.kubeconfig).await,
        Commands::Status(args) => run_status(args, cli.kubeconfig).await,
    }
}

async fn kube_store(kubeconfig: Option<PathBuf>) -> anyhow::Result<KubeSecretStore> {
    let client = create_client(kubeconfig.as_deref()).await?;
    Ok(KubeSecretStore::new(client))
}

fn run_generate(args: GenerateArgs) -> anyhow::Result<()> {
    let mut builder = CaChainBuilder::default();
    if let Some(subject) = args.root_subject {
        builder = builder.with_root_subject(subject);
    }
    if let Some(subject) = args.intermediate_subject {
        builder = builder.with_intermediate_subject(subject);
    }

    let chain = builder.build(&args.subject)?;
    chain.verify()?;

    export_to(&args.out, &chain.operational, &chain.intermediate, &chain.root)?;

    let info = chain.operational.info()?;
    info!(out = %args.out.display(), subject = %info.subject, "Exported CA bundle");
    println!("{}", args.out.display());
    Ok(())
}

fn rotation_config(args: &RotateArgs) -> anyhow::Result<RotationConfig> {
    let mut config = match &args.config_file {
        Some(path) => RotationConfig::from_json_file(path)?,
        None => {
            let namespace = args
                .namespace
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--namespace or CAROUSEL_NAMESPACE is required"))?;
            let cluster = args
                .cluster
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--cluster or CAROUSEL_CLUSTER is required"))?;
            RotationConfig::new(namespace, cluster)
        }
    };

    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(cluster) = &args.cluster {
        config.cluster = cluster.clone();
    }

    let selected = args.ca.kinds();
    config.cas.retain(|spec| selected.contains(&spec.kind));
    for kind in selected {
        if !config.cas.iter().any(|spec| spec.kind == kind) {
            config.cas.push(CaSpec::new(kind));
        }
    }

    if args.retain_superseded {
        config.retain_superseded = true;
    }
    if let Some(generation) = args.baseline_generation {
        config.baseline_generation = generation;
    }
    if let Some(secs) = args.wait_timeout_secs {
        config.wait_timeout_secs = secs;
    }

    config.validate()?;
    Ok(config)
}

async fn run_rotate(args: RotateArgs, kubeconfig: Option<PathBuf>) -> anyhow::Result<()> {
    let config = rotation_config(&args)?;

    let issued = match &args.bundle_dir {
        Some(dir) => {
            let mut settings = config.resolved_cas();
            if settings.len() != 1 {
                anyhow::bail!("--bundle-dir needs a single CA (--ca cluster or --ca clients)");
            }
            vec![IssuedCa {
                settings: settings.remove(0),
                bundle: Bundle::open(dir),
            }]
        }
        None => ca::issue_all(&config)?,
    };

    let store: Arc<dyn SecretStore> = if args.dry_run {
        info!("Dry run, writing to an in-memory store");
        Arc::new(InMemorySecretStore::new())
    } else {
        let store = kube_store(kubeconfig)
            .await?
            .with_wait(config.wait_timeout(), config.poll_interval());
        Arc::new(store)
    };

    let coordinator = RotationCoordinator::new(store).with_options(config.rotation_options());
    let reports = try_join_all(
        issued
            .iter()
            .map(|ca| ca::roll_out(&coordinator, &config, &ca.settings, &ca.bundle)),
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

async fn run_bump(args: BumpArgs, kubeconfig: Option<PathBuf>) -> anyhow::Result<()> {
    let store = kube_store(kubeconfig).await?;
    let bumped = GenerationTracker::new(&store)
        .bump_generation_of(&args.target.secret, &args.target.namespace, &args.annotation)
        .await?;

    match bumped {
        Some(generation) => println!("{}", generation),
        None => println!("{} is not set, nothing to bump", args.annotation),
    }
    Ok(())
}

async fn run_legacy_name(args: LegacyNameArgs, kubeconfig: Option<PathBuf>) -> anyhow::Result<()> {
    let store = kube_store(kubeconfig).await?;
    let record = store
        .get(&args.target.secret, &args.target.namespace)
        .await?
        .ok_or_else(|| {
            anyhow::anyhow!(
                "secret {}/{} not found",
                args.target.namespace,
                args.target.secret
            )
        })?;
    println!("{}", legacy_name(&record, &args.key)?);
    Ok(())
}

async fn run_status(args: SecretArgs, kubeconfig: Option<PathBuf>) -> anyhow::Result<()> {
    let store = kube_store(kubeconfig).await?;
    let status = ca::status(&store, &args.secret, &args.namespace).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
