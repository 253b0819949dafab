use clap::{Args, Parser, Subcommand};
use scudder::access::AccessFilter;
use scudder::cache::IndexCache;
use scudder::config::{self, ServerConfig};
use scudder::output;
use scudder::server::Server;
use scudder::types::{DirectoryId, normalize_relative};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "scudder")]
#[command(about = "Share a directory of images over HTTP")]
#[command(long_about = "\
Share a directory of images over HTTP

Every directory can be browsed, or paged through one image at a time
including all of its subdirectories. Paging order is fixed by an index
built on first view and cached on disk, so page numbers stay stable
until the index is refreshed.

  /browse/<dir>/              list subdirectories
  /view?path=<dir>&page=N     page N of <dir>, with prev/next and
                              previous/next directory links
  /random?path=<dir>          jump to a random page

Access can be limited with allow (-a) and deny (-d) rules, each an IP
address, a hostname, or a CIDR network. Deny beats allow.

Run 'scudder gen-config' to generate a documented scudder.toml.")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, env = "SCUDDER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory for cached indices and tallies
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ServeArgs {
    /// Directory of images to share [default: current directory]
    dir: Option<PathBuf>,

    /// Admit only matching clients (IP, hostname or CIDR; repeatable)
    #[arg(short = 'a', long = "allow", value_name = "RULE")]
    allow: Vec<String>,

    /// Reject matching clients (IP, hostname or CIDR; repeatable)
    #[arg(short = 'd', long = "deny", value_name = "RULE")]
    deny: Vec<String>,

    /// Address to listen on
    #[arg(short = 'b', long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Connections served at once
    #[arg(long)]
    max_connections: Option<usize>,

    /// Seconds a connection may sit idle before it is dropped
    #[arg(long)]
    read_timeout: Option<u64>,
}

#[derive(Args)]
struct IndexArgs {
    /// Gallery root [default: current directory]
    dir: Option<PathBuf>,

    /// Subdirectory to index, relative to the gallery root
    #[arg(long, default_value = "")]
    path: String,

    /// Rebuild even if a cached index exists
    #[arg(long)]
    refresh: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a gallery over HTTP
    Serve(ServeArgs),
    /// Build or reuse the cached index for one directory
    Index(IndexArgs),
    /// Print a stock scudder.toml with all options documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scudder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Serve(args) => {
            let mut config = load(cli.config, cli.cache_dir, args.dir)?;
            config.allow.extend(args.allow);
            config.deny.extend(args.deny);
            if let Some(bind) = args.bind {
                config.bind = bind;
            }
            if let Some(port) = args.port {
                config.port = port;
            }
            if args.max_connections.is_some() {
                config.max_connections = args.max_connections;
            }
            if let Some(secs) = args.read_timeout {
                config.read_timeout_secs = secs;
            }
            config.validate()?;
            config.validate_gallery()?;

            let resolved = AccessFilter::resolve(&config.allow, &config.deny)?;
            for failure in &resolved.failures {
                tracing::warn!(error = %failure, "access rule dropped");
            }
            output::print_rules(&resolved.filter, &resolved.failures);

            let server = Server::bind(config, resolved.filter).await?;
            output::print_banner(server.gallery(), server.local_addr()?, server.connections());
            server.serve().await?;
        }
        Command::Index(args) => {
            let config = load(cli.config, cli.cache_dir, args.dir)?;
            config.validate_gallery()?;

            let gallery = config.gallery.canonicalize()?;
            let cache = IndexCache::new(&gallery, config.cache_root());
            let relative = normalize_relative(&args.path);
            let id = DirectoryId::from_relative(&relative);
            let outcome = cache.try_ensure_index(&id, &relative, args.refresh)?;
            output::print_index_output(&cache, &id, &relative, outcome);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Config file values with the global flags and positional gallery applied.
fn load(
    config_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    dir: Option<PathBuf>,
) -> Result<ServerConfig, config::ConfigError> {
    let mut config = config::load_config(config_path.as_deref())?;
    if let Some(dir) = dir {
        config.gallery = dir;
    }
    if cache_dir.is_some() {
        config.cache_dir = cache_dir;
    }
    Ok(config)
}
