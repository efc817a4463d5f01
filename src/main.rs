use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ftpsync_lib::commands;
use ftpsync_lib::config::{AppConfig, ServerConfig, ServerKind};
use ftpsync_lib::core::{ComparePolicy, ListingMode, SpecSyntax};
use ftpsync_lib::logging::init_logging;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// ftpsync - 把本地文件集单向同步到 FTP 服务器
#[derive(Parser)]
#[command(
    name = "ftpsync",
    version = env!("CARGO_PKG_VERSION"),
    about = "One-way synchronisation of a local file set to an FTP server"
)]
struct Cli {
    /// Configuration file (default: ~/.config/ftpsync/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also log to stderr, at debug level or more
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List missing, extra and off-sync files
    List {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        server: ServerArgs,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload missing and off-sync files, delete extra ones
    Update {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        server: ServerArgs,
        /// Show what would be done without touching the server
        #[arg(long)]
        dry_run: bool,
    },
    /// Test the connection to the server
    Check {
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Download the remote copy of a file into the cache directory
    Fetch {
        /// Relative path as shown by `list`
        relative_path: String,
        /// Remote spec, e.g. "/www/*|/www/img/**"
        #[arg(long)]
        remote_spec: Option<String>,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Remove everything from the cache directory
    ClearCache,
}

#[derive(Args)]
struct TargetArgs {
    /// Local root directory
    local_dir: Option<PathBuf>,
    /// Spec file listing the files to synchronise
    spec_file: Option<PathBuf>,
    /// Remote spec, e.g. "/www/*|/www/img/**"
    remote_spec: Option<String>,
    /// Spec file holds one pattern per line instead of an indented tree
    #[arg(long)]
    flat_spec: bool,
    /// List remote segments without a `/*` or `/**` suffix recursively
    #[arg(long)]
    recursive: bool,
    /// How to decide equal-size files with a newer local time
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,
}

#[derive(Args)]
struct ServerArgs {
    #[arg(long, env = "FTPSYNC_HOST")]
    host: Option<String>,
    #[arg(long, env = "FTPSYNC_PORT")]
    port: Option<u16>,
    #[arg(long, env = "FTPSYNC_USER")]
    user: Option<String>,
    #[arg(long, env = "FTPSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Use a local directory as the remote side instead of FTP
    #[arg(long)]
    remote_dir: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum PolicyArg {
    TimestampOnly,
    VerifyOnSizeTie,
}

impl From<PolicyArg> for ComparePolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::TimestampOnly => ComparePolicy::TimestampOnly,
            PolicyArg::VerifyOnSizeTie => ComparePolicy::VerifyOnSizeTie,
        }
    }
}

impl TargetArgs {
    fn apply(self, config: &mut AppConfig) {
        if let Some(dir) = self.local_dir {
            config.local_root = Some(dir);
        }
        if let Some(file) = self.spec_file {
            config.spec_file = Some(file);
        }
        if let Some(spec) = self.remote_spec {
            config.remote_spec = Some(spec);
        }
        if self.flat_spec {
            config.spec_syntax = SpecSyntax::Flat;
        }
        if self.recursive {
            config.remote_listing = ListingMode::Recursive;
        }
        if let Some(policy) = self.policy {
            config.compare.policy = policy.into();
        }
    }
}

impl ServerArgs {
    fn apply(self, server: &mut ServerConfig) {
        if let Some(dir) = self.remote_dir {
            server.kind = ServerKind::Dir;
            server.root = Some(dir);
        }
        if let Some(host) = self.host {
            server.kind = ServerKind::Ftp;
            server.host = Some(host);
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(user) = self.user {
            server.user = Some(user);
        }
        if let Some(password) = self.password {
            server.password = Some(password);
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    init_logging(&AppConfig::default_dir(), &config.log, cli.verbose);
    info!("ftpsync v{} 启动, 配置 {}", env!("CARGO_PKG_VERSION"), config_path.display());

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(command: Commands, mut config: AppConfig) -> Result<ExitCode> {
    let mut out = io::stdout();

    match command {
        Commands::List {
            target,
            server,
            json,
        } => {
            target.apply(&mut config);
            server.apply(&mut config.server);
            commands::sync::list(&config, json, &mut out).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Update {
            target,
            server,
            dry_run,
        } => {
            target.apply(&mut config);
            server.apply(&mut config.server);
            let result = commands::sync::update(&config, dry_run, &mut out).await?;
            Ok(if result.has_failures() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Check { server } => {
            server.apply(&mut config.server);
            let result = commands::test::test_connection(&config.server).await;
            println!("{}", result.message);
            if let Some(details) = result.details {
                println!("    {}", details);
            }
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Commands::Fetch {
            relative_path,
            remote_spec,
            server,
        } => {
            if let Some(spec) = remote_spec {
                config.remote_spec = Some(spec);
            }
            server.apply(&mut config.server);
            let path = commands::cache::fetch(&config, &relative_path).await?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::ClearCache => {
            let dir = commands::cache::clear(&config)?;
            println!("Cleared {}", dir.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}
