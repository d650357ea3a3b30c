use anyhow::{Context as _, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

use common::Backoff;
use rxfer_tools_rxfer::config::RetrySettings;
use rxfer_tools_rxfer::health::HttpExpectation;
use rxfer_tools_rxfer::resolver::{FileSource, Resolver};
use rxfer_tools_rxfer::{Settings, Summary};
use transfer::FileTransferManager;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rxfer",
    version,
    about = "Download, upload and resolve files over HTTP, SFTP, SMB and local paths, and health check services",
    long_about = "`rxfer` moves files between local paths and remote locations (HTTP(S), SFTP, SMB, `file://`), resolves groups of files into a local cache and runs health checks with retries.

The handler for a URL is picked by its scheme; anything that is not a URL is a local path. Dependency notations (`group:name:version[:classifier][@ext]`, optionally prefixed with `resolve://`) are looked up in Maven-layout repositories.

EXAMPLES:
    # Download two files into a directory
    rxfer download https://example.com/dist/app-1.0.zip sftp://host/builds/lib.jar -o dist --progress

    # Upload a file, replacing the remote copy
    rxfer upload build/app.zip sftp://deployer@host/releases/app.zip --overwrite

    # Resolve files of two groups in parallel and print their local paths
    rxfer resolve --group tools https://example.com/tool.zip --in libs=org.example:core:2.0

    # Wait until a service responds and an old one is gone
    rxfer health --http http://localhost:8080/health --no-host localhost:5432"
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    // Transfer options
    /// Settings file (TOML)
    #[arg(long, global = true, value_name = "PATH", help_heading = "Transfer options")]
    config: Option<PathBuf>,

    /// User for every protocol without its own credentials
    #[arg(long, global = true, help_heading = "Transfer options")]
    user: Option<String>,

    /// Password for every protocol without its own credentials
    #[arg(long, global = true, help_heading = "Transfer options")]
    password: Option<String>,

    /// SMB domain (workgroup)
    #[arg(long, global = true, help_heading = "Transfer options")]
    domain: Option<String>,

    /// Replace existing files instead of skipping them
    #[arg(long, global = true, help_heading = "Transfer options")]
    overwrite: bool,

    // Progress & output
    /// Show progress
    #[arg(long, global = true, help_heading = "Progress & output")]
    progress: bool,

    /// Set the type of progress display
    ///
    /// If specified, --progress flag is implied.
    #[arg(long, global = true, value_name = "TYPE", help_heading = "Progress & output")]
    progress_type: Option<common::ProgressType>,

    /// Set delay between progress updates
    ///
    /// Default is 200ms for interactive mode (`ProgressBar`) and 10s for non-interactive mode (`TextUpdates`). If specified, --progress flag is implied. Accepts human-readable durations like "200ms", "10s", "5min".
    #[arg(long, global = true, value_name = "DELAY", help_heading = "Progress & output")]
    progress_delay: Option<String>,

    /// Print summary at the end
    #[arg(long, global = true, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", global = true, help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        global = true,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        global = true,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    /// Size of the worker pool running group resolution and health probes (0 = number of CPU cores)
    #[arg(
        long,
        global = true,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    pool_size: usize,

    /// Directory for downloads without an explicit target
    #[arg(long, global = true, value_name = "PATH", help_heading = "Advanced settings")]
    temp_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Download files into a directory
    Download {
        /// URLs, notations or local paths
        #[arg(required = true)]
        urls: Vec<String>,

        /// Target directory (default: the temporary directory)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
    /// Upload a local file to a URL
    Upload {
        source: PathBuf,
        url: String,
    },
    /// List regular files of a directory URL
    List { dir_url: String },
    /// Show the file at a URL, if any
    Stat { url: String },
    /// Delete files
    Delete {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Delete every regular file of a directory URL
    Truncate { dir_url: String },
    /// Resolve files into the local cache and print their paths
    ///
    /// Plain values go to the group named by --group; `--in NAME=VALUE` adds a value to another group.
    Resolve {
        /// URLs, notations or local paths
        values: Vec<String>,

        /// Group for the plain values
        #[arg(long, default_value = rxfer_tools_rxfer::resolver::DEFAULT_GROUP, value_name = "NAME")]
        group: String,

        /// Value for a named group
        #[arg(long = "in", value_name = "NAME=VALUE", value_parser = group_value)]
        grouped: Vec<(String, String)>,

        /// Groups resolved at once (overrides the settings file)
        #[arg(long, value_name = "N")]
        parallel_level: Option<usize>,
    },
    /// Run health checks until they pass or attempts run out
    Health {
        /// URL expected to answer with 200
        #[arg(long = "http", value_name = "URL")]
        http: Vec<String>,

        /// URL expected not to answer
        #[arg(long = "no-http", value_name = "URL")]
        no_http: Vec<String>,

        /// HOST:PORT expected to accept connections
        #[arg(long = "host", value_name = "HOST:PORT")]
        host: Vec<String>,

        /// HOST:PORT expected to refuse connections
        #[arg(long = "no-host", value_name = "HOST:PORT")]
        no_host: Vec<String>,

        /// Attempts before giving up (overrides the settings file)
        #[arg(long, value_name = "N")]
        retry_times: Option<u32>,

        /// Consecutive green rounds required (overrides the settings file)
        #[arg(long, value_name = "N")]
        assurance_times: Option<u32>,
    },
}

fn host_port(value: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("expected HOST:PORT, got '{value}'"))?;
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port in '{value}'"))?;
    Ok((host.to_string(), port))
}

fn group_value(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .filter(|(group, value)| !group.is_empty() && !value.is_empty())
        .map(|(group, value)| (group.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{value}'"))
}

fn override_times(retry: Option<RetrySettings>, times: u32, backoff: Backoff) -> RetrySettings {
    match retry {
        Some(retry) => RetrySettings { times, ..retry },
        None => RetrySettings {
            times,
            delay_ms: 1000,
            backoff,
        },
    }
}

fn build_manager(
    args: &Args,
    settings: &Settings,
    context: Arc<common::Context>,
) -> anyhow::Result<Arc<FileTransferManager>> {
    let mut settings = settings.clone();
    let file_transfer = &mut settings.file_transfer;
    file_transfer.user = args.user.clone().or(file_transfer.user.take());
    file_transfer.password = args.password.clone().or(file_transfer.password.take());
    file_transfer.domain = args.domain.clone().or(file_transfer.domain.take());
    file_transfer.download_overwrite |= args.overwrite;
    file_transfer.upload_overwrite |= args.overwrite;
    Ok(Arc::new(settings.manager(context)?))
}

#[instrument(skip(args))]
async fn async_main(args: Args) -> anyhow::Result<Summary> {
    let settings = Settings::load_optional(args.config.as_deref())?;
    let progress_delay = args
        .progress_delay
        .as_deref()
        .map(humantime::parse_duration)
        .transpose()
        .context("invalid --progress-delay")?;
    let progress = if args.progress || args.progress_type.is_some() || progress_delay.is_some() {
        Some(common::ProgressSettings {
            progress_type: args.progress_type.unwrap_or_default(),
            progress_delay,
        })
    } else {
        None
    };
    let mut context = common::Context::builder()
        .pool_size(args.pool_size)
        .progress(progress);
    if let Some(temp_dir) = &args.temp_dir {
        context = context.temp_dir(temp_dir);
    }
    let context = context.build()?;
    let manager = build_manager(&args, &settings, context.clone())?;
    let mut summary = Summary::default();
    match &args.command {
        Command::Download { urls, output } => {
            for url in urls {
                let path = match output {
                    Some(dir) => {
                        let target = dir.join(common::url::name_from_url(url));
                        manager.download_to(url, &target).await?;
                        context.resolve_path(target)
                    }
                    None => manager.download(url).await?,
                };
                println!("{}", path.display());
            }
        }
        Command::Upload { source, url } => {
            manager.upload(url, source).await?;
        }
        Command::List { dir_url } => {
            for entry in manager.list(dir_url).await? {
                println!("{entry}");
            }
        }
        Command::Stat { url } => match manager.stat_url(url).await? {
            Some(entry) => println!("{entry}"),
            None => return Err(anyhow!("File at URL '{url}' does not exist")),
        },
        Command::Delete { urls } => {
            for url in urls {
                manager.delete(url).await?;
            }
        }
        Command::Truncate { dir_url } => {
            manager.truncate(dir_url).await?;
        }
        Command::Resolve {
            values,
            group,
            grouped,
            parallel_level,
        } => {
            if values.is_empty() && grouped.is_empty() {
                return Err(anyhow!("nothing to resolve"));
            }
            let mut options = settings.resolver_options();
            if let Some(parallel_level) = parallel_level {
                options.parallel_level = *parallel_level;
            }
            let resolver = Resolver::new(manager.clone(), options)?;
            for value in values {
                resolver
                    .in_group(group)
                    .get(FileSource::Text(value.clone()))
                    .await?;
            }
            for (name, value) in grouped {
                resolver
                    .in_group(name)
                    .get(FileSource::Text(value.clone()))
                    .await?;
            }
            let groups = resolver.resolve_all().await?;
            for group in &groups {
                for resolution in group.resolutions() {
                    let file = resolution.file().await?;
                    println!("{}\t{}", group.name(), file.display());
                    summary.files_resolved += 1;
                }
            }
            summary.groups_resolved = groups.len();
        }
        Command::Health {
            http,
            no_http,
            host,
            no_host,
            retry_times,
            assurance_times,
        } => {
            let mut checker_settings = settings.clone();
            let health = &mut checker_settings.health_checker;
            if let Some(times) = retry_times {
                health.retry = Some(override_times(health.retry.take(), *times, Backoff::Squared));
            }
            if let Some(times) = assurance_times {
                health.assurance_retry = Some(override_times(
                    health.assurance_retry.take(),
                    *times,
                    Backoff::Constant,
                ));
            }
            let mut checker = checker_settings.health_checker(context.clone())?;
            for url in http {
                checker.http(url.as_str(), url, HttpExpectation::default());
            }
            for url in no_http {
                checker.no_http(format!("no {url}"), url);
            }
            for value in host {
                let (host, port) = host_port(value)?;
                checker.host(value.as_str(), &host, port);
            }
            for value in no_host {
                let (host, port) = host_port(value)?;
                checker.no_host(format!("no {value}"), &host, port);
            }
            if checker.checks().is_empty() {
                return Err(anyhow!("no health checks defined"));
            }
            let statuses = checker.start().await?;
            println!("{}", rxfer_tools_rxfer::health::render_statuses(&statuses));
            summary.checks_passed = checker.passed().len();
            summary.checks_failed = checker.failed().len();
            if summary.checks_failed > 0 {
                context.close();
                return Err(anyhow!(rxfer_tools_rxfer::health::failure_report(&statuses)));
            }
        }
    }
    summary.transfer = manager.summary();
    context.close();
    Ok(summary)
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
