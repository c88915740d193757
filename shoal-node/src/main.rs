// Shoal: registry, seeder and fetcher in one binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context};
use shoal_node::{
    config, seed_file, Config, FetchOrchestrator, FetchRequest, Registry, RegistryClient,
    SeedOptions,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage:
  shoal registry [--port PORT]
  shoal seed <file> <registry> <local-address> <local-port> [--item NAME]
  shoal fetch <item> <registry> <local-address> <local-port> [--out PATH]";

enum Command {
    Registry {
        port: Option<u16>,
    },
    Seed {
        file: PathBuf,
        item: Option<String>,
        endpoints: Endpoints,
    },
    Fetch {
        item: String,
        out: Option<PathBuf>,
        endpoints: Endpoints,
    },
}

struct Endpoints {
    registry: String,
    address: String,
    port: u16,
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("shoal {}", VERSION);
        return Ok(());
    }
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    let cfg = config::load();
    config::init_tracing(&cfg);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::select! {
            res = run(command, &cfg) => res,
            res = shutdown_signal() => {
                tracing::info!("shutting down");
                res
            }
        }
    })
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let (flags, positional) = split_flags(args)?;
    let flag = |name: &str| {
        flags
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };
    match positional.first().map(String::as_str) {
        Some("registry") => {
            let port = flag("--port")
                .map(|p| p.parse::<u16>().context("invalid --port"))
                .transpose()?;
            Ok(Command::Registry { port })
        }
        Some("seed") => {
            let [_, file, registry, address, port] = positional.as_slice() else {
                bail!("seed expects 4 arguments");
            };
            Ok(Command::Seed {
                file: PathBuf::from(file),
                item: flag("--item"),
                endpoints: endpoints(registry, address, port)?,
            })
        }
        Some("fetch") => {
            let [_, item, registry, address, port] = positional.as_slice() else {
                bail!("fetch expects 4 arguments");
            };
            Ok(Command::Fetch {
                item: item.clone(),
                out: flag("--out").map(PathBuf::from),
                endpoints: endpoints(registry, address, port)?,
            })
        }
        Some(other) => bail!("unknown command {other:?}"),
        None => bail!("missing command"),
    }
}

fn split_flags(args: &[String]) -> anyhow::Result<(Vec<(String, String)>, Vec<String>)> {
    let mut flags = Vec::new();
    let mut positional = Vec::new();
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        if arg.starts_with("--") {
            let value = it
                .next()
                .with_context(|| format!("{arg} needs a value"))?;
            flags.push((arg.clone(), value.clone()));
        } else {
            positional.push(arg.clone());
        }
    }
    Ok((flags, positional))
}

fn endpoints(registry: &str, address: &str, port: &str) -> anyhow::Result<Endpoints> {
    Ok(Endpoints {
        registry: registry.to_string(),
        address: address.to_string(),
        port: port
            .parse()
            .with_context(|| format!("invalid local port {port:?}"))?,
    })
}

async fn run(command: Command, cfg: &Config) -> anyhow::Result<()> {
    match command {
        Command::Registry { port } => {
            let bind = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(cfg.registry_port)));
            let registry = Registry::bind(bind, cfg.peer_timeout(), cfg.sweep_interval())
                .await
                .with_context(|| format!("failed to bind registry on {bind}"))?;
            registry.run().await?;
        }
        Command::Seed {
            file,
            item,
            endpoints,
        } => {
            let item = item.unwrap_or_else(|| file.to_string_lossy().into_owned());
            let client = registry_client(&endpoints, cfg).await?;
            seed_file(&file, &item, &seed_options(&endpoints, cfg), client).await?;
        }
        Command::Fetch {
            item,
            out,
            endpoints,
        } => {
            let client = registry_client(&endpoints, cfg).await?;
            let orchestrator =
                FetchOrchestrator::new(client).with_batch_timeout(cfg.fetch_timeout());
            let mut request = FetchRequest::new(item);
            if let Some(out) = out {
                request = request.with_destination(out);
            }
            if let Err(e) =
                shoal_node::run_download(&orchestrator, &request, &seed_options(&endpoints, cfg))
                    .await
            {
                tracing::error!(item = %request.item, error = %e, "download failed");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

async fn registry_client(endpoints: &Endpoints, cfg: &Config) -> anyhow::Result<RegistryClient> {
    let client = RegistryClient::resolve(&endpoints.registry, cfg.registry_port).await?;
    Ok(client.with_query_timeout(cfg.query_timeout()))
}

fn seed_options(endpoints: &Endpoints, cfg: &Config) -> SeedOptions {
    SeedOptions {
        bind: SocketAddr::from(([0, 0, 0, 0], endpoints.port)),
        address: endpoints.address.clone(),
        port: endpoints.port,
        fragment_size: cfg.fragment_size,
        heartbeat_interval: cfg.heartbeat_interval(),
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parse_fetch_with_out() {
        let cmd = parse_args(&args("fetch movie.mkv tracker.lan 10.0.0.7 6881 --out /tmp/m.mkv"))
            .unwrap();
        match cmd {
            Command::Fetch {
                item,
                out,
                endpoints,
            } => {
                assert_eq!(item, "movie.mkv");
                assert_eq!(out, Some(PathBuf::from("/tmp/m.mkv")));
                assert_eq!(endpoints.registry, "tracker.lan");
                assert_eq!(endpoints.port, 6881);
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn parse_seed_and_registry() {
        assert!(matches!(
            parse_args(&args("seed a.bin 10.0.0.1 10.0.0.2 7000")).unwrap(),
            Command::Seed { item: None, .. }
        ));
        assert!(matches!(
            parse_args(&args("registry --port 5001")).unwrap(),
            Command::Registry { port: Some(5001) }
        ));
    }

    #[test]
    fn parse_errors() {
        assert!(parse_args(&args("seed a.bin 10.0.0.1")).is_err());
        assert!(parse_args(&args("fetch a 1 2 notaport")).is_err());
        assert!(parse_args(&args("registry --port")).is_err());
        assert!(parse_args(&args("dance")).is_err());
        assert!(parse_args(&[]).is_err());
    }
}
