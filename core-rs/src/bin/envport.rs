//! envport - Environment Port Registry CLI
//!
//! Command-line interface over the port allocator

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use envport_core::config::SETTINGS_FILE_NAME;
use envport_core::{EnvironmentType, PortContext, Settings};

#[derive(Parser)]
#[command(name = "envport")]
#[command(version)]
#[command(about = "Environment port registry", long_about = None)]
struct Cli {
    /// Settings file (defaults to ./.envport.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry file, overrides the settings file
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the registry file if it does not exist
    Init,
    /// Allocate a portal port and service range for a new environment
    Allocate {
        /// Environment name
        name: String,
        /// Environment type (release, test, theme, demo, epic)
        #[arg(long = "type", short = 't')]
        env_type: EnvironmentType,
    },
    /// Allocate a port for a service inside an environment
    Service {
        /// Environment name
        environment: String,
        /// Service name
        service: String,
    },
    /// Release every port of an environment
    Release {
        /// Environment name
        environment: String,
    },
    /// Release a single port
    ReleasePort {
        port: u16,
    },
    /// Reserve a specific port for an environment service
    Reserve {
        port: u16,
        environment: String,
        service: String,
    },
    /// Check whether a port is free
    Check {
        port: u16,
    },
    /// List allocations, optionally for one environment
    List {
        environment: Option<String>,
    },
    /// Show usage per environment type
    Summary,
    /// Show the port band of an environment type
    Band {
        env_type: EnvironmentType,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn open_context(cli: &Cli) -> Result<PortContext> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE_NAME));

    let mut settings = Settings::load_or_default(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;
    if let Some(registry) = &cli.registry {
        settings.registry_path = Some(registry.clone());
    }

    PortContext::new(settings).context("Failed to open port registry")
}

fn handle_list(context: &PortContext, environment: Option<&str>) -> Result<()> {
    if let Some(environment) = environment {
        let ports = context.allocator().get_environment_ports(environment)?;
        if ports.is_empty() {
            println!("No ports allocated for {}.", environment);
            return Ok(());
        }

        println!("\n{}", environment.bold());
        for port in &ports {
            println!("  {:<24} {}", port.service, port.port);
        }
        println!();
        return Ok(());
    }

    let environments = context.registry().list_environments()?;
    if environments.is_empty() {
        println!("No ports allocated.");
        println!("\nRun `envport allocate <name> --type <type>` to create one.");
        return Ok(());
    }

    println!("\n{:<24} {:<10} {:<8} {:<24} {:<6}", "ENVIRONMENT", "TYPE", "BASE", "SERVICE", "PORT");
    println!("{}", "-".repeat(76));
    for (name, record) in &environments {
        let env_type = record
            .env_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        let base = record
            .base_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());

        for (service, port) in &record.services {
            println!("{:<24} {:<10} {:<8} {:<24} {:<6}", name, env_type, base, service, port);
        }
    }
    println!("\nTotal: {} environment(s)\n", environments.len());

    Ok(())
}

fn handle_summary(context: &PortContext) -> Result<()> {
    let summary = context.allocator().get_port_usage_summary()?;

    println!("\n{:<10} {:<12} {:>6} {:>6} {:>10}", "TYPE", "BAND", "TOTAL", "USED", "AVAILABLE");
    println!("{}", "-".repeat(48));
    for (env_type, usage) in &summary {
        let band = context.allocator().get_port_config_for_type(*env_type);
        let available = if usage.available == 0 {
            usage.available.to_string().red()
        } else {
            usage.available.to_string().green()
        };
        println!(
            "{:<10} {:<12} {:>6} {:>6} {:>10}",
            env_type.as_str(),
            band.range().to_string(),
            usage.total,
            usage.used,
            available
        );
    }
    println!();

    Ok(())
}

fn handle_band(cli: &Cli, env_type: EnvironmentType) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE_NAME));
    let bands = Settings::load_or_default(&config_path)?.port_bands()?;
    let band = bands.get(env_type);

    println!("{}", env_type.to_string().bold());
    println!("  Base Port:  {}", band.base_port);
    println!("  Port Range: {}", band.range());
    println!("  Total:      {}", band.total());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Init => {
            let context = open_context(&cli)?;
            println!("{} Registry ready at {}", "✓".green(), context.registry().path().display());
        }

        Commands::Allocate { name, env_type } => {
            let context = open_context(&cli)?;
            let ports = context
                .allocator()
                .allocate_ports_for_environment(name, *env_type)?;
            println!("{} Allocated ports for {} ({})", "✓".green(), name, env_type);
            println!("  Portal:   {}", ports.portal);
            if ports.services.is_empty() {
                println!("  Services: (none)");
            } else {
                println!("  Services: {}", ports.services);
            }
        }

        Commands::Service { environment, service } => {
            let context = open_context(&cli)?;
            let port = context.allocator().allocate_service_port(environment, service)?;
            println!("{} {}/{} -> {}", "✓".green(), environment, service, port);
        }

        Commands::Release { environment } => {
            let context = open_context(&cli)?;
            context.allocator().release_environment_ports(environment)?;
            println!("{} Released ports of {}", "✓".green(), environment);
        }

        Commands::ReleasePort { port } => {
            let context = open_context(&cli)?;
            if context.allocator().release_port(*port)? {
                println!("{} Released port {}", "✓".green(), port);
            } else {
                println!("Port {} was not allocated", port);
            }
        }

        Commands::Reserve { port, environment, service } => {
            let context = open_context(&cli)?;
            if context.allocator().reserve_port(*port, environment, service)? {
                println!("{} Reserved {} for {}/{}", "✓".green(), port, environment, service);
            } else {
                eprintln!("{} Port {} is already in use", "✗".red(), port);
                std::process::exit(1);
            }
        }

        Commands::Check { port } => {
            let context = open_context(&cli)?;
            let owner = context
                .registry()
                .get_used_ports()?
                .into_iter()
                .find(|a| a.port == *port);
            match owner {
                Some(owner) => {
                    println!("{} Port {} is allocated to {}/{}", "✗".red(), port, owner.environment, owner.service);
                    std::process::exit(1);
                }
                None => println!("{} Port {} is available", "✓".green(), port),
            }
        }

        Commands::List { environment } => {
            let context = open_context(&cli)?;
            handle_list(&context, environment.as_deref())?;
        }

        Commands::Summary => handle_summary(&open_context(&cli)?)?,

        // Band lookups need no registry
        Commands::Band { env_type } => handle_band(&cli, *env_type)?,
    }

    Ok(())
}
