//! comm-check entry point
//!
//! Dispatches the CLI commands: local environment checks, the
//! orchestrated test suite, and the single-pass explicit-rank run.

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use comm_check::cli::{Cli, Commands, ConfigSubcommand};
use comm_check::config::CheckConfig;
use comm_check::error::{Error, Result};
use comm_check::net::{self, RankSource, Role};
use comm_check::suite::{self, SuiteReport};
use comm_check::{config, gpu, logging, system, version};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Fast paths that don't need the full logging stack
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        _ => {}
    }

    let config_path = match &cli.command {
        Commands::Check { config, .. }
        | Commands::Run { config, .. }
        | Commands::Test { config, .. } => config.clone(),
        _ => None,
    };

    let config = match CheckConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // Guards must stay alive for the lifetime of the program
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(version = %build.full_version(), profile = %build.profile, "Starting comm-check");

    let outcome = match cli.command {
        Commands::Check { json, .. } => run_check(&config, json),
        Commands::Run { rank, .. } => run_suite_command(&config, rank),
        Commands::Test { rank, .. } => run_single_command(&config, rank),
        Commands::Version | Commands::Config { .. } => unreachable!(),
    };

    if let Err(e) = outcome {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }

    Ok(())
}

/// Local environment report for the check command
#[derive(Debug, Serialize)]
struct CheckReport {
    hostname: String,
    local_ip: Option<String>,
    derived_rank: Option<u32>,
    interface: String,
    interface_present: bool,
    interfaces: Vec<String>,
    master_addr: String,
    system: system::SystemInfo,
    gpu_required: bool,
    gpu: gpu::GpuReport,
}

impl CheckReport {
    fn gather(config: &CheckConfig) -> Self {
        let sys = system::SystemInfo::collect();
        let local_ip = net::local_ip(&config.cluster.subnet_prefix).ok();
        let derived_rank = local_ip
            .as_deref()
            .and_then(|ip| net::rank_for_ip(ip, &config.cluster));

        Self {
            hostname: sys.hostname.clone(),
            local_ip,
            derived_rank,
            interface: config.cluster.interface.clone(),
            interface_present: net::interface_exists(&config.cluster.interface),
            interfaces: net::list_interfaces(),
            master_addr: format!(
                "{}:{}",
                config.cluster.master_addr, config.cluster.master_port
            ),
            system: sys,
            gpu_required: config.gpu.require,
            gpu: if config.gpu.enable {
                gpu::probe()
            } else {
                gpu::GpuReport::skipped()
            },
        }
    }

    fn healthy(&self) -> bool {
        self.interface_present
            && self.derived_rank.is_some()
            && (!self.gpu_required || self.gpu.available)
    }

    fn print_human(&self) {
        println!("comm-check environment report");
        println!();
        println!("Node:");
        println!("  Hostname:  {}", self.hostname);
        println!(
            "  Local IP:  {}",
            self.local_ip.as_deref().unwrap_or("(unresolved)")
        );
        match self.derived_rank {
            Some(rank) => println!("  Rank:      {} (from IP)", rank),
            None => println!("  Rank:      unknown (IP matches neither node)"),
        }
        println!();
        println!("Network:");
        println!(
            "  Interface: {} ({})",
            self.interface,
            if self.interface_present { "present" } else { "MISSING" }
        );
        println!("  Available: {}", self.interfaces.join(", "));
        println!("  Master:    {}", self.master_addr);
        println!();
        println!("System:");
        println!("  OS:        {} {}", self.system.os_name, self.system.os_version);
        println!("  CPUs:      {}", self.system.cpu_count);
        println!("  Memory:    {} MB", self.system.total_memory_mb);
        println!();
        println!("GPU:");
        if self.gpu.available {
            println!(
                "  Driver:    {} (CUDA {})",
                self.gpu.driver_version.as_deref().unwrap_or("?"),
                self.gpu.cuda_version.as_deref().unwrap_or("?")
            );
            for dev in &self.gpu.devices {
                println!(
                    "  [{}] {} ({} MB, {} MB used)",
                    dev.index, dev.name, dev.memory_total_mb, dev.memory_used_mb
                );
            }
        } else {
            println!(
                "  Unavailable: {}",
                self.gpu.error.as_deref().unwrap_or("no devices found")
            );
        }
        println!();
        if self.healthy() {
            println!("Environment looks good. Next: run 'comm-check run' on both nodes.");
        } else if !self.interface_present {
            println!("Fix: interface '{}' is missing on this host.", self.interface);
        } else if self.gpu_required && !self.gpu.available {
            println!("Fix: a GPU is required by the configuration but none is usable.");
        } else {
            println!(
                "Fix: the local IP matches neither configured node; use 'comm-check test <rank>' to pick a rank explicitly."
            );
        }
    }
}

/// The check command: inspect the local environment without touching the peer
fn run_check(config: &CheckConfig, json: bool) -> Result<()> {
    let report = CheckReport::gather(config);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print_human();
    }

    if !report.healthy() {
        std::process::exit(1);
    }
    Ok(())
}

/// The run command: derive the rank, then drive the full suite
fn run_suite_command(config: &CheckConfig, rank_override: Option<u32>) -> Result<()> {
    if config.gpu.require {
        gpu::probe_required()?;
    }

    let role = match rank_override {
        Some(rank) => Role {
            rank,
            source: RankSource::Explicit,
            local_ip: net::local_ip(&config.cluster.subnet_prefix).unwrap_or_default(),
        },
        None => net::resolve_role(&config.cluster)?,
    };

    net::require_interface(&config.cluster.interface)?;

    info!(
        rank = role.rank,
        source = ?role.source,
        local_ip = %role.local_ip,
        "node role resolved"
    );

    let report = build_runtime()?.block_on(suite::run_suite(config, role.rank));
    print_suite_report(&report);

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

/// The test command: single pass with an explicit rank
fn run_single_command(config: &CheckConfig, rank: u32) -> Result<()> {
    if !net::interface_exists(&config.cluster.interface) {
        warn!(
            interface = %config.cluster.interface,
            "configured interface not found, continuing anyway"
        );
    }

    let report = build_runtime()?.block_on(suite::single_pass(config, rank))?;
    print_suite_report(&report);

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))
}

fn print_suite_report(report: &SuiteReport) {
    println!();
    println!("Results (rank {}):", report.rank);
    for result in &report.results {
        println!(
            "  {:<12} {}  {:>5} ms  {}",
            result.test.name(),
            if result.passed { "PASS" } else { "FAIL" },
            result.duration_ms,
            result.detail
        );
    }
    println!();
    if report.all_passed() {
        println!("All tests passed.");
    } else {
        println!("Some tests FAILED.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(interface_present: bool, derived_rank: Option<u32>, gpu_required: bool, gpu_available: bool) -> CheckReport {
        let gpu = if gpu_available {
            gpu::GpuReport {
                available: true,
                driver_version: Some("550.54".to_string()),
                cuda_version: Some("12.4".to_string()),
                device_count: 1,
                devices: Vec::new(),
                error: None,
            }
        } else {
            gpu::GpuReport::skipped()
        };

        CheckReport {
            hostname: "node0".to_string(),
            local_ip: Some("192.168.100.10".to_string()),
            derived_rank,
            interface: "enp1s0f0np0".to_string(),
            interface_present,
            interfaces: vec!["lo".to_string()],
            master_addr: "192.168.100.10:12355".to_string(),
            system: system::SystemInfo::collect(),
            gpu_required,
            gpu,
        }
    }

    #[test]
    fn test_healthy_requires_interface_and_rank() {
        assert!(report(true, Some(0), false, false).healthy());
        assert!(!report(false, Some(0), false, false).healthy());
        assert!(!report(true, None, false, false).healthy());
    }

    #[test]
    fn test_healthy_honors_gpu_requirement() {
        // gpu.require = true with no usable GPU must fail the check
        assert!(!report(true, Some(0), true, false).healthy());
        assert!(report(true, Some(0), true, true).healthy());
        // not required: GPU absence does not fail the check
        assert!(report(true, Some(0), false, false).healthy());
    }
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = CheckConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            config::init_config(path.as_deref(), force)?;
        }
        ConfigSubcommand::Validate { config } => {
            match CheckConfig::load(config.as_deref()) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    eprint!("{}", e.format_for_terminal());
                    std::process::exit(e.exit_code());
                }
            }
        }
    }

    Ok(())
}
