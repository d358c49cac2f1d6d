// coolq configuration CLI
// Default generation, validation and learned-state inspection

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use coolq::{config_digest, default_config_toml, load_config, load_state_file};
use coolq_core::{ActionSpace, ControllerConfig, StateKey};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "coolq-config")]
#[command(about = "coolq configuration and Q-table inspection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default configuration as TOML
    Defaults {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file
    Validate {
        /// Path to TOML config file
        file: PathBuf,

        /// Print the resolved action lattice
        #[arg(short, long)]
        actions: bool,
    },

    /// Summarize a persisted state file
    Inspect {
        /// Path to the JSON state file
        state: PathBuf,

        /// Show the N highest-valued pairs
        #[arg(short, long, default_value_t = 10)]
        top: usize,
    },

    /// Print the greedy action for every visited state
    Policy {
        /// Path to the JSON state file
        state: PathBuf,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Defaults { output } => defaults(output),
        Commands::Validate { file, actions } => validate(file, actions),
        Commands::Inspect { state, top } => inspect(state, top),
        Commands::Policy { state, json } => policy(state, json),
    }
}

fn defaults(output: Option<PathBuf>) -> Result<()> {
    let text = default_config_toml()?;
    match output {
        Some(path) => {
            fs::write(&path, &text).with_context(|| format!("writing {}", path.display()))?;
            println!("{} {}", "Wrote".green(), path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn validate(file: PathBuf, show_actions: bool) -> Result<()> {
    let config = load_config(&file).with_context(|| format!("loading {}", file.display()))?;
    let warnings = config.validate();

    println!("{} {}", "Config:".bold(), file.display());
    println!("  digest   {}", config_digest(&config)?);

    if warnings.is_empty() {
        println!("  {}", "✓ valid".green());
    } else {
        for warning in &warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
        let sanitized = config.sanitized();
        println!(
            "  {} ticks will run with defaults in {} section(s)",
            "→".cyan(),
            count_differences(&config, &sanitized)
        );
    }

    if show_actions {
        let space = ActionSpace::from_config(&config.actions);
        println!("  power    {:?}", space.power_levels());
        println!("  fan      {:?}", space.fan_levels());
        println!("  actions  {}", space.allowed().len());
    }

    if warnings.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} configuration warning(s)", warnings.len())
    }
}

fn inspect(path: PathBuf, top: usize) -> Result<()> {
    let state = load_state_file(&path).with_context(|| format!("reading {}", path.display()))?;
    let qtable = &state.qtable;

    println!("{} {}", "State:".bold(), path.display());
    println!("  epsilon       {:.4}", state.epsilon);
    println!("  updates       {}", state.total_updates);
    println!("  states        {}", qtable.num_states());
    println!("  pairs         {}", qtable.num_visited());
    println!("  trend memory  {}", state.trend_memory);
    match &state.last_applied {
        Some(action) => println!("  last applied  {}", action),
        None => println!("  last applied  -"),
    }
    match &state.transition {
        Some(record) => println!(
            "  buffered      {} / {} at {}",
            record.state,
            record.action,
            record.at.to_rfc3339()
        ),
        None => println!("  buffered      -"),
    }

    let mut pairs: Vec<(StateKey, String, f64)> = qtable
        .values()
        .iter()
        .flat_map(|(s, row)| row.iter().map(move |(a, q)| (*s, a.to_string(), *q)))
        .collect();
    if pairs.is_empty() {
        return Ok(());
    }
    pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let (min, max) = pairs
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, _, q)| (lo.min(*q), hi.max(*q)));
    println!("  q range       [{:.4}, {:.4}]", min, max);

    println!("{}", format!("Top {} pairs:", top.min(pairs.len())).bold());
    for (state, action, q) in pairs.iter().take(top) {
        let value = format!("{:+.4}", q);
        let value = if *q >= 0.0 { value.green() } else { value.red() };
        println!("  {:<14} {:>7}  {}", state.to_string(), action, value);
    }
    Ok(())
}

fn policy(path: PathBuf, json: bool) -> Result<()> {
    let state = load_state_file(&path).with_context(|| format!("reading {}", path.display()))?;
    let greedy = state.qtable.greedy_policy();

    if json {
        let map: BTreeMap<String, serde_json::Value> = greedy
            .iter()
            .map(|(s, (a, q))| (s.to_string(), serde_json::json!({ "action": a, "q": q })))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }

    println!("{:<14} {:>7} {:>9}", "state".bold(), "action".bold(), "q".bold());
    for (s, (a, q)) in &greedy {
        println!("{:<14} {:>7} {:>+9.4}", s.to_string(), a.to_string(), q);
    }
    Ok(())
}

/// Number of top-level sections changed by sanitizing.
fn count_differences(original: &ControllerConfig, sanitized: &ControllerConfig) -> usize {
    [
        original.learning != sanitized.learning,
        original.state != sanitized.state,
        original.safety != sanitized.safety,
        original.reward != sanitized.reward,
    ]
    .iter()
    .filter(|changed| **changed)
    .count()
}
