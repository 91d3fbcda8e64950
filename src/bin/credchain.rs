#![forbid(unsafe_code)]
//! Operator CLI for CredChain: hash links, inspect and drain the pending queue,
//! read on-chain projects and reviews, generate signer keys.

use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Color as TableColor;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use credchain::config::load_config;
use credchain::crypto::{checksum, generate_signer, secret_hex, signer_address};
use credchain::server::{build_pipeline, init_tracing};
use credchain::verification::{PendingStatus, Pipeline, VerifyOutcome};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a project link and print its content hash
    Hash { link: String },
    /// List projects waiting for verification
    Pending,
    /// Re-check pending projects and confirm matches on-chain
    Verify {
        #[arg(long, requires = "index", conflicts_with = "all")]
        builder: Option<String>,
        #[arg(long, requires = "builder")]
        index: Option<u64>,
        #[arg(long)]
        all: bool,
    },
    /// Show a builder's on-chain projects
    Projects { builder: String },
    /// Show the reviews of one project
    Reviews { builder: String, index: u64 },
    /// Generate a new signer key
    Keygen,
}

fn header(cells: &[&str]) -> Vec<Cell> {
    cells
        .iter()
        .map(|c| {
            Cell::new(c)
                .fg(TableColor::Cyan)
                .add_attribute(Attribute::Bold)
        })
        .collect()
}

fn new_table(cells: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(cells));
    table
}

fn short(hash: &str) -> String {
    let chars: Vec<char> = hash.chars().collect();
    if chars.len() > 18 {
        let head: String = chars[..10].iter().collect();
        let tail: String = chars[chars.len() - 6..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        hash.to_string()
    }
}

async fn print_pending(pipeline: &Pipeline) -> Result<(), Box<dyn std::error::Error>> {
    let pending = pipeline.pending()?;
    if pending.is_empty() {
        println!("{}", "No projects waiting for verification.".green());
        return Ok(());
    }

    let mut table = new_table(&["Builder", "#", "Project", "Status", "Attempts", "Last error"]);
    for p in &pending {
        let color = match p.status {
            PendingStatus::Pending => TableColor::White,
            PendingStatus::Mismatch => TableColor::Red,
            PendingStatus::Unreachable => TableColor::Yellow,
        };
        table.add_row(vec![
            Cell::new(short(&p.builder)),
            Cell::new(p.index.map_or_else(|| "-".to_string(), |i| i.to_string())),
            Cell::new(&p.project_name),
            Cell::new(format!("{:?}", p.status).to_lowercase()).fg(color),
            Cell::new(p.attempts),
            Cell::new(p.last_error.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{table}");
    println!("{}", format!("{} pending", pending.len()).cyan());
    Ok(())
}

fn print_outcome(builder: &str, index: u64, outcome: &VerifyOutcome) {
    let label = format!("{} #{}", short(builder), index);
    match outcome {
        VerifyOutcome::Verified { tx_hash } => {
            println!("{} {} verified in {}", "✓".green().bold(), label, tx_hash.bright_white())
        }
        VerifyOutcome::AlreadyVerified => {
            println!("{} {} was already verified", "✓".green(), label)
        }
        VerifyOutcome::Mismatch { expected, actual } => println!(
            "{} {} content changed (expected {}, got {})",
            "✗".red().bold(),
            label,
            short(expected),
            short(actual)
        ),
        VerifyOutcome::Unreachable { reason } => {
            println!("{} {} unreachable: {}", "!".yellow().bold(), label, reason)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Commands::Keygen = cli.command {
        let wallet = generate_signer();
        println!("{}", "New signer key".bright_cyan().bold());
        println!("  {} {}", "Address:".bold(), signer_address(&wallet));
        println!("  {} {}", "Secret: ".bold(), secret_hex(&wallet));
        println!();
        println!(
            "{}",
            "Export it as CREDCHAIN_SIGNER_KEY and fund the address before submitting.".yellow()
        );
        return Ok(());
    }

    init_tracing();
    let config = load_config()?;
    let pipeline: Arc<Pipeline> = build_pipeline(&config)?;

    match cli.command {
        Commands::Hash { link } => {
            let hash = pipeline.hash_project(&link, None).await?;
            println!("{}", hash);
        }
        Commands::Pending => print_pending(&pipeline).await?,
        Commands::Verify {
            builder: Some(builder),
            index: Some(index),
            ..
        } => {
            let outcome = pipeline.verify_project(&builder, index).await?;
            print_outcome(&builder, index, &outcome);
        }
        Commands::Verify { all: true, .. } => {
            let summary = pipeline.verify_all_pending().await?;
            println!(
                "{} checked, {} verified, {} mismatched, {} unreachable, {} failed",
                summary.checked.to_string().bold(),
                summary.verified.to_string().green(),
                summary.mismatched.to_string().red(),
                summary.unreachable.to_string().yellow(),
                summary.failed.to_string().red()
            );
        }
        Commands::Verify { .. } => {
            return Err("pass --builder and --index, or --all".into());
        }
        Commands::Projects { builder } => {
            let projects = pipeline.projects_of(&builder).await?;
            let mut table = new_table(&["#", "Project", "Client", "Languages", "Hash", "Verified"]);
            for (i, p) in projects.iter().enumerate() {
                let verified = if p.verified {
                    Cell::new("yes").fg(TableColor::Green)
                } else {
                    Cell::new("no").fg(TableColor::Yellow)
                };
                table.add_row(vec![
                    Cell::new(i),
                    Cell::new(&p.project_name),
                    Cell::new(short(&checksum(&p.client))),
                    Cell::new(&p.languages),
                    Cell::new(short(&p.project_hash)),
                    verified,
                ]);
            }
            println!("{table}");
            println!("{}", format!("{} projects", projects.len()).cyan());
        }
        Commands::Reviews { builder, index } => {
            let reviews = pipeline.project_reviews(&builder, index).await?;
            let mut table = new_table(&["Reviewer", "Rating", "Comment hash"]);
            for r in &reviews {
                table.add_row(vec![
                    Cell::new(checksum(&r.reviewer)),
                    Cell::new("★".repeat(r.rating as usize)).fg(TableColor::Yellow),
                    Cell::new(short(&r.comment_hash)),
                ]);
            }
            println!("{table}");
        }
        Commands::Keygen => {}
    }

    Ok(())
}
