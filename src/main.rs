// ┌─┐┬─┐─┐ ┬┬┬  ┬  ┌┬┐┬┌─┐┌─┐┌─┐┌┬┐
// ├─┤├┬┘┌┴┬┘│└┐┌┘   │││││ ┬├┤ └─┐ │
// ┴ ┴┴└─┴ └─┴ └┘   ─┴┘┴└─┘└─┘└─┘ ┴

// Finds new arXiv papers, ranks them against your interests with an LLM,
// summarizes the full text and appends everything to a digest file.

// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use anyhow::Result;
use arxiv_digest::catalog::build_query;
use arxiv_digest::config::{Config, DEFAULT_CONFIG_PATH};
use arxiv_digest::paper::Paper;
use arxiv_digest::pipeline::{is_weekend, search_request, Pipeline, RunReport};
use arxiv_digest::web;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "arXiv paper digest with LLM ranking and summaries", long_about = None)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Overrides search.max_results
    #[arg(short, long)]
    max_results: Option<usize>,

    #[arg(long, default_value_t = false)]
    no_ai: bool,

    /// Run on weekends too
    #[arg(long, default_value_t = false)]
    force: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search, rank, summarize and append to the digest (default)
    Run,
    /// Search only and print the new papers
    Search,
    /// Show a single paper by arXiv id
    Lookup { id: String },
    /// Serve the local web view
    Serve {
        #[arg(short, long, default_value_t = 6601)]
        port: u16,
    },
}

fn banner(text: &str) {
    println!("{}", "=".repeat(64));
    println!("{}", text);
    println!("{}\n", "=".repeat(64));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("arxiv_digest={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load(&args.config)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, args.max_results, args.no_ai, args.force).await,
        Command::Search => search(&config, args.max_results).await,
        Command::Lookup { id } => lookup(&config, &id).await,
        Command::Serve { port } => {
            web::start_web_server(config, port).await;
            Ok(())
        }
    }
}

async fn run(config: &Config, max_results: Option<usize>, no_ai: bool, force: bool) -> Result<()> {
    let today = chrono::Local::now().date_naive();
    if config.schedule.weekdays_only && !force && is_weekend(today) {
        banner("Weekend, no new papers are announced. Use --force to run anyway");
        return Ok(());
    }

    if no_ai {
        banner("AI ranking and summaries are disabled (--no-ai flag)");
    }

    let request = search_request(config, max_results);
    banner("   arXiv digest");
    println!("Query: {}", build_query(&request.terms, &request.categories));
    println!("Max results: {}", request.max_results);
    println!("Digest: {}\n", config.storage.digest_file.display());

    let mut pipeline = Pipeline::from_config(config, no_ai).await?;
    let report = pipeline.run(&request).await;
    print_report(&report, config);
    Ok(())
}

async fn search(config: &Config, max_results: Option<usize>) -> Result<()> {
    let request = search_request(config, max_results);
    let mut pipeline = Pipeline::from_config(config, true).await?;
    let papers = pipeline.search_only(&request).await;

    banner(&format!("Found {} new papers", papers.len()));
    for paper in &papers {
        print_paper(paper);
    }
    Ok(())
}

async fn lookup(config: &Config, id: &str) -> Result<()> {
    let pipeline = Pipeline::from_config(config, true).await?;
    match pipeline.search().get_paper_by_id(id).await? {
        Some(paper) => {
            print_paper(&paper);
            if let Some(summary) = &paper.summary {
                println!("\n{}", summary);
            }
        }
        None => println!("No paper found for {}", id),
    }
    Ok(())
}

fn print_paper(paper: &Paper) {
    println!("{}  {}", paper.id, paper.title);
    if !paper.authors.is_empty() {
        println!("   {}", paper.authors.join(", "));
    }
    println!("   {}", paper.pdf_url.as_deref().unwrap_or(&paper.url));
}

fn print_report(report: &RunReport, config: &Config) {
    println!("\n{}", "=".repeat(64));
    println!("Results");
    println!("{}", "=".repeat(64));
    println!("New papers found: {}", report.found);
    match report.recommended {
        Some(n) => println!("Recommended: {}", n),
        None => println!("Recommended: ranking skipped"),
    }
    println!("Summarized: {}", report.summarized);
    println!("Failed: {}", report.failed.len());
    for failure in &report.failed {
        println!("   {}: {}", failure.id, failure.error);
    }
    println!("Saved to digest: {}", report.delivered);
    println!("Output: {}\n", config.storage.digest_file.display());
}
