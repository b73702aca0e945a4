use std::ops::ControlFlow;

use anyhow::Context;
use clap::Parser;
use inquire::error::InquireError;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod rag;
mod storage;
#[cfg(test)]
mod tests;

use app::{App, AppFactory};
use rag::retrieval::Hit;

const REPL_HELP: &str = "\nCommands:\n\
    \x20  :quit      or  :q    -> exit\n\
    \x20  :help      or  :h    -> show this help\n\
    \x20  :reindex   or  :ri   -> update the index\n\
    \x20  :citations or  :ci   -> toggle source and score display\n\
    \x20  :sources   or  :so   -> list indexed files\n";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let paths = AppFactory::get_paths(args.base_dir)?;
    let mut app = AppFactory::create_app(&paths)?;

    match args.command {
        cli::Command::Search {
            query,
            reindex,
            top_k,
            min_score,
            json,
        } => {
            if reindex {
                app.reindex(false)?;
            }

            let hits = app.search(&query, top_k.map(usize::from), min_score)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("no matching notes");
            } else {
                print_hits(&hits, true);
            }
        }

        cli::Command::Reindex { full } => {
            let report = app.reindex(full)?;
            println!(
                "{} slots indexed ({} reused, {} embedded) in {:.2?}",
                report.total, report.reused, report.embedded, report.elapsed
            );
        }

        cli::Command::Sources {} => {
            for source in app.sources()? {
                println!("{source}");
            }
        }

        cli::Command::Status { json } => {
            let status = app.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("notes:     {}", status.notes_dir.display());
                println!("storage:   {}", status.storage_dir.display());
                println!("model:     {}", status.model);
                println!("chunking:  {} chars, {} overlap", status.chunk_size, status.chunk_overlap);
                if status.indexed {
                    println!("chunks:    {}", status.slots);
                    println!("documents: {}", status.documents);
                    println!("sources:   {}", status.sources);
                } else {
                    println!("index:     not built");
                }
            }
        }

        cli::Command::Repl {} => repl(&mut app)?,
    }

    Ok(())
}

fn repl(app: &mut App) -> anyhow::Result<()> {
    app.index().context("Failed to open index")?;
    println!("\nNotes search\nType a query, or :h for help.\n");

    let mut show_citations = false;

    loop {
        let query = match inquire::Text::new(">").prompt() {
            Ok(query) => query.trim().to_string(),
            Err(InquireError::OperationInterrupted) | Err(InquireError::OperationCanceled) => {
                println!("\nBye~");
                break;
            }
            Err(err) => anyhow::bail!("An error occurred: {}", err),
        };

        if run_line(app, &query, &mut show_citations).is_break() {
            println!("\nBye~");
            break;
        }
    }

    Ok(())
}

/// Handle one REPL line. Command failures are reported and the session goes on.
fn run_line(app: &mut App, line: &str, show_citations: &mut bool) -> ControlFlow<()> {
    match line {
        "" => {}
        ":quit" | ":q" => return ControlFlow::Break(()),
        ":help" | ":h" => println!("{REPL_HELP}"),
        ":reindex" | ":ri" => match app.reindex(false) {
            Ok(report) => println!(
                "{} slots indexed ({} reused, {} embedded)\n",
                report.total, report.reused, report.embedded
            ),
            Err(err) => eprintln!("reindex failed: {err:#}\n"),
        },
        ":sources" | ":so" => match app.sources() {
            Ok(sources) => {
                println!("\nSOURCES:\n");
                for source in sources {
                    println!("- {source}");
                }
                println!();
            }
            Err(err) => eprintln!("sources failed: {err:#}\n"),
        },
        ":citations" | ":ci" => {
            *show_citations = !*show_citations;
            println!("citations {}\n", if *show_citations { "on" } else { "off" });
        }
        _ => match app.search(line, None, None) {
            Ok(hits) if hits.is_empty() => println!("no matching notes\n"),
            Ok(hits) => print_hits(&hits, *show_citations),
            Err(err) => eprintln!("search failed: {err:#}\n"),
        },
    }

    ControlFlow::Continue(())
}

fn print_hits(hits: &[Hit], show_citations: bool) {
    for hit in hits {
        if show_citations {
            println!(
                "- {} (chunk={}, score={:.3})",
                hit.source, hit.chunk_sequence, hit.score
            );
        }
        println!("{}\n", hit.text);
    }
}
