use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Semantic search over a local notes directory", long_about = None)]
pub struct Args {
    /// Application directory holding config.yaml and the index.
    /// Overrides RAG_NOTES_HOME.
    #[clap(long, global = true)]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Retrieve the notes most similar to a query
    Search {
        query: String,

        /// Update the index before searching
        #[clap(long, default_value = "false")]
        reindex: bool,

        /// Maximum number of results (defaults to retrieval.top_k)
        #[clap(short = 'k', long, value_parser = clap::value_parser!(u16).range(1..=50))]
        top_k: Option<u16>,

        /// Minimum similarity score, 0.0 to 1.0 (defaults to retrieval.min_score)
        #[clap(short, long, value_parser = parse_min_score)]
        min_score: Option<f32>,

        /// Print results as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Bring the index in line with the notes directory
    Reindex {
        /// Re-embed every note instead of only new and changed ones
        #[clap(long, default_value = "false")]
        full: bool,
    },

    /// List indexed note files
    Sources {},

    /// Show index status
    Status {
        /// Print status as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },

    /// Interactive search session
    Repl {},
}

fn parse_min_score(value: &str) -> Result<f32, String> {
    let score: f32 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number"))?;
    if !(0.0..=1.0).contains(&score) {
        return Err(format!("{score} is not in 0.0..=1.0"));
    }
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search() {
        let args = Args::parse_from(["rag-notes", "search", "rust traits", "-k", "3", "--json"]);

        match args.command {
            Command::Search {
                query,
                reindex,
                top_k,
                min_score,
                json,
            } => {
                assert_eq!(query, "rust traits");
                assert!(!reindex);
                assert_eq!(top_k, Some(3));
                assert_eq!(min_score, None);
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_base_dir() {
        let args = Args::parse_from(["rag-notes", "reindex", "--full", "--base-dir", "/tmp/x"]);

        assert_eq!(args.base_dir, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(args.command, Command::Reindex { full: true }));
    }

    #[test]
    fn test_min_score_range() {
        let args = Args::parse_from(["rag-notes", "search", "q", "-m", "0.3"]);
        assert!(matches!(
            args.command,
            Command::Search {
                min_score: Some(score),
                ..
            } if score == 0.3
        ));

        assert!(Args::try_parse_from(["rag-notes", "search", "q", "-m", "1.5"]).is_err());
        assert!(Args::try_parse_from(["rag-notes", "search", "q", "--min-score", "-0.1"]).is_err());
        assert!(Args::try_parse_from(["rag-notes", "search", "q", "-m", "high"]).is_err());
    }

    #[test]
    fn test_top_k_out_of_range() {
        assert!(Args::try_parse_from(["rag-notes", "search", "q", "-k", "0"]).is_err());
        assert!(Args::try_parse_from(["rag-notes", "search", "q", "-k", "51"]).is_err());
    }
}
