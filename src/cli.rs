use clap::Parser;
use novel_reel::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

/// Turns chapter breakdowns into narrated, subtitled videos.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// One chapter breakdown (`*.json`) to render. Without it every
    /// configured chapter is rendered and the movie is assembled.
    pub chapter: Option<PathBuf>,

    /// Only assemble the complete movie from rendered chapters.
    #[arg(long, visible_alias = "complete", conflicts_with_all = ["chapter", "breakdown"])]
    pub movie: bool,

    /// Ask the LLM for breakdowns of split chapter texts.
    #[arg(long, conflicts_with = "chapter")]
    pub breakdown: bool,

    /// Settings file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Everything,
    Chapter(PathBuf),
    Movie,
    Breakdown,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        if self.movie {
            Mode::Movie
        } else if self.breakdown {
            Mode::Breakdown
        } else if let Some(path) = &self.chapter {
            Mode::Chapter(path.clone())
        } else {
            Mode::Everything
        }
    }
}
