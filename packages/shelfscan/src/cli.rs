//! Command line arguments backing the `shelfscan` binary.
use anyhow::Result;
use clap::{Parser, Subcommand};
use shelfscan::{ConfigFile, PipelineConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
  name = "shelfscan",
  about = "Find, read and count beverage products in shelf photographs",
  version
)]
pub struct Args {
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
  /// Print version information
  Version,
  /// Detect products in a single image
  Detect {
    /// Image to process (JPEG, PNG, BMP or WEBP)
    image: PathBuf,

    #[command(flatten)]
    options: RunOptions,
  },
  /// Detect products in every image below a directory
  Batch {
    /// Directory to scan for images
    dir: PathBuf,

    #[command(flatten)]
    options: RunOptions,
  },
  /// Print the default retry presets as JSON
  Presets,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunOptions {
  /// Detector program; receives PNG on stdin and prints JSON detections
  #[arg(long, env = "SHELFSCAN_DETECTOR")]
  pub detector: Option<PathBuf>,

  /// Extra argument passed to the detector program (repeatable)
  #[arg(long = "detector-arg", allow_hyphen_values = true)]
  pub detector_args: Vec<String>,

  /// Pipeline configuration JSON
  #[arg(long, short = 'c')]
  pub config: Option<PathBuf>,

  /// Brand dictionary JSON ({"BRAND": ["VARIANT", ...]})
  #[arg(long)]
  pub brands: Option<PathBuf>,

  /// Use character-overlap brand matching instead of exact substrings
  #[arg(long)]
  pub fuzzy_brands: bool,

  /// Tesseract executable
  #[arg(long, default_value = "tesseract")]
  pub tesseract: PathBuf,

  /// OCR language
  #[arg(long, default_value = "eng")]
  pub lang: String,

  /// Folder receiving one timestamped sub-folder per image
  #[arg(long, short = 'o', default_value = "shelfscan-output")]
  pub output_dir: PathBuf,

  /// TTF/OTF font for box captions
  #[arg(long)]
  pub font: Option<PathBuf>,

  /// Maximum number of reported products
  #[arg(long, short = 'n')]
  pub max_results: Option<usize>,

  /// Minimum detector confidence of a reported product
  #[arg(long)]
  pub min_confidence: Option<f32>,

  /// Skip the OCR cross-check
  #[arg(long)]
  pub no_ocr: bool,

  /// Run only the first preset instead of retrying with looser ones
  #[arg(long)]
  pub no_retry: bool,

  /// Print the result as JSON
  #[arg(long)]
  pub json: bool,

  /// Disable progress output
  #[arg(long)]
  pub quiet: bool,
}

impl RunOptions {
  fn apply_overrides(&self, config: &mut PipelineConfig) {
    if let Some(max_results) = self.max_results {
      config.ranking.max_results = max_results;
    }
    if let Some(min_confidence) = self.min_confidence {
      config.ranking.min_confidence = min_confidence;
    }
    if self.no_ocr {
      config.ocr.enabled = false;
    }
  }

  /// Retry list for this run: the configuration file (if any) with the command
  /// line overrides applied. A single configuration is expanded into derived
  /// presets; a list is used as given. `--no-retry` keeps the first entry.
  pub fn presets(&self) -> Result<Vec<PipelineConfig>> {
    let file = match &self.config {
      Some(path) => ConfigFile::from_json_file(path)?,
      None => ConfigFile::Single(PipelineConfig::default()),
    };
    let mut presets = match file {
      ConfigFile::Single(mut config) => {
        self.apply_overrides(&mut config);
        if self.no_retry {
          vec![config]
        } else {
          config.presets_from()
        }
      }
      ConfigFile::Presets(mut list) => {
        for config in &mut list {
          self.apply_overrides(config);
        }
        if self.no_retry {
          list.truncate(1);
        }
        list
      }
    };
    for config in &mut presets {
      config.validate()?;
    }
    Ok(presets)
  }

  pub fn verbose(&self) -> bool {
    !self.quiet && !self.json
  }
}
