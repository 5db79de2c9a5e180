mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ab_glyph::FontVec;
use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use cli::{Args, Commands, RunOptions};
use image::DynamicImage;
use log::warn;
use shelfscan::annotate::load_font;
use shelfscan::brand::{BrandDictionary, BrandMatcher, CharOverlapMatcher, SubstringMatcher};
use shelfscan::report::{render_summary, write_run, RunReport};
use shelfscan::{load_image, CommandDetector, Pipeline, PipelineConfig, TesseractEngine, TextValidator};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Detector/OCR handles and settings shared by every image of one invocation.
struct Session {
  pipeline: Pipeline,
  presets: Vec<PipelineConfig>,
  font: Option<FontVec>,
  options: RunOptions,
}

impl Session {
  fn new(options: &RunOptions, presets: Vec<PipelineConfig>) -> Result<Self> {
    let program = options
      .detector
      .as_ref()
      .context("No detector configured; pass --detector or set SHELFSCAN_DETECTOR")?;
    let first = presets.first().context("No pipeline configuration to run")?;
    let detector = CommandDetector::new(program)
      .args(options.detector_args.iter().cloned())
      .timeout(Duration::from_secs(first.detection.timeout_secs));
    let mut pipeline = Pipeline::new(Arc::new(detector));

    if presets.iter().any(|config| config.ocr.enabled) {
      let dictionary = match &options.brands {
        Some(path) => BrandDictionary::from_json_file(path)?,
        None => BrandDictionary::builtin(),
      };
      let matcher: Arc<dyn BrandMatcher> = if options.fuzzy_brands {
        Arc::new(CharOverlapMatcher::default())
      } else {
        Arc::new(SubstringMatcher)
      };
      let engine = TesseractEngine::with_program(&options.tesseract).language(options.lang.clone());
      pipeline = pipeline.with_validator(TextValidator::new(Arc::new(engine), matcher, Arc::new(dictionary)));
    }

    let font = match &options.font {
      Some(path) => Some(load_font(path)?),
      None => None,
    };

    Ok(Self {
      pipeline,
      presets,
      font,
      options: options.clone(),
    })
  }

  async fn process(&self, path: &Path, image: &DynamicImage) -> Result<()> {
    if self.options.verbose() {
      println!("Processing {}", path.display());
    }
    let result = self.pipeline.run_with_presets(image, &self.presets).await?;
    let run_dir = write_run(&self.options.output_dir, path, image, &result, self.font.as_ref())?;

    if self.options.json {
      println!("{}", RunReport::new(path, &result, Local::now()).to_json()?);
    } else if !self.options.quiet {
      print!("{}", render_summary(path, &result));
      println!("Saved to {}", run_dir.display());
    }
    Ok(())
  }
}

async fn detect(path: &Path, options: &RunOptions) -> Result<()> {
  let presets = options.presets()?;
  let image = load_image(path)?;
  let session = Session::new(options, presets)?;
  session.process(path, &image).await
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

async fn batch(dir: &Path, options: &RunOptions) -> Result<()> {
  let session = Session::new(options, options.presets()?)?;

  let mut images: Vec<_> = WalkDir::new(dir)
    .into_iter()
    .filter_map(|entry| entry.ok())
    .filter(|entry| entry.file_type().is_file() && is_image(entry.path()))
    .map(|entry| entry.into_path())
    .collect();
  images.sort();

  let mut processed = 0;
  let mut skipped = 0;
  for path in &images {
    let image = match load_image(path) {
      Ok(image) => image,
      Err(e) => {
        warn!("skipping {}: {}", path.display(), e);
        eprintln!("Skipping {}: {}", path.display(), e);
        skipped += 1;
        continue;
      }
    };
    if let Err(e) = session.process(path, &image).await {
      warn!("skipping {}: {:#}", path.display(), e);
      eprintln!("Skipping {}: {:#}", path.display(), e);
      skipped += 1;
      continue;
    }
    processed += 1;
  }

  if options.verbose() {
    println!("Processed {} images, skipped {}", processed, skipped);
  }
  Ok(())
}

fn print_presets() -> Result<()> {
  let json = serde_json::to_string_pretty(&PipelineConfig::presets()).context("Failed to serialize presets")?;
  println!("{}", json);
  Ok(())
}

#[tokio::main]
async fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let args = Args::parse();

  let outcome = match args.command {
    Commands::Version => {
      println!("shelfscan {}", env!("CARGO_PKG_VERSION"));
      Ok(())
    }
    Commands::Presets => print_presets(),
    Commands::Detect { image, options } => detect(&image, &options).await,
    Commands::Batch { dir, options } => batch(&dir, &options).await,
  };

  if let Err(e) = outcome {
    eprintln!("Error: {:#}", e);
    std::process::exit(1);
  }
}
