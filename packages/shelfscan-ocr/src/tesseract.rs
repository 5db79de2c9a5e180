//! OCR backend that shells out to the `tesseract` executable and parses its TSV output.
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::engine::{OcrEngine, OcrError, OcrInput, OcrOutput, PageLayout};
use crate::region::{BoundingBox, TextRegion};

/// Word level in Tesseract's TSV output.
const TSV_WORD_LEVEL: &str = "5";

pub struct TesseractEngine {
    program: PathBuf,
    language: String,
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self::with_program("tesseract")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            language: "eng".to_string(),
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    fn command(&self, source: &str, layout: PageLayout) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(source)
            .arg("stdout")
            .args(["-l", &self.language])
            .args(["--psm", &layout.psm().to_string()])
            .arg("tsv")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn build_output(regions: Vec<TextRegion>, lines: Vec<String>) -> OcrOutput {
    OcrOutput {
        text: lines.join("\n"),
        regions,
    }
}

/// Parses `tesseract ... tsv` output into word regions and line strings.
///
/// Columns: level, page, block, par, line, word, left, top, width, height, conf, text.
pub fn parse_tsv(tsv: &str) -> OcrOutput {
    let mut regions = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current_line: Option<(String, String, String)> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != TSV_WORD_LEVEL {
            continue;
        }
        let text = cols[11].trim();
        let confidence: f32 = cols[10].parse().unwrap_or(-1.0);
        if text.is_empty() || confidence < 0.0 {
            continue;
        }

        let line_key = (cols[2].to_string(), cols[3].to_string(), cols[4].to_string());
        if current_line.as_ref() != Some(&line_key) {
            lines.push(String::new());
            current_line = Some(line_key);
        }
        if let Some(line) = lines.last_mut() {
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(text);
        }

        let number = |i: usize| cols[i].parse::<f32>().ok();
        let bounding_box = match (number(6), number(7), number(8), number(9)) {
            (Some(x), Some(y), Some(width), Some(height)) => Some(BoundingBox {
                x,
                y,
                width,
                height,
            }),
            _ => None,
        };

        regions.push(TextRegion {
            text: text.to_string(),
            bounding_box,
            confidence: Some((confidence / 100.0).clamp(0.0, 1.0)),
        });
    }

    build_output(regions, lines)
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, input: &OcrInput, layout: PageLayout) -> Result<OcrOutput, OcrError> {
        let output = match input {
            OcrInput::FilePath(path) => {
                let source = path
                    .to_str()
                    .ok_or_else(|| OcrError::InvalidInput(format!("non UTF-8 path {}", path.display())))?;
                self.command(source, layout).stdin(Stdio::null()).output().await?
            }
            OcrInput::Bytes(data) => {
                if data.is_empty() {
                    return Err(OcrError::InvalidInput("empty image buffer".to_string()));
                }
                let mut child = self.command("stdin", layout).stdin(Stdio::piped()).spawn()?;
                if let Some(mut stdin) = child.stdin.take() {
                    let data = data.clone();
                    tokio::spawn(async move {
                        if let Err(e) = stdin.write_all(&data).await {
                            debug!("tesseract stdin closed early: {}", e);
                        }
                    });
                }
                child.wait_with_output().await?
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::EngineError(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(parse_tsv(&tsv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t300\t200\t-1\t
4\t1\t1\t1\t1\t0\t10\t12\t180\t30\t-1\t
5\t1\t1\t1\t1\t1\t10\t12\t90\t30\t96.5\tHEINEKEN
5\t1\t1\t1\t1\t2\t110\t12\t80\t30\t88.0\tLAGER
5\t1\t1\t1\t2\t1\t10\t60\t60\t20\t71.2\t350ML
5\t1\t1\t1\t2\t2\t80\t60\t10\t20\t-1\t
";

    #[test]
    fn test_parse_tsv_words_and_lines() {
        let output = parse_tsv(SAMPLE_TSV);
        assert_eq!(output.text, "HEINEKEN LAGER\n350ML");
        assert_eq!(output.regions.len(), 3);

        let first = &output.regions[0];
        assert_eq!(first.text, "HEINEKEN");
        assert_eq!(
            first.bounding_box,
            Some(BoundingBox {
                x: 10.0,
                y: 12.0,
                width: 90.0,
                height: 30.0
            })
        );
        assert!((first.confidence.unwrap() - 0.965).abs() < 1e-4);
    }

    #[test]
    fn test_parse_tsv_empty() {
        let output = parse_tsv("");
        assert!(output.text.is_empty());
        assert!(output.regions.is_empty());
    }

    #[test]
    fn test_psm_codes() {
        assert_eq!(PageLayout::SingleBlock.psm(), 6);
        assert_eq!(PageLayout::SparseText.psm(), 11);
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let engine = TesseractEngine::with_program("/nonexistent/tesseract-binary");
        let input = OcrInput::Bytes(vec![0u8; 4]);
        let result = engine.recognize(&input, PageLayout::SingleBlock).await;
        assert!(matches!(result, Err(OcrError::Io(_))));
    }

    #[tokio::test]
    async fn test_empty_bytes_rejected() {
        let engine = TesseractEngine::new();
        let result = engine
            .recognize(&OcrInput::Bytes(Vec::new()), PageLayout::Auto)
            .await;
        assert!(matches!(result, Err(OcrError::InvalidInput(_))));
    }
}
