use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_200,
            overlap_chars: 120,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than max {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits plain text into segments for embedding.
///
/// Paragraphs are separated by blank lines and packed together while they fit
/// in `max_chars`. A paragraph longer than that is cut into windows that
/// overlap by `overlap_chars`. Blank input yields no segments.
pub fn split_segments(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let paragraphs = split_paragraphs(text);
    let mut segments = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if paragraph.chars().count() > config.max_chars {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            segments.extend(window(&paragraph, config));
            continue;
        }

        if current.is_empty() {
            current = paragraph;
            continue;
        }

        if current.chars().count() + paragraph.chars().count() + 2 <= config.max_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
        } else {
            segments.push(std::mem::replace(&mut current, paragraph));
        }
    }

    if !current.is_empty() {
        segments.push(current);
    }

    Ok(segments)
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !lines.is_empty() {
                paragraphs.push(normalize_whitespace(&lines.join(" ")));
                lines.clear();
            }
        } else {
            lines.push(line);
        }
    }

    if !lines.is_empty() {
        paragraphs.push(normalize_whitespace(&lines.join(" ")));
    }

    paragraphs.retain(|paragraph| !paragraph.is_empty());
    paragraphs
}

fn window(paragraph: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = paragraph.chars().collect();
    let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.max_chars).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim().to_string();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    pieces
}
