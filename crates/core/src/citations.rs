use regex::Regex;

const HR_PATTERN: &str = r"(?i)<hr\s*/?>";
const CITATION_PATTERN: &str = r"(?s)<li>\s*(.*?)\s*[—–-]\s*\[sources:\s*doc\s+([^\s\]]+)\s+chunk\s+(-?\d+)\s*\]\s*[—–-]\s*Confidence:\s*(\d+)\s*%\s*</li>";
const TAG_PATTERN: &str = r"<[^>]*>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    /// The document anchor exactly as the model emitted it.
    pub link_html: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Model-reported, not clamped.
    pub confidence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone)]
pub struct CitationParser {
    hr: Regex,
    citation: Regex,
    tag: Regex,
}

impl CitationParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            hr: Regex::new(HR_PATTERN)?,
            citation: Regex::new(CITATION_PATTERN)?,
            tag: Regex::new(TAG_PATTERN)?,
        })
    }

    /// Everything before the first `<hr/>` is the answer. Replies without a
    /// rule are kept whole and yield no citations.
    pub fn parse(&self, reply: &str) -> ParsedAnswer {
        let Some(rule) = self.hr.find(reply) else {
            return ParsedAnswer {
                answer: reply.trim().to_string(),
                citations: Vec::new(),
            };
        };

        let citations = self
            .citation
            .captures_iter(&reply[rule.end()..])
            .filter_map(|captures| {
                Some(Citation {
                    link_html: captures.get(1)?.as_str().trim().to_string(),
                    document_id: captures.get(2)?.as_str().to_string(),
                    chunk_index: captures.get(3)?.as_str().parse().ok()?,
                    confidence: captures.get(4)?.as_str().parse().ok()?,
                })
            })
            .collect();

        ParsedAnswer {
            answer: reply[..rule.start()].trim().to_string(),
            citations,
        }
    }

    pub fn link_text(&self, citation: &Citation) -> String {
        self.tag
            .replace_all(&citation.link_html, "")
            .trim()
            .to_string()
    }
}

pub fn parse_answer(reply: &str) -> Result<ParsedAnswer, regex::Error> {
    Ok(CitationParser::new()?.parse(reply))
}
