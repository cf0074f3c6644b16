use crate::error::IngestError;
use crate::ingest::digest_file;
use crate::models::Document;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

const UPLOAD_DIR: &str = "documents";

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub name: String,
    /// Path relative to the media root, always `/`-separated.
    pub relative_path: String,
    pub size: i64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    base_url: Url,
}

impl MediaStore {
    pub fn new(root: impl AsRef<Path>, base_url: Url) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            base_url,
        }
    }

    pub fn save(&self, source: &Path) -> Result<StoredFile, IngestError> {
        let name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(source.display().to_string()))?
            .to_string();

        let relative_path = format!(
            "{UPLOAD_DIR}/{}-{}",
            Uuid::new_v4().simple(),
            sanitize_file_name(&name)
        );
        let target = self.path_for(&relative_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let size = fs::copy(source, &target)?;
        let sha256 = digest_file(&target)?;
        debug!(source = %source.display(), target = %target.display(), size, "stored upload");

        Ok(StoredFile {
            name,
            relative_path,
            size: size as i64,
            sha256,
        })
    }

    pub fn path_for(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    pub fn url_for(&self, relative_path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(relative_path)
    }

    /// Anchor tag pointing at the document's file, or its bare name when no
    /// URL can be formed.
    pub fn html_link(&self, document: &Document) -> String {
        match self.url_for(&document.file_path) {
            Ok(url) => format!(
                r#"<a href="{}" target="_blank">{}</a>"#,
                escape_html(url.as_str()),
                escape_html(&document.name)
            ),
            Err(error) => {
                warn!(file_path = %document.file_path, %error, "cannot build document url");
                escape_html(&document.name)
            }
        }
    }

    pub fn remove(&self, relative_path: &str) -> Result<(), IngestError> {
        match fs::remove_file(self.path_for(relative_path)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches(|ch| ch == '.' || ch == '_').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn store(root: &Path) -> MediaStore {
        MediaStore::new(root, Url::parse("http://localhost:8000/media/").unwrap())
    }

    #[test]
    fn save_copies_under_documents() -> Result<(), Box<dyn std::error::Error>> {
        let source_dir = tempdir()?;
        let media_dir = tempdir()?;
        let source = source_dir.path().join("Q3 report.pdf");
        fs::write(&source, b"%PDF-1.4 fake")?;

        let stored = store(media_dir.path()).save(&source)?;

        assert_eq!(stored.name, "Q3 report.pdf");
        assert!(stored.relative_path.starts_with("documents/"));
        assert!(stored.relative_path.ends_with("-Q3_report.pdf"));
        assert_eq!(stored.size, 13);
        assert_eq!(stored.sha256.len(), 64);
        assert!(store(media_dir.path()).path_for(&stored.relative_path).is_file());
        Ok(())
    }

    #[test]
    fn html_link_escapes_the_name() {
        let media = store(Path::new("/srv/media"));
        let document = Document {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            name: "R&D <draft>.pdf".to_string(),
            file_path: "documents/abc-R_D__draft_.pdf".to_string(),
            size: None,
            content_type: None,
            metadata: None,
            created_at: Utc::now(),
        };

        assert_eq!(
            media.html_link(&document),
            r#"<a href="http://localhost:8000/media/documents/abc-R_D__draft_.pdf" target="_blank">R&amp;D &lt;draft&gt;.pdf</a>"#
        );
    }

    #[test]
    fn removing_a_missing_file_is_fine() -> Result<(), Box<dyn std::error::Error>> {
        let media_dir = tempdir()?;
        store(media_dir.path()).remove("documents/nothing.pdf")?;
        Ok(())
    }

    #[test]
    fn degenerate_names_get_a_placeholder() {
        assert_eq!(sanitize_file_name("..."), "upload");
        assert_eq!(sanitize_file_name("notes.md"), "notes.md");
    }
}
