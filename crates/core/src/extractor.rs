use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    /// 1-based page number.
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    /// Returns the text of every page that has any, in page order.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        page = page_no,
                        %error,
                        "skipping unreadable page"
                    );
                    continue;
                }
            };

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(non_empty_pages(pages))
    }
}

pub fn non_empty_pages(pages: Vec<PageText>) -> Vec<PageText> {
    pages
        .into_iter()
        .filter_map(|page| {
            let text = page.text.trim();
            if text.is_empty() {
                None
            } else {
                Some(PageText {
                    number: page.number,
                    text: text.to_string(),
                })
            }
        })
        .collect()
}

/// Writes a PDF with one Courier text line per page; empty strings give blank pages.
#[cfg(test)]
pub(crate) fn write_test_pdf(
    path: &Path,
    pages: &[&str],
) -> Result<(), Box<dyn std::error::Error>> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = document.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let operations = if text.is_empty() {
            Vec::new()
        } else {
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]
        };
        let content = Content { operations }.encode()?;
        let content_id = document.add_object(Stream::new(dictionary! {}, content));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);
    document.save(path)?;
    Ok(())
}
