//! Chapter export: markdown files and a zip pack of approved chapters.

use std::io::Write;

use crate::error::Result;
use crate::text::safe_title;
use crate::types::Chapter;

/// File name for one exported chapter: `{chapter_index:03}-{safe_title}.md`.
#[must_use]
pub fn chapter_file_name(chapter: &Chapter) -> String {
    format!(
        "{:03}-{}.md",
        chapter.chapter_index(),
        safe_title(&chapter.title)
    )
}

/// Markdown rendering of one chapter.
#[must_use]
pub fn chapter_markdown(chapter: &Chapter) -> String {
    format!(
        "# Chapitre {} — {}\n\n{}\n",
        chapter.chapter_index(),
        chapter.title,
        chapter.content.trim()
    )
}

/// Zip pack of the given chapters, one markdown file each.
pub fn export_zip(chapters: &[Chapter]) -> Result<Vec<u8>> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    {
        let mut archive = zip::ZipWriter::new(&mut buffer);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for chapter in chapters {
            archive
                .start_file(chapter_file_name(chapter), options)
                .map_err(|err| crate::error::Error::InvalidInput(err.to_string()))?;
            archive.write_all(chapter_markdown(chapter).as_bytes())?;
        }
        archive
            .finish()
            .map_err(|err| crate::error::Error::InvalidInput(err.to_string()))?;
    }
    Ok(buffer.into_inner())
}
