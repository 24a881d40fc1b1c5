//! Plain-text extraction for binary attachments and office documents.
//!
//! PDF goes through `pdf-extract`; the zipped XML formats (docx, pptx, xlsx,
//! odt) are read with `zip` + `quick-xml`. Every entry read is size-bounded
//! so a hostile archive cannot exhaust memory.

use std::io::Read;

use quick_xml::events::Event;

const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

const RUN_TEXT: &[&[u8]] = &[b"t"];
const PARAGRAPH: &[&[u8]] = &[b"p"];
const ODT_TEXT: &[&[u8]] = &[b"p", b"h", b"span", b"a"];
const ODT_PARAGRAPH: &[&[u8]] = &[b"p", b"h"];

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("archive extraction failed: {0}")]
    Archive(String),
    #[error("XML parse failed: {0}")]
    Xml(String),
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml")?;
    xml_text(&xml, RUN_TEXT, PARAGRAPH)
}

pub fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    let mut parts = Vec::with_capacity(slides.len());
    for name in slides {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let text = xml_text(&xml, RUN_TEXT, PARAGRAPH)?;
        if !text.is_empty() {
            parts.push(text);
        }
    }
    Ok(parts.join("\n\n"))
}

pub fn extract_odt(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry_bounded(&mut archive, "content.xml")?;
    xml_text(&xml, ODT_TEXT, ODT_PARAGRAPH)
}

pub fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared = match read_entry_bounded(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => shared_strings(&xml)?,
        // Workbooks with only numeric cells have no shared string table
        Err(_) => Vec::new(),
    };
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut out = Vec::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_entry_bounded(&mut archive, &name)?;
        let cells = sheet_cells(&xml, &shared)?;
        if !cells.is_empty() {
            out.push(cells);
        }
    }
    Ok(out.join("\n\n"))
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Archive(e.to_string()))
}

fn read_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Archive(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Archive(format!(
            "{} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries named `{prefix}{n}.xml`, sorted by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Collect text nodes whose innermost element is one of `text_tags`,
/// separating paragraphs (closing `para_tags`) with a blank line.
fn xml_text(xml: &[u8], text_tags: &[&[u8]], para_tags: &[&[u8]]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut out = String::new();
    let mut paragraph = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(e.local_name().as_ref().to_vec()),
            Ok(Event::End(e)) => {
                stack.pop();
                if para_tags.contains(&e.local_name().as_ref()) {
                    let trimmed = paragraph.trim();
                    if !trimmed.is_empty() {
                        if !out.is_empty() {
                            out.push_str("\n\n");
                        }
                        out.push_str(trimmed);
                    }
                    paragraph.clear();
                }
            }
            Ok(Event::Text(te)) => {
                let inside_text = stack
                    .last()
                    .map(|tag| text_tags.contains(&tag.as_slice()))
                    .unwrap_or(false);
                if inside_text {
                    let text = te.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                    paragraph.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let trimmed = paragraph.trim();
    if !trimmed.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(trimmed);
    }
    Ok(out)
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    let text = te.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut in_v = false;
    let mut shared_cell = false;

    loop {
        if cells.len() >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_v => {
                let raw = te.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                let value = raw.trim();
                if shared_cell {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                        cells.push(s.clone());
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => shared_cell = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = "<?xml version=\"1.0\"?><w:document xmlns:w=\"w\"><w:body>\
            <w:p><w:r><w:t>Board packages</w:t></w:r><w:r><w:t> went out.</w:t></w:r></w:p>\
            <w:p><w:r><w:t>Second line</w:t></w:r></w:p></w:body></w:document>";
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let text = extract_docx(&bytes).unwrap();
        assert_eq!(text, "Board packages went out.\n\nSecond line");
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |t: &str| {
            format!(
                "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>",
                t
            )
        };
        let s2 = slide("second");
        let s10 = slide("tenth");
        let s1 = slide("first");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        assert_eq!(extract_pptx(&bytes).unwrap(), "first\n\nsecond\n\ntenth");
    }

    #[test]
    fn test_odt_spans_join_paragraph() {
        let xml = "<office:document-content xmlns:office=\"o\" xmlns:text=\"t\"><office:body><office:text>\
            <text:h>Memo</text:h><text:p>Gas <text:span>deliveries</text:span> delayed</text:p>\
            </office:text></office:body></office:document-content>";
        let bytes = zip_with(&[("content.xml", xml)]);
        assert_eq!(extract_odt(&bytes).unwrap(), "Memo\n\nGas deliveries delayed");
    }

    #[test]
    fn test_xlsx_shared_and_inline_values() {
        let shared = "<sst><si><t>Volume</t></si><si><t>Price</t></si></sst>";
        let sheet = "<worksheet><sheetData><row>\
            <c t=\"s\"><v>0</v></c><c t=\"s\"><v>1</v></c><c><v>42</v></c>\
            </row></sheetData></worksheet>";
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        assert_eq!(extract_xlsx(&bytes).unwrap(), "Volume Price 42");
    }

    #[test]
    fn test_invalid_inputs_return_errors() {
        assert!(matches!(extract_pdf(b"not a pdf"), Err(ExtractError::Pdf(_))));
        assert!(matches!(
            extract_docx(b"not a zip"),
            Err(ExtractError::Archive(_))
        ));
        let bytes = zip_with(&[("other.xml", "<a/>")]);
        assert!(matches!(extract_docx(&bytes), Err(ExtractError::Archive(_))));
    }
}
