use crate::error::IngestError;
use crate::models::Document;
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use lopdf::Document as PdfDocument;
use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
    Csv,
    Xlsx,
}

impl FileType {
    pub const ALL: [FileType; 5] = [
        FileType::Pdf,
        FileType::Docx,
        FileType::Txt,
        FileType::Csv,
        FileType::Xlsx,
    ];

    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|file_type| file_type.extension() == extension)
    }

    /// Lowercase extension without the dot, as stored in `file_type`.
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
            FileType::Csv => "csv",
            FileType::Xlsx => "xlsx",
        }
    }
}

/// Loads one supported file into documents tagged with `source_file` (the
/// file name) and `file_type`.
pub fn load_file(path: &Path) -> Result<Vec<Document>, IngestError> {
    let file_type = FileType::from_path(path)
        .ok_or_else(|| IngestError::UnsupportedFormat(path.display().to_string()))?;
    let source_file = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    let extension = file_type.extension();
    let documents = match file_type {
        FileType::Pdf => extract_pdf_pages(path)?
            .into_iter()
            .map(|(page, text)| {
                Document::new(text, source_file, extension).with_meta("page", i64::from(page))
            })
            .collect(),
        FileType::Docx => non_empty(extract_docx_text(path)?)
            .map(|text| Document::new(text, source_file, extension))
            .into_iter()
            .collect(),
        FileType::Txt => non_empty(String::from_utf8_lossy(&fs::read(path)?).into_owned())
            .map(|text| Document::new(text, source_file, extension))
            .into_iter()
            .collect(),
        FileType::Csv => extract_csv_rows(path)?
            .into_iter()
            .map(|(row, text)| {
                Document::new(text, source_file, extension).with_meta("row", row as i64)
            })
            .collect(),
        FileType::Xlsx => extract_xlsx_sheets(path)?
            .into_iter()
            .map(|(sheet, text)| {
                Document::new(text, source_file, extension).with_meta("sheet", sheet)
            })
            .collect(),
    };

    Ok(documents)
}

fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn extract_pdf_pages(path: &Path) -> Result<Vec<(u32, String)>, IngestError> {
    let document =
        PdfDocument::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| IngestError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push((page_no, text));
        }
    }

    if pages.is_empty() {
        return Err(IngestError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }

    Ok(pages)
}

/// One entry per data row, rendered as `header: value` lines.
fn extract_csv_rows(path: &Path) -> Result<Vec<(usize, String)>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let text = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| format!("{}: {}", header.trim(), value.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(text) = non_empty(text) {
            rows.push((row, text));
        }
    }

    Ok(rows)
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<String>, IngestError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(error) => return Err(error.into()),
    };
    let mut contents = String::new();
    entry.read_to_string(&mut contents)?;
    Ok(Some(contents))
}

/// Text of `word/document.xml`: runs inside `w:t`, one line per paragraph,
/// with tabs and breaks kept.
fn extract_docx_text(path: &Path) -> Result<String, IngestError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let xml = read_entry(&mut archive, "word/document.xml")?.ok_or_else(|| {
        IngestError::UnsupportedFormat(format!("{} has no word/document.xml", path.display()))
    })?;

    let mut reader = XmlReader::from_str(&xml);
    let mut text = String::new();
    let mut in_run_text = false;
    loop {
        match reader.read_event()? {
            Event::Start(element) if element.name().as_ref() == b"w:t" => in_run_text = true,
            Event::End(element) => match element.name().as_ref() {
                b"w:t" => in_run_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(element) => match element.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" => text.push('\n'),
                _ => {}
            },
            Event::Text(run) if in_run_text => text.push_str(&run.unescape()?),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(text.trim().to_string())
}

/// One entry per worksheet, keyed by the workbook's sheet name: rows on
/// lines, non-empty cells separated by tabs.
fn extract_xlsx_sheets(path: &Path) -> Result<Vec<(String, String)>, IngestError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let sheet_names: Vec<String> = workbook
        .sheet_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let mut sheets = Vec::new();
    for sheet_name in sheet_names {
        let range = workbook.worksheet_range(&sheet_name)?;
        if let Some(text) = non_empty(range_text(&range)) {
            sheets.push((sheet_name, text));
        }
    }

    Ok(sheets)
}

fn range_text(range: &Range<Data>) -> String {
    range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| cell.to_string().trim().to_string())
                .filter(|value| !value.is_empty())
                .collect::<Vec<_>>()
                .join("\t")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetadataValue, FILE_TYPE_KEY, SOURCE_FILE_KEY};
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn write_zip(
        path: &Path,
        entries: &[(&str, &str)],
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut writer = ZipWriter::new(File::create(path)?);
        for (name, contents) in entries {
            writer.start_file(*name, FileOptions::default())?;
            writer.write_all(contents.as_bytes())?;
        }
        writer.finish()?;
        Ok(())
    }

    #[test]
    fn file_type_is_case_insensitive() {
        assert_eq!(FileType::from_path(Path::new("a/B.PDF")), Some(FileType::Pdf));
        assert_eq!(FileType::from_path(Path::new("notes.Txt")), Some(FileType::Txt));
        assert_eq!(FileType::from_path(Path::new("image.png")), None);
        assert_eq!(FileType::from_path(Path::new("README")), None);
    }

    #[test]
    fn text_file_is_one_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("Notes.TXT");
        fs::write(&path, "line one\nline two")?;

        let documents = load_file(&path)?;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "line one\nline two");
        assert_eq!(documents[0].source_file(), Some("Notes.TXT"));
        assert_eq!(
            documents[0].metadata.get(FILE_TYPE_KEY).and_then(|v| v.as_str()),
            Some("txt")
        );
        Ok(())
    }

    #[test]
    fn empty_text_file_yields_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("blank.txt");
        fs::write(&path, "  \n ")?;
        assert!(load_file(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn csv_rows_become_documents() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("parts.csv");
        fs::write(&path, "part,torque\nbolt, 12 Nm\nnut,8 Nm\n")?;

        let documents = load_file(&path)?;
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].text, "part: bolt\ntorque: 12 Nm");
        assert_eq!(documents[1].metadata.get("row"), Some(&MetadataValue::Int(1)));
        assert_eq!(
            documents[1].metadata.get(SOURCE_FILE_KEY).and_then(|v| v.as_str()),
            Some("parts.csv")
        );
        Ok(())
    }

    #[test]
    fn docx_paragraphs_are_extracted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.docx");
        write_zip(
            &path,
            &[(
                "word/document.xml",
                concat!(
                    r#"<w:document><w:body>"#,
                    r#"<w:p><w:r><w:t>Check &amp; clean</w:t></w:r></w:p>"#,
                    r#"<w:p><w:r><w:instrText>PAGE</w:instrText><w:t>the filter</w:t>"#,
                    r#"<w:tab/><w:t xml:space="preserve">costs &#8364;5</w:t></w:r></w:p>"#,
                    r#"<w:p><w:r><w:t>Torque&#10;12 Nm</w:t></w:r></w:p>"#,
                    r#"</w:body></w:document>"#,
                ),
            )],
        )?;

        let documents = load_file(&path)?;
        assert_eq!(documents.len(), 1);
        assert_eq!(
            documents[0].text,
            "Check & clean\nthe filter\tcosts \u{20ac}5\nTorque\n12 Nm"
        );
        Ok(())
    }

    const CONTENT_TYPES: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        r#"<Default Extension="xml" ContentType="application/xml"/></Types>"#,
    );

    const WORKBOOK: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
        r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
        r#"<sheets><sheet name="Inventory" sheetId="1" r:id="rId1"/>"#,
        r#"<sheet name="Notes" sheetId="2" r:id="rId2"/></sheets></workbook>"#,
    );

    const WORKBOOK_RELS: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        r#"<Relationship Id="rId1" "#,
        r#"Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" "#,
        r#"Target="worksheets/sheet1.xml"/>"#,
        r#"<Relationship Id="rId2" "#,
        r#"Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" "#,
        r#"Target="worksheets/sheet2.xml"/>"#,
        r#"</Relationships>"#,
    );

    const SHARED_STRINGS: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8"?>"#,
        r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        r#"<si><t>Pump</t></si>"#,
        r#"<si><t>Line1&#10;Line2 &#8364;5</t></si>"#,
        r#"</sst>"#,
    );

    fn workbook_entries<'a>(
        sheet_one: &'a str,
        sheet_two: &'a str,
    ) -> Vec<(&'static str, &'a str)> {
        vec![
            ("[Content_Types].xml", CONTENT_TYPES),
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/sharedStrings.xml", SHARED_STRINGS),
            ("xl/worksheets/sheet1.xml", sheet_one),
            ("xl/worksheets/sheet2.xml", sheet_two),
        ]
    }

    #[test]
    fn xlsx_sheets_use_workbook_names_and_decode_text() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        let path = dir.path().join("book.xlsx");
        let inventory = concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
            r#"<sheetData>"#,
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>"#,
            r#"<row r="2"><c r="A2" t="inlineStr"><is><t>P-100</t></is></c>"#,
            r#"<c r="B2"><v>42</v></c></row>"#,
            r#"</sheetData></worksheet>"#,
        );
        let empty = concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
            r#"<sheetData/></worksheet>"#,
        );
        write_zip(&path, &workbook_entries(inventory, empty))?;

        let documents = load_file(&path)?;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].text, "Pump\tLine1\nLine2 \u{20ac}5\nP-100\t42");
        assert_eq!(
            documents[0].metadata.get("sheet"),
            Some(&MetadataValue::from("Inventory"))
        );
        Ok(())
    }

    #[test]
    fn corrupt_xlsx_is_a_spreadsheet_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.xlsx");
        fs::write(&path, b"PK not really a workbook")?;
        assert!(matches!(load_file(&path), Err(IngestError::Spreadsheet(_))));
        Ok(())
    }

    #[test]
    fn broken_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;
        assert!(matches!(load_file(&path), Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        assert!(matches!(
            load_file(Path::new("photo.jpeg")),
            Err(IngestError::UnsupportedFormat(_))
        ));
    }
}
