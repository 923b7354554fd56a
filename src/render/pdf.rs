//! Minimal HTML-to-PDF renderer built on lopdf.
//!
//! Only the structure our templates produce is understood: headings become
//! bold lines, block elements and line breaks become new lines, everything
//! else is flowed as plain text onto A4 pages with the standard Helvetica
//! fonts. Content streams are left uncompressed.

use super::DocumentRenderer;
use crate::error::AppError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use regex::Regex;
use std::sync::OnceLock;

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 56;

/// Marks a heading line in the intermediate text.
const HEADING_MARK: char = '\u{1}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Heading,
    Body,
}

impl Style {
    fn font(self) -> &'static str {
        match self {
            Self::Heading => "F2",
            Self::Body => "F1",
        }
    }

    fn size(self) -> i64 {
        match self {
            Self::Heading => 15,
            Self::Body => 11,
        }
    }

    fn leading(self) -> i64 {
        match self {
            Self::Heading => 22,
            Self::Body => 15,
        }
    }

    /// Approximate characters per line for Helvetica at this size.
    fn line_chars(self) -> usize {
        let usable = (PAGE_WIDTH - 2 * MARGIN) as usize;
        // Average Helvetica glyph is roughly half an em wide.
        usable * 2 / self.size() as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Line {
    style: Style,
    text: String,
}

/// Renders our HTML templates to PDF bytes.
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    title: String,
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self {
            title: "Gestión de Riesgos ISO 31000".to_string(),
        }
    }
}

impl PdfRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentRenderer for PdfRenderer {
    fn render(&self, html: &str) -> Result<Vec<u8>, AppError> {
        let lines = layout(&html_to_text(html));
        let pages = paginate(&lines);
        build_pdf(&pages, &self.title)
    }
}

fn regexes() -> &'static [(Regex, &'static str); 4] {
    static RE: OnceLock<[(Regex, &'static str); 4]> = OnceLock::new();
    RE.get_or_init(|| {
        let re = |p: &str| Regex::new(p).unwrap_or_else(|e| panic!("invalid pattern {p}: {e}"));
        [
            (re(r"(?is)<head\b.*?</head>|<(?:style|script)\b.*?</(?:style|script)>"), ""),
            (re(r"(?i)<br\s*/?>"), "\n"),
            (
                re(r"(?i)</?(?:p|div|li|ul|ol|tr|table|section|article|body|html)\b[^>]*>"),
                "\n",
            ),
            (re(r"(?s)<!--.*?-->|<![^>]*>"), ""),
        ]
    })
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<h[1-6]\b[^>]*>(.*?)</h[1-6]\s*>")
            .unwrap_or_else(|e| panic!("invalid heading pattern: {e}"))
    })
}

/// Only spans that open like a tag; a bare `<` followed by a space or digit stays text.
fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"</?[A-Za-z][^<>]*>").unwrap_or_else(|e| panic!("invalid tag pattern: {e}"))
    })
}

/// Reduce markup to text lines; heading lines start with [`HEADING_MARK`].
fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();
    for (re, replacement) in regexes() {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    text = heading_regex()
        .replace_all(&text, |caps: &regex::Captures| {
            let inner = tag_regex().replace_all(&caps[1], "");
            format!("\n{}{}\n", HEADING_MARK, inner.split_whitespace().collect::<Vec<_>>().join(" "))
        })
        .into_owned();
    let text = tag_regex().replace_all(&text, "");
    decode_entities(&text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Split text into styled, wrapped lines. Blank input lines are kept as paragraph gaps.
fn layout(text: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut last_blank = true;

    for raw in text.lines() {
        let (style, content) = match raw.strip_prefix(HEADING_MARK) {
            Some(rest) => (Style::Heading, rest),
            None => (Style::Body, raw),
        };
        let content = content.trim();

        if content.is_empty() {
            if !last_blank {
                lines.push(Line {
                    style: Style::Body,
                    text: String::new(),
                });
                last_blank = true;
            }
            continue;
        }

        for wrapped in wrap(content, style.line_chars()) {
            lines.push(Line {
                style,
                text: wrapped,
            });
        }
        last_blank = false;
    }

    while lines.last().map(|l| l.text.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines
}

/// Greedy word wrap; words longer than a line are hard-split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if current_len > 0 {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }
            out.push(word.drain(..width).collect());
        }
        if word.is_empty() {
            continue;
        }

        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > width {
            out.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }

    if current_len > 0 {
        out.push(current);
    }
    out
}

fn paginate(lines: &[Line]) -> Vec<Vec<(Line, i64)>> {
    let top = PAGE_HEIGHT - MARGIN;
    let mut pages = vec![Vec::new()];
    let mut y = top;

    for line in lines {
        let step = line.style.leading();
        if y - step < MARGIN {
            pages.push(Vec::new());
            y = top;
            // Don't start a page with a gap.
            if line.text.is_empty() {
                continue;
            }
        }
        y -= step;
        if let Some(page) = pages.last_mut() {
            page.push((line.clone(), y));
        }
    }
    pages
}

/// Encode text for a WinAnsi-encoded standard font.
fn to_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => b'\'',
            '\u{201C}' | '\u{201D}' => b'"',
            '\u{2013}' | '\u{2014}' => b'-',
            '\u{2022}' => 0x95,
            '\u{20AC}' => 0x80,
            c if (c as u32) < 0x20 => b' ',
            c if (c as u32) <= 0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

fn font(doc: &mut Document, base: &str) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    })
}

fn build_pdf(pages: &[Vec<(Line, i64)>], title: &str) -> Result<Vec<u8>, AppError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular = font(&mut doc, "Helvetica");
    let bold = font(&mut doc, "Helvetica-Bold");
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let mut operations = vec![Operation::new("BT", vec![])];
        for (line, y) in page.iter().filter(|(l, _)| !l.text.is_empty()) {
            operations.push(Operation::new(
                "Tf",
                vec![line.style.font().into(), line.style.size().into()],
            ));
            operations.push(Operation::new(
                "Tm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), MARGIN.into(), (*y).into()],
            ));
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(to_win_ansi(&line.text))],
            ));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations }
            .encode()
            .map_err(|e| AppError::Render(format!("failed to encode page content: {}", e)))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(to_win_ansi(title)),
        "Producer" => Object::string_literal(concat!("riskcase ", env!("CARGO_PKG_VERSION"))),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| AppError::Render(format!("failed to write PDF: {}", e)))?;
    Ok(bytes)
}
