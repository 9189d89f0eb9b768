/// Block layout for the software engine

use crate::Viewport;
use scraper::{ElementRef, Html, Selector};

/// Width of one greeked glyph cell at scale 1
pub const GLYPH_WIDTH: u32 = 8;
/// Height of one text line at scale 1
pub const LINE_HEIGHT: u32 = 8;

const PAGE_MARGIN: u32 = 8;

/// Padding inside a toolbar button
const BUTTON_PADDING: u32 = 6;
/// Horizontal space between toolbar buttons
const BUTTON_GAP: u32 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width as i32 && y < self.y + self.height as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxModel {
    pub margin: u32,
    pub border: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub rect: Rect,
    pub box_model: BoxModel,
}

impl LayoutBox {
    pub fn content_width(&self) -> u32 {
        let total = self.box_model.border + self.box_model.padding;
        self.rect.width.saturating_sub(total * 2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementType {
    Heading,
    Paragraph,
    ListItem,
    /// A link; clicking it navigates to `LayoutNode::href`
    Link,
}

#[derive(Debug, Clone)]
pub struct LayoutNode {
    pub lb: LayoutBox,
    /// Wrapped text, one line per entry
    pub lines: Vec<String>,
    pub elem_type: ElementType,
    pub scale: u32,
    pub href: Option<String>,
    /// The link asks for a new window (`target="_blank"`)
    pub opens_popup: bool,
}

/// Greedy word wrap at `chars_per_line` characters
pub fn wrap_text(text: &str, chars_per_line: usize) -> Vec<String> {
    let limit = chars_per_line.max(1);
    let mut lines = Vec::new();
    let mut cur = String::new();
    for word in text.split_whitespace() {
        let cur_len = cur.chars().count();
        if cur_len > 0 && cur_len + 1 + word.chars().count() > limit {
            lines.push(std::mem::take(&mut cur));
        }
        if !cur.is_empty() {
            cur.push(' ');
        }
        cur.push_str(word);
    }
    if !cur.is_empty() {
        lines.push(cur);
    }
    lines
}

fn classify(el: &ElementRef) -> Option<(ElementType, u32, u32)> {
    // (type, text scale, padding)
    match el.value().name() {
        "h1" => Some((ElementType::Heading, 2, 8)),
        "h2" | "h3" => Some((ElementType::Heading, 2, 4)),
        "p" => Some((ElementType::Paragraph, 1, 6)),
        "li" => Some((ElementType::ListItem, 1, 2)),
        "a" => Some((ElementType::Link, 1, 2)),
        _ => None,
    }
}

fn is_toolbar(el: &ElementRef) -> bool {
    el.value().name() == "nav"
}

/// Lay the links of a `<nav>` out as a row of buttons starting at `y`,
/// wrapping onto further rows when the page is too narrow. Returns the y
/// below the last row.
fn layout_toolbar(nav: ElementRef, y: u32, page_width: u32, nodes: &mut Vec<LayoutNode>) -> u32 {
    let Ok(sel) = Selector::parse("a[href]") else {
        return y;
    };
    let row_h = LINE_HEIGHT + BUTTON_PADDING * 2;
    let right = PAGE_MARGIN + page_width;
    let (mut x, mut row_y) = (PAGE_MARGIN, y);
    let mut placed = false;

    for link in nav.select(&sel) {
        let label = link.text().collect::<Vec<_>>().join(" ");
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        let width = label.chars().count() as u32 * GLYPH_WIDTH + BUTTON_PADDING * 2;
        if placed && x + width > right {
            x = PAGE_MARGIN;
            row_y += row_h + BUTTON_GAP;
        }
        nodes.push(LayoutNode {
            lb: LayoutBox {
                rect: Rect {
                    x: x as i32,
                    y: row_y as i32,
                    width,
                    height: row_h,
                },
                box_model: BoxModel {
                    margin: 6,
                    border: 0,
                    padding: BUTTON_PADDING,
                },
            },
            lines: vec![label.to_string()],
            elem_type: ElementType::Link,
            scale: 1,
            href: link.value().attr("href").map(str::to_string),
            opens_popup: link.value().attr("target") == Some("_blank"),
        });
        x += width + BUTTON_GAP;
        placed = true;
    }

    if placed {
        row_y + row_h + 6
    } else {
        y
    }
}

/// Stack headings, paragraphs, list items and links vertically in document
/// order. Links nested in an already placed block are not repeated; the
/// links of a `<nav>` sit side by side as toolbar buttons. The layout covers
/// the whole document; the viewport only sets the width.
pub fn layout_document(document: &Html, viewport: Viewport) -> Vec<LayoutNode> {
    let Ok(sel) = Selector::parse("h1, h2, h3, p, li, nav, a[href]") else {
        return Vec::new();
    };
    let page_width = viewport.width.saturating_sub(PAGE_MARGIN * 2);
    let mut y = PAGE_MARGIN;
    let mut nodes = Vec::new();

    for el in document.select(&sel) {
        let nested = el
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| is_toolbar(&a) || classify(&a).is_some());
        if is_toolbar(&el) {
            if !nested {
                y = layout_toolbar(el, y, page_width, &mut nodes);
            }
            continue;
        }
        let Some((elem_type, scale, padding)) = classify(&el) else {
            continue;
        };
        let is_link = elem_type == ElementType::Link;
        if is_link && nested {
            continue;
        }
        let text = el.text().collect::<Vec<_>>().join(" ");
        if text.trim().is_empty() {
            continue;
        }

        let content_w = page_width.saturating_sub(padding * 2);
        let chars_per_line = (content_w / (GLYPH_WIDTH * scale)).max(1) as usize;
        let lines = wrap_text(&text, chars_per_line);
        let box_h = lines.len().max(1) as u32 * LINE_HEIGHT * scale + padding * 2;
        let margin = if scale > 1 { 8 } else { 6 };

        nodes.push(LayoutNode {
            lb: LayoutBox {
                rect: Rect {
                    x: PAGE_MARGIN as i32,
                    y: y as i32,
                    width: page_width,
                    height: box_h,
                },
                box_model: BoxModel {
                    margin,
                    border: 0,
                    padding,
                },
            },
            lines,
            elem_type,
            scale,
            href: if is_link {
                el.value().attr("href").map(str::to_string)
            } else {
                None
            },
            opens_popup: is_link && el.value().attr("target") == Some("_blank"),
        });
        y += box_h + margin;
    }

    nodes
}

/// Total height of the laid out document, including the bottom margin
pub fn document_height(nodes: &[LayoutNode]) -> u32 {
    nodes
        .iter()
        .map(|n| n.lb.rect.bottom().max(0) as u32 + n.lb.box_model.margin)
        .max()
        .unwrap_or(0)
        + PAGE_MARGIN
}

/// Link node under a document coordinate
pub fn link_at(nodes: &[LayoutNode], x: i32, y: i32) -> Option<&LayoutNode> {
    nodes.iter().find(|n| n.href.is_some() && n.lb.rect.contains(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn layout_document_places_blocks_in_order() {
        let html = "<html><head><title>Test Title</title></head><body><h1>Heading</h1><p>Hello world</p><p>More text</p></body></html>";
        let doc = Html::parse_document(html);
        let v = crate::Viewport { width: 200, height: 200 };
        let nodes = layout_document(&doc, v);
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].elem_type, ElementType::Heading);
        assert_eq!(nodes[1].elem_type, ElementType::Paragraph);
        assert!(nodes[1].lb.rect.y > nodes[0].lb.rect.bottom());
        assert_eq!(nodes[1].lb.rect.width, 184);
    }

    #[test]
    fn wrapping_respects_the_line_width() {
        assert_eq!(wrap_text("aa bb cc", 5), vec!["aa bb", "cc"]);
        assert_eq!(wrap_text("  ", 5), Vec::<String>::new());
        assert_eq!(wrap_text("toolongword x", 4), vec!["toolongword", "x"]);
    }

    #[test]
    fn links_are_hit_testable() {
        let html = r#"<body><a href="/next" target="_blank">next page</a><p>see <a href="/inline">inline</a></p></body>"#;
        let doc = Html::parse_document(html);
        let nodes = layout_document(&doc, crate::Viewport { width: 320, height: 100 });
        // the inline link belongs to its paragraph
        assert_eq!(nodes.len(), 2);
        let r = &nodes[0].lb.rect;
        let link = link_at(&nodes, r.x + 1, r.y + 1).expect("link under pointer");
        assert_eq!(link.href.as_deref(), Some("/next"));
        assert!(link.opens_popup);
        assert!(link_at(&nodes, 0, 0).is_none());
    }

    #[test]
    fn nav_links_form_a_row_of_buttons() {
        let html = r#"<body><nav><a href="javascript:back()">&lt;</a><a href="javascript:fwd()">&gt;</a><input><a href="/go">Go</a></nav><p>below</p></body>"#;
        let doc = Html::parse_document(html);
        let nodes = layout_document(&doc, crate::Viewport { width: 320, height: 48 });
        assert_eq!(nodes.len(), 4);

        let rects: Vec<_> = nodes[..3].iter().map(|n| n.lb.rect.clone()).collect();
        assert_eq!(rects[0], Rect { x: 8, y: 8, width: 20, height: 20 });
        assert_eq!(rects[1], Rect { x: 32, y: 8, width: 20, height: 20 });
        assert_eq!(rects[2], Rect { x: 56, y: 8, width: 28, height: 20 });
        assert_eq!(link_at(&nodes, 12, 12).and_then(|n| n.href.as_deref()), Some("javascript:back()"));
        assert_eq!(link_at(&nodes, 40, 20).and_then(|n| n.href.as_deref()), Some("javascript:fwd()"));
        assert!(link_at(&nodes, 30, 12).is_none());

        assert_eq!(nodes[3].elem_type, ElementType::Paragraph);
        assert_eq!(nodes[3].lb.rect.y, 34);
    }

    #[test]
    fn narrow_toolbars_wrap() {
        let html = r#"<nav><a href="/a">aaaa</a><a href="/b">bbbb</a></nav>"#;
        let doc = Html::parse_document(html);
        let nodes = layout_document(&doc, crate::Viewport { width: 64, height: 100 });
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].lb.rect.y, 8);
        assert_eq!(nodes[1].lb.rect.x, 8);
        assert_eq!(nodes[1].lb.rect.y, 32);
    }

    #[test]
    fn document_height_covers_every_block() {
        let body: String = (0..50).map(|i| format!("<p>paragraph {}</p>", i)).collect();
        let doc = Html::parse_document(&body);
        let nodes = layout_document(&doc, crate::Viewport { width: 200, height: 100 });
        assert_eq!(nodes.len(), 50);
        assert!(document_height(&nodes) > 100);
        assert_eq!(document_height(&[]), PAGE_MARGIN);
    }
}
