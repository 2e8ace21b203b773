//! Page geometry for the exported comic, in raster pixels.
//!
//! A page is a "Page N" header followed by a grid of panel cells. Each cell
//! holds the panel image at the configured aspect ratio and a caption band
//! underneath. Landscape panels get one column, everything else two.

use crate::core::state::Panel;

pub const PAGE_WIDTH: u32 = 1200;
pub const HEADER_FONT: f32 = 40.0;
pub const CAPTION_FONT: f32 = 22.0;
pub const DESCRIPTION_FONT: f32 = 16.0;

const MARGIN: u32 = 40;
const GUTTER: u32 = 24;
const HEADER_HEIGHT: u32 = 80;
const CAPTION_PADDING: u32 = 12;
const LINE_SPACING: f32 = 1.3;
/// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub lines: Vec<String>,
    pub font_size: f32,
    pub bold: bool,
    /// Left edge and top of the first line.
    pub x: u32,
    pub y: u32,
}

impl TextBlock {
    pub fn line_height(&self) -> u32 {
        line_height(self.font_size)
    }

    pub fn height(&self) -> u32 {
        self.line_height() * self.lines.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellLayout {
    pub image: Rect,
    pub caption: Rect,
    pub text: Vec<TextBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    pub width: u32,
    pub height: u32,
    pub title: TextBlock,
    pub cells: Vec<CellLayout>,
}

impl PageLayout {
    pub fn text_blocks(&self) -> impl Iterator<Item = &TextBlock> {
        std::iter::once(&self.title).chain(self.cells.iter().flat_map(|c| c.text.iter()))
    }
}

fn line_height(font_size: f32) -> u32 {
    (font_size * LINE_SPACING).ceil() as u32
}

pub fn columns_for(aspect: (u32, u32)) -> u32 {
    if aspect.0 > aspect.1 {
        1
    } else {
        2
    }
}

/// Greedy word wrap using an average glyph width. Words longer than a line
/// are split.
pub fn wrap_text(text: &str, max_width: u32, font_size: f32) -> Vec<String> {
    let max_chars = ((max_width as f32) / (font_size * AVG_GLYPH_WIDTH)).floor().max(1.0) as usize;
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !current.is_empty() {
                    lines.push(std::mem::take(&mut current));
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let needed = if current.is_empty() { word.len() } else { current.chars().count() + 1 + word.len() };
            if needed > max_chars && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.extend(word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    lines
}

fn or_ellipsis(text: &str) -> &str {
    if text.trim().is_empty() {
        "..."
    } else {
        text
    }
}

pub fn layout_page(page_number: u32, panels: &[&Panel], aspect: (u32, u32), show_descriptions: bool) -> PageLayout {
    let columns = columns_for(aspect);
    let inner = PAGE_WIDTH - 2 * MARGIN;
    let cell_width = (inner - (columns - 1) * GUTTER) / columns;
    let image_height = cell_width * aspect.1 / aspect.0;
    let text_width = cell_width - 2 * CAPTION_PADDING;

    let title = TextBlock {
        lines: vec![format!("Page {}", page_number)],
        font_size: HEADER_FONT,
        bold: true,
        x: MARGIN,
        y: MARGIN,
    };

    let mut cells = Vec::with_capacity(panels.len());
    let mut y = MARGIN + HEADER_HEIGHT;

    for row in panels.chunks(columns as usize) {
        let captions: Vec<(TextBlock, Option<TextBlock>)> = row
            .iter()
            .map(|panel| {
                let caption = TextBlock {
                    lines: wrap_text(or_ellipsis(&panel.panel_text), text_width, CAPTION_FONT),
                    font_size: CAPTION_FONT,
                    bold: true,
                    x: 0,
                    y: 0,
                };
                let description = show_descriptions.then(|| TextBlock {
                    lines: wrap_text(or_ellipsis(&panel.scene_description), text_width, DESCRIPTION_FONT),
                    font_size: DESCRIPTION_FONT,
                    bold: false,
                    x: 0,
                    y: 0,
                });
                (caption, description)
            })
            .collect();

        let caption_height = captions
            .iter()
            .map(|(c, d)| {
                let gap = if d.is_some() { CAPTION_PADDING / 2 } else { 0 };
                2 * CAPTION_PADDING + c.height() + gap + d.as_ref().map_or(0, TextBlock::height)
            })
            .max()
            .unwrap_or(0);

        for (col, (mut caption, description)) in captions.into_iter().enumerate() {
            let x = MARGIN + col as u32 * (cell_width + GUTTER);
            let image = Rect {
                x,
                y,
                width: cell_width,
                height: image_height,
            };
            let band = Rect {
                x,
                y: y + image_height,
                width: cell_width,
                height: caption_height,
            };

            caption.x = x + CAPTION_PADDING;
            caption.y = band.y + CAPTION_PADDING;
            let mut text = Vec::with_capacity(2);
            let below_caption = caption.y + caption.height() + CAPTION_PADDING / 2;
            text.push(caption);
            if let Some(mut description) = description {
                description.x = x + CAPTION_PADDING;
                description.y = below_caption;
                text.push(description);
            }

            cells.push(CellLayout {
                image,
                caption: band,
                text,
            });
        }

        y += image_height + caption_height + GUTTER;
    }

    PageLayout {
        width: PAGE_WIDTH,
        height: y - GUTTER + MARGIN,
        title,
        cells,
    }
}
