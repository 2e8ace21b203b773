use crate::core::state::{Panel, PanelStatus};
use crate::utils::image::decode;
use crate::utils::layout::{PageLayout, Rect, TextBlock};
use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use log::warn;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// A4 portrait in PDF points.
pub const A4_WIDTH: f32 = 595.28;
pub const A4_HEIGHT: f32 = 841.89;

const JPEG_QUALITY: u8 = 90;
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const CAPTION_FILL: Rgb<u8> = Rgb([246, 242, 232]);
const PLACEHOLDER_FILL: Rgb<u8> = Rgb([205, 205, 205]);
const PLACEHOLDER_MARK: Rgb<u8> = Rgb([150, 150, 150]);
const BORDER: Rgb<u8> = Rgb([30, 30, 30]);

/// One rasterized comic page ready to be placed on a PDF page.
pub struct RenderedPage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub text: Vec<TextBlock>,
}

fn fill(canvas: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    let x_end = (rect.x + rect.width).min(canvas.width());
    let y_end = (rect.y + rect.height).min(canvas.height());
    for y in rect.y..y_end {
        for x in rect.x..x_end {
            canvas.put_pixel(x, y, color);
        }
    }
}

fn outline(canvas: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    if rect.width < 2 || rect.height < 2 {
        return;
    }
    let edges = [
        Rect { height: 2, ..rect },
        Rect { y: rect.y + rect.height - 2, height: 2, ..rect },
        Rect { width: 2, ..rect },
        Rect { x: rect.x + rect.width - 2, width: 2, ..rect },
    ];
    for edge in edges {
        fill(canvas, edge, color);
    }
}

/// Grey box with a diagonal cross, drawn where an image is missing.
fn placeholder(canvas: &mut RgbImage, rect: Rect) {
    fill(canvas, rect, PLACEHOLDER_FILL);
    let steps = rect.width.max(rect.height);
    for i in 0..steps {
        let x = rect.x + i * rect.width / steps;
        let y = rect.y + i * rect.height / steps;
        let y_flipped = rect.y + rect.height - 1 - i * rect.height / steps;
        for dx in 0..3 {
            let px = (x + dx).min(rect.x + rect.width - 1);
            canvas.put_pixel(px, y, PLACEHOLDER_MARK);
            canvas.put_pixel(px, y_flipped, PLACEHOLDER_MARK);
        }
    }
}

fn draw_panel(canvas: &mut RgbImage, rect: Rect, panel: &Panel) {
    let image = match (&panel.image, panel.status) {
        (Some(image), PanelStatus::Done) => image,
        _ => return placeholder(canvas, rect),
    };
    match decode(image) {
        Ok(decoded) => {
            let scaled = decoded.resize_to_fill(rect.width, rect.height, FilterType::Triangle).to_rgb8();
            imageops::replace(canvas, &scaled, rect.x as i64, rect.y as i64);
        }
        Err(e) => {
            warn!("Panel {} on page {}: {:#}", panel.panel, panel.page, e);
            placeholder(canvas, rect);
        }
    }
}

/// Draws the panel images and caption bands. Text is left to the PDF layer.
pub fn render_page(layout: &PageLayout, panels: &[&Panel]) -> Result<RenderedPage> {
    let mut canvas = RgbImage::from_pixel(layout.width, layout.height, BACKGROUND);

    for (cell, panel) in layout.cells.iter().zip(panels) {
        draw_panel(&mut canvas, cell.image, panel);
        fill(&mut canvas, cell.caption, CAPTION_FILL);
        let whole = Rect {
            height: cell.image.height + cell.caption.height,
            ..cell.image
        };
        outline(&mut canvas, whole, BORDER);
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&DynamicImage::ImageRgb8(canvas))
        .context("Failed to encode page image")?;

    Ok(RenderedPage {
        jpeg,
        width: layout.width,
        height: layout.height,
        text: layout.text_blocks().cloned().collect(),
    })
}

/// Maps text onto the single-byte encoding of the standard PDF fonts.
pub fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => b'\'',
            '\u{201C}' | '\u{201D}' => b'"',
            '\u{2013}' | '\u{2014}' => b'-',
            '\u{2026}' => 0x85,
            c if (c as u32) < 0x20 => b' ',
            c if (c as u32) < 0x7F || (0xA0..=0xFF).contains(&(c as u32)) => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

fn real(v: f32) -> Object {
    v.into()
}

/// Places the page image top-aligned and horizontally centred on A4, scaled
/// to fit, then overlays the text at the same scale.
fn page_operations(page: &RenderedPage) -> Vec<Operation> {
    let ratio = (A4_WIDTH / page.width as f32).min(A4_HEIGHT / page.height as f32);
    let draw_w = page.width as f32 * ratio;
    let draw_h = page.height as f32 * ratio;
    let origin_x = (A4_WIDTH - draw_w) / 2.0;

    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![real(draw_w), real(0.0), real(0.0), real(draw_h), real(origin_x), real(A4_HEIGHT - draw_h)],
        ),
        Operation::new("Do", vec!["Im0".into()]),
        Operation::new("Q", vec![]),
        Operation::new("BT", vec![]),
        Operation::new("rg", vec![real(0.08), real(0.08), real(0.08)]),
    ];

    for block in &page.text {
        let font = if block.bold { "F2" } else { "F1" };
        ops.push(Operation::new("Tf", vec![font.into(), real(block.font_size * ratio)]));
        for (i, line) in block.lines.iter().enumerate() {
            // Baseline sits roughly 80% of the way down each line box
            let top = block.y as f32 + (i as u32 * block.line_height()) as f32;
            let baseline = top + block.font_size * 0.8 + (block.line_height() as f32 - block.font_size) / 2.0;
            let x = origin_x + block.x as f32 * ratio;
            let y = A4_HEIGHT - baseline * ratio;
            ops.push(Operation::new(
                "Tm",
                vec![real(1.0), real(0.0), real(0.0), real(1.0), real(x), real(y)],
            ));
            ops.push(Operation::new("Tj", vec![Object::string_literal(win_ansi(line))]));
        }
    }
    ops.push(Operation::new("ET", vec![]));
    ops
}

/// One A4 page per rendered page, in order.
pub fn build_pdf(pages: &[RenderedPage]) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for page in pages {
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => page.width as i64,
                "Height" => page.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.jpeg.clone(),
        )
        .with_compression(false);
        let image_id = doc.add_object(image);

        let content = Content {
            operations: page_operations(page),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![real(0.0), real(0.0), real(A4_WIDTH), real(A4_HEIGHT)],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
                "Font" => dictionary! { "F1" => regular, "F2" => bold },
            },
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
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).context("Failed to write PDF")?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ImageData;
    use crate::utils::image::solid_png;
    use crate::utils::layout::layout_page;

    fn panel(n: u32, status: PanelStatus, image: Option<ImageData>) -> Panel {
        Panel {
            id: n as usize,
            page: 1,
            panel: n,
            scene_description: "scene".to_string(),
            panel_text: format!("Caption {}", n),
            image,
            status,
        }
    }

    #[test]
    fn test_win_ansi() {
        assert_eq!(win_ansi("Hi (there)"), b"Hi (there)".to_vec());
        assert_eq!(win_ansi("caf\u{e9} \u{201C}x\u{201D}"), vec![b'c', b'a', b'f', 0xE9, b' ', b'"', b'x', b'"']);
        assert_eq!(win_ansi("\u{4F60}\t"), b"? ".to_vec());
    }

    #[test]
    fn test_render_uses_placeholder_for_failed_panels() -> Result<()> {
        let panels = [
            panel(1, PanelStatus::Done, Some(ImageData::new("image/png", solid_png(32, 18)))),
            panel(2, PanelStatus::Error, None),
            panel(3, PanelStatus::Done, Some(ImageData::new("image/jpeg", vec![0xFF, 0xD8, 0xFF, 0]))),
        ];
        let refs: Vec<&Panel> = panels.iter().collect();
        let layout = layout_page(1, &refs, (16, 9), true);
        let rendered = render_page(&layout, &refs)?;

        let decoded = image::load_from_memory(&rendered.jpeg)?.to_rgb8();
        assert_eq!((decoded.width(), decoded.height()), (layout.width, layout.height));

        let centre = |i: usize| {
            let r = layout.cells[i].image;
            *decoded.get_pixel(r.x + r.width / 4, r.y + r.height / 3)
        };
        // Red source image vs grey placeholders, allowing for JPEG noise
        assert!(centre(0)[0] > 150 && centre(0)[1] < 80);
        for i in [1, 2] {
            let px = centre(i);
            assert!(px[0].abs_diff(px[1]) < 20 && px[0] > 150, "{:?}", px);
        }
        assert_eq!(rendered.text.len(), 1 + 3 * 2);
        Ok(())
    }

    #[test]
    fn test_build_pdf_one_page_per_comic_page() -> Result<()> {
        let panels = [panel(1, PanelStatus::Done, Some(ImageData::new("image/png", solid_png(8, 8))))];
        let refs: Vec<&Panel> = panels.iter().collect();
        let layout = layout_page(1, &refs, (1, 1), false);
        let pages = vec![render_page(&layout, &refs)?, render_page(&layout, &refs)?];

        let bytes = build_pdf(&pages)?;
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&bytes)?;
        assert_eq!(doc.get_pages().len(), 2);
        Ok(())
    }

    #[test]
    fn test_page_is_scaled_to_fit_and_top_aligned() {
        let page = RenderedPage {
            jpeg: Vec::new(),
            width: 1200,
            height: 600,
            text: Vec::new(),
        };
        let ops = page_operations(&page);
        let cm = ops.iter().find(|op| op.operator == "cm").unwrap();
        let values: Vec<f32> = cm.operands.iter().map(|o| o.as_float().unwrap()).collect();

        let ratio = A4_WIDTH / 1200.0;
        assert!((values[0] - 1200.0 * ratio).abs() < 0.01);
        assert!((values[3] - 600.0 * ratio).abs() < 0.01);
        assert!(values[4].abs() < 0.01);
        assert!((values[5] + values[3] - A4_HEIGHT).abs() < 0.01);
    }
}
