use crate::core::config::Config;
use crate::core::io::{join, Storage};
use crate::core::state::Panel;
use crate::utils::layout::layout_page;
use crate::utils::pdf::{build_pdf, render_page};
use anyhow::{bail, Result};
use log::info;
use std::collections::BTreeMap;

/// Panels of one comic page in reading order.
#[derive(Debug, Clone)]
pub struct ComicPage<'a> {
    pub number: u32,
    pub panels: Vec<&'a Panel>,
}

/// Groups by page (ascending) and sorts each page by panel number. Panels
/// without a page number land on page 1. Ties keep their input order, so
/// grouping already-grouped panels changes nothing.
pub fn group_pages(panels: &[Panel]) -> Vec<ComicPage<'_>> {
    let mut pages: BTreeMap<u32, Vec<&Panel>> = BTreeMap::new();
    for panel in panels {
        pages.entry(panel.page.max(1)).or_default().push(panel);
    }
    pages
        .into_iter()
        .map(|(number, mut panels)| {
            panels.sort_by_key(|p| p.panel);
            ComicPage { number, panels }
        })
        .collect()
}

/// Keeps the file name portable.
pub fn file_stem(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let stem = stem.trim_matches('-');
    if stem.is_empty() {
        "ai-comic".to_string()
    } else {
        stem.to_string()
    }
}

/// Renders every page and writes `<output_folder>/<title>.pdf`. Returns the path.
pub async fn export_comic(storage: &dyn Storage, config: &Config, panels: &[Panel]) -> Result<String> {
    let pages = group_pages(panels);
    if pages.is_empty() {
        bail!("No pages found to download.");
    }

    let aspect = config.story.aspect_dimensions();
    let mut rendered = Vec::with_capacity(pages.len());
    for page in &pages {
        let layout = layout_page(page.number, &page.panels, aspect, config.show_descriptions);
        rendered.push(render_page(&layout, &page.panels)?);
    }

    let bytes = build_pdf(&rendered)?;
    let path = join(&config.output_folder, &format!("{}.pdf", file_stem(&config.story.title)));
    storage.write(&path, &bytes).await?;
    info!("Wrote {} page(s) to {}", rendered.len(), path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::{ImageData, PanelStatus};
    use crate::utils::image::solid_png;

    fn panel(id: usize, page: u32, n: u32) -> Panel {
        Panel {
            id,
            page,
            panel: n,
            scene_description: String::new(),
            panel_text: format!("p{} n{}", page, n),
            image: Some(ImageData::new("image/png", solid_png(16, 9))),
            status: PanelStatus::Done,
        }
    }

    fn order(pages: &[ComicPage<'_>]) -> Vec<(u32, usize)> {
        pages
            .iter()
            .flat_map(|p| p.panels.iter().map(move |panel| (p.number, panel.id)))
            .collect()
    }

    #[test]
    fn test_group_pages_sorts_and_is_idempotent() {
        let panels = vec![panel(0, 2, 2), panel(1, 1, 2), panel(2, 2, 1), panel(3, 1, 1), panel(4, 0, 3)];
        let grouped = group_pages(&panels);
        assert_eq!(grouped.iter().map(|p| p.number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(order(&grouped), vec![(1, 3), (1, 1), (1, 4), (2, 2), (2, 0)]);

        let flattened: Vec<Panel> = grouped.iter().flat_map(|p| p.panels.iter().map(|x| (*x).clone())).collect();
        let regrouped = group_pages(&flattened);
        assert_eq!(order(&regrouped), order(&grouped));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("ai-comic"), "ai-comic");
        assert_eq!(file_stem(" The Last Dragon! "), "The-Last-Dragon");
        assert_eq!(file_stem("///"), "ai-comic");
    }

    #[tokio::test]
    async fn test_export_writes_pdf() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config: Config = serde_yaml_ng::from_str("story: {script: x, title: My Comic}")?;
        config.output_folder = dir.path().to_string_lossy().to_string();
        let storage = NativeStorage::new();

        let mut failed = panel(2, 2, 1);
        failed.status = PanelStatus::Error;
        failed.image = None;
        let panels = vec![panel(0, 1, 1), panel(1, 1, 2), failed];

        let path = export_comic(&storage, &config, &panels).await?;
        assert!(path.ends_with("My-Comic.pdf"));
        let doc = lopdf::Document::load_mem(&storage.read(&path).await?)?;
        assert_eq!(doc.get_pages().len(), 2);

        assert!(export_comic(&storage, &config, &[]).await.is_err());
        Ok(())
    }
}
