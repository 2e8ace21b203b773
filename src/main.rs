use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use std::sync::Arc;
use story2comic::core::config::Config;
use story2comic::core::io::{NativeStorage, Storage};
use story2comic::core::state::{AppStep, ComicState, PanelStatus, StateEvent};
use story2comic::services::characters::{load_characters, prepare_model_sheets};
use story2comic::services::export::export_comic;
use story2comic::services::llm::create_client;
use story2comic::services::setup;
use story2comic::services::workflow::{RunOutcome, WorkflowManager};

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn run_summary(state: &ComicState, pages: u32) -> String {
    format!(
        "{} page(s) requested. Total panels: {}, successful: {}, failed: {}.",
        pages,
        state.panels().len(),
        state.successful_panels(),
        state.failed_panels()
    )
}

fn attach_progress(manager: &mut WorkflowManager, pb: ProgressBar) {
    manager.subscribe(move |event| match event {
        StateEvent::Progress(p) => {
            pb.set_position(p.percentage.round() as u64);
            pb.set_message(p.message.clone());
        }
        StateEvent::PanelUpdated(panel) if panel.status == PanelStatus::Error => {
            pb.println(format!("  panel {} on page {} failed", panel.panel, panel.page));
        }
        StateEvent::PanelAdded(panel) => {
            pb.println(format!("  page {} panel {} ready", panel.page, panel.panel));
        }
        StateEvent::Error(message) => pb.println(format!("Error: {}", message)),
        _ => {}
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let mut config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please ensure 'config.yml' exists (see config.example.yml).");
            return Err(e);
        }
    };
    config.ensure_directories()?;
    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

    loop {
        setup::run_setup(&mut config)?;

        let client = match create_client(&config) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        };

        let mut characters = match load_characters(storage.as_ref(), &config.characters).await {
            Ok(characters) => characters,
            Err(e) if !config.unattended => {
                eprintln!("Error loading characters: {:#}", e);
                eprintln!("Returning to configuration.");
                continue;
            }
            Err(e) => return Err(e),
        };
        if let Some(client) = &client {
            if prepare_model_sheets(client.as_ref(), storage.as_ref(), &mut config, &mut characters).await
                && !config.unattended
            {
                config.save()?;
            }
        }

        println!("== Step 3: Generation ==");
        let mut manager = WorkflowManager::new(config.clone(), characters, client, storage.clone());
        let pb = progress_bar()?;
        attach_progress(&mut manager, pb.clone());
        let outcome = manager.run().await;
        pb.finish_and_clear();

        if manager.state().step() != AppStep::Comic {
            if let RunOutcome::Aborted(e) = outcome {
                if config.unattended {
                    return Err(e);
                }
                eprintln!("Returning to configuration.");
                continue;
            }
            bail!("Generation ended without a comic");
        }

        println!("== Step 4: Comic ==");
        if let Some(message) = manager.state().error() {
            eprintln!("{}", message);
        }
        let state = manager.state();
        println!("{}", run_summary(state, config.story.pages));

        match export_comic(storage.as_ref(), &config, state.panels()).await {
            Ok(path) => println!("Comic saved to {}", path),
            Err(e) => eprintln!("Export failed: {:#}", e),
        }

        if config.unattended
            || !inquire::Confirm::new("Create a new comic?")
                .with_default(false)
                .prompt()?
        {
            break;
        }
        config.reset_story();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use story2comic::core::state::{ImageData, Panel};

    fn panel(id: usize, status: PanelStatus) -> Panel {
        Panel {
            id,
            page: 1,
            panel: id as u32 + 1,
            scene_description: String::new(),
            panel_text: String::new(),
            image: (status == PanelStatus::Done).then(|| ImageData::new("image/png", vec![1])),
            status,
        }
    }

    #[test]
    fn test_run_summary_counts_every_panel() {
        let mut state = ComicState::new();
        state.set_panels(vec![
            panel(0, PanelStatus::Done),
            panel(1, PanelStatus::Error),
            panel(2, PanelStatus::Pending),
        ]);
        assert_eq!(
            run_summary(&state, 2),
            "2 page(s) requested. Total panels: 3, successful: 1, failed: 1."
        );
    }
}
