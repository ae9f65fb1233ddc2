use crate::manifest::ManifestStudy;
use crate::monty_hall;
use anyhow::{anyhow, Result};
use std::path::Path;
use sweep_analysis::{Plugin, ScoopEntry};
use sweep_core::RunInfo;

pub trait Study {
    fn name(&self) -> &str;
    fn run_info(&self) -> RunInfo;
    fn scoop_info(&self) -> Vec<ScoopEntry>;
    fn plugin_info(&self) -> Vec<Box<dyn Plugin>>;
}

type StudyFactory = fn() -> Box<dyn Study>;

static REGISTRY: &[(&str, StudyFactory)] = &[(monty_hall::NAME, monty_hall::study)];

pub fn study_names() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}

pub fn find_study(name: &str) -> Option<Box<dyn Study>> {
    REGISTRY
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, factory)| factory())
}

pub fn resolve_study(
    name: Option<&str>,
    manifest: Option<&Path>,
    script: Option<&Path>,
) -> Result<Box<dyn Study>> {
    if let Some(path) = manifest {
        tracing::debug!(path = %path.display(), "loading study manifest");
        return Ok(Box::new(ManifestStudy::load(path)?));
    }
    if let Some(name) = name {
        return find_study(name).ok_or_else(|| {
            anyhow!(
                "unknown study `{}` (registered: {})",
                name,
                study_names().join(", ")
            )
        });
    }
    let stem = script
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("no study given: pass --study, --manifest or a target script"))?;
    find_study(stem).ok_or_else(|| {
        anyhow!(
            "no registered study matches script `{}` (registered: {}); pass --study or --manifest",
            stem,
            study_names().join(", ")
        )
    })
}
