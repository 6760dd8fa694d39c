//! Artifact promotion between stage roots.
//!
//! Promotions are resolved (source stage executed, source path present) for
//! the whole destination stage before it runs a single step. Each copy is
//! staged in the destination's scratch area and only then moved into the
//! root, so a failed copy leaves the root untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use stagecraft_core::{Promotion, Stage};

use crate::error::PipelineError;
use crate::ownership::Ownership;
use crate::stage::StageRoot;

/// A promotion whose source has been located on disk.
#[derive(Debug)]
pub(crate) struct ResolvedPromotion<'a> {
    pub promotion: &'a Promotion,
    /// Host path inside the source stage root.
    pub source: PathBuf,
    /// Root-relative destination inside the promoting stage.
    pub destination: PathBuf,
}

/// Resolves every promotion `stage` declares against already-executed roots.
pub(crate) fn resolve_all<'a>(
    stage: &'a Stage,
    pipeline_stages: &[Stage],
    roots: &HashMap<String, StageRoot>,
) -> Result<Vec<ResolvedPromotion<'a>>, PipelineError> {
    stage
        .promotions()
        .map(|promotion| resolve(stage, promotion, pipeline_stages, roots))
        .collect()
}

fn resolve<'a>(
    stage: &Stage,
    promotion: &'a Promotion,
    pipeline_stages: &[Stage],
    roots: &HashMap<String, StageRoot>,
) -> Result<ResolvedPromotion<'a>, PipelineError> {
    let missing = || PipelineError::PromotionFailure {
        stage: stage.name.clone(),
        from: promotion.from.clone(),
        path: promotion.source.clone(),
    };

    let source_stage = pipeline_stages
        .iter()
        .find(|s| s.name == promotion.from)
        .ok_or_else(|| stagecraft_core::Error::UnknownStage {
            stage: stage.name.clone(),
            from: promotion.from.clone(),
        })?;
    let source_root = roots.get(&promotion.from).ok_or_else(missing)?;
    let source = source_root.resolve(&source_stage.path(&promotion.source)?);

    if !source.exists() && !source.is_symlink() {
        return Err(missing());
    }

    Ok(ResolvedPromotion {
        promotion,
        source,
        destination: stage.path(&promotion.destination)?,
    })
}

/// Resolves the declared owner of a promotion to concrete ids.
pub(crate) fn declared_owner(
    stage: &Stage,
    promotion: &Promotion,
) -> Result<Option<Ownership>, PipelineError> {
    let Some(owner) = &promotion.owner else {
        return Ok(None);
    };
    let user = stage
        .identities()
        .find(|id| id.user == owner.user)
        .ok_or_else(|| stagecraft_core::Error::UnknownUser {
            stage: stage.name.clone(),
            user: owner.user.clone(),
        })?;
    let group = stage
        .identities()
        .find(|id| id.group == owner.group)
        .ok_or_else(|| stagecraft_core::Error::UnknownGroup {
            stage: stage.name.clone(),
            group: owner.group.clone(),
        })?;
    Ok(Some(Ownership {
        user: user.user.clone(),
        uid: user.uid,
        group: group.group.clone(),
        gid: group.gid,
    }))
}

/// Copies a resolved promotion into `root`, recording `owner` for every entry
/// it writes.
pub(crate) fn apply(
    resolved: &ResolvedPromotion<'_>,
    root: &mut StageRoot,
    owner: &Ownership,
    sequence: usize,
) -> Result<(), PipelineError> {
    let stage_name = root.name().to_owned();
    let copy_error = |e: std::io::Error| PipelineError::PromotionCopy {
        stage: stage_name.clone(),
        from: resolved.promotion.from.clone(),
        path: resolved.promotion.source.clone(),
        source: e,
    };

    let staging = root.scratch().join(format!("promote-{sequence}"));
    crate::tree::reset_dir(&staging).map_err(copy_error)?;

    let written = crate::tree::copy_tree(&resolved.source, &staging.join(&resolved.destination))
        .map_err(copy_error)?;
    crate::tree::merge_move(&staging, &root.rootfs()).map_err(copy_error)?;
    std::fs::remove_dir_all(&staging).map_err(copy_error)?;

    for path in &written {
        let relative = path
            .strip_prefix(&staging)
            .map_err(|e| copy_error(std::io::Error::other(e.to_string())))?;
        root.ledger.record(relative, owner);
    }

    tracing::debug!(
        stage = root.name(),
        from = %resolved.promotion.from,
        source = %resolved.promotion.source,
        destination = %image_path(&resolved.destination),
        entries = written.len(),
        owner = %owner.user,
        "promoted artifact"
    );
    Ok(())
}

fn image_path(path: &Path) -> String {
    format!("/{}", path.display())
}
