//! Phase orchestration: build a dataset from images, load and merge saved
//! datasets, save, and trace targets. Each phase fans out on the rayon pool
//! and joins before the next begins.

use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::core::codec;
use crate::core::extract::build_tiles;
use crate::core::merge::merge_all;
use crate::core::prune::prune;
use crate::core::store::{Tile, TileSet};
use crate::core::trace;
use crate::core::tree::PartitionTree;
use crate::core::TileBounds;
use crate::error::{LumaError, Result};
use crate::images::{load_luma, save_luma, LumaImage};

/// Build a pruned tile dataset from a list of source images.
pub fn build_dataset(
    paths: &[PathBuf],
    bounds: TileBounds,
    m8: u8,
    workers: usize,
) -> Result<TileSet> {
    bounds.validate()?;

    let started = Instant::now();
    let images: Vec<LumaImage> = paths.par_iter().map(|p| load_luma(p)).collect::<Result<_>>()?;
    info!(
        images = images.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "decoded source images"
    );

    let started = Instant::now();
    let trees: Vec<PartitionTree> = images
        .par_iter()
        .map(|img| {
            let mut rng = SmallRng::from_entropy();
            PartitionTree::generate(img.width, img.height, &bounds, &mut rng)
        })
        .collect();
    let leaf_total: usize = trees.iter().map(PartitionTree::leaf_count).sum();
    info!(
        leaves = leaf_total,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "generated partition trees"
    );

    // One packed store for everything; each image owns a disjoint region, so
    // extraction can run fully in parallel without coordination.
    let started = Instant::now();
    let areas: Vec<usize> = images.iter().map(|i| (i.width * i.height) as usize).collect();
    let total: usize = areas.iter().sum();
    let mut store = Vec::new();
    store.try_reserve_exact(total).map_err(|_| LumaError::OutOfMemory(total))?;
    store.resize(total, 0);

    let mut regions: Vec<(usize, &mut [u8])> = Vec::with_capacity(areas.len());
    let mut rest = store.as_mut_slice();
    let mut base = 0usize;
    for &area in &areas {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(area);
        regions.push((base, head));
        rest = tail;
        base += area;
    }

    let tile_lists: Vec<Vec<Tile>> = images
        .par_iter()
        .zip(trees.par_iter())
        .zip(regions.into_par_iter())
        .map(|((img, tree), (base, region))| {
            build_tiles(&img.pixels, img.width, tree, m8, region, base)
        })
        .collect::<Result<_>>()?;

    let mut set = TileSet { tiles: tile_lists.concat(), pixels: store };
    debug!(tiles = set.len(), "extracted tiles");
    set.sort_by_key();
    info!(
        tiles = set.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "extracted and sorted tiles"
    );

    if m8 > 0 {
        let started = Instant::now();
        let before = set.len();
        prune(&mut set, m8, workers);
        info!(
            kept = set.len(),
            dropped = before - set.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "removed redundant tiles"
        );
    }
    set.validate()?;
    Ok(set)
}

/// Load a single saved dataset.
pub fn load_dataset(path: &Path) -> Result<TileSet> {
    let started = Instant::now();
    let set = codec::load(path)?;
    info!(
        dataset = %path.display(),
        tiles = set.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loaded dataset"
    );
    Ok(set)
}

/// Merge several tile sets under one margin: each is re-flagged for the
/// margin and re-sorted, then the list collapses by balanced pairwise merge.
pub fn merge_datasets(mut sets: Vec<TileSet>, m8: u8, workers: usize) -> Result<TileSet> {
    for set in &mut sets {
        set.apply_depth_flags(m8);
        set.sort_by_key();
    }
    let started = Instant::now();
    let inputs = sets.len();
    let merged = merge_all(sets, m8, workers)?;
    info!(
        inputs,
        tiles = merged.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "merged datasets"
    );
    Ok(merged)
}

/// Save a dataset in packed-key order.
pub fn save_dataset(set: &TileSet, path: &Path) -> Result<()> {
    let started = Instant::now();
    codec::save(set, path)?;
    info!(
        dataset = %path.display(),
        tiles = set.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "saved dataset"
    );
    Ok(())
}

/// Trace every target image against the dataset and write the outputs.
/// The dataset is re-keyed for tracing in place.
pub fn trace_targets(
    dataset: &mut TileSet,
    targets: &[PathBuf],
    outputs: &[PathBuf],
    bounds: TileBounds,
) -> Result<()> {
    bounds.validate()?;
    if dataset.is_empty() {
        return Err(LumaError::InvalidDataset("empty dataset for trace".into()));
    }
    trace::rekey_for_trace(dataset);

    for (path, out) in targets.iter().zip(outputs.iter()) {
        let started = Instant::now();
        let img = load_luma(path)?;
        let mut rng = SmallRng::from_entropy();
        let tree = PartitionTree::generate(img.width, img.height, &bounds, &mut rng);
        let plane = trace::trace(dataset, &img.pixels, img.width, img.height, &tree)?;
        save_luma(out, img.width, img.height, plane)?;
        info!(
            target = %path.display(),
            output = %out.display(),
            tiles = tree.leaf_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "traced image"
        );
    }
    Ok(())
}

const KNOWN_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tiff", "gif"];

/// Expand the `-o` argument into one output path per target.
///
/// A lone target uses the argument as-is (inheriting the target's extension
/// when the argument has none). Several targets require either a `%0Xd`
/// digit-string template or a bare prefix; the extension comes from the
/// template suffix, from the targets when they all agree, or falls back to
/// png when they disagree. Targets with no recognized extension at all are
/// an error.
pub fn resolve_output_names(template: &str, targets: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let names = expand_output_names(template, targets)?;
    for name in &names {
        if targets.iter().any(|t| t.as_os_str() == name.as_os_str()) {
            return Err(LumaError::InvalidConfig(format!(
                "output {} would overwrite an input image",
                name.display()
            )));
        }
    }
    Ok(names)
}

fn expand_output_names(template: &str, targets: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if targets.len() == 1 {
        let mut name = template.to_string();
        if extension_of(&name).is_none() {
            if let Some(ext) = extension_of(&targets[0].to_string_lossy()) {
                name.push('.');
                name.push_str(&ext);
            }
        }
        return Ok(vec![PathBuf::from(name)]);
    }

    let (prefix, suffix, width) = match find_digit_template(template) {
        Some((start, end, width)) => {
            if find_digit_template(&template[end..]).is_some() {
                return Err(LumaError::InvalidConfig(
                    "specify exactly one %0Xd digit string".into(),
                ));
            }
            (template[..start].to_string(), template[end..].to_string(), width)
        }
        None => {
            let width = targets.len().to_string().len();
            (template.to_string(), String::new(), width)
        }
    };

    let suffix = if extension_of(&suffix).is_some() {
        suffix
    } else {
        let mut exts: Vec<String> = targets
            .iter()
            .filter_map(|t| extension_of(&t.to_string_lossy()))
            .collect();
        exts.sort();
        exts.dedup();
        match exts.as_slice() {
            [] => {
                return Err(LumaError::InvalidConfig(
                    "no recognized extensions among the target images; give the output an explicit extension".into(),
                ));
            }
            [only] => format!("{suffix}.{only}"),
            _ => {
                info!("targets carry several extensions, defaulting output to png");
                format!("{suffix}.png")
            }
        }
    };

    Ok((0..targets.len())
        .map(|i| PathBuf::from(format!("{prefix}{i:0width$}{suffix}")))
        .collect())
}

/// Locate a `%0Xd` digit-string. Returns (start, end, pad width).
fn find_digit_template(s: &str) -> Option<(usize, usize, usize)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 1 < bytes.len() && bytes[i + 1] == b'0' {
            let mut j = i + 2;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 2 && j < bytes.len() && bytes[j] == b'd' {
                let width = s[i + 2..j].parse().unwrap_or(1);
                return Some((i, j + 1, width));
            }
        }
        i += 1;
    }
    None
}

fn extension_of(name: &str) -> Option<String> {
    let ext = name.rsplit('.').next()?;
    if ext.len() == name.len() {
        return None;
    }
    let lower = ext.to_ascii_lowercase();
    KNOWN_EXTENSIONS.contains(&lower.as_str()).then_some(lower)
}
