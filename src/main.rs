use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tracing::info;

use luma::core::store::TileSet;
use luma::core::{margin_to_m8, TileBounds};
use luma::pipeline;

/// Harvest a dataset of luminance tiles from reference images, then re-draw
/// target images from the nearest tiles in that dataset.
#[derive(Parser, Debug)]
#[command(name = "luma", version)]
struct Args {
    /// Source images followed by MIN MAX MARGIN: build a dataset from them
    #[arg(short = 'i', value_name = "IMG|NUM", num_args = 1.., allow_hyphen_values = false)]
    inputs: Vec<String>,

    /// Saved dataset files; several files must be followed by a merge margin
    #[arg(short = 'l', value_name = "FILE|MARGIN", num_args = 1..)]
    loads: Vec<String>,

    /// Target images followed by MIN MAX: trace each against the dataset
    #[arg(short = 'y', value_name = "IMG|NUM", num_args = 1..)]
    targets: Vec<String>,

    /// Output image path, or a %0Xd template for several targets
    #[arg(short = 'o', value_name = "OUT")]
    out_image: Option<String>,

    /// Output path for the assembled dataset
    #[arg(short = 'k', value_name = "OUT")]
    out_dataset: Option<String>,

    /// Worker thread count
    #[arg(short = 't', value_name = "N", default_value_t = 1)]
    threads: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.threads < 1 {
        bail!("specify a positive worker count with -t");
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()
        .map_err(|e| anyhow!("thread pool init failed: {e}"))?;

    run(args)
}

fn run(args: Args) -> Result<()> {
    if args.out_dataset.is_none() && args.out_image.is_none() {
        bail!("specify an output image with -o or an output dataset with -k");
    }
    if args.out_dataset.is_some() && args.inputs.is_empty() && args.loads.is_empty() {
        bail!("-k needs a source: images with -i or datasets with -l");
    }
    if args.out_image.is_some() && args.targets.is_empty() {
        bail!("-o needs target images given with -y");
    }
    if !args.targets.is_empty() && args.out_image.is_none() {
        bail!("-y needs an output image given with -o");
    }
    if !args.targets.is_empty() && args.inputs.is_empty() && args.loads.is_empty() {
        bail!("-y needs a dataset source: images with -i or datasets with -l");
    }
    if args.loads.len() == 2 {
        bail!("give exactly one dataset with -l, or several followed by a merge margin");
    }

    // The margin governing any later combination step comes from -i when
    // images are built, otherwise from the -l merge margin.
    let mut margin: Option<f64> = None;

    let built = if args.inputs.is_empty() {
        None
    } else {
        if args.inputs.len() < 4 {
            bail!("-i takes input image(s), then minimum and maximum tile dimensions and the margin, in that order");
        }
        let (imgs, nums) = args.inputs.split_at(args.inputs.len() - 3);
        let min_dim: u32 = nums[0].parse().context("minimum tile dimension")?;
        let max_dim: u32 = nums[1].parse().context("maximum tile dimension")?;
        let m: f64 = nums[2].parse().context("margin")?;
        let bounds = TileBounds { min_dim, max_dim };
        let m8 = margin_to_m8(m)?;
        margin = Some(m);
        let paths: Vec<PathBuf> = imgs.iter().map(PathBuf::from).collect();
        Some(pipeline::build_dataset(&paths, bounds, m8, args.threads)?)
    };

    let loaded = if args.loads.is_empty() {
        None
    } else if args.loads.len() == 1 {
        Some(pipeline::load_dataset(Path::new(&args.loads[0]))?)
    } else {
        let (files, tail) = args.loads.split_at(args.loads.len() - 1);
        let m: f64 = tail[0]
            .parse()
            .context("the merge margin must follow the dataset files")?;
        let m8 = margin_to_m8(m)?;
        if margin.is_none() {
            margin = Some(m);
        }
        let sets = files
            .iter()
            .map(|f| pipeline::load_dataset(Path::new(f)))
            .collect::<luma::Result<Vec<TileSet>>>()?;
        Some(pipeline::merge_datasets(sets, m8, args.threads)?)
    };

    let mut set = match (built, loaded) {
        (Some(b), Some(l)) => {
            let m8 = margin_to_m8(margin.unwrap_or(0.0))?;
            pipeline::merge_datasets(vec![b, l], m8, args.threads)?
        }
        (Some(b), None) => b,
        (None, Some(l)) => l,
        (None, None) => bail!("no dataset source given; use -i or -l"),
    };
    info!(tiles = set.len(), "dataset assembled");

    if let Some(out) = &args.out_dataset {
        pipeline::save_dataset(&set, Path::new(out))?;
    }

    if !args.targets.is_empty() {
        if args.targets.len() < 3 {
            bail!("-y takes target image(s), then minimum and maximum tile dimensions, in that order");
        }
        let (imgs, nums) = args.targets.split_at(args.targets.len() - 2);
        let min_dim: u32 = nums[0].parse().context("minimum tile dimension")?;
        let max_dim: u32 = nums[1].parse().context("maximum tile dimension")?;
        let bounds = TileBounds { min_dim, max_dim };
        let template = args.out_image.as_deref().unwrap();
        let targets: Vec<PathBuf> = imgs.iter().map(PathBuf::from).collect();
        let outputs = pipeline::resolve_output_names(template, &targets)?;
        pipeline::trace_targets(&mut set, &targets, &outputs, bounds)?;
    }

    Ok(())
}
