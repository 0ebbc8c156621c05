use anyhow::{bail, Context, Result};
use craftlens::settings::Settings;
use craftlens::util::init_tracing;
use craftlens::{B64Image, ClassificationService, Image};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::{env, process};
use tracing::{error, info};

const USAGE: &str = "usage: ./craftlens [--config <file>] <image file | ->...";

fn get_args() -> (Option<PathBuf>, Vec<String>) {
    let mut args = env::args().skip(1);
    let mut config = None;
    let mut images = vec![];
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => usage(),
            },
            "-h" | "--help" => usage(),
            _ => images.push(arg),
        }
    }
    if images.is_empty() {
        usage();
    }
    (config, images)
}

fn usage() -> ! {
    println!("{USAGE}");
    process::exit(1);
}

/// `-` reads a JSON `{"image": "<base64>"}` from stdin
fn read_image(arg: &str) -> Result<Image> {
    if arg == "-" {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        let b64: B64Image = serde_json::from_str(&input).context("invalid image json")?;
        return Ok(Image::try_from(b64)?);
    }
    Ok(Image::open(arg)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, images) = get_args();
    let settings = Settings::load(config.as_deref()).context("failed to load settings")?;
    init_tracing(&settings.log.filter);

    let service = Arc::new(ClassificationService::from_settings(&settings));
    if let Err(e) = service.preload() {
        error!("classification is unavailable: {e}");
        bail!(e);
    }
    info!("classifying {} image(s)", images.len());

    let mut failed = 0;
    for arg in &images {
        let result: Result<_> = match read_image(arg) {
            Ok(image) => service.clone().classify_async(image).await.map_err(Into::into),
            Err(e) => Err(e),
        };
        match result {
            Ok(classification) => println!("{}", serde_json::to_string(&classification)?),
            Err(e) => {
                error!("{arg}: {e:#}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} image(s) could not be classified", images.len());
    }
    Ok(())
}
