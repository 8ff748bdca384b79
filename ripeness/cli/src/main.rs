use anyhow::Result;
use clap::Parser;
use ripeness::prelude::*;

fn main() {
    let cli_args = CliArgs::parse();

    let level = match cli_args.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = cli_args.run() {
        log::error!("{e:?}");
        std::process::exit(1)
    }
}

/// Predict the ripeness class of a fruit picture.
#[derive(Debug, Parser)]
#[command(name = "ripeness", version)]
pub struct CliArgs {
    /// Image to classify (local path, or http(s) URL)
    #[arg(default_value = "Decay.jpg")]
    pub image: String,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl CliArgs {
    pub fn run(&self) -> Result<()> {
        let pipeline = Pipeline::load(&PipelineConfig::from(&self.pipeline))?;
        let prediction = pipeline.predict(&ImageSource::parse(&self.image))?;
        log::debug!("Scores: {:?}", prediction.scores);
        println!("Predicted Class: {}", prediction.label);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::CommandFactory;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn verify_cli() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn default_image() {
        let args = CliArgs::try_parse_from(["ripeness"]).unwrap();
        assert_eq!(args.image, "Decay.jpg");
        assert_eq!(args.verbosity, 0);
        assert_eq!(PipelineConfig::from(&args.pipeline).fetch_timeout, None);
    }

    #[test]
    fn overrides() {
        let args = CliArgs::try_parse_from([
            "ripeness",
            "-vv",
            "--model",
            "head.npz",
            "--backbone-output",
            "avgpool",
            "--fetch-timeout-secs",
            "3",
            "https://example.com/banana.jpg",
        ])
        .unwrap();
        assert_eq!(args.verbosity, 2);
        let config = PipelineConfig::from(&args.pipeline);
        assert_eq!(config.model, PathBuf::from("head.npz"));
        assert_eq!(config.backbone_output.as_deref(), Some("avgpool"));
        assert_eq!(config.fetch_timeout, Some(Duration::from_secs(3)));
        assert_eq!(
            ImageSource::parse(&args.image),
            ImageSource::Url("https://example.com/banana.jpg".into())
        );
    }
}
