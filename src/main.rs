use anyhow::{Context, Result};
use std::{
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;

mod assets;
mod augment;
mod client;
mod dataset;
mod error;
mod features;
mod ideal;
mod inference;
mod labels;
mod live;
mod model;
mod pose;
mod svm;
mod train;

#[derive(Debug, structopt::StructOpt)]
enum Command {
    /// Build the dataset from the image corpus, train a classifier and save it.
    Train(train::TrainOptions),

    /// Classify poses from a webcam, training a classifier first if there is none.
    Live(live::LiveOptions),

    /// Classify one JSON array of {"x", "y"} keypoints, read from the argument or stdin.
    Predict {
        keypoints: Option<String>,

        /// Print `label,confidence` instead of a JSON record.
        #[structopt(long)]
        csv: bool,
    },

    /// Report the similarity of a JSON keypoint array to every class's ideal pose.
    Ideal { keypoints: Option<String> },

    /// List the class labels found in the image corpus.
    Labels,
}

#[derive(structopt::StructOpt)]
struct Opt {
    /// Directory holding the image corpus and model artifacts.
    #[structopt(short, long, default_value = "assets", parse(from_os_str))]
    assets: PathBuf,

    /// Pose estimation service endpoint.
    #[structopt(
        long,
        default_value = "http://localhost:5000/model/predict",
        env = "POSE_SERVICE_URL"
    )]
    pose_url: String,

    /// Timeout for one pose service request, in seconds.
    #[structopt(long, default_value = "30")]
    timeout_secs: u64,

    #[structopt(short, long, default_value = "info", env = "RUST_LOG")]
    log_level: tracing_subscriber::filter::EnvFilter,

    #[structopt(short, long)]
    show_progress: bool,

    #[structopt(subcommand)]
    command: Command,
}

fn read_keypoints(keypoints: Option<String>) -> Result<String> {
    match keypoints {
        Some(keypoints) => Ok(keypoints),
        None => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .context("failed reading keypoints from stdin")?;
            Ok(input)
        }
    }
}

fn list_labels(corpus: &Path) -> Result<()> {
    let labels = dataset::class_labels(corpus)
        .with_context(|| format!("failed listing classes in {}", corpus.display()))?;
    for label in labels {
        println!("{}", label);
    }
    Ok(())
}

fn main() -> Result<()> {
    let opt = Opt::from_args();

    tracing::subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(opt.log_level),
    )?;

    let assets = assets::Assets::new(&opt.assets);
    let client = client::PoseClient::new(
        opt.pose_url.as_str(),
        Duration::from_secs(opt.timeout_secs),
    );

    match opt.command {
        Command::Train(train_opts) => {
            let model = train::run(
                &client,
                &assets,
                &train_opts,
                train::DEFAULT_DATA_SIZE,
                opt.show_progress,
            )
            .context("failed training classifier")?;
            info!(
                message = "trained classifier",
                model_id = %model.model_id,
                classes = ?model.labels.classes()
            );
        }
        Command::Live(live_opts) => {
            let context = inference::InferenceContext::load_or_bootstrap(
                &assets,
                &client,
                &live_opts.train,
                opt.show_progress,
            )
            .context("failed loading classifier")?;
            live::run(&client, &context, &live_opts, opt.show_progress)?;
        }
        Command::Predict { keypoints, csv } => {
            let context = inference::InferenceContext::load(&assets)
                .context("failed loading classifier")?;
            let classification = context
                .classify_json(&read_keypoints(keypoints)?)
                .context("failed classifying keypoints")?;
            if csv {
                println!("{}", classification);
            } else {
                println!("{}", serde_json::to_string(&classification)?);
            }
        }
        Command::Ideal { keypoints } => {
            let context = inference::InferenceContext::load(&assets)
                .context("failed loading classifier")?;
            let keypoints: Vec<pose::Keypoint> =
                serde_json::from_str(&read_keypoints(keypoints)?)
                    .context("failed parsing keypoints")?;
            let coordinates = pose::keypoints_to_array(&keypoints)?;
            for (label, similarity) in context.similarities(coordinates.view())? {
                match similarity {
                    Some(similarity) => println!("{},{:.4}", label, similarity),
                    None => println!("{},", label),
                }
            }
        }
        Command::Labels => list_labels(&assets.images())?,
    }

    Ok(())
}
