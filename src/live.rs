use crate::{
    client::PoseEstimator,
    error::Error,
    inference::{Classification, InferenceContext},
    pose::PoseResponse,
};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use opencv::{
    core::{Mat, Vector},
    imgcodecs::imencode,
    prelude::*,
    videoio::{VideoCapture, CAP_ANY, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use structopt::StructOpt;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, StructOpt)]
pub(crate) struct LiveOptions {
    /// Video capture device index.
    #[structopt(short, long, default_value = "0")]
    pub(crate) device: i32,

    /// The width of the captured frame.
    #[structopt(long, default_value = "656")]
    pub(crate) frame_width: u16,

    /// The height of the captured frame.
    #[structopt(long, default_value = "368")]
    pub(crate) frame_height: u16,

    /// Send every RATE-th frame to the pose service.
    #[structopt(short, long, default_value = "5")]
    pub(crate) rate: usize,

    /// A pose needs more than this many pose lines to be classified.
    #[structopt(long, default_value = "12")]
    pub(crate) min_pose_lines: usize,

    #[structopt(short = "-W", long, default_value = "25")]
    pub(crate) wait_key_ms: i32,

    /// Report similarity of each classified pose to its class's ideal pose.
    #[structopt(long)]
    pub(crate) compare_ideal: bool,

    #[structopt(flatten)]
    pub(crate) train: crate::train::TrainOptions,
}

#[cfg(feature = "gui")]
const COCO_COLORS: [(f64, f64, f64); 18] = [
    (255.0, 0.0, 0.0),
    (255.0, 85.0, 0.0),
    (255.0, 170.0, 0.0),
    (255.0, 255.0, 0.0),
    (170.0, 255.0, 0.0),
    (85.0, 255.0, 0.0),
    (0.0, 255.0, 0.0),
    (0.0, 255.0, 85.0),
    (0.0, 255.0, 170.0),
    (0.0, 255.0, 255.0),
    (0.0, 170.0, 255.0),
    (0.0, 85.0, 255.0),
    (0.0, 0.0, 255.0),
    (85.0, 0.0, 255.0),
    (170.0, 0.0, 255.0),
    (255.0, 0.0, 255.0),
    (255.0, 0.0, 170.0),
    (255.0, 0.0, 85.0),
];

#[cfg(feature = "gui")]
fn draw_pose(
    response: Option<&PoseResponse>,
    classification: Option<&Classification>,
    frame: &mut Mat,
) -> Result<(), Error> {
    use num_traits::cast::ToPrimitive;
    use opencv::{
        core::{Point2i, Scalar},
        imgproc::{FONT_HERSHEY_SIMPLEX, LINE_8, LINE_AA},
    };

    const WHITE: (f64, f64, f64) = (255.0, 255.0, 255.0);

    let to_i32 = |value: f32| value.to_i32().ok_or(Error::ConvertLineCoordinate(value));

    for prediction in response.iter().flat_map(|response| &response.predictions) {
        for (i, pose_line) in prediction.pose_lines.iter().enumerate() {
            let [x1, y1, x2, y2] = pose_line.line;
            // the service reports RGB colours, the frame is BGR
            let (r, g, b) = COCO_COLORS[i % COCO_COLORS.len()];
            opencv::imgproc::line(
                frame,
                Point2i::new(to_i32(x1)?, to_i32(y1)?),
                Point2i::new(to_i32(x2)?, to_i32(y2)?),
                Scalar::from((b, g, r)),
                3,      // thickness
                LINE_8, // line_type
                0,      // shift
            )
            .map_err(Error::DrawLine)?;
        }
    }

    if let Some(classification) = classification {
        opencv::imgproc::put_text(
            frame,
            &classification.to_string(),
            Point2i::new(0, 15),
            FONT_HERSHEY_SIMPLEX,
            0.5,
            Scalar::from(WHITE),
            1,       // thickness
            LINE_AA, // line_type
            false,   // bottom_left_origin
        )
        .map_err(Error::PutText)?;
    }
    opencv::highgui::imshow("poses", frame).map_err(Error::ImShow)
}

#[cfg(not(feature = "gui"))]
fn draw_pose(
    _response: Option<&PoseResponse>,
    _classification: Option<&Classification>,
    _frame: &mut Mat,
) -> Result<(), Error> {
    Ok(())
}

#[cfg(feature = "gui")]
fn wait_q(delay_ms: i32) -> Result<bool> {
    const Q_KEY: u8 = b'q';
    Ok(opencv::highgui::wait_key(delay_ms)? != i32::from(Q_KEY))
}

#[cfg(not(feature = "gui"))]
fn wait_q(_delay_ms: i32) -> Result<bool> {
    Ok(true)
}

fn encode_jpeg(frame: &Mat) -> Result<Vec<u8>, Error> {
    let mut buf = Vector::<u8>::new();
    imencode(".jpg", frame, &mut buf, &Vector::<i32>::new()).map_err(Error::EncodeFrame)?;
    Ok(buf.to_vec())
}

/// Pose and classification of one sampled frame.
fn classify_frame<E>(
    frame: &Mat,
    estimator: &E,
    context: &InferenceContext,
    min_pose_lines: usize,
) -> Result<(PoseResponse, Option<Classification>), Error>
where
    E: PoseEstimator + ?Sized,
{
    let image = encode_jpeg(frame)?;
    let response = estimator.estimate(&image, "image.jpg")?;
    let classification = context
        .classify_response(&response, min_pose_lines)?
        .map(|(_, classification)| classification);
    if classification.is_none() {
        if let Some(prediction) = response.first() {
            debug!(
                message = "pose is not full-body",
                pose_lines = prediction.pose_lines.len(),
                missing = ?prediction.missing_parts()
            );
        }
    }
    Ok((response, classification))
}

/// What is drawn over each frame: the result of the latest sampled frame.
#[derive(Debug, Default)]
struct Overlay {
    response: Option<PoseResponse>,
    classification: Option<Classification>,
}

impl Overlay {
    /// A sampled frame without a full-body pose clears the overlay.
    fn update(&mut self, response: PoseResponse, classification: Option<Classification>) {
        *self = match classification {
            Some(classification) => Self {
                response: Some(response),
                classification: Some(classification),
            },
            None => Self::default(),
        };
    }

    fn draw(&self, frame: &mut Mat) -> Result<(), Error> {
        draw_pose(self.response.as_ref(), self.classification.as_ref(), frame)
    }
}

fn report(
    classification: &Classification,
    context: &InferenceContext,
    compare_ideal: bool,
    progress: Option<&ProgressBar>,
) {
    let similarity = if compare_ideal {
        context.similarity_to_ideal(classification)
    } else {
        None
    };
    info!(
        message = "classified pose",
        label = %classification.label,
        class_id = classification.class_id,
        confidence = classification.confidence,
        similarity = ?similarity
    );
    if let Some(progress) = progress {
        progress.set_message(match similarity {
            Some(similarity) => format!("{} (ideal: {:.2})", classification, similarity),
            None => classification.to_string(),
        });
        progress.inc(1);
    }
}

/// Classify poses from a webcam until the capture ends, Ctrl-C is pressed or `q` is hit.
pub(crate) fn run<E>(
    estimator: &E,
    context: &InferenceContext,
    opts: &LiveOptions,
    show_progress: bool,
) -> Result<()>
where
    E: PoseEstimator + ?Sized,
{
    let rate = opts.rate.max(1);
    let mut capture =
        VideoCapture::new(opts.device, CAP_ANY).context("failed to construct video capture")?;
    capture
        .set(CAP_PROP_FRAME_WIDTH, f64::from(opts.frame_width))
        .context("failed to set frame width")?;
    capture
        .set(CAP_PROP_FRAME_HEIGHT, f64::from(opts.frame_height))
        .context("failed to set frame height")?;
    if !capture.is_opened().context("failed to query video capture")? {
        return Err(Error::OpenCapture(opts.device).into());
    }

    info!(
        message = "started live classification",
        model_id = %context.model().model_id,
        device = opts.device,
        width = capture.get(CAP_PROP_FRAME_WIDTH)?,
        height = capture.get(CAP_PROP_FRAME_HEIGHT)?,
        rate
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_ctrl_c = running.clone();
    ctrlc::set_handler(move || {
        running_ctrl_c.store(false, Ordering::SeqCst);
    })
    .context("failed setting Ctrl-C handler")?;

    let progress = if show_progress {
        Some(
            ProgressBar::new_spinner().with_style(
                ProgressStyle::default_spinner()
                    .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
                    .template("{prefix:.bold.dim} {spinner} {wide_msg}"),
            ),
        )
    } else {
        None
    };

    let mut frame = Mat::default();
    let mut overlay = Overlay::default();
    let mut frame_num = 0_usize;

    while running.load(Ordering::SeqCst) {
        if !capture.read(&mut frame).map_err(Error::ReadFrame)? || frame.rows() == 0 {
            warn!(message = "video capture returned no frame", frame_num);
            return Err(Error::CaptureEnded.into());
        }

        if frame_num % rate == 0 {
            match classify_frame(&frame, estimator, context, opts.min_pose_lines) {
                Ok((response, classification)) => {
                    match &classification {
                        Some(classification) => {
                            report(classification, context, opts.compare_ideal, progress.as_ref())
                        }
                        None => debug!(message = "no full-body pose in frame", frame_num),
                    }
                    overlay.update(response, classification);
                }
                Err(error) if error.is_recoverable() => {
                    warn!(message = "skipping frame", frame_num, error = %error);
                }
                Err(error) => {
                    return Err(error).context("failed classifying frame");
                }
            }
        } else {
            trace!(message = "skipped frame", frame_num);
        }

        overlay.draw(&mut frame).context("failed drawing pose")?;

        if !wait_q(opts.wait_key_ms).context("failed waiting for 'q' key")? {
            running.store(false, Ordering::SeqCst);
        }
        frame_num += 1;
    }

    if let Some(progress) = progress {
        progress.finish_and_clear();
    }
    info!(message = "stopped live classification", frames = frame_num);
    Ok(())
}
