use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory of frames to replay as the camera feed
    #[arg(long)]
    pub frames: Option<PathBuf>,

    /// Capture from the live camera instead (requires the `camera` feature)
    #[arg(long, default_value_t = false)]
    pub camera: bool,

    /// Loop the frame directory until --max-frames is reached
    #[arg(long, default_value_t = false)]
    pub loop_frames: bool,

    /// JSON detection script for the replay detector
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// UltraFace ONNX model (requires the `onnx` feature)
    #[arg(long)]
    pub model: Option<String>,

    /// Start with the back camera
    #[arg(long, default_value_t = false)]
    pub back: bool,

    /// Treat the display as landscape
    #[arg(long, default_value_t = false)]
    pub landscape: bool,

    /// Write annotated frames to this directory
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Toggle front/back camera every N rendered frames
    #[arg(long)]
    pub switch_every: Option<u64>,

    /// Stop after N rendered frames
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Configuration file
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,
}
