use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use crate::encode::sink::{EncodeConfig, FrameEncoder};
use crate::foundation::config::EncoderConfig;
use crate::foundation::core::FrameBuffer;
use crate::foundation::error::{CaptureError, CaptureResult};
use crate::quality::preset::{PaletteParams, StatsMode};
use crate::storage::store::UploadBody;

/// How to invoke the external encoder.
#[derive(Clone, Debug)]
pub struct FfmpegOpts {
    pub program: PathBuf,
    /// Inserted before the input options (e.g. `-threads 2`).
    pub extra_input_args: Vec<String>,
}

impl Default for FfmpegOpts {
    fn default() -> Self {
        Self::from(&EncoderConfig::default())
    }
}

impl From<&EncoderConfig> for FfmpegOpts {
    fn from(cfg: &EncoderConfig) -> Self {
        Self {
            program: cfg.program.clone(),
            extra_input_args: cfg.extra_input_args.clone(),
        }
    }
}

/// Two-pass palette filter graph: generate a palette from the stream, then map every frame onto
/// it.
pub fn build_palette_filter(palette: &PaletteParams) -> String {
    let gen_opts = format!(
        "max_colors={}:stats_mode={}",
        palette.max_colors.clamp(2, 256),
        palette.stats_mode.filter_value()
    );
    let mut use_opts = format!("dither={}", palette.dither.filter_value());
    match palette.stats_mode {
        StatsMode::Diff => use_opts.push_str(":diff_mode=rectangle"),
        StatsMode::Single => use_opts.push_str(":new=1"),
        StatsMode::Full => {}
    }
    format!("[0:v]split[a][b];[a]palettegen={gen_opts}[p];[b][p]paletteuse={use_opts}")
}

/// Full argument list for one encode: PNG frames on stdin, looping GIF on stdout.
pub fn build_args(opts: &FfmpegOpts, cfg: &EncodeConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .into_iter()
        .map(String::from)
        .collect();
    args.extend(opts.extra_input_args.iter().cloned());
    args.extend(
        [
            "-f".to_string(),
            "image2pipe".to_string(),
            // Rational rate keeps centisecond frame delays exact.
            "-framerate".to_string(),
            format!("{}/{}", cfg.fps.num, cfg.fps.den),
            "-c:v".to_string(),
            "png".to_string(),
            "-i".to_string(),
            "pipe:0".to_string(),
            "-filter_complex".to_string(),
            build_palette_filter(&cfg.palette),
            "-loop".to_string(),
            "0".to_string(),
            "-f".to_string(),
            "gif".to_string(),
            "pipe:1".to_string(),
        ],
    );
    args
}

/// Streaming GIF encoder backed by the system `ffmpeg`.
///
/// stdout is handed to the caller as the upload body; stderr is drained on a separate task so a
/// chatty encoder can never block on a full pipe.
pub struct FfmpegGifEncoder {
    opts: FfmpegOpts,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    cfg: Option<EncodeConfig>,
    last_seq: Option<u64>,
}

impl FfmpegGifEncoder {
    pub fn new(opts: FfmpegOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            cfg: None,
            last_seq: None,
        }
    }

    async fn wait_child(&mut self) -> CaptureResult<(ExitStatus, Vec<u8>)> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| CaptureError::encoder_not_ready("ffmpeg encoder not started"))?;
        let status = child.wait().await.map_err(|e| {
            CaptureError::encode_failed(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;
        let stderr = match self.stderr_drain.take() {
            Some(handle) => handle
                .await
                .map_err(|e| CaptureError::encode_failed(format!("ffmpeg stderr drain: {e}")))?
                .map_err(|e| CaptureError::encode_failed(format!("ffmpeg stderr read: {e}")))?,
            None => Vec::new(),
        };
        Ok((status, stderr))
    }
}

#[async_trait]
impl FrameEncoder for FfmpegGifEncoder {
    async fn start(&mut self, cfg: &EncodeConfig) -> CaptureResult<UploadBody> {
        cfg.validate()?;
        if self.child.is_some() {
            return Err(CaptureError::validation("ffmpeg encoder already started"));
        }

        let mut cmd = Command::new(&self.opts.program);
        cmd.args(build_args(&self.opts, cfg))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            CaptureError::encode_failed(format!(
                "failed to spawn '{}' (is it installed and on PATH?): {e}",
                self.opts.program.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::encode_failed("failed to open ffmpeg stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::encode_failed("failed to open ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CaptureError::encode_failed("failed to open ffmpeg stderr"))?;
        let stderr_drain = tokio::spawn(async move {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes).await?;
            Ok(bytes)
        });

        tracing::debug!(
            width = cfg.width,
            height = cfg.height,
            fps = %format!("{}/{}", cfg.fps.num, cfg.fps.den),
            "ffmpeg encoder started"
        );
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(*cfg);
        self.last_seq = None;
        Ok(Box::new(stdout))
    }

    async fn write_frame(&mut self, frame: &FrameBuffer) -> CaptureResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| CaptureError::encoder_not_ready("ffmpeg encoder not started"))?;
        if let Some(last) = self.last_seq
            && frame.seq <= last
        {
            return Err(CaptureError::validation(
                "ffmpeg encoder received out-of-order frame",
            ));
        }
        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(CaptureError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }
        self.last_seq = Some(frame.seq);

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(CaptureError::encoder_not_ready(
                "ffmpeg encoder is already finalized",
            ));
        };
        stdin.write_all(&frame.data).await.map_err(|e| {
            CaptureError::encode_failed(format!("failed to write frame to ffmpeg stdin: {e}"))
        })
    }

    async fn finish(&mut self) -> CaptureResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        let (status, stderr) = self.wait_child().await?;
        self.cfg = None;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(CaptureError::encode_failed(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn abort(&mut self) {
        drop(self.stdin.take());
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        if let Ok((status, _)) = self.wait_child().await {
            tracing::debug!(%status, "ffmpeg encoder aborted");
        }
        self.cfg = None;
    }
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
