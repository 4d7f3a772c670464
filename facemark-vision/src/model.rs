use std::path::Path;

use anyhow::{Context, Result};
#[allow(unused_imports)]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

/// Load the YuNet face detector from an ONNX file.
pub fn detector_session(path: &Path) -> Result<Session> {
    if !path.is_file() {
        anyhow::bail!("detector model not found at {}", path.display());
    }
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load detector model {}", path.display()))
}
