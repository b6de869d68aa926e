use std::path::Path;

use anyhow::Result;
use codegate_config::CodegateConfig;

use super::{build_validator, cancel_on_ctrl_c, load_artifact, print_json};

/// Validate one artifact. Returns whether the report is valid.
pub async fn handle_validate_command(
    config: &CodegateConfig,
    artifact_path: &Path,
    pretty: bool,
) -> Result<bool> {
    let artifact = load_artifact(artifact_path)?;
    let validator = build_validator(config)?;
    let cancel = cancel_on_ctrl_c();

    tracing::info!(
        artifact = %artifact.id().short(),
        language = %artifact.language(),
        dependencies = artifact.dependencies().len(),
        "validating artifact"
    );
    let report = validator.validate_with_cancel(&artifact, &cancel).await;
    print_json(&report, pretty)?;
    Ok(report.valid)
}
