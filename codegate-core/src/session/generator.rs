use async_trait::async_trait;

use crate::artifact::Artifact;
use crate::finding::Finding;

/// Producer of replacement artifacts.
///
/// Receives the artifact that failed and the findings of its report.
/// Errors end the session; they are never retried.
#[async_trait]
pub trait Regenerator: Send + Sync {
    async fn regenerate(&self, artifact: &Artifact, findings: &[Finding])
    -> anyhow::Result<Artifact>;
}

#[async_trait]
impl<F> Regenerator for F
where
    F: Fn(&Artifact, &[Finding]) -> anyhow::Result<Artifact> + Send + Sync,
{
    async fn regenerate(
        &self,
        artifact: &Artifact,
        findings: &[Finding],
    ) -> anyhow::Result<Artifact> {
        self(artifact, findings)
    }
}
