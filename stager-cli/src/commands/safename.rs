//! `stager safename <url>`: show how a locator maps onto the staging area.

use anyhow::{Context, Result};
use clap::Args;

use stager_core::naming::{safename, safename_to_filename};

#[derive(Args, Debug)]
pub struct SafenameArgs {
    /// Download locator.
    pub url: String,

    /// Expected SHA-256 digest of the artifact.
    #[arg(long)]
    pub sha256: Option<String>,
}

impl SafenameArgs {
    pub fn run(self) -> Result<()> {
        let name = safename(&self.url, self.sha256.as_deref());
        let filename = safename_to_filename(&name)
            .with_context(|| format!("'{}' has no file name", name.as_str()))?;
        println!("safename: {}", name.as_str());
        println!("filename: {filename}");
        Ok(())
    }
}
