//! Remote controller: named `(url, fetch-refspec)` tuples persisted in config, the tracking refs
//! under `refs/remotes/<name>/…` a fetch leaves behind, and the `FETCH_HEAD` record of what was
//! last fetched and from where.

use std::fmt::Write as _;
use std::fs;

use crate::config::RepoConfig;
use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::protocol::client::SmartHttpClient;
use crate::protocol::core::RepositoryAccess;
use crate::protocol::types::ServiceType;
use crate::refs::RefStore;

const FETCH_HEAD_FILE: &str = "FETCH_HEAD";

/// A remote's one fetch refspec, e.g. `+refs/heads/*:refs/remotes/origin/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    pub force: bool,
    pub src_pattern: String,
    pub dst_pattern: String,
}

impl Refspec {
    pub fn parse(raw: &str) -> Result<Self, GitError> {
        let (force, rest) = match raw.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (src, dst) = rest.split_once(':').ok_or_else(|| {
            GitError::InvalidArgument(format!("refspec `{raw}` is missing a `:`"))
        })?;
        Ok(Refspec {
            force,
            src_pattern: src.to_string(),
            dst_pattern: dst.to_string(),
        })
    }

    /// If `ref_name` matches this refspec's source pattern (a single trailing `*` wildcard, or an
    /// exact match with none), return the destination ref name it maps to.
    pub fn map(&self, ref_name: &str) -> Option<String> {
        match self.src_pattern.strip_suffix('*') {
            Some(prefix) => {
                let suffix = ref_name.strip_prefix(prefix)?;
                let dst_prefix = self.dst_pattern.strip_suffix('*')?;
                Some(format!("{dst_prefix}{suffix}"))
            }
            None => (self.src_pattern == ref_name).then(|| self.dst_pattern.clone()),
        }
    }
}

/// One ref updated by a fetch: its remote-tracking name and the hash it now points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedRef {
    pub tracking_ref: String,
    pub hash: ObjectHash,
}

/// Outcome of a single `fetch()` call.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub updated: Vec<FetchedRef>,
    /// Tracking-ref writes that failed; per spec these are warnings, never a fetch failure.
    pub tracking_warnings: Vec<String>,
}

/// Read `remote.<name>.{url,fetch}` and run fetch/tracking-ref/FETCH_HEAD bookkeeping against it.
pub struct RemoteController<'a> {
    config: &'a RepoConfig,
    refs: &'a RefStore,
    wit_dir: std::path::PathBuf,
}

impl<'a> RemoteController<'a> {
    pub fn new(config: &'a RepoConfig, refs: &'a RefStore, wit_dir: impl Into<std::path::PathBuf>) -> Self {
        RemoteController { config, refs, wit_dir: wit_dir.into() }
    }

    /// Fetch every ref matching `<name>`'s configured refspec, writing tracking refs and
    /// `FETCH_HEAD`. Objects are written through `access` (the repository's `RepositoryAccess`
    /// implementation), so the local object store ends up with everything the tracking refs need
    /// without this module knowing anything about pack internals.
    pub async fn fetch<A: RepositoryAccess>(
        &self,
        name: &str,
        access: &A,
    ) -> Result<FetchReport, GitError> {
        let remote = self
            .config
            .remote(name)
            .ok_or_else(|| GitError::InvalidArgument(format!("no remote named `{name}`")))?;
        let url = remote
            .url
            .as_ref()
            .ok_or_else(|| GitError::InvalidArgument(format!("remote `{name}` has no url")))?;
        let refspec = Refspec::parse(
            remote
                .fetch
                .as_deref()
                .unwrap_or(&format!("+refs/heads/*:refs/remotes/{name}/*")),
        )?;

        let client = SmartHttpClient::new(url);
        let advertisement = client.list_refs(ServiceType::UploadPack).await?;

        let mut wants = Vec::new();
        let mut mapped = Vec::new();
        for git_ref in &advertisement.refs {
            let Some(tracking_ref) = refspec.map(&git_ref.name) else {
                continue;
            };
            let hash: ObjectHash = git_ref
                .hash
                .parse()
                .map_err(GitError::InvalidHashValue)?;
            wants.push(hash);
            mapped.push((git_ref.name.clone(), tracking_ref, hash));
        }

        if !wants.is_empty() {
            let pack_data = client.upload_pack(&wants, &[]).await?;
            access
                .store_pack_data(&pack_data)
                .await
                .map_err(|e| GitError::NetworkError(e.to_string()))?;
        }

        let mut report = FetchReport::default();
        for (_, tracking_ref, hash) in &mapped {
            match self.refs.update(tracking_ref, *hash) {
                Ok(()) => report.updated.push(FetchedRef { tracking_ref: tracking_ref.clone(), hash: *hash }),
                Err(e) => report.tracking_warnings.push(format!("{tracking_ref}: {e}")),
            }
        }

        self.write_fetch_head(url, &mapped)?;
        Ok(report)
    }

    fn write_fetch_head(&self, url: &str, mapped: &[(String, String, ObjectHash)]) -> Result<(), GitError> {
        let mut body = String::new();
        for (remote_ref, _, hash) in mapped {
            let _ = writeln!(body, "{hash}\t\tbranch '{remote_ref}' of {url}");
        }
        fs::write(self.wit_dir.join(FETCH_HEAD_FILE), body)?;
        Ok(())
    }
}

/// Run `push_one` against each of `remote_names` in the given order, sequentially (never rolled
/// back on a later failure): a remote push never undoes a previous remote's accepted objects and
/// refs. Overall success requires every remote to have succeeded.
pub async fn push_to_remotes<F, Fut>(
    remote_names: &[String],
    mut push_one: F,
) -> Result<(), Vec<(String, GitError)>>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = Result<(), GitError>>,
{
    let mut failures = Vec::new();
    for name in remote_names {
        if let Err(e) = push_one(name.clone()).await {
            failures.push((name.clone(), e));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refspec_maps_a_wildcard_branch() {
        let spec = Refspec::parse("+refs/heads/*:refs/remotes/origin/*").unwrap();
        assert!(spec.force);
        assert_eq!(
            spec.map("refs/heads/main"),
            Some("refs/remotes/origin/main".to_string())
        );
        assert_eq!(spec.map("refs/tags/v1"), None);
    }

    #[test]
    fn refspec_rejects_missing_colon() {
        assert!(Refspec::parse("refs/heads/*").is_err());
    }

    #[tokio::test]
    async fn push_to_remotes_collects_failures_without_stopping() {
        let remotes = vec!["origin".to_string(), "backup".to_string()];
        let result = push_to_remotes(&remotes, |name| async move {
            if name == "origin" {
                Err(GitError::NetworkError("unreachable".to_string()))
            } else {
                Ok(())
            }
        })
        .await;

        let failures = result.unwrap_err();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "origin");
    }
}
