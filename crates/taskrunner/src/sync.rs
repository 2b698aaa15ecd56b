//! Source synchronization and remote execution
//!
//! A sync replaces the unit's target directory with the local source tree.
//! The tree travels as a tar archive over the exec stdin stream and is
//! unpacked by the container's own `tar`.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::gateway::ClusterGateway;
use crate::readiness::require_running;

/// tar pads archives to a multiple of this many bytes
const RECORD_SIZE: usize = 10240;

/// Shell used for every remote command
const SHELL: [&str; 2] = ["/bin/sh", "-c"];

/// Pack the contents of `source` into an in-memory tar archive.
///
/// Entries are stored relative to `source`. Top-level entries named in
/// `ignores` are left out; nested entries with the same name are kept.
pub fn pack_source(source: &Path, ignores: &[String]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let mut entries = fs::read_dir(source)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name();
        if ignores.iter().any(|ignored| name == ignored.as_str()) {
            debug!("Skipping ignored entry {:?}", name);
            continue;
        }

        let path = entry.path();
        if entry.file_type()?.is_dir() {
            builder.append_dir_all(&name, &path)?;
        } else {
            builder.append_path_with_name(&path, &name)?;
        }
    }

    let mut archive = builder.into_inner()?;
    let padded = archive.len().div_ceil(RECORD_SIZE) * RECORD_SIZE;
    archive.resize(padded.max(RECORD_SIZE), 0);
    Ok(archive)
}

/// Single-quote `value` for `/bin/sh`
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn shell(line: String) -> Vec<String> {
    vec![SHELL[0].to_string(), SHELL[1].to_string(), line]
}

/// Where a sync lands and what to leave behind
#[derive(Debug, Clone, Copy)]
pub struct SyncTarget<'a> {
    pub selector: &'a str,
    pub container: Option<&'a str>,
    pub target: &'a str,
    pub ignores: &'a [String],
    pub readiness_timeout: Option<Duration>,
}

/// Replace `target` inside the unit's pod with the local `source` tree.
///
/// Returns the pod the source landed in.
pub async fn sync_project(
    gateway: &dyn ClusterGateway,
    source: &Path,
    to: SyncTarget<'_>,
) -> Result<String> {
    let pod = require_running(gateway, to.selector, to.readiness_timeout)
        .await
        .map_err(|e| Error::SyncFailed {
            source_path: source.to_path_buf(),
            target: to.target.to_string(),
            pod: to.selector.to_string(),
            reason: e.to_string(),
        })?;
    let pod_name = pod.metadata.name.unwrap_or_default();

    let failed = |reason: String| Error::SyncFailed {
        source_path: source.to_path_buf(),
        target: to.target.to_string(),
        pod: pod_name.clone(),
        reason,
    };

    info!("🔄 Syncing {} to {}:{}", source.display(), pod_name, to.target);

    let target = quote(to.target);
    let reset = shell(format!("rm -rf {target} && mkdir -p {target}"));
    let mut discard = tokio::io::sink();
    gateway
        .exec(&pod_name, to.container, &reset, None, &mut discard)
        .await
        .map_err(|e| failed(format!("preparing target directory: {e}")))?;

    gateway
        .copy_to_pod(source, &pod_name, to.container, to.target, to.ignores)
        .await
        .map_err(|e| failed(format!("copying files: {e}")))?;

    debug!("Sync to {} complete", pod_name);
    Ok(pod_name)
}

/// Run a task's command through the container shell, streaming output to `sink`
pub async fn execute_task(
    gateway: &dyn ClusterGateway,
    command: &[String],
    pod: &str,
    container: Option<&str>,
    sink: &mut (dyn AsyncWrite + Send + Unpin),
) -> Result<()> {
    let line = command.join(" ");
    info!("▶️ Executing `{}` in {}", line, pod);

    gateway
        .exec(pod, container, &shell(line.clone()), None, sink)
        .await
        .map_err(|e| Error::ExecFailed {
            command: line,
            pod: pod.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;
    use std::io::Read;

    fn source_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pom.xml"), "<project/>").unwrap();
        fs::create_dir_all(dir.path().join("src/main")).unwrap();
        fs::write(dir.path().join("src/main/App.java"), "class App {}").unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: main").unwrap();
        fs::create_dir_all(dir.path().join("src/.git")).unwrap();
        fs::write(dir.path().join("src/.git/keep"), "").unwrap();
        dir
    }

    fn archive_paths(archive: &[u8]) -> Vec<String> {
        let mut reader = tar::Archive::new(archive);
        reader
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string()
            })
            .collect()
    }

    fn ignores() -> Vec<String> {
        vec![".git".to_string()]
    }

    #[test]
    fn test_pack_skips_top_level_ignores_only() {
        let dir = source_tree();
        let archive = pack_source(dir.path(), &ignores()).unwrap();
        assert_eq!(archive.len() % RECORD_SIZE, 0);

        let paths = archive_paths(&archive);
        assert!(paths.contains(&"pom.xml".to_string()));
        assert!(paths.contains(&"src/main/App.java".to_string()));
        assert!(paths.contains(&"src/.git/keep".to_string()));
        assert!(!paths.iter().any(|p| p.starts_with(".git")));
    }

    #[test]
    fn test_pack_keeps_file_contents() {
        let dir = source_tree();
        let archive = pack_source(dir.path(), &[]).unwrap();
        let mut reader = tar::Archive::new(archive.as_slice());
        let mut entry = reader
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .find(|e| e.path().unwrap().to_string_lossy() == "pom.xml")
            .unwrap();
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "<project/>");
    }

    #[test]
    fn test_pack_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(pack_source(&dir.path().join("nope"), &[]).is_err());
    }

    #[tokio::test]
    async fn test_sync_resets_target_then_copies() {
        let cluster = FakeCluster::new();
        cluster.add_running_pod("web-shopbuilder", &[("app", "web-shopbuilder")]);
        let dir = source_tree();
        let ignores = ignores();

        let pod = sync_project(
            &cluster,
            dir.path(),
            SyncTarget {
                selector: "app=web-shopbuilder",
                container: None,
                target: "/src",
                ignores: &ignores,
                readiness_timeout: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(pod, "web-shopbuilder");

        let execs = cluster.execs();
        assert_eq!(execs.len(), 1);
        assert_eq!(
            execs[0].command,
            vec!["/bin/sh", "-c", "rm -rf '/src' && mkdir -p '/src'"]
        );

        let copies = cluster.copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].target, "/src");
        assert_eq!(copies[0].pod, "web-shopbuilder");
    }

    #[tokio::test]
    async fn test_sync_without_running_pod_fails() {
        let cluster = FakeCluster::new();
        let dir = source_tree();
        let err = sync_project(
            &cluster,
            dir.path(),
            SyncTarget {
                selector: "app=missing",
                container: None,
                target: "/src",
                ignores: &[],
                readiness_timeout: Some(Duration::from_secs(1)),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SyncFailed { ref pod, .. } if pod == "app=missing"));
        assert!(cluster.execs().is_empty());
    }

    #[tokio::test]
    async fn test_sync_failure_names_pod_and_target() {
        let cluster = FakeCluster::new();
        cluster.add_running_pod("p", &[("app", "x")]);
        cluster.fail_command("rm -rf");
        let dir = source_tree();
        let err = sync_project(
            &cluster,
            dir.path(),
            SyncTarget {
                selector: "app=x",
                container: None,
                target: "/src",
                ignores: &[],
                readiness_timeout: None,
            },
        )
        .await
        .unwrap_err();
        match err {
            Error::SyncFailed { pod, target, .. } => {
                assert_eq!(pod, "p");
                assert_eq!(target, "/src");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(cluster.copies().is_empty());
    }

    #[test]
    fn test_quote_keeps_paths_literal() {
        assert_eq!(quote("/data/my src"), "'/data/my src'");
        assert_eq!(quote("/tmp/$(id);x"), "'/tmp/$(id);x'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_sync_quotes_target_with_spaces() {
        let cluster = FakeCluster::new();
        cluster.add_running_pod("p", &[("app", "x")]);
        let dir = source_tree();
        sync_project(
            &cluster,
            dir.path(),
            SyncTarget {
                selector: "app=x",
                container: None,
                target: "/work/my project",
                ignores: &[],
                readiness_timeout: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(
            cluster.execs()[0].command[2],
            "rm -rf '/work/my project' && mkdir -p '/work/my project'"
        );
        assert_eq!(cluster.copies()[0].target, "/work/my project");
    }

    #[tokio::test]
    async fn test_execute_joins_tokens_and_streams_output() {
        let cluster = FakeCluster::new();
        let mut out = Vec::new();
        let command = vec!["mvn".to_string(), "-q".to_string(), "package".to_string()];
        execute_task(&cluster, &command, "p", Some("builder"), &mut out)
            .await
            .unwrap();

        let execs = cluster.execs();
        assert_eq!(execs[0].command, vec!["/bin/sh", "-c", "mvn -q package"]);
        assert_eq!(execs[0].container.as_deref(), Some("builder"));
        assert_eq!(String::from_utf8(out).unwrap(), "ran: /bin/sh -c mvn -q package\n");
    }

    #[tokio::test]
    async fn test_execute_failure_is_exec_failed() {
        let cluster = FakeCluster::new();
        cluster.fail_command("mvn");
        let mut out = Vec::new();
        let err = execute_task(&cluster, &["mvn".to_string()], "p", None, &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecFailed { ref command, .. } if command == "mvn"));
    }
}
