use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use super::{BuiltinPayloads, Payload, PayloadRepository, ScanType};

/// Loads payload packs (`rfi.txt`, `lfi.txt`) from a base directory, one payload per line.
///
/// A missing pack file falls back to the built-in set for that scan type.
pub struct FilePayloadRepository {
    base_path: PathBuf,
    cache: Mutex<HashMap<ScanType, Vec<Payload>>>,
}

impl FilePayloadRepository {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn pack_path(&self, scan_type: ScanType) -> PathBuf {
        self.base_path.join(scan_type.pack_file_name())
    }

    fn read_pack(&self, scan_type: ScanType) -> Result<Vec<Payload>> {
        let path = self.pack_path(scan_type);
        if !path.exists() {
            debug!(path = %path.display(), "payload pack missing, using built-in set");
            return Ok(BuiltinPayloads::payloads(scan_type));
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read payload pack at {}", path.display()))?;

        let mut seen = HashSet::new();
        let mut payloads = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if !seen.insert(trimmed.to_string()) {
                return Err(anyhow!(
                    "duplicate payload `{trimmed}` at {}:{}",
                    path.display(),
                    idx + 1
                ));
            }
            let payload = Payload::new(trimmed, scan_type).with_context(|| {
                format!("invalid payload at {}:{}", path.display(), idx + 1)
            })?;
            payloads.push(payload);
        }
        if payloads.is_empty() {
            return Err(anyhow!("payload pack {} contains no payloads", path.display()));
        }
        Ok(payloads)
    }
}

#[async_trait::async_trait]
impl PayloadRepository for FilePayloadRepository {
    async fn load_payloads(&self, scan_type: ScanType) -> Result<Vec<Payload>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow!("payload cache lock poisoned"))?;
        if let Some(payloads) = cache.get(&scan_type) {
            return Ok(payloads.clone());
        }
        let payloads = self.read_pack(scan_type)?;
        cache.insert(scan_type, payloads.clone());
        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::Path;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn loads_pack_skipping_comments_and_blanks() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("lfi.txt"),
            r#"
# traversal depth 4
/../../../../etc/passwd

/../../../../etc/shadow
"#,
        );

        let repo = FilePayloadRepository::new(temp.path());
        let payloads = repo.load_payloads(ScanType::Lfi).await.unwrap();
        let values: Vec<_> = payloads.iter().map(|p| p.value.as_str()).collect();
        assert_eq!(values, vec!["/../../../../etc/passwd", "/../../../../etc/shadow"]);
        assert!(payloads.iter().all(|p| p.scan_type == ScanType::Lfi));
    }

    #[tokio::test]
    async fn missing_pack_falls_back_to_builtin() {
        let temp = tempfile::tempdir().unwrap();
        let repo = FilePayloadRepository::new(temp.path());
        let payloads = repo.load_payloads(ScanType::Rfi).await.unwrap();
        assert_eq!(payloads, BuiltinPayloads::payloads(ScanType::Rfi));
    }

    #[tokio::test]
    async fn duplicate_payloads_error() {
        let temp = tempfile::tempdir().unwrap();
        write(
            &temp.path().join("rfi.txt"),
            "http://a.test/x.txt?\nhttp://a.test/x.txt?\n",
        );
        let repo = FilePayloadRepository::new(temp.path());
        let err = repo.load_payloads(ScanType::Rfi).await.unwrap_err();
        assert!(err.to_string().contains("duplicate payload `http://a.test/x.txt?`"));
        assert!(err.to_string().contains(":2"));
    }

    #[tokio::test]
    async fn empty_pack_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        write(&temp.path().join("rfi.txt"), "# nothing here\n\n");
        let repo = FilePayloadRepository::new(temp.path());
        let err = repo.load_payloads(ScanType::Rfi).await.unwrap_err();
        assert!(err.to_string().contains("contains no payloads"));
    }

    #[tokio::test]
    async fn caches_loaded_pack() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("lfi.txt");
        write(&path, "/etc/passwd\n");
        let repo = FilePayloadRepository::new(temp.path());
        let first = repo.load_payloads(ScanType::Lfi).await.unwrap();
        write(&path, "/etc/hosts\n");
        let second = repo.load_payloads(ScanType::Lfi).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn loads_sample_packs_from_repo() {
        let repo_path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../payloads")
            .canonicalize()
            .expect("payloads directory should exist");
        let repo = FilePayloadRepository::new(repo_path);
        let rfi = repo.load_payloads(ScanType::Rfi).await.expect("rfi pack should parse");
        let lfi = repo.load_payloads(ScanType::Lfi).await.expect("lfi pack should parse");
        assert!(rfi.iter().any(|p| p.value == "http://evil.com/shell.txt?"));
        assert!(lfi.iter().any(|p| p.value.ends_with("etc/passwd")));
    }

    fn payload_token() -> impl Strategy<Value = String> {
        proptest::string::string_regex("/[A-Za-z0-9._\\-/]{2,40}").unwrap()
    }

    proptest! {
        #[test]
        fn unique_lines_load_in_order(
            entries in proptest::collection::hash_set(payload_token(), 1..16)
        ) {
            let entries: Vec<_> = entries.into_iter().collect();
            let temp = tempfile::tempdir().unwrap();
            write(&temp.path().join("lfi.txt"), &entries.join("\n"));

            let repo = FilePayloadRepository::new(temp.path());
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let payloads = runtime
                .block_on(repo.load_payloads(ScanType::Lfi))
                .expect("payload pack should parse");

            let values: Vec<_> = payloads.into_iter().map(|p| p.value).collect();
            prop_assert_eq!(values, entries);
        }
    }
}
