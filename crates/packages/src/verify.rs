//! Integrity, structure and content checks for downloaded packages.
//!
//! The content scan is a heuristic lint over text files. False positives and
//! false negatives are both expected.

use std::{
    fs::File,
    io,
    path::Path,
    sync::LazyLock,
};

use {
    claude_skills_common::{ContentType, Error, Result},
    regex::RegexSet,
    sha2::{Digest, Sha256},
    tracing::{debug, info, warn},
    walkdir::WalkDir,
};

use crate::install::extract_zip;

/// Files larger than this are rejected.
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

pub const HASH_MISMATCH: &str = "Package hash verification failed";

const SUSPICIOUS_EXTENSIONS: &[&str] = &["exe", "dll", "so", "dylib", "bat", "sh", "ps1"];

const TEXT_EXTENSIONS: &[&str] = &["js", "ts", "py", "sh", "md", "json", "txt"];

const MALICIOUS_PATTERNS: &[&str] = &[
    r"(?i)eval\s*\(",
    r"(?i)exec\s*\(",
    r"(?i)system\s*\(",
    r"(?i)shell_exec",
    r"(?i)passthru",
    r"(?i)proc_open",
    r"(?i)popen",
    r"(?i)curl_exec",
    r"(?i)file_get_contents.*http",
    r"(?i)base64_decode",
];

static MALICIOUS: LazyLock<std::result::Result<RegexSet, regex::Error>> =
    LazyLock::new(|| RegexSet::new(MALICIOUS_PATTERNS));

/// Outcome of [`verify_package`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    /// Digest actually computed over the archive, when a hash was checked.
    pub hash: Option<String>,
    pub expected_hash: Option<String>,
    pub errors: Vec<String>,
}

impl VerificationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            ..Default::default()
        }
    }

    /// Turn a failed result into [`Error::Verification`].
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            Ok(self)
        } else {
            Err(Error::Verification {
                errors: self.errors,
            })
        }
    }
}

/// Lowercase hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file's SHA-256 against `expected` (case-insensitive).
///
/// A mismatch is reported through the return value, not as an error.
pub fn verify_hash(path: &Path, expected: &str) -> Result<bool> {
    let actual = sha256_file(path)?;
    let matches = actual.eq_ignore_ascii_case(expected.trim());
    if !matches {
        warn!(
            path = %path.display(),
            expected = %expected,
            actual = %actual,
            "package hash mismatch"
        );
    }
    Ok(matches)
}

fn has_extension(path: &Path, candidates: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| candidates.iter().any(|c| ext.eq_ignore_ascii_case(c)))
}

/// Required top-level files are present, no file has a denylisted
/// extension and none exceeds [`MAX_FILE_SIZE`]. Every violation is returned.
pub fn validate_structure(package_dir: &Path, content_type: ContentType) -> Vec<String> {
    let mut errors: Vec<String> = content_type
        .required_files()
        .iter()
        .filter(|file| !package_dir.join(file).is_file())
        .map(|file| format!("Missing required file: {file}"))
        .collect();

    for entry in WalkDir::new(package_dir).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let at = e
                    .path()
                    .unwrap_or(package_dir)
                    .display()
                    .to_string();
                errors.push(format!("Error reading directory: {at}"));
                continue;
            },
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if has_extension(entry.path(), SUSPICIOUS_EXTENSIONS) {
            errors.push(format!("Suspicious file detected: {name}"));
        }
        match entry.metadata() {
            Ok(meta) if meta.len() > MAX_FILE_SIZE => {
                let mb = meta.len() as f64 / 1024.0 / 1024.0;
                errors.push(format!("File too large: {name} ({mb:.2}MB)"));
            },
            Ok(_) => {},
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "metadata unavailable");
            },
        }
    }
    errors
}

/// Scan text-like files for suspicious code. Paths in the returned errors
/// are relative to `package_dir`.
pub fn scan_for_malicious_content(package_dir: &Path) -> Result<Vec<String>> {
    let patterns = MALICIOUS
        .as_ref()
        .map_err(|e| Error::message(format!("invalid content scan pattern: {e}")))?;

    let mut errors = Vec::new();
    for entry in WalkDir::new(package_dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_extension(e.path(), TEXT_EXTENSIONS))
    {
        // Non-UTF-8 content is treated as binary and skipped.
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        if patterns.is_match(&content) {
            let shown = entry
                .path()
                .strip_prefix(package_dir)
                .unwrap_or(entry.path());
            errors.push(format!(
                "Potentially malicious code detected in: {}",
                shown.display()
            ));
        }
    }
    Ok(errors)
}

/// Hash check, then structure and content scans.
///
/// The scans run against `package_dir` when it already exists. Otherwise the
/// archive is extracted into a temporary `claude-verify-*` directory that is
/// removed on every exit path.
pub fn verify_package(
    archive: &Path,
    package_dir: Option<&Path>,
    content_type: ContentType,
    expected_hash: Option<&str>,
) -> Result<VerificationResult> {
    let mut computed = None;
    if let Some(expected) = expected_hash.filter(|h| !h.trim().is_empty()) {
        let actual = sha256_file(archive)?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            warn!(expected = %expected, actual = %actual, "package hash mismatch");
            return Ok(VerificationResult {
                valid: false,
                hash: Some(actual),
                expected_hash: Some(expected.to_owned()),
                errors: vec![HASH_MISMATCH.to_owned()],
            });
        }
        computed = Some(actual);
    }

    let _scratch;
    let verify_dir = match package_dir.filter(|d| d.exists()) {
        Some(dir) => dir.to_path_buf(),
        None => {
            let tmp = tempfile::Builder::new()
                .prefix("claude-verify-")
                .tempdir()?;
            extract_zip(archive, tmp.path())?;
            let dir = tmp.path().to_path_buf();
            _scratch = tmp;
            dir
        },
    };

    let mut errors = validate_structure(&verify_dir, content_type);
    errors.extend(scan_for_malicious_content(&verify_dir)?);

    let mut result = VerificationResult::from_errors(errors);
    result.hash = computed;
    result.expected_hash = expected_hash.map(str::to_owned);
    if result.valid {
        info!(archive = %archive.display(), %content_type, "package verified");
    } else {
        warn!(count = result.errors.len(), "package failed verification");
    }
    Ok(result)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::write_zip;

    #[test]
    fn patterns_compile() {
        assert!(MALICIOUS.is_ok());
    }

    #[test]
    fn hash_matches_true_digest_and_rejects_single_byte_change() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.zip");
        std::fs::write(&path, b"hello package").unwrap();
        let digest = hex::encode(Sha256::digest(b"hello package"));

        assert!(verify_hash(&path, &digest).unwrap());
        assert!(verify_hash(&path, &digest.to_uppercase()).unwrap());

        std::fs::write(&path, b"hello packagf").unwrap();
        assert!(!verify_hash(&path, &digest).unwrap());
    }

    #[test]
    fn structure_reports_missing_and_suspicious_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        std::fs::create_dir_all(dir.join("bin")).unwrap();
        std::fs::write(dir.join("plugin.json"), "{}").unwrap();
        std::fs::write(dir.join("bin/tool.EXE"), "MZ").unwrap();
        std::fs::write(dir.join("install.sh"), "echo hi").unwrap();

        let errors = validate_structure(dir, ContentType::Plugin);
        assert!(errors.contains(&"Missing required file: manifest.json".to_string()));
        assert!(errors.contains(&"Suspicious file detected: tool.EXE".to_string()));
        assert!(errors.contains(&"Suspicious file detected: install.sh".to_string()));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn structure_passes_for_complete_skill() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("SKILL.md"), "# Demo").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "plain").unwrap();
        assert!(validate_structure(tmp.path(), ContentType::Skill).is_empty());
        assert!(validate_structure(tmp.path(), ContentType::Command).is_empty());
    }

    #[test]
    fn structure_flags_large_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("SKILL.md"), "# Demo").unwrap();
        let big = File::create(tmp.path().join("blob.bin")).unwrap();
        big.set_len(MAX_FILE_SIZE + 1).unwrap();

        let errors = validate_structure(tmp.path(), ContentType::Skill);
        assert_eq!(errors, vec!["File too large: blob.bin (50.00MB)".to_string()]);
    }

    #[test]
    fn scan_flags_text_files_only() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("src/run.py"), "import os\nos.system (\"ls\")\n").unwrap();
        std::fs::write(dir.join("README.md"), "Use EVAL( carefully").unwrap();
        std::fs::write(dir.join("clean.js"), "console.log('ok')").unwrap();
        std::fs::write(dir.join("data.bin"), "eval(").unwrap();

        let mut errors = scan_for_malicious_content(dir).unwrap();
        errors.sort();
        assert_eq!(
            errors,
            vec![
                "Potentially malicious code detected in: README.md".to_string(),
                format!(
                    "Potentially malicious code detected in: {}",
                    Path::new("src").join("run.py").display()
                ),
            ]
        );
    }

    #[test]
    fn verify_package_clean_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = tmp.path().join("demo.zip");
        write_zip(&zip, &[("SKILL.md", "# Demo skill"), ("docs/usage.md", "hi")]);
        let hash = sha256_file(&zip).unwrap();

        let result = verify_package(&zip, None, ContentType::Skill, Some(&hash)).unwrap();
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.hash.as_deref(), Some(hash.as_str()));
    }

    #[test]
    fn verify_package_hash_mismatch_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = tmp.path().join("demo.zip");
        write_zip(&zip, &[("SKILL.md", "# Demo skill")]);

        let result = verify_package(&zip, None, ContentType::Skill, Some("00ff")).unwrap();
        assert!(!result.valid);
        assert_eq!(result.errors, vec![HASH_MISMATCH.to_string()]);
        assert!(matches!(
            result.into_result(),
            Err(Error::Verification { .. })
        ));
    }

    #[test]
    fn verify_package_collects_all_violations() {
        let tmp = tempfile::tempdir().unwrap();
        let zip = tmp.path().join("bad.zip");
        write_zip(&zip, &[("payload.dll", "x"), ("index.js", "eval(atob(x))")]);

        let result = verify_package(&zip, None, ContentType::Agent, None).unwrap();
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
        assert!(result.hash.is_none());
    }

    #[test]
    fn verify_package_scans_existing_directory_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("installed");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("mcp.json"), "{}").unwrap();

        // The archive is not read when the directory already exists.
        let result =
            verify_package(&tmp.path().join("absent.zip"), Some(&dir), ContentType::Mcp, None)
                .unwrap();
        assert!(result.valid);
    }
}
