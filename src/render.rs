//! Rendering of the shared host configuration files.
//!
//! `/etc/hosts.deny`, `/etc/hosts.allow` and `/etc/exports` are shared with
//! the rest of the host. Only a marker-delimited region belongs to us; text
//! outside it is carried over unchanged. Every function here is pure so the
//! transforms can be tested without touching the filesystem.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

pub const HOSTS_DENY_MARKER: &str = "# serviced, do not remove past this line";
pub const HOSTS_DENY_DEFAULTS: &str =
    "\n# serviced, do not remove past this line\nrpcbind mountd nfsd statd lockd rquotad : ALL\n\n";

pub const HOSTS_ALLOW_MARKER: &str = "# serviced, do not remove past this line";
pub const HOSTS_ALLOW_DEFAULTS: &str =
    "\n# serviced, do not remove past this line\nrpcbind mountd nfsd statd lockd rquotad : 127.0.0.1";

pub const EXPORTS_BEGIN_MARKER: &str =
    "\n# --- SERVICED EXPORTS BEGIN ---\n# --- Do not edit this section\n";
pub const EXPORTS_END_MARKER: &str = "\n# --- SERVICED EXPORTS END ---\n";
pub const EXPORTS_REMOVED_PREFIX: &str = "# serviced removed: ";

pub const EXPORT_OPTIONS: &str = "rw,no_subtree_check,async";

/// A shared file split around the region this crate owns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedFile {
    pub preamble: String,
    /// Current content of the managed region, markers excluded
    pub managed: Option<String>,
    pub postamble: String,
}

impl ManagedFile {
    /// Split on a begin/end marker pair. Without a begin marker the whole
    /// content is preamble; without an end marker nothing follows the region.
    pub fn parse_delimited(content: &str, begin: &str, end: &str) -> Self {
        let Some(start) = content.find(begin) else {
            return Self {
                preamble: content.to_string(),
                ..Self::default()
            };
        };
        let remainder = &content[start + begin.len()..];
        let (managed, postamble) = match remainder.find(end) {
            Some(stop) => (&remainder[..stop], &remainder[stop + end.len()..]),
            None => (remainder, ""),
        };
        Self {
            preamble: content[..start].to_string(),
            managed: Some(managed.to_string()),
            postamble: postamble.to_string(),
        }
    }

    /// Split on a single marker that runs to the end of the file. The line
    /// break in front of the marker belongs to the managed block.
    pub fn parse_trailing(content: &str, marker: &str) -> Self {
        match content.find(marker) {
            Some(index) => {
                let preamble = &content[..index];
                Self {
                    preamble: preamble.strip_suffix('\n').unwrap_or(preamble).to_string(),
                    managed: Some(content[index..].to_string()),
                    postamble: String::new(),
                }
            }
            None => Self {
                preamble: content.to_string(),
                ..Self::default()
            },
        }
    }

    /// Reassemble with `block` (markers included) as the managed region.
    pub fn render(&self, block: &str) -> String {
        let mut out =
            String::with_capacity(self.preamble.len() + block.len() + self.postamble.len());
        out.push_str(&self.preamble);
        out.push_str(block);
        out.push_str(&self.postamble);
        out
    }
}

/// New hosts.deny content, or `None` when the managed block is already there.
pub fn render_hosts_deny(existing: &str) -> Option<String> {
    if existing.contains(HOSTS_DENY_DEFAULTS) {
        return None;
    }
    Some(ManagedFile::parse_trailing(existing, HOSTS_DENY_MARKER).render(HOSTS_DENY_DEFAULTS))
}

/// New hosts.allow content permitting localhost and `clients`.
pub fn render_hosts_allow<'a, I>(existing: &str, clients: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hosts: Vec<&str> = clients.into_iter().collect();
    hosts.sort_unstable();
    hosts.dedup();

    let block = format!("{} {}\n\n", HOSTS_ALLOW_DEFAULTS, hosts.join(" "));
    ManagedFile::parse_trailing(existing, HOSTS_ALLOW_MARKER).render(&block)
}

/// Lexically clean a path: drop `.` and empty components, resolve `..`
/// against preceding components.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() && !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// Export table body for the tracked volumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportLines {
    pub body: String,
    /// Final path segment of every exported volume
    pub exported: BTreeSet<String>,
}

/// Build one export line per volume, `<subtree>/<name>\t<host>(<options>)`.
pub fn export_lines<'a, I>(volumes: I, subtree: &Path, export_host: &str) -> ExportLines
where
    I: IntoIterator<Item = &'a Path>,
{
    let mut lines = BTreeMap::new();
    for volume in volumes {
        let volume = clean_path(volume);
        let Some(name) = volume.file_name() else {
            continue;
        };
        let name = name.to_string_lossy().into_owned();
        let line = format!(
            "{}\t{}({})\n",
            subtree.join(&name).display(),
            export_host,
            EXPORT_OPTIONS
        );
        lines.insert(name, line);
    }

    ExportLines {
        body: lines.values().map(String::as_str).collect(),
        exported: lines.into_keys().collect(),
    }
}

/// Comment out every active line whose export point is one of `owned`.
///
/// Lines are trimmed on the way through, and the result always ends with a
/// newline when it is non-empty.
pub fn comment_conflicts(content: &str, owned: &[&str]) -> String {
    let mut filtered = String::with_capacity(content.len());
    for line in content.lines() {
        let line = line.trim();
        if !line.starts_with('#') {
            if let Some(mountpoint) = line.split_whitespace().next() {
                if owned.contains(&mountpoint) {
                    filtered.push_str(EXPORTS_REMOVED_PREFIX);
                    filtered.push_str(line);
                    filtered.push('\n');
                    continue;
                }
            }
        }
        filtered.push_str(line);
        filtered.push('\n');
    }
    filtered
}

/// New /etc/exports content with `body` as the managed region.
///
/// `export_root` and `subtree` are the export points this manager owns;
/// foreign definitions of them are commented out.
pub fn render_exports(existing: &str, export_root: &Path, subtree: &Path, body: &str) -> String {
    let root = export_root.to_string_lossy();
    let subtree = subtree.to_string_lossy();
    let filtered = comment_conflicts(existing, &[&*root, &*subtree]);

    let file = ManagedFile::parse_delimited(&filtered, EXPORTS_BEGIN_MARKER, EXPORTS_END_MARKER);
    let block = format!("{}{}{}", EXPORTS_BEGIN_MARKER, body, EXPORTS_END_MARKER);
    file.render(&block)
}
