//! Parser for `/proc/self/mountinfo`.
//!
//! Used to locate cgroup v1 hierarchies and to check whether a container
//! mount point is still mounted before tearing it down.

use std::path::{Path, PathBuf};

use hutch_common::error::{HutchError, Result};

const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// One entry of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Where the filesystem is mounted.
    pub mount_point: PathBuf,
    /// Filesystem type, e.g. `cgroup` or `overlay`.
    pub fs_type: String,
    /// Per-superblock options, e.g. `rw,cpu,cpuacct`.
    pub super_options: Vec<String>,
}

/// Parses the contents of a mountinfo file.
///
/// Lines that do not follow the `... - fstype source options` layout are
/// skipped.
#[must_use]
pub fn parse(contents: &str) -> Vec<MountEntry> {
    contents.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let separator = fields.iter().position(|f| *f == "-")?;
    let mount_point = fields.get(4)?;
    let fs_type = fields.get(separator + 1)?;
    let super_options = fields
        .get(separator + 3)
        .map(|opts| opts.split(',').map(str::to_owned).collect())
        .unwrap_or_default();
    Some(MountEntry {
        mount_point: PathBuf::from(unescape(mount_point)),
        fs_type: (*fs_type).to_owned(),
        super_options,
    })
}

/// Decodes the octal escapes (`\040` for space etc.) the kernel emits.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Reads and parses the mount table of the calling process.
///
/// # Errors
///
/// Returns an error if `/proc/self/mountinfo` cannot be read.
pub fn read() -> Result<Vec<MountEntry>> {
    let contents = std::fs::read_to_string(MOUNTINFO_PATH).map_err(|e| HutchError::Io {
        path: PathBuf::from(MOUNTINFO_PATH),
        source: e,
    })?;
    Ok(parse(&contents))
}

/// Returns whether something is mounted exactly at `path`.
///
/// A path that does not exist is reported as not mounted.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub fn is_mounted(path: &Path) -> Result<bool> {
    let Ok(resolved) = std::fs::canonicalize(path) else {
        return Ok(false);
    };
    Ok(read()?.iter().any(|m| m.mount_point == resolved))
}

/// Finds the mount point of the cgroup v1 hierarchy carrying `subsystem`.
#[must_use]
pub fn find_cgroup_mount<'a>(entries: &'a [MountEntry], subsystem: &str) -> Option<&'a Path> {
    entries
        .iter()
        .filter(|m| m.fs_type == "cgroup")
        .find(|m| m.super_options.iter().any(|opt| opt == subsystem))
        .map(|m| m.mount_point.as_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
22 28 0:21 / /proc rw,nosuid,nodev,noexec,relatime shared:13 - proc proc rw
30 25 0:26 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid shared:10 - cgroup cgroup rw,cpu,cpuacct
31 25 0:27 / /sys/fs/cgroup/cpuset rw,nosuid shared:11 - cgroup cgroup rw,cpuset
32 25 0:28 / /sys/fs/cgroup/memory rw,nosuid shared:12 - cgroup cgroup rw,memory
90 28 0:50 / /var/lib/hutch/mnt/with\\040space rw,relatime - overlay overlay rw,lowerdir=/a
garbage line
";

    #[test]
    fn parses_well_formed_lines_only() {
        let entries = parse(SAMPLE);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].fs_type, "proc");
    }

    #[test]
    fn finds_cgroup_hierarchy_by_super_option() {
        let entries = parse(SAMPLE);
        assert_eq!(
            find_cgroup_mount(&entries, "cpu"),
            Some(Path::new("/sys/fs/cgroup/cpu,cpuacct"))
        );
        assert_eq!(
            find_cgroup_mount(&entries, "cpuset"),
            Some(Path::new("/sys/fs/cgroup/cpuset"))
        );
        assert_eq!(
            find_cgroup_mount(&entries, "memory"),
            Some(Path::new("/sys/fs/cgroup/memory"))
        );
        assert_eq!(find_cgroup_mount(&entries, "blkio"), None);
    }

    #[test]
    fn decodes_escaped_mount_points() {
        let entries = parse(SAMPLE);
        assert_eq!(
            entries[4].mount_point,
            PathBuf::from("/var/lib/hutch/mnt/with space")
        );
    }

    #[test]
    fn missing_path_is_not_mounted() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!is_mounted(&dir.path().join("absent")).expect("mountinfo"));
    }
}
