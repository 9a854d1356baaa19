//! Crash-safe file primitives used by the lineage store

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Permissions for private keys and account credentials
pub const SECRET_MODE: u32 = 0o600;

/// Permissions for certificates, chains and renewal records
pub const PUBLIC_MODE: u32 = 0o644;

fn temp_sibling(path: &Path, suffix: &str) -> io::Result<PathBuf> {
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{}.{}{}", name, suffix, std::process::id())))
}

fn open_with_mode(path: &Path, mode: u32, create_new: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if create_new {
        options.create_new(true);
    } else {
        options.create(true).truncate(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// Write `contents` to `path` through a temporary file and a rename
///
/// Readers see either the old file or the complete new one.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let tmp = temp_sibling(path, "tmp")?;
    {
        let mut file = open_with_mode(&tmp, mode, false)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    #[cfg(unix)]
    {
        // open() honours the umask, the final file must not
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
    }
    fs::rename(&tmp, path)
}

/// Point `link` at `target`, replacing any existing link in one step
pub fn symlink_atomic(target: &Path, link: &Path) -> io::Result<()> {
    let tmp = temp_sibling(link, "tmp-link")?;
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    make_symlink(target, &tmp)?;
    fs::rename(&tmp, link)
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "certificate lineages need symbolic links",
    ))
}

/// Create `path` empty unless something already exists there
///
/// Returns `false` when the name is taken.
pub fn claim(path: &Path, mode: u32) -> io::Result<bool> {
    match open_with_mode(path, mode, true) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create a new file next to `path` without clobbering anything
///
/// The first free name of the form `0000_<name>`, `0001_<name>`, ... wins.
pub fn unique_file(path: &Path, mode: u32) -> io::Result<(File, PathBuf)> {
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )
    })?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    for count in 0..10_000u32 {
        let candidate = parent.join(format!("{:04}_{}", count, name));
        match open_with_mode(&candidate, mode, true) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name left for {}", path.display()),
    ))
}

/// Create a directory tree with the given mode on its leaf
pub fn make_dir(path: &Path, mode: u32) -> io::Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.pem");
        write_atomic(&path, b"one", PUBLIC_MODE).unwrap();
        write_atomic(&path, b"two", PUBLIC_MODE).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");

        // no temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("privkey.pem");
        write_atomic(&path, b"secret", SECRET_MODE).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_atomic_repoints() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let link = dir.path().join("link");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        symlink_atomic(&a, &link).unwrap();
        assert_eq!(fs::read_to_string(&link).unwrap(), "a");
        symlink_atomic(&b, &link).unwrap();
        assert_eq!(fs::read_to_string(&link).unwrap(), "b");
        assert_eq!(fs::read_link(&link).unwrap(), b);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.com.conf");
        assert!(claim(&path, PUBLIC_MODE).unwrap());
        assert!(!claim(&path, PUBLIC_MODE).unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn test_unique_file_never_clobbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.pem");

        let (_, first) = unique_file(&path, PUBLIC_MODE).unwrap();
        let (_, second) = unique_file(&path, PUBLIC_MODE).unwrap();
        assert_eq!(first.file_name().unwrap(), "0000_cert.pem");
        assert_eq!(second.file_name().unwrap(), "0001_cert.pem");
    }
}
