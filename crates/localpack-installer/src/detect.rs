//! Signature sniffing for candidate package files.
//!
//! Every probe reads a bounded prefix of the file and never writes anything.
//! A missing file is not an error: probes answer `Ok(false)` / `Ok(None)`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const ELF_MAGIC: &[u8] = &[0x7f, b'E', b'L', b'F'];
const APPIMAGE_TYPE2_MARKER: &[u8] = &[b'A', b'I', 0x02];
const APPIMAGE_TYPE1_MARKER: &[u8] = &[b'A', b'I', 0x01];
const SQUASHFS_MAGIC: &[u8] = b"hsqs";
const SQUASHFS_MAJOR_OFFSET: usize = 28;
const SQUASHFS_SCAN_LIMIT: u64 = 8 * 1024 * 1024;
const AR_MAGIC: &[u8] = b"!<arch>\n";
const DEBIAN_FIRST_MEMBER: &[u8] = b"debian-binary";
const RPM_LEAD_MAGIC: &[u8] = &[0xed, 0xab, 0xee, 0xdb];
const USTAR_OFFSET: usize = 257;

/// Stream compression wrapped around a tar payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
    Zstd,
    Bzip2,
}

impl Compression {
    pub fn sniff(prefix: &[u8]) -> Option<Self> {
        if prefix.starts_with(&[0x1f, 0x8b]) {
            Some(Self::Gzip)
        } else if prefix.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(Self::Xz)
        } else if prefix.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Self::Zstd)
        } else if prefix.starts_with(b"BZh") {
            Some(Self::Bzip2)
        } else if is_ustar(prefix) {
            Some(Self::None)
        } else {
            None
        }
    }

    /// Picks the codec from a member name such as `data.tar.xz`.
    pub fn from_member_name(name: &str) -> Option<Self> {
        let name = name.trim_end_matches('/');
        if name.ends_with(".gz") || name.ends_with(".tgz") {
            Some(Self::Gzip)
        } else if name.ends_with(".xz") || name.ends_with(".txz") {
            Some(Self::Xz)
        } else if name.ends_with(".zst") || name.ends_with(".zstd") {
            Some(Self::Zstd)
        } else if name.ends_with(".bz2") || name.ends_with(".tbz2") {
            Some(Self::Bzip2)
        } else if name.ends_with(".tar") {
            Some(Self::None)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
            Self::Bzip2 => "bzip2",
        }
    }
}

fn is_ustar(prefix: &[u8]) -> bool {
    prefix
        .get(USTAR_OFFSET..USTAR_OFFSET + 5)
        .is_some_and(|magic| magic == b"ustar")
}

pub(crate) fn read_prefix(path: &Path, len: u64) -> io::Result<Option<Vec<u8>>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut prefix = Vec::new();
    file.take(len).read_to_end(&mut prefix)?;
    Ok(Some(prefix))
}

pub fn is_elf(path: &Path) -> io::Result<bool> {
    Ok(read_prefix(path, 4)?.is_some_and(|prefix| prefix.starts_with(ELF_MAGIC)))
}

/// An AppImage is an ELF runtime carrying either the `AI` type marker in its
/// identification padding or an appended squashfs image.
pub fn is_appimage(path: &Path) -> io::Result<bool> {
    let Some(prefix) = read_prefix(path, 16)? else {
        return Ok(false);
    };
    if !prefix.starts_with(ELF_MAGIC) {
        return Ok(false);
    }
    if let Some(marker) = prefix.get(8..11) {
        if marker == APPIMAGE_TYPE2_MARKER || marker == APPIMAGE_TYPE1_MARKER {
            return Ok(true);
        }
    }
    Ok(squashfs_offset(path)?.is_some())
}

/// Generic executables: ELF files the AppImage probe does not claim.
pub fn is_plain_binary(path: &Path) -> io::Result<bool> {
    if !is_elf(path)? {
        return Ok(false);
    }
    Ok(!is_appimage(path)?)
}

pub fn is_debian_package(path: &Path) -> io::Result<bool> {
    let Some(prefix) = read_prefix(path, 8 + 16)? else {
        return Ok(false);
    };
    Ok(prefix.starts_with(AR_MAGIC) && prefix[AR_MAGIC.len()..].starts_with(DEBIAN_FIRST_MEMBER))
}

pub fn is_rpm(path: &Path) -> io::Result<bool> {
    Ok(read_prefix(path, 4)?.is_some_and(|prefix| prefix.starts_with(RPM_LEAD_MAGIC)))
}

pub fn tarball_compression(path: &Path) -> io::Result<Option<Compression>> {
    let Some(prefix) = read_prefix(path, 512)? else {
        return Ok(None);
    };
    Ok(Compression::sniff(&prefix))
}

pub fn is_tarball(path: &Path) -> io::Result<bool> {
    Ok(tarball_compression(path)?.is_some())
}

/// Locates the squashfs image appended to an ELF runtime.
///
/// The section-header table end is tried first since that is where the
/// AppImage runtime places the image; otherwise the first 8 MiB are scanned
/// for a superblock whose major version is 4.
pub fn squashfs_offset(path: &Path) -> io::Result<Option<u64>> {
    let Some(prefix) = read_prefix(path, SQUASHFS_SCAN_LIMIT)? else {
        return Ok(None);
    };
    if !prefix.starts_with(ELF_MAGIC) {
        return Ok(None);
    }

    if let Some(offset) = elf_end_offset(&prefix) {
        if let Ok(offset_usize) = usize::try_from(offset) {
            if is_squashfs_superblock(&prefix, offset_usize) {
                return Ok(Some(offset));
            }
        }
        if offset >= SQUASHFS_SCAN_LIMIT && superblock_at(path, offset)? {
            return Ok(Some(offset));
        }
    }

    let found = prefix
        .windows(SQUASHFS_MAGIC.len())
        .enumerate()
        .skip(ELF_MAGIC.len())
        .find(|(offset, window)| {
            *window == SQUASHFS_MAGIC && is_squashfs_superblock(&prefix, *offset)
        })
        .map(|(offset, _)| offset as u64);
    Ok(found)
}

fn is_squashfs_superblock(bytes: &[u8], offset: usize) -> bool {
    if bytes.get(offset..offset + SQUASHFS_MAGIC.len()) != Some(SQUASHFS_MAGIC) {
        return false;
    }
    let major_at = offset + SQUASHFS_MAJOR_OFFSET;
    bytes
        .get(major_at..major_at + 2)
        .is_some_and(|major| u16::from_le_bytes([major[0], major[1]]) == 4)
}

fn superblock_at(path: &Path, offset: u64) -> io::Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut block = Vec::with_capacity(SQUASHFS_MAJOR_OFFSET + 2);
    file.take((SQUASHFS_MAJOR_OFFSET + 2) as u64)
        .read_to_end(&mut block)?;
    Ok(is_squashfs_superblock(&block, 0))
}

/// End of the section-header table, i.e. where appended data begins.
fn elf_end_offset(header: &[u8]) -> Option<u64> {
    let little_endian = match header.get(5)? {
        1 => true,
        2 => false,
        _ => return None,
    };
    let read_u16 = |at: usize| -> Option<u64> {
        let bytes: [u8; 2] = header.get(at..at + 2)?.try_into().ok()?;
        let value = if little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        };
        Some(u64::from(value))
    };
    let read_u32 = |at: usize| -> Option<u64> {
        let bytes: [u8; 4] = header.get(at..at + 4)?.try_into().ok()?;
        let value = if little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        };
        Some(u64::from(value))
    };
    let read_u64 = |at: usize| -> Option<u64> {
        let bytes: [u8; 8] = header.get(at..at + 8)?.try_into().ok()?;
        let value = if little_endian {
            u64::from_le_bytes(bytes)
        } else {
            u64::from_be_bytes(bytes)
        };
        Some(value)
    };

    let (shoff, shentsize, shnum) = match header.get(4)? {
        1 => (read_u32(0x20)?, read_u16(0x2e)?, read_u16(0x30)?),
        2 => (read_u64(0x28)?, read_u16(0x3a)?, read_u16(0x3c)?),
        _ => return None,
    };
    if shoff == 0 {
        return None;
    }
    shoff.checked_add(shentsize.checked_mul(shnum)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn scratch_file(name: &str, bytes: &[u8]) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!(
            "localpack-detect-{}-{nanos}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).expect("must create scratch dir");
        let path = dir.join(name);
        fs::write(&path, bytes).expect("must write probe file");
        path
    }

    fn elf_header() -> Vec<u8> {
        let mut bytes = vec![0u8; 64];
        bytes[..4].copy_from_slice(ELF_MAGIC);
        bytes[4] = 2;
        bytes[5] = 1;
        bytes
    }

    fn squashfs_superblock() -> Vec<u8> {
        let mut block = vec![0u8; 96];
        block[..4].copy_from_slice(SQUASHFS_MAGIC);
        block[28..30].copy_from_slice(&4u16.to_le_bytes());
        block
    }

    fn cleanup(path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn missing_file_is_soft_false() {
        let path = Path::new("/nonexistent/localpack/probe.bin");
        assert!(!is_elf(path).expect("missing file must not error"));
        assert!(!is_appimage(path).expect("missing file must not error"));
        assert!(!is_tarball(path).expect("missing file must not error"));
        assert_eq!(squashfs_offset(path).expect("must not error"), None);
    }

    #[test]
    fn type2_marker_is_appimage_and_not_binary() {
        let mut bytes = elf_header();
        bytes[8..11].copy_from_slice(APPIMAGE_TYPE2_MARKER);
        let path = scratch_file("tool.AppImage", &bytes);

        assert!(is_appimage(&path).expect("probe"));
        assert!(!is_plain_binary(&path).expect("probe"));
        cleanup(&path);
    }

    #[test]
    fn appended_squashfs_is_found_by_scan() {
        let mut bytes = elf_header();
        bytes.extend(vec![0u8; 1000]);
        let offset = bytes.len() as u64;
        bytes.extend(squashfs_superblock());
        let path = scratch_file("renamed", &bytes);

        assert_eq!(squashfs_offset(&path).expect("probe"), Some(offset));
        assert!(is_appimage(&path).expect("probe"));
        assert!(!is_plain_binary(&path).expect("probe"));
        cleanup(&path);
    }

    #[test]
    fn squashfs_magic_with_wrong_major_is_ignored() {
        let mut bytes = elf_header();
        let mut block = squashfs_superblock();
        block[28..30].copy_from_slice(&3u16.to_le_bytes());
        bytes.extend(block);
        let path = scratch_file("old", &bytes);

        assert!(!is_appimage(&path).expect("probe"));
        assert!(is_plain_binary(&path).expect("probe"));
        cleanup(&path);
    }

    #[test]
    fn section_table_end_locates_payload() {
        let mut bytes = elf_header();
        bytes[0x28..0x30].copy_from_slice(&64u64.to_le_bytes());
        bytes[0x3a..0x3c].copy_from_slice(&64u16.to_le_bytes());
        bytes[0x3c..0x3e].copy_from_slice(&2u16.to_le_bytes());
        bytes.extend(vec![0u8; 128]);
        bytes.extend(squashfs_superblock());
        let path = scratch_file("runtime", &bytes);

        assert_eq!(squashfs_offset(&path).expect("probe"), Some(192));
        cleanup(&path);
    }

    #[test]
    fn debian_requires_debian_binary_member() {
        let mut deb = AR_MAGIC.to_vec();
        deb.extend(b"debian-binary   ");
        let path = scratch_file("pkg.deb", &deb);
        assert!(is_debian_package(&path).expect("probe"));
        cleanup(&path);

        let mut ar = AR_MAGIC.to_vec();
        ar.extend(b"libfoo.o        ");
        let path = scratch_file("lib.a", &ar);
        assert!(!is_debian_package(&path).expect("probe"));
        cleanup(&path);
    }

    #[test]
    fn rpm_and_tarball_signatures() {
        let path = scratch_file("pkg.rpm", &[0xed, 0xab, 0xee, 0xdb, 3, 0]);
        assert!(is_rpm(&path).expect("probe"));
        assert!(!is_tarball(&path).expect("probe"));
        cleanup(&path);

        let path = scratch_file("pkg.tar.gz", &[0x1f, 0x8b, 8, 0]);
        assert_eq!(
            tarball_compression(&path).expect("probe"),
            Some(Compression::Gzip)
        );
        cleanup(&path);

        let mut plain = vec![0u8; 512];
        plain[257..262].copy_from_slice(b"ustar");
        let path = scratch_file("pkg.tar", &plain);
        assert_eq!(
            tarball_compression(&path).expect("probe"),
            Some(Compression::None)
        );
        cleanup(&path);
    }

    #[test]
    fn member_names_map_to_codecs() {
        assert_eq!(
            Compression::from_member_name("data.tar.xz"),
            Some(Compression::Xz)
        );
        assert_eq!(
            Compression::from_member_name("data.tar.zst"),
            Some(Compression::Zstd)
        );
        assert_eq!(
            Compression::from_member_name("control.tar"),
            Some(Compression::None)
        );
        assert_eq!(Compression::from_member_name("debian-binary"), None);
    }
}
