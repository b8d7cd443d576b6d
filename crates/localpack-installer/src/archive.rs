//! In-process readers for the archive containers the installer unpacks:
//! tar (optionally compressed), `ar` (Debian packages), RPM with its
//! `newc` cpio payload and the squashfs image inside an AppImage.
//!
//! Every entry is validated against the destination before it is written.

use anyhow::{anyhow, Context};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::detect::Compression;
use crate::error::SafetyError;
use crate::metadata::PackageMetadata;
use crate::safety::{
    ensure_no_symlinks, resolve_entry, validate_hard_link, validate_symlink_in_tree,
};

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

impl From<io::Error> for UnpackError {
    fn from(err: io::Error) -> Self {
        Self::Failed(err.into())
    }
}

pub type UnpackResult<T> = Result<T, UnpackError>;

pub fn decompressor<'a, R>(reader: R, compression: Compression) -> UnpackResult<Box<dyn Read + 'a>>
where
    R: Read + 'a,
{
    let reader: Box<dyn Read + 'a> = match compression {
        Compression::None => Box::new(reader),
        Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
        Compression::Zstd => Box::new(
            zstd::stream::read::Decoder::new(reader).context("failed to open zstd stream")?,
        ),
        Compression::Bzip2 => {
            return Err(anyhow!("bzip2 streams are not decoded in-process").into());
        }
    };
    Ok(reader)
}

/// Symlinks written during one unpack. Each is checked again once the
/// whole archive is on disk, since later entries can change what an
/// earlier link resolves through.
#[derive(Debug, Default)]
struct CreatedLinks(Vec<(PathBuf, PathBuf)>);

impl CreatedLinks {
    fn create(
        &mut self,
        dest: &Path,
        entry: &Path,
        target: &Path,
        link_target: &Path,
    ) -> UnpackResult<()> {
        validate_symlink_in_tree(dest, entry, link_target)?;
        create_parent(target)?;
        make_symlink(link_target, target)?;
        self.0.push((entry.to_path_buf(), link_target.to_path_buf()));
        Ok(())
    }

    fn recheck(&self, dest: &Path) -> UnpackResult<()> {
        for (entry, link_target) in &self.0 {
            validate_symlink_in_tree(dest, entry, link_target)?;
        }
        Ok(())
    }
}

fn create_dir(dest: &Path, target: &Path) -> UnpackResult<()> {
    ensure_no_symlinks(dest, target)?;
    fs::create_dir_all(target).with_context(|| format!("failed to create {}", target.display()))?;
    Ok(())
}

/// Unpacks a tar stream into `dest`, validating each entry first.
/// Returns the number of entries written.
pub fn unpack_tar<R: Read>(reader: R, dest: &Path) -> UnpackResult<usize> {
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create extraction dir: {}", dest.display()))?;

    let mut archive = tar::Archive::new(reader);
    let mut links = CreatedLinks::default();
    let mut written = 0;
    for entry in archive.entries().context("failed to read tar entries")? {
        let mut entry = entry.context("failed to read tar entry")?;
        let raw_path = entry.path().context("tar entry has an unreadable path")?.into_owned();
        let target = resolve_entry(dest, &raw_path)?;
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            create_dir(dest, &target)?;
        } else if entry_type.is_symlink() {
            let link_target = entry
                .link_name()
                .context("symlink entry has an unreadable target")?
                .ok_or_else(|| anyhow!("symlink entry without target: {}", raw_path.display()))?
                .into_owned();
            links.create(dest, &raw_path, &target, &link_target)?;
        } else if entry_type.is_hard_link() {
            let link_target = entry
                .link_name()
                .context("hard link entry has an unreadable target")?
                .ok_or_else(|| anyhow!("hard link entry without target: {}", raw_path.display()))?
                .into_owned();
            let source = validate_hard_link(dest, &raw_path, &link_target)?;
            create_parent(&target)?;
            if fs::symlink_metadata(&target).is_ok() {
                crate::fs_utils::remove_path_if_exists(&target)?;
            }
            fs::hard_link(&source, &target)
                .with_context(|| format!("failed to link {}", target.display()))?;
        } else if entry_type.is_file() || entry_type == tar::EntryType::Continuous {
            create_parent(&target)?;
            let mode = entry.header().mode().unwrap_or(0o644);
            write_file(&mut entry, &target, mode)?;
        } else if matches!(
            entry_type,
            tar::EntryType::XGlobalHeader | tar::EntryType::XHeader
        ) {
            continue;
        } else {
            debug!(entry = %raw_path.display(), "skipping special tar entry");
            continue;
        }
        written += 1;
    }
    links.recheck(dest)?;
    Ok(written)
}

/// Unpacks the squashfs image starting at `offset` inside `path` into
/// `dest`. Nothing in the image is executed; nodes are validated like tar
/// entries and device nodes are skipped.
pub fn unpack_squashfs(path: &Path, offset: u64, dest: &Path) -> UnpackResult<usize> {
    use backhand::{FilesystemReader, InnerNode};

    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create extraction dir: {}", dest.display()))?;

    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let filesystem = FilesystemReader::from_reader_with_offset(BufReader::new(file), offset)
        .map_err(|err| anyhow!("failed to read squashfs image at offset {offset}: {err}"))?;

    let mut links = CreatedLinks::default();
    let mut written = 0;
    for node in filesystem.files() {
        let entry = node
            .fullpath
            .strip_prefix("/")
            .unwrap_or(&node.fullpath)
            .to_path_buf();
        if entry.as_os_str().is_empty() {
            continue;
        }
        let target = resolve_entry(dest, &entry)?;
        match &node.inner {
            InnerNode::Dir(_) => create_dir(dest, &target)?,
            InnerNode::File(file) => {
                create_parent(&target)?;
                let mut reader = filesystem.file(&file.basic).reader();
                write_file(&mut reader, &target, u32::from(node.header.permissions))?;
            }
            InnerNode::Symlink(symlink) => {
                links.create(dest, &entry, &target, &symlink.link)?;
            }
            _ => {
                debug!(entry = %entry.display(), "skipping special squashfs node");
                continue;
            }
        }
        written += 1;
    }
    links.recheck(dest)?;
    Ok(written)
}

/// Reads one member of a tar stream into memory, matched by its file name.
pub fn read_tar_member<R: Read>(reader: R, file_name: &str) -> UnpackResult<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries().context("failed to read tar entries")? {
        let mut entry = entry.context("failed to read tar entry")?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .ok()
            .and_then(|path| path.file_name().map(|name| name == file_name))
            .unwrap_or(false);
        if matches {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            return Ok(Some(buffer));
        }
    }
    Ok(None)
}

pub fn unpack_tarball(path: &Path, compression: Compression, dest: &Path) -> UnpackResult<usize> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    unpack_tar(decompressor(BufReader::new(file), compression)?, dest)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArMember {
    pub name: String,
    pub offset: u64,
    pub size: u64,
}

const AR_MAGIC: &[u8] = b"!<arch>\n";
const AR_HEADER_LEN: usize = 60;

/// Lists the members of an `ar` archive without reading their data.
pub fn ar_members(path: &Path) -> UnpackResult<Vec<ArMember>> {
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let total = file.metadata()?.len();
    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)?;
    if magic != AR_MAGIC {
        return Err(anyhow!("not an ar archive").into());
    }

    let mut members = Vec::new();
    let mut offset = AR_MAGIC.len() as u64;
    while offset + AR_HEADER_LEN as u64 <= total {
        file.seek(SeekFrom::Start(offset))?;
        let mut header = [0u8; AR_HEADER_LEN];
        file.read_exact(&mut header)?;
        if &header[58..60] != b"`\n" {
            return Err(anyhow!("corrupt ar member header at offset {offset}").into());
        }
        let size = ascii_number(&header[48..58], 10)
            .ok_or_else(|| anyhow!("corrupt ar member size at offset {offset}"))?;
        let mut data_offset = offset + AR_HEADER_LEN as u64;
        let mut data_size = size;
        let raw_name = String::from_utf8_lossy(&header[..16]).trim_end().to_string();

        let name = if let Some(len) = raw_name.strip_prefix("#1/") {
            let len: u64 = len
                .parse()
                .map_err(|_| anyhow!("corrupt BSD ar name length at offset {offset}"))?;
            let mut name = vec![0u8; usize::try_from(len).context("ar name too long")?];
            file.read_exact(&mut name)?;
            data_offset += len;
            data_size = data_size.saturating_sub(len);
            String::from_utf8_lossy(&name).trim_end_matches('\0').to_string()
        } else {
            raw_name.trim_end_matches('/').to_string()
        };

        if data_offset + data_size > total {
            return Err(anyhow!("ar member '{name}' is truncated").into());
        }
        members.push(ArMember {
            name,
            offset: data_offset,
            size: data_size,
        });
        offset += AR_HEADER_LEN as u64 + size + (size % 2);
    }
    Ok(members)
}

fn open_member(path: &Path, member: &ArMember) -> UnpackResult<impl Read> {
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    file.seek(SeekFrom::Start(member.offset))?;
    Ok(BufReader::new(file).take(member.size))
}

fn member_compression(member: &ArMember) -> UnpackResult<Compression> {
    Compression::from_member_name(&member.name)
        .ok_or_else(|| anyhow!("unknown compression for member '{}'", member.name).into())
}

/// Unpacks `data.tar.*` of a Debian package into `dest`.
pub fn unpack_deb_data(path: &Path, dest: &Path) -> UnpackResult<usize> {
    let members = ar_members(path)?;
    let data = members
        .iter()
        .find(|member| member.name.starts_with("data.tar"))
        .ok_or_else(|| anyhow!("package has no data.tar member"))?;
    let compression = member_compression(data)?;
    unpack_tar(decompressor(open_member(path, data)?, compression)?, dest)
}

/// Reads the `control` file from `control.tar.*`.
pub fn read_deb_control(path: &Path) -> UnpackResult<Option<String>> {
    let members = ar_members(path)?;
    let Some(control) = members
        .iter()
        .find(|member| member.name.starts_with("control.tar"))
    else {
        return Ok(None);
    };
    let compression = member_compression(control)?;
    let raw = read_tar_member(decompressor(open_member(path, control)?, compression)?, "control")?;
    Ok(raw.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

const RPM_LEAD_LEN: u64 = 96;
const RPM_HEADER_MAGIC: &[u8] = &[0x8e, 0xad, 0xe8, 0x01];
const RPMTAG_NAME: u32 = 1000;
const RPMTAG_VERSION: u32 = 1001;
const RPMTAG_RELEASE: u32 = 1002;
const RPMTAG_SUMMARY: u32 = 1004;
const RPM_STRING: u32 = 6;
const RPM_I18NSTRING: u32 = 9;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RpmHeader {
    pub name: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub summary: Option<String>,
    pub payload_offset: u64,
}

impl RpmHeader {
    pub fn metadata(&self) -> PackageMetadata {
        PackageMetadata {
            name: self.name.clone(),
            version: match (&self.version, &self.release) {
                (Some(version), Some(release)) => Some(format!("{version}-{release}")),
                (version, _) => version.clone(),
            },
            comment: self.summary.clone(),
            ..PackageMetadata::default()
        }
    }
}

/// Parses the lead, signature header and main header; records where the
/// compressed payload starts.
pub fn read_rpm_header(path: &Path) -> UnpackResult<RpmHeader> {
    let mut file = BufReader::new(
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
    );
    file.seek(SeekFrom::Start(RPM_LEAD_LEN))?;

    let (_, signature_len) = read_header_section(&mut file, false)?;
    let padding = (8 - (signature_len % 8)) % 8;
    file.seek(SeekFrom::Current(padding as i64))?;

    let (tags, _) = read_header_section(&mut file, true)?;
    let payload_offset = file.stream_position()?;
    let mut header = RpmHeader {
        payload_offset,
        ..RpmHeader::default()
    };
    for (tag, value) in tags {
        match tag {
            RPMTAG_NAME => header.name = Some(value),
            RPMTAG_VERSION => header.version = Some(value),
            RPMTAG_RELEASE => header.release = Some(value),
            RPMTAG_SUMMARY => header.summary = Some(value),
            _ => {}
        }
    }
    Ok(header)
}

/// Reads one header structure. Returns the string tags of interest (when
/// `collect` is set) and the size of the data store.
fn read_header_section<R: Read>(reader: &mut R, collect: bool) -> UnpackResult<(Vec<(u32, String)>, u64)> {
    let mut intro = [0u8; 16];
    reader.read_exact(&mut intro)?;
    if &intro[..4] != RPM_HEADER_MAGIC {
        return Err(anyhow!("bad rpm header magic").into());
    }
    let index_count = be_u32(&intro[8..12]);
    let store_len = be_u32(&intro[12..16]);
    if index_count > 65_536 || store_len > 256 * 1024 * 1024 {
        return Err(anyhow!("implausible rpm header size").into());
    }

    let mut index = vec![0u8; index_count as usize * 16];
    reader.read_exact(&mut index)?;
    let mut store = vec![0u8; store_len as usize];
    reader.read_exact(&mut store)?;

    let mut tags = Vec::new();
    if collect {
        for chunk in index.chunks_exact(16) {
            let tag = be_u32(&chunk[0..4]);
            let kind = be_u32(&chunk[4..8]);
            let offset = be_u32(&chunk[8..12]) as usize;
            if !matches!(tag, RPMTAG_NAME | RPMTAG_VERSION | RPMTAG_RELEASE | RPMTAG_SUMMARY) {
                continue;
            }
            if kind != RPM_STRING && kind != RPM_I18NSTRING {
                continue;
            }
            let Some(rest) = store.get(offset..) else {
                continue;
            };
            let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
            let value = String::from_utf8_lossy(&rest[..end]).trim().to_string();
            if !value.is_empty() {
                tags.push((tag, value));
            }
        }
    }
    Ok((tags, u64::from(store_len)))
}

/// Unpacks the cpio payload of an RPM into `dest`.
pub fn unpack_rpm_payload(path: &Path, dest: &Path) -> UnpackResult<usize> {
    let header = read_rpm_header(path)?;
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    file.seek(SeekFrom::Start(header.payload_offset))?;
    let mut magic = [0u8; 6];
    let read = file.read(&mut magic)?;
    let compression = Compression::sniff(&magic[..read])
        .ok_or_else(|| anyhow!("unrecognized rpm payload compression"))?;
    file.seek(SeekFrom::Start(header.payload_offset))?;
    unpack_cpio(decompressor(BufReader::new(file), compression)?, dest)
}

const CPIO_NEWC_MAGIC: &[u8] = b"070701";
const CPIO_CRC_MAGIC: &[u8] = b"070702";
const CPIO_HEADER_LEN: usize = 110;
const CPIO_TRAILER: &str = "TRAILER!!!";
const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

/// Unpacks a `newc` cpio stream into `dest`, validating each entry.
pub fn unpack_cpio<R: Read>(mut reader: R, dest: &Path) -> UnpackResult<usize> {
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create extraction dir: {}", dest.display()))?;

    let mut links = CreatedLinks::default();
    let mut written = 0;
    loop {
        let mut header = [0u8; CPIO_HEADER_LEN];
        reader.read_exact(&mut header).context("truncated cpio header")?;
        if &header[..6] != CPIO_NEWC_MAGIC && &header[..6] != CPIO_CRC_MAGIC {
            return Err(anyhow!("unsupported cpio format").into());
        }
        let field = |index: usize| -> UnpackResult<u64> {
            let start = 6 + index * 8;
            ascii_number(&header[start..start + 8], 16)
                .ok_or_else(|| anyhow!("corrupt cpio header field").into())
        };
        let mode = field(1)? as u32;
        let file_size = field(6)?;
        let name_size = field(11)? as usize;
        if name_size == 0 || name_size > 4096 + 1 {
            return Err(anyhow!("corrupt cpio name size").into());
        }

        let mut name = vec![0u8; name_size];
        reader.read_exact(&mut name)?;
        skip(&mut reader, pad4(CPIO_HEADER_LEN as u64 + name_size as u64))?;
        let name = String::from_utf8_lossy(&name[..name_size - 1]).into_owned();
        if name == CPIO_TRAILER {
            break;
        }

        let entry = PathBuf::from(&name);
        let target = resolve_entry(dest, &entry)?;
        match mode & S_IFMT {
            S_IFDIR => create_dir(dest, &target)?,
            S_IFREG => {
                create_parent(&target)?;
                let mut data = (&mut reader).take(file_size);
                write_file(&mut data, &target, mode & 0o7777)?;
                if data.limit() != 0 {
                    return Err(anyhow!("truncated cpio entry '{name}'").into());
                }
            }
            S_IFLNK => {
                let mut raw = Vec::new();
                (&mut reader).take(file_size).read_to_end(&mut raw)?;
                let link_target = PathBuf::from(String::from_utf8_lossy(&raw).into_owned());
                links.create(dest, &entry, &target, &link_target)?;
            }
            _ => {
                debug!(entry = %name, "skipping special cpio entry");
                skip(&mut reader, file_size)?;
                skip(&mut reader, pad4(file_size))?;
                continue;
            }
        }
        skip(&mut reader, pad4(file_size))?;
        written += 1;
    }
    links.recheck(dest)?;
    Ok(written)
}

fn pad4(len: u64) -> u64 {
    (4 - (len % 4)) % 4
}

fn skip<R: Read>(reader: &mut R, len: u64) -> UnpackResult<()> {
    let copied = io::copy(&mut reader.take(len), &mut io::sink())?;
    if copied != len {
        return Err(anyhow!("unexpected end of archive").into());
    }
    Ok(())
}

fn ascii_number(raw: &[u8], radix: u32) -> Option<u64> {
    let text = std::str::from_utf8(raw).ok()?.trim();
    if text.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(text, radix).ok()
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn create_parent(target: &Path) -> UnpackResult<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn write_file<R: Read>(reader: &mut R, target: &Path, mode: u32) -> UnpackResult<()> {
    // A previous entry may have left a symlink at this path.
    if fs::symlink_metadata(target).is_ok_and(|meta| meta.file_type().is_symlink()) {
        fs::remove_file(target)
            .with_context(|| format!("failed to replace {}", target.display()))?;
    }
    let mut file =
        File::create(target).with_context(|| format!("failed to create {}", target.display()))?;
    io::copy(reader, &mut file).with_context(|| format!("failed to write {}", target.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = (mode & 0o777) | 0o600;
        fs::set_permissions(target, fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to set mode on {}", target.display()))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

fn make_symlink(link_target: &Path, at: &Path) -> UnpackResult<()> {
    if fs::symlink_metadata(at).is_ok() {
        crate::fs_utils::remove_path_if_exists(at)?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(link_target, at)
            .with_context(|| format!("failed to create symlink {}", at.display()))?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        Err(anyhow!(
            "symlinks are not supported on this platform: {}",
            at.display()
        )
        .into())
    }
}
