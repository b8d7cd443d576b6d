use super::*;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::anyhow;
use localpack_core::{
    InstallMethod, InstallOptions, InstallRecord, PackageType, RecordMetadata, WaylandSupport,
};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

fn scratch_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let root = std::env::temp_dir().join(format!(
        "localpack-installer-tests-{}-{nanos}-{}",
        std::process::id(),
        SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&root).expect("must create scratch root");
    root
}

/// Stands in for subprocesses. When enabled, `unsquashfs -d <dir>` writes a
/// canned AppImage tree into `<dir>`; every other command fails.
#[derive(Default)]
struct FakeRunner {
    available: HashSet<&'static str>,
    extract_appimage: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    fn with_tools(tools: &[&'static str]) -> Self {
        Self {
            available: tools.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn extracting_appimage(mut self) -> Self {
        self.extract_appimage = true;
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().expect("calls lock").push(spec.to_string());
        if spec.program_name() == "unsquashfs" && self.extract_appimage {
            let arguments = spec.arguments();
            let dest = arguments
                .iter()
                .position(|arg| arg == "-d")
                .and_then(|index| arguments.get(index + 1))
                .expect("unsquashfs must be given a destination");
            write_appimage_tree(Path::new(dest));
            return Ok(CommandOutput::default());
        }
        Err(CommandError::Failed {
            program: spec.program_name(),
            status: "exit status: 1".to_string(),
            stderr: "simulated failure".to_string(),
        })
    }

    fn exists(&self, program: &str) -> bool {
        self.available.contains(program)
    }
}

#[derive(Default)]
struct RecordingCache {
    icon_refreshes: AtomicUsize,
    desktop_refreshes: AtomicUsize,
}

impl CacheRefresher for RecordingCache {
    fn refresh_icon_cache(&self, _hicolor_dir: &Path) {
        self.icon_refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn refresh_desktop_database(&self, _applications_dir: &Path) {
        self.desktop_refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

struct FailingDesktop;

impl DesktopIntegration for FailingDesktop {
    fn write_entry(&self, _install_id: &str, _entry: &DesktopEntry) -> anyhow::Result<PathBuf> {
        Err(anyhow!("applications directory is read-only"))
    }

    fn validate_entry(&self, _path: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

struct FailingStore;

impl RecordStore for FailingStore {
    fn save(&self, _record: &InstallRecord) -> anyhow::Result<PathBuf> {
        Err(anyhow!("state directory is full"))
    }

    fn load(&self, _install_id: &str) -> anyhow::Result<Option<InstallRecord>> {
        Ok(None)
    }

    fn remove(&self, _install_id: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn list(&self) -> anyhow::Result<Vec<InstallRecord>> {
        Ok(Vec::new())
    }
}

struct Harness {
    root: PathBuf,
    layout: InstallLayout,
    runner: Arc<FakeRunner>,
    cache: Arc<RecordingCache>,
}

impl Harness {
    fn new() -> Self {
        Self::with_runner(FakeRunner::default())
    }

    fn with_runner(runner: FakeRunner) -> Self {
        let root = scratch_root();
        let layout = InstallLayout::under_root(root.join("home"));
        Self {
            root,
            layout,
            runner: Arc::new(runner),
            cache: Arc::new(RecordingCache::default()),
        }
    }

    fn context(&self) -> InstallContext {
        InstallContext::new(
            self.layout.clone(),
            Timeouts::default(),
            self.runner.clone(),
        )
        .with_cache(self.cache.clone())
    }

    fn manager(&self) -> PackageManager {
        PackageManager::new(self.context())
    }

    fn write_source(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let dir = self.root.join("downloads");
        fs::create_dir_all(&dir).expect("must create downloads dir");
        let path = dir.join(name);
        fs::write(&path, bytes).expect("must write source package");
        path
    }

    fn target_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.layout.bin_dir().to_path_buf(),
            self.layout.apps_dir().to_path_buf(),
            self.layout.applications_dir().to_path_buf(),
            self.layout.icons_dir().to_path_buf(),
        ]
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn elf_bytes(marker: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 256];
    bytes[..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
    bytes[4] = 2;
    bytes[5] = 1;
    bytes[8..8 + marker.len()].copy_from_slice(marker);
    bytes
}

fn plain_elf() -> Vec<u8> {
    elf_bytes(&[])
}

fn appimage_bytes() -> Vec<u8> {
    elf_bytes(&[b'A', b'I', 0x02])
}

const FANCY_DESKTOP: &str = "[Desktop Entry]\nType=Application\nName=Fancy Tool\nExec=AppRun %U\n\
    Icon=fancy\nComment=Does fancy things\nCategories=Utility;Development;\n\
    X-AppImage-Version=2.0.1\n";

/// Runtime followed by a real squashfs image holding the canned tree.
fn appimage_with_image() -> Vec<u8> {
    use backhand::{FilesystemWriter, NodeHeader};

    let header = |mode: u16| NodeHeader::new(mode, 0, 0, 0);
    let mut writer = FilesystemWriter::default();
    writer
        .push_file(
            std::io::Cursor::new(FANCY_DESKTOP.as_bytes().to_vec()),
            "fancy.desktop",
            header(0o644),
        )
        .expect("must add desktop file");
    writer
        .push_file(std::io::Cursor::new(png(256)), "fancy.png", header(0o644))
        .expect("must add icon");
    writer
        .push_file(std::io::Cursor::new(b"#!/bin/sh\n".to_vec()), "AppRun", header(0o755))
        .expect("must add AppRun");
    let mut image = std::io::Cursor::new(Vec::new());
    writer.write(&mut image).expect("must write squashfs image");

    let mut bytes = appimage_bytes();
    bytes.extend(image.into_inner());
    bytes
}

/// Runtime followed by a squashfs superblock the in-process reader cannot
/// parse, so only `unsquashfs` can handle it.
fn appimage_with_unreadable_image() -> Vec<u8> {
    let mut superblock = vec![0u8; 128];
    superblock[..4].copy_from_slice(b"hsqs");
    superblock[28..30].copy_from_slice(&4u16.to_le_bytes());
    let mut bytes = appimage_bytes();
    bytes.extend(superblock);
    bytes
}

fn png(width: u32) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend(13u32.to_be_bytes());
    bytes.extend(b"IHDR");
    bytes.extend(width.to_be_bytes());
    bytes.extend(width.to_be_bytes());
    bytes.extend([8, 6, 0, 0, 0]);
    bytes
}

fn write_appimage_tree(dir: &Path) {
    fs::create_dir_all(dir).expect("must create squashfs-root");
    fs::write(dir.join("fancy.desktop"), FANCY_DESKTOP).expect("must write desktop file");
    fs::write(dir.join("fancy.png"), png(256)).expect("must write icon");
    fs::write(dir.join("AppRun"), "#!/bin/sh\n").expect("must write AppRun");
}

struct TarEntry {
    name: &'static str,
    body: Vec<u8>,
    mode: u32,
    kind: tar::EntryType,
    link: &'static str,
}

impl TarEntry {
    fn file(name: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            name,
            body: body.into(),
            mode: 0o644,
            kind: tar::EntryType::Regular,
            link: "",
        }
    }

    fn executable(name: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            mode: 0o755,
            ..Self::file(name, body)
        }
    }

    fn dir(name: &'static str) -> Self {
        Self {
            mode: 0o755,
            kind: tar::EntryType::Directory,
            ..Self::file(name, Vec::new())
        }
    }

    fn symlink(name: &'static str, target: &'static str) -> Self {
        Self {
            mode: 0o777,
            kind: tar::EntryType::Symlink,
            link: target,
            ..Self::file(name, Vec::new())
        }
    }

    fn hard_link(name: &'static str, target: &'static str) -> Self {
        Self {
            kind: tar::EntryType::Link,
            link: target,
            ..Self::file(name, Vec::new())
        }
    }
}

/// Writes header names byte-for-byte so hostile entries survive the builder.
fn tar_gz(entries: &[TarEntry]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(entry.body.len() as u64);
        header.set_mode(entry.mode);
        header.set_entry_type(entry.kind);
        let old = header.as_old_mut();
        old.name[..entry.name.len()].copy_from_slice(entry.name.as_bytes());
        old.linkname[..entry.link.len()].copy_from_slice(entry.link.as_bytes());
        header.set_cksum();
        builder
            .append(&header, entry.body.as_slice())
            .expect("must append tar entry");
    }
    let mut encoder = builder.into_inner().expect("must finish tar");
    encoder.flush().expect("must flush gzip");
    encoder.finish().expect("must finish gzip")
}

fn tool_tarball() -> Vec<u8> {
    tar_gz(&[
        TarEntry::executable("tool-1.2/bin/tool", "#!/bin/sh\necho tool\n"),
        TarEntry::file(
            "tool-1.2/share/applications/tool.desktop",
            "[Desktop Entry]\nType=Application\nName=Tool Thing\nExec=tool\nIcon=tool\n",
        ),
        TarEntry::file("tool-1.2/share/icons/hicolor/48x48/apps/tool.png", png(48)),
        TarEntry::file("tool-1.2/README", "docs"),
    ])
}

#[test]
fn custom_name_overrides_file_name() {
    let harness = Harness::new();
    let source = harness.write_source("original-name", &plain_elf());

    let record = harness
        .manager()
        .install(&source, &InstallOptions::default().with_custom_name("CustomApp"))
        .expect("install must succeed");

    assert_eq!(record.name, "CustomApp");
    assert_eq!(record.install_id, "customapp");
    assert_eq!(record.package_type, PackageType::Binary);
    assert_eq!(record.install_path, harness.layout.bin_dir().join("customapp"));
    assert!(fs_utils::is_executable_file(&record.install_path));
    assert_eq!(record.metadata.install_method, InstallMethod::Copy);
    assert_eq!(record.metadata.wayland_support, WaylandSupport::EnvInjected);
    assert_eq!(
        record.desktop_files,
        vec![harness.layout.desktop_entry_path("customapp")]
    );

    let desktop = fs::read_to_string(&record.desktop_files[0]).expect("must read desktop entry");
    assert!(desktop.contains("Name=CustomApp\n"));
    assert!(desktop.contains("Exec=env GDK_BACKEND=wayland,x11"));
    assert!(desktop.contains(&format!("\"{}\" %U", record.install_path.display())));

    let stored = harness
        .manager()
        .get("customapp")
        .expect("lookup must succeed")
        .expect("record must be stored");
    assert_eq!(stored.install_path, record.install_path);
    assert_eq!(harness.cache.desktop_refreshes.load(Ordering::SeqCst), 1);
}

#[test]
fn name_derivation_is_deterministic() {
    let harness = Harness::new();
    let source = harness.write_source("MyApp-1.2.3-x86_64", &plain_elf());
    let manager = harness.manager();

    let first = manager
        .install(&source, &InstallOptions::default())
        .expect("first install must succeed");
    let second = manager
        .install(&source, &InstallOptions::default().force(true))
        .expect("forced reinstall must succeed");

    assert_eq!(first.install_id, "myapp");
    assert_eq!(first.install_id, second.install_id);
    assert_eq!(first.name, second.name);
    assert_eq!(first.version.as_deref(), Some("1.2.3"));
}

#[test]
fn occupied_destination_requires_force() {
    let harness = Harness::new();
    let existing = harness.layout.bin_dir().join("tool");
    fs::create_dir_all(harness.layout.bin_dir()).expect("must create bin dir");
    fs::write(&existing, b"previous build").expect("must write existing binary");
    let source = harness.write_source("tool", &plain_elf());
    let manager = harness.manager();

    let err = manager
        .install(&source, &InstallOptions::default())
        .expect_err("collision must be rejected");
    assert!(matches!(err, InstallError::AlreadyInstalled { .. }));
    assert_eq!(err.category(), ErrorCategory::AlreadyInstalled);
    assert_eq!(
        fs::read(&existing).expect("existing binary must remain"),
        b"previous build"
    );
    assert!(!harness.layout.desktop_entry_path("tool").exists());

    let record = manager
        .install(&source, &InstallOptions::default().force(true))
        .expect("forced install must succeed");
    assert_eq!(record.install_path, existing);
    assert_eq!(
        fs::read(&existing).expect("replaced binary"),
        plain_elf()
    );
}

#[test]
fn malicious_archive_aborts_without_touching_targets() {
    let harness = Harness::new();
    let archive = tar_gz(&[
        TarEntry::executable("app/bin/app", "#!/bin/sh\n"),
        TarEntry::file("../../../etc/passwd", "root::0:0::/:/bin/sh\n"),
    ]);
    let source = harness.write_source("app-1.0.tar.gz", &archive);

    let err = harness
        .manager()
        .install(&source, &InstallOptions::default())
        .expect_err("hostile archive must be rejected");

    assert!(matches!(
        err,
        InstallError::SafetyViolation(SafetyError::PathTraversal { .. })
    ));
    assert_eq!(err.category(), ErrorCategory::SafetyViolation);
    for dir in harness.target_dirs() {
        assert!(!dir.exists(), "{} must stay untouched", dir.display());
    }
    assert!(harness.manager().list().expect("list").is_empty());
}

fn assert_nothing_named(root: &Path, name: &str) {
    let found: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name() == name)
        .map(|entry| entry.path().to_path_buf())
        .collect();
    assert!(found.is_empty(), "unexpected files: {found:?}");
}

#[test]
fn escaping_symlink_aborts_install_without_touching_targets() {
    let harness = Harness::new();
    let archive = tar_gz(&[
        TarEntry::executable("app/bin/app", "#!/bin/sh\n"),
        TarEntry::symlink("app/etc", "../../../../../etc"),
    ]);
    let source = harness.write_source("app-1.0.tar.gz", &archive);

    let err = harness
        .manager()
        .install(&source, &InstallOptions::default())
        .expect_err("escaping symlink must be rejected");

    assert!(matches!(
        err,
        InstallError::SafetyViolation(SafetyError::SymlinkEscape { .. })
    ));
    for dir in harness.target_dirs() {
        assert!(!dir.exists(), "{} must stay untouched", dir.display());
    }
    assert!(harness.manager().list().expect("list").is_empty());
}

#[test]
fn symlink_chain_cannot_carry_writes_out_of_the_package() {
    let harness = Harness::new();
    let archive = tar_gz(&[
        TarEntry::executable("app/bin/app", "#!/bin/sh\n"),
        TarEntry::symlink("app/esc", "sub/up/.."),
        TarEntry::dir("app/sub/"),
        TarEntry::symlink("app/sub/up", ".."),
        TarEntry::file("app/esc/pwned.txt", "pwned"),
    ]);
    let source = harness.write_source("app-1.0.tar.gz", &archive);

    let err = harness
        .manager()
        .install(&source, &InstallOptions::default())
        .expect_err("write through symlink chain must be rejected");

    assert_eq!(err.category(), ErrorCategory::SafetyViolation);
    assert_nothing_named(&harness.root, "pwned.txt");
    for dir in harness.target_dirs() {
        assert!(!dir.exists(), "{} must stay untouched", dir.display());
    }
}

#[test]
fn hard_links_cannot_reach_outside_the_package() {
    let harness = Harness::new();
    let secret = harness.root.join("secret.txt");
    fs::write(&secret, "private").expect("must write outside file");

    let archive = tar_gz(&[
        TarEntry::executable("app/bin/app", "#!/bin/sh\n"),
        TarEntry::hard_link("app/grab", "../../secret.txt"),
    ]);
    let source = harness.write_source("app-1.0.tar.gz", &archive);
    let err = harness
        .manager()
        .install(&source, &InstallOptions::default())
        .expect_err("traversing hard link must be rejected");
    assert!(matches!(
        err,
        InstallError::SafetyViolation(SafetyError::PathTraversal { .. })
    ));

    let archive = tar_gz(&[
        TarEntry::executable("app/bin/app", "#!/bin/sh\n"),
        TarEntry::symlink("app/esc", "sub/up/.."),
        TarEntry::dir("app/sub/"),
        TarEntry::symlink("app/sub/up", ".."),
        TarEntry::hard_link("app/grab", "app/esc/secret.txt"),
    ]);
    let source = harness.write_source("app-1.1.tar.gz", &archive);
    let err = harness
        .manager()
        .install(&source, &InstallOptions::default())
        .expect_err("hard link through symlink chain must be rejected");
    assert_eq!(err.category(), ErrorCategory::SafetyViolation);

    assert_eq!(fs::read(&secret).expect("outside file"), b"private");
    assert_nothing_named(&harness.root, "grab");
    for dir in harness.target_dirs() {
        assert!(!dir.exists(), "{} must stay untouched", dir.display());
    }
}

#[test]
fn existing_desktop_entry_is_a_collision() {
    let harness = Harness::new();
    let entry = harness.layout.desktop_entry_path("tool-thing");
    fs::create_dir_all(harness.layout.applications_dir()).expect("must create applications dir");
    let mine = "[Desktop Entry]\nType=Application\nName=My Own Launcher\nExec=mine\n";
    fs::write(&entry, mine).expect("must write user entry");
    let source = harness.write_source("tool-1.2.tar.gz", &tool_tarball());
    let manager = harness.manager();

    let err = manager
        .install(&source, &InstallOptions::default())
        .expect_err("foreign desktop entry must block the install");
    match &err {
        InstallError::AlreadyInstalled { path, .. } => assert_eq!(path, &entry),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!harness.layout.app_dir("tool-thing").exists());
    assert!(fs::symlink_metadata(harness.layout.binary_path("tool-thing")).is_err());
    assert_eq!(fs::read_to_string(&entry).expect("user entry"), mine);

    let failing = PackageManager::new(harness.context().with_desktop(Arc::new(FailingDesktop)));
    let err = failing
        .install(&source, &InstallOptions::default())
        .expect_err("collision is reported before desktop integration");
    assert!(matches!(err, InstallError::AlreadyInstalled { .. }));
    assert_eq!(
        fs::read_to_string(&entry).expect("user entry must survive the failed install"),
        mine
    );

    let record = manager
        .install(&source, &InstallOptions::default().skip_desktop(true))
        .expect("install without a menu entry must succeed");
    assert!(record.desktop_files.is_empty());
    manager.uninstall("tool-thing").expect("uninstall must succeed");
    assert_eq!(
        fs::read_to_string(&entry).expect("user entry must survive uninstall"),
        mine
    );
}

#[test]
fn existing_icons_are_neither_overwritten_nor_claimed() {
    let harness = Harness::new();
    let icon = harness
        .layout
        .icon_path("tool-thing", IconSize::Pixels(48), "png");
    fs::create_dir_all(icon.parent().expect("icon dir")).expect("must create icon dir");
    fs::write(&icon, b"user icon").expect("must write user icon");
    let source = harness.write_source("tool-1.2.tar.gz", &tool_tarball());
    let manager = harness.manager();

    let record = manager
        .install(&source, &InstallOptions::default())
        .expect("install must succeed");
    assert!(record.metadata.icon_files.is_empty());
    assert_eq!(fs::read(&icon).expect("user icon"), b"user icon");

    let report = manager.uninstall("tool-thing").expect("uninstall must succeed");
    assert!(!report.removed.contains(&icon));
    assert_eq!(
        fs::read(&icon).expect("user icon must survive uninstall"),
        b"user icon"
    );

    let record = manager
        .install(&source, &InstallOptions::default().force(true))
        .expect("forced install must succeed");
    assert_eq!(record.metadata.icon_files, vec![icon.clone()]);
    assert_eq!(fs::read(&icon).expect("replaced icon"), png(48));
}

#[test]
fn tarball_installs_tree_link_icon_and_menu_entry() {
    let harness = Harness::new();
    let source = harness.write_source("tool-1.2.tar.gz", &tool_tarball());
    let manager = harness.manager();

    let record = manager
        .install(&source, &InstallOptions::default().skip_wayland_env(true))
        .expect("tarball install must succeed");

    let app_dir = harness.layout.app_dir("tool-thing");
    let link = harness.layout.binary_path("tool-thing");
    assert_eq!(record.package_type, PackageType::Tarball);
    assert_eq!(record.install_id, "tool-thing");
    assert_eq!(record.name, "Tool Thing");
    assert_eq!(record.version.as_deref(), Some("1.2"));
    assert_eq!(record.install_path, app_dir);
    assert_eq!(record.metadata.install_method, InstallMethod::Extract);
    assert_eq!(record.metadata.exec_link.as_deref(), Some(link.as_path()));
    assert_eq!(
        fs::read_link(&link).expect("launcher must be a symlink"),
        app_dir.join("bin/tool")
    );
    assert!(app_dir.join("README").is_file());

    let icon = harness
        .layout
        .icon_path("tool-thing", IconSize::Pixels(48), "png");
    assert_eq!(record.metadata.icon_files, vec![icon.clone()]);
    assert!(icon.is_file());

    assert_eq!(record.metadata.wayland_support, WaylandSupport::Unmodified);
    let desktop = fs::read_to_string(harness.layout.desktop_entry_path("tool-thing"))
        .expect("desktop entry must exist");
    assert!(desktop.contains(&format!("Exec=\"{}\" %U\n", app_dir.join("bin/tool").display())));
    assert!(desktop.contains("Icon=tool-thing\n"));

    let staging = harness.layout.tmp_state_dir();
    let leftovers = fs::read_dir(&staging)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0, "scratch space must be cleaned up");
}

#[test]
fn desktop_failure_rolls_back_materialized_artifacts() {
    let harness = Harness::new();
    let source = harness.write_source("tool-1.2.tar.gz", &tool_tarball());
    let ctx = harness.context().with_desktop(Arc::new(FailingDesktop));
    let manager = PackageManager::new(ctx);

    let err = manager
        .install(&source, &InstallOptions::default())
        .expect_err("desktop failure must abort");

    assert!(matches!(
        err,
        InstallError::Integration {
            step: "desktop entry",
            ..
        }
    ));
    assert!(!harness.layout.app_dir("tool-thing").exists());
    assert!(fs::symlink_metadata(harness.layout.binary_path("tool-thing")).is_err());
    assert!(!harness
        .layout
        .icon_path("tool-thing", IconSize::Pixels(48), "png")
        .exists());
    assert!(manager.list().expect("list").is_empty());
    assert_eq!(harness.cache.icon_refreshes.load(Ordering::SeqCst), 0);
}

#[test]
fn untracked_install_keeps_partial_artifacts() {
    let harness = Harness::new();
    let source = harness.write_source("tool", &plain_elf());
    let ctx = harness.context().with_desktop(Arc::new(FailingDesktop));
    let manager = PackageManager::new(ctx);

    let err = manager
        .install_untracked(&source, &InstallOptions::default())
        .expect_err("desktop failure must surface");
    assert_eq!(err.category(), ErrorCategory::Integration);
    assert!(harness.layout.binary_path("tool").exists());
}

#[test]
fn record_persistence_failure_rolls_back() {
    let harness = Harness::new();
    let source = harness.write_source("tool", &plain_elf());
    let manager = PackageManager::with_store(harness.context(), Box::new(FailingStore));

    let err = manager
        .install(&source, &InstallOptions::default())
        .expect_err("store failure must abort");
    assert_eq!(err.category(), ErrorCategory::Record);
    assert!(!harness.layout.binary_path("tool").exists());
    assert!(!harness.layout.desktop_entry_path("tool").exists());
}

#[test]
fn skip_desktop_omits_menu_entry() {
    let harness = Harness::new();
    let source = harness.write_source("tool", &plain_elf());

    let record = harness
        .manager()
        .install(&source, &InstallOptions::default().skip_desktop(true))
        .expect("install must succeed");

    assert!(record.desktop_files.is_empty());
    assert_eq!(record.metadata.wayland_support, WaylandSupport::NoDesktopEntry);
    assert!(!harness.layout.desktop_entry_path("tool").exists());
}

#[test]
fn invalid_custom_name_is_rejected_before_mutation() {
    let harness = Harness::new();
    let source = harness.write_source("tool", &plain_elf());

    let err = harness
        .manager()
        .install(&source, &InstallOptions::default().with_custom_name("../.."))
        .expect_err("traversal name must be rejected");

    assert_eq!(err.category(), ErrorCategory::NameValidation);
    for dir in harness.target_dirs() {
        assert!(!dir.exists(), "{} must stay untouched", dir.display());
    }
}

#[test]
fn missing_and_unsupported_sources() {
    let harness = Harness::new();
    let manager = harness.manager();

    let err = manager
        .install(&harness.root.join("nope.AppImage"), &InstallOptions::default())
        .expect_err("missing file must fail");
    assert!(matches!(err, InstallError::NotFound { .. }));

    let text = harness.write_source("notes.txt", b"just some text");
    let err = manager.detect(&text).expect_err("text must be unsupported");
    match err {
        InstallError::Unsupported { file, supported } => {
            assert_eq!(file, "notes.txt");
            assert_eq!(supported, "AppImage, Debian, RPM, Tarball, Binary");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn detection_is_mutually_exclusive() {
    let harness = Harness::new();
    let registry = BackendRegistry::new(harness.context());
    let mut deb = b"!<arch>\ndebian-binary   ".to_vec();
    deb.extend([0u8; 64]);
    let samples = [
        ("tool.AppImage", appimage_bytes(), Some(PackageType::AppImage)),
        ("tool", plain_elf(), Some(PackageType::Binary)),
        ("tool.deb", deb, Some(PackageType::Debian)),
        ("tool.rpm", vec![0xed, 0xab, 0xee, 0xdb, 3, 0], Some(PackageType::Rpm)),
        ("tool.tar.gz", tool_tarball(), Some(PackageType::Tarball)),
        ("tool.txt", b"plain text".to_vec(), None),
    ];

    for (name, bytes, expected) in samples {
        let path = harness.write_source(name, &bytes);
        let claimed: Vec<PackageType> = registry
            .backends()
            .filter(|backend| backend.detect(&path).expect("detect must not error"))
            .map(|backend| backend.package_type())
            .collect();
        assert!(claimed.len() <= 1, "{name} claimed by {claimed:?}");
        assert_eq!(claimed.first().copied(), expected, "{name}");

        for _ in 0..3 {
            let again = registry.detect_backend(&path).ok().map(|b| b.package_type());
            assert_eq!(again, expected, "{name} must detect deterministically");
        }
    }
}

#[test]
fn appimage_metadata_and_icons_come_from_embedded_image() {
    let harness = Harness::new();
    let package = appimage_with_image();
    let source = harness.write_source("Fancy-2.0.1-x86_64.AppImage", &package);

    let record = harness
        .manager()
        .install(&source, &InstallOptions::default())
        .expect("appimage install must succeed");

    assert_eq!(record.package_type, PackageType::AppImage);
    assert_eq!(record.install_id, "fancy-tool");
    assert_eq!(record.name, "Fancy Tool");
    assert_eq!(record.version.as_deref(), Some("2.0.1"));
    assert_eq!(record.install_path, harness.layout.binary_path("fancy-tool"));
    assert_eq!(
        fs::read(&record.install_path).expect("installed appimage"),
        package
    );
    assert!(fs_utils::is_executable_file(&record.install_path));
    assert_eq!(
        record.metadata.categories,
        vec!["Utility".to_string(), "Development".to_string()]
    );
    assert_eq!(record.metadata.comment.as_deref(), Some("Does fancy things"));

    let icon = harness
        .layout
        .icon_path("fancy-tool", IconSize::Pixels(256), "png");
    assert_eq!(record.metadata.icon_files, vec![icon.clone()]);
    assert!(icon.is_file());

    assert!(
        harness.runner.calls().is_empty(),
        "nothing from the package may be executed"
    );
}

#[test]
fn appimage_falls_back_to_unsquashfs() {
    let harness =
        Harness::with_runner(FakeRunner::with_tools(&["unsquashfs"]).extracting_appimage());
    let source = harness.write_source("Fancy.AppImage", &appimage_with_unreadable_image());

    let record = harness
        .manager()
        .install(&source, &InstallOptions::default())
        .expect("fallback install must succeed");
    assert_eq!(record.install_id, "fancy-tool");
    assert_eq!(record.metadata.icon_files.len(), 1);

    let calls = harness.runner.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].starts_with("unsquashfs -f -d"), "{}", calls[0]);
    assert!(calls[0].contains("-o 256"), "{}", calls[0]);
}

#[test]
fn appimage_extraction_distinguishes_missing_and_failing_fallback() {
    let harness = Harness::new();
    let source = harness.write_source("tool.AppImage", &appimage_bytes());
    let err = harness
        .manager()
        .install(&source, &InstallOptions::default())
        .expect_err("extraction must fail");
    match err {
        InstallError::Extraction(ExtractionError::FallbackUnavailable { tool, .. }) => {
            assert_eq!(tool, "unsquashfs");
        }
        other => panic!("unexpected error: {other}"),
    }

    let harness = Harness::with_runner(FakeRunner::with_tools(&["unsquashfs"]));
    let source = harness.write_source("tool.AppImage", &appimage_bytes());
    let err = harness
        .manager()
        .install(&source, &InstallOptions::default())
        .expect_err("extraction must fail");
    assert!(matches!(
        err,
        InstallError::Extraction(ExtractionError::FallbackFailed {
            tool: "unsquashfs",
            ..
        })
    ));
    assert_eq!(err.category(), ErrorCategory::Extraction);
    assert!(!harness.layout.binary_path("tool").exists());
}

#[test]
fn uninstall_removes_artifacts_and_is_idempotent() {
    let harness = Harness::new();
    let source = harness.write_source("tool-1.2.tar.gz", &tool_tarball());
    let manager = harness.manager();
    let record = manager
        .install(&source, &InstallOptions::default())
        .expect("install must succeed");

    fs::remove_file(&record.metadata.icon_files[0]).expect("must remove icon out of band");

    let report = manager.uninstall("Tool Thing").expect("uninstall must succeed");
    assert!(report.is_clean(), "warnings: {:?}", report.warnings);
    assert!(!record.install_path.exists());
    assert!(fs::symlink_metadata(harness.layout.binary_path("tool-thing")).is_err());
    assert!(!harness.layout.desktop_entry_path("tool-thing").exists());
    assert!(!report.removed.contains(&record.metadata.icon_files[0]));

    let err = manager
        .uninstall("tool-thing")
        .expect_err("second uninstall must report not installed");
    assert!(matches!(err, InstallError::NotInstalled { .. }));
}

#[test]
fn uninstall_refuses_paths_outside_managed_roots() {
    let harness = Harness::new();
    let outside = harness.root.join("precious.txt");
    fs::write(&outside, b"keep me").expect("must write outside file");
    let inside = harness.layout.binary_path("tampered");
    fs::create_dir_all(harness.layout.bin_dir()).expect("must create bin dir");
    fs::write(&inside, b"binary").expect("must write managed file");

    let record = InstallRecord {
        install_id: "tampered".to_string(),
        package_type: PackageType::Binary,
        name: "tampered".to_string(),
        version: None,
        installed_at_unix: 1,
        original_file: PathBuf::from("/tmp/tampered"),
        install_path: inside.clone(),
        desktop_files: vec![outside.clone(), harness.layout.bin_dir().join("../escape")],
        metadata: RecordMetadata {
            install_method: InstallMethod::Copy,
            wayland_support: WaylandSupport::NoDesktopEntry,
            exec_link: None,
            comment: None,
            icon_files: Vec::new(),
            categories: Vec::new(),
        },
    };
    FileRecordStore::new(harness.layout.clone())
        .save(&record)
        .expect("must save record");

    let report = harness
        .manager()
        .uninstall("tampered")
        .expect("uninstall must succeed");
    assert_eq!(report.removed, vec![inside.clone()]);
    assert_eq!(report.warnings.len(), 2);
    assert!(!inside.exists());
    assert_eq!(fs::read(&outside).expect("outside file"), b"keep me");
}

#[test]
fn rollback_undoes_committed_steps_in_reverse() {
    let harness = Harness::new();
    let binary = harness.root.join("bin-tool");
    let icon = harness.root.join("tool.png");
    let order = Rc::new(RefCell::new(Vec::new()));

    let mut tx = Transaction::new("install tool");
    for (label, path) in [("binary", &binary), ("icons", &icon)] {
        fs::write(path, label).expect("forward step must succeed");
        let path = path.clone();
        let order = Rc::clone(&order);
        tx.add(format!("remove {label}"), move || {
            order.borrow_mut().push(label);
            fs_utils::remove_path_if_exists(&path)?;
            Ok(())
        });
    }
    let desktop = harness.root.join("missing-dir").join("tool.desktop");
    let order_for_desktop = Rc::clone(&order);
    let desktop_for_undo = desktop.clone();
    tx.add("remove desktop entry", move || {
        order_for_desktop.borrow_mut().push("desktop");
        fs_utils::remove_path_if_exists(&desktop_for_undo)?;
        Ok(())
    });
    assert!(fs::write(&desktop, "entry").is_err(), "forward step must fail");

    let report = tx.rollback();
    assert!(report.is_clean());
    assert_eq!(report.attempted, 3);
    assert_eq!(*order.borrow(), vec!["desktop", "icons", "binary"]);
    assert!(!binary.exists());
    assert!(!icon.exists());
}
