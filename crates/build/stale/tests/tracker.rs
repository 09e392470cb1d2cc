//! Staleness decisions against real files with controlled timestamps.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use filetime::FileTime;
use kiln_stale::{
    BoxError, BuildCommands, DepGenerator, DepTracker, Freshness, LinkOptions, ListingAction,
    Stage, StaleError, StaleReason, write_fingerprint,
};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeCommands {
    out: PathBuf,
    cflags: Mutex<String>,
    linker_scripts: Vec<PathBuf>,
}

impl BuildCommands for FakeCommands {
    fn compile_command(&self, source: &Path, stage: Stage) -> Result<String, BoxError> {
        let tool = match stage {
            Stage::Compiler => "cc",
            Stage::Assembler => "as",
        };
        let flags = self.cflags.lock().unwrap();
        Ok(format!("{tool} {flags} -c {}", source.display()))
    }

    fn archive_command(&self, dest: &Path, members: &[PathBuf]) -> String {
        let members: Vec<String> = members.iter().map(|m| m.display().to_string()).collect();
        format!("ar rcs {} {}", dest.display(), members.join(" "))
    }

    fn link_command(
        &self,
        dest: &Path,
        options: &LinkOptions,
        members: &[PathBuf],
        keep_symbols: &[String],
        elf_lib: Option<&Path>,
    ) -> String {
        format!(
            "ld -o {} {options:?} {members:?} {keep_symbols:?} {elf_lib:?}",
            dest.display()
        )
    }

    fn out_dir(&self) -> &Path {
        &self.out
    }

    fn linker_scripts(&self) -> &[PathBuf] {
        &self.linker_scripts
    }
}

/// Writes a fixed listing body and counts invocations.
struct RecordingGenerator {
    out: PathBuf,
    body: Mutex<String>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl DepGenerator for RecordingGenerator {
    fn generate(&self, source: &Path, _stage: Stage) -> Result<(), BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("compiler exploded".into());
        }
        let listing = kiln_stale::dep_listing_path(&self.out, source);
        fs::create_dir_all(listing.parent().unwrap())?;
        fs::write(&listing, self.body.lock().unwrap().as_bytes())?;
        Ok(())
    }
}

impl RecordingGenerator {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct Fixture {
    dir: TempDir,
    tracker: DepTracker<FakeCommands>,
    generator: RecordingGenerator,
}

fn set_mtime(path: &Path, secs: i64) {
    filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
}

fn write_at(path: &Path, contents: &str, secs: i64) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
    set_mtime(path, secs);
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build");
        fs::create_dir_all(&out).unwrap();
        let script = dir.path().join("link.ld");
        write_at(&script, "SECTIONS {}", 100);

        let tracker = DepTracker::new(FakeCommands {
            out: out.clone(),
            cflags: Mutex::new("-O2".into()),
            linker_scripts: vec![script],
        });
        let generator = RecordingGenerator {
            out,
            body: Mutex::new(String::new()),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        };
        Self {
            dir,
            tracker,
            generator,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// A source `a.c` including `a.h`, compiled into an up-to-date object
    /// with a matching fingerprint and listing.
    fn built_unit(&self) -> (PathBuf, PathBuf) {
        let src = self.path("a.c");
        let hdr = self.path("a.h");
        write_at(&src, "#include \"a.h\"\n", 1_000);
        write_at(&hdr, "int a;\n", 1_000);

        let obj = self.tracker.object_path(&src);
        let listing = self.tracker.dep_listing_path(&src);
        let body = format!("{}: {} {}\n", obj.display(), src.display(), hdr.display());
        *self.generator.body.lock().unwrap() = body.clone();

        write_at(&obj, "ELF", 2_000);
        write_at(&listing, &body, 2_000);
        let cmd = self
            .tracker
            .commands()
            .compile_command(&src, Stage::Compiler)
            .unwrap();
        write_fingerprint(&obj, &cmd).unwrap();
        (src, hdr)
    }

    fn compile(&self, src: &Path) -> Freshness {
        self.tracker
            .compile_required(src, Stage::Compiler, &self.generator)
            .unwrap()
    }
}

// ---------------------------------------------------------------------------
// Compile
// ---------------------------------------------------------------------------

#[test]
fn up_to_date_object_is_fresh_and_idempotent() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();

    assert_eq!(fx.compile(&src), Freshness::Fresh);
    assert_eq!(fx.compile(&src), Freshness::Fresh);
    assert_eq!(fx.generator.calls(), 0);
}

#[test]
fn touched_header_forces_rebuild() {
    let fx = Fixture::new();
    let (src, hdr) = fx.built_unit();
    set_mtime(&hdr, 3_000);

    assert_eq!(
        fx.compile(&src),
        Freshness::Stale(StaleReason::DependencyNewer(hdr))
    );
}

#[test]
fn vanished_dependency_deletes_listing() {
    let fx = Fixture::new();
    let (src, hdr) = fx.built_unit();
    let listing = fx.tracker.dep_listing_path(&src);
    fs::remove_file(&hdr).unwrap();

    assert_eq!(
        fx.compile(&src),
        Freshness::Stale(StaleReason::DependencyVanished(hdr))
    );
    assert!(!listing.exists());
    assert_eq!(fx.generator.calls(), 0);
}

#[test]
fn changed_command_regenerates_listing() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    *fx.tracker.commands().cflags.lock().unwrap() = "-Os".into();

    assert_eq!(fx.compile(&src), Freshness::Stale(StaleReason::CommandChanged));
    assert_eq!(fx.generator.calls(), 1);
}

#[test]
fn missing_fingerprint_is_command_change() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    fs::remove_file(kiln_stale::fingerprint_path(&fx.tracker.object_path(&src))).unwrap();

    assert_eq!(fx.compile(&src), Freshness::Stale(StaleReason::CommandChanged));
}

#[test]
fn missing_listing_is_generated_without_forcing_rebuild() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    let listing = fx.tracker.dep_listing_path(&src);
    fs::remove_file(&listing).unwrap();

    let action = fx
        .tracker
        .refresh_dep_listing(&src, Stage::Compiler, &fx.generator)
        .unwrap();
    assert_eq!(action, ListingAction::Generated);
    assert!(listing.exists());

    // Generated listing carries the current time, so it is trusted.
    assert_eq!(
        fx.tracker.compile_freshness(&src, Stage::Compiler).unwrap(),
        Freshness::Fresh
    );
}

#[test]
fn newer_source_short_circuits_dependency_walk() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    let listing = fx.tracker.dep_listing_path(&src);
    set_mtime(&src, 3_000);
    // Garbage that would fail to parse if it were consulted.
    write_at(&listing, "not a listing\n", 2_000);

    assert_eq!(
        fx.compile(&src),
        Freshness::Stale(StaleReason::SourceNewer(src.clone()))
    );
    assert_eq!(fx.generator.calls(), 0);
}

#[test]
fn listing_older_than_source_is_refreshed() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    let listing = fx.tracker.dep_listing_path(&src);
    set_mtime(&src, 1_500);
    set_mtime(&listing, 1_200);

    let action = fx
        .tracker
        .refresh_dep_listing(&src, Stage::Compiler, &fx.generator)
        .unwrap();
    assert_eq!(action, ListingAction::Refreshed);
    assert_eq!(fx.generator.calls(), 1);
    assert_eq!(
        fx.tracker.compile_freshness(&src, Stage::Compiler).unwrap(),
        Freshness::Fresh
    );
}

#[test]
fn pure_decision_distrusts_stale_listing() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    let listing = fx.tracker.dep_listing_path(&src);
    set_mtime(&src, 1_500);
    set_mtime(&listing, 1_200);

    assert_eq!(
        fx.tracker.compile_freshness(&src, Stage::Compiler).unwrap(),
        Freshness::Stale(StaleReason::ListingInvalid(listing))
    );
    assert_eq!(fx.generator.calls(), 0);
}

#[test]
fn missing_object_requires_compile() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    let obj = fx.tracker.object_path(&src);
    fs::remove_file(&obj).unwrap();

    assert_eq!(
        fx.compile(&src),
        Freshness::Stale(StaleReason::DestinationMissing(obj))
    );
}

#[test]
fn missing_source_is_an_error() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    fs::remove_file(&src).unwrap();

    let err = fx
        .tracker
        .compile_required(&src, Stage::Compiler, &fx.generator)
        .unwrap_err();
    assert!(matches!(err, StaleError::MissingInput { path } if path == src));
}

#[test]
fn malformed_listing_aborts_query() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    write_at(&fx.tracker.dep_listing_path(&src), "a.o a.c\n", 2_000);

    let err = fx
        .tracker
        .compile_required(&src, Stage::Compiler, &fx.generator)
        .unwrap_err();
    assert!(matches!(err, StaleError::MalformedListing { line: 1, .. }));
}

#[test]
fn generator_failure_propagates() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();
    fx.generator.fail.store(true, Ordering::SeqCst);
    *fx.tracker.commands().cflags.lock().unwrap() = "-O0".into();

    let err = fx
        .tracker
        .compile_required(&src, Stage::Compiler, &fx.generator)
        .unwrap_err();
    assert!(matches!(err, StaleError::DepGeneration { .. }));
}

#[test]
fn assembler_stage_has_its_own_command() {
    let fx = Fixture::new();
    let (src, _) = fx.built_unit();

    // Fingerprint was recorded for the compiler stage.
    assert_eq!(
        fx.tracker
            .compile_required(&src, Stage::Assembler, &fx.generator)
            .unwrap(),
        Freshness::Stale(StaleReason::CommandChanged)
    );
}

#[test]
fn header_touched_after_build_scenario() {
    // a.c with listing `a.o: a.c a.h`; a.h touched after a.o exists.
    let fx = Fixture::new();
    let (src, hdr) = fx.built_unit();
    set_mtime(&hdr, 2_500);

    let verdict = fx.compile(&src);
    assert!(verdict.is_required());
    assert_eq!(verdict.reason(), Some(&StaleReason::DependencyNewer(hdr)));
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

fn archive_fixture(fx: &Fixture) -> (PathBuf, Vec<PathBuf>) {
    let lib = fx.path("build/liba.a");
    let members = vec![fx.path("build/a.o"), fx.path("build/b.o")];
    write_at(&members[0], "", 1_000);
    write_at(&members[1], "", 1_100);
    write_at(&lib, "!<arch>", 2_000);
    let cmd = fx.tracker.commands().archive_command(&lib, &members);
    write_fingerprint(&lib, &cmd).unwrap();
    (lib, members)
}

#[test]
fn archive_without_fingerprint_always_required() {
    let fx = Fixture::new();
    let (lib, members) = archive_fixture(&fx);
    fs::remove_file(kiln_stale::fingerprint_path(&lib)).unwrap();

    let verdict = fx.tracker.archive_required(&lib, &members).unwrap();
    assert_eq!(verdict, Freshness::Stale(StaleReason::CommandChanged));
}

#[test]
fn archive_fresh_when_watermark_older() {
    let fx = Fixture::new();
    let (lib, members) = archive_fixture(&fx);
    for m in &members {
        fx.tracker.feed_timestamp(m).unwrap();
    }
    assert_eq!(
        fx.tracker.archive_required(&lib, &members).unwrap(),
        Freshness::Fresh
    );
}

#[test]
fn archive_trusts_watermark_over_members() {
    let fx = Fixture::new();
    let (lib, members) = archive_fixture(&fx);
    let other = fx.path("build/other.o");
    write_at(&other, "", 3_000);
    fx.tracker.feed_timestamp(&other).unwrap();

    assert_eq!(
        fx.tracker.archive_required(&lib, &members).unwrap(),
        Freshness::Stale(StaleReason::WatermarkNewer)
    );
}

#[test]
fn archive_member_list_change_is_command_change() {
    let fx = Fixture::new();
    let (lib, mut members) = archive_fixture(&fx);
    members.pop();
    assert_eq!(
        fx.tracker.archive_required(&lib, &members).unwrap(),
        Freshness::Stale(StaleReason::CommandChanged)
    );
}

#[test]
fn missing_archive_with_fingerprint_is_required() {
    let fx = Fixture::new();
    let (lib, members) = archive_fixture(&fx);
    fs::remove_file(&lib).unwrap();
    assert_eq!(
        fx.tracker.archive_required(&lib, &members).unwrap(),
        Freshness::Stale(StaleReason::DestinationMissing(lib))
    );
}

// ---------------------------------------------------------------------------
// Trimmed archive
// ---------------------------------------------------------------------------

#[test]
fn trimmed_archive_decisions() {
    let fx = Fixture::new();
    let dest = fx.path("build/liba_trimmed.a");
    let src = fx.path("build/liba.a");
    let elf = fx.path("build/app.elf");
    write_at(&dest, "", 2_000);
    write_at(&src, "", 1_000);
    write_at(&elf, "", 1_000);

    let t = &fx.tracker;
    assert_eq!(t.trimmed_archive_required(&dest, &src, Some(&elf)).unwrap(), Freshness::Fresh);
    assert_eq!(t.trimmed_archive_required(&dest, &src, None).unwrap(), Freshness::Fresh);

    set_mtime(&elf, 3_000);
    assert_eq!(
        t.trimmed_archive_required(&dest, &src, Some(&elf)).unwrap(),
        Freshness::Stale(StaleReason::ElfNewer(elf.clone()))
    );
    assert_eq!(t.trimmed_archive_required(&dest, &src, None).unwrap(), Freshness::Fresh);

    set_mtime(&src, 3_000);
    assert_eq!(
        t.trimmed_archive_required(&dest, &src, None).unwrap(),
        Freshness::Stale(StaleReason::InputNewer(src.clone()))
    );

    fs::remove_file(&dest).unwrap();
    assert_eq!(
        t.trimmed_archive_required(&dest, &src, None).unwrap(),
        Freshness::Stale(StaleReason::DestinationMissing(dest))
    );
}

#[test]
fn trimmed_archive_missing_source_is_error() {
    let fx = Fixture::new();
    let dest = fx.path("build/t.a");
    write_at(&dest, "", 2_000);
    let err = fx
        .tracker
        .trimmed_archive_required(&dest, &fx.path("build/none.a"), None)
        .unwrap_err();
    assert!(matches!(err, StaleError::MissingInput { .. }));
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

struct LinkSetup {
    dest: PathBuf,
    members: Vec<PathBuf>,
    keep: Vec<String>,
    options: LinkOptions,
}

fn link_fixture(fx: &Fixture, elf_lib: Option<&Path>) -> LinkSetup {
    let dest = fx.path("build/app.elf");
    let members = vec![fx.path("build/main.o"), fx.path("build/liba.a")];
    write_at(&members[0], "", 1_000);
    write_at(&members[1], "", 1_000);
    write_at(&dest, "", 2_000);
    let keep = vec!["reset_handler".to_string()];
    let mut options = LinkOptions::new();
    options.insert("nostdlib".into(), true);
    let cmd = fx
        .tracker
        .commands()
        .link_command(&dest, &options, &members, &keep, elf_lib);
    write_fingerprint(&dest, &cmd).unwrap();
    LinkSetup {
        dest,
        members,
        keep,
        options,
    }
}

impl Fixture {
    fn link(&self, l: &LinkSetup, elf_lib: Option<&Path>) -> kiln_stale::Result<Freshness> {
        self.tracker
            .link_required(&l.dest, &l.options, &l.members, &l.keep, elf_lib)
    }
}

#[test]
fn link_fresh_then_option_change() {
    let fx = Fixture::new();
    let mut l = link_fixture(&fx, None);
    assert_eq!(fx.link(&l, None).unwrap(), Freshness::Fresh);

    l.options.insert("nostdlib".into(), false);
    assert_eq!(
        fx.link(&l, None).unwrap(),
        Freshness::Stale(StaleReason::CommandChanged)
    );
}

#[test]
fn link_stale_on_elf_lib() {
    let fx = Fixture::new();
    let elf = fx.path("build/rom.elf");
    write_at(&elf, "", 3_000);
    let l = link_fixture(&fx, Some(&elf));
    assert_eq!(
        fx.link(&l, Some(&elf)).unwrap(),
        Freshness::Stale(StaleReason::ElfNewer(elf.clone()))
    );
}

#[test]
fn link_stale_on_watermark() {
    let fx = Fixture::new();
    let l = link_fixture(&fx, None);
    let obj = fx.path("build/late.o");
    write_at(&obj, "", 2_500);
    fx.tracker.feed_timestamp(&obj).unwrap();
    assert_eq!(
        fx.link(&l, None).unwrap(),
        Freshness::Stale(StaleReason::WatermarkNewer)
    );
}

#[test]
fn link_stale_on_member_or_linker_script() {
    let fx = Fixture::new();
    let l = link_fixture(&fx, None);

    set_mtime(&l.members[1], 2_100);
    assert_eq!(
        fx.link(&l, None).unwrap(),
        Freshness::Stale(StaleReason::InputNewer(l.members[1].clone()))
    );

    set_mtime(&l.members[1], 1_000);
    let script = fx.path("link.ld");
    set_mtime(&script, 2_200);
    assert_eq!(
        fx.link(&l, None).unwrap(),
        Freshness::Stale(StaleReason::InputNewer(script))
    );
}

#[test]
fn link_missing_member_is_error() {
    let fx = Fixture::new();
    let l = link_fixture(&fx, None);
    fs::remove_file(&l.members[0]).unwrap();
    assert!(matches!(
        fx.link(&l, None).unwrap_err(),
        StaleError::MissingInput { .. }
    ));
}

#[test]
fn link_missing_binary_is_required() {
    let fx = Fixture::new();
    let l = link_fixture(&fx, None);
    fs::remove_file(&l.dest).unwrap();
    assert_eq!(
        fx.link(&l, None).unwrap(),
        Freshness::Stale(StaleReason::DestinationMissing(l.dest.clone()))
    );
}

// ---------------------------------------------------------------------------
// ROM elf and copy
// ---------------------------------------------------------------------------

#[test]
fn rom_elf_decisions() {
    let fx = Fixture::new();
    let dest = fx.path("build/rom.elf");
    let elf = fx.path("build/app.elf");
    let archives = vec![fx.path("build/liba.a"), fx.path("build/libb.a")];
    write_at(&dest, "", 2_000);
    write_at(&elf, "", 1_000);
    write_at(&archives[0], "", 1_000);
    write_at(&archives[1], "", 1_000);

    let t = &fx.tracker;
    assert_eq!(t.rom_elf_required(&dest, &elf, &archives).unwrap(), Freshness::Fresh);

    set_mtime(&archives[1], 2_001);
    assert_eq!(
        t.rom_elf_required(&dest, &elf, &archives).unwrap(),
        Freshness::Stale(StaleReason::InputNewer(archives[1].clone()))
    );

    set_mtime(&elf, 2_001);
    assert_eq!(
        t.rom_elf_required(&dest, &elf, &archives).unwrap(),
        Freshness::Stale(StaleReason::ElfNewer(elf.clone()))
    );
}

#[test]
fn copy_decisions() {
    let fx = Fixture::new();
    let src = fx.path("blobs/fw.bin");
    write_at(&src, "fw", 1_000);
    let dest = fx.path("build/fw.bin");

    let t = &fx.tracker;
    assert_eq!(
        t.copy_required(&src).unwrap(),
        Freshness::Stale(StaleReason::DestinationMissing(dest.clone()))
    );

    write_at(&dest, "fw", 2_000);
    assert_eq!(t.copy_required(&src).unwrap(), Freshness::Fresh);

    set_mtime(&src, 3_000);
    assert_eq!(
        t.copy_required(&src).unwrap(),
        Freshness::Stale(StaleReason::SourceNewer(src.clone()))
    );

    fs::remove_file(&src).unwrap();
    assert!(matches!(
        t.copy_required(&src).unwrap_err(),
        StaleError::MissingInput { .. }
    ));
}
