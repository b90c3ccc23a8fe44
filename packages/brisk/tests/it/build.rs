//! Incremental build scenarios: cold build, no-op rerun, header change,
//! artifact tampering, link-only dependencies, and dependency file sanity.

use pretty_assertions::assert_eq as pretty_assert_eq;

use super::*;

fn scaffold() {
    write_depgen();
    write_file("src/main.c", "#include \"util.h\"\nint main() {}\n");
    write_file("src/util.c", "int util() {}\n");
    write_file("src/util.h", "int util();\n");
}

#[tokio::test]
async fn cold_build_creates_everything() {
    let _workdir = Workdir::enter();
    scaffold();

    let reporter = RecordingReporter::default();
    let module = module(vec![cat_target("app")]);
    build(&reporter, &module).await.expect("cold build");

    assert!(Path::new("build/test/dep/src/main.d").is_file());
    assert!(Path::new("build/test/dep/src/util.d").is_file());
    assert!(Path::new("build/test/obj/src/main.o").is_file());
    assert!(Path::new("build/test/obj/src/util.o").is_file());
    assert!(Path::new("build/test/app").is_file());
    pretty_assert_eq!(reporter.compiles(), 2);

    // With one worker the artifact is the objects in source order.
    let artifact = std::fs::read_to_string("build/test/app").expect("read artifact");
    pretty_assert_eq!(artifact, "#include \"util.h\"\nint main() {}\nint util() {}\n");

    // Everything consulted is in the persisted store.
    let store = std::fs::read_to_string("build/test/.hashes.json").expect("read store");
    for key in ["src/main.c", "src/util.c", "src/util.h", "build/test/app"] {
        assert!(store.contains(key), "store missing {key}: {store}");
    }
}

#[tokio::test]
async fn noop_rerun_runs_nothing() {
    let _workdir = Workdir::enter();
    scaffold();

    let module = module(vec![cat_target("app")]);
    build(&RecordingReporter::default(), &module)
        .await
        .expect("cold build");

    let rerun = RecordingReporter::default();
    build(&rerun, &module).await.expect("rerun");

    pretty_assert_eq!(rerun.compiles(), 0);
    pretty_assert_eq!(read_lines("compile.log").len(), 2);
    pretty_assert_eq!(read_lines("link.log").len(), 1);
}

#[tokio::test]
async fn header_change_recompiles_only_dependents() {
    let _workdir = Workdir::enter();
    scaffold();

    let module = module(vec![cat_target("app")]);
    build(&RecordingReporter::default(), &module)
        .await
        .expect("cold build");

    write_file("src/util.h", "int util();\nint util2();\n");
    let rerun = RecordingReporter::default();
    build(&rerun, &module).await.expect("rerun");

    // Only main.c includes util.h.
    pretty_assert_eq!(rerun.compiles(), 1);
    let compiles = read_lines("compile.log");
    pretty_assert_eq!(compiles.len(), 3);
    pretty_assert_eq!(compiles.last().map(String::as_str), Some("src/main.c"));
    pretty_assert_eq!(read_lines("link.log").len(), 2);
}

#[tokio::test]
async fn tampered_artifact_relinks_without_recompiling() {
    let _workdir = Workdir::enter();
    scaffold();

    let module = module(vec![cat_target("app")]);
    build(&RecordingReporter::default(), &module)
        .await
        .expect("cold build");

    write_file("build/test/app", "unrelated bytes");
    let rerun = RecordingReporter::default();
    build(&rerun, &module).await.expect("rerun");

    pretty_assert_eq!(rerun.compiles(), 0);
    pretty_assert_eq!(read_lines("link.log").len(), 2);

    let artifact = std::fs::read_to_string("build/test/app").expect("read artifact");
    assert!(artifact.contains("int main"));
}

#[tokio::test]
async fn depends_files_participate_in_the_link_decision() {
    let _workdir = Workdir::enter();
    scaffold();
    write_file("linker.cfg", "sections\n");

    let mut target = cat_target("app");
    target.depends = Some(String::from("linker.cfg"));
    let module = module(vec![target]);

    build(&RecordingReporter::default(), &module)
        .await
        .expect("cold build");
    pretty_assert_eq!(read_lines("link.log").len(), 1);

    // Unchanged DEPENDS file: no relink.
    build(&RecordingReporter::default(), &module)
        .await
        .expect("rerun");
    pretty_assert_eq!(read_lines("link.log").len(), 1);

    // Changed DEPENDS file: relink without recompiling.
    write_file("linker.cfg", "sections changed\n");
    let rerun = RecordingReporter::default();
    build(&rerun, &module).await.expect("rerun");
    pretty_assert_eq!(rerun.compiles(), 0);
    pretty_assert_eq!(read_lines("link.log").len(), 2);
}

#[tokio::test]
async fn dependency_head_mismatch_is_fatal() {
    let _workdir = Workdir::enter();
    write_file("src/main.c", "int main() {}\n");

    let mut target = cat_target("app");
    // Emits a head naming a different object.
    target.deprule = Some(String::from("@echo $DEP_PATH wrong.o: $SRC_PATH"));
    let module = module(vec![target]);

    let err = build(&RecordingReporter::default(), &module)
        .await
        .expect_err("mismatch is fatal");
    assert!(format!("{err:#}").contains("mismatch in dependency file"));
}

#[tokio::test]
async fn explicit_source_list_overrides_discovery() {
    let _workdir = Workdir::enter();
    scaffold();

    let mut module = module(vec![cat_target("app")]);
    module.src_files = vec![String::from("src/main.c")];

    let reporter = RecordingReporter::default();
    build(&reporter, &module).await.expect("build");
    pretty_assert_eq!(reporter.compiles(), 1);
    assert!(Path::new("build/test/obj/src/main.o").is_file());
    assert!(!Path::new("build/test/obj/src/util.o").exists());
}

#[tokio::test]
async fn missing_explicit_source_skips_the_target() {
    let _workdir = Workdir::enter();
    scaffold();

    let mut module = module(vec![cat_target("app")]);
    module.src_files = vec![String::from("src/gone.c")];

    let reporter = RecordingReporter::default();
    build(&reporter, &module).await.expect("run completes");
    pretty_assert_eq!(reporter.compiles(), 0);
    assert!(!Path::new("build/test/app").exists());
}
