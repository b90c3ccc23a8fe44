//! Remove-mode scenarios: generated files deleted, store emptied, and
//! reversible pre-rule effects undone.

use pretty_assertions::assert_eq as pretty_assert_eq;

use super::*;

fn scaffold() {
    write_depgen();
    write_file("src/main.c", "int main() {}\n");
    write_file("src/util.c", "int util() {}\n");
}

#[tokio::test]
async fn remove_deletes_outputs_and_empties_the_store() {
    let _workdir = Workdir::enter();
    scaffold();

    let mut target = cat_target("app");
    target.prerule = Some(String::from("@makedir staging"));
    let module = module(vec![target]);

    build(&RecordingReporter::default(), &module)
        .await
        .expect("cold build");
    assert!(Path::new("build/test/app").is_file());
    assert!(Path::new("staging").is_dir());

    build_with(
        &RecordingReporter::default(),
        &module,
        RunOptions {
            remove: true,
            ..RunOptions::default()
        },
    )
    .await
    .expect("remove run");

    assert!(!Path::new("build/test/dep/src/main.d").exists());
    assert!(!Path::new("build/test/dep/src/util.d").exists());
    assert!(!Path::new("build/test/obj/src/main.o").exists());
    assert!(!Path::new("build/test/obj/src/util.o").exists());
    assert!(!Path::new("build/test/app").exists());
    // The pre-rule's directory was undone.
    assert!(!Path::new("staging").exists());

    let store = std::fs::read_to_string("build/test/.hashes.json").expect("read store");
    pretty_assert_eq!(store, "{}");
}

#[tokio::test]
async fn remove_deletes_decorated_artifacts() {
    let _workdir = Workdir::enter();
    scaffold();

    let module = module(vec![cat_target("app")]);
    build(&RecordingReporter::default(), &module)
        .await
        .expect("cold build");

    // Pretend a linker decorated the artifact.
    std::fs::rename("build/test/app", "build/test/app.exe").expect("decorate artifact");

    build_with(
        &RecordingReporter::default(),
        &module,
        RunOptions {
            remove: true,
            ..RunOptions::default()
        },
    )
    .await
    .expect("remove run");

    assert!(!Path::new("build/test/app").exists());
    assert!(!Path::new("build/test/app.exe").exists());
}

#[tokio::test]
async fn wipe_rebuilds_every_object() {
    let _workdir = Workdir::enter();
    scaffold();

    let module = module(vec![cat_target("app")]);
    build(&RecordingReporter::default(), &module)
        .await
        .expect("cold build");
    pretty_assert_eq!(read_lines("compile.log").len(), 2);

    let rerun = RecordingReporter::default();
    build_with(
        &rerun,
        &module,
        RunOptions {
            wipe: true,
            jobs: Some(1),
            ..RunOptions::default()
        },
    )
    .await
    .expect("wipe run");

    // Objects were deleted, so everything recompiles.
    pretty_assert_eq!(rerun.compiles(), 2);
    pretty_assert_eq!(read_lines("compile.log").len(), 4);
}
