//! Parallel scheduling: bounded workers, complete object lists, stable
//! results regardless of completion order.

use std::collections::BTreeSet;

use pretty_assertions::assert_eq as pretty_assert_eq;

use super::*;

#[test_log::test(tokio::test)]
async fn eight_sources_with_four_workers() {
    let _workdir = Workdir::enter();
    write_depgen();
    for index in 0..8 {
        write_file(
            format!("src/part{index}.c"),
            &format!("int part{index}() {{}}\n"),
        );
    }

    let mut target = cat_target("app");
    target.threads = Some(4);
    let module = module(vec![target]);

    let reporter = RecordingReporter::default();
    build_with(&reporter, &module, RunOptions::default())
        .await
        .expect("parallel build");

    pretty_assert_eq!(reporter.compiles(), 8);
    assert!(Path::new("build/test/app").is_file());

    // Every object was produced exactly once.
    let compiled = read_lines("compile.log");
    pretty_assert_eq!(compiled.len(), 8);
    let unique = compiled.iter().collect::<BTreeSet<_>>();
    pretty_assert_eq!(unique.len(), 8);
    for index in 0..8 {
        assert!(Path::new(&format!("build/test/obj/src/part{index}.o")).is_file());
    }

    // The artifact concatenates all eight objects, in whatever order the
    // workers finished.
    let artifact = std::fs::read_to_string("build/test/app").expect("read artifact");
    pretty_assert_eq!(artifact.lines().count(), 8);

    // A no-op rerun stays a no-op under parallelism.
    let rerun = RecordingReporter::default();
    build_with(&rerun, &module, RunOptions::default())
        .await
        .expect("rerun");
    pretty_assert_eq!(rerun.compiles(), 0);
}

#[test_log::test(tokio::test)]
async fn srcbase_is_stripped_from_object_paths() {
    let _workdir = Workdir::enter();
    write_depgen();
    write_file("vendor/lib/src/one.c", "int one() {}\n");
    write_file("vendor/lib/src/two.c", "int two() {}\n");

    let mut target = cat_target("lib");
    target.srcbase = Some(String::from("vendor/lib"));
    target.srcdir = Some(String::from("src"));
    let module = module(vec![target]);

    let reporter = RecordingReporter::default();
    build(&reporter, &module).await.expect("build");

    // Dep tree mirrors the full source path; object tree drops the base.
    assert!(Path::new("build/test/dep/vendor/lib/src/one.d").is_file());
    assert!(Path::new("build/test/obj/src/one.o").is_file());
    assert!(Path::new("build/test/obj/src/two.o").is_file());
    assert!(!Path::new("build/test/obj/vendor").exists());
    assert!(Path::new("build/test/lib").is_file());
}
