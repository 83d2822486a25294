use modlock_core::decision::{FileAction, Strategy};
use modlock_core::lockfile::RootRequirement;
use modlock_core::metadata::{DeclaredDependency, DependencyKind, PackageRelease, StaticSource};
use modlock_resolver::files::{FileConflictIndex, FileConflictKind};
use modlock_resolver::graph::DependencyGraph;
use modlock_resolver::resolver::{Resolver, Selection};
use modlock_resolver::strategy::{resolve_conflicts, ResolutionState};

fn resolve(source: &StaticSource, roots: &[&str]) -> (DependencyGraph, Selection) {
    let graph = DependencyGraph::from_source(source).unwrap();
    let selection = Resolver::new(&graph)
        .roots(roots.iter().map(|r| RootRequirement::any(*r)))
        .resolve()
        .into_result()
        .unwrap();
    (graph, selection)
}

#[test]
fn test_identical_and_overwrite_conflicts() {
    let source = StaticSource::new()
        .with(
            PackageRelease::new("a", "1.0")
                .file("data/x.esp", "h1")
                .file("textures/t.dds", "h2")
                .file("only/a.txt", "h9"),
        )
        .with(
            PackageRelease::new("b", "1.0")
                .file("Data\\X.esp", "h1")
                .file("textures/t.dds", "h3"),
        );
    let (graph, selection) = resolve(&source, &["a", "b"]);
    let index = FileConflictIndex::from_selection(&graph, &selection, true).unwrap();

    let conflicts = index.conflicts();
    assert_eq!(conflicts.len(), 2);
    assert_eq!(conflicts[0].path, "data/x.esp");
    assert_eq!(conflicts[0].kind, FileConflictKind::IdenticalFiles);
    assert_eq!(conflicts[1].path, "textures/t.dds");
    assert_eq!(conflicts[1].kind, FileConflictKind::Overwrite);

    let owners: Vec<&str> = conflicts[1].owners.iter().map(|o| o.package_id()).collect();
    assert_eq!(owners, vec!["a", "b"]);
    assert_eq!(conflicts[1].hashes, vec!["h2", "h3"]);
}

#[test]
fn test_three_packages_one_identical_one_overwrite() {
    let source = StaticSource::new()
        .with(PackageRelease::new("mod-a", "1.0").file("config/ini", "H1"))
        .with(
            PackageRelease::new("mod-b", "1.0")
                .file("config/ini", "H1")
                .file("config/ui.xml", "H2"),
        )
        .with(PackageRelease::new("mod-c", "1.0").file("config/ui.xml", "H3"));
    let (graph, selection) = resolve(&source, &["mod-a", "mod-b", "mod-c"]);
    let index = FileConflictIndex::from_selection(&graph, &selection, true).unwrap();

    let conflicts = index.conflicts();
    assert_eq!(conflicts.len(), 2);

    let identical: Vec<_> = conflicts
        .iter()
        .filter(|c| c.kind == FileConflictKind::IdenticalFiles)
        .collect();
    assert_eq!(identical.len(), 1);
    assert_eq!(identical[0].path, "config/ini");
    let owners: Vec<&str> = identical[0].owners.iter().map(|o| o.package_id()).collect();
    assert_eq!(owners, vec!["mod-a", "mod-b"]);

    let overwrite: Vec<_> = conflicts
        .iter()
        .filter(|c| c.kind == FileConflictKind::Overwrite)
        .collect();
    assert_eq!(overwrite.len(), 1);
    assert_eq!(overwrite[0].path, "config/ui.xml");
    let owners: Vec<&str> = overwrite[0].owners.iter().map(|o| o.package_id()).collect();
    assert_eq!(owners, vec!["mod-b", "mod-c"]);
    assert_eq!(overwrite[0].hashes, vec!["H2", "H3"]);
}

#[test]
fn test_embedded_packages_are_merge_candidates() {
    let source = StaticSource::new()
        .with(
            PackageRelease::new("patch", "1.0")
                .depends(DeclaredDependency::new("base", "*", DependencyKind::Embedded))
                .file("scripts/main.pex", "p"),
        )
        .with(PackageRelease::new("base", "1.0").file("scripts/main.pex", "b"));
    let (graph, selection) = resolve(&source, &["patch", "base"]);
    let index = FileConflictIndex::from_selection(&graph, &selection, true).unwrap();

    let conflicts = index.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].kind, FileConflictKind::MergeCandidate);

    let resolutions = resolve_conflicts(&conflicts, Strategy::Automatic, selection.order());
    assert_eq!(resolutions[0].action, FileAction::PromptUser);
    assert_eq!(resolutions[0].state(), ResolutionState::NeedsUserInput);
}

#[test]
fn test_invalid_manifest_path_fails_indexing() {
    let source = StaticSource::new().with(PackageRelease::new("a", "1.0").file("/abs/path", "h"));
    let (graph, selection) = resolve(&source, &["a"]);
    let err = FileConflictIndex::from_selection(&graph, &selection, true).unwrap_err();
    assert_eq!(err.path, "/abs/path");
    assert_eq!(err.reason, "absolute path");
}

#[test]
fn test_priority_follows_install_order() {
    let source = StaticSource::new()
        .with(PackageRelease::new("base", "1.0").file("x.esp", "1"))
        .with(
            PackageRelease::new("addon", "1.0")
                .requires("base", "*")
                .file("x.esp", "2"),
        );
    let (graph, selection) = resolve(&source, &["addon"]);
    assert_eq!(selection.order(), ["base", "addon"]);

    let index = FileConflictIndex::from_selection(&graph, &selection, true).unwrap();
    let resolutions = resolve_conflicts(&index.conflicts(), Strategy::Automatic, selection.order());
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].winner.package_id(), "addon");
    assert_eq!(resolutions[0].action, FileAction::KeepWinner);
    assert!((resolutions[0].confidence - 0.75).abs() < 1e-9);
}
