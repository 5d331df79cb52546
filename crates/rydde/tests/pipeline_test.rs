mod common;

use common::{abs, run_pipeline};
use rydde_lib::catalog::{folders, plan, DecisionSource, FolderAction, PlanKind};
use std::fs;

#[test]
fn kept_photo_folder_becomes_one_unit_with_dated_target() {
    let tree = tempfile::tempdir().unwrap();
    let album = tree.path().join("Wedding-Photos-2024");
    fs::create_dir(&album).unwrap();
    fs::write(album.join("IMG_0001.jpg"), b"fake jpeg bytes").unwrap();
    fs::write(album.join("IMG_0002.jpg"), b"other jpeg bytes").unwrap();

    let rules = "^.*Photos-(?P<backup_year>[0-9]{4}).*$, image/*, Photos/{backup_year}, keep, final\n";
    let db = tempfile::tempdir().unwrap();
    let (catalog, _report) = run_pipeline(tree.path(), rules, &db.path().join("c.db"));

    let reader = catalog.reader().unwrap();
    let folder = folders::get_folder(&reader, &abs(tree.path(), "Wedding-Photos-2024"))
        .unwrap()
        .unwrap();
    assert_eq!(folder.action, FolderAction::Keep);
    assert_eq!(folder.source, Some(DecisionSource::RuleFinal));
    assert_eq!(folder.category.as_deref(), Some("Photos/2024"));

    let entries = plan::list_entries(&reader).unwrap();
    let units: Vec<_> = entries.iter().filter(|e| e.kind == PlanKind::KeepUnit).collect();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].source_path, abs(tree.path(), "Wedding-Photos-2024"));
    assert_eq!(units[0].target_path, "Photos/2024/Wedding-Photos-2024");

    // The album's files ride with the unit; none are placed individually.
    assert!(entries.iter().all(|e| e.kind != PlanKind::Place));
}

#[test]
fn disaggregated_downloads_files_go_to_their_categories() {
    let tree = tempfile::tempdir().unwrap();
    let downloads = tree.path().join("Downloads");
    fs::create_dir(&downloads).unwrap();
    fs::write(downloads.join("invoice.pdf"), b"%PDF-1.4 pretend").unwrap();
    fs::write(downloads.join("song.mp3"), b"ID3 pretend audio").unwrap();

    let rules = "\
^.*\\.pdf$, */pdf, Documents/Finance, disaggregate, final
^.*\\.mp3$, audio/*, Media/Audio, disaggregate, final
";
    let db = tempfile::tempdir().unwrap();
    let (catalog, _report) = run_pipeline(tree.path(), rules, &db.path().join("c.db"));

    let reader = catalog.reader().unwrap();
    let entries = plan::list_entries(&reader).unwrap();

    let by_source = |suffix: &str| {
        entries
            .iter()
            .find(|e| e.source_path.ends_with(suffix))
            .unwrap_or_else(|| panic!("no plan entry for {}", suffix))
    };

    assert_eq!(by_source("invoice.pdf").target_path, "Documents/Finance/invoice.pdf");
    assert_eq!(by_source("song.mp3").target_path, "Media/Audio/song.mp3");
    assert_eq!(by_source("invoice.pdf").kind, PlanKind::Place);
}

#[test]
fn git_marker_keeps_the_whole_project() {
    let tree = tempfile::tempdir().unwrap();
    let project = tree.path().join("project");
    fs::create_dir_all(project.join(".git")).unwrap();
    fs::create_dir_all(project.join("src")).unwrap();
    fs::write(project.join(".git/config"), b"[core]\n").unwrap();
    fs::write(project.join("src/main.c"), b"int main(void) { return 0; }\n").unwrap();

    let rules = "^.*/\\.git/.*$, *, System/Projects, keep, final\n";
    let db = tempfile::tempdir().unwrap();
    let (catalog, _report) = run_pipeline(tree.path(), rules, &db.path().join("c.db"));

    let reader = catalog.reader().unwrap();
    let project_record = folders::get_folder(&reader, &abs(tree.path(), "project"))
        .unwrap()
        .unwrap();
    assert_eq!(project_record.action, FolderAction::Keep);
    assert_eq!(project_record.source, Some(DecisionSource::RuleFinal));

    for sub in ["project/.git", "project/src"] {
        let record = folders::get_folder(&reader, &abs(tree.path(), sub)).unwrap().unwrap();
        assert_eq!(record.action, FolderAction::Keep);
        assert_eq!(record.source, Some(DecisionSource::Inherited));
    }

    let entries = plan::list_entries(&reader).unwrap();
    let units: Vec<_> = entries.iter().filter(|e| e.kind == PlanKind::KeepUnit).collect();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].source_path, abs(tree.path(), "project"));
    assert!(entries.iter().all(|e| e.kind != PlanKind::Place));
}

#[test]
fn identical_subtrees_collapse_to_one_canonical_unit() {
    let tree = tempfile::tempdir().unwrap();
    for backup in ["Backup1", "Backup2"] {
        let project = tree.path().join(backup).join("ProjectA");
        fs::create_dir_all(project.join("src")).unwrap();
        fs::write(project.join("README.md"), b"# ProjectA\n").unwrap();
        fs::write(project.join("src/lib.rs"), b"pub fn a() {}\n").unwrap();
    }

    // ProjectA folders are kept as units by name.
    let rules = "^.*/ProjectA$, *, System/Projects, keep, final\n";
    let db = tempfile::tempdir().unwrap();
    let (catalog, report) = run_pipeline(tree.path(), rules, &db.path().join("c.db"));

    let dedup = report.dedup.unwrap();
    assert!(dedup.folder_groups >= 1);

    let reader = catalog.reader().unwrap();
    let canonical = abs(tree.path(), "Backup1/ProjectA");
    let duplicate = abs(tree.path(), "Backup2/ProjectA");

    let entries = plan::list_entries(&reader).unwrap();
    let unit = entries
        .iter()
        .find(|e| e.kind == PlanKind::KeepUnit && e.source_path == canonical)
        .expect("canonical keep-unit");
    let skip = entries
        .iter()
        .find(|e| e.kind == PlanKind::SkipDuplicate && e.source_path == duplicate)
        .expect("skip-duplicate for the second copy");

    assert_eq!(skip.duplicate_of.as_deref(), Some(canonical.as_str()));
    assert_eq!(skip.target_path, unit.target_path);
}

#[test]
fn keep_except_anchor_evaluates_children_individually() {
    let tree = tempfile::tempdir().unwrap();
    let alice = tree.path().join("alice");
    fs::create_dir_all(alice.join(".config")).unwrap();
    fs::create_dir_all(alice.join("Documents")).unwrap();
    fs::write(alice.join(".config/settings.ini"), b"[ui]\n").unwrap();
    fs::write(alice.join("Documents/cv.pdf"), b"%PDF cv").unwrap();

    let rules = "\
^.*/alice$, *, People/Alice, keep_except, final
^.*/Documents$, *, Documents, disaggregate, final
^.*\\.pdf$, */pdf, Documents/Inbox, disaggregate, final
";
    let db = tempfile::tempdir().unwrap();
    let (catalog, _report) = run_pipeline(tree.path(), rules, &db.path().join("c.db"));

    let reader = catalog.reader().unwrap();
    let anchor = folders::get_folder(&reader, &abs(tree.path(), "alice")).unwrap().unwrap();
    assert_eq!(anchor.action, FolderAction::KeepExcept);

    let config = folders::get_folder(&reader, &abs(tree.path(), "alice/.config"))
        .unwrap()
        .unwrap();
    assert_eq!(config.action, FolderAction::Keep);
    assert_eq!(config.source, Some(DecisionSource::Inherited));

    let documents = folders::get_folder(&reader, &abs(tree.path(), "alice/Documents"))
        .unwrap()
        .unwrap();
    assert_eq!(documents.action, FolderAction::Disaggregate);

    let entries = plan::list_entries(&reader).unwrap();
    // .config is preserved as a unit under the anchor's category.
    let unit = entries
        .iter()
        .find(|e| e.kind == PlanKind::KeepUnit && e.source_path.ends_with(".config"))
        .expect("kept .config unit");
    assert_eq!(unit.target_path, "People/Alice/.config");

    // The document is re-filed individually.
    let placed = entries
        .iter()
        .find(|e| e.kind == PlanKind::Place && e.source_path.ends_with("cv.pdf"))
        .expect("placed cv.pdf");
    assert_eq!(placed.target_path, "Documents/Inbox/cv.pdf");
}

#[test]
fn unknown_category_falls_back_to_unsorted() {
    let tree = tempfile::tempdir().unwrap();
    fs::write(tree.path().join("mystery.xyz"), b"???").unwrap();

    // The rule emits a category that is not in the categories file.
    let rules = ".*\\.xyz$, *, Totally/Illegal, disaggregate, final\n";
    let db = tempfile::tempdir().unwrap();
    let (catalog, report) = run_pipeline(tree.path(), rules, &db.path().join("c.db"));

    assert_eq!(report.plan.as_ref().unwrap().category_fallbacks, 1);

    let reader = catalog.reader().unwrap();
    let entries = plan::list_entries(&reader).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].target_path, "Other/Unsorted/mystery.xyz");
}

#[test]
fn colliding_targets_get_deterministic_suffixes() {
    let tree = tempfile::tempdir().unwrap();
    fs::create_dir_all(tree.path().join("a")).unwrap();
    fs::create_dir_all(tree.path().join("b")).unwrap();
    fs::write(tree.path().join("a/notes.txt"), b"first notes").unwrap();
    fs::write(tree.path().join("b/notes.txt"), b"different notes").unwrap();

    let rules = "^.*\\.txt$, text/*, Documents, disaggregate, final\n";
    let db = tempfile::tempdir().unwrap();
    let (catalog, _report) = run_pipeline(tree.path(), rules, &db.path().join("c.db"));

    let reader = catalog.reader().unwrap();
    let entries = plan::list_entries(&reader).unwrap();
    let mut targets: Vec<&str> = entries
        .iter()
        .filter(|e| e.kind == PlanKind::Place)
        .map(|e| e.target_path.as_str())
        .collect();
    targets.sort();
    assert_eq!(targets, vec!["Documents/notes (2).txt", "Documents/notes.txt"]);

    // Sources are path-sorted, so a/notes.txt claims the bare name.
    let first = entries
        .iter()
        .find(|e| e.source_path.ends_with("a/notes.txt"))
        .unwrap();
    assert_eq!(first.target_path, "Documents/notes.txt");
}

#[test]
fn rerunning_the_pipeline_reproduces_the_plan() {
    let tree = tempfile::tempdir().unwrap();
    let downloads = tree.path().join("Downloads");
    fs::create_dir(&downloads).unwrap();
    fs::write(downloads.join("invoice.pdf"), b"%PDF pretend").unwrap();
    fs::write(downloads.join("song.mp3"), b"ID3 pretend").unwrap();
    fs::write(tree.path().join("loose.txt"), b"loose").unwrap();

    let rules = "\
^.*\\.pdf$, */pdf, Documents/Finance, disaggregate, final
^.*\\.mp3$, audio/*, Media/Audio, disaggregate, final
";
    let db = tempfile::tempdir().unwrap();
    let db_path = db.path().join("c.db");

    let (catalog, _report) = run_pipeline(tree.path(), rules, &db_path);
    let first = plan::list_entries(&catalog.reader().unwrap()).unwrap();

    // Same tree, same catalog: the plan must come out byte-identical.
    let (catalog, _report) = run_pipeline(tree.path(), rules, &db_path);
    let second = plan::list_entries(&catalog.reader().unwrap()).unwrap();

    let render = |entries: &[rydde_lib::PlanEntry]| {
        entries
            .iter()
            .map(|e| {
                format!(
                    "{}|{}|{}|{}|{}",
                    e.source_path,
                    e.target_path,
                    e.kind.as_str(),
                    e.decided_by,
                    e.duplicate_of.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(render(&first), render(&second));
}

#[test]
fn keep_only_root_plans_exactly_one_unit() {
    let tree = tempfile::tempdir().unwrap();
    let vault = tree.path().join("vault");
    fs::create_dir(&vault).unwrap();
    fs::write(vault.join("secret.txt"), b"shh").unwrap();

    let rules = "^.*/vault$, *, System/Vaults, keep, final\n";
    let db = tempfile::tempdir().unwrap();
    let (catalog, _report) = run_pipeline(tree.path(), rules, &db.path().join("c.db"));

    let reader = catalog.reader().unwrap();
    let entries = plan::list_entries(&reader).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, PlanKind::KeepUnit);
    assert_eq!(entries[0].target_path, "System/Vaults/vault");
}
