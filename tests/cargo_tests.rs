//! Tests for cargos: naming, shared layouts and local staging.

use noronha_bay::barrel::{Barrel, FileSpec};
use noronha_bay::warehouse::LocalWarehouse;
use noronha_bay::{
    CONF_FILE, Cargo, CargoKind, Content, Error, MountMode, SECTION_DEPL, SECTION_TRAIN,
};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn dataset_barrel(root: &TempDir) -> Arc<Barrel> {
    let warehouse = Arc::new(
        LocalWarehouse::with_path(root.path().to_path_buf())
            .unwrap()
            .with_public_url("http://files:8081"),
    );
    Arc::new(Barrel::dataset(
        "iris",
        "v1",
        vec![FileSpec::new("train.csv").required().with_max_mb(30)],
        false,
        warehouse,
    ))
}

// =============================================================================
// Naming Tests
// =============================================================================

#[test]
fn test_prefix_scopes_volume_name() {
    let mut cargo = Cargo::logs("iris-exp1");
    cargo.set_prefix(SECTION_TRAIN).unwrap();

    assert_eq!(cargo.full_name(), "nha-train-logs-iris-exp1");
    assert_eq!(cargo.mount(), "nha-train-logs-iris-exp1:/logs:rw");
}

#[test]
fn test_prefix_set_only_once() {
    let mut cargo = Cargo::logs("iris");
    cargo.set_prefix(SECTION_TRAIN).unwrap();

    assert!(matches!(cargo.set_prefix(SECTION_DEPL), Err(Error::Misusage(_))));
    assert_eq!(cargo.prefix(), Some(SECTION_TRAIN));
}

#[test]
fn test_prefix_rejects_unknown_section() {
    let mut cargo = Cargo::logs("iris");
    assert!(matches!(cargo.set_prefix("nha-lab"), Err(Error::Misusage(_))));
}

#[test]
fn test_mapped_mounts_source_path() {
    let cargo = Cargo::mapped("code", "/app", "/home/me/code", false);

    assert!(cargo.is_mapped());
    assert_eq!(cargo.mount(), "/home/me/code:/app:rw");
}

#[test]
fn test_anonymous_names_are_unique() {
    let a = Cargo::anonymous("/tmp/scratch", MountMode::ReadWrite);
    let b = Cargo::anonymous("/tmp/scratch", MountMode::ReadWrite);

    assert!(a.name().starts_with("anon-"));
    assert_ne!(a.name(), b.name());
}

// =============================================================================
// Sizing Tests
// =============================================================================

#[test]
fn test_heavy_size_follows_barrel() {
    let root = TempDir::new().unwrap();
    let cargo = Cargo::dataset("iris", "v1", dataset_barrel(&root));

    assert_eq!(cargo.kind(), &CargoKind::Heavy);
    assert_eq!(cargo.require_mb(), 30);
    assert!(cargo.mode().is_read_only());
}

#[test]
fn test_shared_size_has_floor() {
    let shared = Cargo::shared("iris", vec![Cargo::conf("iris", "a: 1")]).unwrap();
    assert_eq!(shared.require_mb(), 10);
}

// =============================================================================
// Shared Layout Tests
// =============================================================================

#[test]
fn test_shared_rejects_foreign_mount() {
    let result = Cargo::shared("iris", vec![Cargo::logs("iris")]);
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_shared_deploy_lays_out_subdirs() {
    let tmp = TempDir::new().unwrap();
    let shared = Cargo::shared(
        "iris",
        vec![
            Cargo::conf("iris", "captain: {}\n"),
            Cargo::meta("iris", vec![("proj.json".into(), "{}".into())]),
        ],
    )
    .unwrap();

    shared.deploy(tmp.path(), false).unwrap();

    assert!(tmp.path().join("conf").join(CONF_FILE).is_file());
    assert_eq!(
        fs::read_to_string(tmp.path().join("meta/proj.json")).unwrap(),
        "{}"
    );
}

#[test]
fn test_shared_deploy_rejects_file_in_place_of_dir() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("conf"), "not a dir").unwrap();
    let shared = Cargo::shared("iris", vec![Cargo::conf("iris", "a: 1")]).unwrap();

    assert!(matches!(
        shared.deploy(tmp.path(), false),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_shared_heavy_staged_in_container() {
    let root = TempDir::new().unwrap();
    let shared = Cargo::shared(
        "iris",
        vec![
            Cargo::conf("iris", "a: 1"),
            Cargo::dataset("iris", "v1", dataset_barrel(&root)),
        ],
    )
    .unwrap();

    assert!(shared.stages_in_container());

    let deployables = shared.get_deployables("/staging/nha-train-shared-iris").unwrap();
    assert_eq!(deployables.len(), 1, "only heavy content has deployables");
    assert_eq!(
        deployables[0].command,
        "curl -f -O http://files:8081/datasets/iris/v1/train.csv \
         && mkdir -p /staging/nha-train-shared-iris/data \
         && mv train.csv /staging/nha-train-shared-iris/data"
    );

    let tmp = TempDir::new().unwrap();
    shared.deploy(tmp.path(), false).unwrap();
    assert!(!tmp.path().join("data").exists(), "heavy content skipped locally");
}

#[test]
fn test_binary_content_deploys_bytes() {
    let tmp = TempDir::new().unwrap();
    let cargo = Cargo::new(
        "blob",
        "/nha/blob",
        MountMode::ReadOnly,
        vec![Content::binary("model.bin", vec![1u8, 2, 3])],
    );

    cargo.deploy(tmp.path(), true).unwrap();

    assert_eq!(fs::read(tmp.path().join("model.bin")).unwrap(), vec![1, 2, 3]);
}
