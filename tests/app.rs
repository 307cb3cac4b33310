mod common;

use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;

use common::{FakeMash, MockFactory, MockRemote, TableClassifier, gz, sorted_lines, temp_store};
use refsketch::app::App;
use refsketch::cancel::CancelFlag;
use refsketch::config::Settings;
use refsketch::domain::TaxonGroup;
use refsketch::output::JsonOutput;

const CATALOG: &str = "\
GCA_000001405.29\tGRCh38.p14\t9606
GCA_000001635.9\tGRCm39\t10090
GCA_000001215.4\tRelease 6 plus ISO1 MT\t7227
GCA_000002945.2\tASM294v2\t4896
GCA_123\tbroken\t9606
";

fn settings() -> Settings {
    Settings {
        request_delay: Duration::ZERO,
        retry_base_delay: Duration::ZERO,
        ..Settings::default()
    }
}

fn classifier() -> TableClassifier {
    TableClassifier::default()
        .with("9606", "Chordata")
        .with("10090", "Chordata")
        .with("7227", "Arthropoda")
}

fn remote() -> MockRemote {
    let folders = [
        ("/genomes/all/GCA/000/001/405", "GCA_000001405.29_GRCh38.p14"),
        ("/genomes/all/GCA/000/001/635", "GCA_000001635.9_GRCm39"),
        ("/genomes/all/GCA/000/001/215", "GCA_000001215.4_Release_6_plus_ISO1_MT"),
    ];
    folders
        .iter()
        .fold(MockRemote::default(), |remote, (partition, folder)| {
            let url = format!("https://archive.test{partition}/{folder}/{folder}_genomic.fna.gz");
            remote
                .with_listing(partition, &[folder])
                .with_file(&url, gz(format!(">{folder}\nACGT\n").as_bytes()))
        })
}

fn write_catalog(dir: &std::path::Path) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.join("eukaryotes.tsv")).unwrap();
    fs::write(path.as_std_path(), CATALOG).unwrap();
    path
}

#[test]
fn build_indexes_every_resolvable_genome() {
    let (temp, store) = temp_store();
    let catalog_path = write_catalog(temp.path());
    let app = App::new(
        store.clone(),
        settings(),
        MockFactory::new(remote()),
        FakeMash::default(),
    );

    let (catalog, stats) = app
        .classify(&catalog_path, &classifier(), &JsonOutput)
        .unwrap();
    assert_eq!(stats.rows, 5);
    assert_eq!(stats.unclassified, 1);
    assert_eq!(catalog.group_count(), 2);
    assert!(store.classified_catalog_path().as_std_path().is_file());

    let report = app.index(&catalog, stats, &JsonOutput).unwrap();

    assert_eq!(report.resolve.resolved, 3);
    assert_eq!(report.resolve.unresolvable, 1);
    assert_eq!(report.sketched, 3);
    assert!(report.failures.is_empty());
    assert!(!report.cancelled);

    let chordata: TaxonGroup = "Chordata".parse().unwrap();
    let arthropoda: TaxonGroup = "Arthropoda".parse().unwrap();
    assert_eq!(
        sorted_lines(&store.global_sketch_path(&chordata)),
        vec!["GCA_000001405.29:9606", "GCA_000001635.9:10090"]
    );
    assert_eq!(
        sorted_lines(&store.global_sketch_path(&arthropoda)),
        vec!["GCA_000001215.4:7227"]
    );
    assert_eq!(
        sorted_lines(&store.no_url_ledger_path()),
        vec!["GCA_123"]
    );
}

#[test]
fn second_run_resumes_without_downloading() {
    let (temp, store) = temp_store();
    let catalog_path = write_catalog(temp.path());
    let factory = MockFactory::new(remote());
    let remote = factory.remote.clone();
    let app = App::new(store.clone(), settings(), factory, FakeMash::default());

    let (catalog, stats) = app
        .classify(&catalog_path, &classifier(), &JsonOutput)
        .unwrap();
    app.index(&catalog, stats.clone(), &JsonOutput).unwrap();
    let listings = remote.list_calls();
    let downloads = remote.download_calls();

    let report = app.index(&catalog, stats, &JsonOutput).unwrap();

    assert_eq!(remote.list_calls(), listings);
    assert_eq!(remote.download_calls(), downloads);
    assert_eq!(report.sketched, 0);
    assert_eq!(report.already_downloaded, 3);
    assert_eq!(report.resolve.previously_excluded, 1);
    assert!(report.merge.groups.is_empty());

    let chordata: TaxonGroup = "Chordata".parse().unwrap();
    assert_eq!(sorted_lines(&store.global_sketch_path(&chordata)).len(), 2);
}

#[test]
fn cancelled_run_can_be_resumed() {
    let (temp, store) = temp_store();
    let catalog_path = write_catalog(temp.path());
    let factory = MockFactory::new(remote());
    let remote = factory.remote.clone();
    let cancel = CancelFlag::new();
    cancel.cancel();
    let app = App::new(store.clone(), settings(), factory, FakeMash::default())
        .with_cancel_flag(cancel);

    let (catalog, stats) = app
        .classify(&catalog_path, &classifier(), &JsonOutput)
        .unwrap();
    let report = app.index(&catalog, stats.clone(), &JsonOutput).unwrap();

    assert!(report.cancelled);
    assert_eq!(report.sketched, 0);
    assert_eq!(remote.download_calls(), 0);
    assert!(report.merge.groups.is_empty());

    let resumed = App::new(
        store.clone(),
        settings(),
        MockFactory {
            remote: remote.clone(),
        },
        FakeMash::default(),
    );
    let report = resumed.index(&catalog, stats, &JsonOutput).unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.sketched, 3);
    let chordata: TaxonGroup = "Chordata".parse().unwrap();
    assert_eq!(
        sorted_lines(&store.global_sketch_path(&chordata)),
        vec!["GCA_000001405.29:9606", "GCA_000001635.9:10090"]
    );
}

#[test]
fn missing_catalog_is_reported() {
    let (temp, store) = temp_store();
    let app = App::new(
        store,
        settings(),
        MockFactory::new(MockRemote::default()),
        FakeMash::default(),
    );
    let missing = Utf8PathBuf::from_path_buf(temp.path().join("nope.tsv")).unwrap();

    let err = app
        .classify(&missing, &classifier(), &JsonOutput)
        .unwrap_err();

    assert!(matches!(
        err,
        refsketch::error::RefsketchError::CatalogRead(_)
    ));
}
