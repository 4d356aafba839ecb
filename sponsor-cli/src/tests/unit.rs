//! Focused unit tests covering command configuration and execution.

use super::helpers::{Workspace, decode, names};
use super::*;
use crate::list::{ListArgs, ListConfig, run_list_with};
use crate::sync::{RegisterSource, SyncArgs, SyncConfig, run_sync_with};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use sponsor_data::{CsvLocation, PageRequest, PageRequestError};

#[fixture]
fn workspace() -> Workspace {
    Workspace::new()
}

fn parse(args: &[&str]) -> Command {
    let mut invocation = vec!["sponsor-tracker"];
    invocation.extend_from_slice(args);
    Cli::try_parse_from(invocation)
        .expect("arguments should parse")
        .command
}

fn sync_args(database: Option<&str>) -> SyncArgs {
    SyncArgs {
        database: database.map(Utf8PathBuf::from),
        ..SyncArgs::default()
    }
}

#[rstest]
fn sync_flags_parse_into_args() {
    let command = parse(&[
        "sync",
        "--database",
        "sponsors.db",
        "--csv-file",
        "register.csv",
    ]);

    match command {
        Command::Sync(args) => {
            assert_eq!(args.database, Some(Utf8PathBuf::from("sponsors.db")));
            assert_eq!(args.csv_file, Some(Utf8PathBuf::from("register.csv")));
            assert_eq!(args.csv_url, None);
        }
        other => panic!("expected sync, found {other:?}"),
    }
}

#[rstest]
fn sync_without_database_errors() {
    let err = SyncConfig::try_from(sync_args(None)).expect_err("missing database");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_DATABASE);
            assert_eq!(env, ENV_SYNC_DATABASE);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn sync_defaults_to_discovering_the_publication_page() {
    let config = SyncConfig::try_from(sync_args(Some("sponsors.db"))).expect("config");

    let expected = CsvLocation::publication_page().expect("publication page");
    assert_eq!(config.source, RegisterSource::Http(expected));
}

#[rstest]
fn sync_page_url_overrides_discovery() {
    let args = SyncArgs {
        page_url: Some("https://example.test/register".to_owned()),
        ..sync_args(Some("sponsors.db"))
    };

    let config = SyncConfig::try_from(args).expect("config");

    match config.source {
        RegisterSource::Http(CsvLocation::Discover(url)) => {
            assert_eq!(url.as_str(), "https://example.test/register");
        }
        other => panic!("expected discovery, found {other:?}"),
    }
}

#[rstest]
fn sync_csv_url_is_downloaded_directly() {
    let args = SyncArgs {
        csv_url: Some("https://example.test/register.csv".to_owned()),
        ..sync_args(Some("sponsors.db"))
    };

    let config = SyncConfig::try_from(args).expect("config");

    assert!(matches!(
        config.source,
        RegisterSource::Http(CsvLocation::Direct(url)) if url.path() == "/register.csv"
    ));
}

#[rstest]
fn sync_rejects_two_register_sources() {
    let args = SyncArgs {
        csv_url: Some("https://example.test/register.csv".to_owned()),
        csv_file: Some(Utf8PathBuf::from("register.csv")),
        ..sync_args(Some("sponsors.db"))
    };

    let err = SyncConfig::try_from(args).expect_err("conflicting sources");

    assert!(matches!(
        err,
        CliError::ConflictingArguments {
            first: ARG_CSV_FILE,
            second: ARG_CSV_URL,
        }
    ));
}

#[rstest]
#[case(ARG_CSV_FILE)]
#[case(ARG_CSV_URL)]
fn sync_rejects_a_page_url_alongside_a_direct_source(#[case] flag: &'static str) {
    let mut args = SyncArgs {
        page_url: Some("https://example.test/sponsors".to_owned()),
        ..sync_args(Some("sponsors.db"))
    };
    if flag == ARG_CSV_FILE {
        args.csv_file = Some(Utf8PathBuf::from("register.csv"));
    } else {
        args.csv_url = Some("https://example.test/register.csv".to_owned());
    }

    let err = SyncConfig::try_from(args).expect_err("conflicting sources");

    assert!(matches!(
        err,
        CliError::ConflictingArguments { first, second: ARG_PAGE_URL } if first == flag
    ));
}

#[rstest]
#[case(ARG_CSV_URL)]
#[case(ARG_PAGE_URL)]
fn sync_rejects_malformed_urls(#[case] flag: &'static str) {
    let mut args = sync_args(Some("sponsors.db"));
    let value = Some("not a url".to_owned());
    if flag == ARG_CSV_URL {
        args.csv_url = value;
    } else {
        args.page_url = value;
    }

    let err = SyncConfig::try_from(args).expect_err("invalid url");

    match err {
        CliError::InvalidUrl { field, value, .. } => {
            assert_eq!(field, flag);
            assert_eq!(value, "not a url");
        }
        other => panic!("expected InvalidUrl, found {other:?}"),
    }
}

#[rstest]
fn sync_prints_statistics_for_a_file_register(workspace: Workspace) {
    workspace.write_register(&[
        "StaffCo,Leeds,,Worker (A rating),Skilled Worker",
        "Brew Ltd,York,North Yorkshire,Worker (B rating),Skilled Worker",
    ]);
    let config = SyncConfig {
        database: workspace.database(),
        source: RegisterSource::File(workspace.register()),
    };
    let mut output = Vec::new();

    run_sync_with(&config, &mut output).expect("sync succeeds");

    let stats = decode(&output);
    assert_eq!(stats["bootstrap"], true);
    assert_eq!(stats["new_organisations"], 2);
    assert_eq!(stats["new_licences"], 2);
    assert_eq!(stats["errors"].as_array().map(Vec::len), Some(0));
}

#[rstest]
fn sync_reports_a_missing_register_file(workspace: Workspace) {
    let config = SyncConfig {
        database: workspace.database(),
        source: RegisterSource::File(workspace.register()),
    };
    let mut output = Vec::new();

    let err = run_sync_with(&config, &mut output).expect_err("missing register");

    assert!(matches!(err, CliError::Sync(_)));
    assert!(output.is_empty());
}

#[rstest]
fn list_applies_default_bounds() {
    let args = ListArgs {
        database: Some(Utf8PathBuf::from("sponsors.db")),
        ..ListArgs::default()
    };

    let config = ListConfig::try_from(args).expect("config");

    assert_eq!(
        config.request,
        PageRequest::new(1, 50, "").expect("default page")
    );
}

#[rstest]
#[case(Some(10), None, 10, 59)]
#[case(None, Some(5), 1, 5)]
#[case(Some(999_999_990), None, 999_999_990, 1_000_000_000)]
fn list_fills_missing_bounds(
    #[case] from: Option<u32>,
    #[case] to: Option<u32>,
    #[case] expected_from: u32,
    #[case] expected_to: u32,
) {
    let args = ListArgs {
        database: Some(Utf8PathBuf::from("sponsors.db")),
        from,
        to,
        search: None,
    };

    let config = ListConfig::try_from(args).expect("config");

    assert_eq!(config.request.from(), expected_from);
    assert_eq!(config.request.to(), expected_to);
}

#[rstest]
fn list_rejects_inverted_bounds() {
    let args = ListArgs {
        database: Some(Utf8PathBuf::from("sponsors.db")),
        from: Some(5),
        to: Some(2),
        search: None,
    };

    let err = ListConfig::try_from(args).expect_err("inverted bounds");

    assert!(matches!(
        err,
        CliError::InvalidPage(PageRequestError::Inverted { from: 5, to: 2 })
    ));
}

#[rstest]
fn list_without_database_errors() {
    let err = ListConfig::try_from(ListArgs::default()).expect_err("missing database");
    assert!(matches!(
        err,
        CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_LIST_DATABASE,
        }
    ));
}

#[rstest]
fn list_requires_an_existing_database(workspace: Workspace) {
    let config = ListConfig {
        database: workspace.database(),
        request: PageRequest::new(1, 10, "").expect("page"),
    };
    let mut output = Vec::new();

    let err = run_list_with(&config, &mut output).expect_err("missing database");

    assert!(matches!(err, CliError::MissingDatabase { .. }));
    assert!(!workspace.database().exists());
}

#[rstest]
fn list_prints_the_synchronised_register(workspace: Workspace) {
    workspace.write_register(&[
        "StaffCo,Leeds,,Worker (A rating),Skilled Worker",
        "Brew Ltd,York,North Yorkshire,Worker (B rating),Skilled Worker",
    ]);
    let sync = SyncConfig {
        database: workspace.database(),
        source: RegisterSource::File(workspace.register()),
    };
    run_sync_with(&sync, &mut Vec::new()).expect("sync succeeds");
    let list = ListConfig {
        database: workspace.database(),
        request: PageRequest::new(1, 10, "york").expect("page"),
    };
    let mut output = Vec::new();

    run_list_with(&list, &mut output).expect("list succeeds");

    let snapshot = decode(&output);
    assert_eq!(names(&snapshot), ["Brew Ltd"]);
    assert_eq!(snapshot["total_organisations"], 1);
    assert_eq!(snapshot["licences"][0]["rating"], "B rating");
}
