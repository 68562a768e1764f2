//! Argument resolution for every subcommand.

use super::*;
use crate::ingest::IngestCommandConfig;
use crate::isochrones::{IsochronesCommandConfig, parse_durations};
use crate::serve::ServeCommandConfig;
use crate::simplify::{SimplifyCommandConfig, SimplifyScope};
use crate::sources::parse_states;
use crate::status::StatusCommandConfig;
use camino::Utf8PathBuf;
use gazetteer_core::{GeoId, Layer, ToleranceTier};
use rstest::rstest;
use std::time::Duration;

fn expect_missing(err: CliError, field: &str, env_var: &str) {
    match err {
        CliError::MissingArgument {
            field: missing,
            env,
        } => {
            assert_eq!(missing, field);
            assert_eq!(env, env_var);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

fn expect_invalid(err: CliError, field: &str) {
    match err {
        CliError::InvalidArgument { field: bad, .. } => assert_eq!(bad, field),
        other => panic!("expected InvalidArgument, found {other:?}"),
    }
}

#[rstest]
fn every_command_requires_a_database() {
    expect_missing(
        ServeCommandConfig::try_from(ServeArgs::default()).expect_err("serve"),
        ARG_DB,
        ENV_SERVE_DB,
    );
    expect_missing(
        IngestCommandConfig::try_from(IngestArgs::default()).expect_err("ingest"),
        ARG_DB,
        ENV_INGEST_DB,
    );
    expect_missing(
        SimplifyCommandConfig::try_from(SimplifyArgs::default()).expect_err("simplify"),
        ARG_DB,
        ENV_SIMPLIFY_DB,
    );
    expect_missing(
        IsochronesCommandConfig::try_from(IsochronesArgs::default()).expect_err("isochrones"),
        ARG_DB,
        ENV_ISOCHRONES_DB,
    );
    expect_missing(
        StatusCommandConfig::try_from(StatusArgs::default()).expect_err("status"),
        ARG_DB,
        ENV_STATUS_DB,
    );
}

#[rstest]
fn serve_applies_defaults() {
    let config = ServeCommandConfig::try_from(ServeArgs {
        db: Some(Utf8PathBuf::from("gazetteer.db")),
        ..ServeArgs::default()
    })
    .expect("config");
    assert_eq!(config.listen.to_string(), "127.0.0.1:8080");
    assert_eq!(config.serve, gazetteer_serve::ServeConfig::default());
    assert!(config.sources.states.is_none());
}

#[rstest]
fn serve_applies_overrides() {
    let config = ServeCommandConfig::try_from(ServeArgs {
        db: Some(Utf8PathBuf::from("gazetteer.db")),
        listen: Some("0.0.0.0:9000".to_owned()),
        lite_timeout_secs: Some(3),
        lite_buffer_m: Some(1_000.0),
        states: Some("06, 32".to_owned()),
        vintage: Some(2022),
        ..ServeArgs::default()
    })
    .expect("config");
    assert_eq!(config.listen.port(), 9000);
    assert_eq!(config.serve.context.lite_timeout, Duration::from_secs(3));
    assert!((config.serve.context.lite_buffer_m - 1_000.0).abs() < f64::EPSILON);
    assert_eq!(config.sources.vintage, 2022);
    let states = config.sources.states.expect("states");
    assert_eq!(
        states.iter().map(GeoId::as_str).collect::<Vec<_>>(),
        ["06", "32"]
    );
}

#[rstest]
#[case(Some("not-an-address".to_owned()), None, ARG_LISTEN)]
#[case(None, Some(-5.0), "lite-buffer-m")]
fn serve_rejects_bad_values(
    #[case] listen: Option<String>,
    #[case] lite_buffer_m: Option<f64>,
    #[case] field: &str,
) {
    let err = ServeCommandConfig::try_from(ServeArgs {
        db: Some(Utf8PathBuf::from("gazetteer.db")),
        listen,
        lite_buffer_m,
        ..ServeArgs::default()
    })
    .expect_err("invalid value");
    expect_invalid(err, field);
}

#[rstest]
#[case("6")]
#[case("06,abc")]
#[case(" , ")]
fn malformed_state_lists_are_rejected(#[case] raw: &str) {
    expect_invalid(parse_states(raw).expect_err("invalid states"), ARG_STATES);
}

#[rstest]
#[case(None, None, SimplifyScope::All)]
#[case(Some("county"), None, SimplifyScope::Layer(Layer::County))]
#[case(
    Some("block-group"),
    Some("fine"),
    SimplifyScope::Variant(Layer::BlockGroup, ToleranceTier::Fine)
)]
fn simplify_resolves_scope(
    #[case] layer: Option<&str>,
    #[case] tier: Option<&str>,
    #[case] expected: SimplifyScope,
) {
    let config = SimplifyCommandConfig::try_from(SimplifyArgs {
        db: Some(Utf8PathBuf::from("gazetteer.db")),
        layer: layer.map(str::to_owned),
        tier: tier.map(str::to_owned),
        batch_size: Some(0),
    })
    .expect("config");
    assert_eq!(config.scope, expected);
    assert_eq!(config.batch_size, 1);
}

#[rstest]
#[case(Some("tract"), None, ARG_LAYER)]
#[case(Some("county"), Some("ultra"), ARG_TIER)]
#[case(None, Some("coarse"), ARG_TIER)]
fn simplify_rejects_bad_scope(
    #[case] layer: Option<&str>,
    #[case] tier: Option<&str>,
    #[case] field: &str,
) {
    let err = SimplifyCommandConfig::try_from(SimplifyArgs {
        db: Some(Utf8PathBuf::from("gazetteer.db")),
        layer: layer.map(str::to_owned),
        tier: tier.map(str::to_owned),
        batch_size: None,
    })
    .expect_err("invalid scope");
    expect_invalid(err, field);
}

#[rstest]
#[case(None, Some("Alameda".to_owned()), ARG_STATE, ENV_ISOCHRONES_STATE)]
#[case(Some("06".to_owned()), None, ARG_COUNTY, ENV_ISOCHRONES_COUNTY)]
fn isochrones_require_a_county(
    #[case] state: Option<String>,
    #[case] county: Option<String>,
    #[case] field: &str,
    #[case] env_var: &str,
) {
    let err = IsochronesCommandConfig::try_from(IsochronesArgs {
        db: Some(Utf8PathBuf::from("gazetteer.db")),
        state,
        county,
        ..IsochronesArgs::default()
    })
    .expect_err("missing county");
    expect_missing(err, field, env_var);
}

#[rstest]
fn isochrones_sort_durations_and_keep_costing() {
    let config = IsochronesCommandConfig::try_from(IsochronesArgs {
        db: Some(Utf8PathBuf::from("gazetteer.db")),
        state: Some("California".to_owned()),
        county: Some("Alameda".to_owned()),
        durations: Some("30, 10,20,10".to_owned()),
        costing: Some("bicycle".to_owned()),
        ..IsochronesArgs::default()
    })
    .expect("config");
    assert_eq!(config.params.durations, vec![10, 20, 30]);
    assert_eq!(config.params.costing, "bicycle");
    assert!((config.spacing_m - 5_000.0).abs() < f64::EPSILON);
}

#[rstest]
#[case("")]
#[case("10,0")]
#[case("ten")]
fn bad_durations_are_rejected(#[case] raw: &str) {
    expect_invalid(parse_durations(raw).expect_err("invalid"), ARG_DURATIONS);
}

#[rstest]
fn isochrones_reject_non_positive_spacing() {
    let err = IsochronesCommandConfig::try_from(IsochronesArgs {
        db: Some(Utf8PathBuf::from("gazetteer.db")),
        state: Some("06".to_owned()),
        county: Some("Alameda".to_owned()),
        spacing_m: Some(0.0),
        ..IsochronesArgs::default()
    })
    .expect_err("invalid spacing");
    expect_invalid(err, ARG_SPACING);
}

#[rstest]
fn subcommands_parse_from_the_command_line() {
    let cli = Cli::try_parse_from([
        "gazetteer",
        "simplify",
        "--db",
        "data/gazetteer.db",
        "--layer",
        "county",
    ])
    .expect("parse");
    match cli.command {
        Command::Simplify(args) => {
            assert_eq!(args.db, Some(Utf8PathBuf::from("data/gazetteer.db")));
            assert_eq!(args.layer.as_deref(), Some("county"));
        }
        other => panic!("expected simplify, found {other:?}"),
    }

    let cli = Cli::try_parse_from([
        "gazetteer",
        "isochrones",
        "--state",
        "06",
        "--county",
        "Alameda",
        "--spacing-m",
        "2500",
        "--routing-url",
        "http://valhalla:8002",
    ])
    .expect("parse");
    match cli.command {
        Command::Isochrones(args) => {
            assert_eq!(args.spacing_m, Some(2_500.0));
            assert_eq!(args.routing_url.as_deref(), Some("http://valhalla:8002"));
        }
        other => panic!("expected isochrones, found {other:?}"),
    }
}

#[rstest]
fn unknown_subcommands_fail_to_parse() {
    assert!(Cli::try_parse_from(["gazetteer", "solve"]).is_err());
}
