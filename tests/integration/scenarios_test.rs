//! End-to-end scenarios against scripted mock backends.

use db_tally::aggregate::{overlap, pairwise_overlap, SetCount};
use db_tally::db::{BackendKind, Backends, MockBackend};
use db_tally::error::TallyError;
use db_tally::runner::QueryTemplateRunner;
use db_tally::template::{params, QueryTemplate};
use pretty_assertions::assert_eq;

use super::common::TEMPLATE_COUNT_SQL;

const CAPTION_COUNT_SQL: &str = "
    SELECT COUNT(DISTINCT page_id) AS files
    FROM structured_data_captions
    WHERE snapshot = '{snapshot}' AND {language_filter}
";

fn catalog() -> QueryTemplateRunner {
    let mut runner = QueryTemplateRunner::new();
    runner
        .register(
            QueryTemplate::new("template_count_query", TEMPLATE_COUNT_SQL, BackendKind::RowStore)
                .unwrap(),
        )
        .unwrap();
    runner
        .register(
            QueryTemplate::new("caption_count", CAPTION_COUNT_SQL, BackendKind::BatchStore).unwrap(),
        )
        .unwrap();
    runner
}

#[tokio::test]
async fn test_information_template_count() {
    let runner = catalog();
    let backends = Backends::new().with(Box::new(
        MockBackend::new(BackendKind::RowStore).respond_count(
            "lt_title = 'Information'",
            "num_files",
            51_836_906,
        ),
    ));

    let query = runner
        .bind(
            "template_count_query",
            &params([("template_title", "Information")]),
        )
        .unwrap();
    let result = runner.run(&query, &backends, &[]).await.unwrap();

    assert_eq!(result.row_count(), 1);
    assert_eq!(result.scalar_count("num_files").unwrap(), 51_836_906);
}

#[tokio::test]
async fn test_caption_language_overlap() {
    let runner = catalog();
    let backends = Backends::new().with(Box::new(
        MockBackend::new(BackendKind::BatchStore)
            .respond_count("language <> 'en'", "files", 731_900)
            .respond_count("language = 'en'", "files", 776_401)
            .respond_count("TRUE", "files", 1_365_092),
    ));

    let mut counts = Vec::new();
    for filter in ["language <> 'en'", "language = 'en'", "TRUE"] {
        let mut bound = params([("snapshot", "2019-11")]);
        bound.insert(
            "language_filter".to_string(),
            db_tally::template::Param::Raw(filter.to_string()),
        );
        let query = runner.bind("caption_count", &bound).unwrap();
        let result = runner.run(&query, &backends, &[]).await.unwrap();
        counts.push(SetCount::from_result(&query, &result, "files", &["snapshot"]).unwrap());
    }

    assert_eq!(overlap(&counts[0], &counts[1], &counts[2]).unwrap(), 143_209);
}

#[tokio::test]
async fn test_missing_end_date_names_the_parameter() {
    let mut runner = QueryTemplateRunner::new();
    runner
        .register(
            QueryTemplate::new(
                "caption_edits",
                "SELECT COUNT(*) FROM mediawiki_history \
                 WHERE event_timestamp >= '{start_date}' AND event_timestamp < '{end_date}'",
                BackendKind::BatchStore,
            )
            .unwrap(),
        )
        .unwrap();

    let err = runner
        .bind("caption_edits", &params([("start_date", "2019-01-01")]))
        .unwrap_err();
    match err {
        TallyError::MissingParameter { template, missing } => {
            assert_eq!(template, "caption_edits");
            assert_eq!(missing, vec!["end_date".to_string()]);
        }
        other => panic!("Expected MissingParameter, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_backend() {
    let runner = catalog();
    let backends = Backends::new().with(Box::new(MockBackend::new(BackendKind::RowStore).unavailable()));

    let query = runner
        .bind(
            "template_count_query",
            &params([("template_title", "Information")]),
        )
        .unwrap();
    let err = runner.run(&query, &backends, &[]).await.unwrap_err();

    assert!(matches!(err, TallyError::BackendUnavailable(_)));
    assert!(err.to_string().contains("template_count_query"));
}

#[tokio::test]
async fn test_backend_failure_is_query_execution() {
    let runner = catalog();
    let backends = Backends::new().with(Box::new(
        MockBackend::new(BackendKind::RowStore)
            .fail("templatelinks", "relation \"templatelinks\" does not exist"),
    ));

    let query = runner
        .bind("template_count_query", &params([("template_title", "Artwork")]))
        .unwrap();
    let err = runner.run(&query, &backends, &[]).await.unwrap_err();

    assert!(matches!(err, TallyError::QueryExecution(_)));
    let message = err.to_string();
    assert!(message.contains("template_title=Artwork"), "{message}");
    assert!(message.contains("does not exist"), "{message}");
}

#[test]
fn test_inconsistent_counts_are_rejected() {
    let err = pairwise_overlap(2013, 0, 3000).unwrap_err();
    assert!(matches!(err, TallyError::InvalidOverlap(_)));
}
