//! Placeholder parity and injection safety across every compiled shape.

use transpiler::labels::LabelMatcher;
use transpiler::transform::LabelOpsMode;
use transpiler::{
    CompileError, Expr, MetricName, RegexSemantics, Selector, SqlValue, TimeWindow, Transformer,
    TranspileError, TranspilerOptions, ValidationError, transpile,
};

const QUERIES: &[&str] = &[
    "up",
    r#"http_requests_total{method="GET", code=~"5..", path!~"/health.*", env!="dev"}"#,
    "http_requests_total[5m]",
    "rate(http_requests_total[5m])",
    "increase(http_requests_total[1h])",
    "avg_over_time(node_load1[10m])",
    "count_over_time(node_load1[30s])",
    "quantile_over_time(0.99, request_duration_seconds[5m])",
    "sum(up)",
    "sum by (job, instance) (up)",
    "max by (region) (rate(http_requests_total[5m]))",
    "stddev(node_load1)",
    "up * 2",
    "2 * up",
    "errors_total / requests_total",
    "up > 0",
    "up == bool 1",
    "a and b",
    "a or b",
    "a unless b",
    "1 + 2",
    "-up",
    r#"label_replace(up{job="api"}, "host", "$1", "instance", "(.*):.*")"#,
];

fn all_options() -> Vec<TranspilerOptions> {
    let mut options = Vec::new();
    for canonical_grouping in [true, false] {
        for label_ops in [LabelOpsMode::Rewrite, LabelOpsMode::Legacy] {
            for regex_semantics in [RegexSemantics::Search, RegexSemantics::FullMatch] {
                options.push(TranspilerOptions {
                    canonical_grouping,
                    label_ops,
                    regex_semantics,
                    ..TranspilerOptions::default()
                });
            }
        }
    }
    options
}

#[test]
fn test_every_query_is_balanced() {
    for options in all_options() {
        for query in QUERIES {
            let fragment = transpile(query, &options).unwrap_or_else(|e| panic!("{query}: {e}"));
            assert!(
                fragment.is_balanced(),
                "{query}: {} placeholders, {} parameters",
                fragment.placeholder_count(),
                fragment.parameters().len()
            );
            assert!(!fragment.text().trim().is_empty());
        }
    }
}

#[test]
fn test_label_functions_are_balanced() {
    let up = || Expr::from(Selector::new("up").unwrap());
    let s = Expr::string;
    let calls = vec![
        Expr::call("label_set", vec![up(), s("env"), s("prod")]),
        Expr::call("label_del", vec![up(), s("pod"), s("instance")]),
        Expr::call("label_keep", vec![up(), s("job")]),
        Expr::call("label_copy", vec![up(), s("job"), s("service")]),
        Expr::call("label_move", vec![up(), s("job"), s("service")]),
        Expr::call(
            "label_replace",
            vec![up(), s("host"), s("$1"), s("instance"), s("(.*):.*")],
        ),
    ];

    for options in all_options() {
        let transformer = Transformer::new(options);
        for call in &calls {
            let fragment = transformer.transform(call).unwrap();
            assert!(fragment.is_balanced(), "{call}");
        }
    }
}

#[test]
fn test_end_to_end_parameters() {
    let fragment = transpile(
        r#"http_requests_total{method="GET"}"#,
        &TranspilerOptions::default(),
    )
    .unwrap();
    assert_eq!(fragment.placeholder_count(), 3);
    assert_eq!(
        fragment.parameters(),
        &[
            SqlValue::from("http_requests_total"),
            SqlValue::from("method"),
            SqlValue::from("GET"),
        ]
    );
}

#[test]
fn test_hostile_values_only_travel_as_parameters() {
    let hostile = [
        "x'; DROP TABLE sample_value; --",
        "' OR '1'='1",
        "a\"; SELECT 1; --",
    ];

    for value in hostile {
        let selector = Selector::new("up")
            .unwrap()
            .with_matcher(LabelMatcher::equal("job", value).unwrap())
            .with_window(TimeWindow::parse("5m").unwrap());

        let exprs = vec![
            Expr::from(selector.clone()),
            Expr::call("rate", vec![selector.clone().into()]),
            Expr::call(
                "label_set",
                vec![selector.clone().into(), Expr::string("note"), Expr::string(value)],
            ),
        ];

        for expr in exprs {
            let fragment = Transformer::default().transform(&expr).unwrap();
            assert!(!fragment.text().contains(value), "{value:?} leaked into SQL text");
            assert!(fragment.parameters().contains(&SqlValue::from(value)));
            assert!(fragment.is_balanced());
        }
    }
}

#[test]
fn test_hostile_identifiers_are_rejected() {
    assert!(matches!(
        MetricName::new("$bad"),
        Err(ValidationError::InvalidMetricName(_))
    ));
    assert!(matches!(
        LabelMatcher::equal("1bad", "x"),
        Err(ValidationError::InvalidLabelName(_))
    ));
    assert!(LabelMatcher::equal("valid_name", "x").is_ok());

    let up = Expr::from(Selector::new("up").unwrap());
    let err = Transformer::default()
        .transform(&Expr::call(
            "label_set",
            vec![up, Expr::string("x'; DROP TABLE label_key; --"), Expr::string("v")],
        ))
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::Validation(ValidationError::InvalidLabelName(_))
    ));
}

#[test]
fn test_unsupported_queries_fail_without_sql() {
    let options = TranspilerOptions::default();
    for query in ["avg without (pod) (up)", "up offset 5m", "a + on(job) b"] {
        let err = transpile(query, &options).unwrap_err();
        assert!(matches!(err, TranspileError::Compile(_)), "{query}: {err:?}");
    }
}
